//! Shared domain types for the camcast workspace.

pub mod config;
pub mod frame;
pub mod notification;

mod errors;

pub use errors::{CamcastError, Result};
