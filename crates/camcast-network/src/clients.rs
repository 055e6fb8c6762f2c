use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use camcast_types::Result;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::network_error;

/// Unique per-connection key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outbound half of one subscriber connection.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, payload: Arc<str>) -> Result<()>;
}

/// Queues payloads for a connection task that owns the socket.
pub struct ChannelSink {
    tx: mpsc::Sender<Arc<str>>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Arc<str>>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl NotificationSink for ChannelSink {
    async fn send(&self, payload: Arc<str>) -> Result<()> {
        self.tx
            .try_send(payload)
            .map_err(|err| network_error(format!("subscriber queue rejected message: {err}")))
    }
}

/// Currently connected subscribers. Cloning shares the same set.
#[derive(Clone, Default)]
pub struct ClientSet {
    inner: Arc<RwLock<HashMap<ClientId, Arc<dyn NotificationSink>>>>,
}

impl ClientSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fresh member; removal happens when the returned registration
    /// is closed or dropped.
    pub fn register(&self, sink: Arc<dyn NotificationSink>) -> Registration {
        let id = ClientId::new();
        self.insert(id, sink);
        Registration {
            id,
            clients: self.clone(),
            active: true,
        }
    }

    pub fn insert(&self, id: ClientId, sink: Arc<dyn NotificationSink>) -> bool {
        match self.inner.write() {
            Ok(mut guard) => guard.insert(id, sink).is_none(),
            Err(poisoned) => poisoned.into_inner().insert(id, sink).is_none(),
        }
    }

    /// Returns whether `id` was present.
    pub fn remove(&self, id: ClientId) -> bool {
        match self.inner.write() {
            Ok(mut guard) => guard.remove(&id).is_some(),
            Err(poisoned) => poisoned.into_inner().remove(&id).is_some(),
        }
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.read(|map| map.contains_key(&id))
    }

    pub fn len(&self) -> usize {
        self.read(HashMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Point-in-time copy of the members, taken without holding the lock
    /// across any send.
    pub fn snapshot(&self) -> Vec<(ClientId, Arc<dyn NotificationSink>)> {
        self.read(|map| {
            map.iter()
                .map(|(id, sink)| (*id, Arc::clone(sink)))
                .collect()
        })
    }

    fn read<T>(&self, f: impl FnOnce(&HashMap<ClientId, Arc<dyn NotificationSink>>) -> T) -> T {
        match self.inner.read() {
            Ok(guard) => f(&guard),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }
}

/// Membership held by one connection handler.
pub struct Registration {
    id: ClientId,
    clients: ClientSet,
    active: bool,
}

impl Registration {
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Leave the set. Only the first call has an effect.
    pub fn close(&mut self) -> bool {
        if !self.active {
            return false;
        }
        self.active = false;
        self.clients.remove(self.id)
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.close();
    }
}
