use std::{
    io::{self, Stdout},
    time::Duration,
};

use camcast_orchestrator::{Preview, PreviewState, Trigger, TriggerSource};
use camcast_types::{frame::Frame, CamcastError, Result};
use crossterm::{
    event::{self, Event as CEvent, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Terminal,
};

/// Dark to light.
const LUMA_RAMP: &[u8] = b" .:-=+*#%@";

fn ui_error(context: &str, err: io::Error) -> CamcastError {
    CamcastError::Ui(format!("{context}: {err}"))
}

/// Keyboard triggers read from the terminal in raw mode.
pub struct KeyboardTriggers;

impl TriggerSource for KeyboardTriggers {
    fn poll_trigger(&mut self, timeout: Duration) -> Result<Option<Trigger>> {
        if !event::poll(timeout).map_err(|err| ui_error("key poll failed", err))? {
            return Ok(None);
        }
        match event::read().map_err(|err| ui_error("key read failed", err))? {
            CEvent::Key(key) if key.kind == KeyEventKind::Press => Ok(map_key(key)),
            _ => Ok(None),
        }
    }
}

pub fn map_key(key: KeyEvent) -> Option<Trigger> {
    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Some(Trigger::Quit),
        KeyCode::Char('q' | 'Q') | KeyCode::Esc => Some(Trigger::Quit),
        KeyCode::Char('s' | 'S') => Some(Trigger::Capture),
        KeyCode::Char('f' | 'F') => Some(Trigger::ToggleFullscreen),
        _ => None,
    }
}

/// Live preview drawn into the alternate screen. The terminal is restored on
/// close or drop.
pub struct TerminalPreview {
    terminal: Terminal<CrosstermBackend<Stdout>>,
    endpoints: String,
    fullscreen: bool,
    closed: bool,
}

impl TerminalPreview {
    /// `endpoints` is shown in the header so subscribers' URLs stay visible.
    pub fn new(endpoints: String) -> Result<Self> {
        enable_raw_mode().map_err(|err| ui_error("failed to enable raw mode", err))?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)
            .map_err(|err| ui_error("failed to enter alternate screen", err))?;
        let mut terminal = Terminal::new(CrosstermBackend::new(stdout))
            .map_err(|err| ui_error("failed to create terminal", err))?;
        terminal
            .hide_cursor()
            .map_err(|err| ui_error("failed to hide cursor", err))?;
        Ok(Self {
            terminal,
            endpoints,
            fullscreen: false,
            closed: false,
        })
    }
}

impl Preview for TerminalPreview {
    fn show(&mut self, frame: &Frame, state: &PreviewState) -> Result<()> {
        let fullscreen = self.fullscreen;
        let endpoints = self.endpoints.as_str();
        self.terminal
            .draw(|f| draw(f, frame, state, endpoints, fullscreen))
            .map_err(|err| ui_error("failed to draw preview", err))?;
        Ok(())
    }

    fn set_fullscreen(&mut self, fullscreen: bool) -> Result<()> {
        self.fullscreen = fullscreen;
        self.terminal
            .clear()
            .map_err(|err| ui_error("failed to clear terminal", err))
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.terminal.show_cursor();
        let _ = disable_raw_mode();
        let _ = execute!(self.terminal.backend_mut(), LeaveAlternateScreen);
    }
}

impl Drop for TerminalPreview {
    fn drop(&mut self) {
        self.close();
    }
}

fn draw(
    f: &mut ratatui::Frame,
    frame: &Frame,
    state: &PreviewState,
    endpoints: &str,
    fullscreen: bool,
) {
    let area = f.size();
    if fullscreen {
        render_frame(f, frame, area, None);
        return;
    }

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(5), Constraint::Min(0), Constraint::Length(3)].as_ref())
        .split(area);

    let last_capture = state
        .last_capture
        .map(|at| at.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "none".into());
    let header = Paragraph::new(vec![
        Line::from(Span::styled(
            "Press 'S' to capture and send notification",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        )),
        Line::from(vec![
            Span::raw(format!("{}x{}  frame #{}", frame.width, frame.height, frame.sequence)),
            Span::raw("  "),
            Span::styled("captures:", Style::default().fg(Color::Magenta)),
            Span::raw(format!(" {} (last {})  ", state.captures, last_capture)),
            Span::raw(state.snapshot_name.clone()),
        ]),
        Line::from(vec![
            Span::styled("serving:", Style::default().fg(Color::Magenta)),
            Span::raw(format!(" {endpoints}")),
        ]),
    ])
    .block(Block::default().borders(Borders::ALL).title("camcast"));
    f.render_widget(header, chunks[0]);

    render_frame(f, frame, chunks[1], Some("Preview"));

    let controls = Paragraph::new(Line::from(vec![
        Span::styled("s", Style::default().fg(Color::Yellow)),
        Span::raw(" capture  "),
        Span::styled("f", Style::default().fg(Color::Yellow)),
        Span::raw(" fullscreen  "),
        Span::styled("q", Style::default().fg(Color::Yellow)),
        Span::raw(" quit"),
    ]))
    .block(Block::default().borders(Borders::ALL).title("Controls"));
    f.render_widget(controls, chunks[2]);
}

fn render_frame(f: &mut ratatui::Frame, frame: &Frame, area: Rect, title: Option<&str>) {
    let (block, inner) = match title {
        Some(title) => {
            let block = Block::default().borders(Borders::ALL).title(title.to_owned());
            let inner = block.inner(area);
            (Some(block), inner)
        }
        None => (None, area),
    };
    let lines: Vec<Line> = frame_to_ascii(frame, inner.width, inner.height)
        .into_iter()
        .map(Line::from)
        .collect();
    let mut paragraph = Paragraph::new(lines);
    if let Some(block) = block {
        paragraph = paragraph.block(block);
    }
    f.render_widget(paragraph, area);
}

/// Nearest-neighbour downsample into `rows` lines of `cols` luma characters.
pub fn frame_to_ascii(frame: &Frame, cols: u16, rows: u16) -> Vec<String> {
    if cols == 0 || rows == 0 || frame.width == 0 || frame.height == 0 {
        return Vec::new();
    }
    let (cols, rows) = (u32::from(cols), u32::from(rows));
    (0..rows)
        .map(|row| {
            let y = row * frame.height / rows;
            (0..cols)
                .map(|col| {
                    let x = col * frame.width / cols;
                    let [r, g, b] = frame.pixel(x, y).unwrap_or([0, 0, 0]);
                    let luma = (299 * u32::from(r) + 587 * u32::from(g) + 114 * u32::from(b)) / 1000;
                    let idx = luma as usize * (LUMA_RAMP.len() - 1) / 255;
                    LUMA_RAMP[idx] as char
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::backend::TestBackend;

    fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Frame {
        let data = rgb.repeat((width * height) as usize);
        Frame::from_rgb(width, height, data, 1)
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn screen_text(terminal: &Terminal<TestBackend>) -> String {
        terminal
            .backend()
            .buffer()
            .content
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    #[test]
    fn keys_map_to_triggers() {
        assert_eq!(map_key(key(KeyCode::Char('q'))), Some(Trigger::Quit));
        assert_eq!(map_key(key(KeyCode::Esc)), Some(Trigger::Quit));
        assert_eq!(
            map_key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            Some(Trigger::Quit)
        );
        assert_eq!(map_key(key(KeyCode::Char('S'))), Some(Trigger::Capture));
        assert_eq!(map_key(key(KeyCode::Char('f'))), Some(Trigger::ToggleFullscreen));
        assert_eq!(map_key(key(KeyCode::Char('c'))), None);
        assert_eq!(map_key(key(KeyCode::Enter)), None);
    }

    #[test]
    fn ascii_uses_ramp_extremes() {
        let black = frame_to_ascii(&solid(8, 8, [0, 0, 0]), 4, 2);
        assert_eq!(black, vec!["    ".to_string(), "    ".to_string()]);
        let white = frame_to_ascii(&solid(8, 8, [255, 255, 255]), 3, 1);
        assert_eq!(white, vec!["@@@".to_string()]);
        assert!(frame_to_ascii(&solid(8, 8, [0, 0, 0]), 0, 5).is_empty());
    }

    #[test]
    fn header_shown_unless_fullscreen() {
        let frame = solid(16, 16, [255, 255, 255]);
        let state = PreviewState {
            snapshot_name: "captured_latest.jpg".into(),
            ..Default::default()
        };
        let endpoints = "ws://0.0.0.0:8765";
        let mut terminal = Terminal::new(TestBackend::new(60, 16)).expect("terminal");

        terminal
            .draw(|f| draw(f, &frame, &state, endpoints, false))
            .expect("draw");
        let text = screen_text(&terminal);
        assert!(text.contains("Press 'S' to capture and send notification"));
        assert!(text.contains("serving: ws://0.0.0.0:8765"));
        assert!(text.contains("Controls"));

        terminal
            .draw(|f| draw(f, &frame, &state, endpoints, true))
            .expect("draw");
        let text = screen_text(&terminal);
        assert!(!text.contains("Press 'S'"));
        assert!(text.chars().all(|c| c == '@'));
    }
}
