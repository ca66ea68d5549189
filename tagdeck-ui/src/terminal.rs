//! Terminal namespace channel
//!
//! The backend runs a shell in a pty and mirrors it over the `/terminal`
//! namespace. Actions only need to type into it, so the surface they see is
//! the [`TextInjector`] trait.

use serde_json::{json, Value};
use tagdeck_common::events::{CursorPosition, Namespace, PtySize, TerminalEvent};
use tagdeck_common::{Error, Result};
use tracing::debug;

use crate::connection::{ConnectionLease, ConnectionManager};

pub const PTY_INPUT: &str = "ptyInput";
pub const PTY_RESIZE: &str = "ptyResize";
pub const PTY_RESEND_OUTPUT: &str = "ptyResendOutput";

/// Types a command line into the shared terminal
pub trait TextInjector: Send + Sync {
    fn input_text(&self, command: &str) -> Result<()>;
}

/// Emitting side of the `/terminal` namespace
#[derive(Debug)]
pub struct TerminalChannel {
    lease: ConnectionLease,
}

impl TerminalChannel {
    pub fn open(manager: &ConnectionManager) -> Self {
        Self {
            lease: manager.acquire(Namespace::Terminal),
        }
    }

    pub fn resize(&self, size: PtySize) -> Result<()> {
        if size.rows == 0 || size.cols == 0 {
            return Err(Error::InvalidInput(format!(
                "terminal size must be non-zero, got {}x{}",
                size.cols, size.rows
            )));
        }
        let payload = serde_json::to_value(size)?;
        self.lease.emit(PTY_RESIZE, payload)
    }

    /// Ask the backend to replay its scrollback
    pub fn resend_output(&self) -> Result<()> {
        self.lease.emit(PTY_RESEND_OUTPUT, Value::Null)
    }
}

impl TextInjector for TerminalChannel {
    fn input_text(&self, command: &str) -> Result<()> {
        debug!(command, "terminal input");
        self.lease.emit(PTY_INPUT, json!(command))
    }
}

/// Last known terminal screen, folded from `ptyOutput` / `ptyCursorPosition`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TerminalScreen {
    pub lines: Vec<String>,
    pub cursor: CursorPosition,
}

impl TerminalScreen {
    pub fn apply(&mut self, event: &TerminalEvent) {
        match event {
            TerminalEvent::Output(output) => {
                self.lines = output.output.clone();
                self.cursor = CursorPosition {
                    x: output.x,
                    y: output.y,
                };
            }
            TerminalEvent::CursorPosition(pos) => self.cursor = *pos,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagdeck_common::config::ReconnectConfig;
    use tagdeck_common::events::{EventBus, PtyOutput};

    #[tokio::test]
    async fn test_zero_resize_rejected_before_emit() {
        let manager =
            ConnectionManager::new("http://127.0.0.1:9", ReconnectConfig::default(), EventBus::new(4)).unwrap();
        manager.connect();
        let channel = TerminalChannel::open(&manager);
        assert!(matches!(
            channel.resize(PtySize { rows: 0, cols: 80 }),
            Err(Error::InvalidInput(_))
        ));
        assert!(channel.resize(PtySize { rows: 24, cols: 80 }).is_ok());
        assert!(channel.input_text("beet ls\n").is_ok());
    }

    #[test]
    fn test_screen_tracks_output_and_cursor() {
        let mut screen = TerminalScreen::default();
        screen.apply(&TerminalEvent::Output(PtyOutput {
            output: vec!["$ beet ls".to_string()],
            x: 9,
            y: 0,
        }));
        assert_eq!(screen.lines, vec!["$ beet ls"]);
        screen.apply(&TerminalEvent::CursorPosition(CursorPosition { x: 2, y: 1 }));
        assert_eq!(screen.cursor, CursorPosition { x: 2, y: 1 });
        assert_eq!(screen.lines.len(), 1);
    }
}
