//! Payloads exchanged on the `terminal` namespace

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;

/// Terminal size sent with `ptyResize`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PtySize {
    pub rows: u16,
    pub cols: u16,
}

/// Cursor location reported by the backend pty
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorPosition {
    pub x: u16,
    pub y: u16,
}

/// `ptyOutput` payload: the rendered screen lines plus the cursor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PtyOutput {
    pub output: Vec<String>,
    #[serde(default)]
    pub x: u16,
    #[serde(default)]
    pub y: u16,
}

/// Decoded event from the `terminal` namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminalEvent {
    Output(PtyOutput),
    CursorPosition(CursorPosition),
}

impl TerminalEvent {
    /// Decode a named socket event; unknown names yield `Ok(None)`
    pub fn from_socket_event(name: &str, payload: Value) -> Result<Option<Self>> {
        match name {
            "ptyOutput" => Ok(Some(TerminalEvent::Output(serde_json::from_value(payload)?))),
            "ptyCursorPosition" => Ok(Some(TerminalEvent::CursorPosition(serde_json::from_value(
                payload,
            )?))),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pty_output_decodes() {
        let event = TerminalEvent::from_socket_event(
            "ptyOutput",
            json!({"output": ["$ beet ls", ""], "x": 2, "y": 1}),
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            event,
            TerminalEvent::Output(PtyOutput {
                output: vec!["$ beet ls".to_string(), String::new()],
                x: 2,
                y: 1,
            })
        );
    }

    #[test]
    fn test_cursor_position_requires_coordinates() {
        assert!(TerminalEvent::from_socket_event("ptyCursorPosition", json!({"x": 1})).is_err());
    }
}
