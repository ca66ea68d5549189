//! Event types for the tagdeck event system
//!
//! Provides the socket payload definitions and the EventBus that fans
//! connection events out to every consumer in the process.

// Sub-modules (supporting types)
mod status_types;
mod terminal_types;

pub use status_types::{Attributes, InboxUpdate, StatusEvent, TagUpdate, ALL_ATTRIBUTES};
pub use terminal_types::{CursorPosition, PtyOutput, PtySize, TerminalEvent};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Socket namespaces served by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    /// Tag and inbox push updates
    Status,
    /// Backend pty for the embedded terminal
    Terminal,
}

impl Namespace {
    /// Socket.IO namespace path, e.g. `/status`
    pub fn path(&self) -> &'static str {
        match self {
            Namespace::Status => "/status",
            Namespace::Terminal => "/terminal",
        }
    }

    pub fn from_path(path: &str) -> Option<Self> {
        match path {
            "/status" => Some(Namespace::Status),
            "/terminal" => Some(Namespace::Terminal),
            _ => None,
        }
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.path())
    }
}

/// tagdeck event types
///
/// Events are broadcast via EventBus. Every socket consumer subscribes to the
/// same bus and filters on the variants it cares about.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TagdeckEvent {
    /// Namespace joined (initial connect or reconnect)
    ///
    /// Triggers:
    /// - Push-Update Listener: full refetch of cached entries after a reconnect
    Connected {
        namespace: Namespace,
        /// True when this is not the first connect of the session
        reconnect: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Socket lost or namespace left
    Disconnected {
        namespace: Namespace,
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Tag or inbox change reported by the backend
    Status { event: StatusEvent },

    /// Output from the backend pty
    Terminal { event: TerminalEvent },
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus for application-wide events
///
/// The EventBus uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use tagdeck_common::events::{EventBus, Namespace, TagdeckEvent};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit(TagdeckEvent::Connected {
///     namespace: Namespace::Status,
///     reconnect: false,
///     timestamp: chrono::Utc::now(),
/// }).ok();
///
/// assert!(matches!(rx.try_recv(), Ok(TagdeckEvent::Connected { .. })));
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TagdeckEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// * `capacity` - Number of events to buffer before dropping old events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<TagdeckEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: TagdeckEvent,
    ) -> Result<usize, broadcast::error::SendError<TagdeckEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: TagdeckEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
