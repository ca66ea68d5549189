//! Registry of mounted expandable rows
//!
//! Each row owns the receiving end of a command channel and registers the
//! sending end here. "Expand all" posts a [`RowCommand`] to every registered
//! row instead of reaching into row state.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tagdeck_common::{Error, Result};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::selection::Identifier;

/// Command posted to a row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowCommand {
    SetExpanded(bool),
}

/// Addressable endpoint of a mounted row
#[derive(Debug, Clone)]
pub struct SiblingHandle {
    id: Identifier,
    tx: mpsc::UnboundedSender<RowCommand>,
}

impl SiblingHandle {
    /// Create a handle and the receiver the row drains
    pub fn channel(id: &str) -> (Self, mpsc::UnboundedReceiver<RowCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: id.to_string(),
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn set_expanded(&self, expanded: bool) -> Result<()> {
        self.tx
            .send(RowCommand::SetExpanded(expanded))
            .map_err(|_| Error::Internal(format!("row {} no longer receives commands", self.id)))
    }
}

/// Outcome of a broadcast over all siblings
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SiblingReport {
    /// Handles the callback was invoked on
    pub called: usize,
    /// Handles whose callback failed or panicked, with the reason
    pub failures: Vec<(Identifier, String)>,
}

impl SiblingReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

struct Entry {
    id: Identifier,
    token: u64,
    handle: SiblingHandle,
}

#[derive(Default)]
struct Inner {
    // Registration order
    entries: Vec<Entry>,
    next_token: u64,
}

/// View-scoped registry of sibling rows
#[derive(Clone, Default)]
pub struct SiblingRegistry {
    inner: Arc<Mutex<Inner>>,
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    // A panicking callback never runs under this lock, but stay usable anyway.
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SiblingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a row. The returned guard unregisters it when dropped.
    ///
    /// Re-registering an id (a remount) replaces the old handle in place and
    /// keeps its position; the stale guard of the previous mount then no
    /// longer removes anything.
    pub fn register_sibling(&self, id: &str, handle: SiblingHandle) -> SiblingGuard {
        let mut inner = lock(&self.inner);
        let token = inner.next_token;
        inner.next_token += 1;

        if let Some(entry) = inner.entries.iter_mut().find(|e| e.id == id) {
            entry.token = token;
            entry.handle = handle;
        } else {
            inner.entries.push(Entry {
                id: id.to_string(),
                token,
                handle,
            });
        }
        debug!(id = %id, "sibling registered");

        SiblingGuard {
            registry: Arc::downgrade(&self.inner),
            id: id.to_string(),
            token,
        }
    }

    /// Remove `id` regardless of which mount registered it. No-op if absent.
    pub fn unregister_sibling(&self, id: &str) {
        lock(&self.inner).entries.retain(|e| e.id != id);
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        lock(&self.inner).entries.iter().any(|e| e.id == id)
    }

    /// Invoke `f` on every registered handle in registration order.
    ///
    /// Failures (errors and panics) are isolated per handle: they are logged,
    /// reported, and the remaining handles are still called. The registry is
    /// not locked while `f` runs.
    pub fn call_on_siblings<F>(&self, mut f: F) -> SiblingReport
    where
        F: FnMut(&SiblingHandle) -> Result<()>,
    {
        let handles: Vec<SiblingHandle> = lock(&self.inner)
            .entries
            .iter()
            .map(|e| e.handle.clone())
            .collect();

        let mut report = SiblingReport::default();
        for handle in &handles {
            report.called += 1;
            let outcome = catch_unwind(AssertUnwindSafe(|| f(handle)));
            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(panic) => Some(panic_message(panic.as_ref())),
            };
            if let Some(reason) = failure {
                warn!(id = %handle.id(), reason = %reason, "sibling callback failed");
                report.failures.push((handle.id().to_string(), reason));
            }
        }
        report
    }

    pub fn expand_all(&self) -> SiblingReport {
        self.call_on_siblings(|h| h.set_expanded(true))
    }

    pub fn collapse_all(&self) -> SiblingReport {
        self.call_on_siblings(|h| h.set_expanded(false))
    }

    /// Drop every registration (view teardown)
    pub fn clear(&self) {
        lock(&self.inner).entries.clear();
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

/// Keeps a row registered for as long as it lives
#[must_use = "dropping the guard unregisters the row immediately"]
pub struct SiblingGuard {
    registry: Weak<Mutex<Inner>>,
    id: Identifier,
    token: u64,
}

impl SiblingGuard {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for SiblingGuard {
    fn drop(&mut self) {
        // Registry already torn down: nothing to do.
        let Some(inner) = self.registry.upgrade() else {
            return;
        };
        let mut inner = lock(&inner);
        let token = self.token;
        inner.entries.retain(|e| !(e.id == self.id && e.token == token));
    }
}
