//! Context menu mutation actions
//!
//! An action pairs a label/icon, a backend operation and a reconciliation
//! policy for the cache. Triggering is split in two synchronous halves
//! around the network call:
//!
//! * [`MutationAction::begin`] snapshots the selection, flips to `Pending`
//!   and hands back the request to send.
//! * [`MutationAction::complete`] records the outcome, reconciles the cache
//!   and closes the menu.
//!
//! Nothing is borrowed across the await, and a second trigger while the
//! first is in flight sees `Pending` and does nothing.

use std::collections::BTreeMap;

use tagdeck_common::{Error, Result};
use tracing::{debug, info, warn};

use crate::api::{AddTagsRequest, DeleteFoldersRequest, LibraryApi, TagKind};
use crate::cache::{CacheKey, PatchSource, QueryCache, STATUS_IMPORTED, STATUS_PENDING};
use crate::context_menu::{CloseReason, ContextMenu};
use crate::selection::{Identifier, Selection};
use crate::terminal::TextInjector;

/// Destination for "copy path"
pub trait Clipboard: Send + Sync {
    fn write_text(&self, text: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ActionKind {
    Retag,
    Import,
    Delete,
    UndoImport,
    TerminalImport,
    CopyPath,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionState {
    Idle,
    Pending,
    /// Finished; the next trigger only acknowledges it
    Success,
    /// Shown as a blocking error dialog until dismissed
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Icon {
    Retag,
    Import,
    Delete,
    Undo,
    Terminal,
    Copy,
    Spinner,
    Check,
    Error,
}

/// Render model of one menu entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionView {
    pub label: String,
    pub icon: Icon,
    pub state: ActionState,
}

/// Operation an action performs once started
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationRequest {
    AddTags(AddTagsRequest),
    DeleteFolders(DeleteFoldersRequest),
    /// Command line typed into the shared terminal
    TerminalInput(String),
    CopyText(String),
}

/// Result of [`MutationAction::begin`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Started(MutationRequest),
    /// Success acknowledged; back to idle without a request
    Reset,
    Ignored,
}

/// Collaborators a request may need
pub struct ActionDeps<'a, A> {
    pub api: &'a A,
    pub terminal: Option<&'a dyn TextInjector>,
    pub clipboard: Option<&'a dyn Clipboard>,
}

impl<'a, A> ActionDeps<'a, A> {
    pub fn new(api: &'a A) -> Self {
        Self {
            api,
            terminal: None,
            clipboard: None,
        }
    }

    pub fn with_terminal(mut self, terminal: &'a dyn TextInjector) -> Self {
        self.terminal = Some(terminal);
        self
    }

    pub fn with_clipboard(mut self, clipboard: &'a dyn Clipboard) -> Self {
        self.clipboard = Some(clipboard);
        self
    }
}

/// Send a request built by [`MutationAction::begin`]
pub async fn execute<A: LibraryApi>(request: &MutationRequest, deps: &ActionDeps<'_, A>) -> Result<()> {
    match request {
        MutationRequest::AddTags(body) => deps.api.add_tags(body).await,
        MutationRequest::DeleteFolders(body) => deps.api.delete_inbox_folders(body).await,
        MutationRequest::TerminalInput(command) => deps
            .terminal
            .ok_or_else(|| Error::MissingContext("terminal action used without a terminal channel".to_string()))?
            .input_text(command),
        MutationRequest::CopyText(text) => deps
            .clipboard
            .ok_or_else(|| Error::MissingContext("copy action used without a clipboard".to_string()))?
            .write_text(text),
    }
}

#[derive(Debug, Clone)]
pub struct MutationAction {
    kind: ActionKind,
    state: ActionState,
    /// Statuses a delete is restricted to; empty means any
    delete_with_status: Vec<String>,
    /// Selection snapshot of the request in flight
    in_flight: Vec<Identifier>,
}

impl MutationAction {
    fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            state: ActionState::Idle,
            delete_with_status: Vec::new(),
            in_flight: Vec::new(),
        }
    }

    pub fn retag() -> Self {
        Self::new(ActionKind::Retag)
    }

    pub fn import() -> Self {
        Self::new(ActionKind::Import)
    }

    pub fn delete(with_status: Vec<String>) -> Self {
        Self {
            delete_with_status: with_status,
            ..Self::new(ActionKind::Delete)
        }
    }

    pub fn undo_import() -> Self {
        Self::new(ActionKind::UndoImport)
    }

    pub fn terminal_import() -> Self {
        Self::new(ActionKind::TerminalImport)
    }

    pub fn copy_path() -> Self {
        Self::new(ActionKind::CopyPath)
    }

    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    pub fn state(&self) -> &ActionState {
        &self.state
    }

    /// Render model, or `None` when the action is absent from the menu
    pub fn view(&self, selection: &Selection, cache: &QueryCache) -> Option<ActionView> {
        let (label, icon) = match self.kind {
            ActionKind::Retag => ("Retag".to_string(), Icon::Retag),
            ActionKind::Import => ("Import".to_string(), Icon::Import),
            ActionKind::Delete => ("Delete".to_string(), Icon::Delete),
            ActionKind::UndoImport => {
                let eligible = undo_import_ids(selection, cache).len();
                if eligible == 0 {
                    return None;
                }
                (undo_label(eligible), Icon::Undo)
            }
            ActionKind::TerminalImport => ("Import in terminal".to_string(), Icon::Terminal),
            ActionKind::CopyPath => {
                let label = if selection.num_selected() > 1 { "Copy paths" } else { "Copy path" };
                (label.to_string(), Icon::Copy)
            }
        };
        let icon = match self.state {
            ActionState::Idle => icon,
            ActionState::Pending => Icon::Spinner,
            ActionState::Success => Icon::Check,
            ActionState::Failed(_) => Icon::Error,
        };
        Some(ActionView {
            label,
            icon,
            state: self.state.clone(),
        })
    }

    /// First half of a trigger. Returns the request to send, if any.
    pub fn begin(&mut self, selection: &Selection, cache: &QueryCache) -> Trigger {
        match self.state {
            ActionState::Success => {
                self.state = ActionState::Idle;
                return Trigger::Reset;
            }
            ActionState::Pending => {
                debug!(action = ?self.kind, "trigger ignored; request already in flight");
                return Trigger::Ignored;
            }
            ActionState::Failed(_) => {
                debug!(action = ?self.kind, "trigger ignored; error dialog open");
                return Trigger::Ignored;
            }
            ActionState::Idle => {}
        }

        let selected = selection.get_selected();
        let Some(request) = self.build_request(&selected, cache) else {
            debug!(action = ?self.kind, "nothing to act on");
            return Trigger::Ignored;
        };

        info!(action = ?self.kind, items = selected.len(), "action started");
        self.state = ActionState::Pending;
        self.in_flight = selected;
        Trigger::Started(request)
    }

    /// Second half of a trigger, after the request resolved.
    ///
    /// Reconciliation only runs after a successful request. Failures leave
    /// the cache untouched and the menu open behind the error dialog.
    pub fn complete(
        &mut self,
        outcome: Result<()>,
        cache: &mut QueryCache,
        menu: &mut ContextMenu,
        selection: &mut Selection,
    ) {
        if self.state != ActionState::Pending {
            warn!(action = ?self.kind, state = ?self.state, "completion without a pending request");
            return;
        }
        let affected = std::mem::take(&mut self.in_flight);
        match outcome {
            Ok(()) => {
                self.reconcile(&affected, cache);
                self.state = ActionState::Success;
                menu.close(CloseReason::ActionSelected, selection);
                info!(action = ?self.kind, items = affected.len(), "action succeeded");
            }
            Err(e) => {
                warn!(action = ?self.kind, error = %e, "action failed");
                self.state = ActionState::Failed(e.to_string());
            }
        }
    }

    /// Dismiss the error dialog
    pub fn dismiss_error(&mut self) {
        if matches!(self.state, ActionState::Failed(_)) {
            self.state = ActionState::Idle;
        }
    }

    fn build_request(&self, selected: &[Identifier], cache: &QueryCache) -> Option<MutationRequest> {
        if selected.is_empty() {
            return None;
        }
        let folders = || selected.iter().map(|id| folder_of(id, cache)).collect::<Vec<_>>();
        let request = match self.kind {
            ActionKind::Retag => MutationRequest::AddTags(AddTagsRequest {
                folders: folders(),
                kind: TagKind::Preview,
            }),
            ActionKind::Import => MutationRequest::AddTags(AddTagsRequest {
                folders: folders(),
                kind: TagKind::Import,
            }),
            ActionKind::Delete => MutationRequest::DeleteFolders(DeleteFoldersRequest {
                folders: folders(),
                with_status: self.delete_with_status.clone(),
            }),
            ActionKind::UndoImport => {
                let ids = undo_import_ids(&selection_of(selected), cache);
                MutationRequest::TerminalInput(undo_import_command(&ids)?)
            }
            ActionKind::TerminalImport => MutationRequest::TerminalInput(terminal_import_command(&folders())),
            ActionKind::CopyPath => MutationRequest::CopyText(folders().join("\n")),
        };
        Some(request)
    }

    fn reconcile(&self, affected: &[Identifier], cache: &mut QueryCache) {
        match self.kind {
            ActionKind::Retag | ActionKind::Import => {
                let patch: BTreeMap<String, String> =
                    [("status".to_string(), STATUS_PENDING.to_string())].into_iter().collect();
                for identifier in affected {
                    let Some(id) = cache.tag_for_identifier(identifier).map(|t| t.id.clone()) else {
                        // Untagged folder; the push for its new tag fills the cache
                        continue;
                    };
                    cache.patch_tag(&CacheKey::TagById(id), &patch, PatchSource::Optimistic);
                }
            }
            // Membership changed, so the listings are refetched instead of patched
            ActionKind::Delete => cache.invalidate_lists(),
            // The removal runs in the terminal; the backend pushes the outcome.
            ActionKind::UndoImport | ActionKind::TerminalImport | ActionKind::CopyPath => {}
        }
    }
}

/// The album folder an identifier names. Identifiers are folder paths in the
/// inbox and tag ids elsewhere.
fn folder_of(identifier: &str, cache: &QueryCache) -> String {
    cache
        .tag(identifier)
        .map(|t| t.album_folder.clone())
        .unwrap_or_else(|| identifier.to_string())
}

fn selection_of(ids: &[Identifier]) -> Selection {
    let mut selection = Selection::new();
    for id in ids {
        selection.add_to_selection(id);
    }
    selection
}

/// Import ids of the selected tags whose status is exactly `imported`
pub fn undo_import_ids(selection: &Selection, cache: &QueryCache) -> Vec<String> {
    selection
        .get_selected()
        .iter()
        .filter_map(|identifier| cache.tag_for_identifier(identifier))
        .filter(|tag| tag.status == STATUS_IMPORTED)
        .map(|tag| tag.gui_import_id.clone().unwrap_or_else(|| tag.id.clone()))
        .collect()
}

fn undo_label(count: usize) -> String {
    if count == 1 {
        "Undo Import (1 tag)".to_string()
    } else {
        format!("Undo Import ({} tags)", count)
    }
}

/// `beet remove` over the union of the import ids. Not terminated with a
/// newline so the user confirms it in the terminal.
pub fn undo_import_command(import_ids: &[String]) -> Option<String> {
    if import_ids.is_empty() {
        return None;
    }
    let queries: Vec<String> = import_ids
        .iter()
        .map(|id| shell_quote(&format!("gui_import_id:{}", id)))
        .collect();
    Some(format!("beet remove -a {}", queries.join(" , ")))
}

pub fn terminal_import_command(folders: &[String]) -> String {
    let quoted: Vec<String> = folders.iter().map(|f| shell_quote(f)).collect();
    format!("beet import {}", quoted.join(" "))
}

/// POSIX single-quote `s` unless it is plainly safe
fn shell_quote(s: &str) -> String {
    let safe = !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@,+".contains(c));
    if safe {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}
