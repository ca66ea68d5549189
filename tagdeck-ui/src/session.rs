//! One list view's interaction state plus the async trigger path
//!
//! The session and the cache sit behind `tokio::sync::Mutex`es shared with
//! the push-update listener. [`trigger_action`] takes each lock only for the
//! synchronous halves of an action and never across the network call.
//! Locks are always taken session first, then cache.
//!
//! [`LongPressGesture`] drives the touch path: it runs the hold timer and
//! opens the menu through the shared session when the timer fires.

use std::collections::BTreeMap;
use std::sync::Arc;

use tagdeck_common::config::InteractionConfig;
use tagdeck_common::{Error, Result};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::actions::{execute, ActionDeps, ActionKind, ActionState, ActionView, MutationAction, Trigger};
use crate::api::LibraryApi;
use crate::cache::QueryCache;
use crate::context_menu::{LongPressTimer, Position};
use crate::listener::refresh_stale;
use crate::scope::{SelectionCapabilities, ViewScope};

fn not_offered(kind: ActionKind) -> Error {
    Error::InvalidInput(format!("action {:?} is not offered in this view", kind))
}

/// Modal shown for a failed action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDialog {
    pub action: ActionKind,
    pub message: String,
}

pub struct ViewSession {
    pub scope: ViewScope,
    actions: BTreeMap<ActionKind, MutationAction>,
}

impl ViewSession {
    /// A fully provided view with the standard action set.
    /// `delete_with_status` restricts what Delete removes (empty = anything).
    pub fn new(config: InteractionConfig, delete_with_status: Vec<String>) -> Self {
        Self::with_scope(ViewScope::full(config), delete_with_status)
    }

    pub fn with_scope(scope: ViewScope, delete_with_status: Vec<String>) -> Self {
        let actions = [
            MutationAction::retag(),
            MutationAction::import(),
            MutationAction::delete(delete_with_status),
            MutationAction::undo_import(),
            MutationAction::terminal_import(),
            MutationAction::copy_path(),
        ]
        .into_iter()
        .map(|action| (action.kind(), action))
        .collect();
        Self { scope, actions }
    }

    pub fn action(&self, kind: ActionKind) -> Option<&MutationAction> {
        self.actions.get(&kind)
    }

    /// Menu entries currently rendered, in menu order
    pub fn menu_items(&self, cache: &QueryCache) -> Result<Vec<(ActionKind, ActionView)>> {
        let selection = self.scope.selection()?;
        Ok(self
            .actions
            .values()
            .filter_map(|action| action.view(selection, cache).map(|view| (action.kind(), view)))
            .collect())
    }

    /// The open error dialog, if any action failed
    pub fn error_dialog(&self) -> Option<ErrorDialog> {
        self.actions.values().find_map(|action| match action.state() {
            ActionState::Failed(message) => Some(ErrorDialog {
                action: action.kind(),
                message: message.clone(),
            }),
            _ => None,
        })
    }

    pub fn dismiss_error(&mut self) {
        for action in self.actions.values_mut() {
            action.dismiss_error();
        }
    }

    /// First half of a trigger. The error dialog blocks every action.
    pub fn begin(&mut self, kind: ActionKind, cache: &QueryCache) -> Result<Trigger> {
        if let Some(dialog) = self.error_dialog() {
            debug!(action = ?kind, blocked_by = ?dialog.action, "trigger ignored; error dialog open");
            return Ok(Trigger::Ignored);
        }
        let selection = self.scope.selection()?;
        let action = self.actions.get_mut(&kind).ok_or_else(|| not_offered(kind))?;
        Ok(action.begin(selection, cache))
    }

    pub fn complete(&mut self, kind: ActionKind, outcome: Result<()>, cache: &mut QueryCache) -> Result<()> {
        let action = self.actions.get_mut(&kind).ok_or_else(|| not_offered(kind))?;
        let (menu, selection) = self.scope.menu_and_selection()?;
        action.complete(outcome, cache, menu, selection);
        Ok(())
    }
}

/// Trigger `kind` end to end. Returns what the trigger did; a failed request
/// is reported through [`ViewSession::error_dialog`], not as an `Err`.
///
/// Entries the action invalidated are refetched before returning.
pub async fn trigger_action<A: LibraryApi>(
    session: &Mutex<ViewSession>,
    cache: &Mutex<QueryCache>,
    kind: ActionKind,
    deps: &ActionDeps<'_, A>,
) -> Result<Trigger> {
    let trigger = {
        let mut session = session.lock().await;
        let cache = cache.lock().await;
        session.begin(kind, &cache)?
    };

    let Trigger::Started(request) = &trigger else {
        return Ok(trigger);
    };
    let outcome = execute(request, deps).await;

    let refetch = {
        let mut session = session.lock().await;
        let mut cache = cache.lock().await;
        session.complete(kind, outcome, &mut cache)?;
        let succeeded = session
            .action(kind)
            .is_some_and(|action| *action.state() == ActionState::Success);
        succeeded && cache.has_stale()
    };
    if refetch {
        let refreshed = refresh_stale(deps.api, cache).await;
        debug!(action = ?kind, refreshed, "invalidated entries refetched");
    }
    Ok(trigger)
}

/// Monotonic clock for touch timestamps; follows tokio's clock so a paused
/// runtime sees the same time the hold timer does.
fn touch_clock() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}

/// One touch held on a view. The context menu opens once the hold threshold
/// elapses unless the finger moves too far or lifts first.
pub struct LongPressGesture {
    session: Arc<Mutex<ViewSession>>,
    cancel: Option<oneshot::Sender<()>>,
    opened: JoinHandle<bool>,
}

impl LongPressGesture {
    /// Touch start at `at` on the row `identifier`
    pub async fn begin(session: Arc<Mutex<ViewSession>>, at: Position, identifier: Option<&str>) -> Result<Self> {
        let threshold = {
            let mut view = session.lock().await;
            view.scope.touch_start(at, identifier, touch_clock())?;
            view.scope.menu()?.long_press_threshold()
        };

        let (cancel, fired) = LongPressTimer::start(threshold);
        let view = session.clone();
        let opened = tokio::spawn(async move {
            if !matches!(fired.await, Ok(true)) {
                return false;
            }
            let mut view = view.lock().await;
            match view.scope.poll_long_press(touch_clock()) {
                Ok(opened) => opened,
                Err(e) => {
                    warn!(error = %e, "long press could not open the context menu");
                    false
                }
            }
        });

        Ok(Self {
            session,
            cancel: Some(cancel),
            opened,
        })
    }

    pub async fn touch_move(&mut self, to: Position) -> Result<()> {
        let pending = self.session.lock().await.scope.touch_move(to, touch_clock())?;
        if !pending {
            self.stop_timer();
        }
        Ok(())
    }

    /// Finger lifted. Returns whether the hold opened the menu.
    pub async fn touch_end(mut self) -> Result<bool> {
        self.session.lock().await.scope.touch_end()?;
        self.stop_timer();
        Ok(self.opened.await.unwrap_or(false))
    }

    /// Keep holding until the gesture resolves. Returns whether the menu opened.
    pub async fn hold(self) -> bool {
        let Self { cancel, opened, .. } = self;
        let outcome = opened.await.unwrap_or(false);
        drop(cancel);
        outcome
    }

    fn stop_timer(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheKey, TagRecord, STATUS_PENDING};
    use crate::context_menu::Position;
    use crate::scope::{MountedRow, SelectionCapabilities};
    use crate::testing::MockApi;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn session_with_rows(ids: &[&str]) -> (ViewSession, Vec<MountedRow>) {
        let mut session = ViewSession::new(InteractionConfig::default(), Vec::new());
        let rows = ids
            .iter()
            .map(|id| MountedRow::mount(&mut session.scope, id).unwrap())
            .collect();
        (session, rows)
    }

    #[tokio::test]
    async fn test_second_trigger_while_pending_is_noop() {
        let (mut session, rows) = session_with_rows(&["/inbox/a"]);
        rows[0].on_click(&mut session.scope).unwrap();
        let session = Mutex::new(session);
        let cache = Mutex::new(QueryCache::new());
        let api = MockApi::slow(Duration::from_millis(50));
        let deps = ActionDeps::new(&api);

        let (first, second) = tokio::join!(
            trigger_action(&session, &cache, ActionKind::Import, &deps),
            async {
                // Let the first trigger reach its network call
                tokio::time::sleep(Duration::from_millis(10)).await;
                trigger_action(&session, &cache, ActionKind::Import, &deps).await
            }
        );
        assert!(matches!(first.unwrap(), Trigger::Started(_)));
        assert_eq!(second.unwrap(), Trigger::Ignored);
        assert_eq!(api.mutation_calls(), 1);
        assert_eq!(
            session.lock().await.action(ActionKind::Import).unwrap().state(),
            &ActionState::Success
        );
    }

    #[tokio::test]
    async fn test_right_click_import_then_menu_closes_and_row_deselects() {
        let (mut session, rows) = session_with_rows(&["/inbox/a", "/inbox/b"]);
        rows[1]
            .on_right_click(&mut session.scope, Position::new(10.0, 10.0))
            .unwrap();
        let session = Mutex::new(session);
        let mut seeded = QueryCache::new();
        seeded.insert_tag(TagRecord::new("t2", "/inbox/b", "tagged"));
        let cache = Mutex::new(seeded);
        let api = MockApi::default();

        trigger_action(&session, &cache, ActionKind::Retag, &ActionDeps::new(&api))
            .await
            .unwrap();

        let requests = api.add_requests.lock().unwrap().clone();
        assert_eq!(requests[0].folders, vec!["/inbox/b"]);
        assert_eq!(cache.lock().await.tag("t2").unwrap().status, STATUS_PENDING);

        let session = session.lock().await;
        assert!(!session.scope.menu().unwrap().is_open());
        assert!(!session.scope.is_selected("/inbox/b").unwrap());
    }

    #[tokio::test]
    async fn test_failure_opens_dialog_that_blocks_other_actions() {
        let (mut session, rows) = session_with_rows(&["/inbox/a"]);
        rows[0].on_click(&mut session.scope).unwrap();
        let session = Mutex::new(session);
        let cache = Mutex::new(QueryCache::new());
        let api = MockApi::default();
        api.fail.store(true, Ordering::SeqCst);
        let deps = ActionDeps::new(&api);

        trigger_action(&session, &cache, ActionKind::Delete, &deps).await.unwrap();
        let dialog = session.lock().await.error_dialog().unwrap();
        assert_eq!(dialog.action, ActionKind::Delete);
        assert!(dialog.message.contains("500"));

        assert_eq!(
            trigger_action(&session, &cache, ActionKind::Import, &deps).await.unwrap(),
            Trigger::Ignored
        );

        session.lock().await.dismiss_error();
        api.fail.store(false, Ordering::SeqCst);
        assert!(matches!(
            trigger_action(&session, &cache, ActionKind::Delete, &deps).await.unwrap(),
            Trigger::Started(_)
        ));
        assert!(session.lock().await.error_dialog().is_none());
    }

    #[tokio::test]
    async fn test_successful_delete_refetches_invalidated_listings() {
        let (mut session, rows) = session_with_rows(&["/inbox/a"]);
        rows[0].on_click(&mut session.scope).unwrap();
        let session = Mutex::new(session);
        let mut seeded = QueryCache::new();
        seeded.set_listing(CacheKey::Inbox, serde_json::json!({"children": ["a"]}));
        seeded.set_listing(CacheKey::TagGroups, serde_json::json!([{"id": "old"}]));
        let cache = Mutex::new(seeded);
        let api = MockApi::default();

        trigger_action(&session, &cache, ActionKind::Delete, &ActionDeps::new(&api))
            .await
            .unwrap();

        assert_eq!(api.delete_requests.lock().unwrap().len(), 1);
        assert_eq!(api.fetches.load(Ordering::SeqCst), 2);
        let cache = cache.lock().await;
        assert!(!cache.has_stale());
        assert!(!cache.is_stale(&CacheKey::Inbox));
        assert_eq!(cache.listing(&CacheKey::TagGroups).unwrap().value, serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_failed_delete_does_not_refetch() {
        let (mut session, rows) = session_with_rows(&["/inbox/a"]);
        rows[0].on_click(&mut session.scope).unwrap();
        let session = Mutex::new(session);
        let cache = Mutex::new(QueryCache::new());
        let api = MockApi::default();
        api.fail.store(true, Ordering::SeqCst);

        trigger_action(&session, &cache, ActionKind::Delete, &ActionDeps::new(&api))
            .await
            .unwrap();
        assert_eq!(api.fetches.load(Ordering::SeqCst), 0);
    }

    fn touch_session(ids: &[&str]) -> (Arc<Mutex<ViewSession>>, Vec<MountedRow>) {
        let (session, rows) = session_with_rows(ids);
        (Arc::new(Mutex::new(session)), rows)
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_press_gesture_opens_menu_after_hold() {
        let (session, _rows) = touch_session(&["/inbox/a"]);
        let gesture = LongPressGesture::begin(session.clone(), Position::new(40.0, 60.0), Some("/inbox/a"))
            .await
            .unwrap();

        assert!(gesture.hold().await);
        let view = session.lock().await;
        assert_eq!(view.scope.menu().unwrap().anchor(), Some(Position::new(40.0, 60.0)));
        assert!(view.scope.is_selected("/inbox/a").unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_press_gesture_cancelled_by_movement() {
        let (session, _rows) = touch_session(&["/inbox/a"]);
        let mut gesture = LongPressGesture::begin(session.clone(), Position::new(0.0, 0.0), Some("/inbox/a"))
            .await
            .unwrap();

        gesture.touch_move(Position::new(4.0, 3.0)).await.unwrap();
        gesture.touch_move(Position::new(30.0, 0.0)).await.unwrap();
        assert!(!gesture.hold().await);

        let view = session.lock().await;
        assert!(!view.scope.menu().unwrap().is_open());
        assert!(!view.scope.is_selected("/inbox/a").unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_press_gesture_release_before_threshold() {
        let (session, _rows) = touch_session(&["/inbox/a"]);
        let gesture = LongPressGesture::begin(session.clone(), Position::new(0.0, 0.0), Some("/inbox/a"))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(!gesture.touch_end().await.unwrap());
        assert!(!session.lock().await.scope.menu().unwrap().is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_press_gesture_release_after_menu_opened() {
        let (session, _rows) = touch_session(&["/inbox/a"]);
        let mut gesture = LongPressGesture::begin(session.clone(), Position::new(0.0, 0.0), Some("/inbox/a"))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(600)).await;
        // Drift after the menu opened changes nothing
        gesture.touch_move(Position::new(25.0, 0.0)).await.unwrap();
        assert!(gesture.touch_end().await.unwrap());
        assert!(session.lock().await.scope.menu().unwrap().is_open());
    }

    #[test]
    fn test_menu_items_hide_undo_without_imported_selection() {
        let (mut session, rows) = session_with_rows(&["t1"]);
        rows[0].on_click(&mut session.scope).unwrap();
        let mut cache = QueryCache::new();
        cache.insert_tag(TagRecord::new("t1", "/inbox/a", "tagged"));

        let kinds: Vec<ActionKind> = session.menu_items(&cache).unwrap().into_iter().map(|(k, _)| k).collect();
        assert!(!kinds.contains(&ActionKind::UndoImport));
        assert_eq!(kinds.len(), 5);

        cache.insert_tag(TagRecord::new("t1", "/inbox/a", "imported"));
        let items = session.menu_items(&cache).unwrap();
        let (_, undo) = items.iter().find(|(k, _)| *k == ActionKind::UndoImport).unwrap();
        assert_eq!(undo.label, "Undo Import (1 tag)");
    }

    #[test]
    fn test_session_without_selection_provider_fails_loudly() {
        let session = ViewSession::with_scope(ViewScope::new(), Vec::new());
        assert!(matches!(
            session.menu_items(&QueryCache::new()),
            Err(Error::MissingContext(_))
        ));
    }
}
