//! Context menu controller
//!
//! Two states, `Closed` and `Open { anchor }`. Opening the menu on a row that
//! is not selected temporarily selects it so bulk actions apply to it; the
//! previous membership is restored on close.

use std::time::{Duration, Instant};

use tagdeck_common::config::InteractionConfig;
use tokio::sync::oneshot;
use tracing::debug;

use crate::selection::{Identifier, Selection};

/// Pointer coordinates in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn distance_to(&self, other: &Position) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MenuState {
    Closed,
    Open { anchor: Position },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    ActionSelected,
    OutsideClick,
    Escape,
}

/// Prior membership of an identifier force-selected when the menu opened
#[derive(Debug, Clone, PartialEq, Eq)]
struct SelectionOverride {
    id: Identifier,
    was_selected: bool,
}

/// Touch hold detector fed with explicit timestamps
#[derive(Debug, Clone)]
pub struct LongPressTracker {
    threshold: Duration,
    tolerance_px: f64,
    pending: Option<PendingPress>,
}

#[derive(Debug, Clone)]
struct PendingPress {
    origin: Position,
    started: Instant,
    identifier: Option<Identifier>,
}

impl LongPressTracker {
    pub fn new(config: InteractionConfig) -> Self {
        Self {
            threshold: Duration::from_millis(config.long_press_ms),
            tolerance_px: f64::from(config.move_tolerance_px),
            pending: None,
        }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    pub fn start(&mut self, origin: Position, identifier: Option<&str>, at: Instant) {
        self.pending = Some(PendingPress {
            origin,
            started: at,
            identifier: identifier.map(str::to_string),
        });
    }

    /// Returns false if the move cancelled the pending press. Once the hold
    /// threshold has elapsed, drift no longer cancels.
    pub fn moved(&mut self, to: Position, now: Instant) -> bool {
        let Some(press) = &self.pending else {
            return false;
        };
        if now.saturating_duration_since(press.started) >= self.threshold {
            return true;
        }
        if press.origin.distance_to(&to) > self.tolerance_px {
            self.pending = None;
            false
        } else {
            true
        }
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// If the hold has lasted long enough, consume it and return where it began
    fn fire(&mut self, now: Instant) -> Option<PendingPress> {
        let ready = self
            .pending
            .as_ref()
            .is_some_and(|p| now.saturating_duration_since(p.started) >= self.threshold);
        if ready {
            self.pending.take()
        } else {
            None
        }
    }
}

/// Async long-press timer; resolves `true` when the threshold elapses and
/// `false` when cancelled first (the cancel sender fired or was dropped).
pub struct LongPressTimer;

impl LongPressTimer {
    pub fn start(threshold: Duration) -> (oneshot::Sender<()>, tokio::task::JoinHandle<bool>) {
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(threshold) => true,
                _ = cancel_rx => false,
            }
        });
        (cancel_tx, handle)
    }
}

/// Right-click / long-press menu for a list view
#[derive(Debug, Clone)]
pub struct ContextMenu {
    state: MenuState,
    pending_override: Option<SelectionOverride>,
    long_press: LongPressTracker,
}

impl ContextMenu {
    pub fn new(config: InteractionConfig) -> Self {
        Self {
            state: MenuState::Closed,
            pending_override: None,
            long_press: LongPressTracker::new(config),
        }
    }

    pub fn state(&self) -> MenuState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, MenuState::Open { .. })
    }

    pub fn anchor(&self) -> Option<Position> {
        match self.state {
            MenuState::Open { anchor } => Some(anchor),
            MenuState::Closed => None,
        }
    }

    pub fn has_override(&self) -> bool {
        self.pending_override.is_some()
    }

    /// Desktop right-click at pointer coordinates
    pub fn on_right_click(&mut self, at: Position, identifier: Option<&str>, selection: &mut Selection) {
        self.open(at, identifier, selection);
    }

    pub fn on_touch_start(&mut self, at: Position, identifier: Option<&str>, now: Instant) {
        self.long_press.start(at, identifier, now);
    }

    pub fn on_touch_move(&mut self, to: Position, now: Instant) {
        if self.long_press.is_pending() && !self.long_press.moved(to, now) {
            debug!("long press cancelled by movement");
        }
    }

    pub fn on_touch_end(&mut self) {
        self.long_press.cancel();
    }

    /// Drive the long-press timer. Opens the menu at the initial touch point
    /// once the hold threshold has elapsed; returns whether it opened.
    pub fn poll_long_press(&mut self, now: Instant, selection: &mut Selection) -> bool {
        match self.long_press.fire(now) {
            Some(press) => {
                self.open(press.origin, press.identifier.as_deref(), selection);
                true
            }
            None => false,
        }
    }

    pub fn long_press_threshold(&self) -> Duration {
        self.long_press.threshold()
    }

    pub fn long_press_pending(&self) -> bool {
        self.long_press.is_pending()
    }

    /// Closed -> Open. Opening again while open is an outside click on the
    /// current menu followed by a fresh open.
    pub fn open(&mut self, anchor: Position, identifier: Option<&str>, selection: &mut Selection) {
        if self.is_open() {
            self.close(CloseReason::OutsideClick, selection);
        }

        if let Some(id) = identifier {
            if !selection.is_selected(id) {
                self.pending_override = Some(SelectionOverride {
                    id: id.to_string(),
                    was_selected: false,
                });
                selection.add_to_selection(id);
            }
        }
        debug!(x = anchor.x, y = anchor.y, override_active = self.pending_override.is_some(), "context menu opened");
        self.state = MenuState::Open { anchor };
    }

    /// Open -> Closed, restoring any temporary selection. No-op when closed.
    pub fn close(&mut self, reason: CloseReason, selection: &mut Selection) {
        if !self.is_open() {
            return;
        }
        self.state = MenuState::Closed;
        if let Some(restore) = self.pending_override.take() {
            if restore.was_selected {
                selection.add_to_selection(&restore.id);
            } else {
                selection.remove_from_selection(&restore.id);
            }
        }
        debug!(?reason, "context menu closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn menu() -> ContextMenu {
        ContextMenu::new(InteractionConfig::default())
    }

    fn view(ids: &[&str]) -> Selection {
        let mut selection = Selection::new();
        for id in ids {
            selection.mark_selectable(id);
        }
        selection
    }

    #[test]
    fn test_right_click_unselected_row_restores_on_close() {
        let mut selection = view(&["a", "b", "c"]);
        selection.add_to_selection("b");
        let mut menu = menu();

        menu.on_right_click(Position::new(10.0, 20.0), Some("a"), &mut selection);
        assert!(menu.is_open());
        assert!(menu.has_override());
        assert_eq!(selection.get_selected(), vec!["a", "b"]);

        menu.close(CloseReason::OutsideClick, &mut selection);
        assert!(!menu.is_open());
        assert!(!menu.has_override());
        assert!(!selection.is_selected("a"));
        assert_eq!(selection.num_selected(), 1);
    }

    #[test]
    fn test_right_click_selected_row_keeps_multi_selection() {
        let mut selection = view(&["a", "b", "c", "d"]);
        for id in ["a", "b", "c"] {
            selection.add_to_selection(id);
        }
        let mut menu = menu();

        menu.on_right_click(Position::new(1.0, 1.0), Some("b"), &mut selection);
        assert!(!menu.has_override());

        menu.close(CloseReason::Escape, &mut selection);
        assert_eq!(selection.get_selected(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_override_consumed_exactly_once() {
        let mut selection = view(&["a"]);
        let mut menu = menu();
        menu.on_right_click(Position::new(0.0, 0.0), Some("a"), &mut selection);
        menu.close(CloseReason::ActionSelected, &mut selection);

        // User selects the row afterwards; a stray second close must not undo it.
        selection.add_to_selection("a");
        menu.close(CloseReason::Escape, &mut selection);
        assert!(selection.is_selected("a"));
    }

    #[test]
    fn test_right_click_other_row_while_open_moves_override() {
        let mut selection = view(&["a", "b"]);
        let mut menu = menu();

        menu.on_right_click(Position::new(0.0, 0.0), Some("a"), &mut selection);
        menu.on_right_click(Position::new(0.0, 40.0), Some("b"), &mut selection);
        assert_eq!(menu.anchor(), Some(Position::new(0.0, 40.0)));
        assert_eq!(selection.get_selected(), vec!["b"]);

        menu.close(CloseReason::Escape, &mut selection);
        assert_eq!(selection.num_selected(), 0);
    }

    #[test]
    fn test_right_click_selected_row_while_open_drops_first_override() {
        let mut selection = view(&["a", "b"]);
        selection.add_to_selection("b");
        let mut menu = menu();

        menu.on_right_click(Position::new(0.0, 0.0), Some("a"), &mut selection);
        assert_eq!(selection.get_selected(), vec!["a", "b"]);
        menu.on_right_click(Position::new(0.0, 40.0), Some("b"), &mut selection);
        assert_eq!(selection.get_selected(), vec!["b"]);
        assert!(!menu.has_override());

        menu.close(CloseReason::OutsideClick, &mut selection);
        assert_eq!(selection.get_selected(), vec!["b"]);
    }

    #[test]
    fn test_menu_without_identifier_touches_nothing() {
        let mut selection = view(&["a"]);
        let mut menu = menu();
        menu.on_right_click(Position::new(5.0, 5.0), None, &mut selection);
        assert_eq!(menu.anchor(), Some(Position::new(5.0, 5.0)));
        menu.close(CloseReason::OutsideClick, &mut selection);
        assert_eq!(selection.num_selected(), 0);
    }

    #[test]
    fn test_long_press_stationary_hold_opens_at_touch_origin() {
        let mut selection = view(&["a"]);
        let mut menu = menu();
        let t0 = Instant::now();

        menu.on_touch_start(Position::new(100.0, 200.0), Some("a"), t0);
        menu.on_touch_move(Position::new(103.0, 204.0), t0 + Duration::from_millis(100)); // 5px, within tolerance
        assert!(!menu.poll_long_press(t0 + Duration::from_millis(499), &mut selection));
        assert!(menu.poll_long_press(t0 + Duration::from_millis(500), &mut selection));

        assert_eq!(menu.anchor(), Some(Position::new(100.0, 200.0)));
        assert!(selection.is_selected("a"));
    }

    #[test]
    fn test_long_press_cancelled_by_movement() {
        let mut selection = view(&["a"]);
        let mut menu = menu();
        let t0 = Instant::now();

        menu.on_touch_start(Position::new(0.0, 0.0), Some("a"), t0);
        menu.on_touch_move(Position::new(11.0, 0.0), t0 + Duration::from_millis(200));

        assert!(!menu.poll_long_press(t0 + Duration::from_millis(800), &mut selection));
        assert!(!menu.is_open());
        assert_eq!(selection.num_selected(), 0);
    }

    #[test]
    fn test_drift_after_threshold_does_not_cancel() {
        let mut selection = view(&["a"]);
        let mut menu = menu();
        let t0 = Instant::now();

        menu.on_touch_start(Position::new(0.0, 0.0), Some("a"), t0);
        // 20px drift once the hold is already long enough
        menu.on_touch_move(Position::new(20.0, 0.0), t0 + Duration::from_millis(600));
        assert!(menu.long_press_pending());

        assert!(menu.poll_long_press(t0 + Duration::from_millis(600), &mut selection));
        assert_eq!(menu.anchor(), Some(Position::new(0.0, 0.0)));
        assert!(selection.is_selected("a"));
    }

    #[test]
    fn test_long_press_cancelled_by_release() {
        let mut selection = view(&["a"]);
        let mut menu = menu();
        let t0 = Instant::now();

        menu.on_touch_start(Position::new(0.0, 0.0), Some("a"), t0);
        menu.on_touch_end();

        assert!(!menu.poll_long_press(t0 + Duration::from_millis(600), &mut selection));
        assert!(!menu.is_open());
    }

    #[tokio::test]
    async fn test_long_press_timer_fires_and_cancels() {
        let (_keep, fired) = LongPressTimer::start(Duration::from_millis(20));
        assert!(fired.await.unwrap());

        let (cancel, cancelled) = LongPressTimer::start(Duration::from_secs(5));
        cancel.send(()).unwrap();
        assert!(!cancelled.await.unwrap());
    }
}
