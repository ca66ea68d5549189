//! Per-view providers and the capability trait rows are written against
//!
//! A list view installs the providers it needs into a [`ViewScope`]; rows
//! receive it as `&mut impl SelectionCapabilities`. Asking for a provider
//! that was never installed is a wiring bug and fails loudly with
//! [`Error::MissingContext`].

use std::time::Instant;

use tagdeck_common::config::InteractionConfig;
use tagdeck_common::{Error, Result};
use tokio::sync::mpsc;
use tracing::debug;

use crate::context_menu::{CloseReason, ContextMenu, Position};
use crate::selection::Selection;
use crate::siblings::{RowCommand, SiblingGuard, SiblingHandle, SiblingRegistry};

/// What a row may do to its surrounding view
pub trait SelectionCapabilities {
    fn mark_selectable(&mut self, id: &str) -> Result<()>;

    fn toggle_selection(&mut self, id: &str) -> Result<()>;

    fn is_selected(&self, id: &str) -> Result<bool>;

    fn register_sibling(&self, id: &str, handle: SiblingHandle) -> Result<SiblingGuard>;

    fn open_context_menu(&mut self, at: Position, id: Option<&str>) -> Result<()>;

    fn close_context_menu(&mut self, reason: CloseReason) -> Result<()>;

    fn touch_start(&mut self, at: Position, id: Option<&str>, now: Instant) -> Result<()>;

    /// Returns whether a long press is still pending after the move
    fn touch_move(&mut self, to: Position, now: Instant) -> Result<bool>;

    fn touch_end(&mut self) -> Result<()>;

    /// Open the menu if the pending hold has lasted long enough
    fn poll_long_press(&mut self, now: Instant) -> Result<bool>;
}

#[derive(Default)]
pub struct ViewScope {
    selection: Option<Selection>,
    siblings: Option<SiblingRegistry>,
    menu: Option<ContextMenu>,
}

fn missing(provider: &str) -> Error {
    Error::MissingContext(format!(
        "{} used outside of a view that provides it; install it on the ViewScope first",
        provider
    ))
}

impl ViewScope {
    /// A scope with no providers installed
    pub fn new() -> Self {
        Self::default()
    }

    /// A scope with every provider installed
    pub fn full(config: InteractionConfig) -> Self {
        Self::new()
            .with_selection(Selection::new())
            .with_siblings(SiblingRegistry::new())
            .with_context_menu(ContextMenu::new(config))
    }

    pub fn with_selection(mut self, selection: Selection) -> Self {
        self.selection = Some(selection);
        self
    }

    pub fn with_siblings(mut self, siblings: SiblingRegistry) -> Self {
        self.siblings = Some(siblings);
        self
    }

    pub fn with_context_menu(mut self, menu: ContextMenu) -> Self {
        self.menu = Some(menu);
        self
    }

    pub fn selection(&self) -> Result<&Selection> {
        self.selection.as_ref().ok_or_else(|| missing("Selection"))
    }

    pub fn selection_mut(&mut self) -> Result<&mut Selection> {
        self.selection.as_mut().ok_or_else(|| missing("Selection"))
    }

    pub fn siblings(&self) -> Result<&SiblingRegistry> {
        self.siblings.as_ref().ok_or_else(|| missing("SiblingRegistry"))
    }

    pub fn menu(&self) -> Result<&ContextMenu> {
        self.menu.as_ref().ok_or_else(|| missing("ContextMenu"))
    }

    /// Both providers a menu interaction touches
    pub fn menu_and_selection(&mut self) -> Result<(&mut ContextMenu, &mut Selection)> {
        let menu = self.menu.as_mut().ok_or_else(|| missing("ContextMenu"))?;
        let selection = self.selection.as_mut().ok_or_else(|| missing("Selection"))?;
        Ok((menu, selection))
    }

    /// Tear the view down: forget registered rows and selection, close the menu
    pub fn reset(&mut self) {
        if let (Some(menu), Some(selection)) = (self.menu.as_mut(), self.selection.as_mut()) {
            menu.close(CloseReason::OutsideClick, selection);
        }
        if let Some(selection) = self.selection.as_mut() {
            selection.reset_view();
        }
        if let Some(siblings) = self.siblings.as_ref() {
            siblings.clear();
        }
        debug!("view scope reset");
    }
}

impl SelectionCapabilities for ViewScope {
    fn mark_selectable(&mut self, id: &str) -> Result<()> {
        self.selection_mut()?.mark_selectable(id);
        Ok(())
    }

    fn toggle_selection(&mut self, id: &str) -> Result<()> {
        self.selection_mut()?.toggle_selection(id);
        Ok(())
    }

    fn is_selected(&self, id: &str) -> Result<bool> {
        Ok(self.selection()?.is_selected(id))
    }

    fn register_sibling(&self, id: &str, handle: SiblingHandle) -> Result<SiblingGuard> {
        Ok(self.siblings()?.register_sibling(id, handle))
    }

    fn open_context_menu(&mut self, at: Position, id: Option<&str>) -> Result<()> {
        let (menu, selection) = self.menu_and_selection()?;
        menu.on_right_click(at, id, selection);
        Ok(())
    }

    fn close_context_menu(&mut self, reason: CloseReason) -> Result<()> {
        let (menu, selection) = self.menu_and_selection()?;
        menu.close(reason, selection);
        Ok(())
    }

    fn touch_start(&mut self, at: Position, id: Option<&str>, now: Instant) -> Result<()> {
        let menu = self.menu.as_mut().ok_or_else(|| missing("ContextMenu"))?;
        menu.on_touch_start(at, id, now);
        Ok(())
    }

    fn touch_move(&mut self, to: Position, now: Instant) -> Result<bool> {
        let menu = self.menu.as_mut().ok_or_else(|| missing("ContextMenu"))?;
        menu.on_touch_move(to, now);
        Ok(menu.long_press_pending())
    }

    fn touch_end(&mut self) -> Result<()> {
        let menu = self.menu.as_mut().ok_or_else(|| missing("ContextMenu"))?;
        menu.on_touch_end();
        Ok(())
    }

    fn poll_long_press(&mut self, now: Instant) -> Result<bool> {
        let (menu, selection) = self.menu_and_selection()?;
        Ok(menu.poll_long_press(now, selection))
    }
}

/// A row mounted into a view. Dropping it unregisters the row's handle.
pub struct MountedRow {
    pub id: String,
    pub commands: mpsc::UnboundedReceiver<RowCommand>,
    _guard: SiblingGuard,
    expanded: bool,
}

impl MountedRow {
    /// Mark the row selectable and register its expand handle
    pub fn mount(view: &mut impl SelectionCapabilities, id: &str) -> Result<Self> {
        view.mark_selectable(id)?;
        let (handle, commands) = SiblingHandle::channel(id);
        let guard = view.register_sibling(id, handle)?;
        Ok(Self {
            id: id.to_string(),
            commands,
            _guard: guard,
            expanded: false,
        })
    }

    /// Apply queued commands; returns the resulting expansion
    pub fn drain_commands(&mut self) -> bool {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                RowCommand::SetExpanded(expanded) => self.expanded = expanded,
            }
        }
        self.expanded
    }

    pub fn is_expanded(&self) -> bool {
        self.expanded
    }

    pub fn on_click(&self, view: &mut impl SelectionCapabilities) -> Result<()> {
        view.toggle_selection(&self.id)
    }

    pub fn on_right_click(&self, view: &mut impl SelectionCapabilities, at: Position) -> Result<()> {
        view.open_context_menu(at, Some(&self.id))
    }

    pub fn on_touch_start(&self, view: &mut impl SelectionCapabilities, at: Position, now: Instant) -> Result<()> {
        view.touch_start(at, Some(&self.id), now)
    }
}
