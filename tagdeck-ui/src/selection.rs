//! Selectable registry and selection set
//!
//! Rows call [`Selection::mark_selectable`] whenever they mount or re-render;
//! clicks and menu actions then mutate the selection set. Both halves are
//! view-scoped: [`Selection::reset_view`] drops everything when the list is
//! torn down.

use std::collections::{HashMap, HashSet};

/// Opaque key naming a folder or tag in the current view (a path or a hash)
pub type Identifier = String;

/// Selection state for one list view
#[derive(Debug, Default, Clone)]
pub struct Selection {
    /// Identifier -> eligible for selection
    selectable: HashMap<Identifier, bool>,
    selected: HashSet<Identifier>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` as present in the view. Idempotent.
    pub fn mark_selectable(&mut self, id: &str) {
        if !self.selectable.contains_key(id) {
            self.selectable.insert(id.to_string(), true);
        }
    }

    pub fn is_selectable(&self, id: &str) -> bool {
        self.selectable.get(id).copied().unwrap_or(false)
    }

    /// Number of identifiers currently registered as selectable
    pub fn num_selectable(&self) -> usize {
        self.selectable.values().filter(|eligible| **eligible).count()
    }

    /// Flip membership of `id`
    pub fn toggle_selection(&mut self, id: &str) {
        if !self.selected.remove(id) {
            self.selected.insert(id.to_string());
        }
    }

    pub fn add_to_selection(&mut self, id: &str) {
        if !self.selected.contains(id) {
            self.selected.insert(id.to_string());
        }
    }

    pub fn remove_from_selection(&mut self, id: &str) {
        self.selected.remove(id);
    }

    /// Select every identifier registered at call time
    pub fn select_all(&mut self) {
        self.selected = self
            .selectable
            .iter()
            .filter(|(_, eligible)| **eligible)
            .map(|(id, _)| id.clone())
            .collect();
    }

    pub fn deselect_all(&mut self) {
        self.selected = HashSet::new();
    }

    /// Replace the selection with exactly `id`
    pub fn select_only(&mut self, id: &str) {
        self.selected = HashSet::from([id.to_string()]);
    }

    pub fn is_selected(&self, id: &str) -> bool {
        self.selected.contains(id)
    }

    pub fn num_selected(&self) -> usize {
        self.selected.len()
    }

    /// Snapshot of the selection for bulk operations.
    ///
    /// Sorted, so repeated calls without intervening mutations agree.
    pub fn get_selected(&self) -> Vec<Identifier> {
        let mut ids: Vec<Identifier> = self.selected.iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Drop registry and selection; called when the owning view is rebuilt
    pub fn reset_view(&mut self) {
        self.selectable.clear();
        self.selected.clear();
    }
}
