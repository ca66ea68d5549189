//! # tagdeck selection & mutation layer (tagdeck-ui)
//!
//! Client-side state for the tagging GUI of a beets-backed music library.
//!
//! **Purpose:** Track which rows of a list view are selected, drive the
//! right-click / long-press context menu, run bulk mutations against the
//! backend and keep a local mirror of backend records current from
//! server-push updates.
//!
//! **Architecture:** Synchronous view state (`selection`, `siblings`,
//! `context_menu`, `actions`, `scope`) mutated between await points, a
//! versioned `cache`, and tokio tasks for the socket transport
//! (`connection`, `engineio`) feeding the `listener` through the event bus.

pub mod actions;
pub mod api;
pub mod cache;
pub mod connection;
pub mod context_menu;
pub mod engineio;
pub mod listener;
pub mod scope;
pub mod selection;
pub mod session;
pub mod siblings;
pub mod terminal;

#[cfg(test)]
mod testing;

pub use tagdeck_common::{Error, Result};
