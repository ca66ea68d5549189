//! # tagdeck Common Library
//!
//! Shared code for tagdeck crates including:
//! - Error type
//! - Configuration loading
//! - Push-update and terminal payload types
//! - The in-process EventBus

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
