//! archetype-overlay: reversible archetype overlays for class feature
//! progressions.
//!
//! An archetype replaces, modifies or adds to the level-tagged features
//! ("slots") a class grants. This crate computes the difference an archetype
//! would make, detects archetypes that compete for the same slot, and applies
//! or reverts archetypes against a flag store with a one-time backup.

pub mod app;
pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod ports;
pub mod storage;
pub mod test_utils;

pub use error::{OverlayError, Result};
