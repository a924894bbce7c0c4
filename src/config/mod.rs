//! Configuration and shared types
//!
//! Violation records, error type, and guard settings.

pub mod settings;
pub mod types;
