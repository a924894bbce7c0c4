//! Value model, deep snapshots and structural comparison
//!
//! The substrate used by the mutation and determinism guards.

pub mod diff;
pub mod model;
pub mod snapshot;

pub use diff::{deep_equal, first_diff, Difference};
pub use model::{Key, Opaque, Record, Shared, Value};
pub use snapshot::{deep_copy, Snapshotter};
