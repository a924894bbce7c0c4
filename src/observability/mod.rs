//! Observability
//!
//! Violation audit trail and guard metrics.

pub mod audit;
pub mod metrics;
