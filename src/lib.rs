//! pureguard: runtime purity guards for callables
//!
//! A guard wraps a [`Function`] and checks one purity property on every call.
//! Violations surface as [`PurityError`] values, or as log warnings in
//! warn-only mode.
//!
//! # Architecture
//!
//! ## Guards ([`guards`])
//! - [`guards::mutation`]: snapshot/compare of arguments, copy-in calls
//! - [`guards::determinism`]: repeated invocation with result comparison
//! - [`guards::namespace`]: interception of module binding access
//! - [`guards::side_effects`]: interception of process-affecting operations
//! - [`guards::wrapper`]: shared settlement of outcome and violations
//!
//! ## Host Model ([`runtime`], [`value`])
//! - [`value`]: shared mutable values, deep copy, deep equality, path diffs
//! - [`runtime::namespace`]: module bindings with interception layers
//! - [`runtime::function`]: callables, argument binding, frames
//! - [`runtime::effects`]: the operation table and its dispatch entry points
//!
//! ## Observability ([`observability`])
//! - [`observability::audit`]: JSON-lines violation events
//! - [`observability::metrics`]: Prometheus metrics export
//!
//! ## Configuration ([`config`])
//! - [`config::settings`]: file and environment configuration
//! - [`config::types`]: violation kinds, enforcement modes, errors
//!
//! # Example
//!
//! ```
//! use pureguard::{immutable_arguments, Args, Function, Namespace, Value};
//!
//! let module = Namespace::new("example");
//! let append = Function::new("append", &module, &["xs"], |frame| {
//!     frame.load("xs")?.push(Value::from(1))?;
//!     Ok(Value::None)
//! });
//!
//! let guarded = append.guard(&immutable_arguments(false));
//! let xs = Value::list([]);
//! assert!(guarded.call(&Args::from(vec![xs.clone()])).is_err());
//! ```

// Guards
pub mod guards;

// Host model
pub mod runtime;
pub mod value;

// Observability
pub mod observability;

// Configuration
pub mod config;

// CLI entrypoint for the pureguard binary
pub mod cli;

pub use config::settings::PurityConfig;
pub use config::types::{Enforcement, GuardKind, PurityError, Result, Violation, ViolationKind};
pub use guards::{
    enforce_deterministic, enforce_immutable, forbid_global_names, forbid_globals,
    forbid_side_effects, immutable_arguments, EnforceDeterministic, EnforceImmutable,
    ForbidGlobalNames, ForbidSideEffects, Guard, ImmutableArguments, NameScope,
};
pub use runtime::{
    effects, Access, AccessHook, Args, Frame, Function, Interception, Invocation, Namespace,
    Operation, OperationHook, OperationTable,
};
pub use value::{Key, Value};
