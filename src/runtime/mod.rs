//! Host execution model for guarded code
//!
//! - [`namespace`]: module namespaces with interceptable name resolution
//! - [`function`]: callables, arguments and evaluation frames
//! - [`effects`]: process-affecting operations behind a process-wide interception stack

pub mod effects;
pub mod function;
pub mod namespace;

pub use effects::{Interception, Invocation, Operation, OperationHook, OperationTable};
pub use function::{Args, Frame, Function};
pub use namespace::{Access, AccessHook, InterceptionHandle, Namespace};
