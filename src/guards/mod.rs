//! Purity guards
//!
//! Each guard turns a [`Function`] into a wrapped `Function` accepting the same
//! arguments. Guards compose by nesting: `f.guard(&a).guard(&b)` runs `b`'s
//! checks around `a`'s.
//!
//! - [`mutation`]: argument mutation ([`immutable_arguments`], [`enforce_immutable`])
//! - [`determinism`]: replay comparison ([`enforce_deterministic`])
//! - [`namespace`]: module binding access ([`forbid_global_names`], [`forbid_globals`])
//! - [`side_effects`]: process-affecting operations ([`forbid_side_effects`])

pub mod determinism;
pub mod mutation;
pub mod namespace;
pub mod side_effects;
pub mod wrapper;

use crate::config::types::GuardKind;
use crate::runtime::effects::OperationTable;
use crate::runtime::Function;
use std::collections::BTreeSet;

pub use determinism::EnforceDeterministic;
pub use mutation::{EnforceImmutable, ImmutableArguments};
pub use namespace::{ForbidGlobalNames, NameScope};
pub use side_effects::ForbidSideEffects;
pub use wrapper::settle;

/// A function-to-function transform that checks one purity property per call
pub trait Guard {
    fn kind(&self) -> GuardKind;

    /// Wrap `function`. The original stays usable and unguarded.
    fn apply(&self, function: &Function) -> Function;
}

/// Fail (or warn) when the call mutates any argument in place
pub fn immutable_arguments(warn_only: bool) -> ImmutableArguments {
    ImmutableArguments::new(warn_only)
}

/// Call with deep copies so caller-owned containers are never touched
pub fn enforce_immutable() -> EnforceImmutable {
    EnforceImmutable
}

/// Invoke `runs` times and require every result to agree
pub fn enforce_deterministic(runs: usize) -> EnforceDeterministic {
    EnforceDeterministic::new(runs)
}

/// Fail on reads of the named module bindings, or of all of them for `None`
pub fn forbid_global_names(names: Option<BTreeSet<String>>) -> ForbidGlobalNames {
    ForbidGlobalNames::new(names)
}

/// Fail on any read, write or delete of a module binding
pub fn forbid_globals() -> ForbidGlobalNames {
    ForbidGlobalNames::lockdown()
}

/// Fail (or warn) on watched process-affecting operations
pub fn forbid_side_effects(operations: Option<OperationTable>, warn_only: bool) -> ForbidSideEffects {
    ForbidSideEffects::new(operations, warn_only)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::ViolationKind;
    use crate::runtime::{effects, Args, Namespace};
    use crate::value::Value;

    #[test]
    fn test_guard_kinds() {
        assert_eq!(immutable_arguments(false).kind(), GuardKind::ImmutableArguments);
        assert_eq!(enforce_immutable().kind(), GuardKind::EnforceImmutable);
        assert_eq!(enforce_deterministic(2).kind(), GuardKind::EnforceDeterministic);
        assert_eq!(forbid_global_names(None).kind(), GuardKind::ForbidGlobalNames);
        assert_eq!(forbid_globals().kind(), GuardKind::ForbidGlobals);
        assert_eq!(forbid_side_effects(None, false).kind(), GuardKind::ForbidSideEffects);
    }

    #[test]
    fn test_guards_compose() {
        let _exclusive = effects::exclusive();
        let ns = Namespace::new("m");
        ns.define("LIMIT", 3);
        let f = Function::new("clip", &ns, &["xs"], |frame| {
            let xs = frame.load("xs")?;
            xs.push(Value::from(0))?;
            effects::write_stderr("clipping\n")?;
            Ok(Value::None)
        });
        let guarded = f
            .guard(&forbid_side_effects(None, true))
            .guard(&immutable_arguments(false))
            .guard(&forbid_globals());
        let err = guarded.call(&Args::from(vec![Value::list([])])).unwrap_err();
        assert_eq!(err.violation_kind(), Some(ViolationKind::Mutation));
        assert_eq!(effects::active_layers(), 0);
        assert_eq!(ns.active_layers(), 0);
    }

    #[test]
    fn test_dynamic_dispatch() {
        let ns = Namespace::new("m");
        let f = Function::new("one", &ns, &[], |_| Ok(Value::from(1)));
        let guards: Vec<Box<dyn Guard>> = vec![
            Box::new(immutable_arguments(false)) as Box<dyn Guard>,
            Box::new(enforce_deterministic(2)) as Box<dyn Guard>,
            Box::new(forbid_globals()) as Box<dyn Guard>,
            Box::new(forbid_side_effects(None, false)) as Box<dyn Guard>,
        ];
        let guarded = guards.iter().fold(f, |g, guard| g.guard(guard.as_ref()));
        assert_eq!(guarded.call(&Args::new()).unwrap(), Value::from(1));
    }
}
