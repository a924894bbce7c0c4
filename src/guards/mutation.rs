/// Mutation guards
///
/// [`ImmutableArguments`] snapshots every argument before the call and reports
/// the first structural difference per argument afterwards. [`EnforceImmutable`]
/// never lets the callable see the caller's containers at all.
use super::wrapper::{settle, CallScope};
use super::Guard;
use crate::config::settings::PurityConfig;
use crate::config::types::{Enforcement, GuardKind, Violation, ViolationKind};
use crate::observability::metrics::get_metrics;
use crate::runtime::{Args, Function};
use crate::value::snapshot::{find_shared, reachable_identities};
use crate::value::{first_diff, Snapshotter, Value};
use log::debug;
use std::collections::HashSet;

/// Detects in-place modification of arguments
#[derive(Clone, Debug)]
pub struct ImmutableArguments {
    enforcement: Enforcement,
    check_return: bool,
    enabled: bool,
}

impl ImmutableArguments {
    pub fn new(warn_only: bool) -> Self {
        Self {
            enforcement: Enforcement::from_warn_only(warn_only),
            check_return: false,
            enabled: true,
        }
    }

    pub fn from_config(config: &PurityConfig) -> Self {
        Self {
            enforcement: config.enforcement(),
            ..Self::default()
        }
        .enabled(config.enabled)
    }

    /// Also report a return value that shares a container with an argument
    pub fn check_return(mut self, check: bool) -> Self {
        self.check_return = check;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    fn verify(&self, function: &str, snapshot: &Args, live: &Args, result: Option<&Value>) -> Vec<Violation> {
        let mut violations: Vec<Violation> = snapshot
            .labeled()
            .into_iter()
            .zip(live.labeled())
            .filter_map(|((label, before), (_, after))| {
                first_diff(before, after, &label).map(|diff| {
                    Violation::new(
                        ViolationKind::Mutation,
                        function,
                        label,
                        format!("Argument mutated at {}: {}", diff.location(), diff.message),
                    )
                })
            })
            .collect();

        if let (true, Some(result)) = (self.check_return, result) {
            let mut ids = HashSet::new();
            for value in live.values() {
                reachable_identities(value, &mut ids);
            }
            if let Some(path) = find_shared(result, &ids, "return") {
                violations.push(Violation::new(
                    ViolationKind::Mutation,
                    function,
                    "return",
                    format!("Return value aliases an argument at {}", path),
                ));
            }
        }
        violations
    }
}

impl Default for ImmutableArguments {
    fn default() -> Self {
        Self::new(false)
    }
}

impl Guard for ImmutableArguments {
    fn kind(&self) -> GuardKind {
        GuardKind::ImmutableArguments
    }

    fn apply(&self, function: &Function) -> Function {
        if !self.enabled {
            return function.clone();
        }
        let guard = self.clone();
        let inner = function.clone();
        Function::wrap(function, move |args| {
            let _scope = CallScope::enter(GuardKind::ImmutableArguments);

            let mut snapshotter = Snapshotter::new();
            let snapshot = args.deep_copy_with(&mut snapshotter);
            let opaque = snapshotter.opaque_count();
            if opaque > 0 {
                get_metrics().opaque_identity_checks.add(opaque as u64);
                debug!(
                    "{} opaque value(s) passed to {} compared by identity only",
                    opaque,
                    inner.name()
                );
            }

            let outcome = inner.call(args);
            let violations = guard.verify(inner.name(), &snapshot, args, outcome.as_ref().ok());
            settle(GuardKind::ImmutableArguments, guard.enforcement, outcome, violations)
        })
    }
}

/// Calls the wrapped function with deep copies of its arguments
#[derive(Clone, Copy, Debug, Default)]
pub struct EnforceImmutable;

impl Guard for EnforceImmutable {
    fn kind(&self) -> GuardKind {
        GuardKind::EnforceImmutable
    }

    fn apply(&self, function: &Function) -> Function {
        let inner = function.clone();
        Function::wrap(function, move |args| {
            let _scope = CallScope::enter(GuardKind::EnforceImmutable);
            inner.call(&args.deep_copy())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::PurityError;
    use crate::runtime::Namespace;

    fn append_one(ns: &Namespace) -> Function {
        Function::new("append_one", ns, &["lst"], |frame| {
            frame.load("lst")?.push(Value::from(1))?;
            Ok(Value::None)
        })
    }

    #[test]
    fn test_mutation_raises_with_path() {
        let ns = Namespace::new("m");
        let guarded = append_one(&ns).guard(&ImmutableArguments::new(false));
        let err = guarded.call_with([Value::list([])]).unwrap_err();
        let violation = err.violation().unwrap();
        assert_eq!(violation.kind, ViolationKind::Mutation);
        assert_eq!(violation.subject, "arg[0]");
        assert_eq!(violation.description, "Argument mutated at arg[0]/<len>: 0 -> 1");
    }

    #[test]
    fn test_warn_only_returns_result() {
        let ns = Namespace::new("m");
        let guarded = append_one(&ns).guard(&ImmutableArguments::new(true));
        let lst = Value::list([]);
        assert!(guarded.call_with([lst.clone()]).unwrap().is_none());
        assert_eq!(lst.len().unwrap(), 1);
    }

    #[test]
    fn test_keyword_argument_mutation() {
        let ns = Namespace::new("m");
        let f = Function::new("tweak", &ns, &["opts"], |frame| {
            frame.load("opts")?.insert("depth", Value::from(2))?;
            Ok(Value::None)
        });
        let guarded = f.guard(&ImmutableArguments::default());
        let args = Args::new().with_kwarg("opts", Value::map([("depth", Value::from(1))]));
        let err = guarded.call(&args).unwrap_err();
        assert_eq!(
            err.violation().unwrap().description,
            "Argument mutated at kwarg['opts']/['depth']: value 1 -> 2"
        );
    }

    #[test]
    fn test_original_error_is_annotated() {
        let ns = Namespace::new("m");
        let f = Function::new("fail_after_append", &ns, &["lst"], |frame| {
            frame.load("lst")?.push(Value::from(1))?;
            Err(PurityError::raised("ValueError", "late failure"))
        });
        let err = f
            .guard(&ImmutableArguments::new(false))
            .call_with([Value::list([])])
            .unwrap_err();
        assert!(matches!(err, PurityError::Annotated { .. }));
        assert_eq!(err.label(), "ValueError");
        assert_eq!(err.violation_kind(), Some(ViolationKind::Mutation));

        let err = f
            .guard(&ImmutableArguments::new(true))
            .call_with([Value::list([])])
            .unwrap_err();
        assert_eq!(err.to_string(), "ValueError: late failure");
    }

    #[test]
    fn test_pure_function_unaffected() {
        let ns = Namespace::new("m");
        let f = Function::new("total", &ns, &["xs"], |frame| {
            let mut sum = Value::from(0);
            for item in frame.load("xs")?.items()? {
                sum = sum.add(&item)?;
            }
            Ok(sum)
        });
        let guarded = f.guard(&ImmutableArguments::new(false));
        let xs = Value::list([Value::from(1), Value::from(2)]);
        assert_eq!(guarded.call_with([xs.clone()]).unwrap(), Value::from(3));
        assert_eq!(guarded.call_with([xs]).unwrap(), Value::from(3));
    }

    #[test]
    fn test_check_return_aliasing() {
        let ns = Namespace::new("m");
        let identity = Function::new("identity", &ns, &["x"], |frame| frame.load("x"));
        let plain = identity.guard(&ImmutableArguments::new(false));
        assert!(plain.call_with([Value::list([])]).is_ok());

        let strict = identity.guard(&ImmutableArguments::new(false).check_return(true));
        let err = strict.call_with([Value::list([])]).unwrap_err();
        assert_eq!(err.violation().unwrap().subject, "return");
        assert!(strict.call_with([Value::from(5)]).is_ok());
    }

    #[test]
    fn test_opaque_arguments_compared_by_identity() {
        let ns = Namespace::new("m");
        let f = Function::new("touch", &ns, &["handle"], |_| Ok(Value::None));
        let guarded = f.guard(&ImmutableArguments::new(false));
        assert!(guarded.call_with([Value::opaque("File", 3_u8)]).is_ok());
    }

    #[test]
    fn test_disabled_returns_original() {
        let ns = Namespace::new("m");
        let f = append_one(&ns);
        let guarded = f.guard(&ImmutableArguments::new(false).enabled(false));
        assert!(guarded.same_as(&f));
    }

    #[test]
    fn test_enforce_immutable_protects_caller() {
        let ns = Namespace::new("m");
        let guarded = append_one(&ns).guard(&EnforceImmutable);
        let lst = Value::list([]);
        assert!(guarded.call_with([lst.clone()]).unwrap().is_none());
        assert_eq!(lst.len().unwrap(), 0);
    }
}
