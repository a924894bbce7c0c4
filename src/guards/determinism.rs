/// Determinism guard
///
/// Replays the wrapped call `runs` times, each against a fresh deep copy of the
/// arguments, and requires every run to agree with the first. Optionally keeps
/// a bounded history across calls so that equal arguments seen again must
/// produce an equal result.
use super::wrapper::{settle, CallScope};
use super::Guard;
use crate::config::settings::PurityConfig;
use crate::config::types::{Enforcement, GuardKind, Result, Violation, ViolationKind};
use crate::observability::metrics::get_metrics;
use crate::runtime::{Args, Function};
use crate::value::{deep_copy, first_diff, Value};
use log::{debug, warn};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// What one invocation produced, detached from the live values
#[derive(Clone, Debug)]
enum Observed {
    Returned(Value),
    Raised { label: String, message: String },
}

impl Observed {
    fn of(outcome: &Result<Value>) -> Self {
        match outcome {
            Ok(value) => Observed::Returned(deep_copy(value)),
            Err(e) => Observed::Raised {
                label: e.label(),
                message: e.to_string(),
            },
        }
    }

    /// First disagreement between two observations
    fn disagreement(&self, other: &Observed) -> Option<String> {
        match (self, other) {
            (Observed::Returned(a), Observed::Returned(b)) => {
                first_diff(a, b, "result").map(|d| format!("{}: {}", d.location(), d.message))
            }
            (Observed::Raised { label: la, message: ma }, Observed::Raised { label: lb, message: mb }) => {
                if la == lb && ma == mb {
                    None
                } else {
                    Some(format!("raised {} -> raised {}", ma, mb))
                }
            }
            (Observed::Returned(a), Observed::Raised { message, .. }) => {
                Some(format!("returned {} -> raised {}", a, message))
            }
            (Observed::Raised { message, .. }, Observed::Returned(b)) => {
                Some(format!("raised {} -> returned {}", message, b))
            }
        }
    }
}

type History = Rc<RefCell<VecDeque<(Args, Observed)>>>;

/// Requires repeated invocations to agree
#[derive(Clone, Debug)]
pub struct EnforceDeterministic {
    runs: usize,
    remember: usize,
    enforcement: Enforcement,
    enabled: bool,
}

impl EnforceDeterministic {
    /// `runs` below 1 is raised to 1
    pub fn new(runs: usize) -> Self {
        let runs = if runs < 1 {
            warn!("enforce_deterministic: runs must be at least 1, got {}; using 1", runs);
            1
        } else {
            runs
        };
        Self {
            runs,
            remember: 0,
            enforcement: Enforcement::Raise,
            enabled: true,
        }
    }

    pub fn from_config(config: &PurityConfig) -> Self {
        Self {
            enforcement: config.enforcement(),
            ..Self::new(config.determinism_runs)
        }
        .remember_results(config.remember_results)
        .enabled(config.enabled)
    }

    /// Keep up to `limit` earlier calls per guarded function; 0 disables the history
    pub fn remember_results(mut self, limit: usize) -> Self {
        self.remember = limit;
        self
    }

    /// Log disagreements and return the first run's outcome instead of raising
    pub fn warn_only(mut self, warn_only: bool) -> Self {
        self.enforcement = Enforcement::from_warn_only(warn_only);
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn runs(&self) -> usize {
        self.runs
    }

    fn check_history(&self, history: &History, function: &str, args: Args, first: &Observed) -> Option<Violation> {
        if self.remember == 0 {
            return None;
        }
        let mut history = history.borrow_mut();
        let found = history
            .iter()
            .find(|(remembered, _)| remembered.equivalent(&args))
            .and_then(|(_, earlier)| earlier.disagreement(first))
            .map(|diff| {
                Violation::new(
                    ViolationKind::Determinism,
                    function,
                    "history",
                    format!("Result differs from an earlier call with equal arguments; {}", diff),
                )
            });
        if found.is_none() {
            history.retain(|(remembered, _)| !remembered.equivalent(&args));
            history.push_back((args, first.clone()));
            while history.len() > self.remember {
                history.pop_front();
            }
        }
        found
    }
}

impl Default for EnforceDeterministic {
    fn default() -> Self {
        Self::new(2)
    }
}

impl Guard for EnforceDeterministic {
    fn kind(&self) -> GuardKind {
        GuardKind::EnforceDeterministic
    }

    fn apply(&self, function: &Function) -> Function {
        if !self.enabled {
            return function.clone();
        }
        let guard = self.clone();
        let inner = function.clone();
        let history: History = Rc::new(RefCell::new(VecDeque::new()));
        Function::wrap(function, move |args| {
            let _scope = CallScope::enter(GuardKind::EnforceDeterministic);
            let remembered_args = args.deep_copy();

            let outcome = inner.call(&args.deep_copy());
            let first = Observed::of(&outcome);

            let mut violations = Vec::new();
            for run in 1..guard.runs {
                get_metrics().determinism_replays.inc();
                let replay = Observed::of(&inner.call(&args.deep_copy()));
                if let Some(diff) = first.disagreement(&replay) {
                    debug!("{} diverged on run {}: {}", inner.name(), run, diff);
                    violations.push(Violation::new(
                        ViolationKind::Determinism,
                        inner.name(),
                        format!("run 0 vs run {}", run),
                        format!("Non-deterministic output detected; {}", diff),
                    ));
                    break;
                }
            }

            if violations.is_empty() {
                if let Some(violation) = guard.check_history(&history, inner.name(), remembered_args, &first) {
                    violations.push(violation);
                }
            }

            settle(GuardKind::EnforceDeterministic, guard.enforcement, outcome, violations)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::PurityError;
    use crate::runtime::{effects, Namespace};
    use std::cell::Cell;

    fn double(ns: &Namespace) -> Function {
        Function::new("double", ns, &["x"], |frame| frame.load("x")?.mul(&Value::from(2)))
    }

    #[test]
    fn test_deterministic_function_passes() {
        let ns = Namespace::new("m");
        let guarded = double(&ns).guard(&EnforceDeterministic::new(2));
        assert_eq!(guarded.call_with([3]).unwrap(), Value::from(6));
    }

    #[test]
    fn test_random_function_detected() {
        let _exclusive = effects::exclusive();
        let ns = Namespace::new("m");
        let f = Function::new("roll", &ns, &[], |_| Ok(Value::from(effects::random_u64()? as i64)));
        let err = f.guard(&EnforceDeterministic::new(2)).call_with(Vec::<Value>::new()).unwrap_err();
        let violation = err.violation().unwrap();
        assert_eq!(violation.kind, ViolationKind::Determinism);
        assert_eq!(violation.subject, "run 0 vs run 1");
    }

    #[test]
    fn test_invocation_count_matches_runs() {
        let ns = Namespace::new("m");
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        let f = Function::new("count", &ns, &[], move |_| {
            counter.set(counter.get() + 1);
            Ok(Value::None)
        });
        f.guard(&EnforceDeterministic::new(4)).call(&Args::new()).unwrap();
        assert_eq!(calls.get(), 4);

        calls.set(0);
        let clamped = EnforceDeterministic::new(0);
        assert_eq!(clamped.runs(), 1);
        f.guard(&clamped).call(&Args::new()).unwrap();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_consistent_errors_propagate() {
        let ns = Namespace::new("m");
        let f = Function::new("always_fails", &ns, &[], |_| Err(PurityError::raised("KeyError", "'missing'")));
        let err = f.guard(&EnforceDeterministic::new(3)).call(&Args::new()).unwrap_err();
        assert_eq!(err.to_string(), "KeyError: 'missing'");
        assert!(!err.is_violation());
    }

    fn flaky(ns: &Namespace, outcomes: Vec<Result<Value>>) -> Function {
        let calls = Rc::new(Cell::new(0_usize));
        let outcomes = Rc::new(RefCell::new(outcomes.into_iter()));
        Function::new("flaky", ns, &[], move |_| {
            calls.set(calls.get() + 1);
            outcomes
                .borrow_mut()
                .next()
                .unwrap_or_else(|| Ok(Value::from(calls.get() as i64)))
        })
    }

    #[test]
    fn test_return_then_raise_is_reported() {
        let ns = Namespace::new("m");
        let f = flaky(&ns, vec![Ok(Value::from(1)), Err(PurityError::raised("ValueError", "boom"))]);
        let err = f.guard(&EnforceDeterministic::new(2)).call(&Args::new()).unwrap_err();
        assert!(matches!(err, PurityError::Determinism(_)));
        let violation = err.violation().unwrap();
        assert_eq!(violation.subject, "run 0 vs run 1");
        assert!(violation.description.contains("returned 1 -> raised ValueError: boom"));
    }

    #[test]
    fn test_different_error_messages_are_reported() {
        let ns = Namespace::new("m");
        let f = flaky(
            &ns,
            vec![
                Err(PurityError::raised("KeyError", "'a'")),
                Err(PurityError::raised("KeyError", "'b'")),
            ],
        );
        let err = f.guard(&EnforceDeterministic::new(2)).call(&Args::new()).unwrap_err();
        assert_eq!(err.violation_kind(), Some(ViolationKind::Determinism));
        assert_eq!(err.violation().unwrap().subject, "run 0 vs run 1");
        // the first run's error is still surfaced
        assert!(matches!(err, PurityError::Annotated { .. }));
        assert_eq!(err.label(), "KeyError");
    }

    #[test]
    fn test_warn_only_returns_first_run() {
        let ns = Namespace::new("m");
        let f = flaky(&ns, Vec::new());
        let guard = EnforceDeterministic::new(3).warn_only(true);
        assert_eq!(f.guard(&guard).call(&Args::new()).unwrap(), Value::from(1));

        let config = PurityConfig {
            warn_only: true,
            ..PurityConfig::default()
        };
        let f = flaky(&ns, Vec::new());
        let guarded = f.guard(&EnforceDeterministic::from_config(&config));
        assert_eq!(guarded.call(&Args::new()).unwrap(), Value::from(1));
    }

    #[test]
    fn test_runs_get_independent_copies() {
        let ns = Namespace::new("m");
        let f = Function::new("append_and_len", &ns, &["lst"], |frame| {
            let lst = frame.load("lst")?;
            lst.push(Value::from(0))?;
            Ok(Value::from(lst.len()? as i64))
        });
        let lst = Value::list([]);
        let out = f.guard(&EnforceDeterministic::new(3)).call_with([lst.clone()]).unwrap();
        assert_eq!(out, Value::from(1));
        assert_eq!(lst.len().unwrap(), 0);
    }

    #[test]
    fn test_history_detects_cross_call_drift() {
        let ns = Namespace::new("m");
        let calls = Rc::new(Cell::new(0_i64));
        let counter = Rc::clone(&calls);
        let f = Function::new("drift", &ns, &["x"], move |_| {
            counter.set(counter.get() + 1);
            Ok(Value::from(counter.get()))
        });
        // single run per call, so only the history can catch it
        let guarded = f.guard(&EnforceDeterministic::new(1).remember_results(8));
        assert!(guarded.call_with([1]).is_ok());
        assert!(guarded.call_with([2]).is_ok());
        let err = guarded.call_with([1]).unwrap_err();
        assert_eq!(err.violation().unwrap().subject, "history");
    }
}
