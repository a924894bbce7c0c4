/// Shared call-wrapper contract
///
/// Each guard wraps the original callable, performs its pre-call setup,
/// invokes the original, verifies, and hands the outcome plus whatever it found
/// to [`settle`]. Interception layers are RAII handles held by the wrapper, so
/// they are gone before `settle` returns and on unwind.
use crate::config::types::{Enforcement, GuardKind, PurityError, Result, Violation};
use crate::observability::audit::{record_violation, Disposition, ViolationEvent};
use crate::observability::metrics::get_metrics;
use crate::value::Value;
use std::time::Instant;
use uuid::Uuid;

/// Decide the outcome of one guarded call
///
/// - no violations: the original outcome, untouched
/// - warn: each violation is reported, then the original outcome
/// - raise with `Ok`: the first violation as an error
/// - raise with `Err`: the error itself when it already carries one of the
///   violations, otherwise the error annotated with the first violation
pub fn settle(
    guard: GuardKind,
    enforcement: Enforcement,
    outcome: Result<Value>,
    violations: Vec<Violation>,
) -> Result<Value> {
    if violations.is_empty() {
        return outcome;
    }

    let call_id = Uuid::new_v4();
    let disposition = if enforcement.is_warn() {
        Disposition::Warned
    } else {
        Disposition::Raised
    };
    let metrics = get_metrics();
    for violation in &violations {
        metrics.record_violation(violation.kind, enforcement.is_warn());
        let mut event = ViolationEvent::new(call_id, guard, disposition, violation.clone());
        if let Err(e) = &outcome {
            event = event.with_original_error(e);
        }
        record_violation(&event);
    }

    if enforcement.is_warn() {
        return outcome;
    }

    let mut violations = violations.into_iter();
    let Some(first) = violations.next() else {
        return outcome;
    };
    match outcome {
        Ok(_) => Err(first.into_error()),
        Err(e) => {
            let carried = e
                .violation()
                .map(|v| *v == first || violations.any(|other| *v == other))
                .unwrap_or(false);
            if carried {
                Err(e)
            } else {
                Err(PurityError::Annotated {
                    source: Box::new(e),
                    violation: first,
                })
            }
        }
    }
}

/// Per-call bookkeeping: call counters, active gauge and latency
pub(crate) struct CallScope {
    started: Instant,
}

impl CallScope {
    pub(crate) fn enter(guard: GuardKind) -> Self {
        let metrics = get_metrics();
        metrics.record_call(guard);
        metrics.active_guarded_calls.inc();
        Self {
            started: Instant::now(),
        }
    }
}

impl Drop for CallScope {
    fn drop(&mut self) {
        let metrics = get_metrics();
        metrics.active_guarded_calls.dec();
        metrics.guarded_call_duration.observe(self.started.elapsed());
    }
}
