// Guard metrics
//
// Counters, gauges and histograms for:
// - Guarded calls per guard kind
// - Violations per kind and how they were settled (raised / warned)
// - Interception layers installed and restored
// - Determinism replays and opaque values compared by identity
// - Guarded call latency

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::types::{GuardKind, ViolationKind};

/// Counter metric (monotonically increasing)
#[derive(Debug)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.value.store(0, Ordering::Relaxed);
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}

/// Gauge metric (can go up and down)
#[derive(Debug)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Saturates at zero
    pub fn dec(&self) {
        let _ = self
            .value
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)));
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl Default for Gauge {
    fn default() -> Self {
        Self::new()
    }
}

/// Histogram bucket for latency tracking
#[derive(Debug)]
pub struct HistogramBucket {
    pub le: f64, // upper bound in seconds
    pub count: AtomicU64,
}

/// Histogram metric for latency tracking
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<HistogramBucket>,
    sum: AtomicU64, // microseconds
    count: AtomicU64,
}

impl Histogram {
    /// Buckets sized for in-process calls, from 10µs up to 1s
    pub fn new_latency() -> Self {
        let bucket_bounds = vec![
            0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0,
        ];

        let buckets = bucket_bounds
            .into_iter()
            .map(|le| HistogramBucket {
                le,
                count: AtomicU64::new(0),
            })
            .collect();

        Self {
            buckets,
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, value: Duration) {
        let seconds = value.as_secs_f64();
        let micros = value.as_micros() as u64;

        self.sum.fetch_add(micros, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        for bucket in &self.buckets {
            if seconds <= bucket.le {
                bucket.count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn get_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn get_sum_micros(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }

    pub fn get_bucket_count(&self, le: f64) -> u64 {
        self.buckets
            .iter()
            .find(|b| (b.le - le).abs() < 1e-9)
            .map(|b| b.count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

/// Global metrics registry
#[derive(Debug)]
pub struct MetricsRegistry {
    // Guarded calls
    pub guarded_calls_total: Counter,
    pub calls_immutable_arguments: Counter,
    pub calls_enforce_immutable: Counter,
    pub calls_enforce_deterministic: Counter,
    pub calls_forbid_global_names: Counter,
    pub calls_forbid_globals: Counter,
    pub calls_forbid_side_effects: Counter,
    pub active_guarded_calls: Gauge,

    // Violations by kind
    pub violations_mutation: Counter,
    pub violations_determinism: Counter,
    pub violations_namespace_access: Counter,
    pub violations_side_effect: Counter,

    // Settlement
    pub violations_raised: Counter,
    pub violations_warned: Counter,

    // Interception layers
    pub interceptions_installed: Counter,
    pub interceptions_restored: Counter,

    pub determinism_replays: Counter,
    pub opaque_identity_checks: Counter,

    pub guarded_call_duration: Histogram,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            guarded_calls_total: Counter::new(),
            calls_immutable_arguments: Counter::new(),
            calls_enforce_immutable: Counter::new(),
            calls_enforce_deterministic: Counter::new(),
            calls_forbid_global_names: Counter::new(),
            calls_forbid_globals: Counter::new(),
            calls_forbid_side_effects: Counter::new(),
            active_guarded_calls: Gauge::new(),

            violations_mutation: Counter::new(),
            violations_determinism: Counter::new(),
            violations_namespace_access: Counter::new(),
            violations_side_effect: Counter::new(),

            violations_raised: Counter::new(),
            violations_warned: Counter::new(),

            interceptions_installed: Counter::new(),
            interceptions_restored: Counter::new(),

            determinism_replays: Counter::new(),
            opaque_identity_checks: Counter::new(),

            guarded_call_duration: Histogram::new_latency(),
        }
    }

    /// Record one guarded call
    pub fn record_call(&self, guard: GuardKind) {
        self.guarded_calls_total.inc();
        match guard {
            GuardKind::ImmutableArguments => self.calls_immutable_arguments.inc(),
            GuardKind::EnforceImmutable => self.calls_enforce_immutable.inc(),
            GuardKind::EnforceDeterministic => self.calls_enforce_deterministic.inc(),
            GuardKind::ForbidGlobalNames => self.calls_forbid_global_names.inc(),
            GuardKind::ForbidGlobals => self.calls_forbid_globals.inc(),
            GuardKind::ForbidSideEffects => self.calls_forbid_side_effects.inc(),
        }
    }

    /// Record a detected violation and whether it was raised or only warned
    pub fn record_violation(&self, kind: ViolationKind, warned: bool) {
        match kind {
            ViolationKind::Mutation => self.violations_mutation.inc(),
            ViolationKind::Determinism => self.violations_determinism.inc(),
            ViolationKind::NamespaceAccess => self.violations_namespace_access.inc(),
            ViolationKind::SideEffect => self.violations_side_effect.inc(),
        }
        if warned {
            self.violations_warned.inc();
        } else {
            self.violations_raised.inc();
        }
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let mut out = String::new();

        family(&mut out, "guarded_calls_total", "counter", "Total number of guarded calls");
        sample(&mut out, "guarded_calls_total", None, self.guarded_calls_total.get());

        family(&mut out, "guarded_calls_by_guard", "counter", "Guarded calls by guard");
        for (guard, counter) in [
            (GuardKind::ImmutableArguments, &self.calls_immutable_arguments),
            (GuardKind::EnforceImmutable, &self.calls_enforce_immutable),
            (GuardKind::EnforceDeterministic, &self.calls_enforce_deterministic),
            (GuardKind::ForbidGlobalNames, &self.calls_forbid_global_names),
            (GuardKind::ForbidGlobals, &self.calls_forbid_globals),
            (GuardKind::ForbidSideEffects, &self.calls_forbid_side_effects),
        ] {
            sample(&mut out, "guarded_calls_by_guard", Some(("guard", guard.as_str())), counter.get());
        }

        family(&mut out, "active_guarded_calls", "gauge", "Guarded calls in progress");
        sample(&mut out, "active_guarded_calls", None, self.active_guarded_calls.get());

        family(&mut out, "violations_total", "counter", "Violations by kind");
        for (kind, counter) in [
            (ViolationKind::Mutation, &self.violations_mutation),
            (ViolationKind::Determinism, &self.violations_determinism),
            (ViolationKind::NamespaceAccess, &self.violations_namespace_access),
            (ViolationKind::SideEffect, &self.violations_side_effect),
        ] {
            sample(&mut out, "violations_total", Some(("kind", kind.as_str())), counter.get());
        }

        family(&mut out, "violations_settled", "counter", "Violations by disposition");
        sample(&mut out, "violations_settled", Some(("disposition", "raised")), self.violations_raised.get());
        sample(&mut out, "violations_settled", Some(("disposition", "warned")), self.violations_warned.get());

        family(&mut out, "interceptions_total", "counter", "Interception layers");
        sample(&mut out, "interceptions_total", Some(("event", "installed")), self.interceptions_installed.get());
        sample(&mut out, "interceptions_total", Some(("event", "restored")), self.interceptions_restored.get());

        family(&mut out, "determinism_replays_total", "counter", "Extra invocations made by replay");
        sample(&mut out, "determinism_replays_total", None, self.determinism_replays.get());

        family(
            &mut out,
            "opaque_identity_checks_total",
            "counter",
            "Opaque values compared by identity",
        );
        sample(&mut out, "opaque_identity_checks_total", None, self.opaque_identity_checks.get());

        let latency = &self.guarded_call_duration;
        family(&mut out, "guarded_call_duration_seconds", "histogram", "Guarded call latency");
        for bucket in &latency.buckets {
            let le = bucket.le.to_string();
            let count = bucket.count.load(Ordering::Relaxed);
            sample(&mut out, "guarded_call_duration_seconds_bucket", Some(("le", &le)), count);
        }
        let _ = writeln!(
            out,
            "{}guarded_call_duration_seconds_sum {}",
            PREFIX,
            latency.get_sum_micros() as f64 / 1_000_000.0
        );
        sample(&mut out, "guarded_call_duration_seconds_count", None, latency.get_count());

        out
    }
}

const PREFIX: &str = "pureguard_";

fn family(out: &mut String, name: &str, kind: &str, help: &str) {
    let _ = writeln!(out, "# HELP {}{} {}", PREFIX, name, help);
    let _ = writeln!(out, "# TYPE {}{} {}", PREFIX, name, kind);
}

fn sample(out: &mut String, name: &str, label: Option<(&str, &str)>, value: u64) {
    let _ = match label {
        Some((key, val)) => writeln!(out, "{}{}{{{}=\"{}\"}} {}", PREFIX, name, key, val, value),
        None => writeln!(out, "{}{} {}", PREFIX, name, value),
    };
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Global metrics instance
static METRICS: once_cell::sync::Lazy<Arc<MetricsRegistry>> =
    once_cell::sync::Lazy::new(|| Arc::new(MetricsRegistry::new()));

/// Get global metrics registry
pub fn get_metrics() -> Arc<MetricsRegistry> {
    Arc::clone(&METRICS)
}
