// Per-call overhead benchmark for the purity guards
// Measures wall latency of a small pure function, bare and under each guard
// Target: p50 < 250us, p95 < 1ms per guarded call

use pureguard::{
    enforce_deterministic, enforce_immutable, forbid_global_names, forbid_globals,
    forbid_side_effects, immutable_arguments, Args, Function, Guard, Namespace, Value,
};
use std::time::{Duration, Instant};

/// Benchmark configuration
const ITERATIONS: usize = 2000;
const WARMUP_ITERATIONS: usize = 200;

/// Latency percentiles
struct LatencyStats {
    p50: Duration,
    p95: Duration,
    p99: Duration,
    min: Duration,
    max: Duration,
    mean: Duration,
}

impl LatencyStats {
    fn from_samples(mut samples: Vec<Duration>) -> Self {
        samples.sort();
        let len = samples.len();

        let p50_idx = (len as f64 * 0.50) as usize;
        let p95_idx = (len as f64 * 0.95) as usize;
        let p99_idx = (len as f64 * 0.99) as usize;

        let sum: Duration = samples.iter().sum();
        let mean = sum / len as u32;

        Self {
            p50: samples[p50_idx],
            p95: samples[p95_idx],
            p99: samples[p99_idx],
            min: samples[0],
            max: samples[len - 1],
            mean,
        }
    }

    fn print(&self, label: &str) {
        println!("\n{}", label);
        println!("  p50: {:?}", self.p50);
        println!("  p95: {:?}", self.p95);
        println!("  p99: {:?}", self.p99);
        println!("  min: {:?}", self.min);
        println!("  max: {:?}", self.max);
        println!("  mean: {:?}", self.mean);
    }
}

/// Benchmark result
struct BenchmarkResult {
    scenario: String,
    stats: LatencyStats,
    passed: bool,
    reason: Option<String>,
}

impl BenchmarkResult {
    fn print(&self) {
        println!("\n=== {} ===", self.scenario);
        self.stats.print("Latency");

        match &self.reason {
            None => println!("✅ PASS"),
            Some(reason) => println!("❌ FAIL: {}", reason),
        }
    }
}

/// Sums a list of integers without touching anything else
fn sum_list(ns: &Namespace) -> Function {
    Function::new("sum_list", ns, &["xs"], |frame| {
        let xs = frame.load("xs")?;
        let mut total = Value::from(0);
        for item in xs.items()? {
            total = total.add(&item)?;
        }
        Ok(total)
    })
}

fn sample_args() -> Args {
    Args::from(vec![Value::list((0..32).map(|i| Value::from(i as i64)))])
}

fn measure(scenario: &str, function: &Function, budget_p50: Duration, budget_p95: Duration) -> BenchmarkResult {
    let args = sample_args();
    let mut samples = Vec::with_capacity(ITERATIONS);

    // Warmup
    for _ in 0..WARMUP_ITERATIONS {
        let _ = function.call(&args);
    }

    // Actual benchmark
    for _ in 0..ITERATIONS {
        let start = Instant::now();
        let _ = function.call(&args);
        samples.push(start.elapsed());
    }

    let stats = LatencyStats::from_samples(samples);
    let passed = stats.p50 < budget_p50 && stats.p95 < budget_p95;
    let reason = if !passed {
        Some(format!(
            "p50={:?} (target <{:?}), p95={:?} (target <{:?})",
            stats.p50, budget_p50, stats.p95, budget_p95
        ))
    } else {
        None
    };

    BenchmarkResult {
        scenario: scenario.to_string(),
        stats,
        passed,
        reason,
    }
}

fn main() {
    println!("=== pureguard Guard Overhead Benchmark ===");
    println!("Iterations: {} (after {} warmup)", ITERATIONS, WARMUP_ITERATIONS);

    let ns = Namespace::new("bench");
    let f = sum_list(&ns);
    let budget_p50 = Duration::from_micros(250);
    let budget_p95 = Duration::from_millis(1);

    let guards: Vec<Box<dyn Guard>> = vec![
        Box::new(immutable_arguments(false)) as Box<dyn Guard>,
        Box::new(enforce_immutable()) as Box<dyn Guard>,
        Box::new(enforce_deterministic(2)) as Box<dyn Guard>,
        Box::new(forbid_global_names(None)) as Box<dyn Guard>,
        Box::new(forbid_globals()) as Box<dyn Guard>,
        Box::new(forbid_side_effects(None, false)) as Box<dyn Guard>,
    ];

    let mut results = vec![measure("unguarded", &f, budget_p50, budget_p95)];
    for guard in &guards {
        let guarded = f.guard(guard.as_ref());
        results.push(measure(guard.kind().as_str(), &guarded, budget_p50, budget_p95));
    }

    let stacked = guards.iter().fold(f.clone(), |g, guard| g.guard(guard.as_ref()));
    results.push(measure("all guards stacked", &stacked, budget_p50 * 8, budget_p95 * 8));

    for result in &results {
        result.print();
    }

    // Summary
    let passed_count = results.iter().filter(|r| r.passed).count();
    let total_count = results.len();

    println!("\n=== Summary ===");
    println!("{}/{} scenarios passed", passed_count, total_count);

    if passed_count == total_count {
        println!("✅ All overhead budgets met");
        std::process::exit(0);
    } else {
        println!("❌ Some overhead budgets exceeded");
        std::process::exit(1);
    }
}
