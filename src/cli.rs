use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::config::settings::PurityConfig;
use crate::guards::{
    enforce_deterministic, forbid_globals, forbid_side_effects, immutable_arguments, Guard,
};
use crate::observability::metrics::get_metrics;
use crate::runtime::effects::{self, Operation, OperationTable};
use crate::runtime::{Args, Function, Namespace};
use crate::value::Value;

#[derive(Parser)]
#[command(author, version, about = "Runtime purity guards: diagnostics and configuration checks", long_about = None)]
struct Cli {
    /// Append violation events to this JSON-lines file
    #[arg(long, global = true, value_name = "PATH")]
    audit_log: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the interceptable operations and mark the default table
    Operations {
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Validate a JSON configuration file and print the effective settings
    CheckConfig {
        /// Configuration file
        file: PathBuf,
    },
    /// Print guard metrics in Prometheus text format
    Metrics {
        /// Run every guard against a pure and an impure function first
        #[arg(long)]
        self_check: bool,
    },
}

pub fn run() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    let env_config = PurityConfig::from_env().context("Invalid PUREGUARD_* environment")?;
    if let Some(path) = cli.audit_log.clone().or(env_config.audit_log) {
        crate::observability::audit::init_audit_log(Some(path))
            .context("Failed to initialize audit log")?;
    }

    match cli.command {
        Commands::Operations { json } => list_operations(json),
        Commands::CheckConfig { file } => check_config(&file),
        Commands::Metrics { self_check } => {
            if self_check {
                let failures = run_self_check();
                if failures > 0 {
                    anyhow::bail!("self-check failed: {} guard(s) misbehaved", failures);
                }
            }
            print!("{}", get_metrics().export_prometheus());
            Ok(())
        }
    }
}

fn list_operations(json: bool) -> Result<()> {
    let defaults = OperationTable::default();
    if json {
        let entries: Vec<serde_json::Value> = Operation::ALL
            .iter()
            .map(|op| {
                serde_json::json!({
                    "id": op.id(),
                    "description": op.description(),
                    "default": defaults.contains(*op),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    println!("{:<22} {:<8} DESCRIPTION", "OPERATION", "DEFAULT");
    for op in Operation::ALL {
        let marker = if defaults.contains(op) { "yes" } else { "-" };
        println!("{:<22} {:<8} {}", op.id(), marker, op.description());
    }
    Ok(())
}

fn check_config(file: &Path) -> Result<()> {
    let config = PurityConfig::load_from_file(file)
        .with_context(|| format!("Invalid configuration {}", file.display()))?;
    let table = config.operation_table()?;
    let watched: Vec<&str> = table.operations().iter().map(|op| op.id()).collect();

    println!("{}", serde_json::to_string_pretty(&config)?);
    println!("watched operations: {}", watched.join(", "));
    Ok(())
}

/// Each guard must pass a pure function and reject an impure one.
/// Returns the number of guards that did not.
fn run_self_check() -> usize {
    let _exclusive = effects::exclusive();
    let ns = Namespace::new("self_check");
    ns.define("STATE", Value::list([]));

    let pure = Function::new("pure", &ns, &["x"], |frame| frame.load("x")?.mul(&Value::from(2)));
    let mutating = Function::new("mutating", &ns, &["xs"], |frame| {
        frame.load("xs")?.push(Value::None)?;
        Ok(Value::None)
    });
    let random = Function::new("random", &ns, &[], |_| Ok(Value::from(effects::random_u64()? as i64)));
    let reads_global = Function::new("reads_global", &ns, &[], |frame| frame.load("STATE"));
    let sleeps = Function::new("sleeps", &ns, &[], |_| {
        effects::sleep(std::time::Duration::from_millis(0))?;
        Ok(Value::None)
    });

    let watch_sleep = OperationTable::default().deny(Operation::Sleep);
    let checks: Vec<(Box<dyn Guard>, &Function, Args)> = vec![
        (Box::new(immutable_arguments(false)) as Box<dyn Guard>, &mutating, Args::from(vec![Value::list([])])),
        (Box::new(enforce_deterministic(2)) as Box<dyn Guard>, &random, Args::new()),
        (Box::new(forbid_globals()) as Box<dyn Guard>, &reads_global, Args::new()),
        (Box::new(forbid_side_effects(Some(watch_sleep), false)) as Box<dyn Guard>, &sleeps, Args::new()),
    ];

    let mut failures = 0;
    for (guard, impure, args) in checks {
        let passes_pure = pure.guard(guard.as_ref()).call_with([21]).is_ok();
        let rejects_impure = impure
            .guard(guard.as_ref())
            .call(&args)
            .map_err(|e| e.is_violation())
            .err()
            .unwrap_or(false);
        if passes_pure && rejects_impure {
            log::info!("self-check {}: ok", guard.kind());
        } else {
            log::error!(
                "self-check {}: pure accepted={}, impure rejected={}",
                guard.kind(),
                passes_pure,
                rejects_impure
            );
            failures += 1;
        }
    }
    failures
}
