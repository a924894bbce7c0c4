/// Violation audit trail
///
/// Every violation a guard settles is logged through `log` by disposition
/// (raised violations at error level, warned ones at warn level). When an
/// audit file has been initialised, the event is also appended to it as one
/// JSON object per line.
///
/// Audit writes go straight to the file system, never through the operation
/// table, so a side-effect guard cannot intercept its own reporting.
use crate::config::types::{GuardKind, PurityError, Result, Violation};
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use uuid::Uuid;

/// How a guard settled a violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Replaced the call outcome with an error
    Raised,
    /// Logged; original outcome returned
    Warned,
}

/// One settled violation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationEvent {
    pub event_id: Uuid,
    /// Shared by every violation found during the same guarded call
    pub call_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub guard: GuardKind,
    pub disposition: Disposition,
    pub violation: Violation,
    /// Error raised by the wrapped function in the same call, if any
    pub original_error: Option<String>,
}

impl ViolationEvent {
    pub fn new(call_id: Uuid, guard: GuardKind, disposition: Disposition, violation: Violation) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            call_id,
            timestamp: Utc::now(),
            guard,
            disposition,
            violation,
            original_error: None,
        }
    }

    pub fn with_original_error(mut self, error: &PurityError) -> Self {
        self.original_error = Some(error.to_string());
        self
    }
}

/// JSON-lines audit file
pub struct AuditLog {
    audit_file: Arc<Mutex<File>>,
    audit_path: PathBuf,
}

impl AuditLog {
    pub fn new(audit_path: Option<PathBuf>) -> Result<Self> {
        let audit_path = audit_path.unwrap_or_else(default_audit_path);

        if let Some(parent) = audit_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                PurityError::Config(format!("Failed to create audit log directory: {}", e))
            })?;
        }

        let audit_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&audit_path)
            .map_err(|e| PurityError::Config(format!("Failed to open audit log: {}", e)))?;

        Ok(Self {
            audit_file: Arc::new(Mutex::new(audit_file)),
            audit_path,
        })
    }

    pub fn append(&self, event: &ViolationEvent) {
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to serialise violation event: {}", e);
                return;
            }
        };

        if let Ok(mut file) = self.audit_file.lock() {
            if let Err(e) = writeln!(file, "{}", line) {
                error!("Failed to write to audit log: {}", e);
            }
            if let Err(e) = file.flush() {
                error!("Failed to flush audit log: {}", e);
            }
        } else {
            error!("Failed to acquire lock on audit file");
        }
    }

    pub fn audit_path(&self) -> &Path {
        &self.audit_path
    }
}

fn default_audit_path() -> PathBuf {
    std::env::temp_dir()
        .join("pureguard")
        .join("violations.jsonl")
}

static AUDIT_LOG: OnceLock<AuditLog> = OnceLock::new();

/// Initialise the global audit file. A second call keeps the first file.
pub fn init_audit_log(audit_path: Option<PathBuf>) -> Result<()> {
    let log = AuditLog::new(audit_path)?;
    let path = log.audit_path().display().to_string();
    if AUDIT_LOG.set(log).is_err() {
        warn!("Audit log already initialised; ignoring {}", path);
    } else {
        info!("Audit log initialised at {}", path);
    }
    Ok(())
}

/// Path of the global audit file, if one was initialised
pub fn audit_log_path() -> Option<PathBuf> {
    AUDIT_LOG.get().map(|log| log.audit_path().to_path_buf())
}

/// Log a settled violation and append it to the audit file when configured
pub fn record_violation(event: &ViolationEvent) {
    match event.disposition {
        Disposition::Raised => error!(
            "PURITY VIOLATION [{}] call {}: {}",
            event.guard, event.call_id, event.violation
        ),
        Disposition::Warned => warn!(
            "PURITY WARNING [{}] call {}: {}",
            event.guard, event.call_id, event.violation
        ),
    }

    if let Some(log) = AUDIT_LOG.get() {
        log.append(event);
    }
}
