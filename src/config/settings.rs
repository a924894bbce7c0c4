/// Guard configuration loaded from JSON or the environment
use crate::config::types::{Enforcement, PurityError, Result};
use crate::runtime::effects::{Operation, OperationTable};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_CONFIG: &str = "PUREGUARD_CONFIG";
pub const ENV_ENABLED: &str = "PUREGUARD_ENABLED";
pub const ENV_WARN_ONLY: &str = "PUREGUARD_WARN_ONLY";

/// Settings shared by the `from_config` guard constructors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PurityConfig {
    /// When false, guards return the original function unchanged
    pub enabled: bool,
    /// Report violations as warnings instead of raising
    pub warn_only: bool,
    /// Invocations per call for the determinism guard
    pub determinism_runs: usize,
    /// Cross-call history kept by the determinism guard (0 disables it)
    pub remember_results: usize,
    /// Operation ids watched by the side-effect guard; `None` means the default table
    pub side_effect_operations: Option<Vec<String>>,
    /// JSON-lines file receiving violation events
    pub audit_log: Option<PathBuf>,
}

impl Default for PurityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            warn_only: false,
            determinism_runs: 2,
            remember_results: 0,
            side_effect_operations: None,
            audit_log: None,
        }
    }
}

impl PurityConfig {
    /// Load and validate a JSON configuration file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_content = std::fs::read_to_string(path)
            .map_err(|e| PurityError::Config(format!("Failed to read config file: {}", e)))?;

        let config: PurityConfig = serde_json::from_str(&config_content)
            .map_err(|e| PurityError::Config(format!("Failed to parse config JSON: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// `PUREGUARD_CONFIG` file (or defaults), then `PUREGUARD_ENABLED` and
    /// `PUREGUARD_WARN_ONLY` overrides
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// [`PurityConfig::from_env`] over an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup(ENV_CONFIG) {
            Some(path) if !path.is_empty() => Self::load_from_file(path)?,
            _ => Self::default(),
        };
        if let Some(raw) = lookup(ENV_ENABLED) {
            config.enabled = parse_flag(ENV_ENABLED, &raw)?;
        }
        if let Some(raw) = lookup(ENV_WARN_ONLY) {
            config.warn_only = parse_flag(ENV_WARN_ONLY, &raw)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.determinism_runs < 1 {
            return Err(PurityError::Config(
                "determinism_runs must be at least 1".to_string(),
            ));
        }
        if let Some(ids) = &self.side_effect_operations {
            for id in ids {
                id.parse::<Operation>()?;
            }
        }
        Ok(())
    }

    pub fn enforcement(&self) -> Enforcement {
        Enforcement::from_warn_only(self.warn_only)
    }

    pub fn operation_table(&self) -> Result<OperationTable> {
        match &self.side_effect_operations {
            Some(ids) => OperationTable::from_ids(ids),
            None => Ok(OperationTable::default()),
        }
    }
}

fn parse_flag(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(PurityError::Config(format!(
            "{} must be a boolean, got '{}'",
            name, other
        ))),
    }
}
