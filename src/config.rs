//! Circulation policy and service settings.
//!
//! Loaded from a JSON file. Every field is optional and falls back to its
//! default, so `{}` is a valid config.

use crate::error::ConfigError;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DAY_SECS: u64 = 24 * 60 * 60;
/// Upper bound for configured periods (100 years).
const MAX_PERIOD_SECS: u64 = 100 * 365 * DAY_SECS;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Time between borrowing a book and its due date.
    pub loan_period_secs: u64,
    /// How long a penalty blocks borrowing once it is issued.
    pub penalty_duration_secs: u64,
    pub max_active_loans: u32,
    /// Number of most recent loans recommendations are drawn from.
    pub history_window: usize,
    /// Candidates taken from each loan in the history window.
    pub per_source: usize,
    pub bind_addr: String,
    pub data_path: PathBuf,
    pub log_level: String,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        LibraryConfig {
            loan_period_secs: 14 * DAY_SECS,
            penalty_duration_secs: 7 * DAY_SECS,
            max_active_loans: 4,
            history_window: 5,
            per_source: 3,
            bind_addr: "0.0.0.0:7878".to_string(),
            data_path: PathBuf::from("library.db"),
            log_level: "info".to_string(),
        }
    }
}

impl LibraryConfig {
    /// Reads a config file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!(path = %path.display(), "config file not found, using defaults");
            return Ok(LibraryConfig::default());
        }

        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: LibraryConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.loan_period_secs == 0 || self.loan_period_secs > MAX_PERIOD_SECS {
            return Err(ConfigError::Invalid(format!(
                "loan_period_secs must be in 1..={}",
                MAX_PERIOD_SECS
            )));
        }
        if self.penalty_duration_secs == 0 || self.penalty_duration_secs > MAX_PERIOD_SECS {
            return Err(ConfigError::Invalid(format!(
                "penalty_duration_secs must be in 1..={}",
                MAX_PERIOD_SECS
            )));
        }
        if self.max_active_loans == 0 {
            return Err(ConfigError::Invalid("max_active_loans must be positive".to_string()));
        }
        Ok(())
    }

    pub fn loan_period(&self) -> Duration {
        Duration::seconds(self.loan_period_secs.min(MAX_PERIOD_SECS) as i64)
    }

    pub fn penalty_duration(&self) -> Duration {
        Duration::seconds(self.penalty_duration_secs.min(MAX_PERIOD_SECS) as i64)
    }
}
