//! Service configuration, loaded from `SLOTKEEPER_*` environment variables.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_BIND: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_COMPACT_THRESHOLD: u64 = 1000;
pub const DEFAULT_EXTERNAL_TIMEOUT_MS: u64 = 2000;
pub const DEFAULT_LEDGER_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_LEDGER_RETRIES: u32 = 3;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Time budgets for the blocking operations of slot queries and reservations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadlines {
    /// Ledger reads and per-advisor lock acquisition.
    pub ledger: Duration,
    /// Busy-source fetch and calendar publish.
    pub external: Duration,
    /// Extra lock attempts before a reservation gives up as busy.
    pub ledger_retries: u32,
}

impl Default for Deadlines {
    fn default() -> Self {
        Self {
            ledger: Duration::from_millis(DEFAULT_LEDGER_TIMEOUT_MS),
            external: Duration::from_millis(DEFAULT_EXTERNAL_TIMEOUT_MS),
            ledger_retries: DEFAULT_LEDGER_RETRIES,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    /// Prometheus exporter port; exporter disabled when unset.
    pub metrics_port: Option<u16>,
    pub compact_threshold: u64,
    pub busy_source_url: Option<String>,
    pub calendar_bridge_url: Option<String>,
    pub deadlines: Deadlines,
    pub request_timeout: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: '{value}' ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("{var} must be greater than 0")]
    Zero { var: &'static str },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a variable map (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind = vars
            .get("SLOTKEEPER_BIND")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND.to_string());
        let port = parse_or(vars, "SLOTKEEPER_PORT", DEFAULT_PORT)?;
        let data_dir = vars
            .get("SLOTKEEPER_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
        let metrics_port = parse_opt(vars, "SLOTKEEPER_METRICS_PORT")?;

        let compact_threshold =
            positive(vars, "SLOTKEEPER_COMPACT_THRESHOLD", DEFAULT_COMPACT_THRESHOLD)?;
        let external_ms =
            positive(vars, "SLOTKEEPER_EXTERNAL_TIMEOUT_MS", DEFAULT_EXTERNAL_TIMEOUT_MS)?;
        let ledger_ms = positive(vars, "SLOTKEEPER_LEDGER_TIMEOUT_MS", DEFAULT_LEDGER_TIMEOUT_MS)?;
        let ledger_retries = parse_or(vars, "SLOTKEEPER_LEDGER_RETRIES", DEFAULT_LEDGER_RETRIES)?;
        let request_secs = positive(
            vars,
            "SLOTKEEPER_REQUEST_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )?;

        Ok(Self {
            bind,
            port,
            data_dir,
            metrics_port,
            compact_threshold,
            busy_source_url: non_empty(vars, "SLOTKEEPER_BUSY_SOURCE_URL"),
            calendar_bridge_url: non_empty(vars, "SLOTKEEPER_CALENDAR_BRIDGE_URL"),
            deadlines: Deadlines {
                ledger: Duration::from_millis(ledger_ms),
                external: Duration::from_millis(external_ms),
                ledger_retries,
            },
            request_timeout: Duration::from_secs(request_secs),
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("ledger.wal")
    }
}

fn non_empty(vars: &HashMap<String, String>, var: &str) -> Option<String> {
    vars.get(var).filter(|v| !v.trim().is_empty()).cloned()
}

fn parse_opt<T>(vars: &HashMap<String, String>, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(value) = vars.get(var) else {
        return Ok(None);
    };
    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|e: T::Err| ConfigError::Invalid {
            var,
            value: value.clone(),
            reason: e.to_string(),
        })
}

fn parse_or<T>(vars: &HashMap<String, String>, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    Ok(parse_opt(vars, var)?.unwrap_or(default))
}

fn positive(vars: &HashMap<String, String>, var: &'static str, default: u64) -> Result<u64, ConfigError> {
    match parse_or(vars, var, default)? {
        0 => Err(ConfigError::Zero { var }),
        v => Ok(v),
    }
}
