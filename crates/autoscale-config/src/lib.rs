//! Environment-sourced configuration for the autoscaler.
//!
//! [`Settings`] is loaded once at process start via [`Settings::from_env`] and
//! handed to every component as an immutable, reference-counted bundle —
//! there is no ambient global config lookup anywhere past `main`.

#![forbid(unsafe_code)]

use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for environment variable {name}: {value:?} ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Immutable, process-wide configuration bundle. Construct with
/// [`Settings::from_env`] and share via `Arc<Settings>`.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Base URL of the remote fleet API, e.g. `https://fleet.example.com`.
    pub host: String,
    /// Bearer/query token presented to `/api/resource` and `/api/statistic`.
    pub token: String,

    /// Absolute load percentage (0-100) above which a type is considered
    /// "offline" and the reconciler switches to the fast-recovery regime.
    pub max_load: f64,
    /// Target ceiling utilisation percentage (0-100) a single pod should run at.
    pub pod_load_max: f64,
    /// Dampening threshold: relative change below this is treated as noise.
    pub delta: f64,
    /// Number of trailing load-trail entries averaged by the dampening check.
    pub gap: usize,
    /// Tiny per-pod cost penalty that breaks cost ties toward fewer pods.
    pub penalty: f64,
    /// Seconds to sleep between ticks (and after a failed tick).
    pub sleep_second: u64,
    /// Maximum number of `Stat` samples retained by `StatStore`.
    pub memory_size: usize,
    /// Number of trailing samples fed to the forecaster.
    pub train_size: usize,
    /// Maximum length of each `LoadTrail` vector.
    pub max_data_size: usize,
    /// Minimum history length required before the predictive branch is trusted.
    pub min_memory_size: usize,
    /// Gate on dispatching mutations; `false` runs a dry loop and enables
    /// stats-memory persistence to disk.
    pub prod: bool,
    /// Per-request timeout applied to the shared `reqwest::Client`.
    pub request_timeout_secs: u64,
}

impl Settings {
    /// Load settings from the process environment, falling back to the
    /// documented defaults for everything except `host`/`token`.
    ///
    /// Does not itself call `dotenvy::dotenv()` — callers (typically `main`)
    /// decide whether a `.env` file should be loaded first.
    pub fn from_env() -> ConfigResult<Self> {
        Ok(Self {
            host: required_string("HOST")?,
            token: required_string("TOKEN")?,
            max_load: optional_parsed("MAX_LOAD", 95.0)?,
            pod_load_max: optional_parsed("POD_LOAD_MAX", 90.0)?,
            delta: optional_parsed("DELTA", 0.2)?,
            gap: optional_parsed("GAP", 4)?,
            penalty: optional_parsed("PENALTY", 0.001)?,
            sleep_second: optional_parsed("SLEEP_SECOND", 15)?,
            memory_size: optional_parsed("MEMORY_SIZE", 100)?,
            train_size: optional_parsed("TRAIN_SIZE", 120)?,
            max_data_size: optional_parsed("MAX_DATA_SIZE", 500)?,
            min_memory_size: optional_parsed("MIN_MEMORY_SIZE", 11)?,
            prod: optional_parsed("PROD", true)?,
            request_timeout_secs: optional_parsed("REQUEST_TIMEOUT_SECS", 30)?,
        })
    }

    /// Derived ceiling as a fraction (`pod_load_max / 100`).
    pub fn pod_load_max_percent(&self) -> f64 {
        self.pod_load_max / 100.0
    }
}

fn required_string(name: &'static str) -> ConfigResult<String> {
    std::env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn optional_parsed<T>(name: &'static str, default: T) -> ConfigResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw.parse::<T>().map_err(|e| ConfigError::Invalid {
            name,
            value: raw,
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}
