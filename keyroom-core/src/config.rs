//! Synchronizer configuration
//!
//! Tunables for latency sampling and delay compensation. Defaults come from
//! observed behaviour in small piano rooms; every value can be overridden from
//! JSON or from `KEYROOM_*` environment variables.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Peers averaging above this are left out of the shared baseline (ms)
const DEFAULT_MAX_LATENCY_CUTOFF_MS: f64 = 100.0;

/// Compensating delays below this are imperceptible and collapse to 0 (ms)
const DEFAULT_MIN_LATENCY_CUTOFF_MS: f64 = 15.0;

/// Ping rate per peer
const DEFAULT_SAMPLES_PER_MINUTE: u32 = 500;

/// How much history the rolling average covers
const DEFAULT_SMOOTHING_WINDOW_SECONDS: f64 = 2.0;

const ENV_MAX_LATENCY_CUTOFF_MS: &str = "KEYROOM_MAX_LATENCY_CUTOFF_MS";
const ENV_MIN_LATENCY_CUTOFF_MS: &str = "KEYROOM_MIN_LATENCY_CUTOFF_MS";
const ENV_SAMPLES_PER_MINUTE: &str = "KEYROOM_SAMPLES_PER_MINUTE";
const ENV_SMOOTHING_WINDOW_SECONDS: &str = "KEYROOM_SMOOTHING_WINDOW_SECONDS";

/// Configuration errors. These indicate programming or deployment mistakes
/// and are reported at construction time.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Rolling window capacity must be at least 1")]
    ZeroCapacity,

    #[error("Samples per minute must be at least 1")]
    InvalidSampleRate,

    #[error("Smoothing window must be a positive number of seconds, got {0}")]
    InvalidSmoothingWindow(f64),

    #[error("{name} must be a finite, non-negative number of milliseconds, got {value}")]
    InvalidCutoff { name: &'static str, value: f64 },

    #[error("Min latency cutoff ({min}ms) exceeds max latency cutoff ({max}ms)")]
    CutoffOrder { min: f64, max: f64 },

    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for {key}: {value:?}")]
    InvalidEnv { key: &'static str, value: String },
}

/// Latency synchronizer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Peers whose rolling average exceeds this are excluded from the shared
    /// baseline instead of dragging everyone's delay up
    pub max_latency_cutoff_ms: f64,
    /// Computed delays below this floor are returned as 0
    pub min_latency_cutoff_ms: f64,
    /// Pings sent to each peer per minute; drives the tick interval
    pub samples_per_minute: u32,
    /// Seconds of samples covered by each peer's rolling window
    pub smoothing_window_seconds: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_latency_cutoff_ms: DEFAULT_MAX_LATENCY_CUTOFF_MS,
            min_latency_cutoff_ms: DEFAULT_MIN_LATENCY_CUTOFF_MS,
            samples_per_minute: DEFAULT_SAMPLES_PER_MINUTE,
            smoothing_window_seconds: DEFAULT_SMOOTHING_WINDOW_SECONDS,
        }
    }
}

impl SyncConfig {
    /// Parse a config from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `KEYROOM_*` environment overrides on top of this config
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_MAX_LATENCY_CUTOFF_MS) {
            self.max_latency_cutoff_ms = parse_env(ENV_MAX_LATENCY_CUTOFF_MS, value)?;
        }
        if let Some(value) = lookup(ENV_MIN_LATENCY_CUTOFF_MS) {
            self.min_latency_cutoff_ms = parse_env(ENV_MIN_LATENCY_CUTOFF_MS, value)?;
        }
        if let Some(value) = lookup(ENV_SAMPLES_PER_MINUTE) {
            self.samples_per_minute = parse_env(ENV_SAMPLES_PER_MINUTE, value)?;
        }
        if let Some(value) = lookup(ENV_SMOOTHING_WINDOW_SECONDS) {
            self.smoothing_window_seconds = parse_env(ENV_SMOOTHING_WINDOW_SECONDS, value)?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Check every field, failing on the first invalid one
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.samples_per_minute == 0 {
            return Err(ConfigError::InvalidSampleRate);
        }
        if !self.smoothing_window_seconds.is_finite() || self.smoothing_window_seconds <= 0.0 {
            return Err(ConfigError::InvalidSmoothingWindow(
                self.smoothing_window_seconds,
            ));
        }
        check_cutoff("max_latency_cutoff_ms", self.max_latency_cutoff_ms)?;
        check_cutoff("min_latency_cutoff_ms", self.min_latency_cutoff_ms)?;
        if self.min_latency_cutoff_ms > self.max_latency_cutoff_ms {
            return Err(ConfigError::CutoffOrder {
                min: self.min_latency_cutoff_ms,
                max: self.max_latency_cutoff_ms,
            });
        }
        Ok(())
    }

    /// Time between ticks (60000 / samples_per_minute ms)
    pub fn tick_interval(&self) -> Duration {
        let per_minute = u64::from(self.samples_per_minute.max(1));
        Duration::from_micros(60_000_000 / per_minute)
    }

    /// Number of samples each peer's rolling window holds, at least 1
    pub fn window_capacity(&self) -> usize {
        let samples = self.samples_per_minute as f64 / 60.0 * self.smoothing_window_seconds;
        if samples.is_finite() && samples >= 1.0 {
            samples.floor() as usize
        } else {
            1
        }
    }
}

fn check_cutoff(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidCutoff { name, value })
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { key, value })
}
