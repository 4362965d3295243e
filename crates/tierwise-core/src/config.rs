//! Pipeline configuration.
//!
//! Defaults mirror what the pipelines were tuned with: 30 s per escalation
//! tier and report call, a fan-out of four concurrent subtasks, and
//! `"No disponible"` as the marker for fields nobody could fill. Hosts can
//! overlay `TIERWISE_*` environment variables with [`PipelineConfig::from_env`].

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::delegation::CoveragePolicy;

pub const ENV_TIER_TIMEOUT_MS: &str = "TIERWISE_TIER_TIMEOUT_MS";
pub const ENV_REPORT_TIMEOUT_MS: &str = "TIERWISE_REPORT_TIMEOUT_MS";
pub const ENV_WORKER_TIMEOUT_MS: &str = "TIERWISE_WORKER_TIMEOUT_MS";
pub const ENV_COORDINATOR_TIMEOUT_MS: &str = "TIERWISE_COORDINATOR_TIMEOUT_MS";
pub const ENV_MAX_IN_FLIGHT: &str = "TIERWISE_MAX_IN_FLIGHT";
pub const ENV_UNAVAILABLE_MARKER: &str = "TIERWISE_UNAVAILABLE_MARKER";
pub const ENV_MIN_SUBTASKS: &str = "TIERWISE_MIN_SUBTASKS";
pub const ENV_MIN_CATEGORIES: &str = "TIERWISE_MIN_CATEGORIES";

/// Marker written into report fields with no discoverable value.
pub const DEFAULT_UNAVAILABLE_MARKER: &str = "No disponible";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}' ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("escalation requires at least one tier")]
    NoTiers,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub tier_timeout_ms: u64,
    pub report_timeout_ms: u64,
    pub worker_timeout_ms: u64,
    pub coordinator_timeout_ms: u64,
    /// Maximum delegated subtasks in flight at once.
    pub max_in_flight: usize,
    pub unavailable_marker: String,
    pub coverage: CoveragePolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tier_timeout_ms: 30_000,
            report_timeout_ms: 30_000,
            worker_timeout_ms: 120_000,
            coordinator_timeout_ms: 900_000,
            max_in_flight: 4,
            unavailable_marker: DEFAULT_UNAVAILABLE_MARKER.to_string(),
            coverage: CoveragePolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// Defaults overlaid with any `TIERWISE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parsed(&lookup, ENV_TIER_TIMEOUT_MS)? {
            config.tier_timeout_ms = v;
        }
        if let Some(v) = parsed(&lookup, ENV_REPORT_TIMEOUT_MS)? {
            config.report_timeout_ms = v;
        }
        if let Some(v) = parsed(&lookup, ENV_WORKER_TIMEOUT_MS)? {
            config.worker_timeout_ms = v;
        }
        if let Some(v) = parsed(&lookup, ENV_COORDINATOR_TIMEOUT_MS)? {
            config.coordinator_timeout_ms = v;
        }
        if let Some(v) = parsed(&lookup, ENV_MAX_IN_FLIGHT)? {
            config.max_in_flight = v;
        }
        if let Some(marker) = lookup(ENV_UNAVAILABLE_MARKER) {
            config.unavailable_marker = marker;
        }
        if let Some(v) = parsed(&lookup, ENV_MIN_SUBTASKS)? {
            config.coverage.min_subtasks = v;
        }
        if let Some(v) = parsed(&lookup, ENV_MIN_CATEGORIES)? {
            config.coverage.min_categories = v;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let timeouts = [
            ("tier_timeout_ms", self.tier_timeout_ms),
            ("report_timeout_ms", self.report_timeout_ms),
            ("worker_timeout_ms", self.worker_timeout_ms),
            ("coordinator_timeout_ms", self.coordinator_timeout_ms),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }
        if self.max_in_flight == 0 {
            return Err(ConfigError::Zero("max_in_flight"));
        }
        Ok(())
    }

    pub fn tier_timeout(&self) -> Duration {
        Duration::from_millis(self.tier_timeout_ms)
    }

    pub fn report_timeout(&self) -> Duration {
        Duration::from_millis(self.report_timeout_ms)
    }

    pub fn worker_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_timeout_ms)
    }

    pub fn coordinator_timeout(&self) -> Duration {
        Duration::from_millis(self.coordinator_timeout_ms)
    }
}

fn parsed<F, T>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}
