//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.

use std::num::NonZeroU32;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::validation::ValidationError;
use crate::resilience::circuit_breaker::{
    BreakerConfig, DEFAULT_FAIL_THRESHOLD, DEFAULT_OPEN_DURATION, DEFAULT_SUCCESS_WINDOW,
};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Circuit breaker guarding the queue publish.
    pub breaker: BreakerSettings,

    /// Message broker endpoint and target queue.
    pub queue: QueueConfig,

    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,
}

/// Circuit breaker settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerSettings {
    /// Breaker identifier for logs/metrics.
    pub name: String,

    /// Consecutive failures before the circuit opens (>= 1).
    pub fail_threshold: u32,

    /// Seconds the circuit stays open before a probe is allowed.
    pub open_duration_secs: u64,

    /// Seconds without failure needed to confirm recovery.
    pub success_window_secs: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            name: "queue-publish".to_string(),
            fail_threshold: DEFAULT_FAIL_THRESHOLD,
            open_duration_secs: DEFAULT_OPEN_DURATION.as_secs(),
            success_window_secs: DEFAULT_SUCCESS_WINDOW.as_secs(),
        }
    }
}

impl TryFrom<&BreakerSettings> for BreakerConfig {
    type Error = ValidationError;

    fn try_from(settings: &BreakerSettings) -> Result<Self, Self::Error> {
        let fail_threshold =
            NonZeroU32::new(settings.fail_threshold).ok_or(ValidationError::ZeroFailThreshold)?;
        Ok(BreakerConfig::new(
            settings.name.clone(),
            fail_threshold,
            Duration::from_secs(settings.open_duration_secs),
            Duration::from_secs(settings.success_window_secs),
        ))
    }
}

/// Message broker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Base URL of the broker's HTTP API (e.g., "http://localhost:15672").
    pub url: String,

    /// Virtual host the queue lives in.
    pub vhost: String,

    /// Queue that receives change notifications.
    pub queue: String,

    /// Basic auth user.
    pub username: String,

    /// Basic auth password.
    pub password: String,

    /// Deadline for a single publish request in seconds.
    pub request_timeout_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:15672".to_string(),
            vhost: "/".to_string(),
            queue: "config-updates".to_string(),
            username: "guest".to_string(),
            password: "guest".to_string(),
            request_timeout_secs: 5,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Pretty for development, JSON for production.
    pub log_format: LogFormat,

    /// Enable the Prometheus scrape endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
