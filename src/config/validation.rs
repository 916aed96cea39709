//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (threshold >= 1, durations > 0)
//! - Check that endpoints and addresses parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>

use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::AppConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("breaker.fail_threshold must be at least 1")]
    ZeroFailThreshold,

    #[error("breaker.open_duration_secs must be greater than 0")]
    ZeroOpenDuration,

    #[error("breaker.name must not be empty")]
    EmptyBreakerName,

    #[error("queue.url is not a valid http(s) URL: {0}")]
    InvalidQueueUrl(String),

    #[error("queue.queue must not be empty")]
    EmptyQueueName,

    #[error("queue.request_timeout_secs must be greater than 0")]
    ZeroRequestTimeout,

    #[error("observability.metrics_address is not a socket address: {0}")]
    InvalidMetricsAddress(String),
}

/// Check an [`AppConfig`], collecting every problem found.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let breaker = &config.breaker;
    if breaker.fail_threshold == 0 {
        errors.push(ValidationError::ZeroFailThreshold);
    }
    if breaker.open_duration_secs == 0 {
        errors.push(ValidationError::ZeroOpenDuration);
    }
    if breaker.name.trim().is_empty() {
        errors.push(ValidationError::EmptyBreakerName);
    }

    let queue = &config.queue;
    match Url::parse(&queue.url) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        _ => errors.push(ValidationError::InvalidQueueUrl(queue.url.clone())),
    }
    if queue.queue.trim().is_empty() {
        errors.push(ValidationError::EmptyQueueName);
    }
    if queue.request_timeout_secs == 0 {
        errors.push(ValidationError::ZeroRequestTimeout);
    }

    let observability = &config.observability;
    if observability.metrics_enabled
        && observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
