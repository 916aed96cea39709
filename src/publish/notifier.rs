//! Breaker-protected change notifications.

use crate::observability::metrics;
use crate::publish::event::ChangeEvent;
use crate::publish::publisher::{PublishError, QueuePublisher};
use crate::resilience::{BreakerConfig, BreakerError, CircuitBreaker};

/// Sends change events to the queue through a circuit breaker.
///
/// One notifier lives for the whole process and is shared by every caller
/// that reports configuration changes.
#[derive(Debug)]
pub struct ChangeNotifier {
    breaker: CircuitBreaker<QueuePublisher>,
}

impl ChangeNotifier {
    pub fn new(config: BreakerConfig, publisher: QueuePublisher) -> Self {
        Self {
            breaker: CircuitBreaker::new(config, publisher),
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker<QueuePublisher> {
        &self.breaker
    }

    /// Publish `event`. Failures are logged and returned to the caller.
    pub async fn notify(&self, event: ChangeEvent) -> Result<(), BreakerError<PublishError>> {
        let team = event.team.clone();
        let update_type = event.update_type;
        let config_name = event.config_name().map(str::to_owned);

        match self.breaker.execute(event).await {
            Ok(()) => {
                tracing::info!(
                    team = %team,
                    update_type = update_type.as_str(),
                    config_name = ?config_name,
                    "Change notification published"
                );
                metrics::record_notifier_event(update_type.as_str(), "published");
                Ok(())
            }
            Err(BreakerError::FastFailed) => {
                tracing::warn!(
                    team = %team,
                    update_type = update_type.as_str(),
                    config_name = ?config_name,
                    breaker = %self.breaker.name(),
                    "Change notification dropped, queue circuit open"
                );
                metrics::record_notifier_event(update_type.as_str(), "fast_failed");
                Err(BreakerError::FastFailed)
            }
            Err(e @ BreakerError::OperationFailed(_)) => {
                tracing::error!(
                    team = %team,
                    update_type = update_type.as_str(),
                    config_name = ?config_name,
                    error = %e,
                    "Change notification failed"
                );
                metrics::record_notifier_event(update_type.as_str(), "failed");
                Err(e)
            }
        }
    }
}
