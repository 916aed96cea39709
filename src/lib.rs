//! Circuit-breaker-protected publishing of configuration change events.

pub mod config;
pub mod observability;
pub mod publish;
pub mod resilience;

pub use config::AppConfig;
pub use publish::{ChangeEvent, ChangeNotifier, QueuePublisher, UpdateType};
pub use resilience::{BreakerConfig, BreakerError, BreakerStatus, CircuitBreaker};
