//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Breaker and notifier produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters and gauges)
//!
//! Consumers:
//!     → stderr (pretty or JSON)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Every breaker event carries the breaker name
//! - Metric updates are fire-and-forget; with no recorder installed they are no-ops

pub mod logging;
pub mod metrics;
