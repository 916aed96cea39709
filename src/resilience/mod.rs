//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Caller (e.g. change notifier):
//!     → circuit_breaker.rs (admit, fast-fail or probe)
//!     → operation.rs (the protected call, e.g. a queue publish)
//!     → circuit_breaker.rs (record outcome, trip or recover)
//! ```
//!
//! # Design Decisions
//! - The breaker never retries; retry policy belongs to the caller
//! - The breaker adds no timeout; the wrapped operation owns its deadline
//! - Failures are returned to the caller, never escalated

pub mod circuit_breaker;
pub mod operation;

pub use circuit_breaker::{
    BreakerConfig, BreakerError, BreakerSnapshot, BreakerStatus, CircuitBreaker,
};
pub use operation::{operation_fn, Operation, OperationFn};
