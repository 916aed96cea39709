//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → AppConfig (validated, immutable)
//!     → BreakerConfig / QueuePublisher built from it at startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have documented defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::AppConfig;
pub use schema::BreakerSettings;
pub use schema::LogFormat;
pub use schema::ObservabilityConfig;
pub use schema::QueueConfig;
pub use validation::{validate_config, ValidationError};
