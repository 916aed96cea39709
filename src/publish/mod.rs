//! Change notification publishing.
//!
//! # Data Flow
//! ```text
//! Configuration saved (add/update/delete):
//!     → event.rs (ChangeEvent, JSON with Team/UpdateType/UpdateTime)
//!     → notifier.rs (circuit breaker admission)
//!     → publisher.rs (broker HTTP publish to the change queue)
//! ```
//!
//! # Design Decisions
//! - A failed or rejected notification is logged and returned, never fatal
//! - The publisher carries its own request deadline; the breaker adds none
//! - Messages are persistent (delivery mode 2) JSON

pub mod event;
pub mod notifier;
pub mod publisher;

pub use event::{ChangeEvent, UpdateType};
pub use notifier::ChangeNotifier;
pub use publisher::{PublishError, QueuePublisher};
