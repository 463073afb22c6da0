//! Domain layer for relay-server.
//!
//! The domain layer contains plain types with no I/O and no async runtime:
//!
//! - Runtime configuration ([`RelayConfig`])
//! - The routing envelope ([`Envelope`])
//! - The notifications the relay publishes ([`RelayEvent`])
//! - The error taxonomy ([`RelayError`])

pub mod config;
pub mod envelope;
pub mod error;
pub mod events;

pub use config::RelayConfig;
pub use envelope::Envelope;
pub use error::RelayError;
pub use events::RelayEvent;
