//! relay-server library crate.
//!
//! An identifier-addressed message relay.  Peers connect over WebSocket and
//! name themselves with a `from` query parameter; the relay forwards opaque
//! payloads between them by identifier.  Some identifiers are *hosts*:
//! services that live inside the relay process and receive their messages as
//! events instead of socket writes.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Clients (binary frames over WebSocket)
//!         ↕
//! [relay-server]
//!   ├── domain/           Pure types: RelayConfig, Envelope, RelayEvent, RelayError
//!   ├── application/      Registry, router, lifecycle, presence, Relay facade, hosts
//!   └── infrastructure/
//!         ├── ws_server/   Accept loop + per-connection reader/writer (tokio-tungstenite)
//!         └── config_file/ Optional TOML config
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async runtime.
//! - `application` depends on `domain` and `relay-core`; it talks to
//!   connections only through channel-backed handles.
//! - `infrastructure` depends on all other layers plus `tokio-tungstenite`.
//!
//! # Embedding
//!
//! ```rust,no_run
//! use relay_server::application::{HostEndpoint, Inbound, Relay};
//! use relay_server::domain::RelayConfig;
//! use relay_server::infrastructure::run_server;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let relay = Relay::new(RelayConfig::default());
//! let mut svc = HostEndpoint::attach(&relay, "svc");
//! tokio::spawn(run_server(relay.clone(), None));
//!
//! // Echo service.
//! while let Some(inbound) = svc.recv().await {
//!     if let Inbound::Message { from, data } = inbound {
//!         svc.send(&from, data);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

/// Domain layer: plain types (no I/O).
pub mod domain;

/// Application layer: relay behaviour.
pub mod application;

/// Infrastructure layer: WebSocket server and config file.
pub mod infrastructure;

pub use application::{HostEndpoint, Inbound, Relay, RouteOutcome};
pub use domain::{Envelope, RelayConfig, RelayError, RelayEvent};
