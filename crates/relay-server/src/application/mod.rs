//! Application layer for relay-server.
//!
//! The application layer holds the relay's behaviour: it knows *what* happens
//! to a connection or an envelope, but never touches a socket.  Connections
//! are represented by [`ConnectionHandle`]s whose other end is owned by the
//! infrastructure layer.
//!
//! # Responsibilities
//!
//! - Tracking live clients and registered hosts ([`ConnectionRegistry`])
//! - Deciding where an envelope goes ([`MessageRouter`])
//! - Driving each connection through its states ([`ConnectionLifecycle`])
//! - Announcing the host list, debounced ([`PresencePublisher`])
//! - The server-level API ([`Relay`]) and in-process hosts ([`HostEndpoint`])
//!
//! # What does NOT belong here?
//!
//! - WebSocket handshakes and framing (infrastructure)
//! - Parsing CLI arguments or config files (`main.rs`, infrastructure)

pub mod connection;
pub mod events;
pub mod host;
pub mod lifecycle;
pub mod presence;
pub mod registry;
pub mod relay;
pub mod router;

pub use connection::{ConnectionHandle, ConnectionId, Outbound};
pub use events::EventBus;
pub use host::{HostEndpoint, Inbound};
pub use lifecycle::{ConnectionLifecycle, ConnectionState};
pub use presence::{PresencePublisher, PresenceTarget};
pub use registry::ConnectionRegistry;
pub use relay::Relay;
pub use router::{MessageRouter, RouteOutcome};
