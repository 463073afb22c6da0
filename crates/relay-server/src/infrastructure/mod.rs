//! Infrastructure layer for relay-server.
//!
//! The infrastructure layer handles all I/O: accepting WebSocket connections
//! and reading the optional config file.
//!
//! # Responsibilities
//!
//! - Binding (or adopting) the TCP listener
//! - Performing the WebSocket upgrade and checking path and `from` parameter
//! - Spawning per-connection reader/writer tasks
//! - Stopping the accept loop when the relay is destroyed
//! - Loading the TOML config file
//!
//! # What does NOT belong here?
//!
//! - Routing, registration or presence decisions (application layer)
//! - Wire encoding (that is `relay-core`)

pub mod config_file;
pub mod ws_server;

pub use config_file::{load_config, ConfigError, ConfigFile};
pub use ws_server::{bind_listener, run_server, serve};
