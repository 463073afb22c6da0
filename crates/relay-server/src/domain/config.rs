//! Relay configuration types.
//!
//! [`RelayConfig`] is the single source of truth for all runtime settings.
//! It is built from CLI arguments and the optional TOML file by the binary,
//! or from [`Default`] in tests.  Nothing in here reads the environment.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use super::error::RelayError;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 24900;

/// Default presence debounce window.
pub const DEFAULT_PRESENCE_DEBOUNCE: Duration = Duration::from_millis(10);

/// Default interval between WebSocket keepalive pings.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(25);

/// Default largest inbound WebSocket message accepted (1 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1_048_576;

/// Default capacity of the relay event bus.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// All runtime configuration for the relay.
///
/// # Example
///
/// ```rust
/// use relay_server::domain::RelayConfig;
///
/// let cfg = RelayConfig::default();
/// assert_eq!(cfg.path, "/");
/// assert_eq!(cfg.bind_addr().unwrap().port(), 24900);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    /// Port to listen on.  `None` means the caller must supply an already
    /// bound listener instead.
    pub port: Option<u16>,

    /// Interface the listener binds to when `port` is used.
    pub bind_ip: IpAddr,

    /// Base path WebSocket upgrades must target.  Always starts with `/`.
    pub path: String,

    /// Window in which host-set changes are collapsed into one presence
    /// broadcast.
    pub presence_debounce: Duration,

    /// How often the relay pings each connection.
    pub ping_interval: Duration,

    /// Largest inbound WebSocket message accepted from a connection.
    pub max_frame_size: usize,

    /// Buffered notifications per event subscriber before it starts lagging.
    pub event_capacity: usize,
}

impl Default for RelayConfig {
    /// | Field             | Default         |
    /// |-------------------|-----------------|
    /// | port              | `Some(24900)`   |
    /// | bind_ip           | `0.0.0.0`       |
    /// | path              | `/`             |
    /// | presence_debounce | 10 ms           |
    /// | ping_interval     | 25 s            |
    /// | max_frame_size    | 1 MiB           |
    /// | event_capacity    | 1024            |
    fn default() -> Self {
        Self {
            port: Some(DEFAULT_PORT),
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            path: "/".to_string(),
            presence_debounce: DEFAULT_PRESENCE_DEBOUNCE,
            ping_interval: DEFAULT_PING_INTERVAL,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl RelayConfig {
    /// The address to bind when listening on `port`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Configuration`] when no port is configured.
    pub fn bind_addr(&self) -> Result<SocketAddr, RelayError> {
        self.port
            .map(|port| SocketAddr::new(self.bind_ip, port))
            .ok_or_else(|| RelayError::Configuration("expected \"server\" or \"port\"".to_string()))
    }

    /// Normalises `path` so it starts with exactly one `/` and carries no
    /// trailing slash (except for the root path itself).
    pub fn normalized_path(&self) -> String {
        normalize_path(&self.path)
    }

    /// Checks the settings that cannot be expressed in the types.
    ///
    /// `has_listener` says whether the caller supplies a pre-bound listener.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Configuration`] when neither a port nor a
    /// listener is available, or when a size, interval or capacity is zero.
    pub fn validate(&self, has_listener: bool) -> Result<(), RelayError> {
        if !has_listener && self.port.is_none() {
            return Err(RelayError::Configuration(
                "expected \"server\" or \"port\"".to_string(),
            ));
        }
        if self.max_frame_size == 0 {
            return Err(RelayError::Configuration(
                "max_frame_size must be greater than zero".to_string(),
            ));
        }
        if self.ping_interval.is_zero() {
            return Err(RelayError::Configuration(
                "ping_interval must be greater than zero".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(RelayError::Configuration(
                "event_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// See [`RelayConfig::normalized_path`].
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}")
    }
}
