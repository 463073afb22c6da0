//! Optional TOML configuration file for the relay binary.
//!
//! Every field has a default, so an empty file (or no file at all) is valid:
//!
//! ```toml
//! [server]
//! port = 24900
//! bind_host = "0.0.0.0"
//! path = "/"
//!
//! [relay]
//! presence_debounce_ms = 10
//! hosts = ["svc"]
//!
//! [transport]
//! ping_interval_secs = 25
//! max_frame_size = 1048576
//! ```
//!
//! Command-line flags override whatever is loaded here; the merge happens in
//! `main.rs`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::config::{
    DEFAULT_EVENT_CAPACITY, DEFAULT_MAX_FRAME_SIZE, DEFAULT_PING_INTERVAL, DEFAULT_PORT,
    DEFAULT_PRESENCE_DEBOUNCE,
};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

// ── Schema ───────────────────────────────────────────────────────────────────

/// Top-level layout of the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub relay: RelaySection,
    #[serde(default)]
    pub transport: TransportSection,
}

/// `[server]`: where to listen.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Interface to bind.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_host")]
    pub bind_host: String,
    /// Base path WebSocket upgrades must target.
    #[serde(default = "default_path")]
    pub path: String,
}

/// `[relay]`: routing behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelaySection {
    #[serde(default = "default_presence_debounce_ms")]
    pub presence_debounce_ms: u64,
    /// Host identifiers to register at startup.
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

/// `[transport]`: WebSocket tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransportSection {
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    /// Largest inbound WebSocket message, in bytes.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

// ── Default helpers ──────────────────────────────────────────────────────────

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}
fn default_path() -> String {
    "/".to_string()
}
fn default_presence_debounce_ms() -> u64 {
    DEFAULT_PRESENCE_DEBOUNCE.as_millis() as u64
}
fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}
fn default_ping_interval_secs() -> u64 {
    DEFAULT_PING_INTERVAL.as_secs()
}
fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_host: default_bind_host(),
            path: default_path(),
        }
    }
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            presence_debounce_ms: default_presence_debounce_ms(),
            hosts: Vec::new(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            ping_interval_secs: default_ping_interval_secs(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────────────────

/// Loads the config file at `path`, returning [`ConfigFile::default()`] if it
/// does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<ConfigFile, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => parse_config(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "config file not found; using defaults");
            Ok(ConfigFile::default())
        }
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Parses config TOML text.
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] if the TOML is malformed.
pub fn parse_config(content: &str) -> Result<ConfigFile, ConfigError> {
    Ok(toml::from_str(content)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_yields_defaults() {
        let cfg = parse_config("").unwrap();
        assert_eq!(cfg, ConfigFile::default());
        assert_eq!(cfg.server.port, 24900);
        assert_eq!(cfg.relay.presence_debounce_ms, 10);
        assert_eq!(cfg.transport.ping_interval_secs, 25);
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        // Arrange
        let text = r#"
            [server]
            port = 8080

            [relay]
            hosts = ["svc", "billing"]
        "#;

        // Act
        let cfg = parse_config(text).unwrap();

        // Assert
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.server.path, "/");
        assert_eq!(cfg.relay.hosts, vec!["svc", "billing"]);
        assert_eq!(cfg.transport.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let result = parse_config("[server\nport = ");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_wrong_type_is_parse_error() {
        let result = parse_config("[server]\nport = \"eighty\"");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let path = std::env::temp_dir().join(format!("relay-missing-{}.toml", uuid::Uuid::new_v4()));
        assert_eq!(load_config(&path).unwrap(), ConfigFile::default());
    }

    #[test]
    fn test_load_reads_file_from_disk() {
        let path = std::env::temp_dir().join(format!("relay-config-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "[transport]\nping_interval_secs = 5\n").unwrap();

        let cfg = load_config(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(cfg.transport.ping_interval_secs, 5);
    }

    #[test]
    fn test_default_serializes_to_parseable_toml() {
        let text = toml::to_string_pretty(&ConfigFile::default()).unwrap();
        assert_eq!(parse_config(&text).unwrap(), ConfigFile::default());
    }
}
