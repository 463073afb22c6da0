//! Error taxonomy for the relay.

use relay_core::CodecError;
use thiserror::Error;

/// Errors produced by the relay's registry, router and lifecycle handling.
///
/// Per-connection errors never escape the connection's own task: they are
/// either turned into a signal sent back over that connection or logged.
/// Only programmatic callers of [`crate::application::Relay`] see them.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RelayError {
    /// Invalid startup options.  Fatal at construction.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A frame from a connection could not be decoded.
    #[error("invalid message: {0}")]
    Decode(#[from] CodecError),

    /// The inbound packet decoded but carries no destination.
    #[error("invalid message: packet has no destination")]
    MissingDestination,

    /// No host or client is registered under the destination identifier.
    #[error("client {0} not found")]
    DestinationNotFound(String),

    /// A connection arrived without the identifying `from` query parameter.
    #[error("connection has no identifier")]
    MissingIdentifier,

    /// The relay has been destroyed.
    #[error("relay has been destroyed")]
    Destroyed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_not_found_names_identifier() {
        let err = RelayError::DestinationNotFound("ghost".to_string());
        assert_eq!(err.to_string(), "client ghost not found");
    }

    #[test]
    fn test_codec_error_converts_into_decode() {
        let err: RelayError = CodecError::UnsupportedVersion(9).into();
        assert!(matches!(err, RelayError::Decode(CodecError::UnsupportedVersion(9))));
    }
}
