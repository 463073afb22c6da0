//! Relay wire types: the routing envelope and the named connection signals.
//!
//! Two layers travel over every connection:
//!
//! - A [`Packet`] is the routing unit `{from, to, data}`.  Clients send
//!   packets with only `to` and `data` set (the relay stamps `from` itself);
//!   the relay delivers packets with only `from` and `data` set.
//! - A [`Signal`] is a named frame wrapped around a packet or a control
//!   notification (`error`, `not-found`, `presence`).  One WebSocket binary
//!   message carries exactly one encoded signal.

// ── Protocol constants ────────────────────────────────────────────────────────

/// Current protocol version byte, first byte of every packet and signal frame.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Size of the signal frame header: version (1) + type (1) + payload length (4).
pub const SIGNAL_HEADER_SIZE: usize = 6;

/// Minimum size of an encoded packet: version (1) + flags (1) + data length (4).
pub const PACKET_MIN_SIZE: usize = 6;

/// Longest identifier the length-prefixed string encoding can carry.
pub const MAX_IDENTIFIER_LEN: usize = u16::MAX as usize;

/// Packet flag bits.
pub mod packet_flags {
    /// The packet carries a `from` identifier.
    pub const HAS_FROM: u8 = 0b0000_0001;
    /// The packet carries a `to` identifier.
    pub const HAS_TO: u8 = 0b0000_0010;
    /// All bits the current version understands.
    pub const KNOWN: u8 = HAS_FROM | HAS_TO;
}

// ── Signal type codes ─────────────────────────────────────────────────────────

/// Type codes for the named signals exchanged with a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SignalType {
    /// An envelope (both directions).
    Message = 0x01,
    /// A frame the relay could not decode (relay → connection).
    Error = 0x02,
    /// The destination of a routed envelope is unknown (relay → connection).
    NotFound = 0x03,
    /// The current host list (relay → connection).
    Presence = 0x04,
    /// Ask for an immediate presence announcement (connection → relay).
    PresenceRequest = 0x05,
}

impl SignalType {
    /// Name of the signal as used in logs.
    pub fn name(self) -> &'static str {
        match self {
            SignalType::Message => "message",
            SignalType::Error => "error",
            SignalType::NotFound => "not-found",
            SignalType::Presence => "presence",
            SignalType::PresenceRequest => "presence-request",
        }
    }
}

impl TryFrom<u8> for SignalType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(SignalType::Message),
            0x02 => Ok(SignalType::Error),
            0x03 => Ok(SignalType::NotFound),
            0x04 => Ok(SignalType::Presence),
            0x05 => Ok(SignalType::PresenceRequest),
            _ => Err(()),
        }
    }
}

// ── Packet ────────────────────────────────────────────────────────────────────

/// The routing unit carried inside a [`Signal::Message`].
///
/// Both identifiers are optional on the wire: an inbound packet from a client
/// has no meaningful `from` (the relay never trusts it), and an outbound
/// packet delivered to a client has no `to` (the recipient is implied).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Packet {
    /// Sender identifier.
    pub from: Option<String>,
    /// Destination identifier.
    pub to: Option<String>,
    /// Opaque payload bytes.
    pub data: Vec<u8>,
}

impl Packet {
    /// Builds the packet a client sends: destination plus payload.
    pub fn addressed(to: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            from: None,
            to: Some(to.into()),
            data: data.into(),
        }
    }

    /// Builds the packet the relay delivers: sender plus payload.
    pub fn delivered(from: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            from: Some(from.into()),
            to: None,
            data: data.into(),
        }
    }
}

// ── Signal ────────────────────────────────────────────────────────────────────

/// A named frame exchanged between the relay and one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// An encoded [`Packet`].  Kept as raw bytes so the relay can reject a
    /// malformed packet and echo it back verbatim in an [`Signal::Error`].
    Message(Vec<u8>),

    /// The relay could not decode a frame from this connection.
    Error {
        /// Short human-readable reason.
        message: String,
        /// The offending frame, echoed back.
        data: Vec<u8>,
    },

    /// The identifier the connection tried to reach is not registered.
    NotFound(String),

    /// The full list of currently registered host identifiers.
    Presence(Vec<String>),

    /// The connection asks for an immediate presence announcement.
    PresenceRequest,
}

impl Signal {
    /// Returns the [`SignalType`] discriminant for this signal.
    pub fn signal_type(&self) -> SignalType {
        match self {
            Signal::Message(_) => SignalType::Message,
            Signal::Error { .. } => SignalType::Error,
            Signal::NotFound(_) => SignalType::NotFound,
            Signal::Presence(_) => SignalType::Presence,
            Signal::PresenceRequest => SignalType::PresenceRequest,
        }
    }
}
