//! The routing unit handled by the relay.

/// `{from, to, data}`: one message the relay is asked to route.
///
/// `from` is always the identifier the relay authenticated for the sending
/// connection (or the host identifier of an in-process sender).  It is never
/// taken from the inbound payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Sender identifier.
    pub from: String,
    /// Destination identifier.
    pub to: String,
    /// Opaque payload bytes.
    pub data: Vec<u8>,
}

impl Envelope {
    /// Creates a new envelope.
    pub fn new(from: impl Into<String>, to: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            data: data.into(),
        }
    }

    /// `true` when the envelope is addressed to its own sender.
    pub fn is_loopback(&self) -> bool {
        self.from == self.to
    }
}
