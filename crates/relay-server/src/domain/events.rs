//! Notifications published by the relay.
//!
//! Subscribers receive these through [`crate::application::EventBus`]; each
//! variant is one topic.

use super::envelope::Envelope;

/// A notification about relay state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// A client identifier was registered for the first time.
    Connect(String),
    /// A registered client identifier went away.
    Disconnect(String),
    /// An envelope addressed to a registered host, for in-process delivery.
    Message(Envelope),
    /// The relay was destroyed.  Published exactly once.
    Destroy,
}

impl RelayEvent {
    /// Topic name, as used in logs.
    pub fn topic(&self) -> &'static str {
        match self {
            RelayEvent::Connect(_) => "connect",
            RelayEvent::Disconnect(_) => "disconnect",
            RelayEvent::Message(_) => "message",
            RelayEvent::Destroy => "destroy",
        }
    }
}
