//! In-process host endpoint.
//!
//! A [`HostEndpoint`] is the hand-off point between the relay and an
//! application that owns one host identifier.  It registers the identifier,
//! filters the relay's event stream down to what concerns that host, and sends
//! on the host's behalf.
//!
//! Delivery is unreliable: sends to unknown destinations are dropped, and a
//! subscriber that falls more than the event-bus capacity behind loses the
//! oldest events.  Any retry or acknowledgement scheme belongs above this
//! layer.

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use super::relay::Relay;
use crate::domain::{Envelope, RelayEvent};

/// What a host endpoint receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A message addressed to this host.
    Message { from: String, data: Vec<u8> },
    /// A client connected to the relay.
    Connect(String),
    /// A client disconnected from the relay.
    Disconnect(String),
}

/// One in-process host identity attached to a relay.
pub struct HostEndpoint {
    relay: Relay,
    identifier: String,
    events: broadcast::Receiver<RelayEvent>,
    /// Whether this endpoint's attach added the host; only then does closing
    /// remove it.
    owns_host: bool,
    closed: bool,
}

impl HostEndpoint {
    /// Registers `identifier` as a host on `relay` and starts listening.
    ///
    /// Attaching an identifier that is already a host shares its traffic, but
    /// the registration stays with whoever added it: closing this endpoint
    /// then leaves the host in place.
    pub fn attach(relay: &Relay, identifier: impl Into<String>) -> Self {
        let identifier = identifier.into();
        // Subscribe first so nothing published right after registration is missed.
        let events = relay.subscribe();
        let owns_host = relay.add_host(&identifier);
        debug!(identifier = %identifier, owns_host, "host endpoint attached");

        Self {
            relay: relay.clone(),
            identifier,
            events,
            owns_host,
            closed: false,
        }
    }

    /// The host identifier this endpoint owns.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Waits for the next inbound item.
    ///
    /// Returns `None` once the endpoint is closed or the relay is destroyed.
    pub async fn recv(&mut self) -> Option<Inbound> {
        while !self.closed {
            match self.events.recv().await {
                Ok(RelayEvent::Message(envelope)) if envelope.to == self.identifier => {
                    return Some(Inbound::Message {
                        from: envelope.from,
                        data: envelope.data,
                    });
                }
                Ok(RelayEvent::Message(_)) => {}
                Ok(RelayEvent::Connect(id)) => return Some(Inbound::Connect(id)),
                Ok(RelayEvent::Disconnect(id)) => return Some(Inbound::Disconnect(id)),
                Ok(RelayEvent::Destroy) | Err(RecvError::Closed) => {
                    self.closed = true;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(identifier = %self.identifier, skipped, "host endpoint lagged; events dropped");
                }
            }
        }
        None
    }

    /// Sends `data` to `to` as this host.
    ///
    /// Only known destinations (a connected client or a registered host) are
    /// attempted.  Returns `true` if the relay accepted the envelope.
    pub fn send(&self, to: &str, data: impl Into<Vec<u8>>) -> bool {
        if self.closed || !(self.relay.has_client(to) || self.relay.has_host(to)) {
            debug!(from = %self.identifier, to, "dropping send to unknown destination");
            return false;
        }
        match self
            .relay
            .send(Envelope::new(self.identifier.as_str(), to, data))
        {
            Ok(_) => true,
            Err(e) => {
                debug!(from = %self.identifier, to, error = %e, "host send failed");
                false
            }
        }
    }

    /// Ends the inbound stream and removes the host registration if this
    /// endpoint added it.
    ///
    /// Returns `true` on the first call only.
    pub fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        if self.owns_host {
            self.relay.remove_host(&self.identifier);
        }
        debug!(identifier = %self.identifier, "host endpoint closed");
        true
    }

    /// `true` once closed or once the relay's destroy was observed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for HostEndpoint {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for HostEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostEndpoint")
            .field("identifier", &self.identifier)
            .field("owns_host", &self.owns_host)
            .field("closed", &self.closed)
            .finish()
    }
}
