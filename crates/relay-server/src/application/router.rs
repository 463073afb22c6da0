//! Message router: decides where one envelope goes.
//!
//! Resolution order:
//!
//! 1. `from == to`: dropped (anti-loopback), logged only.
//! 2. `to` is a registered **host**: published as [`RelayEvent::Message`]
//!    for the in-process owner of that identity.  No socket write.
//! 3. `to` is a registered **client**: `{from, data}` is encoded and written
//!    to that client's connection.
//! 4. Otherwise the originating connection gets a `not-found` signal; a
//!    programmatic send with no originating connection gets
//!    [`RelayError::DestinationNotFound`].
//!
//! Hosts are checked before clients because one identifier may be both, and
//! a message for a logical service must reach its in-process handler rather
//! than a same-named socket.

use relay_core::{encode_packet, Packet, Signal};
use tracing::{debug, warn};

use super::connection::ConnectionHandle;
use super::events::EventBus;
use super::registry::ConnectionRegistry;
use crate::domain::{Envelope, RelayEvent, RelayError};

/// What the router did with an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Self-addressed; dropped.
    Loopback,
    /// Published as an in-process host message.
    Host,
    /// Written to the destination client's connection.
    Client,
    /// Destination unknown; the originating connection was told.
    NotFound,
}

/// Routes envelopes using the registry for lookups.
pub struct MessageRouter<'a> {
    registry: &'a ConnectionRegistry,
    events: &'a EventBus,
}

impl<'a> MessageRouter<'a> {
    /// Creates a router over `registry` that publishes host messages on `events`.
    pub fn new(registry: &'a ConnectionRegistry, events: &'a EventBus) -> Self {
        Self { registry, events }
    }

    /// Routes `envelope`.  `origin` is the connection it arrived on, if any.
    ///
    /// # Errors
    ///
    /// - [`RelayError::DestinationNotFound`] when `to` is unknown and there
    ///   is no `origin` to notify.
    /// - [`RelayError::Decode`] when the delivered packet cannot be encoded
    ///   (an identifier longer than the wire format allows).
    pub fn route(
        &self,
        envelope: Envelope,
        origin: Option<&ConnectionHandle>,
    ) -> Result<RouteOutcome, RelayError> {
        if envelope.is_loopback() {
            debug!(identifier = %envelope.from, "refusing to send message to its own sender");
            return Ok(RouteOutcome::Loopback);
        }

        debug!(
            from = %envelope.from,
            to = %envelope.to,
            len = envelope.data.len(),
            "routing message"
        );

        if self.registry.has_host(&envelope.to) {
            self.events.publish(RelayEvent::Message(envelope));
            return Ok(RouteOutcome::Host);
        }

        if let Some(destination) = self.registry.get_client(&envelope.to) {
            let Envelope { from, to, data } = envelope;
            let packet = encode_packet(&Packet::delivered(from, data))?;
            if !destination.emit(Signal::Message(packet)) {
                warn!(to = %to, "destination connection closed before delivery");
            }
            return Ok(RouteOutcome::Client);
        }

        match origin {
            Some(connection) => {
                debug!(to = %envelope.to, "destination not found");
                connection.emit(Signal::NotFound(envelope.to));
                Ok(RouteOutcome::NotFound)
            }
            None => Err(RelayError::DestinationNotFound(envelope.to)),
        }
    }
}
