//! Connection lifecycle handler: the per-connection state machine.
//!
//! ```text
//!                 identifier present
//! Unidentified ───────────────────────▶ Registered ──disconnect──▶ Disconnected
//!      │                                    ▲                          │
//!      │ identifier missing                 └──────── reconnect ───────┘
//!      ▼
//!  (closed, terminal)
//! ```
//!
//! The transport drives one [`ConnectionLifecycle`] per physical link and
//! feeds it events in the order they arrive on that link:
//! [`on_connect`](ConnectionLifecycle::on_connect) once,
//! [`on_frame`](ConnectionLifecycle::on_frame) per inbound binary message,
//! [`on_disconnect`](ConnectionLifecycle::on_disconnect) when the link ends.
//!
//! Everything the handler needs to know about its link lives in this record
//! (identifier, state, handle); nothing is captured in closures.

use std::fmt;
use std::sync::Arc;

use relay_core::{decode_packet, decode_signal, Signal};
use tracing::{debug, info, trace, warn};

use super::connection::ConnectionHandle;
use super::presence::PresenceTarget;
use super::relay::Relay;
use crate::domain::{Envelope, RelayError, RelayEvent};

/// Reason sent back in the `error` signal for an undecodable frame.
pub const INVALID_MESSAGE: &str = "invalid message";

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connected but not (yet) identified.
    Unidentified,
    /// Identified; frames are decoded and routed.
    Registered,
    /// The link went away; frames are ignored.
    Disconnected,
    /// Rejected for lack of an identifier; nothing more happens.
    Closed,
}

/// State record and event handlers for one physical link.
pub struct ConnectionLifecycle {
    relay: Relay,
    handle: Arc<ConnectionHandle>,
    /// Identifier offered in the handshake; kept for re-entry on reconnect.
    offered: Option<String>,
    /// Identifier held while registered; `None` once disconnected.
    identifier: Option<String>,
    state: ConnectionState,
}

impl ConnectionLifecycle {
    /// Creates the record for a freshly accepted link.
    ///
    /// `offered` is the identifier taken from the connection's handshake
    /// parameters; empty strings count as absent.
    pub fn new(relay: Relay, handle: Arc<ConnectionHandle>, offered: Option<String>) -> Self {
        Self {
            relay,
            handle,
            offered: offered.filter(|id| !id.is_empty()),
            identifier: None,
            state: ConnectionState::Unidentified,
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Identifier held while registered.
    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    /// The link's handle.
    pub fn handle(&self) -> &Arc<ConnectionHandle> {
        &self.handle
    }

    /// Handles the transport's connect event.
    ///
    /// # Errors
    ///
    /// - [`RelayError::MissingIdentifier`]: no identifier was offered; the
    ///   transport has been asked to close and the record is terminal.
    /// - [`RelayError::Destroyed`]: the relay is shutting down; the
    ///   transport has been asked to close.
    pub fn on_connect(&mut self) -> Result<(), RelayError> {
        if self.state != ConnectionState::Unidentified {
            return Ok(());
        }

        if self.relay.is_destroyed() {
            self.handle.disconnect(true);
            self.state = ConnectionState::Closed;
            return Err(RelayError::Destroyed);
        }

        let Some(identifier) = self.offered.clone() else {
            debug!(conn = %self.handle.id(), "disconnecting connection without `from` query param");
            self.handle.disconnect(false);
            self.state = ConnectionState::Closed;
            return Err(RelayError::MissingIdentifier);
        };

        if !self.relay.registry().track_connection(Arc::clone(&self.handle)) {
            // Lost a race with destroy.
            self.handle.disconnect(true);
            self.state = ConnectionState::Closed;
            return Err(RelayError::Destroyed);
        }

        self.identifier = Some(identifier);
        self.state = ConnectionState::Registered;
        self.register();
        Ok(())
    }

    /// Handles one inbound binary frame.
    ///
    /// Undecodable frames are answered with an `error` signal carrying the
    /// frame and otherwise ignored; the connection stays open.
    pub fn on_frame(&mut self, frame: &[u8]) {
        if self.state != ConnectionState::Registered || self.relay.is_destroyed() {
            trace!(conn = %self.handle.id(), state = ?self.state, "ignoring frame");
            return;
        }

        let signal = match decode_signal(frame) {
            Ok(signal) => signal,
            Err(e) => return self.reject(frame, &RelayError::Decode(e)),
        };

        match signal {
            Signal::Message(inner) => self.on_message(frame, &inner),
            Signal::PresenceRequest => {
                self.relay
                    .presence()
                    .announce(PresenceTarget::One(self.handle.as_ref()));
            }
            other => {
                warn!(
                    conn = %self.handle.id(),
                    signal = other.signal_type().name(),
                    "unexpected signal from connection"
                );
                self.reject_with(frame, "unexpected signal");
            }
        }
    }

    /// Handles a transport-level error on the link: logs it and asks the
    /// transport to disconnect.  The disconnect itself arrives later through
    /// [`on_disconnect`](Self::on_disconnect).
    pub fn on_transport_error(&mut self, error: &dyn fmt::Display) {
        warn!(
            conn = %self.handle.id(),
            identifier = self.identifier.as_deref().unwrap_or("-"),
            %error,
            "disconnecting, connection experienced an error"
        );
        self.handle.disconnect(false);
    }

    /// Handles the transport's disconnect event.  Idempotent.
    ///
    /// The link is always forgotten.  Beyond that nothing happens while the
    /// relay is being destroyed (the registry is torn down wholesale) or when
    /// no identifier is held.
    pub fn on_disconnect(&mut self) {
        self.relay.registry().untrack_connection(self.handle.id());
        if self.relay.is_destroyed() {
            return;
        }
        let Some(identifier) = self.identifier.take() else {
            return;
        };

        self.state = ConnectionState::Disconnected;
        if self
            .relay
            .registry()
            .unregister_connection(&identifier, self.handle.id())
        {
            info!(identifier = %identifier, "disconnected");
            self.relay
                .events()
                .publish(RelayEvent::Disconnect(identifier));
        } else {
            debug!(identifier = %identifier, conn = %self.handle.id(), "duplicate connection closed");
        }
    }

    /// Re-enters the lifecycle from the top after a disconnect on the same
    /// link.  A no-op in any other state.
    ///
    /// The WebSocket transport never reuses a link, so this path only exists
    /// for transports that can resume a logical session on the same object.
    ///
    /// # Errors
    ///
    /// Same as [`on_connect`](Self::on_connect).
    pub fn on_reconnect(&mut self) -> Result<(), RelayError> {
        if self.state != ConnectionState::Disconnected {
            return Ok(());
        }
        debug!(conn = %self.handle.id(), "connection reconnected");
        self.state = ConnectionState::Unidentified;
        self.on_connect()
    }

    // ── Internals ────────────────────────────────────────────────────────────

    fn register(&self) {
        if let Some(identifier) = &self.identifier {
            self.relay
                .registry()
                .register_client(identifier, Arc::clone(&self.handle));
        }
    }

    fn on_message(&mut self, frame: &[u8], inner: &[u8]) {
        let packet = match decode_packet(inner) {
            Ok(packet) => packet,
            Err(e) => return self.reject(frame, &RelayError::Decode(e)),
        };
        let Some(to) = packet.to else {
            return self.reject(frame, &RelayError::MissingDestination);
        };
        let Some(from) = self.identifier.clone() else {
            return;
        };

        // The link may have raced a disconnect of a previous link under the
        // same identifier; registration is idempotent.
        self.register();

        let envelope = Envelope {
            from,
            to,
            data: packet.data,
        };
        match self.relay.router().route(envelope, Some(self.handle.as_ref())) {
            Ok(outcome) => trace!(conn = %self.handle.id(), ?outcome, "routed"),
            Err(e) => warn!(conn = %self.handle.id(), error = %e, "routing failed"),
        }
    }

    fn reject(&self, frame: &[u8], error: &RelayError) {
        warn!(
            conn = %self.handle.id(),
            identifier = self.identifier.as_deref().unwrap_or("-"),
            error = %error,
            len = frame.len(),
            "rejecting frame"
        );
        self.reject_with(frame, INVALID_MESSAGE);
    }

    fn reject_with(&self, frame: &[u8], message: &str) {
        self.handle.emit(Signal::Error {
            message: message.to_string(),
            data: frame.to_vec(),
        });
    }
}

impl fmt::Debug for ConnectionLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionLifecycle")
            .field("conn", &self.handle.id())
            .field("identifier", &self.identifier)
            .field("state", &self.state)
            .finish()
    }
}
