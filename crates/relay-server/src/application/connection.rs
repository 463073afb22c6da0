//! Per-connection transport handle.
//!
//! A [`ConnectionHandle`] is the only capability the core holds on a live
//! link: it can queue a [`Signal`] for the connection's writer task or ask
//! that task to close the link.  The writer task (see
//! `infrastructure::ws_server`) owns the actual socket.

use std::fmt;

use relay_core::Signal;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Unique id of one physical link.  Two links may claim the same logical
/// identifier; they never share a `ConnectionId`.
pub type ConnectionId = Uuid;

/// A request for the connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Encode and write this signal.
    Signal(Signal),
    /// Close the link.  `forced` skips the WebSocket close handshake.
    Close { forced: bool },
}

/// Send/close capability for one live connection.
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ConnectionHandle {
    /// Wraps the sending half of a writer-task channel.
    pub fn new(tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tx,
        }
    }

    /// Creates a handle together with the receiver its writer task drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// The link's unique id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues `signal` for the connection.
    ///
    /// Returns `false` if the writer task is gone (the link already closed).
    pub fn emit(&self, signal: Signal) -> bool {
        let name = signal.signal_type().name();
        let queued = self.tx.send(Outbound::Signal(signal)).is_ok();
        if !queued {
            debug!(conn = %self.id, signal = name, "dropping signal for closed connection");
        }
        queued
    }

    /// Asks the writer task to close the link.
    pub fn disconnect(&self, forced: bool) -> bool {
        self.tx.send(Outbound::Close { forced }).is_ok()
    }

    /// `true` once the writer task has dropped its receiver.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_queues_signal_in_order() {
        let (handle, mut rx) = ConnectionHandle::channel();

        assert!(handle.emit(Signal::NotFound("x".to_string())));
        assert!(handle.emit(Signal::PresenceRequest));

        assert_eq!(
            rx.try_recv().unwrap(),
            Outbound::Signal(Signal::NotFound("x".to_string()))
        );
        assert_eq!(rx.try_recv().unwrap(), Outbound::Signal(Signal::PresenceRequest));
    }

    #[test]
    fn test_emit_after_receiver_dropped_returns_false() {
        let (handle, rx) = ConnectionHandle::channel();
        drop(rx);

        assert!(handle.is_closed());
        assert!(!handle.emit(Signal::PresenceRequest));
        assert!(!handle.disconnect(true));
    }

    #[test]
    fn test_handles_get_distinct_ids() {
        let (a, _rx_a) = ConnectionHandle::channel();
        let (b, _rx_b) = ConnectionHandle::channel();
        assert_ne!(a.id(), b.id());
    }
}
