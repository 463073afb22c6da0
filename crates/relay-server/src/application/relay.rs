//! The relay facade: the server-level API.
//!
//! [`Relay`] ties the registry, router, presence publisher and event bus
//! together.  It is cheap to clone (one `Arc` inside); every clone talks to
//! the same relay.  The WebSocket transport, in-process host endpoints and
//! embedding applications all go through it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

use super::connection::ConnectionHandle;
use super::events::EventBus;
use super::lifecycle::ConnectionLifecycle;
use super::presence::PresencePublisher;
use super::registry::ConnectionRegistry;
use super::router::{MessageRouter, RouteOutcome};
use crate::domain::{Envelope, RelayConfig, RelayError, RelayEvent};

struct RelayInner {
    config: RelayConfig,
    registry: Arc<ConnectionRegistry>,
    presence: PresencePublisher,
    events: EventBus,
    destroyed: AtomicBool,
    /// Flips to `true` once on destroy; the accept loop and `destroyed()`
    /// watch it.
    shutdown_tx: watch::Sender<bool>,
}

/// Handle to a running relay.
#[derive(Clone)]
pub struct Relay {
    inner: Arc<RelayInner>,
}

impl Relay {
    /// Creates a relay with empty registries.
    ///
    /// Nothing listens yet; see [`crate::infrastructure::run_server`].
    pub fn new(config: RelayConfig) -> Self {
        let events = EventBus::new(config.event_capacity);
        let registry = Arc::new(ConnectionRegistry::new(events.clone()));
        let presence = PresencePublisher::new(Arc::clone(&registry), config.presence_debounce);
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            inner: Arc::new(RelayInner {
                config,
                registry,
                presence,
                events,
                destroyed: AtomicBool::new(false),
                shutdown_tx,
            }),
        }
    }

    /// The configuration the relay was built with.
    pub fn config(&self) -> &RelayConfig {
        &self.inner.config
    }

    // ── Hosts ────────────────────────────────────────────────────────────────

    /// Registers `identifier` as an in-process host.
    ///
    /// Returns `true` if the host set changed, in which case a debounced
    /// presence broadcast is scheduled.  Always `false` after destroy.
    ///
    /// Safe to race with [`destroy`](Self::destroy): the closed registry
    /// refuses the host, or the teardown clears it, and the closed presence
    /// publisher drops the broadcast.
    pub fn add_host(&self, identifier: &str) -> bool {
        let changed = self.inner.registry.add_host(identifier);
        if changed {
            self.inner.presence.broadcast_debounced();
        } else if self.is_destroyed() {
            debug!(identifier, "relay destroyed; host not added");
        }
        changed
    }

    /// Removes `identifier` from the hosts.  Returns `true` if it was present,
    /// in which case a debounced presence broadcast is scheduled.
    pub fn remove_host(&self, identifier: &str) -> bool {
        let changed = self.inner.registry.remove_host(identifier);
        if changed {
            self.inner.presence.broadcast_debounced();
        }
        changed
    }

    // ── Routing ──────────────────────────────────────────────────────────────

    /// Routes an envelope that did not arrive on any connection (typically
    /// sent by an in-process host).
    ///
    /// # Errors
    ///
    /// - [`RelayError::Destroyed`] after [`destroy`](Self::destroy).
    /// - [`RelayError::DestinationNotFound`] when `to` is neither a host nor
    ///   a client.
    pub fn send(&self, envelope: Envelope) -> Result<RouteOutcome, RelayError> {
        if self.is_destroyed() {
            return Err(RelayError::Destroyed);
        }
        self.router().route(envelope, None)
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    /// Identifiers of connected clients, in registration order.
    pub fn get_connected_clients(&self) -> Vec<String> {
        self.inner.registry.list_clients()
    }

    /// Identifiers of registered hosts, in registration order.
    pub fn get_connected_hosts(&self) -> Vec<String> {
        self.inner.registry.list_hosts()
    }

    pub fn has_client(&self, identifier: &str) -> bool {
        self.inner.registry.has_client(identifier)
    }

    pub fn has_host(&self, identifier: &str) -> bool {
        self.inner.registry.has_host(identifier)
    }

    /// The connection registered under `identifier`, if any.
    pub fn get_client(&self, identifier: &str) -> Option<Arc<ConnectionHandle>> {
        self.inner.registry.get_client(identifier)
    }

    // ── Events ───────────────────────────────────────────────────────────────

    /// Subscribes to relay events.  Drop the receiver to unsubscribe.
    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.inner.events.subscribe()
    }

    // ── Connections ──────────────────────────────────────────────────────────

    /// Creates the lifecycle record for a newly accepted link.
    ///
    /// `identifier` is the `from` value offered in the handshake.  The caller
    /// drives the record with `on_connect` / `on_frame` / `on_disconnect`.
    pub fn open_connection(
        &self,
        handle: Arc<ConnectionHandle>,
        identifier: Option<String>,
    ) -> ConnectionLifecycle {
        ConnectionLifecycle::new(self.clone(), handle, identifier)
    }

    // ── Teardown ─────────────────────────────────────────────────────────────

    /// Shuts the relay down.
    ///
    /// Cancels any pending presence broadcast and empties the registry.
    /// Every live link is force-closed, including duplicates that never won
    /// their identifier.  Then the accept loop stops and
    /// [`RelayEvent::Destroy`] is published.  Returns `true` on the first
    /// call only; later calls do nothing.
    pub fn destroy(&self) -> bool {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return false;
        }
        info!("destroying relay");

        self.inner.presence.close();
        let handles = self.inner.registry.close();
        for handle in &handles {
            handle.disconnect(true);
        }
        debug!(closed = handles.len(), "connections closed");

        self.inner.shutdown_tx.send_replace(true);
        self.inner.events.publish(RelayEvent::Destroy);
        true
    }

    /// `true` once [`destroy`](Self::destroy) has been called.
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    /// Resolves once the relay has been destroyed (immediately if it already
    /// was).
    pub async fn destroyed(&self) {
        let mut rx = self.inner.shutdown_tx.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Receiver that flips to `true` on destroy.  Used by the accept loop.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.inner.shutdown_tx.subscribe()
    }

    // ── Crate internals ──────────────────────────────────────────────────────

    pub(crate) fn registry(&self) -> &ConnectionRegistry {
        &self.inner.registry
    }

    pub(crate) fn presence(&self) -> &PresencePublisher {
        &self.inner.presence
    }

    pub(crate) fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub(crate) fn router(&self) -> MessageRouter<'_> {
        MessageRouter::new(&self.inner.registry, &self.inner.events)
    }
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("clients", &self.inner.registry.list_clients().len())
            .field("hosts", &self.inner.registry.list_hosts().len())
            .field("links", &self.inner.registry.connection_count())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use relay_core::{decode_packet, Packet, Signal};
    use tokio::sync::broadcast::error::TryRecvError;
    use tokio::sync::mpsc::UnboundedReceiver;

    use crate::application::connection::Outbound;

    fn relay() -> Relay {
        Relay::new(RelayConfig::default())
    }

    fn client(relay: &Relay, id: &str) -> (ConnectionLifecycle, UnboundedReceiver<Outbound>) {
        let (handle, rx) = ConnectionHandle::channel();
        let mut conn = relay.open_connection(Arc::new(handle), Some(id.to_string()));
        conn.on_connect().unwrap();
        (conn, rx)
    }

    #[test]
    fn test_send_to_client_delivers_with_sender_identity() {
        let relay = relay();
        let (_b, mut b_rx) = client(&relay, "b");

        let outcome = relay.send(Envelope::new("svc", "b", vec![7]));

        assert_eq!(outcome, Ok(RouteOutcome::Client));
        match b_rx.try_recv().unwrap() {
            Outbound::Signal(Signal::Message(bytes)) => {
                assert_eq!(decode_packet(&bytes).unwrap(), Packet::delivered("svc", vec![7]));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_send_to_unknown_destination_is_error() {
        let relay = relay();
        assert_eq!(
            relay.send(Envelope::new("svc", "ghost", vec![])),
            Err(RelayError::DestinationNotFound("ghost".to_string()))
        );
    }

    #[test]
    fn test_send_after_destroy_is_error() {
        let relay = relay();
        let (_b, _rx) = client(&relay, "b");
        relay.destroy();
        assert_eq!(
            relay.send(Envelope::new("svc", "b", vec![])),
            Err(RelayError::Destroyed)
        );
    }

    #[test]
    fn test_queries_reflect_registry() {
        let relay = relay();
        let (_a, _rx) = client(&relay, "a");
        relay.add_host("svc");

        assert_eq!(relay.get_connected_clients(), vec!["a"]);
        assert_eq!(relay.get_connected_hosts(), vec!["svc"]);
        assert!(relay.has_client("a") && !relay.has_client("svc"));
        assert!(relay.has_host("svc") && !relay.has_host("a"));
        assert!(relay.get_client("a").is_some());
    }

    #[test]
    fn test_destroy_is_idempotent_and_emits_once() {
        // Arrange
        let relay = relay();
        relay.add_host("svc");
        let (_a, mut a_rx) = client(&relay, "a");
        let mut events = relay.subscribe();

        // Act
        let first = relay.destroy();
        let second = relay.destroy();

        // Assert
        assert!(first);
        assert!(!second);
        assert_eq!(events.try_recv().unwrap(), RelayEvent::Destroy);
        assert_eq!(events.try_recv(), Err(TryRecvError::Empty));
        assert_eq!(a_rx.try_recv().unwrap(), Outbound::Close { forced: true });
        assert!(relay.get_connected_clients().is_empty());
        assert!(relay.get_connected_hosts().is_empty());
        assert!(relay.is_destroyed());
    }

    #[test]
    fn test_add_host_after_destroy_is_refused() {
        let relay = relay();
        relay.destroy();
        assert!(!relay.add_host("svc"));
        assert!(!relay.has_host("svc"));
    }

    #[test]
    fn test_destroyed_future_is_pending_until_destroy() {
        let relay = relay();
        let mut waiter = tokio_test::task::spawn(relay.destroyed());

        tokio_test::assert_pending!(waiter.poll());
        relay.destroy();

        assert!(waiter.is_woken());
        tokio_test::assert_ready!(waiter.poll());
    }

    #[tokio::test]
    async fn test_destroyed_resolves_after_destroy() {
        let relay = relay();
        let waiter = {
            let relay = relay.clone();
            tokio::spawn(async move { relay.destroyed().await })
        };

        relay.destroy();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("destroyed() must resolve")
            .unwrap();
        // Already destroyed: resolves immediately.
        relay.destroyed().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_burst_produces_one_presence_broadcast() {
        // Arrange
        let relay = relay();
        let (_a, mut a_rx) = client(&relay, "a");

        // Act
        for id in ["h1", "h2", "h3"] {
            relay.add_host(id);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Assert
        let mut announcements = Vec::new();
        while let Ok(Outbound::Signal(Signal::Presence(hosts))) = a_rx.try_recv() {
            announcements.push(hosts);
        }
        assert_eq!(announcements, vec![vec!["h1", "h2", "h3"]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_cancels_pending_presence() {
        let relay = relay();
        let (_a, mut a_rx) = client(&relay, "a");
        relay.add_host("h1");

        relay.destroy();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(a_rx.try_recv().unwrap(), Outbound::Close { forced: true });
        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_host_added_off_runtime_is_still_announced() {
        // Arrange
        let relay = relay();
        let (_a, mut a_rx) = client(&relay, "a");

        // Act
        let other = relay.clone();
        let added = std::thread::spawn(move || other.add_host("svc"))
            .join()
            .unwrap();

        // Assert
        assert!(added);
        let out = tokio::time::timeout(Duration::from_secs(1), a_rx.recv())
            .await
            .expect("presence must arrive");
        assert_eq!(
            out,
            Some(Outbound::Signal(Signal::Presence(vec!["svc".to_string()])))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_add_host_racing_destroy_leaves_nothing_behind() {
        for round in 0..64 {
            // Arrange
            let relay = relay();
            let barrier = Arc::new(std::sync::Barrier::new(2));

            // Act
            let adder = {
                let relay = relay.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    relay.add_host(&format!("h{round}"));
                })
            };
            barrier.wait();
            relay.destroy();
            adder.join().unwrap();

            // Assert
            assert!(relay.get_connected_hosts().is_empty(), "round {round}");
            assert!(!relay.presence().is_pending(), "round {round}");
        }
    }

    #[test]
    fn test_destroy_closes_links_on_every_clone() {
        let relay = relay();
        let (_a, mut a_rx) = client(&relay, "a");
        let (_dup, mut dup_rx) = client(&relay, "a");

        relay.clone().destroy();

        assert_eq!(a_rx.try_recv().unwrap(), Outbound::Close { forced: true });
        assert_eq!(dup_rx.try_recv().unwrap(), Outbound::Close { forced: true });
        assert_eq!(relay.registry().connection_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_host_set_does_not_broadcast() {
        let relay = relay();
        relay.add_host("h1");
        tokio::time::sleep(Duration::from_millis(50)).await;
        let (_a, mut a_rx) = client(&relay, "a");

        assert!(!relay.add_host("h1"));
        assert!(!relay.remove_host("nope"));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(a_rx.try_recv().is_err());
    }
}
