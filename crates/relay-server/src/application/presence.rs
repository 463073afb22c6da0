//! Presence publisher: tells clients which hosts are reachable.
//!
//! The presence payload is always the full current host list, never a diff.
//! Host registrations tend to arrive in bursts (a fleet of services starting
//! together), so broadcasts to all clients go through a debounce timer: every
//! host-set change cancels the pending timer and arms a new one, and only the
//! last timer in a burst actually announces.
//!
//! The timer is a detached tokio task spawned on the runtime the publisher was
//! created on, so host changes made from plain threads are still announced.
//! A publisher created outside any runtime announces immediately instead.
//! [`PresencePublisher::close`] aborts the timer during teardown and turns
//! every later broadcast into a no-op.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use relay_core::Signal;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

use super::connection::ConnectionHandle;
use super::registry::ConnectionRegistry;

/// Who receives a presence announcement.
#[derive(Debug, Clone, Copy)]
pub enum PresenceTarget<'a> {
    /// One connection (answer to a presence request).
    One(&'a ConnectionHandle),
    /// Every registered client.
    All,
}

#[derive(Default)]
struct Timer {
    task: Option<JoinHandle<()>>,
    closed: bool,
}

/// Computes and publishes the host list.
pub struct PresencePublisher {
    registry: Arc<ConnectionRegistry>,
    debounce: Duration,
    /// Runtime current at construction, if any.
    runtime: Option<Handle>,
    timer: Mutex<Timer>,
}

impl PresencePublisher {
    /// Creates a publisher that reads hosts and clients from `registry`.
    ///
    /// When called inside a tokio runtime, debounce timers are spawned on that
    /// runtime for the publisher's whole life, whichever thread triggers them.
    pub fn new(registry: Arc<ConnectionRegistry>, debounce: Duration) -> Self {
        Self {
            registry,
            debounce,
            runtime: Handle::try_current().ok(),
            timer: Mutex::new(Timer::default()),
        }
    }

    /// Sends the current host list to `target` immediately.
    ///
    /// Returns the number of connections the signal was queued for.
    pub fn announce(&self, target: PresenceTarget<'_>) -> usize {
        announce_from(&self.registry, target)
    }

    /// (Re)arms the debounce timer; when it fires, announces to all clients.
    ///
    /// With no runtime to schedule on, announces to all clients right away.
    /// Does nothing after [`close`](Self::close).
    pub fn broadcast_debounced(&self) {
        let runtime = self.runtime.clone().or_else(|| Handle::try_current().ok());

        let mut timer = self.timer.lock();
        if timer.closed {
            debug!("presence publisher closed; broadcast skipped");
            return;
        }
        if let Some(previous) = timer.task.take() {
            previous.abort();
        }

        let Some(runtime) = runtime else {
            drop(timer);
            let recipients = self.announce(PresenceTarget::All);
            debug!(recipients, "no runtime; presence broadcast sent undebounced");
            return;
        };

        let registry = Arc::clone(&self.registry);
        let debounce = self.debounce;
        timer.task = Some(runtime.spawn(async move {
            tokio::time::sleep(debounce).await;
            let recipients = announce_from(&registry, PresenceTarget::All);
            debug!(recipients, "debounced presence broadcast");
        }));
    }

    /// `true` while a debounced broadcast is armed and has not fired yet.
    #[cfg(test)]
    pub(crate) fn is_pending(&self) -> bool {
        self.timer
            .lock()
            .task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Aborts any pending debounced broadcast and refuses later ones.
    pub fn close(&self) {
        let mut timer = self.timer.lock();
        timer.closed = true;
        if let Some(task) = timer.task.take() {
            task.abort();
            debug!("pending presence broadcast cancelled");
        }
    }
}

impl Drop for PresencePublisher {
    fn drop(&mut self) {
        if let Some(task) = self.timer.get_mut().task.take() {
            task.abort();
        }
    }
}

fn announce_from(registry: &ConnectionRegistry, target: PresenceTarget<'_>) -> usize {
    let hosts = registry.list_hosts();
    match target {
        PresenceTarget::One(connection) => {
            usize::from(connection.emit(Signal::Presence(hosts)))
        }
        PresenceTarget::All => registry
            .client_handles()
            .iter()
            .filter(|connection| connection.emit(Signal::Presence(hosts.clone())))
            .count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::connection::Outbound;
    use crate::application::events::EventBus;
    use tokio::sync::mpsc::UnboundedReceiver;

    const DEBOUNCE: Duration = Duration::from_millis(10);

    fn setup() -> (Arc<ConnectionRegistry>, PresencePublisher) {
        let registry = Arc::new(ConnectionRegistry::new(EventBus::new(16)));
        let presence = PresencePublisher::new(Arc::clone(&registry), DEBOUNCE);
        (registry, presence)
    }

    fn client(registry: &ConnectionRegistry, id: &str) -> UnboundedReceiver<Outbound> {
        let (handle, rx) = ConnectionHandle::channel();
        registry.register_client(id, Arc::new(handle));
        rx
    }

    fn drain_presence(rx: &mut UnboundedReceiver<Outbound>) -> Vec<Vec<String>> {
        let mut seen = Vec::new();
        while let Ok(out) = rx.try_recv() {
            if let Outbound::Signal(Signal::Presence(hosts)) = out {
                seen.push(hosts);
            }
        }
        seen
    }

    #[test]
    fn test_announce_one_targets_only_that_connection() {
        let (registry, presence) = setup();
        registry.add_host("svc");
        let mut other = client(&registry, "b");
        let (asker, mut asker_rx) = ConnectionHandle::channel();

        assert_eq!(presence.announce(PresenceTarget::One(&asker)), 1);

        assert_eq!(drain_presence(&mut asker_rx), vec![vec!["svc".to_string()]]);
        assert!(drain_presence(&mut other).is_empty());
    }

    #[test]
    fn test_announce_all_reaches_every_client() {
        let (registry, presence) = setup();
        registry.add_host("svc");
        let mut a = client(&registry, "a");
        let mut b = client(&registry, "b");

        assert_eq!(presence.announce(PresenceTarget::All), 2);
        assert_eq!(drain_presence(&mut a).len(), 1);
        assert_eq!(drain_presence(&mut b).len(), 1);
    }

    #[test]
    fn test_broadcast_without_runtime_announces_immediately() {
        let (registry, presence) = setup();
        let mut rx = client(&registry, "a");
        registry.add_host("svc");

        presence.broadcast_debounced();

        assert!(!presence.is_pending());
        assert_eq!(drain_presence(&mut rx), vec![vec!["svc".to_string()]]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_broadcast_from_plain_thread_uses_captured_runtime() {
        // Arrange: publisher built on the runtime, triggered from elsewhere
        let (registry, presence) = setup();
        let presence = Arc::new(presence);
        let mut rx = client(&registry, "a");
        registry.add_host("svc");

        // Act
        let trigger = Arc::clone(&presence);
        std::thread::spawn(move || trigger.broadcast_debounced())
            .join()
            .unwrap();

        // Assert
        let out = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("presence must arrive");
        assert_eq!(
            out,
            Some(Outbound::Signal(Signal::Presence(vec!["svc".to_string()])))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_changes_collapses_into_one_broadcast() {
        // Arrange
        let (registry, presence) = setup();
        let mut rx = client(&registry, "a");

        // Act: five host registrations inside one debounce window
        for id in ["h1", "h2", "h3", "h2", "h4"] {
            registry.add_host(id);
            presence.broadcast_debounced();
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        tokio::time::sleep(DEBOUNCE * 2).await;

        // Assert: exactly one announcement with the full deduplicated list
        assert_eq!(
            drain_presence(&mut rx),
            vec![vec!["h1", "h2", "h3", "h4"]
                .into_iter()
                .map(String::from)
                .collect::<Vec<_>>()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_changes_in_separate_windows_broadcast_separately() {
        let (registry, presence) = setup();
        let mut rx = client(&registry, "a");

        registry.add_host("h1");
        presence.broadcast_debounced();
        tokio::time::sleep(DEBOUNCE * 2).await;

        registry.remove_host("h1");
        presence.broadcast_debounced();
        tokio::time::sleep(DEBOUNCE * 2).await;

        assert_eq!(
            drain_presence(&mut rx),
            vec![vec!["h1".to_string()], Vec::<String>::new()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_prevents_pending_and_later_broadcasts() {
        let (registry, presence) = setup();
        let mut rx = client(&registry, "a");

        registry.add_host("h1");
        presence.broadcast_debounced();
        assert!(presence.is_pending());
        presence.close();
        presence.broadcast_debounced();
        tokio::time::sleep(DEBOUNCE * 2).await;

        assert!(!presence.is_pending());
        assert!(drain_presence(&mut rx).is_empty());
    }

    #[test]
    fn test_close_without_runtime_suppresses_immediate_announce() {
        let (registry, presence) = setup();
        let mut rx = client(&registry, "a");
        registry.add_host("h1");

        presence.close();
        presence.broadcast_debounced();

        assert!(drain_presence(&mut rx).is_empty());
    }
}
