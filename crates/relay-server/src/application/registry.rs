//! Connection registry: live identifier → connection mapping.
//!
//! Two independent namespaces live here:
//!
//! - **clients**: identifier → [`ConnectionHandle`] for connected peers.
//!   At most one handle per identifier; the first registrant wins.
//! - **hosts**: identifiers registered as in-process routable services.
//!   A host identifier need not have any live connection.
//!
//! An identifier may be a host and a client at the same time.
//!
//! Separately, every live link is tracked by [`ConnectionId`] whether or not
//! it won its identifier, so teardown can reach links that lost a duplicate
//! registration race.  Once [`ConnectionRegistry::close`] has run, the
//! registry refuses new links, clients and hosts.
//!
//! All operations are synchronous and serialized by one `RwLock`, so a
//! routing lookup never observes a half-applied registration.  Presence
//! broadcasts are not triggered from here; the relay pairs every host-set
//! change with a debounced announcement (see [`super::presence`]).

use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;
use tracing::{debug, info};

use super::connection::{ConnectionHandle, ConnectionId};
use super::events::EventBus;
use crate::domain::RelayEvent;

#[derive(Default)]
struct RegistryState {
    clients: IndexMap<String, Arc<ConnectionHandle>>,
    hosts: IndexSet<String>,
    links: IndexMap<ConnectionId, Arc<ConnectionHandle>>,
    closed: bool,
}

/// Registry of connected clients and registered hosts.
pub struct ConnectionRegistry {
    state: RwLock<RegistryState>,
    events: EventBus,
}

impl ConnectionRegistry {
    /// Creates an empty registry that publishes `Connect` events on `events`.
    pub fn new(events: EventBus) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            events,
        }
    }

    // ── Links ────────────────────────────────────────────────────────────────

    /// Records a live link.  Returns `false` (and records nothing) once the
    /// registry is closed.
    pub fn track_connection(&self, connection: Arc<ConnectionHandle>) -> bool {
        let mut state = self.state.write();
        if state.closed {
            return false;
        }
        state.links.insert(connection.id(), connection);
        true
    }

    /// Forgets a link.  Returns `true` if it was tracked.
    pub fn untrack_connection(&self, connection: ConnectionId) -> bool {
        self.state.write().links.shift_remove(&connection).is_some()
    }

    /// Number of live links, registered or not.
    pub fn connection_count(&self) -> usize {
        self.state.read().links.len()
    }

    // ── Clients ──────────────────────────────────────────────────────────────

    /// Stores `connection` under `identifier` unless the identifier is taken.
    ///
    /// Returns `true` and publishes [`RelayEvent::Connect`] only on first
    /// registration.  Registering again (same or different connection) is a
    /// no-op that returns `false`, as is any registration after close.
    pub fn register_client(&self, identifier: &str, connection: Arc<ConnectionHandle>) -> bool {
        {
            let mut state = self.state.write();
            if state.closed || state.clients.contains_key(identifier) {
                return false;
            }
            state.clients.insert(identifier.to_string(), connection);
        }

        info!(identifier, "registered client");
        self.events.publish(RelayEvent::Connect(identifier.to_string()));
        true
    }

    /// Removes the entry for `identifier`, whoever owns it.  No error if absent.
    pub fn unregister_client(&self, identifier: &str) -> bool {
        let removed = self.state.write().clients.shift_remove(identifier).is_some();
        if removed {
            debug!(identifier, "unregistered client");
        }
        removed
    }

    /// Removes the entry for `identifier` only if it belongs to `connection`.
    ///
    /// A link that lost the registration race must not evict the winner when
    /// it disconnects.
    pub fn unregister_connection(&self, identifier: &str, connection: ConnectionId) -> bool {
        let mut state = self.state.write();
        let owned = state
            .clients
            .get(identifier)
            .is_some_and(|handle| handle.id() == connection);
        if owned {
            state.clients.shift_remove(identifier);
            debug!(identifier, conn = %connection, "unregistered client");
        }
        owned
    }

    /// `true` if a client is registered under `identifier`.
    pub fn has_client(&self, identifier: &str) -> bool {
        self.state.read().clients.contains_key(identifier)
    }

    /// The connection registered under `identifier`, if any.
    pub fn get_client(&self, identifier: &str) -> Option<Arc<ConnectionHandle>> {
        self.state.read().clients.get(identifier).cloned()
    }

    /// Registered client identifiers in registration order.
    pub fn list_clients(&self) -> Vec<String> {
        self.state.read().clients.keys().cloned().collect()
    }

    /// Handles of every registered client, in registration order.
    pub fn client_handles(&self) -> Vec<Arc<ConnectionHandle>> {
        self.state.read().clients.values().cloned().collect()
    }

    // ── Hosts ────────────────────────────────────────────────────────────────

    /// Adds `identifier` to the host set.  Returns `true` if it was new.
    /// Always `false` after close.
    pub fn add_host(&self, identifier: &str) -> bool {
        let added = {
            let mut state = self.state.write();
            !state.closed && state.hosts.insert(identifier.to_string())
        };
        if added {
            info!(identifier, "registered host");
        }
        added
    }

    /// Removes `identifier` from the host set.  Returns `true` if it was present.
    pub fn remove_host(&self, identifier: &str) -> bool {
        let removed = self.state.write().hosts.shift_remove(identifier);
        if removed {
            info!(identifier, "removed host");
        }
        removed
    }

    /// `true` if `identifier` is a registered host.
    pub fn has_host(&self, identifier: &str) -> bool {
        self.state.read().hosts.contains(identifier)
    }

    /// Registered host identifiers in registration order.
    pub fn list_hosts(&self) -> Vec<String> {
        self.state.read().hosts.iter().cloned().collect()
    }

    // ── Teardown ─────────────────────────────────────────────────────────────

    /// Closes the registry and empties it.  Later additions are refused.
    ///
    /// Returns each live link once (tracked links plus any registered client
    /// that was never tracked) so the caller can close them outside the lock.
    pub fn close(&self) -> Vec<Arc<ConnectionHandle>> {
        let mut state = self.state.write();
        state.closed = true;
        state.hosts.clear();
        let mut live = std::mem::take(&mut state.links);
        for (_, handle) in state.clients.drain(..) {
            live.entry(handle.id()).or_insert(handle);
        }
        live.into_values().collect()
    }
}
