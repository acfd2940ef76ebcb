//! Connection registry with heartbeat liveness.
//!
//! One registry maps a key (session key or user id) to exactly one live
//! [`Conn`]. Registering over an existing key closes the previous holder,
//! so a reconnecting device can never leave an orphaned, unreachable
//! connection behind. A dedicated sweeper task evicts entries whose
//! heartbeat has gone stale.
//!
//! # Thread Safety
//!
//! Backed by a sharded [`DashMap`]; all operations are safe under
//! concurrent access from IO tasks and the sweeper with no caller-side
//! locking.

// ============================================================================
// Imports
// ============================================================================

use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::transport::Conn;

// ============================================================================
// Entry
// ============================================================================

/// One registry entry: the connection and its last heartbeat.
#[derive(Debug, Clone)]
struct Entry {
    conn: Conn,
    last_heartbeat: Instant,
}

// ============================================================================
// ConnectionRegistry
// ============================================================================

/// Keyed table of live connections with heartbeat tracking.
///
/// Instantiated once per key type per plane: session-keyed and
/// user-keyed registries share this implementation.
pub struct ConnectionRegistry<K> {
    entries: DashMap<K, Entry>,
}

impl<K> Default for ConnectionRegistry<K>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<K> ConnectionRegistry<K>
where
    K: Eq + Hash + Clone + Display + Send + Sync + 'static,
{
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Registers a connection under a key.
    ///
    /// If the key already maps to a live connection, that connection is
    /// closed before the mapping is overwritten.
    pub fn set(&self, key: K, conn: Conn) {
        let previous = self.entries.insert(
            key.clone(),
            Entry {
                conn,
                last_heartbeat: Instant::now(),
            },
        );

        if let Some(old) = previous {
            warn!(%key, old_conn = %old.conn.id(), "Replacing existing connection");
            old.conn.close();
        }
    }

    /// Returns the connection for a key, if registered.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<Conn> {
        self.entries.get(key).map(|entry| entry.conn.clone())
    }

    /// Returns `true` if the key is registered.
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Removes the mapping for a key and closes the connection.
    ///
    /// Idempotent: removing an absent key is a no-op.
    pub fn remove(&self, key: &K) {
        if let Some((_, entry)) = self.entries.remove(key) {
            entry.conn.close();
            debug!(%key, "Registry entry removed");
        }
    }

    /// Removes whichever mapping still points at this exact connection.
    ///
    /// A mapping that was already replaced by a newer connection under the
    /// same key is left untouched; matching is by connection id.
    pub fn remove_conn(&self, conn: &Conn) {
        let conn_id = conn.id();
        let key = self
            .entries
            .iter()
            .find(|entry| entry.conn.id() == conn_id)
            .map(|entry| entry.key().clone());

        if let Some(key) = key {
            // Re-check under the entry lock: a replacement may have raced in.
            self.entries
                .remove_if(&key, |_, entry| entry.conn.id() == conn_id);
        }
        conn.close();
    }

    /// Updates the key's last heartbeat to now.
    ///
    /// Called on every successfully decoded frame from the connection.
    /// Unknown keys are ignored.
    pub fn heartbeat(&self, key: &K) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.last_heartbeat = Instant::now();
        }
    }

    /// Returns the number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no connections are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// ConnectionRegistry - Sweeping
// ============================================================================

impl<K> ConnectionRegistry<K>
where
    K: Eq + Hash + Clone + Display + Send + Sync + 'static,
{
    /// Closes and removes every entry whose heartbeat is older than `ttl`.
    ///
    /// Returns the number of entries removed.
    pub fn sweep(&self, ttl: Duration) -> usize {
        self.sweep_keys(ttl).len()
    }

    /// Like [`ConnectionRegistry::sweep`] but returns the evicted keys so
    /// callers can drop dependent state (session records) as well.
    pub fn sweep_keys(&self, ttl: Duration) -> Vec<K> {
        let now = Instant::now();

        // Collect stale keys first; removal re-checks the timestamp so an
        // entry refreshed in between survives.
        let stale: Vec<K> = self
            .entries
            .iter()
            .filter(|entry| now.duration_since(entry.last_heartbeat) > ttl)
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = Vec::with_capacity(stale.len());
        for key in stale {
            let evicted = self.entries.remove_if(&key, |_, entry| {
                now.duration_since(entry.last_heartbeat) > ttl
            });
            if let Some((key, entry)) = evicted {
                entry.conn.close();
                debug!(%key, "Swept stale connection");
                removed.push(key);
            }
        }

        removed
    }

    /// Spawns the periodic sweeper task.
    ///
    /// Runs until aborted; the gateway holds the handle and aborts it on
    /// shutdown. Eviction never happens on the IO path.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        ttl: Duration,
        mut on_evicted: impl FnMut(Vec<K>) + Send + 'static,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let evicted = registry.sweep_keys(ttl);
                if !evicted.is_empty() {
                    debug!(count = evicted.len(), "Heartbeat sweep evicted connections");
                    on_evicted(evicted);
                }
            }
        })
    }

    /// Closes and removes every entry. Used during gateway shutdown.
    pub fn clear(&self) {
        let keys: Vec<K> = self.entries.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            self.remove(&key);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
