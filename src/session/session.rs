//! Device session records.
//!
//! A [`DeviceSession`] is created on the first authenticated frame and
//! destroyed on disconnect, explicit logout, or the heartbeat sweep. The
//! [`SessionTable`] keeps one per session key per plane, with a secondary
//! index by connection id so the disconnect path can find the session
//! without knowing the key.

// ============================================================================
// Imports
// ============================================================================

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::identifiers::{AppType, ConnId, DeviceIdentity, NetworkType, SessionKey, UserId};
use crate::transport::Conn;

// ============================================================================
// DeviceSession
// ============================================================================

/// Mutable session fields behind one lock.
#[derive(Debug)]
struct SessionState {
    last_update: SystemTime,
    last_heartbeat: Instant,
    network_type: NetworkType,
}

/// One authenticated device connection's session state.
pub struct DeviceSession {
    conn: Conn,
    identity: DeviceIdentity,
    session_key: SessionKey,
    user: UserId,
    app_type: AppType,
    client_ip: IpAddr,
    created_at: SystemTime,
    state: Mutex<SessionState>,
}

impl DeviceSession {
    /// Creates a session for a freshly authenticated connection.
    #[must_use]
    pub fn new(conn: Conn, identity: DeviceIdentity, app_type: AppType) -> Self {
        let session_key = identity.session_key();
        let user = identity.user_id();
        let client_ip = conn.peer_addr().ip();

        Self {
            conn,
            identity,
            session_key,
            user,
            app_type,
            client_ip,
            created_at: SystemTime::now(),
            state: Mutex::new(SessionState {
                last_update: SystemTime::now(),
                last_heartbeat: Instant::now(),
                network_type: NetworkType::default(),
            }),
        }
    }

    /// Returns the connection handle.
    #[inline]
    #[must_use]
    pub fn conn(&self) -> &Conn {
        &self.conn
    }

    /// Returns the device identity.
    #[inline]
    #[must_use]
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Returns the session key.
    #[inline]
    #[must_use]
    pub fn session_key(&self) -> &SessionKey {
        &self.session_key
    }

    /// Returns the derived user id.
    #[inline]
    #[must_use]
    pub fn user(&self) -> UserId {
        self.user
    }

    /// Returns the application type reported at login.
    #[inline]
    #[must_use]
    pub fn app_type(&self) -> AppType {
        self.app_type
    }

    /// Returns the client IP.
    #[inline]
    #[must_use]
    pub fn client_ip(&self) -> IpAddr {
        self.client_ip
    }

    /// Returns when the session was created.
    #[inline]
    #[must_use]
    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Returns the current network type tag.
    #[must_use]
    pub fn network_type(&self) -> NetworkType {
        self.state.lock().network_type.clone()
    }

    /// Updates the network type tag.
    pub fn set_network_type(&self, network_type: NetworkType) {
        let mut state = self.state.lock();
        state.network_type = network_type;
        state.last_update = SystemTime::now();
    }

    /// Marks a heartbeat now. Monotonically non-decreasing by
    /// construction (`Instant::now()` never goes backwards).
    pub fn heartbeat(&self) {
        let mut state = self.state.lock();
        state.last_heartbeat = Instant::now();
        state.last_update = SystemTime::now();
    }

    /// Returns how long ago the last heartbeat was.
    #[must_use]
    pub fn heartbeat_age(&self) -> std::time::Duration {
        self.state.lock().last_heartbeat.elapsed()
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("session_key", &self.session_key)
            .field("user", &self.user)
            .field("client_ip", &self.client_ip)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// SessionTable
// ============================================================================

/// Per-plane table of device sessions.
#[derive(Default)]
pub struct SessionTable {
    by_key: DashMap<SessionKey, Arc<DeviceSession>>,
    by_conn: DashMap<ConnId, SessionKey>,
}

impl SessionTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a session, replacing any previous holder of the key.
    pub fn insert(&self, session: Arc<DeviceSession>) {
        let key = session.session_key().clone();
        self.by_conn.insert(session.conn().id(), key.clone());

        if let Some(old) = self.by_key.insert(key, session) {
            // The replaced session's reverse index entry is stale now.
            self.by_conn
                .remove_if(&old.conn().id(), |_, k| k == old.session_key());
        }
    }

    /// Returns the session for a key.
    #[must_use]
    pub fn get(&self, key: &SessionKey) -> Option<Arc<DeviceSession>> {
        self.by_key.get(key).map(|e| Arc::clone(&e))
    }

    /// Returns the session owning a connection.
    #[must_use]
    pub fn get_by_conn(&self, conn_id: ConnId) -> Option<Arc<DeviceSession>> {
        let key = self.by_conn.get(&conn_id)?.clone();
        self.get(&key)
    }

    /// Removes the session for a key, if present.
    pub fn remove(&self, key: &SessionKey) -> Option<Arc<DeviceSession>> {
        let (_, session) = self.by_key.remove(key)?;
        self.by_conn
            .remove_if(&session.conn().id(), |_, k| k == session.session_key());
        Some(session)
    }

    /// Removes whichever session still owns this connection.
    pub fn remove_by_conn(&self, conn_id: ConnId) -> Option<Arc<DeviceSession>> {
        let (_, key) = self.by_conn.remove(&conn_id)?;
        // Only drop the forward mapping if it still points at this conn.
        let removed = self
            .by_key
            .remove_if(&key, |_, session| session.conn().id() == conn_id);
        removed.map(|(_, session)| session)
    }

    /// Returns the number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    /// Returns `true` if no sessions exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Removes every session.
    pub fn clear(&self) {
        self.by_key.clear();
        self.by_conn.clear();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn session(imei: &str) -> Arc<DeviceSession> {
        let (conn, _rx) = Conn::new("10.0.0.7:5000".parse().unwrap());
        std::mem::forget(_rx); // keep the writer side alive for the test
        let identity = DeviceIdentity::new(imei, "460001").unwrap();
        Arc::new(DeviceSession::new(conn, identity, AppType(2)))
    }

    #[test]
    fn test_session_accessors() {
        let session = session("860123");
        assert_eq!(session.session_key().as_str(), "860123_460001");
        assert_eq!(session.client_ip(), "10.0.0.7".parse::<IpAddr>().unwrap());
        assert_eq!(session.app_type(), AppType(2));
        assert_eq!(session.network_type(), NetworkType::default());
    }

    #[test]
    fn test_network_type_update() {
        let session = session("860123");
        session.set_network_type(NetworkType("wifi".into()));
        assert_eq!(session.network_type().0, "wifi");
    }

    #[test]
    fn test_table_lookup_by_key_and_conn() {
        let table = SessionTable::new();
        let session = session("860123");
        let conn_id = session.conn().id();
        table.insert(Arc::clone(&session));

        assert_eq!(table.len(), 1);
        assert!(table.get(session.session_key()).is_some());
        assert!(table.get_by_conn(conn_id).is_some());
    }

    #[test]
    fn test_replacement_drops_stale_conn_index() {
        let table = SessionTable::new();
        let first = session("860123");
        let second = session("860123");
        let first_conn = first.conn().id();

        table.insert(Arc::clone(&first));
        table.insert(Arc::clone(&second));

        assert_eq!(table.len(), 1);
        assert!(table.get_by_conn(first_conn).is_none());
        assert_eq!(
            table
                .get_by_conn(second.conn().id())
                .unwrap()
                .conn()
                .id(),
            second.conn().id()
        );
    }

    #[test]
    fn test_remove_by_conn_skips_replaced_session() {
        let table = SessionTable::new();
        let first = session("860123");
        let second = session("860123");

        table.insert(Arc::clone(&first));
        table.insert(Arc::clone(&second));

        // The first connection was replaced; removing by it must not
        // evict the second session.
        assert!(table.remove_by_conn(first.conn().id()).is_none());
        assert_eq!(table.len(), 1);

        let removed = table.remove_by_conn(second.conn().id()).unwrap();
        assert_eq!(removed.conn().id(), second.conn().id());
        assert!(table.is_empty());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let table = SessionTable::new();
        let session = session("860123");
        table.insert(Arc::clone(&session));

        assert!(table.remove(session.session_key()).is_some());
        assert!(table.remove(session.session_key()).is_none());
    }
}
