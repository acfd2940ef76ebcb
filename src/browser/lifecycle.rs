//! Lifecycle service: validated transitions with change notifications.
//!
//! The [`Lifecycle`] service is the only way instance status moves. It
//! validates against the adjacency in [`BrowserStatus`], appends the
//! bounded history record, and publishes a [`StateChange`] on a broadcast
//! channel. Lagging or absent subscribers never block or fail a
//! transition.

// ============================================================================
// Imports
// ============================================================================

use tokio::sync::broadcast;
use tracing::debug;

use crate::browser::instance::BrowserInstance;
use crate::browser::status::BrowserStatus;
use crate::error::Result;
use crate::identifiers::UserId;

// ============================================================================
// Constants
// ============================================================================

/// Broadcast buffer; slow subscribers lag rather than block.
const NOTIFY_CAPACITY: usize = 256;

// ============================================================================
// StateChange
// ============================================================================

/// Notification of one completed transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    /// The instance's user id.
    pub user: UserId,
    /// State before.
    pub from: BrowserStatus,
    /// State after.
    pub to: BrowserStatus,
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Owned transition service; one per gateway.
pub struct Lifecycle {
    notify: broadcast::Sender<StateChange>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    /// Creates the service.
    #[must_use]
    pub fn new() -> Self {
        let (notify, _) = broadcast::channel(NOTIFY_CAPACITY);
        Self { notify }
    }

    /// Subscribes to state-change notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.notify.subscribe()
    }

    /// Returns `true` if `from -> to` is legal.
    ///
    /// Self-transitions are always legal (no-op).
    #[inline]
    #[must_use]
    pub fn can_transition(&self, from: BrowserStatus, to: BrowserStatus) -> bool {
        from.can_transition(to)
    }

    /// Moves an instance to `to`.
    ///
    /// A self-transition is a silent no-op: no history entry, no
    /// notification. A valid transition appends a bounded history record
    /// and notifies subscribers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalStateTransition`](crate::Error::IllegalStateTransition)
    /// and leaves state unchanged when the edge is not declared.
    pub fn transition(
        &self,
        instance: &BrowserInstance,
        to: BrowserStatus,
        reason: Option<&str>,
    ) -> Result<()> {
        if let Some((from, to)) = instance.apply_transition(to, reason)? {
            debug!(user = %instance.user(), %from, %to, reason = reason.unwrap_or(""), "State transition");
            self.publish(instance.user(), from, to);
        }
        Ok(())
    }

    /// Moves an instance to `target`, restarting through `Closed` when
    /// the direct edge is missing.
    ///
    /// Returns `true` if the instance ended up at `target` (directly, via
    /// the two-hop `Closed` path, or because it was already there);
    /// `false` with state unchanged otherwise. This is the designated
    /// recovery path for error states.
    pub fn transition_or_restart(&self, instance: &BrowserInstance, target: BrowserStatus) -> bool {
        match instance.apply_or_restart(target) {
            Some(hops) => {
                for (from, to) in hops {
                    debug!(user = %instance.user(), %from, %to, "State transition (restart path)");
                    self.publish(instance.user(), from, to);
                }
                true
            }
            None => false,
        }
    }

    fn publish(&self, user: UserId, from: BrowserStatus, to: BrowserStatus) {
        // Err means no subscribers; transitions never depend on listeners.
        let _ = self.notify.send(StateChange { user, from, to });
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::identifiers::DeviceIdentity;

    use BrowserStatus::*;

    fn instance() -> BrowserInstance {
        let user = DeviceIdentity::new("860123", "460001").unwrap().user_id();
        BrowserInstance::new(user)
    }

    fn at(status: BrowserStatus) -> BrowserInstance {
        let inst = instance();
        // Drive to the requested state along legal edges.
        let path: &[BrowserStatus] = match status {
            Initializing => &[],
            Creating => &[Creating],
            Ready => &[Creating, Ready],
            Connecting => &[Creating, Ready, Connecting],
            Running => &[Creating, Ready, Connecting, Running],
            Recording => &[Creating, Ready, Connecting, Running, Recording],
            Closed => &[Creating, Ready, Closed],
            MemoryError => &[Creating, Ready, Connecting, Running, MemoryError],
            NetworkError => &[Creating, Ready, Connecting, Running, NetworkError],
            other => panic!("no path helper for {other}"),
        };
        for &step in path {
            inst.apply_transition(step, None).unwrap();
        }
        assert_eq!(inst.status(), status);
        inst
    }

    #[test]
    fn test_valid_transition_updates_state_and_history() {
        let lifecycle = Lifecycle::new();
        let inst = instance();

        lifecycle
            .transition(&inst, Creating, Some("open request"))
            .expect("legal edge");

        assert_eq!(inst.status(), Creating);
        let history = inst.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].from, Initializing);
        assert_eq!(history[0].to, Creating);
        assert_eq!(history[0].reason.as_deref(), Some("open request"));
    }

    #[test]
    fn test_invalid_transition_leaves_state_unchanged() {
        let lifecycle = Lifecycle::new();
        let inst = instance();

        let err = lifecycle.transition(&inst, Recording, None).unwrap_err();
        assert!(matches!(
            err,
            Error::IllegalStateTransition {
                from: Initializing,
                to: Recording
            }
        ));
        assert_eq!(inst.status(), Initializing);
        assert!(inst.history().is_empty());
    }

    #[test]
    fn test_self_transition_is_silent_noop() {
        let lifecycle = Lifecycle::new();
        let mut rx = lifecycle.subscribe();
        let inst = instance();

        lifecycle
            .transition(&inst, Initializing, None)
            .expect("self-transition is legal");

        assert!(inst.history().is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_notification_published() {
        let lifecycle = Lifecycle::new();
        let mut rx = lifecycle.subscribe();
        let inst = instance();

        lifecycle.transition(&inst, Creating, None).unwrap();

        let change = rx.try_recv().expect("one notification");
        assert_eq!(change.from, Initializing);
        assert_eq!(change.to, Creating);
        assert_eq!(change.user, inst.user());
    }

    #[test]
    fn test_transition_without_subscribers_succeeds() {
        let lifecycle = Lifecycle::new();
        let inst = instance();
        lifecycle.transition(&inst, Creating, None).expect("no subscribers needed");
    }

    #[test]
    fn test_or_restart_direct_path() {
        let lifecycle = Lifecycle::new();
        let inst = at(Ready);

        assert!(lifecycle.transition_or_restart(&inst, Connecting));
        assert_eq!(inst.status(), Connecting);
    }

    #[test]
    fn test_or_restart_two_hop_path() {
        let lifecycle = Lifecycle::new();
        let mut rx = lifecycle.subscribe();
        let inst = at(MemoryError);

        // MemoryError -> Ready is illegal, but MemoryError -> Closed and
        // Closed -> Ready are both legal.
        assert!(lifecycle.transition_or_restart(&inst, Ready));
        assert_eq!(inst.status(), Ready);

        let hop1 = rx.try_recv().unwrap();
        let hop2 = rx.try_recv().unwrap();
        assert_eq!((hop1.from, hop1.to), (MemoryError, Closed));
        assert_eq!((hop2.from, hop2.to), (Closed, Ready));
    }

    #[test]
    fn test_or_restart_rejects_unreachable_target() {
        let lifecycle = Lifecycle::new();
        let inst = at(MemoryError);

        // Closed -> Running is illegal, so the two-hop path fails too.
        assert!(!lifecycle.transition_or_restart(&inst, Running));
        assert_eq!(inst.status(), MemoryError);
        assert_eq!(inst.history().last().unwrap().to, MemoryError);
    }

    // Truth table over every (from, target) pair.
    #[test]
    fn test_or_restart_truth_table() {
        let lifecycle = Lifecycle::new();
        for &from in BrowserStatus::all() {
            for &target in BrowserStatus::all() {
                let expected = from.can_transition(target)
                    || (from.can_transition(Closed) && Closed.can_transition(target));
                // Fresh instance per pair; only states reachable by the
                // path helper are exercised, others verified statically.
                if matches!(
                    from,
                    Initializing | Creating | Ready | Connecting | Running | Recording | Closed
                        | MemoryError | NetworkError
                ) {
                    let inst = at(from);
                    assert_eq!(
                        lifecycle.transition_or_restart(&inst, target),
                        expected,
                        "{from} -> {target}"
                    );
                    if !expected {
                        assert_eq!(inst.status(), from);
                    }
                }
            }
        }
    }

    #[test]
    fn test_terminal_then_reopen_one_record_per_hop() {
        let lifecycle = Lifecycle::new();
        let inst = at(Ready);
        let base = inst.history().len();

        lifecycle.transition(&inst, Closed, None).unwrap();
        lifecycle.transition(&inst, Ready, None).unwrap();

        assert_eq!(inst.status(), Ready);
        assert_eq!(inst.history().len(), base + 2);
    }
}
