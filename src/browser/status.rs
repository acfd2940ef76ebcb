//! Browser lifecycle states and the transition adjacency.
//!
//! The adjacency is an exhaustive `match` over the state sum type, so the
//! compiler guarantees every state declares its legal successors. `Closed`
//! is terminal but explicitly reopens to `Ready` or `Initializing` so an
//! instance can be reused without reallocation.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

// ============================================================================
// Constants
// ============================================================================

/// Maximum transition records retained per instance; oldest evicted first.
pub const TRANSITION_HISTORY_CAP: usize = 50;

// ============================================================================
// BrowserStatus
// ============================================================================

/// Lifecycle state of one browser instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BrowserStatus {
    /// Instance record exists; nothing allocated yet.
    Initializing,
    /// Warm-up before the browser is created.
    PreOpening,
    /// Browser allocation in progress.
    Creating,
    /// Browser allocated and idle.
    Ready,
    /// Device connection being attached.
    Connecting,
    /// Device attached; not yet serving traffic.
    Connected,
    /// Actively serving control/media traffic.
    Running,
    /// Running with media recording active.
    Recording,
    /// Teardown in progress.
    Closing,
    /// Torn down; reopenable.
    Closed,
    /// Browser allocation failed.
    OpenError,
    /// Device attach failed.
    ConnectionError,
    /// Page automation failed while running.
    PageControlError,
    /// Network fault while running or recording.
    NetworkError,
    /// Browser ran out of memory.
    MemoryError,
}

impl BrowserStatus {
    /// The state every new instance starts in.
    pub const INITIAL: Self = Self::Initializing;

    /// Returns the legal successor states.
    #[must_use]
    pub fn allowed_transitions(self) -> &'static [Self] {
        use BrowserStatus::*;

        match self {
            Initializing => &[PreOpening, Creating, OpenError],
            PreOpening => &[Ready, Connecting, OpenError, Closed],
            Creating => &[Ready, OpenError],
            Ready => &[Connecting, Closing, Closed],
            Connecting => &[Connected, Running, ConnectionError, Closing, Closed],
            Connected => &[Running, Recording, Closing, Closed],
            Running => &[
                Ready,
                Recording,
                Closing,
                Closed,
                PageControlError,
                NetworkError,
                MemoryError,
            ],
            Recording => &[Running, Closing, Closed, NetworkError, MemoryError],
            Closing => &[Closed],
            OpenError => &[Closing, Closed],
            ConnectionError => &[Closing, Closed, Ready],
            PageControlError => &[Closing, Closed, Ready],
            NetworkError => &[Closing, Closed, Ready],
            MemoryError => &[Closing, Closed],
            Closed => &[Ready, Initializing],
        }
    }

    /// Returns `true` if moving to `to` is legal.
    ///
    /// Self-transitions are always legal and treated as no-ops: they do
    /// not append history or fire notifications.
    #[must_use]
    pub fn can_transition(self, to: Self) -> bool {
        self == to || self.allowed_transitions().contains(&to)
    }

    /// Returns `true` if this is one of the error states.
    #[must_use]
    pub fn is_error(self) -> bool {
        matches!(
            self,
            Self::OpenError
                | Self::ConnectionError
                | Self::PageControlError
                | Self::NetworkError
                | Self::MemoryError
        )
    }

    /// All states, for exhaustive table checks in tests.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        use BrowserStatus::*;
        &[
            Initializing,
            PreOpening,
            Creating,
            Ready,
            Connecting,
            Connected,
            Running,
            Recording,
            Closing,
            Closed,
            OpenError,
            ConnectionError,
            PageControlError,
            NetworkError,
            MemoryError,
        ]
    }
}

impl fmt::Display for BrowserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

// ============================================================================
// TransitionRecord
// ============================================================================

/// Diagnostic record of one completed transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRecord {
    /// State before the transition.
    pub from: BrowserStatus,
    /// State after the transition.
    pub to: BrowserStatus,
    /// Wall-clock time of the transition.
    pub at: SystemTime,
    /// Free-text reason, if the caller supplied one.
    pub reason: Option<String>,
}

impl TransitionRecord {
    /// Creates a record timestamped now.
    #[must_use]
    pub fn new(from: BrowserStatus, to: BrowserStatus, reason: Option<String>) -> Self {
        Self {
            from,
            to,
            at: SystemTime::now(),
            reason,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
