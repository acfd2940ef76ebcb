//! Browser instance lifecycle.
//!
//! Transport-independent: the state machine moves wherever a browser's
//! lifecycle must move (session creation, teardown, error recovery)
//! regardless of which plane triggered it.
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`status`] | [`BrowserStatus`] adjacency, [`TransitionRecord`] |
//! | [`lifecycle`] | [`Lifecycle`] service, [`StateChange`] notifications |
//! | [`instance`] | [`BrowserInstance`], [`InstanceManager`] |

// ============================================================================
// Modules
// ============================================================================

/// Browser instance records and the per-user table.
pub mod instance;

/// Validated transitions with change notifications.
pub mod lifecycle;

/// Lifecycle states and the transition adjacency.
pub mod status;

// ============================================================================
// Re-exports
// ============================================================================

pub use instance::{BrowserInstance, InstanceManager, LinkState};
pub use lifecycle::{Lifecycle, StateChange};
pub use status::{BrowserStatus, TRANSITION_HISTORY_CAP, TransitionRecord};
