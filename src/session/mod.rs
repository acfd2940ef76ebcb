//! Device sessions and login verification.
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`session`] | [`DeviceSession`], [`SessionTable`] |
//! | [`auth`] | [`TokenStore`] |

// ============================================================================
// Modules
// ============================================================================

/// Device token bindings and login verification.
pub mod auth;

/// Device session records and the per-plane table.
pub mod session;

// ============================================================================
// Re-exports
// ============================================================================

pub use auth::TokenStore;
pub use session::{DeviceSession, SessionTable};
