//! Device token bindings and login verification.
//!
//! A device logs in with its identity and a pre-shared token; the binding
//! is provisioned out of band (management plane). An unknown identity or
//! a token mismatch is an [`Error::AuthFailure`]: the connection is
//! rejected with no ACK and no registry entry.

// ============================================================================
// Imports
// ============================================================================

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::warn;

use crate::error::{Error, Result};
use crate::identifiers::DeviceIdentity;

// ============================================================================
// TokenStore
// ============================================================================

/// Device-identity to token bindings.
///
/// Touched only at login and provisioning time; a plain map behind a
/// read-write lock is enough.
#[derive(Default)]
pub struct TokenStore {
    bindings: RwLock<FxHashMap<DeviceIdentity, String>>,
}

impl TokenStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds (or rebinds) a token to a device identity.
    pub fn bind(&self, identity: DeviceIdentity, token: impl Into<String>) {
        self.bindings.write().insert(identity, token.into());
    }

    /// Removes a binding. Idempotent.
    pub fn unbind(&self, identity: &DeviceIdentity) {
        self.bindings.write().remove(identity);
    }

    /// Verifies a login token against the stored binding.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AuthFailure`] if the identity is unknown or the
    /// token does not match.
    pub fn verify(&self, identity: &DeviceIdentity, token: &str) -> Result<()> {
        let matched = self
            .bindings
            .read()
            .get(identity)
            .is_some_and(|bound| bound == token);

        if matched {
            Ok(())
        } else {
            warn!(%identity, "Login token rejected");
            Err(Error::auth_failure(identity.to_string()))
        }
    }

    /// Returns the number of bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.read().len()
    }

    /// Returns `true` if no bindings exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.read().is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================
