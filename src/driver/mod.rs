//! Automation-driver interface.
//!
//! The external browser-automation driver is consumed only through these
//! narrow traits; its internals are not this crate's concern. Teardown is
//! explicit through [`DriverSession::close`] — there is no runtime method
//! lookup on a loosely typed handle.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::identifiers::{Plane, UserId};

// ============================================================================
// DriverContext
// ============================================================================

/// Opaque per-connection context handed to [`DriverSession::handle`].
///
/// Carries who sent the bytes and over which plane; the driver uses it to
/// route state internally.
#[derive(Debug, Clone)]
pub struct DriverContext {
    /// The user whose connection produced the bytes.
    pub user: UserId,
    /// The transport plane the bytes arrived on.
    pub plane: Plane,
}

// ============================================================================
// AutomationDriver
// ============================================================================

/// The external component that drives remote browsers.
///
/// One driver serves the whole gateway; per-user state lives behind
/// [`DriverSession`] handles returned from
/// [`AutomationDriver::open_session`].
#[async_trait]
pub trait AutomationDriver: Send + Sync {
    /// Authenticates a device's opaque login payload.
    ///
    /// Returns the JSON configuration the device receives in its login
    /// ACK.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Driver`](crate::Error::Driver) if the driver
    /// rejects the payload.
    async fn login(&self, payload: &[u8]) -> Result<serde_json::Value>;

    /// Opens (or returns) the driver session for a user.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Driver`](crate::Error::Driver) if the driver
    /// cannot allocate a browser.
    async fn open_session(&self, user: UserId) -> Result<Arc<dyn DriverSession>>;

    /// Notifies the driver that a control-plane connection appeared.
    async fn on_control_connected(&self, user: UserId);

    /// Notifies the driver that a control-plane connection went away.
    async fn on_control_disconnected(&self, user: UserId);

    /// Notifies the driver that a media-plane connection appeared.
    async fn on_media_connected(&self, user: UserId);

    /// Notifies the driver that a media-plane connection went away.
    async fn on_media_disconnected(&self, user: UserId);
}

// ============================================================================
// DriverSession
// ============================================================================

/// Per-user handle into the automation driver.
///
/// Held by the browser instance and the WebSocket proxy; closed exactly
/// once when the instance is torn down.
#[async_trait]
pub trait DriverSession: Send + Sync {
    /// Feeds binary frames (control or media bytes) to the driver.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Driver`](crate::Error::Driver) on driver failure.
    async fn handle(&self, ctx: &DriverContext, bytes: &[u8]) -> Result<()>;

    /// Feeds an extension-originated WebSocket text frame to the driver.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Driver`](crate::Error::Driver) on driver failure.
    async fn receive_message_from_web_socket(&self, text: &str) -> Result<()>;

    /// Releases the driver-side browser. Idempotent.
    async fn close(&self);
}
