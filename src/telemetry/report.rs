//! Reporting sink interface and record types.
//!
//! The reporting collaborator is external; the gateway only knows how to
//! hand it JSON traffic batches and discrete events. Delivery failures are
//! the caller's problem to log and drop — there is no retry queue here.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::identifiers::{Plane, UserId};

// ============================================================================
// TrafficRecord
// ============================================================================

/// One flushed traffic counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficRecord {
    /// Device hardware identity.
    pub imei: String,
    /// Subscriber identity.
    pub imsi: String,
    /// Application type reported at login.
    pub app_type: i32,
    /// Client IP the traffic arrived from.
    pub client_ip: String,
    /// Accumulated bytes for this window.
    pub bytes: i64,
}

// ============================================================================
// GatewayEvent
// ============================================================================

/// Discrete events reported alongside traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// New certificate material was installed and the listeners bounced.
    CertificateUpdated,
    /// A listener restart failed; the previous listener state persists.
    ListenerRestartFailed {
        /// The plane whose restart failed.
        plane: Plane,
    },
    /// A connection was evicted by the heartbeat sweep.
    SessionEvicted {
        /// The plane the connection lived on.
        plane: Plane,
        /// The session key evicted.
        session_key: String,
    },
    /// A browser instance was removed by idle cleanup.
    InstanceEvicted {
        /// The instance's user id.
        user: UserId,
    },
}

// ============================================================================
// ReportSink
// ============================================================================

/// External reporting collaborator.
#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Delivers one traffic batch (JSON array of [`TrafficRecord`]).
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReportFlush`](crate::Error::ReportFlush) on
    /// delivery failure; the caller logs and drops the batch.
    async fn send_traffic(&self, plane: Plane, batch: serde_json::Value) -> Result<()>;

    /// Reports one discrete event.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReportFlush`](crate::Error::ReportFlush) on
    /// delivery failure.
    async fn report_event(&self, event: GatewayEvent) -> Result<()>;
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_traffic_record_json_shape() {
        let record = TrafficRecord {
            imei: "860123".into(),
            imsi: "460001".into(),
            app_type: 2,
            client_ip: "10.0.0.7".into(),
            bytes: 4096,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["imei"], "860123");
        assert_eq!(json["bytes"], 4096);
    }

    #[test]
    fn test_event_json_tagging() {
        let event = GatewayEvent::ListenerRestartFailed {
            plane: Plane::Media,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "listener_restart_failed");
        assert_eq!(json["plane"], "media");
    }
}
