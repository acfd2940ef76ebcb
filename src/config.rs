//! Gateway configuration.
//!
//! [`GatewayConfig`] collects every tunable the gateway needs: bind
//! addresses, codec byte order and frame cap, heartbeat/sweep/flush timing,
//! and TLS toggles. Plain struct with chainable setters; defaults match the
//! production deployment.

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::time::Duration;

use crate::protocol::ByteOrder;

// ============================================================================
// GatewayConfig
// ============================================================================

/// Configuration for a [`Gateway`](crate::gateway::Gateway).
///
/// # Example
///
/// ```
/// use browser_gateway::GatewayConfig;
/// use std::time::Duration;
///
/// let config = GatewayConfig::default()
///     .with_control_addr("0.0.0.0:8800".parse().unwrap())
///     .with_heartbeat_ttl(Duration::from_secs(90))
///     .with_control_tls(true);
/// ```
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Control-plane bind address.
    pub control_addr: SocketAddr,
    /// Media-plane bind address.
    pub media_addr: SocketAddr,
    /// WebSocket proxy bind address.
    pub ws_addr: SocketAddr,
    /// Byte order for the binary codec.
    pub byte_order: ByteOrder,
    /// Maximum frame value length in bytes.
    pub max_frame_length: u32,
    /// Heartbeat gap after which a connection is considered dead.
    pub heartbeat_ttl: Duration,
    /// Interval between heartbeat sweeps.
    pub sweep_interval: Duration,
    /// Interval between traffic flushes.
    pub flush_interval: Duration,
    /// Heartbeat gap after which a browser instance is cleaned up.
    pub instance_idle_ttl: Duration,
    /// Bound on the graceful-drain wait during `stop()`.
    pub shutdown_drain: Duration,
    /// Whether the control listener should attempt TLS.
    pub control_tls: bool,
    /// Whether the media listener should attempt TLS.
    pub media_tls: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            control_addr: "127.0.0.1:8800".parse().expect("valid literal"),
            media_addr: "127.0.0.1:8801".parse().expect("valid literal"),
            ws_addr: "127.0.0.1:8802".parse().expect("valid literal"),
            byte_order: ByteOrder::Big,
            max_frame_length: crate::protocol::MAX_FRAME_LENGTH,
            heartbeat_ttl: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(30),
            flush_interval: Duration::from_secs(300),
            instance_idle_ttl: Duration::from_secs(300),
            shutdown_drain: Duration::from_secs(5),
            control_tls: false,
            media_tls: false,
        }
    }
}

// ============================================================================
// GatewayConfig - Setters
// ============================================================================

impl GatewayConfig {
    /// Sets the control-plane bind address.
    #[must_use]
    pub fn with_control_addr(mut self, addr: SocketAddr) -> Self {
        self.control_addr = addr;
        self
    }

    /// Sets the media-plane bind address.
    #[must_use]
    pub fn with_media_addr(mut self, addr: SocketAddr) -> Self {
        self.media_addr = addr;
        self
    }

    /// Sets the WebSocket proxy bind address.
    #[must_use]
    pub fn with_ws_addr(mut self, addr: SocketAddr) -> Self {
        self.ws_addr = addr;
        self
    }

    /// Sets the codec byte order.
    #[must_use]
    pub fn with_byte_order(mut self, order: ByteOrder) -> Self {
        self.byte_order = order;
        self
    }

    /// Sets the maximum frame value length.
    #[must_use]
    pub fn with_max_frame_length(mut self, max: u32) -> Self {
        self.max_frame_length = max;
        self
    }

    /// Sets the heartbeat TTL.
    #[must_use]
    pub fn with_heartbeat_ttl(mut self, ttl: Duration) -> Self {
        self.heartbeat_ttl = ttl;
        self
    }

    /// Sets the sweep interval.
    #[must_use]
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Sets the traffic flush interval.
    #[must_use]
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Sets the instance idle TTL.
    #[must_use]
    pub fn with_instance_idle_ttl(mut self, ttl: Duration) -> Self {
        self.instance_idle_ttl = ttl;
        self
    }

    /// Sets the graceful-drain bound for `stop()`.
    #[must_use]
    pub fn with_shutdown_drain(mut self, drain: Duration) -> Self {
        self.shutdown_drain = drain;
        self
    }

    /// Enables or disables TLS on the control listener.
    #[must_use]
    pub fn with_control_tls(mut self, tls: bool) -> Self {
        self.control_tls = tls;
        self
    }

    /// Enables or disables TLS on the media listener.
    #[must_use]
    pub fn with_media_tls(mut self, tls: bool) -> Self {
        self.media_tls = tls;
        self
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.max_frame_length, 3_145_728);
        assert_eq!(config.heartbeat_ttl, Duration::from_secs(60));
        assert_eq!(config.flush_interval, Duration::from_secs(300));
        assert!(!config.control_tls);
    }

    #[test]
    fn test_chained_setters() {
        let config = GatewayConfig::default()
            .with_heartbeat_ttl(Duration::from_secs(90))
            .with_control_tls(true)
            .with_byte_order(ByteOrder::Little);
        assert_eq!(config.heartbeat_ttl, Duration::from_secs(90));
        assert!(config.control_tls);
        assert_eq!(config.byte_order, ByteOrder::Little);
    }
}
