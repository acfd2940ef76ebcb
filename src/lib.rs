//! Browser Gateway - device-facing gateway for remotely automated browsers.
//!
//! This library multiplexes many physical device connections (mobile
//! clients) onto server-managed, remotely automated browser sessions.
//! Devices speak a compact binary protocol over TCP (optionally TLS) or
//! WebSocket; the gateway authenticates them, tracks their liveness,
//! forwards control and media traffic to an external automation driver,
//! and reports traffic telemetry.
//!
//! # Architecture
//!
//! One gateway runs two TCP listeners (control and media planes) plus a
//! WebSocket proxy:
//!
//! - **Device side**: binary frames `[type][length][value]` with tagged
//!   fields; every processed frame is acknowledged
//! - **Driver side**: opaque payloads handed to [`AutomationDriver`] /
//!   [`DriverSession`] implementations
//!
//! Key design principles:
//!
//! - At most one live connection per session key; a reconnect closes the
//!   previous holder
//! - Exactly one [`BrowserInstance`] per user id, moved only along the
//!   declared lifecycle adjacency
//! - Heartbeat sweep, traffic flush, and idle cleanup run on their own
//!   periodic tasks, never on the IO path
//! - TLS contexts are built from a hot-swappable certificate store; a
//!   pushed update bounces both listeners
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use browser_gateway::{Gateway, GatewayConfig, Result};
//! # use browser_gateway::{AutomationDriver, ReportSink};
//! # async fn run(driver: Arc<dyn AutomationDriver>, sink: Arc<dyn ReportSink>) -> Result<()> {
//!
//! let config = GatewayConfig::default()
//!     .with_control_addr("0.0.0.0:8800".parse().unwrap())
//!     .with_media_addr("0.0.0.0:8801".parse().unwrap())
//!     .with_ws_addr("0.0.0.0:8802".parse().unwrap());
//!
//! let gateway = Gateway::new(config, driver, sink);
//! gateway.start().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`protocol`] | Binary framing: codec, tagged fields, typed messages |
//! | [`transport`] | Listeners, TLS, connection registries, WebSocket proxy |
//! | [`session`] | Device sessions and login verification |
//! | [`browser`] | Browser instance lifecycle state machine |
//! | [`driver`] | Automation-driver collaborator traits |
//! | [`telemetry`] | Traffic accounting and reporting |
//! | [`gateway`] | The assembled [`Gateway`] service |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe identity wrappers |
//! | [`config`] | [`GatewayConfig`] |

// ============================================================================
// Modules
// ============================================================================

/// Browser instance lifecycle: states, transitions, instance table.
pub mod browser;

/// Gateway configuration.
pub mod config;

/// Automation-driver collaborator traits.
pub mod driver;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// The assembled gateway service.
pub mod gateway;

/// Type-safe identifiers for gateway entities.
///
/// Newtype wrappers prevent mixing incompatible identifiers at compile time.
pub mod identifiers;

/// Binary protocol: frames, tagged fields, codec, typed messages.
pub mod protocol;

/// Device sessions and login verification.
pub mod session;

/// Traffic accounting and external reporting.
pub mod telemetry;

/// Connection transport: TCP listeners, TLS, registries, WebSocket proxy.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Gateway types
pub use config::GatewayConfig;
pub use gateway::Gateway;

// Protocol types
pub use protocol::{AckStatus, ByteOrder, Frame, FrameCodec, MAX_FRAME_LENGTH, Message, MessageType};

// Transport types
pub use transport::{CertBundle, CertificateStore, Conn, ConnectionRegistry, FrameHandler, Listener, WsProxy};

// Session types
pub use session::{DeviceSession, SessionTable, TokenStore};

// Browser lifecycle types
pub use browser::{BrowserInstance, BrowserStatus, InstanceManager, Lifecycle, StateChange, TransitionRecord};

// Driver traits
pub use driver::{AutomationDriver, DriverContext, DriverSession};

// Telemetry types
pub use telemetry::{GatewayEvent, ReportSink, TrafficRecord, TrafficTracker};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{AppType, ConnId, DeviceIdentity, NetworkType, Plane, SessionKey, UserId};
