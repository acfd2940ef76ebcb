//! Connection transport: TCP listeners, TLS, registries, WebSocket proxy.
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`conn`] | [`Conn`] handle, [`ConnCommand`] |
//! | [`registry`] | [`ConnectionRegistry`] with heartbeat sweep |
//! | [`tls`] | [`CertificateStore`], [`CertBundle`], rustls context build |
//! | [`listener`] | [`Listener`], [`FrameHandler`] |
//! | [`ws`] | [`WsProxy`] |

// ============================================================================
// Modules
// ============================================================================

/// Connection handles and outbound queues.
pub mod conn;

/// TCP listener bootstrap and the per-connection frame pipeline.
pub mod listener;

/// Keyed connection registries with heartbeat-based eviction.
pub mod registry;

/// Certificate store and TLS server contexts.
pub mod tls;

/// WebSocket proxy endpoints.
pub mod ws;

// ============================================================================
// Re-exports
// ============================================================================

pub use conn::{Conn, ConnCommand};
pub use listener::{FrameHandler, Listener};
pub use registry::ConnectionRegistry;
pub use tls::{CertBundle, CertificateStore};
pub use ws::WsProxy;
