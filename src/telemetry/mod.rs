//! Traffic accounting and external reporting.
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`report`] | [`ReportSink`], [`TrafficRecord`], [`GatewayEvent`] |
//! | [`traffic`] | [`TrafficTracker`], [`TrafficKey`] |

// ============================================================================
// Modules
// ============================================================================

/// Reporting sink interface and record types.
pub mod report;

/// Per-plane traffic accumulation and flushing.
pub mod traffic;

// ============================================================================
// Re-exports
// ============================================================================

pub use report::{GatewayEvent, ReportSink, TrafficRecord};
pub use traffic::{FLUSH_BATCH_SIZE, TrafficKey, TrafficTracker};
