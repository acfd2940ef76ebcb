//! Binary device protocol.
//!
//! Wire format: `[type: u16][length: u32][value: length bytes]`, byte order
//! configurable per codec instance, value length capped at
//! [`MAX_FRAME_LENGTH`]. The value is a tag-ordered field body; see
//! [`fields`] for the field wire format and [`message`] for the typed
//! message set.
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`frame`] | [`Frame`], [`MessageType`], [`ByteOrder`], size constants |
//! | [`fields`] | [`FieldMap`], [`FieldValue`] |
//! | [`codec`] | [`FrameCodec`] encode/decode with length enforcement |
//! | [`message`] | [`Message`], [`AckStatus`] |

// ============================================================================
// Modules
// ============================================================================

/// Frame-level encode/decode with length enforcement.
pub mod codec;

/// Tagged-field bodies inside frame values.
pub mod fields;

/// Frame header types and wire constants.
pub mod frame;

/// Typed protocol messages.
pub mod message;

// ============================================================================
// Re-exports
// ============================================================================

pub use codec::FrameCodec;
pub use fields::{FieldMap, FieldValue};
pub use frame::{ByteOrder, FRAME_HEADER_LENGTH, Frame, MAX_FRAME_LENGTH, MessageType};
pub use message::{AckStatus, Message};
