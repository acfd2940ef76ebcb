//! Frame header types for the binary device protocol.
//!
//! A frame on the wire is `[type: u16][length: u32][value: length bytes]`.
//! Integer byte order is configurable per codec instance; devices in the
//! field speak both variants depending on firmware generation.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Size of the frame header in bytes: `u16` type + `u32` length.
pub const FRAME_HEADER_LENGTH: usize = 6;

/// Maximum allowed frame value length (3 MiB).
///
/// A frame declaring more than this is rejected with
/// [`Error::FrameTooLarge`] and the connection is reset.
pub const MAX_FRAME_LENGTH: u32 = 3_145_728;

// ============================================================================
// ByteOrder
// ============================================================================

/// Integer byte order used by one codec instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Network byte order (the default).
    Big,
    /// Little-endian, used by legacy device firmware.
    Little,
}

impl ByteOrder {
    /// Reads a `u16` from a 2-byte array in this order.
    #[inline]
    #[must_use]
    pub fn read_u16(self, bytes: [u8; 2]) -> u16 {
        match self {
            Self::Big => u16::from_be_bytes(bytes),
            Self::Little => u16::from_le_bytes(bytes),
        }
    }

    /// Reads a `u32` from a 4-byte array in this order.
    #[inline]
    #[must_use]
    pub fn read_u32(self, bytes: [u8; 4]) -> u32 {
        match self {
            Self::Big => u32::from_be_bytes(bytes),
            Self::Little => u32::from_le_bytes(bytes),
        }
    }

    /// Reads an `i32` from a 4-byte array in this order.
    #[inline]
    #[must_use]
    pub fn read_i32(self, bytes: [u8; 4]) -> i32 {
        match self {
            Self::Big => i32::from_be_bytes(bytes),
            Self::Little => i32::from_le_bytes(bytes),
        }
    }

    /// Reads an `i64` from an 8-byte array in this order.
    #[inline]
    #[must_use]
    pub fn read_i64(self, bytes: [u8; 8]) -> i64 {
        match self {
            Self::Big => i64::from_be_bytes(bytes),
            Self::Little => i64::from_le_bytes(bytes),
        }
    }

    /// Writes a `u16` in this order.
    #[inline]
    #[must_use]
    pub fn write_u16(self, value: u16) -> [u8; 2] {
        match self {
            Self::Big => value.to_be_bytes(),
            Self::Little => value.to_le_bytes(),
        }
    }

    /// Writes a `u32` in this order.
    #[inline]
    #[must_use]
    pub fn write_u32(self, value: u32) -> [u8; 4] {
        match self {
            Self::Big => value.to_be_bytes(),
            Self::Little => value.to_le_bytes(),
        }
    }

    /// Writes an `i32` in this order.
    #[inline]
    #[must_use]
    pub fn write_i32(self, value: i32) -> [u8; 4] {
        match self {
            Self::Big => value.to_be_bytes(),
            Self::Little => value.to_le_bytes(),
        }
    }

    /// Writes an `i64` in this order.
    #[inline]
    #[must_use]
    pub fn write_i64(self, value: i64) -> [u8; 8] {
        match self {
            Self::Big => value.to_be_bytes(),
            Self::Little => value.to_le_bytes(),
        }
    }
}

// ============================================================================
// MessageType
// ============================================================================

/// Wire type code of one frame.
///
/// Codes are fixed by the device firmware and must not be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageType {
    /// Device login with identity and token.
    Login = 1,
    /// Liveness signal.
    Heartbeats = 2,
    /// Control command payload.
    Control = 4,
    /// Audio media payload.
    Audio = 5,
    /// Video media payload.
    Video = 6,
    /// Acknowledgement of a processed frame.
    Ack = 7,
    /// Media payload returned to the device.
    ReturnMedia = 9,
    /// Control payload returned to the device.
    ReturnControl = 12,
    /// Free-text message.
    Message = 13,
    /// File upload chunk.
    UploadFile = 16,
    /// Device network-type change notification.
    NetworkType = 48,
}

impl MessageType {
    /// Returns the wire code of this type.
    #[inline]
    #[must_use]
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Maps a wire code back to a message type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedFrame`] for codes outside the supported set.
    pub fn from_code(code: u16) -> Result<Self> {
        match code {
            1 => Ok(Self::Login),
            2 => Ok(Self::Heartbeats),
            4 => Ok(Self::Control),
            5 => Ok(Self::Audio),
            6 => Ok(Self::Video),
            7 => Ok(Self::Ack),
            9 => Ok(Self::ReturnMedia),
            12 => Ok(Self::ReturnControl),
            13 => Ok(Self::Message),
            16 => Ok(Self::UploadFile),
            48 => Ok(Self::NetworkType),
            other => Err(Error::malformed(format!("unknown message type {other}"))),
        }
    }

    /// All supported message types, in code order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Login,
            Self::Heartbeats,
            Self::Control,
            Self::Audio,
            Self::Video,
            Self::Ack,
            Self::ReturnMedia,
            Self::ReturnControl,
            Self::Message,
            Self::UploadFile,
            Self::NetworkType,
        ]
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}({})", self.code())
    }
}

// ============================================================================
// Frame
// ============================================================================

/// One decoded protocol unit: type plus raw value bytes.
///
/// The value is the tag-ordered field body; [`Message`](super::Message)
/// gives it meaning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Wire type of this frame.
    pub message_type: MessageType,
    /// Raw value bytes (field body).
    pub value: Vec<u8>,
}

impl Frame {
    /// Creates a frame from a type and value body.
    #[inline]
    #[must_use]
    pub fn new(message_type: MessageType, value: Vec<u8>) -> Self {
        Self {
            message_type,
            value,
        }
    }

    /// Total encoded size of this frame including the header.
    #[inline]
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        FRAME_HEADER_LENGTH + self.value.len()
    }
}

// ============================================================================
// Tests
// ============================================================================
