//! Frame-level encode/decode with length enforcement.
//!
//! [`FrameCodec`] owns the byte order and the frame cap. The listener uses
//! [`FrameCodec::decode_header`] while streaming (header first, bounds
//! check, then the value), and [`FrameCodec::decode`] for whole buffers.

// ============================================================================
// Imports
// ============================================================================

use crate::error::{Error, Result};
use crate::protocol::frame::{FRAME_HEADER_LENGTH, Frame, MAX_FRAME_LENGTH, MessageType};
use crate::protocol::message::Message;
use crate::protocol::ByteOrder;

// ============================================================================
// FrameCodec
// ============================================================================

/// Stateless frame codec: byte order plus maximum value length.
///
/// One instance is shared per listener; cloning is trivial.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    byte_order: ByteOrder,
    max_frame_length: u32,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(ByteOrder::Big, MAX_FRAME_LENGTH)
    }
}

impl FrameCodec {
    /// Creates a codec with the given byte order and frame cap.
    #[inline]
    #[must_use]
    pub fn new(byte_order: ByteOrder, max_frame_length: u32) -> Self {
        Self {
            byte_order,
            max_frame_length,
        }
    }

    /// Returns this codec's byte order.
    #[inline]
    #[must_use]
    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    /// Returns this codec's maximum value length.
    #[inline]
    #[must_use]
    pub fn max_frame_length(&self) -> u32 {
        self.max_frame_length
    }
}

// ============================================================================
// FrameCodec - Encode
// ============================================================================

impl FrameCodec {
    /// Encodes a message into wire bytes (header plus field body).
    #[must_use]
    pub fn encode(&self, message: &Message) -> Vec<u8> {
        let frame = message.to_frame(self.byte_order);
        self.encode_frame(&frame)
    }

    /// Encodes a raw frame into wire bytes.
    #[must_use]
    pub fn encode_frame(&self, frame: &Frame) -> Vec<u8> {
        let mut buf = Vec::with_capacity(frame.encoded_len());
        buf.extend_from_slice(&self.byte_order.write_u16(frame.message_type.code()));
        buf.extend_from_slice(&self.byte_order.write_u32(frame.value.len() as u32));
        buf.extend_from_slice(&frame.value);
        buf
    }
}

// ============================================================================
// FrameCodec - Decode
// ============================================================================

impl FrameCodec {
    /// Parses a frame header, enforcing the length cap.
    ///
    /// Returns the message type and the declared value length.
    ///
    /// # Errors
    ///
    /// - [`Error::FrameTooLarge`] if the declared length exceeds the cap
    /// - [`Error::MalformedFrame`] for an unknown type code
    pub fn decode_header(&self, header: &[u8; FRAME_HEADER_LENGTH]) -> Result<(MessageType, u32)> {
        let code = self.byte_order.read_u16([header[0], header[1]]);
        let length = self
            .byte_order
            .read_u32([header[2], header[3], header[4], header[5]]);

        if length > self.max_frame_length {
            return Err(Error::frame_too_large(
                u64::from(length),
                u64::from(self.max_frame_length),
            ));
        }

        let message_type = MessageType::from_code(code)?;
        Ok((message_type, length))
    }

    /// Decodes a complete frame buffer into a message.
    ///
    /// # Errors
    ///
    /// - [`Error::FrameTooLarge`] if the declared length exceeds the cap
    /// - [`Error::MalformedFrame`] for truncated headers, value length
    ///   mismatches, unknown types, or bad field bodies
    pub fn decode(&self, bytes: &[u8]) -> Result<Message> {
        let frame = self.decode_frame(bytes)?;
        Message::from_frame(&frame, self.byte_order)
    }

    /// Decodes a complete frame buffer into a raw frame.
    ///
    /// # Errors
    ///
    /// Same conditions as [`FrameCodec::decode`], minus field-body parsing.
    pub fn decode_frame(&self, bytes: &[u8]) -> Result<Frame> {
        if bytes.len() < FRAME_HEADER_LENGTH {
            return Err(Error::malformed(format!(
                "truncated header: {} bytes",
                bytes.len()
            )));
        }

        let mut header = [0u8; FRAME_HEADER_LENGTH];
        header.copy_from_slice(&bytes[..FRAME_HEADER_LENGTH]);
        let (message_type, length) = self.decode_header(&header)?;

        let value = &bytes[FRAME_HEADER_LENGTH..];
        if value.len() != length as usize {
            return Err(Error::malformed(format!(
                "value length mismatch: declared {length}, got {}",
                value.len()
            )));
        }

        Ok(Frame::new(message_type, value.to_vec()))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::AckStatus;

    fn codec() -> FrameCodec {
        FrameCodec::default()
    }

    #[test]
    fn test_encode_decode_ack() {
        let message = Message::Ack {
            acked_type: MessageType::Heartbeats,
            status: AckStatus::Ok,
            body: Vec::new(),
        };
        let bytes = codec().encode(&message);
        let decoded = codec().decode(&bytes).expect("decode");
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_oversized_length_rejected() {
        // Declared length 4,000,000 > 3,145,728 cap.
        let order = ByteOrder::Big;
        let mut header = [0u8; FRAME_HEADER_LENGTH];
        header[..2].copy_from_slice(&order.write_u16(MessageType::Video.code()));
        header[2..].copy_from_slice(&order.write_u32(4_000_000));

        let err = codec().decode_header(&header).unwrap_err();
        assert!(matches!(
            err,
            Error::FrameTooLarge {
                length: 4_000_000,
                max: 3_145_728
            }
        ));
    }

    #[test]
    fn test_truncated_header_rejected() {
        let err = codec().decode(&[0x00, 0x01, 0x00]).unwrap_err();
        assert!(err.is_decode_error());
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let message = Message::Heartbeat { timestamp: 1 };
        let mut bytes = codec().encode(&message);
        bytes.push(0xAB); // trailing garbage beyond the declared length

        let err = codec().decode(&bytes).unwrap_err();
        assert!(err.is_decode_error());
    }

    #[test]
    fn test_unknown_type_rejected() {
        let order = ByteOrder::Big;
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&order.write_u16(99));
        bytes.extend_from_slice(&order.write_u32(0));

        assert!(codec().decode(&bytes).is_err());
    }

    #[test]
    fn test_little_endian_codec() {
        let codec = FrameCodec::new(ByteOrder::Little, MAX_FRAME_LENGTH);
        let message = Message::NetworkTypeUpdate {
            network_type: "wifi".into(),
        };
        let bytes = codec.encode(&message);
        assert_eq!(codec.decode(&bytes).expect("decode"), message);

        // The big-endian codec must not accept the little-endian header.
        assert!(FrameCodec::default().decode(&bytes).is_err());
    }

    #[test]
    fn test_max_length_boundary_accepted() {
        let order = ByteOrder::Big;
        let mut header = [0u8; FRAME_HEADER_LENGTH];
        header[..2].copy_from_slice(&order.write_u16(MessageType::Video.code()));
        header[2..].copy_from_slice(&order.write_u32(MAX_FRAME_LENGTH));

        assert!(codec().decode_header(&header).is_ok());
    }
}
