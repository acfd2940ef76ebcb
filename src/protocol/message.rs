//! Typed protocol messages.
//!
//! [`Message`] gives meaning to a frame's field body. Tag numbers are fixed
//! by the device firmware; never renumber them.

// ============================================================================
// Imports
// ============================================================================

use crate::error::Result;
use crate::protocol::fields::FieldMap;
use crate::protocol::frame::{Frame, MessageType};
use crate::protocol::ByteOrder;

// ============================================================================
// Field Tags
// ============================================================================

mod tag {
    //! Per-message field tag numbers.

    pub mod login {
        pub const IMEI: u16 = 1;
        pub const IMSI: u16 = 2;
        pub const TOKEN: u16 = 3;
        pub const APP_TYPE: u16 = 4;
        pub const PAYLOAD: u16 = 5;
    }

    pub mod heartbeat {
        pub const TIMESTAMP: u16 = 1;
    }

    pub mod payload {
        pub const DATA: u16 = 1;
    }

    pub mod ack {
        pub const ACKED_TYPE: u16 = 1;
        pub const STATUS: u16 = 2;
        pub const BODY: u16 = 3;
    }

    pub mod text {
        pub const TEXT: u16 = 1;
    }

    pub mod upload {
        pub const NAME: u16 = 1;
        pub const DATA: u16 = 2;
    }

    pub mod network {
        pub const NETWORK_TYPE: u16 = 1;
    }
}

// ============================================================================
// AckStatus
// ============================================================================

/// Status code carried in an ACK frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    /// Frame processed successfully.
    Ok,
    /// Frame processing failed; the connection stays up.
    Error,
}

impl AckStatus {
    /// Returns the wire code: 0 for ok, 1 for error.
    #[inline]
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::Error => 1,
        }
    }

    /// Maps a wire code to a status; any non-zero value reads as error.
    #[inline]
    #[must_use]
    pub fn from_code(code: i32) -> Self {
        if code == 0 { Self::Ok } else { Self::Error }
    }
}

// ============================================================================
// Message
// ============================================================================

/// One typed protocol message.
///
/// Round-trip law: `Message::from_frame(&m.to_frame(order), order)`
/// reproduces every set field; absent optional fields come back as the
/// zero value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Device login (type 1).
    Login {
        /// Device hardware identity.
        imei: String,
        /// Subscriber identity.
        imsi: String,
        /// Pre-shared login token.
        token: String,
        /// Client application type.
        app_type: i32,
        /// Opaque driver login payload.
        payload: Vec<u8>,
    },
    /// Liveness signal (type 2).
    Heartbeat {
        /// Device-side timestamp, milliseconds.
        timestamp: i64,
    },
    /// Control command payload (type 4).
    Control {
        /// Opaque control bytes for the driver.
        payload: Vec<u8>,
    },
    /// Audio media payload (type 5).
    Audio {
        /// Encoded audio bytes.
        payload: Vec<u8>,
    },
    /// Video media payload (type 6).
    Video {
        /// Encoded video bytes.
        payload: Vec<u8>,
    },
    /// Acknowledgement of a processed frame (type 7).
    Ack {
        /// Type of the frame being acknowledged.
        acked_type: MessageType,
        /// Processing outcome.
        status: AckStatus,
        /// Optional response body (e.g. driver config JSON after login).
        body: Vec<u8>,
    },
    /// Media returned to the device (type 9).
    ReturnMedia {
        /// Encoded media bytes.
        payload: Vec<u8>,
    },
    /// Control returned to the device (type 12).
    ReturnControl {
        /// Opaque control bytes.
        payload: Vec<u8>,
    },
    /// Free-text message (type 13).
    Text {
        /// Message text.
        text: String,
    },
    /// File upload chunk (type 16).
    UploadFile {
        /// File name.
        name: String,
        /// Chunk bytes.
        data: Vec<u8>,
    },
    /// Device network-type change (type 48).
    NetworkTypeUpdate {
        /// New network type tag (e.g. `wifi`, `4g`).
        network_type: String,
    },
}

// ============================================================================
// Message - Type
// ============================================================================

impl Message {
    /// Returns the wire type of this message.
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Login { .. } => MessageType::Login,
            Self::Heartbeat { .. } => MessageType::Heartbeats,
            Self::Control { .. } => MessageType::Control,
            Self::Audio { .. } => MessageType::Audio,
            Self::Video { .. } => MessageType::Video,
            Self::Ack { .. } => MessageType::Ack,
            Self::ReturnMedia { .. } => MessageType::ReturnMedia,
            Self::ReturnControl { .. } => MessageType::ReturnControl,
            Self::Text { .. } => MessageType::Message,
            Self::UploadFile { .. } => MessageType::UploadFile,
            Self::NetworkTypeUpdate { .. } => MessageType::NetworkType,
        }
    }

    /// Builds the standard acknowledgement for a processed frame.
    #[must_use]
    pub fn ack(acked_type: MessageType, status: AckStatus) -> Self {
        Self::Ack {
            acked_type,
            status,
            body: Vec::new(),
        }
    }

    /// Builds an acknowledgement carrying a response body.
    #[must_use]
    pub fn ack_with_body(acked_type: MessageType, status: AckStatus, body: Vec<u8>) -> Self {
        Self::Ack {
            acked_type,
            status,
            body,
        }
    }
}

// ============================================================================
// Message - Wire Conversion
// ============================================================================

impl Message {
    /// Serializes this message into a frame.
    #[must_use]
    pub fn to_frame(&self, order: ByteOrder) -> Frame {
        let mut fields = FieldMap::new();

        match self {
            Self::Login {
                imei,
                imsi,
                token,
                app_type,
                payload,
            } => {
                fields
                    .put_str(tag::login::IMEI, imei.clone())
                    .put_str(tag::login::IMSI, imsi.clone())
                    .put_str(tag::login::TOKEN, token.clone())
                    .put_i32(tag::login::APP_TYPE, *app_type)
                    .put_bytes(tag::login::PAYLOAD, payload.clone());
            }
            Self::Heartbeat { timestamp } => {
                fields.put_i64(tag::heartbeat::TIMESTAMP, *timestamp);
            }
            Self::Control { payload }
            | Self::Audio { payload }
            | Self::Video { payload }
            | Self::ReturnMedia { payload }
            | Self::ReturnControl { payload } => {
                fields.put_bytes(tag::payload::DATA, payload.clone());
            }
            Self::Ack {
                acked_type,
                status,
                body,
            } => {
                fields
                    .put_i32(tag::ack::ACKED_TYPE, i32::from(acked_type.code()))
                    .put_i32(tag::ack::STATUS, status.code())
                    .put_bytes(tag::ack::BODY, body.clone());
            }
            Self::Text { text } => {
                fields.put_str(tag::text::TEXT, text.clone());
            }
            Self::UploadFile { name, data } => {
                fields
                    .put_str(tag::upload::NAME, name.clone())
                    .put_bytes(tag::upload::DATA, data.clone());
            }
            Self::NetworkTypeUpdate { network_type } => {
                fields.put_str(tag::network::NETWORK_TYPE, network_type.clone());
            }
        }

        Frame::new(self.message_type(), fields.encode(order))
    }

    /// Parses a frame's field body into a typed message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedFrame`](crate::Error::MalformedFrame) if
    /// the field body does not parse, or if an ACK names an unknown type.
    pub fn from_frame(frame: &Frame, order: ByteOrder) -> Result<Self> {
        let fields = FieldMap::decode(&frame.value, order)?;

        let message = match frame.message_type {
            MessageType::Login => Self::Login {
                imei: fields.get_str(tag::login::IMEI).to_owned(),
                imsi: fields.get_str(tag::login::IMSI).to_owned(),
                token: fields.get_str(tag::login::TOKEN).to_owned(),
                app_type: fields.get_i32(tag::login::APP_TYPE),
                payload: fields.get_bytes(tag::login::PAYLOAD).to_vec(),
            },
            MessageType::Heartbeats => Self::Heartbeat {
                timestamp: fields.get_i64(tag::heartbeat::TIMESTAMP),
            },
            MessageType::Control => Self::Control {
                payload: fields.get_bytes(tag::payload::DATA).to_vec(),
            },
            MessageType::Audio => Self::Audio {
                payload: fields.get_bytes(tag::payload::DATA).to_vec(),
            },
            MessageType::Video => Self::Video {
                payload: fields.get_bytes(tag::payload::DATA).to_vec(),
            },
            MessageType::Ack => Self::Ack {
                acked_type: MessageType::from_code(
                    u16::try_from(fields.get_i32(tag::ack::ACKED_TYPE)).unwrap_or(0),
                )?,
                status: AckStatus::from_code(fields.get_i32(tag::ack::STATUS)),
                body: fields.get_bytes(tag::ack::BODY).to_vec(),
            },
            MessageType::ReturnMedia => Self::ReturnMedia {
                payload: fields.get_bytes(tag::payload::DATA).to_vec(),
            },
            MessageType::ReturnControl => Self::ReturnControl {
                payload: fields.get_bytes(tag::payload::DATA).to_vec(),
            },
            MessageType::Message => Self::Text {
                text: fields.get_str(tag::text::TEXT).to_owned(),
            },
            MessageType::UploadFile => Self::UploadFile {
                name: fields.get_str(tag::upload::NAME).to_owned(),
                data: fields.get_bytes(tag::upload::DATA).to_vec(),
            },
            MessageType::NetworkType => Self::NetworkTypeUpdate {
                network_type: fields.get_str(tag::network::NETWORK_TYPE).to_owned(),
            },
        };

        Ok(message)
    }
}

// ============================================================================
// Tests
// ============================================================================
