//! Type-safe identifiers for gateway entities.
//!
//! Newtype wrappers prevent mixing incompatible identifiers at compile time:
//! a [`SessionKey`] never ends up where a [`UserId`] is expected, and a raw
//! string never masquerades as a [`DeviceIdentity`].
//!
//! | Type | Derived from | Used by |
//! |------|-------------|---------|
//! | [`DeviceIdentity`] | IMEI + IMSI pair | login, traffic keys |
//! | [`SessionKey`] | device identity | connection registries |
//! | [`UserId`] | stable hash of identity | browser instances, WS proxy |
//! | [`ConnId`] | random UUID v4 | connection handles |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

// ============================================================================
// DeviceIdentity
// ============================================================================

/// The IMEI/IMSI pair identifying one physical device.
///
/// Parsed from login frames and from WebSocket paths of the form
/// `<imei>_<imsi>`. Both parts must be non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Device hardware identity.
    pub imei: String,
    /// Subscriber identity.
    pub imsi: String,
}

impl DeviceIdentity {
    /// Creates an identity from its two parts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIdentity`] if either part is empty.
    pub fn new(imei: impl Into<String>, imsi: impl Into<String>) -> Result<Self> {
        let imei = imei.into();
        let imsi = imsi.into();

        if imei.is_empty() || imsi.is_empty() {
            return Err(Error::invalid_identity(format!("{imei}_{imsi}")));
        }

        Ok(Self { imei, imsi })
    }

    /// Parses the `<imei>_<imsi>` path segment used by WebSocket endpoints.
    ///
    /// The segment must consist of exactly two non-empty `_`-separated parts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIdentity`] for any other shape.
    pub fn parse_path_segment(segment: &str) -> Result<Self> {
        let mut parts = segment.split('_');

        match (parts.next(), parts.next(), parts.next()) {
            (Some(imei), Some(imsi), None) if !imei.is_empty() && !imsi.is_empty() => Ok(Self {
                imei: imei.to_owned(),
                imsi: imsi.to_owned(),
            }),
            _ => Err(Error::invalid_identity(segment)),
        }
    }

    /// Returns the session key derived from this identity.
    #[inline]
    #[must_use]
    pub fn session_key(&self) -> SessionKey {
        SessionKey(format!("{}_{}", self.imei, self.imsi))
    }

    /// Returns the stable user id derived from this identity.
    ///
    /// FNV-1a over `imei`, the separator, and `imsi`. Stable across
    /// processes, so reconnecting devices land on the same instance.
    #[must_use]
    pub fn user_id(&self) -> UserId {
        const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
        const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

        let mut hash = FNV_OFFSET;
        for byte in self
            .imei
            .bytes()
            .chain(std::iter::once(b'_'))
            .chain(self.imsi.bytes())
        {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(FNV_PRIME);
        }

        UserId(hash)
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.imei, self.imsi)
    }
}

// ============================================================================
// SessionKey
// ============================================================================

/// Composite key deduplicating device connections.
///
/// Derived from [`DeviceIdentity`]; at most one live connection exists per
/// session key in each registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey(String);

impl SessionKey {
    /// Returns the key as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// UserId
// ============================================================================

/// Stable per-device user id.
///
/// A hash of the IMEI/IMSI pair; keys browser instances and WebSocket proxy
/// sessions. Exactly one [`BrowserInstance`](crate::browser::BrowserInstance)
/// exists per user id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(u64);

impl UserId {
    /// Returns the raw hash value.
    #[inline]
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

// ============================================================================
// ConnId
// ============================================================================

/// Unique id of one accepted connection.
///
/// Random per accept; distinguishes a replaced connection from its
/// replacement even when both carry the same session key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnId(Uuid);

impl ConnId {
    /// Generates a fresh connection id.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// AppType
// ============================================================================

/// Client application type reported at login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppType(pub i32);

impl fmt::Display for AppType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// NetworkType
// ============================================================================

/// Network type tag reported by the device (e.g. `wifi`, `4g`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkType(pub String);

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Plane
// ============================================================================

/// Transport plane a connection belongs to.
///
/// The gateway runs one listener, one registry pair, and one traffic tracker
/// per plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plane {
    /// Control-plane: login, heartbeats, command traffic.
    Control,
    /// Media-plane: audio/video payloads.
    Media,
}

impl fmt::Display for Plane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Control => f.write_str("control"),
            Self::Media => f.write_str("media"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_rejects_empty_parts() {
        assert!(DeviceIdentity::new("", "460001").is_err());
        assert!(DeviceIdentity::new("86012345", "").is_err());
        assert!(DeviceIdentity::new("86012345", "460001").is_ok());
    }

    #[test]
    fn test_parse_path_segment() {
        let identity = DeviceIdentity::parse_path_segment("860123_460001").expect("valid segment");
        assert_eq!(identity.imei, "860123");
        assert_eq!(identity.imsi, "460001");
    }

    #[test]
    fn test_parse_path_segment_malformed() {
        assert!(DeviceIdentity::parse_path_segment("860123").is_err());
        assert!(DeviceIdentity::parse_path_segment("a_b_c").is_err());
        assert!(DeviceIdentity::parse_path_segment("_460001").is_err());
        assert!(DeviceIdentity::parse_path_segment("860123_").is_err());
        assert!(DeviceIdentity::parse_path_segment("").is_err());
    }

    #[test]
    fn test_user_id_stable() {
        let a = DeviceIdentity::new("860123", "460001").unwrap();
        let b = DeviceIdentity::new("860123", "460001").unwrap();
        assert_eq!(a.user_id(), b.user_id());
    }

    #[test]
    fn test_user_id_distinguishes_split_point() {
        // "86_0123" and "860_123" must not collide via concatenation.
        let a = DeviceIdentity::new("86", "0123").unwrap();
        let b = DeviceIdentity::new("860", "123").unwrap();
        assert_ne!(a.user_id(), b.user_id());
    }

    #[test]
    fn test_session_key_display() {
        let identity = DeviceIdentity::new("860123", "460001").unwrap();
        assert_eq!(identity.session_key().to_string(), "860123_460001");
    }

    #[test]
    fn test_conn_id_unique() {
        assert_ne!(ConnId::generate(), ConnId::generate());
    }
}
