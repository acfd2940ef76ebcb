//! Tagged-field bodies inside frame values.
//!
//! A frame value is a sequence of fields, each
//! `[tag: u16][wire type: u8][data]`, serialized in ascending tag order.
//! Wire types:
//!
//! | Code | Type | Data |
//! |------|------|------|
//! | 1 | int32 | 4 bytes |
//! | 2 | int64 | 8 bytes |
//! | 3 | string | u32 length + UTF-8 bytes |
//! | 4 | bytes | u32 length + raw bytes |
//!
//! Absent tags decode to the type's zero value ("" / empty / 0), so old
//! firmware omitting optional fields stays decodable.

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::protocol::ByteOrder;

// ============================================================================
// Constants
// ============================================================================

const WIRE_INT32: u8 = 1;
const WIRE_INT64: u8 = 2;
const WIRE_STRING: u8 = 3;
const WIRE_BYTES: u8 = 4;

// ============================================================================
// FieldValue
// ============================================================================

/// One decoded field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// 32-bit signed integer.
    Int32(i32),
    /// 64-bit signed integer.
    Int64(i64),
    /// UTF-8 string.
    Str(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
}

impl FieldValue {
    fn wire_type(&self) -> u8 {
        match self {
            Self::Int32(_) => WIRE_INT32,
            Self::Int64(_) => WIRE_INT64,
            Self::Str(_) => WIRE_STRING,
            Self::Bytes(_) => WIRE_BYTES,
        }
    }
}

// ============================================================================
// FieldMap
// ============================================================================

/// A tag-ordered collection of fields.
///
/// Backed by a `BTreeMap` so iteration (and therefore encoding) is always
/// in ascending tag order, matching what device firmware expects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMap {
    fields: BTreeMap<u16, FieldValue>,
}

// ============================================================================
// FieldMap - Building
// ============================================================================

impl FieldMap {
    /// Creates an empty field map.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an int32 field. Overwrites any existing value for the tag.
    pub fn put_i32(&mut self, tag: u16, value: i32) -> &mut Self {
        self.fields.insert(tag, FieldValue::Int32(value));
        self
    }

    /// Inserts an int64 field.
    pub fn put_i64(&mut self, tag: u16, value: i64) -> &mut Self {
        self.fields.insert(tag, FieldValue::Int64(value));
        self
    }

    /// Inserts a string field.
    pub fn put_str(&mut self, tag: u16, value: impl Into<String>) -> &mut Self {
        self.fields.insert(tag, FieldValue::Str(value.into()));
        self
    }

    /// Inserts a bytes field.
    pub fn put_bytes(&mut self, tag: u16, value: impl Into<Vec<u8>>) -> &mut Self {
        self.fields.insert(tag, FieldValue::Bytes(value.into()));
        self
    }

    /// Returns the number of fields.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if no fields are set.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

// ============================================================================
// FieldMap - Reading
// ============================================================================

impl FieldMap {
    /// Reads an int32 field; absent tags read as 0.
    #[must_use]
    pub fn get_i32(&self, tag: u16) -> i32 {
        match self.fields.get(&tag) {
            Some(FieldValue::Int32(v)) => *v,
            _ => 0,
        }
    }

    /// Reads an int64 field; absent tags read as 0.
    #[must_use]
    pub fn get_i64(&self, tag: u16) -> i64 {
        match self.fields.get(&tag) {
            Some(FieldValue::Int64(v)) => *v,
            _ => 0,
        }
    }

    /// Reads a string field; absent tags read as the empty string.
    #[must_use]
    pub fn get_str(&self, tag: u16) -> &str {
        match self.fields.get(&tag) {
            Some(FieldValue::Str(v)) => v,
            _ => "",
        }
    }

    /// Reads a bytes field; absent tags read as the empty slice.
    #[must_use]
    pub fn get_bytes(&self, tag: u16) -> &[u8] {
        match self.fields.get(&tag) {
            Some(FieldValue::Bytes(v)) => v,
            _ => &[],
        }
    }
}

// ============================================================================
// FieldMap - Wire Codec
// ============================================================================

impl FieldMap {
    /// Serializes all fields in tag order.
    #[must_use]
    pub fn encode(&self, order: ByteOrder) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_hint());

        for (tag, value) in &self.fields {
            buf.extend_from_slice(&order.write_u16(*tag));
            buf.push(value.wire_type());

            match value {
                FieldValue::Int32(v) => buf.extend_from_slice(&order.write_i32(*v)),
                FieldValue::Int64(v) => buf.extend_from_slice(&order.write_i64(*v)),
                FieldValue::Str(v) => {
                    buf.extend_from_slice(&order.write_u32(v.len() as u32));
                    buf.extend_from_slice(v.as_bytes());
                }
                FieldValue::Bytes(v) => {
                    buf.extend_from_slice(&order.write_u32(v.len() as u32));
                    buf.extend_from_slice(v);
                }
            }
        }

        buf
    }

    /// Parses a field body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedFrame`] on truncated data, an unknown wire
    /// type, a non-UTF-8 string, or a duplicate tag.
    pub fn decode(bytes: &[u8], order: ByteOrder) -> Result<Self> {
        let mut cursor = Cursor {
            bytes,
            pos: 0,
            order,
        };
        let mut fields = BTreeMap::new();

        while !cursor.at_end() {
            let tag = cursor.read_u16()?;
            let wire_type = cursor.read_u8()?;

            let value = match wire_type {
                WIRE_INT32 => FieldValue::Int32(cursor.read_i32()?),
                WIRE_INT64 => FieldValue::Int64(cursor.read_i64()?),
                WIRE_STRING => {
                    let data = cursor.read_len_prefixed()?;
                    let text = String::from_utf8(data.to_vec())
                        .map_err(|_| Error::malformed(format!("non-UTF-8 string at tag {tag}")))?;
                    FieldValue::Str(text)
                }
                WIRE_BYTES => FieldValue::Bytes(cursor.read_len_prefixed()?.to_vec()),
                other => {
                    return Err(Error::malformed(format!(
                        "unknown wire type {other} at tag {tag}"
                    )));
                }
            };

            if fields.insert(tag, value).is_some() {
                return Err(Error::malformed(format!("duplicate tag {tag}")));
            }
        }

        Ok(Self { fields })
    }

    fn encoded_hint(&self) -> usize {
        self.fields
            .values()
            .map(|v| {
                3 + match v {
                    FieldValue::Int32(_) => 4,
                    FieldValue::Int64(_) => 8,
                    FieldValue::Str(s) => 4 + s.len(),
                    FieldValue::Bytes(b) => 4 + b.len(),
                }
            })
            .sum()
    }
}

// ============================================================================
// Cursor
// ============================================================================

/// Bounds-checked reader over a field body.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
    order: ByteOrder,
}

impl<'a> Cursor<'a> {
    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| Error::malformed(format!("truncated field at offset {}", self.pos)))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        Ok(self.order.read_u16([bytes[0], bytes[1]]))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(self.order.read_u32([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_i32(&mut self) -> Result<i32> {
        let bytes = self.take(4)?;
        Ok(self.order.read_i32([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_i64(&mut self) -> Result<i64> {
        let bytes = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(bytes);
        Ok(self.order.read_i64(arr))
    }

    fn read_len_prefixed(&mut self) -> Result<&'a [u8]> {
        let len = self.read_u32()? as usize;
        self.take(len)
    }
}

// ============================================================================
// Tests
// ============================================================================
