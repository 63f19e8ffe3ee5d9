//! Low-level protobuf wire format.
//!
//! Each field is encoded as:
//! - A varint key holding the field number and wire type
//! - The field data, whose layout depends on the wire type
//!
//! Wire types:
//! - 0: VARINT (int32, int64, uint32, uint64, sint32, sint64, bool, enum)
//! - 1: I64 (fixed64, sfixed64, double)
//! - 2: LEN (string, bytes, embedded messages, packed repeated fields)
//! - 3/4: group start and end (proto2 only, skipped)
//! - 5: I32 (fixed32, sfixed32, float)

use crate::error::{Error, Result};
use crate::registry::ScalarKind;
use crate::MAX_FIELD_NUMBER;
use bytes::BufMut;

/// Protobuf wire types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WireType {
    /// Variable-length integer
    Varint = 0,
    /// 64-bit fixed-width
    I64 = 1,
    /// Length-delimited (strings, bytes, embedded messages)
    Len = 2,
    /// Start group (deprecated)
    StartGroup = 3,
    /// End group (deprecated)
    EndGroup = 4,
    /// 32-bit fixed-width
    I32 = 5,
}

impl WireType {
    /// Wire type of a single unpacked scalar
    pub fn of_scalar(kind: ScalarKind) -> Self {
        match kind {
            ScalarKind::Double | ScalarKind::Fixed64 | ScalarKind::Sfixed64 => WireType::I64,
            ScalarKind::Float | ScalarKind::Fixed32 | ScalarKind::Sfixed32 => WireType::I32,
            ScalarKind::String | ScalarKind::Bytes => WireType::Len,
            _ => WireType::Varint,
        }
    }

    fn from_key(value: u8, offset: usize) -> Result<Self> {
        match value {
            0 => Ok(WireType::Varint),
            1 => Ok(WireType::I64),
            2 => Ok(WireType::Len),
            3 => Ok(WireType::StartGroup),
            4 => Ok(WireType::EndGroup),
            5 => Ok(WireType::I32),
            _ => Err(Error::invalid_wire_format(
                offset,
                format!("unknown wire type: {}", value),
            )),
        }
    }
}

/// Decode a varint from the given bytes.
///
/// Returns the decoded value and the number of bytes consumed.
pub fn decode_varint(data: &[u8]) -> Option<(u64, usize)> {
    let mut result: u64 = 0;
    let mut shift = 0;

    for (i, &byte) in data.iter().enumerate() {
        if i >= 10 {
            // Varints are at most 10 bytes for a 64-bit value
            return None;
        }

        result |= ((byte & 0x7F) as u64) << shift;
        shift += 7;

        if byte & 0x80 == 0 {
            return Some((result, i + 1));
        }
    }

    None
}

/// Writes a field key
pub fn encode_key(number: u32, wire_type: WireType, buf: &mut impl BufMut) {
    prost::encoding::encode_varint(((number as u64) << 3) | wire_type as u64, buf);
}

/// Writes a varint
pub fn encode_varint(value: u64, buf: &mut impl BufMut) {
    prost::encoding::encode_varint(value, buf);
}

/// Writes a length-delimited payload, prefix included
pub fn encode_len(payload: &[u8], buf: &mut impl BufMut) {
    prost::encoding::encode_varint(payload.len() as u64, buf);
    buf.put_slice(payload);
}

/// ZigZag-encodes a signed 32-bit value
pub fn zigzag32(value: i32) -> u64 {
    ((value << 1) ^ (value >> 31)) as u32 as u64
}

/// ZigZag-encodes a signed 64-bit value
pub fn zigzag64(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

/// Reverses [`zigzag32`]
pub fn unzigzag32(value: u64) -> i32 {
    let value = value as u32;
    ((value >> 1) as i32) ^ -((value & 1) as i32)
}

/// Reverses [`zigzag64`]
pub fn unzigzag64(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

/// Cursor over an encoded message.
///
/// Errors report absolute offsets, including for readers over nested
/// payloads.
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    data: &'a [u8],
    position: usize,
    base: usize,
}

impl<'a> WireReader<'a> {
    /// Reader over a top-level buffer
    pub fn new(data: &'a [u8]) -> Self {
        Self::nested(data, 0)
    }

    /// Reader over a payload that started at `base` in the outer buffer
    pub fn nested(data: &'a [u8], base: usize) -> Self {
        Self {
            data,
            position: 0,
            base,
        }
    }

    /// Absolute offset of the cursor
    pub fn offset(&self) -> usize {
        self.base + self.position
    }

    /// True when every byte was consumed
    pub fn is_empty(&self) -> bool {
        self.position >= self.data.len()
    }

    fn error(&self, details: impl Into<String>) -> Error {
        Error::invalid_wire_format(self.offset(), details)
    }

    /// Reads a key and validates its field number
    pub fn read_key(&mut self) -> Result<(u32, WireType)> {
        let start = self.offset();
        let key = self.read_varint()?;
        let wire_type = WireType::from_key((key & 0x07) as u8, start)?;
        let number = key >> 3;
        if number == 0 || number > MAX_FIELD_NUMBER as u64 {
            return Err(Error::invalid_wire_format(
                start,
                format!("invalid field number {}", number),
            ));
        }
        Ok((number as u32, wire_type))
    }

    /// Reads a varint
    pub fn read_varint(&mut self) -> Result<u64> {
        let (value, len) = decode_varint(&self.data[self.position..])
            .ok_or_else(|| self.error("truncated or overlong varint"))?;
        self.position += len;
        Ok(value)
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        let remaining = self.data.len() - self.position;
        if remaining < len {
            return Err(self.error(format!(
                "not enough bytes for {} (need {}, have {})",
                what, len, remaining
            )));
        }
        let slice = &self.data[self.position..self.position + len];
        self.position += len;
        Ok(slice)
    }

    /// Reads four little-endian bytes
    pub fn read_fixed32(&mut self) -> Result<u32> {
        let bytes = self.take(4, "I32")?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Reads eight little-endian bytes
    pub fn read_fixed64(&mut self) -> Result<u64> {
        let bytes = self.take(8, "I64")?;
        let mut array = [0u8; 8];
        array.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(array))
    }

    /// Reads a length-delimited payload and returns it with its absolute
    /// start offset
    pub fn read_len(&mut self) -> Result<(&'a [u8], usize)> {
        let length = self.read_varint()?;
        let length = usize::try_from(length).map_err(|_| self.error("LEN field too large"))?;
        let start = self.offset();
        let payload = self.take(length, "LEN field")?;
        Ok((payload, start))
    }

    /// Skips the value of a field whose key was just read.
    ///
    /// Groups are skipped up to their matching end key.
    pub fn skip(&mut self, number: u32, wire_type: WireType) -> Result<()> {
        match wire_type {
            WireType::StartGroup => self.skip_group(number),
            WireType::EndGroup => Err(self.error(format!("unexpected end group {}", number))),
            other => self.skip_value(other),
        }
    }

    fn skip_value(&mut self, wire_type: WireType) -> Result<()> {
        match wire_type {
            WireType::Varint => {
                self.read_varint()?;
            }
            WireType::I64 => {
                self.take(8, "I64")?;
            }
            WireType::I32 => {
                self.take(4, "I32")?;
            }
            WireType::Len => {
                self.read_len()?;
            }
            WireType::StartGroup | WireType::EndGroup => {
                return Err(self.error("group marker where a value was expected"));
            }
        }
        Ok(())
    }

    /// Nested groups are tracked on an explicit stack of open group
    /// numbers, so hostile nesting cannot exhaust the call stack.
    fn skip_group(&mut self, number: u32) -> Result<()> {
        let mut open = vec![number];
        while let Some(&innermost) = open.last() {
            if self.is_empty() {
                return Err(self.error(format!("unterminated group {}", innermost)));
            }
            let (inner, inner_type) = self.read_key()?;
            match inner_type {
                WireType::StartGroup => open.push(inner),
                WireType::EndGroup if inner == innermost => {
                    open.pop();
                }
                WireType::EndGroup => {
                    return Err(self.error(format!(
                        "group {} closed by end group {}",
                        innermost, inner
                    )));
                }
                other => self.skip_value(other)?,
            }
        }
        Ok(())
    }
}
