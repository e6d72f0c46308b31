//! Property value types and the tagged variant.
//!
//! Every property request is echoed back with a one-byte *resolved value
//! type* that fixes both its wire encoding and the width of its slot in the
//! per-row record. The generic [`PropertyVariant`] is the escape hatch for
//! structured values: a type tag followed by an unaligned payload, pooled as
//! raw bytes and decoded on access.

use crate::error::{Error, Result};
use crate::protocol::codec::{SliceReader, WireRead};

/// Cap on a single pooled variant payload; anything larger is a desync
const MAX_VARIANT_LEN: u64 = 16 * 1024 * 1024;

/// Resolved value type of a property column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PropertyValueType {
    /// Unsigned 8-bit value
    Byte = 0,
    /// Unsigned 16-bit value
    Word = 1,
    /// Unsigned 32-bit value
    Dword = 2,
    /// Unsigned 32-bit value the daemon renders as text when formatted
    DwordText = 3,
    /// 32-bit fixed point, one decimal place
    FixedPoint10 = 4,
    /// 32-bit fixed point, two decimal places
    FixedPoint100 = 5,
    /// Unsigned 64-bit value
    UInt64 = 6,
    /// 128-bit value (GUID-like)
    UInt128 = 7,
    /// Width and height as two 32-bit values
    Dimensions = 8,
    /// Byte size; wire width follows the reply's capability word
    Size = 9,
    /// Blob with an 8-bit wire length
    Blob8 = 10,
    /// Blob with a 16-bit wire length
    Blob16 = 11,
    /// Generic tagged variant
    Variant = 12,
    /// Length-prefixed string (the resolved type of formatted and
    /// highlighted columns)
    PString = 13,
}

impl PropertyValueType {
    pub fn from_tag(tag: u8) -> Option<Self> {
        use PropertyValueType::*;
        Some(match tag {
            0 => Byte,
            1 => Word,
            2 => Dword,
            3 => DwordText,
            4 => FixedPoint10,
            5 => FixedPoint100,
            6 => UInt64,
            7 => UInt128,
            8 => Dimensions,
            9 => Size,
            10 => Blob8,
            11 => Blob16,
            12 => Variant,
            13 => PString,
            _ => return None,
        })
    }

    /// Width of this type's slot in the per-row record.
    ///
    /// Fixed-width values are stored in place; sizes always occupy a full
    /// 64-bit slot regardless of the wire's narrow mode; pooled values
    /// (blobs, variants, strings) store an 8-byte arena handle.
    pub fn slot_width(&self) -> usize {
        use PropertyValueType::*;
        match self {
            Byte => 1,
            Word => 2,
            Dword | DwordText | FixedPoint10 | FixedPoint100 => 4,
            UInt64 => 8,
            UInt128 => 16,
            Dimensions => 8,
            Size => 8,
            Blob8 | Blob16 | Variant | PString => 8,
        }
    }

    /// True for types whose slot holds an arena handle
    pub fn is_pooled(&self) -> bool {
        use PropertyValueType::*;
        matches!(self, Blob8 | Blob16 | Variant | PString)
    }
}

/// Variant type tags in the wire encoding
mod tag {
    pub const NULL: u8 = 0;
    pub const I8: u8 = 1;
    pub const U8: u8 = 2;
    pub const I16: u8 = 3;
    pub const U16: u8 = 4;
    pub const I32: u8 = 5;
    pub const U32: u8 = 6;
    pub const I64: u8 = 7;
    pub const U64: u8 = 8;
    pub const F32: u8 = 9;
    pub const F64: u8 = 10;
    pub const DATE: u8 = 11;
    pub const GUID: u8 = 12;
    pub const UTF8: u8 = 13;
    pub const UTF16: u8 = 14;
    pub const ANSI: u8 = 15;
    pub const BLOB: u8 = 16;
    pub const ARRAY: u8 = 17;
}

/// A decoded generic property value
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyVariant {
    Null,
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    /// Date encoded as a double
    Date(f64),
    /// GUID-like 128-bit value, wire byte order
    Guid([u8; 16]),
    Utf8(String),
    Utf16(Vec<u16>),
    /// Single-byte-encoded string, left undecoded
    Ansi(Vec<u8>),
    Blob(Vec<u8>),
    /// Homogeneous array of scalar or string variants
    Array(Vec<PropertyVariant>),
}

/// Payload byte length of a fixed-width variant tag, `None` for
/// length-prefixed and array tags
fn fixed_payload_len(t: u8) -> Option<usize> {
    match t {
        tag::NULL => Some(0),
        tag::I8 | tag::U8 => Some(1),
        tag::I16 | tag::U16 => Some(2),
        tag::I32 | tag::U32 | tag::F32 => Some(4),
        tag::I64 | tag::U64 | tag::F64 | tag::DATE => Some(8),
        tag::GUID => Some(16),
        _ => None,
    }
}

/// Copy `len` payload bytes from the stream into `out`
fn copy_bytes<R: WireRead>(reader: &mut R, out: &mut Vec<u8>, mut len: usize) {
    let mut buf = [0u8; 512];
    while len > 0 {
        let n = len.min(buf.len());
        reader.read_exact_or_zero(&mut buf[..n]);
        out.extend_from_slice(&buf[..n]);
        len -= n;
    }
}

/// Copy one length-prefixed payload (string or blob), re-emitting the VLQ
fn copy_prefixed<R: WireRead>(reader: &mut R, out: &mut Vec<u8>) {
    let len = reader.read_vlq();
    if len > MAX_VARIANT_LEN {
        reader.mark_bad();
        return;
    }
    crate::protocol::codec::write_vlq(out, len);
    copy_bytes(reader, out, len as usize);
}

/// Copy one encoded variant from the stream into `out`, validating tags.
///
/// The pooled form is byte-identical to the wire form, so access-time
/// decoding reuses the same parser.
pub(crate) fn copy_wire<R: WireRead>(reader: &mut R, out: &mut Vec<u8>) {
    let t = reader.read_u8();
    out.push(t);
    if let Some(len) = fixed_payload_len(t) {
        copy_bytes(reader, out, len);
        return;
    }
    match t {
        tag::UTF8 | tag::UTF16 | tag::ANSI | tag::BLOB => copy_prefixed(reader, out),
        tag::ARRAY => {
            let elem = reader.read_u8();
            out.push(elem);
            // element must itself be a scalar or string tag
            let prefixed = matches!(elem, tag::UTF8 | tag::UTF16 | tag::ANSI | tag::BLOB);
            let fixed = elem != tag::NULL && fixed_payload_len(elem).is_some();
            if !fixed && !prefixed {
                reader.mark_bad();
                return;
            }
            let count = reader.read_vlq();
            if count > MAX_VARIANT_LEN {
                reader.mark_bad();
                return;
            }
            crate::protocol::codec::write_vlq(out, count);
            for _ in 0..count {
                if let Some(len) = fixed_payload_len(elem) {
                    copy_bytes(reader, out, len);
                } else {
                    copy_prefixed(reader, out);
                }
            }
        }
        _ => reader.mark_bad(),
    }
}

fn decode_scalar(reader: &mut SliceReader<'_>, t: u8) -> Result<PropertyVariant> {
    let v = match t {
        tag::NULL => PropertyVariant::Null,
        tag::I8 => PropertyVariant::I8(reader.read_u8() as i8),
        tag::U8 => PropertyVariant::U8(reader.read_u8()),
        tag::I16 => PropertyVariant::I16(reader.read_u16() as i16),
        tag::U16 => PropertyVariant::U16(reader.read_u16()),
        tag::I32 => PropertyVariant::I32(reader.read_u32() as i32),
        tag::U32 => PropertyVariant::U32(reader.read_u32()),
        tag::I64 => PropertyVariant::I64(reader.read_u64() as i64),
        tag::U64 => PropertyVariant::U64(reader.read_u64()),
        tag::F32 => PropertyVariant::F32(f32::from_bits(reader.read_u32())),
        tag::F64 => PropertyVariant::F64(f64::from_bits(reader.read_u64())),
        tag::DATE => PropertyVariant::Date(f64::from_bits(reader.read_u64())),
        tag::GUID => {
            let mut g = [0u8; 16];
            reader.read_exact_or_zero(&mut g);
            PropertyVariant::Guid(g)
        }
        tag::UTF8 => {
            let len = reader.read_vlq() as usize;
            let bytes = reader.take(len);
            PropertyVariant::Utf8(String::from_utf8_lossy(bytes).into_owned())
        }
        tag::UTF16 => {
            let len = reader.read_vlq() as usize;
            let bytes = reader.take(len);
            if len % 2 != 0 {
                return Err(Error::BadResponse);
            }
            let units = bytes
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .collect();
            PropertyVariant::Utf16(units)
        }
        tag::ANSI => {
            let len = reader.read_vlq() as usize;
            PropertyVariant::Ansi(reader.take(len).to_vec())
        }
        tag::BLOB => {
            let len = reader.read_vlq() as usize;
            PropertyVariant::Blob(reader.take(len).to_vec())
        }
        _ => return Err(Error::BadResponse),
    };
    Ok(v)
}

/// Decode a pooled variant
pub(crate) fn decode(bytes: &[u8]) -> Result<PropertyVariant> {
    let mut reader = SliceReader::new(bytes);
    let t = reader.read_u8();
    let value = if t == tag::ARRAY {
        let elem = reader.read_u8();
        let count = reader.read_vlq();
        let mut values = Vec::with_capacity(count.min(1024) as usize);
        for _ in 0..count {
            values.push(decode_scalar(&mut reader, elem)?);
        }
        PropertyVariant::Array(values)
    } else {
        decode_scalar(&mut reader, t)?
    };
    if reader.is_bad() {
        return Err(Error::BadResponse);
    }
    Ok(value)
}
