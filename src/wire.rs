//! The variable-length wire grammar.
//!
//! A single prefix byte classifies the bytes that follow it. The grammar is
//! shared by every integer, float, length prefix and discriminator in the
//! binary format:
//!
//! | Wire        | Meaning                                    | Follows     |
//! |-------------|--------------------------------------------|-------------|
//! | `0..=231`   | the value itself                           | —           |
//! | `232`       | `u16` length/value                         | 2 bytes LE  |
//! | `233`       | `u32` length/value                         | 4 bytes LE  |
//! | `234`       | `u64` value                                | 8 bytes LE  |
//! | `235`       | `-(256-b)`                                 | 1 byte      |
//! | `236`       | `-(65536-w)`                               | 2 bytes LE  |
//! | `237`       | `i32`                                      | 4 bytes LE  |
//! | `238`       | `i64`                                      | 8 bytes LE  |
//! | `239`       | timestamp as `i64` millis                  | 8 bytes LE  |
//! | `240`       | `f32`                                      | 4 bytes LE  |
//! | `241`       | `f64`                                      | 8 bytes LE  |
//! | `242`       | empty string                               | —           |
//! | `243`       | non-empty string: UTF-8 length, then bytes | variable    |
//! | `244`       | empty bytes                                | —           |
//! | `245`       | non-empty bytes: length, then bytes        | variable    |
//! | `246`       | empty array or struct with 0 slots         | —           |
//! | `247`       | array/struct with 1 slot                   | 1 element   |
//! | `248`       | enum value variant, number >= 5            | variable    |
//! | `249`       | array/struct with 2 slots                  | 2 elements  |
//! | `250`       | array/struct with N >= 3 slots             | N elements  |
//! | `251..=254` | enum value variant, number `wire - 250`    | 1 element   |
//! | `255`       | null                                       | —           |
//!
//! Encoders emit the smallest form so that output is deterministic; decoders
//! accept any wire that yields a value of the kind they expect.

use serde_json::Value;

use crate::error::{Error, Result};
use crate::io::{Reader, Writer};
use crate::primitives;

pub(crate) const MAX_INLINE: u8 = 231;
pub(crate) const U16: u8 = 232;
pub(crate) const U32: u8 = 233;
pub(crate) const U64: u8 = 234;
pub(crate) const NEG_U8: u8 = 235;
pub(crate) const NEG_U16: u8 = 236;
pub(crate) const I32: u8 = 237;
pub(crate) const I64: u8 = 238;
pub(crate) const TIMESTAMP: u8 = 239;
pub(crate) const F32: u8 = 240;
pub(crate) const F64: u8 = 241;
pub(crate) const EMPTY_STRING: u8 = 242;
pub(crate) const STRING: u8 = 243;
pub(crate) const EMPTY_BYTES: u8 = 244;
pub(crate) const BYTES: u8 = 245;
pub(crate) const LEN_0: u8 = 246;
pub(crate) const LEN_1: u8 = 247;
pub(crate) const ENUM_VALUE: u8 = 248;
pub(crate) const LEN_2: u8 = 249;
pub(crate) const LEN_N: u8 = 250;
pub(crate) const ENUM_VALUE_1: u8 = 251;
pub(crate) const NULL: u8 = 255;

/// A decoded numeric wire value, before narrowing to the target type.
#[derive(Debug, Clone, Copy)]
pub(crate) enum WireNumber {
    Int(i64),
    UInt(u64),
    Float(f64),
}

impl WireNumber {
    /// Narrows to 32-bit two's-complement.
    pub fn to_i32(self) -> i32 {
        match self {
            WireNumber::Int(i) => i as i32,
            WireNumber::UInt(u) => u as u32 as i32,
            WireNumber::Float(f) => (f as i64) as i32,
        }
    }

    /// Clamps to the `i64` range.
    pub fn to_i64(self) -> i64 {
        match self {
            WireNumber::Int(i) => i,
            WireNumber::UInt(u) => u.min(i64::MAX as u64) as i64,
            WireNumber::Float(f) => f as i64,
        }
    }

    /// Clamps to the `u64` range.
    pub fn to_u64(self) -> u64 {
        match self {
            WireNumber::Int(i) => i.max(0) as u64,
            WireNumber::UInt(u) => u,
            WireNumber::Float(f) => f as u64,
        }
    }

    pub fn to_f64(self) -> f64 {
        match self {
            WireNumber::Int(i) => i as f64,
            WireNumber::UInt(u) => u as f64,
            WireNumber::Float(f) => f,
        }
    }

    pub fn to_bool(self) -> bool {
        match self {
            WireNumber::Int(i) => i != 0,
            WireNumber::UInt(u) => u != 0,
            WireNumber::Float(f) => f != 0.0,
        }
    }
}

/// Writes a non-negative integer in its smallest form. This is the encoding
/// of `uint64` values and of every string/bytes/array length prefix.
pub(crate) fn write_uint(value: u64, out: &mut Writer) {
    if value <= MAX_INLINE as u64 {
        out.push(value as u8);
    } else if value < 0x1_0000 {
        out.push(U16);
        out.write_u16(value as u16);
    } else if value < 0x1_0000_0000 {
        out.push(U32);
        out.write_u32(value as u32);
    } else {
        out.push(U64);
        out.write_u64(value);
    }
}

/// Writes a signed integer in its smallest form. `int32` and `int64` share
/// this encoding; values outside `[-2^31, 2^32)` take the trailing `i64`
/// branch.
pub(crate) fn write_int(value: i64, out: &mut Writer) {
    if value >= 0 {
        if value < 0x1_0000_0000 {
            write_uint(value as u64, out);
        } else {
            out.push(I64);
            out.write_i64(value);
        }
    } else if value >= -256 {
        out.push(NEG_U8);
        out.push((value + 256) as u8);
    } else if value >= -65536 {
        out.push(NEG_U16);
        out.write_u16((value + 65536) as u16);
    } else if value >= i32::MIN as i64 {
        out.push(I32);
        out.write_i32(value as i32);
    } else {
        out.push(I64);
        out.write_i64(value);
    }
}

/// Writes an array or struct slot count.
pub(crate) fn write_array_len(len: usize, out: &mut Writer) {
    match len {
        0 => out.push(LEN_0),
        1 => out.push(LEN_1),
        2 => out.push(LEN_2),
        _ => {
            out.push(LEN_N);
            write_uint(len as u64, out);
        }
    }
}

/// Writes a string with its length prefix.
pub(crate) fn write_string(value: &str, out: &mut Writer) {
    if value.is_empty() {
        out.push(EMPTY_STRING);
    } else {
        out.push(STRING);
        write_uint(value.len() as u64, out);
        out.write_raw(value.as_bytes());
    }
}

/// Writes a byte string with its length prefix.
pub(crate) fn write_byte_string(value: &[u8], out: &mut Writer) {
    if value.is_empty() {
        out.push(EMPTY_BYTES);
    } else {
        out.push(BYTES);
        write_uint(value.len() as u64, out);
        out.write_raw(value);
    }
}

/// Finishes decoding a numeric value whose wire byte is already consumed.
pub(crate) fn read_number_from(wire: u8, input: &mut Reader<'_>) -> Result<WireNumber> {
    Ok(match wire {
        0..=MAX_INLINE => WireNumber::UInt(wire as u64),
        U16 => WireNumber::UInt(input.read_u16()? as u64),
        U32 => WireNumber::UInt(input.read_u32()? as u64),
        U64 => WireNumber::UInt(input.read_u64()?),
        NEG_U8 => WireNumber::Int(input.read_u8()? as i64 - 256),
        NEG_U16 => WireNumber::Int(input.read_u16()? as i64 - 65536),
        I32 => WireNumber::Int(input.read_i32()? as i64),
        I64 | TIMESTAMP => WireNumber::Int(input.read_i64()?),
        F32 => WireNumber::Float(input.read_f32()? as f64),
        F64 => WireNumber::Float(input.read_f64()?),
        _ => {
            return Err(Error::UnexpectedWire {
                wire,
                decoding: "number",
            })
        }
    })
}

pub(crate) fn read_number(input: &mut Reader<'_>) -> Result<WireNumber> {
    let wire = input.read_u8()?;
    read_number_from(wire, input)
}

/// Reads a string or bytes length prefix.
fn read_length(input: &mut Reader<'_>) -> Result<usize> {
    Ok(read_number(input)?.to_u64() as usize)
}

/// Reads an array or struct slot count. Plain numeric wires are accepted so
/// that a single `0` byte decodes every container to its default.
pub(crate) fn read_array_len(input: &mut Reader<'_>) -> Result<usize> {
    let wire = input.read_u8()?;
    Ok(match wire {
        LEN_0 => 0,
        LEN_1 => 1,
        LEN_2 => 2,
        LEN_N => read_length(input)?,
        0..=U64 => read_number_from(wire, input)?.to_u64() as usize,
        _ => {
            return Err(Error::UnexpectedWire {
                wire,
                decoding: "array length",
            })
        }
    })
}

/// Reads a string value.
pub(crate) fn read_string(input: &mut Reader<'_>) -> Result<String> {
    let wire = input.read_u8()?;
    match wire {
        0 | EMPTY_STRING => Ok(String::new()),
        STRING => {
            let len = read_length(input)?;
            let bytes = input.take(len)?;
            Ok(core::str::from_utf8(bytes)?.to_string())
        }
        _ => Err(Error::UnexpectedWire {
            wire,
            decoding: "string",
        }),
    }
}

/// Reads a byte-string value.
pub(crate) fn read_byte_string(input: &mut Reader<'_>) -> Result<bytes::Bytes> {
    let wire = input.read_u8()?;
    match wire {
        0 | EMPTY_BYTES => Ok(bytes::Bytes::new()),
        BYTES => {
            let len = read_length(input)?;
            Ok(bytes::Bytes::copy_from_slice(input.take(len)?))
        }
        _ => Err(Error::UnexpectedWire {
            wire,
            decoding: "bytes",
        }),
    }
}

/// Consumes one complete wire element, recursing through containers. This is
/// the only way to discard a value whose schema is unknown.
pub(crate) fn skip_value(input: &mut Reader<'_>) -> Result<()> {
    let wire = input.read_u8()?;
    match wire {
        0..=MAX_INLINE | EMPTY_STRING | EMPTY_BYTES | LEN_0 | NULL => {}
        NEG_U8 => {
            input.take(1)?;
        }
        U16 | NEG_U16 => {
            input.take(2)?;
        }
        U32 | I32 | F32 => {
            input.take(4)?;
        }
        U64 | I64 | TIMESTAMP | F64 => {
            input.take(8)?;
        }
        STRING | BYTES => {
            let len = read_length(input)?;
            input.take(len)?;
        }
        LEN_1 => skip_value(input)?,
        LEN_2 => {
            skip_value(input)?;
            skip_value(input)?;
        }
        LEN_N => {
            let len = read_length(input)?;
            for _ in 0..len {
                skip_value(input)?;
            }
        }
        ENUM_VALUE => {
            read_number(input)?;
            skip_value(input)?;
        }
        ENUM_VALUE_1..=254 => skip_value(input)?,
    }
    Ok(())
}

/// Decodes one wire element of unknown schema into its dense JSON form.
/// Used to surface preserved unknown fields in JSON output.
pub(crate) fn decode_untyped(input: &mut Reader<'_>) -> Result<Value> {
    let wire = input.read_u8()?;
    Ok(match wire {
        0..=TIMESTAMP => match read_number_from(wire, input)? {
            WireNumber::Int(i) => Value::from(i),
            WireNumber::UInt(u) => Value::from(u),
            WireNumber::Float(f) => primitives::float_to_json(f),
        },
        F32 | F64 => primitives::float_to_json(read_number_from(wire, input)?.to_f64()),
        EMPTY_STRING => Value::from(""),
        STRING => {
            let len = read_length(input)?;
            Value::from(core::str::from_utf8(input.take(len)?)?)
        }
        EMPTY_BYTES => Value::from(""),
        BYTES => {
            let len = read_length(input)?;
            primitives::bytes_to_base64_json(input.take(len)?)
        }
        LEN_0 => Value::Array(Vec::new()),
        LEN_1 => Value::Array(vec![decode_untyped(input)?]),
        LEN_2 => Value::Array(vec![decode_untyped(input)?, decode_untyped(input)?]),
        LEN_N => {
            let len = read_length(input)?;
            let mut items = Vec::with_capacity(len.min(input.remaining()));
            for _ in 0..len {
                items.push(decode_untyped(input)?);
            }
            Value::Array(items)
        }
        ENUM_VALUE => {
            let number = read_number(input)?.to_u64();
            Value::Array(vec![Value::from(number), decode_untyped(input)?])
        }
        ENUM_VALUE_1..=254 => Value::Array(vec![
            Value::from((wire - 250) as u64),
            decode_untyped(input)?,
        ]),
        NULL => Value::Null,
    })
}

/// Re-encodes a dense JSON value of unknown schema. The inverse of
/// [`decode_untyped`], used when a struct carrying JSON-captured unknown
/// fields is written to bytes. JSON objects cannot appear in well-formed
/// dense JSON and encode as `null`.
pub(crate) fn encode_untyped(value: &Value, out: &mut Writer) {
    match value {
        Value::Null | Value::Object(_) => out.push(NULL),
        Value::Bool(b) => out.push(*b as u8),
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                write_uint(u, out);
            } else if let Some(i) = n.as_i64() {
                write_int(i, out);
            } else {
                let f = n.as_f64().unwrap_or(0.0);
                if f == 0.0 {
                    out.push(0);
                } else {
                    out.push(F64);
                    out.write_f64(f);
                }
            }
        }
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            write_array_len(items.len(), out);
            for item in items {
                encode_untyped(item, out);
            }
        }
    }
}
