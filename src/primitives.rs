//! Serializers for the nine primitive types.
//!
//! The JSON conversion helpers live here as free functions so the reflective
//! transformation path (`descriptor`) applies exactly the same narrowing and
//! clamping rules as the typed codecs.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use once_cell::sync::Lazy;
use serde_json::{json, Value};

use crate::descriptor::{PrimitiveType, TypeDescriptor};
use crate::error::{Error, Result};
use crate::io::{Reader, Writer};
use crate::serializer::{Codec, JsonFlavor, Serializer};
use crate::timestamp::Timestamp;
use crate::wire;

/// Largest integer magnitude a JSON number carries without loss; beyond it,
/// `int64`/`uint64` stringify.
const MAX_SAFE_INTEGER: i64 = 9_007_199_254_740_991;

/// Serializer for `bool`.
pub fn bool_serializer() -> Serializer<bool> {
    static INSTANCE: Lazy<Serializer<bool>> = Lazy::new(|| Serializer::from_codec(BoolCodec));
    INSTANCE.clone()
}

/// Serializer for `int32`.
pub fn int32_serializer() -> Serializer<i32> {
    static INSTANCE: Lazy<Serializer<i32>> = Lazy::new(|| Serializer::from_codec(Int32Codec));
    INSTANCE.clone()
}

/// Serializer for `int64`.
pub fn int64_serializer() -> Serializer<i64> {
    static INSTANCE: Lazy<Serializer<i64>> = Lazy::new(|| Serializer::from_codec(Int64Codec));
    INSTANCE.clone()
}

/// Serializer for `uint64`.
pub fn uint64_serializer() -> Serializer<u64> {
    static INSTANCE: Lazy<Serializer<u64>> = Lazy::new(|| Serializer::from_codec(Uint64Codec));
    INSTANCE.clone()
}

/// Serializer for `float32`.
pub fn float32_serializer() -> Serializer<f32> {
    static INSTANCE: Lazy<Serializer<f32>> = Lazy::new(|| Serializer::from_codec(Float32Codec));
    INSTANCE.clone()
}

/// Serializer for `float64`.
pub fn float64_serializer() -> Serializer<f64> {
    static INSTANCE: Lazy<Serializer<f64>> = Lazy::new(|| Serializer::from_codec(Float64Codec));
    INSTANCE.clone()
}

/// Serializer for `timestamp`.
pub fn timestamp_serializer() -> Serializer<Timestamp> {
    static INSTANCE: Lazy<Serializer<Timestamp>> =
        Lazy::new(|| Serializer::from_codec(TimestampCodec));
    INSTANCE.clone()
}

/// Serializer for `string`.
pub fn string_serializer() -> Serializer<String> {
    static INSTANCE: Lazy<Serializer<String>> = Lazy::new(|| Serializer::from_codec(StringCodec));
    INSTANCE.clone()
}

/// Serializer for `bytes`.
pub fn bytes_serializer() -> Serializer<Bytes> {
    static INSTANCE: Lazy<Serializer<Bytes>> = Lazy::new(|| Serializer::from_codec(BytesCodec));
    INSTANCE.clone()
}

// JSON conversions, shared with the reflective path.

pub(crate) fn float_to_json(value: f64) -> Value {
    if value.is_finite() {
        Value::from(value)
    } else if value.is_nan() {
        Value::from("NaN")
    } else if value > 0.0 {
        Value::from("Infinity")
    } else {
        Value::from("-Infinity")
    }
}

pub(crate) fn bytes_to_base64_json(bytes: &[u8]) -> Value {
    Value::from(BASE64.encode(bytes))
}

pub(crate) fn json_to_bool(json: &Value) -> Result<bool> {
    match json {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => Ok(n.as_f64() != Some(0.0)),
        Value::String(s) => match s.as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => s
                .parse::<f64>()
                .map(|f| f != 0.0)
                .map_err(|_| Error::unexpected_json("boolean", json)),
        },
        _ => Err(Error::unexpected_json("boolean", json)),
    }
}

pub(crate) fn json_to_i32(json: &Value) -> Result<i32> {
    match json {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(i as i32)
            } else if let Some(u) = n.as_u64() {
                Ok(u as u32 as i32)
            } else {
                Ok((n.as_f64().unwrap_or(0.0) as i64) as i32)
            }
        }
        Value::String(s) => {
            if let Ok(i) = s.parse::<i64>() {
                Ok(i as i32)
            } else if let Ok(f) = s.parse::<f64>() {
                Ok((f as i64) as i32)
            } else {
                Err(Error::unexpected_json("int32", json))
            }
        }
        _ => Err(Error::unexpected_json("int32", json)),
    }
}

pub(crate) fn json_to_i64(json: &Value) -> Result<i64> {
    match json {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(i)
            } else if let Some(u) = n.as_u64() {
                Ok(u.min(i64::MAX as u64) as i64)
            } else {
                Ok(n.as_f64().unwrap_or(0.0) as i64)
            }
        }
        Value::String(s) => {
            if let Ok(i) = s.parse::<i64>() {
                Ok(i)
            } else if let Ok(i) = s.parse::<i128>() {
                Ok(i.clamp(i64::MIN as i128, i64::MAX as i128) as i64)
            } else if let Ok(f) = s.parse::<f64>() {
                Ok(f as i64)
            } else {
                Err(Error::unexpected_json("int64", json))
            }
        }
        _ => Err(Error::unexpected_json("int64", json)),
    }
}

pub(crate) fn json_to_u64(json: &Value) -> Result<u64> {
    match json {
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                Ok(u)
            } else if n.as_i64().is_some() {
                Ok(0)
            } else {
                Ok(n.as_f64().unwrap_or(0.0) as u64)
            }
        }
        Value::String(s) => {
            if let Ok(u) = s.parse::<u64>() {
                Ok(u)
            } else if let Ok(i) = s.parse::<i128>() {
                Ok(i.clamp(0, u64::MAX as i128) as u64)
            } else if let Ok(f) = s.parse::<f64>() {
                Ok(f as u64)
            } else {
                Err(Error::unexpected_json("uint64", json))
            }
        }
        _ => Err(Error::unexpected_json("uint64", json)),
    }
}

pub(crate) fn json_to_f64(json: &Value) -> Result<f64> {
    match json {
        Value::Number(n) => Ok(n.as_f64().unwrap_or(0.0)),
        Value::String(s) => match s.as_str() {
            "NaN" => Ok(f64::NAN),
            "Infinity" => Ok(f64::INFINITY),
            "-Infinity" => Ok(f64::NEG_INFINITY),
            _ => s
                .parse::<f64>()
                .map_err(|_| Error::unexpected_json("number", json)),
        },
        _ => Err(Error::unexpected_json("number", json)),
    }
}

pub(crate) fn json_to_timestamp(json: &Value) -> Result<Timestamp> {
    let millis = match json {
        Value::Number(_) | Value::String(_) => json_to_i64(json)?,
        Value::Object(fields) => match fields.get("unix_millis") {
            Some(ms) => json_to_i64(ms)?,
            None => return Err(Error::unexpected_json("timestamp", json)),
        },
        _ => return Err(Error::unexpected_json("timestamp", json)),
    };
    Ok(Timestamp::from_unix_millis(millis))
}

pub(crate) fn json_to_string(json: &Value) -> Result<String> {
    match json {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) if n.as_f64() == Some(0.0) => Ok(String::new()),
        _ => Err(Error::unexpected_json("string", json)),
    }
}

pub(crate) fn json_to_bytes(json: &Value) -> Result<Bytes> {
    match json {
        Value::String(s) => match s.strip_prefix("hex:") {
            Some(hex) => Ok(Bytes::from(hex::decode(hex)?)),
            None => Ok(Bytes::from(BASE64.decode(s)?)),
        },
        Value::Number(n) if n.as_f64() == Some(0.0) => Ok(Bytes::new()),
        _ => Err(Error::unexpected_json("bytes", json)),
    }
}

pub(crate) fn bytes_to_json(bytes: &[u8], flavor: JsonFlavor) -> Value {
    match flavor {
        JsonFlavor::Dense => bytes_to_base64_json(bytes),
        JsonFlavor::Readable => Value::from(format!("hex:{}", hex::encode(bytes))),
    }
}

pub(crate) fn i64_to_json(value: i64) -> Value {
    if (-MAX_SAFE_INTEGER..=MAX_SAFE_INTEGER).contains(&value) {
        Value::from(value)
    } else {
        Value::from(value.to_string())
    }
}

pub(crate) fn u64_to_json(value: u64) -> Value {
    if value <= MAX_SAFE_INTEGER as u64 {
        Value::from(value)
    } else {
        Value::from(value.to_string())
    }
}

pub(crate) fn timestamp_to_json(value: Timestamp, flavor: JsonFlavor) -> Value {
    match flavor {
        JsonFlavor::Dense => Value::from(value.unix_millis()),
        JsonFlavor::Readable => json!({
            "unix_millis": value.unix_millis(),
            "formatted": value.formatted(),
        }),
    }
}

// Wire encodings not covered by the shared integer paths.

pub(crate) fn encode_f32(value: f32, out: &mut Writer) {
    if value == 0.0 {
        out.push(0);
    } else {
        out.push(wire::F32);
        out.write_f32(value);
    }
}

pub(crate) fn encode_f64(value: f64, out: &mut Writer) {
    if value == 0.0 {
        out.push(0);
    } else {
        out.push(wire::F64);
        out.write_f64(value);
    }
}

pub(crate) fn encode_timestamp(value: Timestamp, out: &mut Writer) {
    if value.unix_millis() == 0 {
        out.push(0);
    } else {
        out.push(wire::TIMESTAMP);
        out.write_i64(value.unix_millis());
    }
}

struct BoolCodec;

impl Codec<bool> for BoolCodec {
    fn default_value(&self) -> bool {
        false
    }

    fn is_default(&self, value: &bool) -> bool {
        !*value
    }

    fn encode(&self, value: &bool, out: &mut Writer) {
        out.push(*value as u8);
    }

    fn decode(&self, input: &mut Reader<'_>) -> Result<bool> {
        Ok(wire::read_number(input)?.to_bool())
    }

    fn to_json(&self, value: &bool, flavor: JsonFlavor) -> Value {
        match flavor {
            JsonFlavor::Dense => Value::from(*value as u8),
            JsonFlavor::Readable => Value::from(*value),
        }
    }

    fn from_json(&self, json: &Value, _keep: bool) -> Result<bool> {
        json_to_bool(json)
    }

    fn type_descriptor(&self) -> TypeDescriptor {
        TypeDescriptor::Primitive(PrimitiveType::Bool)
    }
}

struct Int32Codec;

impl Codec<i32> for Int32Codec {
    fn default_value(&self) -> i32 {
        0
    }

    fn is_default(&self, value: &i32) -> bool {
        *value == 0
    }

    fn encode(&self, value: &i32, out: &mut Writer) {
        wire::write_int(*value as i64, out);
    }

    fn decode(&self, input: &mut Reader<'_>) -> Result<i32> {
        Ok(wire::read_number(input)?.to_i32())
    }

    fn to_json(&self, value: &i32, _flavor: JsonFlavor) -> Value {
        Value::from(*value)
    }

    fn from_json(&self, json: &Value, _keep: bool) -> Result<i32> {
        json_to_i32(json)
    }

    fn type_descriptor(&self) -> TypeDescriptor {
        TypeDescriptor::Primitive(PrimitiveType::Int32)
    }
}

struct Int64Codec;

impl Codec<i64> for Int64Codec {
    fn default_value(&self) -> i64 {
        0
    }

    fn is_default(&self, value: &i64) -> bool {
        *value == 0
    }

    fn encode(&self, value: &i64, out: &mut Writer) {
        wire::write_int(*value, out);
    }

    fn decode(&self, input: &mut Reader<'_>) -> Result<i64> {
        Ok(wire::read_number(input)?.to_i64())
    }

    fn to_json(&self, value: &i64, _flavor: JsonFlavor) -> Value {
        i64_to_json(*value)
    }

    fn from_json(&self, json: &Value, _keep: bool) -> Result<i64> {
        json_to_i64(json)
    }

    fn type_descriptor(&self) -> TypeDescriptor {
        TypeDescriptor::Primitive(PrimitiveType::Int64)
    }
}

struct Uint64Codec;

impl Codec<u64> for Uint64Codec {
    fn default_value(&self) -> u64 {
        0
    }

    fn is_default(&self, value: &u64) -> bool {
        *value == 0
    }

    fn encode(&self, value: &u64, out: &mut Writer) {
        wire::write_uint(*value, out);
    }

    fn decode(&self, input: &mut Reader<'_>) -> Result<u64> {
        Ok(wire::read_number(input)?.to_u64())
    }

    fn to_json(&self, value: &u64, _flavor: JsonFlavor) -> Value {
        u64_to_json(*value)
    }

    fn from_json(&self, json: &Value, _keep: bool) -> Result<u64> {
        json_to_u64(json)
    }

    fn type_descriptor(&self) -> TypeDescriptor {
        TypeDescriptor::Primitive(PrimitiveType::Uint64)
    }
}

struct Float32Codec;

impl Codec<f32> for Float32Codec {
    fn default_value(&self) -> f32 {
        0.0
    }

    fn is_default(&self, value: &f32) -> bool {
        *value == 0.0
    }

    fn encode(&self, value: &f32, out: &mut Writer) {
        encode_f32(*value, out);
    }

    fn decode(&self, input: &mut Reader<'_>) -> Result<f32> {
        Ok(wire::read_number(input)?.to_f64() as f32)
    }

    fn to_json(&self, value: &f32, _flavor: JsonFlavor) -> Value {
        float_to_json(*value as f64)
    }

    fn from_json(&self, json: &Value, _keep: bool) -> Result<f32> {
        Ok(json_to_f64(json)? as f32)
    }

    fn type_descriptor(&self) -> TypeDescriptor {
        TypeDescriptor::Primitive(PrimitiveType::Float32)
    }
}

struct Float64Codec;

impl Codec<f64> for Float64Codec {
    fn default_value(&self) -> f64 {
        0.0
    }

    fn is_default(&self, value: &f64) -> bool {
        *value == 0.0
    }

    fn encode(&self, value: &f64, out: &mut Writer) {
        encode_f64(*value, out);
    }

    fn decode(&self, input: &mut Reader<'_>) -> Result<f64> {
        Ok(wire::read_number(input)?.to_f64())
    }

    fn to_json(&self, value: &f64, _flavor: JsonFlavor) -> Value {
        float_to_json(*value)
    }

    fn from_json(&self, json: &Value, _keep: bool) -> Result<f64> {
        json_to_f64(json)
    }

    fn type_descriptor(&self) -> TypeDescriptor {
        TypeDescriptor::Primitive(PrimitiveType::Float64)
    }
}

struct TimestampCodec;

impl Codec<Timestamp> for TimestampCodec {
    fn default_value(&self) -> Timestamp {
        Timestamp::UNIX_EPOCH
    }

    fn is_default(&self, value: &Timestamp) -> bool {
        value.unix_millis() == 0
    }

    fn encode(&self, value: &Timestamp, out: &mut Writer) {
        encode_timestamp(*value, out);
    }

    fn decode(&self, input: &mut Reader<'_>) -> Result<Timestamp> {
        Ok(Timestamp::from_unix_millis(
            wire::read_number(input)?.to_i64(),
        ))
    }

    fn to_json(&self, value: &Timestamp, flavor: JsonFlavor) -> Value {
        timestamp_to_json(*value, flavor)
    }

    fn from_json(&self, json: &Value, _keep: bool) -> Result<Timestamp> {
        json_to_timestamp(json)
    }

    fn type_descriptor(&self) -> TypeDescriptor {
        TypeDescriptor::Primitive(PrimitiveType::Timestamp)
    }
}

struct StringCodec;

impl Codec<String> for StringCodec {
    fn default_value(&self) -> String {
        String::new()
    }

    fn is_default(&self, value: &String) -> bool {
        value.is_empty()
    }

    fn encode(&self, value: &String, out: &mut Writer) {
        wire::write_string(value, out);
    }

    fn decode(&self, input: &mut Reader<'_>) -> Result<String> {
        wire::read_string(input)
    }

    fn to_json(&self, value: &String, _flavor: JsonFlavor) -> Value {
        Value::from(value.as_str())
    }

    fn from_json(&self, json: &Value, _keep: bool) -> Result<String> {
        json_to_string(json)
    }

    fn type_descriptor(&self) -> TypeDescriptor {
        TypeDescriptor::Primitive(PrimitiveType::String)
    }
}

struct BytesCodec;

impl Codec<Bytes> for BytesCodec {
    fn default_value(&self) -> Bytes {
        Bytes::new()
    }

    fn is_default(&self, value: &Bytes) -> bool {
        value.is_empty()
    }

    fn encode(&self, value: &Bytes, out: &mut Writer) {
        wire::write_byte_string(value, out);
    }

    fn decode(&self, input: &mut Reader<'_>) -> Result<Bytes> {
        wire::read_byte_string(input)
    }

    fn to_json(&self, value: &Bytes, flavor: JsonFlavor) -> Value {
        bytes_to_json(value, flavor)
    }

    fn from_json(&self, json: &Value, _keep: bool) -> Result<Bytes> {
        json_to_bytes(json)
    }

    fn type_descriptor(&self) -> TypeDescriptor {
        TypeDescriptor::Primitive(PrimitiveType::Bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int64_json_stringifies_beyond_double_precision() {
        assert_eq!(i64_to_json(MAX_SAFE_INTEGER), Value::from(MAX_SAFE_INTEGER));
        assert_eq!(
            i64_to_json(MAX_SAFE_INTEGER + 1),
            Value::from("9007199254740992")
        );
        assert_eq!(json_to_i64(&Value::from("9007199254740992")).unwrap(), MAX_SAFE_INTEGER + 1);
    }

    #[test]
    fn int64_string_input_clamps() {
        assert_eq!(
            json_to_i64(&Value::from("99999999999999999999999999")).unwrap(),
            i64::MAX
        );
        assert_eq!(json_to_u64(&Value::from("-5")).unwrap(), 0);
    }

    #[test]
    fn float_json_literals() {
        assert_eq!(float_to_json(f64::NAN), Value::from("NaN"));
        assert_eq!(float_to_json(f64::INFINITY), Value::from("Infinity"));
        assert_eq!(float_to_json(f64::NEG_INFINITY), Value::from("-Infinity"));
        assert!(json_to_f64(&Value::from("NaN")).unwrap().is_nan());
    }

    #[test]
    fn bytes_json_routes_on_prefix() {
        let bytes = Bytes::from_static(&[0x69, 0xb7, 0x35, 0xdb]);
        assert_eq!(
            bytes_to_json(&bytes, JsonFlavor::Dense),
            Value::from("abc12w==")
        );
        assert_eq!(
            bytes_to_json(&bytes, JsonFlavor::Readable),
            Value::from("hex:69b735db")
        );
        assert_eq!(json_to_bytes(&Value::from("abc12w==")).unwrap(), bytes);
        assert_eq!(json_to_bytes(&Value::from("hex:69b735db")).unwrap(), bytes);
    }
}
