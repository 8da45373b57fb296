//! Serializers for `optional<T>` and `array<T>`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::descriptor::TypeDescriptor;
use crate::error::{Error, Result};
use crate::io::{Reader, Writer};
use crate::serializer::{Codec, JsonFlavor, Serializer};
use crate::wire;

static KEY_EXTRACTOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z_][a-z0-9_]*(\.[a-z_][a-z0-9_]*)*$").unwrap());

/// Serializer for `optional<T>`.
///
/// `null` maps to `None`; everything else delegates to `inner`. A bare zero
/// (the struct encoding's filler for default-valued slots) also decodes to
/// `None`, so `Some` values whose delegated encoding would be that single
/// zero take a wider numeric wire instead.
pub fn optional_serializer<T: 'static>(inner: Serializer<T>) -> Serializer<Option<T>> {
    Serializer::from_codec(OptionalCodec { inner })
}

/// Serializer for `array<T>`.
pub fn array_serializer<T: 'static>(item: Serializer<T>) -> Serializer<Vec<T>> {
    Serializer::from_codec(ArrayCodec {
        item,
        key_chain: None,
    })
}

/// Serializer for `array<T>` carrying a key extractor: a dotted path of field
/// names identifying the item field that generated indexed lookups key on.
/// The path is validated lexically.
pub fn keyed_array_serializer<T: 'static>(
    item: Serializer<T>,
    key_chain: &str,
) -> Result<Serializer<Vec<T>>> {
    if !KEY_EXTRACTOR.is_match(key_chain) {
        return Err(Error::InvalidKeyExtractor(key_chain.to_string()));
    }
    Ok(Serializer::from_codec(ArrayCodec {
        item,
        key_chain: Some(key_chain.to_string()),
    }))
}

struct OptionalCodec<T> {
    inner: Serializer<T>,
}

impl<T: 'static> Codec<Option<T>> for OptionalCodec<T> {
    fn default_value(&self) -> Option<T> {
        None
    }

    fn is_default(&self, value: &Option<T>) -> bool {
        value.is_none()
    }

    fn encode(&self, value: &Option<T>, out: &mut Writer) {
        match value {
            None => out.push(wire::NULL),
            Some(inner) => {
                let start = out.len();
                self.inner.codec.encode(inner, out);
                // A delegated single zero byte would read back as None; widen
                // it to the equivalent two-byte-operand form.
                if out.len() == start + 1 && out.byte_at(start) == 0 {
                    out.patch(start, wire::U16);
                    out.write_u16(0);
                }
            }
        }
    }

    fn decode(&self, input: &mut Reader<'_>) -> Result<Option<T>> {
        match input.peek()? {
            wire::NULL => {
                input.read_u8()?;
                Ok(None)
            }
            0 => {
                input.read_u8()?;
                Ok(None)
            }
            _ => Ok(Some(self.inner.codec.decode(input)?)),
        }
    }

    fn to_json(&self, value: &Option<T>, flavor: JsonFlavor) -> Value {
        match value {
            None => Value::Null,
            Some(inner) => {
                let json = self.inner.codec.to_json(inner, flavor);
                // Mirror the wire widening: a delegated 0 would read back as
                // None, so render it as the string form the inner serializer
                // also accepts.
                if json.as_f64() == Some(0.0) {
                    Value::from("0")
                } else {
                    json
                }
            }
        }
    }

    fn from_json(&self, json: &Value, keep_unrecognized: bool) -> Result<Option<T>> {
        match json {
            Value::Null => Ok(None),
            Value::Number(n) if n.as_f64() == Some(0.0) => Ok(None),
            _ => Ok(Some(self.inner.codec.from_json(json, keep_unrecognized)?)),
        }
    }

    fn type_descriptor(&self) -> TypeDescriptor {
        let inner = self.inner.type_descriptor();
        // optional<optional<T>> is the same type as optional<T>.
        if matches!(inner, TypeDescriptor::Optional(_)) {
            inner
        } else {
            TypeDescriptor::Optional(Box::new(inner))
        }
    }
}

struct ArrayCodec<T> {
    item: Serializer<T>,
    key_chain: Option<String>,
}

impl<T: 'static> Codec<Vec<T>> for ArrayCodec<T> {
    fn default_value(&self) -> Vec<T> {
        Vec::new()
    }

    fn is_default(&self, value: &Vec<T>) -> bool {
        value.is_empty()
    }

    fn encode(&self, value: &Vec<T>, out: &mut Writer) {
        wire::write_array_len(value.len(), out);
        for item in value {
            self.item.codec.encode(item, out);
        }
    }

    fn decode(&self, input: &mut Reader<'_>) -> Result<Vec<T>> {
        let len = wire::read_array_len(input)?;
        let mut items = Vec::with_capacity(len.min(input.remaining()));
        for _ in 0..len {
            items.push(self.item.codec.decode(input)?);
        }
        Ok(items)
    }

    fn to_json(&self, value: &Vec<T>, flavor: JsonFlavor) -> Value {
        Value::Array(
            value
                .iter()
                .map(|item| self.item.codec.to_json(item, flavor))
                .collect(),
        )
    }

    fn from_json(&self, json: &Value, keep_unrecognized: bool) -> Result<Vec<T>> {
        match json {
            Value::Number(n) if n.as_f64() == Some(0.0) => Ok(Vec::new()),
            Value::Array(items) => items
                .iter()
                .map(|item| self.item.codec.from_json(item, keep_unrecognized))
                .collect(),
            _ => Err(Error::unexpected_json("array", json)),
        }
    }

    fn type_descriptor(&self) -> TypeDescriptor {
        TypeDescriptor::Array {
            item: Box::new(self.item.type_descriptor()),
            key_chain: self.key_chain.clone(),
        }
    }
}
