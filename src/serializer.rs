//! The uniform serialization contract.
//!
//! A [`Serializer<T>`] is a cheaply cloneable handle shared by every caller
//! serializing values of `T`. Primitive and container serializers are fully
//! built at construction; record serializers start as empty shells that
//! [`crate::init_module`] wires up during module registration.

use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;

use crate::descriptor::TypeDescriptor;
use crate::error::{Error, Result};
use crate::io::{Reader, Writer};
use crate::records::RecordCodec;

/// The 4-byte prefix of every binary serialization.
pub(crate) const MAGIC: &[u8; 4] = b"soia";

/// Selects between the two JSON forms.
///
/// Dense JSON is compact and rename-safe: structs are arrays indexed by field
/// number, enums are numbers. Readable JSON is name-indexed for human
/// inspection and drops unknown fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonFlavor {
    /// Array/number-indexed JSON; compact, rename-safe.
    Dense,
    /// Object/name-indexed JSON; human-friendly, not rename-safe.
    Readable,
}

/// The per-type serialization implementation behind a [`Serializer`].
pub(crate) trait Codec<T>: Send + Sync + 'static {
    fn default_value(&self) -> T;
    fn is_default(&self, value: &T) -> bool;
    fn encode(&self, value: &T, out: &mut Writer);
    fn decode(&self, input: &mut Reader<'_>) -> Result<T>;
    fn to_json(&self, value: &T, flavor: JsonFlavor) -> Value;
    fn from_json(&self, json: &Value, keep_unrecognized: bool) -> Result<T>;
    fn type_descriptor(&self) -> TypeDescriptor;

    /// Downcast hook used by module registration to reach record shells.
    fn as_record(&self) -> Option<&RecordCodec<T>> {
        None
    }
}

/// Converts values of `T` to and from dense JSON, readable JSON and bytes.
///
/// Serializers hold no per-call state; a handle may be shared freely across
/// threads once module registration has completed.
pub struct Serializer<T> {
    pub(crate) codec: Arc<dyn Codec<T>>,
}

impl<T> Clone for Serializer<T> {
    fn clone(&self) -> Self {
        Serializer {
            codec: self.codec.clone(),
        }
    }
}

impl<T: 'static> Serializer<T> {
    pub(crate) fn from_codec(codec: impl Codec<T>) -> Self {
        Serializer {
            codec: Arc::new(codec),
        }
    }

    /// The default value of `T`: zero for numbers, empty for strings, bytes
    /// and arrays, `UNKNOWN` for enums, all-defaults for structs.
    pub fn default_value(&self) -> T {
        self.codec.default_value()
    }

    /// True if `value` is structurally equal to the default and carries no
    /// preserved unknown fields.
    pub fn is_default(&self, value: &T) -> bool {
        self.codec.is_default(value)
    }

    /// Serializes to the binary form, starting with the `soia` magic.
    pub fn to_bytes(&self, value: &T) -> Bytes {
        let mut out = Writer::new();
        out.write_raw(MAGIC);
        self.codec.encode(value, &mut out);
        out.into_bytes()
    }

    /// Deserializes the binary form, dropping unknown fields.
    pub fn from_bytes(&self, bytes: &[u8]) -> Result<T> {
        self.from_bytes_with(bytes, false)
    }

    /// Deserializes the binary form, preserving unknown fields for later
    /// re-encoding. Only use with data from trusted sources.
    pub fn from_bytes_keep_unrecognized(&self, bytes: &[u8]) -> Result<T> {
        self.from_bytes_with(bytes, true)
    }

    fn from_bytes_with(&self, bytes: &[u8], keep_unrecognized: bool) -> Result<T> {
        // The first 4 bytes are the magic; skipped without inspection.
        let rest = bytes.get(4..).ok_or(Error::UnexpectedEnd)?;
        let mut input = Reader::new(rest, keep_unrecognized);
        self.codec.decode(&mut input)
    }

    /// Converts to a JSON value in the requested flavor.
    pub fn to_json(&self, value: &T, flavor: JsonFlavor) -> Value {
        self.codec.to_json(value, flavor)
    }

    /// Converts to JSON text: single-line for dense, two-space-indented for
    /// readable.
    pub fn to_json_code(&self, value: &T, flavor: JsonFlavor) -> String {
        let json = self.to_json(value, flavor);
        match flavor {
            JsonFlavor::Dense => {
                serde_json::to_string(&json).expect("serializing a Value cannot fail")
            }
            JsonFlavor::Readable => {
                serde_json::to_string_pretty(&json).expect("serializing a Value cannot fail")
            }
        }
    }

    /// Parses a JSON value of either flavor, dropping unknown fields.
    pub fn from_json(&self, json: &Value) -> Result<T> {
        self.codec.from_json(json, false)
    }

    /// Parses a JSON value of either flavor, preserving unknown fields for
    /// later re-encoding. Only use with data from trusted sources.
    pub fn from_json_keep_unrecognized(&self, json: &Value) -> Result<T> {
        self.codec.from_json(json, true)
    }

    /// Parses JSON text of either flavor.
    pub fn from_json_code(&self, code: &str) -> Result<T> {
        self.from_json(&serde_json::from_str(code)?)
    }

    /// Parses JSON text of either flavor, preserving unknown fields.
    pub fn from_json_code_keep_unrecognized(&self, code: &str) -> Result<T> {
        self.from_json_keep_unrecognized(&serde_json::from_str(code)?)
    }

    /// The reflective descriptor mirroring this serializer's type.
    pub fn type_descriptor(&self) -> TypeDescriptor {
        self.codec.type_descriptor()
    }
}
