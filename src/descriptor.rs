//! Reflective type descriptors.
//!
//! Every serializer exposes a [`TypeDescriptor`] mirroring its structure.
//! Descriptors export to JSON (together with the transitive closure of the
//! record definitions they reference), rebuild from that JSON, and drive a
//! schema-directed [`transform`](TypeDescriptor::transform) between the three
//! serialized forms without the concrete Rust types.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bytes::Bytes;
use once_cell::sync::OnceCell;
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::io::{Reader, Writer};
use crate::primitives;
use crate::serializer::MAGIC;
use crate::timestamp::Timestamp;
use crate::wire;

/// The nine primitive types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum PrimitiveType {
    Bool,
    Int32,
    Int64,
    Uint64,
    Float32,
    Float64,
    Timestamp,
    String,
    Bytes,
}

impl PrimitiveType {
    /// The schema-language name of this primitive.
    pub fn name(self) -> &'static str {
        match self {
            PrimitiveType::Bool => "bool",
            PrimitiveType::Int32 => "int32",
            PrimitiveType::Int64 => "int64",
            PrimitiveType::Uint64 => "uint64",
            PrimitiveType::Float32 => "float32",
            PrimitiveType::Float64 => "float64",
            PrimitiveType::Timestamp => "timestamp",
            PrimitiveType::String => "string",
            PrimitiveType::Bytes => "bytes",
        }
    }

    fn from_name(name: &str) -> Option<PrimitiveType> {
        Some(match name {
            "bool" => PrimitiveType::Bool,
            "int32" => PrimitiveType::Int32,
            "int64" => PrimitiveType::Int64,
            "uint64" => PrimitiveType::Uint64,
            "float32" => PrimitiveType::Float32,
            "float64" => PrimitiveType::Float64,
            "timestamp" => PrimitiveType::Timestamp,
            "string" => PrimitiveType::String,
            "bytes" => PrimitiveType::Bytes,
            _ => return None,
        })
    }
}

/// Whether a record is a struct or an enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum RecordKind {
    Struct,
    Enum,
}

impl RecordKind {
    fn name(self) -> &'static str {
        match self {
            RecordKind::Struct => "struct",
            RecordKind::Enum => "enum",
        }
    }
}

/// One field of a record: a struct field, an enum constant (no type), or an
/// enum value variant.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    /// The schema-side field name.
    pub name: String,
    /// The field number.
    pub number: u32,
    /// The field type; `None` for enum constants.
    pub ty: Option<TypeDescriptor>,
}

/// The definition of one struct or enum.
///
/// Fields are attached after construction so that mutually recursive records
/// can share `Arc`s; the graph is frozen once module registration (or
/// [`parse_type_descriptor`]) completes.
#[derive(Debug)]
pub struct RecordDescriptor {
    kind: RecordKind,
    module_path: String,
    name: String,
    removed: Vec<u32>,
    fields: OnceCell<Vec<FieldDescriptor>>,
}

impl RecordDescriptor {
    pub(crate) fn new(
        kind: RecordKind,
        module_path: &str,
        name: &str,
        removed: Vec<u32>,
    ) -> RecordDescriptor {
        RecordDescriptor {
            kind,
            module_path: module_path.to_string(),
            name: name.to_string(),
            removed,
            fields: OnceCell::new(),
        }
    }

    pub(crate) fn set_fields(&self, fields: Vec<FieldDescriptor>) {
        let _ = self.fields.set(fields);
    }

    /// Struct or enum.
    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    /// The path of the schema module defining this record.
    pub fn module_path(&self) -> &str {
        &self.module_path
    }

    /// The record's qualified name within its module.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The record identity, `<module_path>:<qualified_name>`.
    pub fn id(&self) -> String {
        format!("{}:{}", self.module_path, self.name)
    }

    /// Field numbers retired from the schema.
    pub fn removed_numbers(&self) -> &[u32] {
        &self.removed
    }

    /// The record's fields, in declaration order.
    pub fn fields(&self) -> &[FieldDescriptor] {
        self.fields.get().map(Vec::as_slice).unwrap_or(&[])
    }

    /// One past the highest active or removed number: the count of leading
    /// slots a decoder consumes through the schema.
    fn recognized_slots(&self) -> usize {
        let max_active = self.fields().iter().map(|f| f.number + 1).max().unwrap_or(0);
        let max_removed = self.removed.iter().map(|n| n + 1).max().unwrap_or(0);
        max_active.max(max_removed) as usize
    }

    fn find_field(&self, number: u32) -> Option<&FieldDescriptor> {
        self.fields().iter().find(|f| f.number == number)
    }

    fn field_by_name(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields().iter().find(|f| f.name == name)
    }
}

/// A serialized form for [`TypeDescriptor::transform`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// The binary form, with the `soia` magic.
    Bytes,
    /// Single-line dense JSON text.
    DenseJson,
    /// Two-space-indented readable JSON text.
    ReadableJson,
}

/// A value in one of the serialized forms. JSON text carries either flavor;
/// decoding detects which.
#[derive(Debug, Clone, PartialEq)]
pub enum Encoded {
    /// The binary form.
    Bytes(Bytes),
    /// JSON text of either flavor.
    Json(String),
}

/// The reflective mirror of a serializer's type.
#[derive(Clone)]
pub enum TypeDescriptor {
    /// One of the nine primitive types.
    Primitive(PrimitiveType),
    /// `optional<T>`.
    Optional(Box<TypeDescriptor>),
    /// `array<T>`, optionally carrying a key-extractor path.
    Array {
        /// The item type.
        item: Box<TypeDescriptor>,
        /// Dotted path of the item field used by generated keyed lookups.
        key_chain: Option<String>,
    },
    /// A struct definition.
    Struct(Arc<RecordDescriptor>),
    /// An enum definition.
    Enum(Arc<RecordDescriptor>),
}

// Record descriptors may reference each other cyclically, so Debug renders
// records by identity instead of recursing.
impl core::fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TypeDescriptor::Primitive(p) => write!(f, "Primitive({})", p.name()),
            TypeDescriptor::Optional(inner) => write!(f, "Optional({inner:?})"),
            TypeDescriptor::Array { item, key_chain } => match key_chain {
                Some(key_chain) => write!(f, "Array({item:?}, key_chain={key_chain})"),
                None => write!(f, "Array({item:?})"),
            },
            TypeDescriptor::Struct(record) => write!(f, "Struct({})", record.id()),
            TypeDescriptor::Enum(record) => write!(f, "Enum({})", record.id()),
        }
    }
}

impl TypeDescriptor {
    /// Exports `{type, records}` JSON, where `records` is the transitive
    /// closure of every struct and enum definition this type references.
    pub fn as_json(&self) -> Value {
        let mut records = Vec::new();
        let mut visited = HashSet::new();
        self.collect_records(&mut visited, &mut records);
        json!({"type": self.type_node(), "records": records})
    }

    /// [`as_json`](Self::as_json), pretty-printed.
    pub fn as_json_code(&self) -> String {
        serde_json::to_string_pretty(&self.as_json()).expect("serializing a Value cannot fail")
    }

    fn type_node(&self) -> Value {
        match self {
            TypeDescriptor::Primitive(p) => json!({"kind": "primitive", "value": p.name()}),
            TypeDescriptor::Optional(inner) => {
                json!({"kind": "optional", "value": inner.type_node()})
            }
            TypeDescriptor::Array { item, key_chain } => {
                let mut value = json!({"item": item.type_node()});
                if let Some(key_chain) = key_chain {
                    value["key_chain"] = Value::from(key_chain.as_str());
                }
                json!({"kind": "array", "value": value})
            }
            TypeDescriptor::Struct(record) | TypeDescriptor::Enum(record) => {
                json!({"kind": "record", "value": record.id()})
            }
        }
    }

    fn collect_records(&self, visited: &mut HashSet<String>, out: &mut Vec<Value>) {
        match self {
            TypeDescriptor::Primitive(_) => {}
            TypeDescriptor::Optional(inner) => inner.collect_records(visited, out),
            TypeDescriptor::Array { item, .. } => item.collect_records(visited, out),
            TypeDescriptor::Struct(record) | TypeDescriptor::Enum(record) => {
                if visited.insert(record.id()) {
                    out.push(record_json(record));
                    for field in record.fields() {
                        if let Some(ty) = &field.ty {
                            ty.collect_records(visited, out);
                        }
                    }
                }
            }
        }
    }
}

fn record_json(record: &RecordDescriptor) -> Value {
    let fields: Vec<Value> = record
        .fields()
        .iter()
        .map(|field| {
            let mut out = json!({"name": field.name, "number": field.number});
            if let Some(ty) = &field.ty {
                out["type"] = ty.type_node();
            }
            out
        })
        .collect();
    let mut out = json!({
        "kind": record.kind().name(),
        "id": record.id(),
        "fields": fields,
    });
    if !record.removed_numbers().is_empty() {
        out["removed_fields"] = json!(record.removed_numbers());
    }
    out
}

fn descriptor_error(message: &str) -> Error {
    Error::InvalidTypeDescriptor(message.to_string())
}

/// Rebuilds a fully wired [`TypeDescriptor`] from its
/// [`as_json`](TypeDescriptor::as_json) export.
///
/// The rebuilt descriptor is backed by generic record definitions rather
/// than generated types, so it supports [`TypeDescriptor::transform`] but
/// not typed (de)serialization.
pub fn parse_type_descriptor(json: &Value) -> Result<TypeDescriptor> {
    let records_json = json
        .get("records")
        .and_then(Value::as_array)
        .ok_or_else(|| descriptor_error("missing 'records' list"))?;

    // Pass 1: one shell per record identity.
    let mut by_id: HashMap<String, Arc<RecordDescriptor>> = HashMap::new();
    for record in records_json {
        let id = record
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| descriptor_error("record without 'id'"))?;
        let kind = match record.get("kind").and_then(Value::as_str) {
            Some("struct") => RecordKind::Struct,
            Some("enum") => RecordKind::Enum,
            _ => return Err(descriptor_error("record kind must be 'struct' or 'enum'")),
        };
        let (module_path, name) = id
            .rsplit_once(':')
            .ok_or_else(|| descriptor_error("record id must be '<module_path>:<name>'"))?;
        let removed = match record.get("removed_fields") {
            None => Vec::new(),
            Some(numbers) => numbers
                .as_array()
                .ok_or_else(|| descriptor_error("'removed_fields' must be a list"))?
                .iter()
                .map(|n| {
                    n.as_u64()
                        .map(|n| n as u32)
                        .ok_or_else(|| descriptor_error("removed field numbers must be integers"))
                })
                .collect::<Result<_>>()?,
        };
        if by_id
            .insert(
                id.to_string(),
                Arc::new(RecordDescriptor::new(kind, module_path, name, removed)),
            )
            .is_some()
        {
            return Err(Error::DuplicateRecord(id.to_string()));
        }
    }

    // Pass 2: resolve field types against the full identity map.
    for record in records_json {
        let id = record.get("id").and_then(Value::as_str).unwrap_or_default();
        let shell = &by_id[id];
        let fields_json = record
            .get("fields")
            .and_then(Value::as_array)
            .ok_or_else(|| descriptor_error("record without 'fields'"))?;
        let mut fields = Vec::with_capacity(fields_json.len());
        for field in fields_json {
            let name = field
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| descriptor_error("field without 'name'"))?;
            let number = field
                .get("number")
                .and_then(Value::as_u64)
                .ok_or_else(|| descriptor_error("field without 'number'"))?;
            let ty = match field.get("type") {
                None => None,
                Some(node) => Some(parse_type_node(node, &by_id)?),
            };
            fields.push(FieldDescriptor {
                name: name.to_string(),
                number: number as u32,
                ty,
            });
        }
        shell.set_fields(fields);
    }

    let root = json
        .get("type")
        .ok_or_else(|| descriptor_error("missing 'type'"))?;
    parse_type_node(root, &by_id)
}

fn parse_type_node(
    node: &Value,
    records: &HashMap<String, Arc<RecordDescriptor>>,
) -> Result<TypeDescriptor> {
    let kind = node
        .get("kind")
        .and_then(Value::as_str)
        .ok_or_else(|| descriptor_error("type node without 'kind'"))?;
    let value = node
        .get("value")
        .ok_or_else(|| descriptor_error("type node without 'value'"))?;
    match kind {
        "primitive" => {
            let name = value
                .as_str()
                .ok_or_else(|| descriptor_error("primitive name must be a string"))?;
            PrimitiveType::from_name(name)
                .map(TypeDescriptor::Primitive)
                .ok_or_else(|| descriptor_error("unknown primitive type"))
        }
        "optional" => {
            let inner = parse_type_node(value, records)?;
            // optional<optional<T>> collapses to optional<T>.
            if matches!(inner, TypeDescriptor::Optional(_)) {
                Ok(inner)
            } else {
                Ok(TypeDescriptor::Optional(Box::new(inner)))
            }
        }
        "array" => {
            let item = value
                .get("item")
                .ok_or_else(|| descriptor_error("array type without 'item'"))?;
            let key_chain = value
                .get("key_chain")
                .and_then(Value::as_str)
                .map(str::to_string);
            Ok(TypeDescriptor::Array {
                item: Box::new(parse_type_node(item, records)?),
                key_chain,
            })
        }
        "record" => {
            let id = value
                .as_str()
                .ok_or_else(|| descriptor_error("record reference must be a string"))?;
            let record = records
                .get(id)
                .ok_or_else(|| Error::UnknownRecordReference(id.to_string()))?;
            Ok(match record.kind() {
                RecordKind::Struct => TypeDescriptor::Struct(record.clone()),
                RecordKind::Enum => TypeDescriptor::Enum(record.clone()),
            })
        }
        _ => Err(descriptor_error("unknown type node kind")),
    }
}

impl TypeDescriptor {
    /// Re-encodes `source` into `target` without the concrete Rust type,
    /// losslessly between bytes and dense JSON (readable JSON drops unknown
    /// fields, as always).
    pub fn transform(&self, source: &Encoded, target: Format) -> Result<Encoded> {
        let dense = match source {
            Encoded::Bytes(bytes) => {
                let rest = bytes.get(4..).ok_or(Error::UnexpectedEnd)?;
                self.decode_dyn(&mut Reader::new(rest, false))?
            }
            Encoded::Json(code) => self.json_to_dense(&serde_json::from_str(code)?)?,
        };
        Ok(match target {
            Format::Bytes => {
                let mut out = Writer::new();
                out.write_raw(MAGIC);
                self.encode_dyn(&dense, &mut out)?;
                Encoded::Bytes(out.into_bytes())
            }
            Format::DenseJson => Encoded::Json(
                serde_json::to_string(&dense).expect("serializing a Value cannot fail"),
            ),
            Format::ReadableJson => Encoded::Json(
                serde_json::to_string_pretty(&self.dense_to_readable(&dense)?)
                    .expect("serializing a Value cannot fail"),
            ),
        })
    }

    /// Decodes the binary form into the dense JSON pivot.
    fn decode_dyn(&self, input: &mut Reader<'_>) -> Result<Value> {
        Ok(match self {
            TypeDescriptor::Primitive(p) => match p {
                PrimitiveType::Bool => Value::from(wire::read_number(input)?.to_bool() as u8),
                PrimitiveType::Int32 => Value::from(wire::read_number(input)?.to_i32()),
                PrimitiveType::Int64 => primitives::i64_to_json(wire::read_number(input)?.to_i64()),
                PrimitiveType::Uint64 => {
                    primitives::u64_to_json(wire::read_number(input)?.to_u64())
                }
                PrimitiveType::Float32 => {
                    primitives::float_to_json(wire::read_number(input)?.to_f64() as f32 as f64)
                }
                PrimitiveType::Float64 => {
                    primitives::float_to_json(wire::read_number(input)?.to_f64())
                }
                PrimitiveType::Timestamp => Value::from(
                    Timestamp::from_unix_millis(wire::read_number(input)?.to_i64()).unix_millis(),
                ),
                PrimitiveType::String => Value::from(wire::read_string(input)?),
                PrimitiveType::Bytes => {
                    primitives::bytes_to_base64_json(&wire::read_byte_string(input)?)
                }
            },
            TypeDescriptor::Optional(inner) => match input.peek()? {
                wire::NULL | 0 => {
                    input.read_u8()?;
                    Value::Null
                }
                _ => inner.decode_dyn(input)?,
            },
            TypeDescriptor::Array { item, .. } => {
                let len = wire::read_array_len(input)?;
                let mut items = Vec::with_capacity(len.min(input.remaining()));
                for _ in 0..len {
                    items.push(item.decode_dyn(input)?);
                }
                Value::Array(items)
            }
            TypeDescriptor::Struct(record) => {
                let count = wire::read_array_len(input)?;
                let recognized = record.recognized_slots();
                let mut slots = Vec::with_capacity(count.min(input.remaining()));
                for index in 0..count {
                    if index >= recognized {
                        slots.push(wire::decode_untyped(input)?);
                    } else if input.peek()? == 0 {
                        // The filler byte for a default-valued slot.
                        input.read_u8()?;
                        slots.push(Value::from(0));
                    } else {
                        match record.find_field(index as u32) {
                            Some(field) => match &field.ty {
                                Some(ty) => slots.push(ty.decode_dyn(input)?),
                                None => return Err(descriptor_error("struct field without type")),
                            },
                            None => {
                                wire::skip_value(input)?;
                                slots.push(Value::from(0));
                            }
                        }
                    }
                }
                Value::Array(slots)
            }
            TypeDescriptor::Enum(record) => {
                let wire_byte = input.peek()?;
                match wire_byte {
                    0..=241 => {
                        let number = wire::read_number(input)?.to_i64();
                        if (1..=u32::MAX as i64).contains(&number) {
                            if let Some(field) = record.find_field(number as u32) {
                                if field.ty.is_some() {
                                    return Err(Error::WrongVariantKind {
                                        record: record.id(),
                                        number: number as u64,
                                        expected: "value",
                                    });
                                }
                            }
                        }
                        Value::from(number)
                    }
                    wire::ENUM_VALUE | 251..=254 => {
                        input.read_u8()?;
                        let number = if wire_byte == wire::ENUM_VALUE {
                            wire::read_number(input)?.to_u64()
                        } else {
                            (wire_byte - 250) as u64
                        };
                        let payload = match record
                            .find_field(number.min(u32::MAX as u64) as u32)
                            .filter(|_| number <= u32::MAX as u64)
                        {
                            Some(field) => match &field.ty {
                                Some(ty) => ty.decode_dyn(input)?,
                                None => {
                                    return Err(Error::WrongVariantKind {
                                        record: record.id(),
                                        number,
                                        expected: "constant",
                                    })
                                }
                            },
                            None => wire::decode_untyped(input)?,
                        };
                        json!([number, payload])
                    }
                    _ => {
                        return Err(Error::UnexpectedWire {
                            wire: wire_byte,
                            decoding: "enum",
                        })
                    }
                }
            }
        })
    }

    /// Encodes the dense JSON pivot into the binary form.
    fn encode_dyn(&self, value: &Value, out: &mut Writer) -> Result<()> {
        match self {
            TypeDescriptor::Primitive(p) => match p {
                PrimitiveType::Bool => out.push(primitives::json_to_bool(value)? as u8),
                PrimitiveType::Int32 => {
                    wire::write_int(primitives::json_to_i32(value)? as i64, out)
                }
                PrimitiveType::Int64 => wire::write_int(primitives::json_to_i64(value)?, out),
                PrimitiveType::Uint64 => wire::write_uint(primitives::json_to_u64(value)?, out),
                PrimitiveType::Float32 => {
                    primitives::encode_f32(primitives::json_to_f64(value)? as f32, out)
                }
                PrimitiveType::Float64 => {
                    primitives::encode_f64(primitives::json_to_f64(value)?, out)
                }
                PrimitiveType::Timestamp => {
                    primitives::encode_timestamp(primitives::json_to_timestamp(value)?, out)
                }
                PrimitiveType::String => wire::write_string(&primitives::json_to_string(value)?, out),
                PrimitiveType::Bytes => {
                    wire::write_byte_string(&primitives::json_to_bytes(value)?, out)
                }
            },
            TypeDescriptor::Optional(inner) => match value {
                Value::Null => out.push(wire::NULL),
                Value::Number(n) if n.as_f64() == Some(0.0) => out.push(wire::NULL),
                _ => {
                    let start = out.len();
                    inner.encode_dyn(value, out)?;
                    if out.len() == start + 1 && out.byte_at(start) == 0 {
                        out.patch(start, wire::U16);
                        out.write_u16(0);
                    }
                }
            },
            TypeDescriptor::Array { item, .. } => match value {
                Value::Number(n) if n.as_f64() == Some(0.0) => wire::write_array_len(0, out),
                Value::Array(items) => {
                    wire::write_array_len(items.len(), out);
                    for entry in items {
                        item.encode_dyn(entry, out)?;
                    }
                }
                _ => return Err(Error::unexpected_json("array", value)),
            },
            TypeDescriptor::Struct(record) => match value {
                Value::Number(n) if n.as_f64() == Some(0.0) => out.push(0),
                Value::Array(slots) => {
                    if slots.is_empty() {
                        out.push(0);
                        return Ok(());
                    }
                    let recognized = record.recognized_slots();
                    wire::write_array_len(slots.len(), out);
                    for (index, slot) in slots.iter().enumerate() {
                        // A literal zero is the filler for a default slot.
                        if slot.as_u64() == Some(0) {
                            out.push(0);
                            continue;
                        }
                        match record
                            .find_field(index.min(u32::MAX as usize) as u32)
                            .filter(|_| index < recognized)
                            .and_then(|f| f.ty.as_ref())
                        {
                            Some(ty) => ty.encode_dyn(slot, out)?,
                            None => wire::encode_untyped(slot, out),
                        }
                    }
                }
                _ => return Err(Error::unexpected_json("struct", value)),
            },
            TypeDescriptor::Enum(record) => match value {
                Value::Number(_) => {
                    let number = primitives::json_to_i64(value)?;
                    if number >= 0 {
                        wire::write_uint(number as u64, out);
                    } else {
                        wire::write_int(number, out);
                    }
                }
                Value::Array(pair) if pair.len() == 2 => {
                    let number = primitives::json_to_u64(&pair[0])?;
                    if (1..=4).contains(&number) {
                        out.push(250 + number as u8);
                    } else {
                        out.push(wire::ENUM_VALUE);
                        wire::write_uint(number, out);
                    }
                    match record
                        .find_field(number.min(u32::MAX as u64) as u32)
                        .and_then(|f| f.ty.as_ref())
                    {
                        Some(ty) => ty.encode_dyn(&pair[1], out)?,
                        None => wire::encode_untyped(&pair[1], out),
                    }
                }
                _ => return Err(Error::unexpected_json("enum", value)),
            },
        }
        Ok(())
    }

    /// Normalizes JSON of either flavor into the dense pivot.
    fn json_to_dense(&self, value: &Value) -> Result<Value> {
        Ok(match self {
            TypeDescriptor::Primitive(p) => match p {
                PrimitiveType::Bool => Value::from(primitives::json_to_bool(value)? as u8),
                PrimitiveType::Int32 => Value::from(primitives::json_to_i32(value)?),
                PrimitiveType::Int64 => primitives::i64_to_json(primitives::json_to_i64(value)?),
                PrimitiveType::Uint64 => primitives::u64_to_json(primitives::json_to_u64(value)?),
                PrimitiveType::Float32 => {
                    primitives::float_to_json(primitives::json_to_f64(value)? as f32 as f64)
                }
                PrimitiveType::Float64 => {
                    primitives::float_to_json(primitives::json_to_f64(value)?)
                }
                PrimitiveType::Timestamp => {
                    Value::from(primitives::json_to_timestamp(value)?.unix_millis())
                }
                PrimitiveType::String => Value::from(primitives::json_to_string(value)?),
                PrimitiveType::Bytes => {
                    primitives::bytes_to_base64_json(&primitives::json_to_bytes(value)?)
                }
            },
            TypeDescriptor::Optional(inner) => match value {
                Value::Null => Value::Null,
                Value::Number(n) if n.as_f64() == Some(0.0) => Value::Null,
                _ => {
                    let dense = inner.json_to_dense(value)?;
                    // A bare zero would read back as null.
                    if dense.as_f64() == Some(0.0) {
                        Value::from("0")
                    } else {
                        dense
                    }
                }
            },
            TypeDescriptor::Array { item, .. } => match value {
                Value::Number(n) if n.as_f64() == Some(0.0) => Value::Array(Vec::new()),
                Value::Array(items) => Value::Array(
                    items
                        .iter()
                        .map(|entry| item.json_to_dense(entry))
                        .collect::<Result<_>>()?,
                ),
                _ => return Err(Error::unexpected_json("array", value)),
            },
            TypeDescriptor::Struct(record) => match value {
                Value::Number(n) if n.as_f64() == Some(0.0) => Value::Array(Vec::new()),
                Value::Array(slots) => {
                    let recognized = record.recognized_slots();
                    let mut dense = Vec::with_capacity(slots.len());
                    for (index, slot) in slots.iter().enumerate() {
                        if slot.as_u64() == Some(0) || index >= recognized {
                            dense.push(slot.clone());
                            continue;
                        }
                        match record
                            .find_field(index as u32)
                            .and_then(|f| f.ty.as_ref())
                        {
                            Some(ty) => dense.push(ty.json_to_dense(slot)?),
                            None => dense.push(slot.clone()),
                        }
                    }
                    Value::Array(dense)
                }
                Value::Object(object) => {
                    let recognized = record.recognized_slots();
                    let mut dense = vec![Value::from(0); recognized];
                    let mut count = 0;
                    for (name, field_value) in object {
                        let Some(field) = record.field_by_name(name) else {
                            continue;
                        };
                        let Some(ty) = &field.ty else { continue };
                        let slot = ty.json_to_dense(field_value)?;
                        if !ty.dense_is_default(&slot) {
                            count = count.max(field.number as usize + 1);
                        }
                        dense[field.number as usize] = slot;
                    }
                    dense.truncate(count);
                    Value::Array(dense)
                }
                _ => return Err(Error::unexpected_json("struct", value)),
            },
            TypeDescriptor::Enum(record) => match value {
                Value::Number(_) => {
                    let number = primitives::json_to_i64(value)?;
                    self.check_enum_number(record, number)?;
                    Value::from(number)
                }
                Value::String(s) => {
                    if s == "?" {
                        Value::from(0)
                    } else if let Some(field) = record.field_by_name(s) {
                        if field.ty.is_some() {
                            return Err(Error::WrongVariantKind {
                                record: record.id(),
                                number: field.number as u64,
                                expected: "constant",
                            });
                        }
                        Value::from(field.number)
                    } else if s.parse::<f64>().is_ok() {
                        let number = primitives::json_to_i64(value)?;
                        self.check_enum_number(record, number)?;
                        Value::from(number)
                    } else {
                        // Unknown constant names are dropped.
                        Value::from(0)
                    }
                }
                Value::Array(pair) if pair.len() == 2 => {
                    let number = primitives::json_to_i64(&pair[0])?;
                    match record
                        .find_field(number.clamp(0, u32::MAX as i64) as u32)
                        .filter(|_| (0..=u32::MAX as i64).contains(&number))
                    {
                        Some(field) => match &field.ty {
                            Some(ty) => json!([number, ty.json_to_dense(&pair[1])?]),
                            None => {
                                return Err(Error::WrongVariantKind {
                                    record: record.id(),
                                    number: number as u64,
                                    expected: "constant",
                                })
                            }
                        },
                        None if (0..=u32::MAX as i64).contains(&number)
                            && record.removed_numbers().contains(&(number as u32)) =>
                        {
                            Value::from(0)
                        }
                        None => value.clone(),
                    }
                }
                Value::Object(object) => {
                    let kind = object
                        .get("kind")
                        .and_then(Value::as_str)
                        .ok_or_else(|| Error::unexpected_json("enum {kind, value} object", value))?;
                    if kind == "?" {
                        Value::from(0)
                    } else if let Some(field) = record.field_by_name(kind) {
                        match &field.ty {
                            Some(ty) => {
                                let payload = object.get("value").unwrap_or(&Value::Null);
                                json!([field.number, ty.json_to_dense(payload)?])
                            }
                            None => Value::from(field.number),
                        }
                    } else {
                        Value::from(0)
                    }
                }
                _ => return Err(Error::unexpected_json("enum", value)),
            },
        })
    }

    fn check_enum_number(&self, record: &RecordDescriptor, number: i64) -> Result<()> {
        if (1..=u32::MAX as i64).contains(&number) {
            if let Some(field) = record.find_field(number as u32) {
                if field.ty.is_some() {
                    return Err(Error::WrongVariantKind {
                        record: record.id(),
                        number: number as u64,
                        expected: "value",
                    });
                }
            }
        }
        Ok(())
    }

    /// Converts the dense pivot to the readable form. Lossy: unknown fields
    /// and variants are dropped.
    fn dense_to_readable(&self, value: &Value) -> Result<Value> {
        Ok(match self {
            TypeDescriptor::Primitive(p) => match p {
                PrimitiveType::Bool => Value::from(primitives::json_to_bool(value)?),
                PrimitiveType::Timestamp => {
                    let ts = primitives::json_to_timestamp(value)?;
                    primitives::timestamp_to_json(ts, crate::serializer::JsonFlavor::Readable)
                }
                PrimitiveType::Bytes => {
                    let bytes = primitives::json_to_bytes(value)?;
                    primitives::bytes_to_json(&bytes, crate::serializer::JsonFlavor::Readable)
                }
                _ => value.clone(),
            },
            TypeDescriptor::Optional(inner) => match value {
                Value::Null => Value::Null,
                Value::Number(n) if n.as_f64() == Some(0.0) => Value::Null,
                _ => inner.dense_to_readable(value)?,
            },
            TypeDescriptor::Array { item, .. } => match value {
                Value::Number(n) if n.as_f64() == Some(0.0) => Value::Array(Vec::new()),
                Value::Array(items) => Value::Array(
                    items
                        .iter()
                        .map(|entry| item.dense_to_readable(entry))
                        .collect::<Result<_>>()?,
                ),
                _ => return Err(Error::unexpected_json("array", value)),
            },
            TypeDescriptor::Struct(record) => match value {
                Value::Number(n) if n.as_f64() == Some(0.0) => Value::Object(Default::default()),
                Value::Array(slots) => {
                    let mut object = serde_json::Map::new();
                    for (index, slot) in slots.iter().enumerate() {
                        let Some(field) = record.find_field(index as u32) else {
                            continue;
                        };
                        let Some(ty) = &field.ty else { continue };
                        if !ty.dense_is_default(slot) {
                            object.insert(field.name.clone(), ty.dense_to_readable(slot)?);
                        }
                    }
                    Value::Object(object)
                }
                _ => return Err(Error::unexpected_json("struct", value)),
            },
            TypeDescriptor::Enum(record) => match value {
                Value::Number(_) => {
                    let number = primitives::json_to_i64(value)?;
                    match record
                        .find_field(number.clamp(0, u32::MAX as i64) as u32)
                        .filter(|_| number > 0)
                    {
                        Some(field) if field.ty.is_none() => Value::from(field.name.as_str()),
                        _ => Value::from("?"),
                    }
                }
                Value::Array(pair) if pair.len() == 2 => {
                    let number = primitives::json_to_i64(&pair[0])?;
                    match record
                        .find_field(number.clamp(0, u32::MAX as i64) as u32)
                        .filter(|_| number > 0)
                    {
                        Some(field) => match &field.ty {
                            Some(ty) => json!({
                                "kind": field.name,
                                "value": ty.dense_to_readable(&pair[1])?,
                            }),
                            None => Value::from("?"),
                        },
                        None => Value::from("?"),
                    }
                }
                _ => Value::from("?"),
            },
        })
    }

    /// True if the dense pivot value is its type's default.
    fn dense_is_default(&self, value: &Value) -> bool {
        match self {
            TypeDescriptor::Primitive(p) => match p {
                PrimitiveType::String | PrimitiveType::Bytes => {
                    value.as_str() == Some("") || value.as_f64() == Some(0.0)
                }
                _ => value.as_f64() == Some(0.0),
            },
            TypeDescriptor::Optional(_) => {
                value.is_null() || value.as_f64() == Some(0.0)
            }
            TypeDescriptor::Array { .. } | TypeDescriptor::Struct(_) => {
                value.as_f64() == Some(0.0)
                    || value.as_array().map(Vec::is_empty).unwrap_or(false)
            }
            TypeDescriptor::Enum(_) => value.as_f64() == Some(0.0),
        }
    }
}
