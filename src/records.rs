//! Serializers for generated record types.
//!
//! Structs encode as a slot array indexed by field number; enums encode as a
//! variant number optionally followed by a payload. Both support forward
//! compatibility: unknown slots and variants are skipped by default, or
//! captured verbatim in preserve mode for byte-for-byte re-encoding.
//!
//! Generated code registers its records through [`init_module`], which runs
//! two passes so that mutually recursive records can reference each other:
//! pass 1 claims each record's identity and attaches its descriptor shell,
//! pass 2 binds field serializers and freezes the codec.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use once_cell::sync::{Lazy, OnceCell};
use serde_json::{json, Value};

use crate::descriptor::{FieldDescriptor, RecordDescriptor, RecordKind, TypeDescriptor};
use crate::error::{Error, Result};
use crate::io::{Reader, Writer};
use crate::serializer::{Codec, JsonFlavor, Serializer};
use crate::wire;

/// Identifies the serializer that captured an unknown payload, so a payload
/// can never be re-encoded through a different record type.
#[derive(Clone)]
pub(crate) struct Token(Arc<()>);

impl Token {
    fn new() -> Token {
        Token(Arc::new(()))
    }

    fn matches(&self, other: &Token) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Token) -> bool {
        self.matches(other)
    }
}

impl core::fmt::Debug for Token {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("Token")
    }
}

#[derive(Debug, PartialEq)]
enum SlotsPayload {
    Json(Vec<Value>),
    Bytes(Bytes),
}

#[derive(Debug, PartialEq)]
struct UnknownSlots {
    token: Token,
    total_slots: usize,
    payload: SlotsPayload,
}

/// Unknown trailing struct slots captured during a preserve-mode
/// deserialization. Every generated struct carries one of these; the empty
/// value is free.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UnrecognizedFields {
    inner: Option<Arc<UnknownSlots>>,
}

impl UnrecognizedFields {
    /// True when no unknown fields were captured.
    pub fn is_empty(&self) -> bool {
        self.inner.is_none()
    }
}

#[derive(Debug, PartialEq)]
enum VariantPayload {
    Json(Value),
    Bytes(Bytes),
}

#[derive(Debug, PartialEq)]
struct UnknownVariant {
    token: Token,
    payload: VariantPayload,
}

/// The payload of a generated enum's `Unknown` variant: either nothing (the
/// plain `UNKNOWN` value) or an unrecognized variant captured in preserve
/// mode.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UnrecognizedEnum {
    inner: Option<Arc<UnknownVariant>>,
}

impl UnrecognizedEnum {
    /// True unless an unrecognized variant was captured.
    pub fn is_empty(&self) -> bool {
        self.inner.is_none()
    }
}

/// Creates the serializer shell for one generated record type. The shell is
/// inert until [`init_module`] wires it; generated code stores it in a
/// `Lazy` static so that records can reference each other freely.
pub fn record_serializer<T: Clone + PartialEq + Send + Sync + 'static>() -> Serializer<T> {
    Serializer::from_codec(RecordCodec {
        token: Token::new(),
        descriptor: OnceCell::new(),
        ops: OnceCell::new(),
    })
}

pub(crate) struct RecordCodec<T> {
    token: Token,
    descriptor: OnceCell<TypeDescriptor>,
    ops: OnceCell<RecordOps<T>>,
}

enum RecordOps<T> {
    Struct(StructOps<T>),
    Enum(EnumOps<T>),
}

impl<T> RecordCodec<T> {
    fn ops(&self) -> &RecordOps<T> {
        self.ops
            .get()
            .expect("record serializer used before its module was initialized")
    }
}

struct BoundField<T> {
    name: &'static str,
    number: u32,
    encode: Box<dyn Fn(&T, &mut Writer) + Send + Sync>,
    decode_into: Box<dyn Fn(&mut T, &mut Reader<'_>) -> Result<()> + Send + Sync>,
    to_json: Box<dyn Fn(&T, JsonFlavor) -> Value + Send + Sync>,
    from_json_into: Box<dyn Fn(&mut T, &Value, bool) -> Result<()> + Send + Sync>,
    is_default: Box<dyn Fn(&T) -> bool + Send + Sync>,
    descriptor: Box<dyn Fn() -> TypeDescriptor + Send + Sync>,
}

struct StructOps<T> {
    fields: Vec<BoundField<T>>,
    /// Slot index -> field, `None` for removed numbers and gaps. The length
    /// is the recognized slot count.
    slots: Vec<Option<usize>>,
    default_value: T,
    get_unrecognized: fn(&T) -> &UnrecognizedFields,
    set_unrecognized: fn(&mut T, UnrecognizedFields),
}

struct BoundConstant<T> {
    name: &'static str,
    number: u32,
    make: fn() -> T,
    matches: fn(&T) -> bool,
}

struct BoundValue<T> {
    name: &'static str,
    number: u32,
    matches: Box<dyn Fn(&T) -> bool + Send + Sync>,
    encode_payload: Box<dyn Fn(&T, &mut Writer) + Send + Sync>,
    payload_to_json: Box<dyn Fn(&T, JsonFlavor) -> Option<Value> + Send + Sync>,
    decode: Box<dyn Fn(&mut Reader<'_>) -> Result<T> + Send + Sync>,
    from_json: Box<dyn Fn(&Value, bool) -> Result<T> + Send + Sync>,
    descriptor: Box<dyn Fn() -> TypeDescriptor + Send + Sync>,
}

struct EnumOps<T> {
    record_id: String,
    constants: Vec<BoundConstant<T>>,
    values: Vec<BoundValue<T>>,
    removed: Vec<u32>,
    make_unknown: fn(UnrecognizedEnum) -> T,
    as_unknown: fn(&T) -> Option<&UnrecognizedEnum>,
}

impl<T> EnumOps<T> {
    fn find_constant(&self, number: u32) -> Option<&BoundConstant<T>> {
        self.constants.iter().find(|c| c.number == number)
    }

    fn find_value(&self, number: u32) -> Option<&BoundValue<T>> {
        self.values.iter().find(|v| v.number == number)
    }

    fn is_removed(&self, number: u32) -> bool {
        self.removed.contains(&number)
    }
}

/// Writes the header of an enum value variant.
fn write_value_variant_header(number: u32, out: &mut Writer) {
    if (1..=4).contains(&number) {
        out.push(250 + number as u8);
    } else {
        out.push(wire::ENUM_VALUE);
        wire::write_uint(number as u64, out);
    }
}

impl<T: Clone + PartialEq + Send + Sync + 'static> Codec<T> for RecordCodec<T> {
    fn default_value(&self) -> T {
        match self.ops() {
            RecordOps::Struct(ops) => ops.default_value.clone(),
            RecordOps::Enum(ops) => (ops.make_unknown)(UnrecognizedEnum::default()),
        }
    }

    fn is_default(&self, value: &T) -> bool {
        match self.ops() {
            RecordOps::Struct(ops) => *value == ops.default_value,
            RecordOps::Enum(ops) => (ops.as_unknown)(value).is_some_and(|u| u.inner.is_none()),
        }
    }

    fn encode(&self, value: &T, out: &mut Writer) {
        match self.ops() {
            RecordOps::Struct(ops) => encode_struct(ops, &self.token, value, out),
            RecordOps::Enum(ops) => encode_enum(ops, &self.token, value, out),
        }
    }

    fn decode(&self, input: &mut Reader<'_>) -> Result<T> {
        match self.ops() {
            RecordOps::Struct(ops) => decode_struct(ops, &self.token, input),
            RecordOps::Enum(ops) => decode_enum(ops, &self.token, input),
        }
    }

    fn to_json(&self, value: &T, flavor: JsonFlavor) -> Value {
        match self.ops() {
            RecordOps::Struct(ops) => struct_to_json(ops, &self.token, value, flavor),
            RecordOps::Enum(ops) => enum_to_json(ops, &self.token, value, flavor),
        }
    }

    fn from_json(&self, json: &Value, keep_unrecognized: bool) -> Result<T> {
        match self.ops() {
            RecordOps::Struct(ops) => struct_from_json(ops, &self.token, json, keep_unrecognized),
            RecordOps::Enum(ops) => enum_from_json(ops, &self.token, json, keep_unrecognized),
        }
    }

    fn type_descriptor(&self) -> TypeDescriptor {
        self.descriptor
            .get()
            .expect("record serializer used before its module was initialized")
            .clone()
    }

    fn as_record(&self) -> Option<&RecordCodec<T>> {
        Some(self)
    }
}

fn unrecognized_of<'a, T>(
    ops: &StructOps<T>,
    token: &Token,
    value: &'a T,
) -> Option<&'a UnknownSlots> {
    (ops.get_unrecognized)(value)
        .inner
        .as_deref()
        .filter(|u| u.token.matches(token))
}

/// The number of slots a struct writes: one past the last non-default active
/// field, or the originally observed total when unknown fields are present.
fn written_slot_count<T>(ops: &StructOps<T>, unrecognized: Option<&UnknownSlots>, value: &T) -> usize {
    if let Some(u) = unrecognized {
        return u.total_slots;
    }
    let mut count = 0;
    for (index, slot) in ops.slots.iter().enumerate() {
        if let Some(f) = slot {
            if !(ops.fields[*f].is_default)(value) {
                count = index + 1;
            }
        }
    }
    count
}

fn encode_struct<T>(ops: &StructOps<T>, token: &Token, value: &T, out: &mut Writer) {
    let unrecognized = unrecognized_of(ops, token, value);
    let count = written_slot_count(ops, unrecognized, value);
    if count == 0 {
        // A default struct is the single byte 0.
        out.push(0);
        return;
    }
    wire::write_array_len(count, out);
    for slot in ops.slots.iter().take(count) {
        match slot {
            Some(f) if !(ops.fields[*f].is_default)(value) => (ops.fields[*f].encode)(value, out),
            _ => out.push(0),
        }
    }
    if let Some(u) = unrecognized {
        match &u.payload {
            SlotsPayload::Bytes(bytes) => out.write_raw(bytes),
            SlotsPayload::Json(values) => {
                for v in values {
                    wire::encode_untyped(v, out);
                }
            }
        }
    }
}

fn decode_struct<T: Clone>(ops: &StructOps<T>, token: &Token, input: &mut Reader<'_>) -> Result<T> {
    let count = wire::read_array_len(input)?;
    let mut value = ops.default_value.clone();
    let recognized = ops.slots.len();
    for slot in ops.slots.iter().take(count) {
        match slot {
            Some(f) => (ops.fields[*f].decode_into)(&mut value, input)?,
            None => wire::skip_value(input)?,
        }
    }
    if count > recognized {
        let start = input.pos();
        for _ in recognized..count {
            wire::skip_value(input)?;
        }
        if input.keep_unrecognized() {
            let captured = Bytes::copy_from_slice(input.consumed_since(start));
            (ops.set_unrecognized)(
                &mut value,
                UnrecognizedFields {
                    inner: Some(Arc::new(UnknownSlots {
                        token: token.clone(),
                        total_slots: count,
                        payload: SlotsPayload::Bytes(captured),
                    })),
                },
            );
        }
    }
    Ok(value)
}

fn struct_to_json<T>(ops: &StructOps<T>, token: &Token, value: &T, flavor: JsonFlavor) -> Value {
    match flavor {
        JsonFlavor::Dense => {
            let unrecognized = unrecognized_of(ops, token, value);
            let count = written_slot_count(ops, unrecognized, value);
            let recognized = ops.slots.len();
            let mut slots = Vec::with_capacity(count);
            for slot in ops.slots.iter().take(count) {
                match slot {
                    Some(f) if !(ops.fields[*f].is_default)(value) => {
                        slots.push((ops.fields[*f].to_json)(value, flavor))
                    }
                    _ => slots.push(Value::from(0)),
                }
            }
            if let Some(u) = unrecognized {
                match &u.payload {
                    SlotsPayload::Json(values) => slots.extend(values.iter().cloned()),
                    SlotsPayload::Bytes(bytes) => {
                        // Captured bytes were fully skipped over at decode
                        // time, so they decode cleanly here.
                        let mut reader = Reader::new(bytes, false);
                        for _ in recognized..u.total_slots {
                            slots.push(
                                wire::decode_untyped(&mut reader).unwrap_or(Value::Null),
                            );
                        }
                    }
                }
            }
            Value::Array(slots)
        }
        JsonFlavor::Readable => {
            let mut object = serde_json::Map::new();
            for field in &ops.fields {
                if !(field.is_default)(value) {
                    object.insert(field.name.to_string(), (field.to_json)(value, flavor));
                }
            }
            Value::Object(object)
        }
    }
}

fn struct_from_json<T: Clone>(
    ops: &StructOps<T>,
    token: &Token,
    json: &Value,
    keep_unrecognized: bool,
) -> Result<T> {
    match json {
        Value::Number(n) if n.as_f64() == Some(0.0) => Ok(ops.default_value.clone()),
        Value::Array(slots) => {
            let mut value = ops.default_value.clone();
            let recognized = ops.slots.len();
            for (index, slot_json) in slots.iter().enumerate().take(recognized) {
                if let Some(f) = ops.slots[index] {
                    (ops.fields[f].from_json_into)(&mut value, slot_json, keep_unrecognized)?;
                }
            }
            if slots.len() > recognized && keep_unrecognized {
                (ops.set_unrecognized)(
                    &mut value,
                    UnrecognizedFields {
                        inner: Some(Arc::new(UnknownSlots {
                            token: token.clone(),
                            total_slots: slots.len(),
                            payload: SlotsPayload::Json(slots[recognized..].to_vec()),
                        })),
                    },
                );
            }
            Ok(value)
        }
        Value::Object(object) => {
            // Readable form; unknown keys are ignored.
            let mut value = ops.default_value.clone();
            for field in &ops.fields {
                if let Some(field_json) = object.get(field.name) {
                    (field.from_json_into)(&mut value, field_json, keep_unrecognized)?;
                }
            }
            Ok(value)
        }
        _ => Err(Error::unexpected_json("struct", json)),
    }
}

fn encode_enum<T>(ops: &EnumOps<T>, token: &Token, value: &T, out: &mut Writer) {
    if let Some(unknown) = (ops.as_unknown)(value) {
        match unknown.inner.as_deref() {
            Some(u) if u.token.matches(token) => match &u.payload {
                VariantPayload::Bytes(bytes) => out.write_raw(bytes),
                VariantPayload::Json(json) => encode_unknown_variant_json(json, out),
            },
            _ => out.push(0),
        }
        return;
    }
    for constant in &ops.constants {
        if (constant.matches)(value) {
            wire::write_uint(constant.number as u64, out);
            return;
        }
    }
    for variant in &ops.values {
        if (variant.matches)(value) {
            write_value_variant_header(variant.number, out);
            (variant.encode_payload)(value, out);
            return;
        }
    }
    out.push(0);
}

/// Re-encodes an enum value preserved from dense JSON. A `[number, payload]`
/// pair takes the enum wire branches so bytes produced from JSON-preserved
/// values stay decodable as enums.
fn encode_unknown_variant_json(json: &Value, out: &mut Writer) {
    match json.as_array() {
        Some(pair) if pair.len() == 2 && pair[0].is_u64() => {
            let number = pair[0].as_u64().unwrap_or(0);
            if (1..=4).contains(&number) {
                out.push(250 + number as u8);
            } else {
                out.push(wire::ENUM_VALUE);
                wire::write_uint(number, out);
            }
            wire::encode_untyped(&pair[1], out);
        }
        _ => wire::encode_untyped(json, out),
    }
}

fn preserved_enum<T>(
    ops: &EnumOps<T>,
    token: &Token,
    keep: bool,
    payload: impl FnOnce() -> VariantPayload,
) -> T {
    if keep {
        (ops.make_unknown)(UnrecognizedEnum {
            inner: Some(Arc::new(UnknownVariant {
                token: token.clone(),
                payload: payload(),
            })),
        })
    } else {
        (ops.make_unknown)(UnrecognizedEnum::default())
    }
}

fn decode_enum<T>(ops: &EnumOps<T>, token: &Token, input: &mut Reader<'_>) -> Result<T> {
    let start = input.pos();
    let wire_byte = input.peek()?;
    match wire_byte {
        0..=241 => {
            let number = wire::read_number(input)?.to_i64();
            if number == 0 {
                return Ok((ops.make_unknown)(UnrecognizedEnum::default()));
            }
            if (0..=u32::MAX as i64).contains(&number) {
                let number = number as u32;
                if let Some(constant) = ops.find_constant(number) {
                    return Ok((constant.make)());
                }
                if ops.find_value(number).is_some() {
                    return Err(Error::WrongVariantKind {
                        record: ops.record_id.clone(),
                        number: number as u64,
                        expected: "value",
                    });
                }
                if ops.is_removed(number) {
                    return Ok((ops.make_unknown)(UnrecognizedEnum::default()));
                }
            }
            let keep = input.keep_unrecognized();
            let captured = input.consumed_since(start);
            Ok(preserved_enum(ops, token, keep, || {
                VariantPayload::Bytes(Bytes::copy_from_slice(captured))
            }))
        }
        wire::ENUM_VALUE | 251..=254 => {
            input.read_u8()?;
            let number = if wire_byte == wire::ENUM_VALUE {
                wire::read_number(input)?.to_u64()
            } else {
                (wire_byte - 250) as u64
            };
            if number <= u32::MAX as u64 {
                if let Some(variant) = ops.find_value(number as u32) {
                    return (variant.decode)(input);
                }
                if ops.find_constant(number as u32).is_some() {
                    return Err(Error::WrongVariantKind {
                        record: ops.record_id.clone(),
                        number,
                        expected: "constant",
                    });
                }
                if ops.is_removed(number as u32) {
                    wire::skip_value(input)?;
                    return Ok((ops.make_unknown)(UnrecognizedEnum::default()));
                }
            }
            wire::skip_value(input)?;
            let keep = input.keep_unrecognized();
            let captured = input.consumed_since(start);
            Ok(preserved_enum(ops, token, keep, || {
                VariantPayload::Bytes(Bytes::copy_from_slice(captured))
            }))
        }
        _ => Err(Error::UnexpectedWire {
            wire: wire_byte,
            decoding: "enum",
        }),
    }
}

fn enum_to_json<T>(ops: &EnumOps<T>, token: &Token, value: &T, flavor: JsonFlavor) -> Value {
    if let Some(unknown) = (ops.as_unknown)(value) {
        return match (unknown.inner.as_deref(), flavor) {
            (_, JsonFlavor::Readable) => Value::from("?"),
            (Some(u), JsonFlavor::Dense) if u.token.matches(token) => match &u.payload {
                VariantPayload::Json(json) => json.clone(),
                VariantPayload::Bytes(bytes) => {
                    let mut reader = Reader::new(bytes, false);
                    wire::decode_untyped(&mut reader).unwrap_or(Value::from(0))
                }
            },
            _ => Value::from(0),
        };
    }
    for constant in &ops.constants {
        if (constant.matches)(value) {
            return match flavor {
                JsonFlavor::Dense => Value::from(constant.number),
                JsonFlavor::Readable => Value::from(constant.name),
            };
        }
    }
    for variant in &ops.values {
        if let Some(payload) = (variant.payload_to_json)(value, flavor) {
            return match flavor {
                JsonFlavor::Dense => json!([variant.number, payload]),
                JsonFlavor::Readable => json!({"kind": variant.name, "value": payload}),
            };
        }
    }
    match flavor {
        JsonFlavor::Dense => Value::from(0),
        JsonFlavor::Readable => Value::from("?"),
    }
}

fn enum_from_json<T>(
    ops: &EnumOps<T>,
    token: &Token,
    json: &Value,
    keep_unrecognized: bool,
) -> Result<T> {
    match json {
        Value::Number(_) => enum_from_number(ops, token, json, keep_unrecognized),
        Value::String(s) => {
            if s == "?" {
                return Ok((ops.make_unknown)(UnrecognizedEnum::default()));
            }
            if let Some(constant) = ops.constants.iter().find(|c| c.name == s.as_str()) {
                return Ok((constant.make)());
            }
            if let Some(variant) = ops.values.iter().find(|v| v.name == s.as_str()) {
                return Err(Error::WrongVariantKind {
                    record: ops.record_id.clone(),
                    number: variant.number as u64,
                    expected: "constant",
                });
            }
            if s.parse::<f64>().is_ok() {
                return enum_from_number(ops, token, json, keep_unrecognized);
            }
            // An unrecognized constant name is dropped, like an unknown
            // number without preserve mode.
            Ok((ops.make_unknown)(UnrecognizedEnum::default()))
        }
        Value::Array(pair) => {
            if pair.len() != 2 {
                return Err(Error::unexpected_json("enum [number, value] pair", json));
            }
            let number = crate::primitives::json_to_i64(&pair[0])?;
            if !(0..=u32::MAX as i64).contains(&number) {
                return Ok(preserved_enum(ops, token, keep_unrecognized, || {
                    VariantPayload::Json(json.clone())
                }));
            }
            let number = number as u32;
            if let Some(variant) = ops.find_value(number) {
                return (variant.from_json)(&pair[1], keep_unrecognized);
            }
            if ops.find_constant(number).is_some() {
                return Err(Error::WrongVariantKind {
                    record: ops.record_id.clone(),
                    number: number as u64,
                    expected: "constant",
                });
            }
            if ops.is_removed(number) {
                return Ok((ops.make_unknown)(UnrecognizedEnum::default()));
            }
            Ok(preserved_enum(ops, token, keep_unrecognized, || {
                VariantPayload::Json(json.clone())
            }))
        }
        Value::Object(object) => {
            let kind = object
                .get("kind")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::unexpected_json("enum {kind, value} object", json))?;
            if kind == "?" {
                return Ok((ops.make_unknown)(UnrecognizedEnum::default()));
            }
            if let Some(variant) = ops.values.iter().find(|v| v.name == kind) {
                let payload = object.get("value").unwrap_or(&Value::Null);
                return (variant.from_json)(payload, keep_unrecognized);
            }
            if let Some(constant) = ops.constants.iter().find(|c| c.name == kind) {
                return Ok((constant.make)());
            }
            Ok((ops.make_unknown)(UnrecognizedEnum::default()))
        }
        _ => Err(Error::unexpected_json("enum", json)),
    }
}

fn enum_from_number<T>(
    ops: &EnumOps<T>,
    token: &Token,
    json: &Value,
    keep_unrecognized: bool,
) -> Result<T> {
    let number = crate::primitives::json_to_i64(json)?;
    if number == 0 {
        return Ok((ops.make_unknown)(UnrecognizedEnum::default()));
    }
    if (0..=u32::MAX as i64).contains(&number) {
        let number = number as u32;
        if let Some(constant) = ops.find_constant(number) {
            return Ok((constant.make)());
        }
        if ops.find_value(number).is_some() {
            return Err(Error::WrongVariantKind {
                record: ops.record_id.clone(),
                number: number as u64,
                expected: "value",
            });
        }
        if ops.is_removed(number) {
            return Ok((ops.make_unknown)(UnrecognizedEnum::default()));
        }
    }
    Ok(preserved_enum(ops, token, keep_unrecognized, || {
        VariantPayload::Json(json.clone())
    }))
}

// Registration.

static REGISTRY: Lazy<Mutex<HashSet<String>>> = Lazy::new(|| Mutex::new(HashSet::new()));

fn claim_identity(id: &str) -> Result<()> {
    let mut registry = REGISTRY.lock().expect("record registry poisoned");
    if !registry.insert(id.to_string()) {
        return Err(Error::DuplicateRecord(id.to_string()));
    }
    Ok(())
}

struct FieldReg<T> {
    name: &'static str,
    number: u32,
    bind: Box<dyn FnOnce() -> BoundField<T> + Send>,
}

/// Declares one generated struct for [`init_module`].
pub struct StructRegistration<T> {
    name: &'static str,
    serializer: Serializer<T>,
    get_unrecognized: fn(&T) -> &UnrecognizedFields,
    set_unrecognized: fn(&mut T, UnrecognizedFields),
    removed: &'static [u32],
    fields: Vec<FieldReg<T>>,
}

impl<T: Default + Clone + PartialEq + Send + Sync + 'static> StructRegistration<T> {
    /// Starts the registration of a struct named `name` (its qualified name
    /// within the module). The accessors reach the struct's unrecognized
    /// fields slot.
    pub fn new(
        name: &'static str,
        serializer: Serializer<T>,
        get_unrecognized: fn(&T) -> &UnrecognizedFields,
        set_unrecognized: fn(&mut T, UnrecognizedFields),
    ) -> Self {
        StructRegistration {
            name,
            serializer,
            get_unrecognized,
            set_unrecognized,
            removed: &[],
            fields: Vec::new(),
        }
    }

    /// Declares a field. `serializer` is called during the second
    /// registration pass, so it may refer to records of the same module.
    pub fn field<F: 'static>(
        mut self,
        name: &'static str,
        number: u32,
        serializer: fn() -> Serializer<F>,
        get: fn(&T) -> &F,
        set: fn(&mut T, F),
    ) -> Self {
        self.fields.push(FieldReg {
            name,
            number,
            bind: Box::new(move || {
                let field = serializer();
                BoundField {
                    name,
                    number,
                    encode: {
                        let s = field.clone();
                        Box::new(move |value, out| s.codec.encode(get(value), out))
                    },
                    decode_into: {
                        let s = field.clone();
                        Box::new(move |value, input| {
                            set(value, s.codec.decode(input)?);
                            Ok(())
                        })
                    },
                    to_json: {
                        let s = field.clone();
                        Box::new(move |value, flavor| s.codec.to_json(get(value), flavor))
                    },
                    from_json_into: {
                        let s = field.clone();
                        Box::new(move |value, json, keep| {
                            set(value, s.codec.from_json(json, keep)?);
                            Ok(())
                        })
                    },
                    is_default: {
                        let s = field.clone();
                        Box::new(move |value| s.codec.is_default(get(value)))
                    },
                    descriptor: Box::new(move || field.type_descriptor()),
                }
            }),
        });
        self
    }

    /// Declares the struct's removed field numbers.
    pub fn removed(mut self, numbers: &'static [u32]) -> Self {
        self.removed = numbers;
        self
    }
}

struct ValueReg<T> {
    name: &'static str,
    number: u32,
    bind: Box<dyn FnOnce() -> BoundValue<T> + Send>,
}

/// Declares one generated enum for [`init_module`].
pub struct EnumRegistration<T> {
    name: &'static str,
    serializer: Serializer<T>,
    make_unknown: fn(UnrecognizedEnum) -> T,
    as_unknown: fn(&T) -> Option<&UnrecognizedEnum>,
    removed: &'static [u32],
    constants: Vec<BoundConstant<T>>,
    values: Vec<ValueReg<T>>,
}

impl<T: Clone + PartialEq + Send + Sync + 'static> EnumRegistration<T> {
    /// Starts the registration of an enum named `name`. The two functions
    /// construct and project the reserved `Unknown` variant.
    pub fn new(
        name: &'static str,
        serializer: Serializer<T>,
        make_unknown: fn(UnrecognizedEnum) -> T,
        as_unknown: fn(&T) -> Option<&UnrecognizedEnum>,
    ) -> Self {
        EnumRegistration {
            name,
            serializer,
            make_unknown,
            as_unknown,
            removed: &[],
            constants: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Declares a constant variant.
    pub fn constant(
        mut self,
        name: &'static str,
        number: u32,
        make: fn() -> T,
        matches: fn(&T) -> bool,
    ) -> Self {
        self.constants.push(BoundConstant {
            name,
            number,
            make,
            matches,
        });
        self
    }

    /// Declares a value-carrying variant. `serializer` is called during the
    /// second registration pass.
    pub fn value<P: 'static>(
        mut self,
        name: &'static str,
        number: u32,
        serializer: fn() -> Serializer<P>,
        inject: fn(P) -> T,
        project: fn(&T) -> Option<&P>,
    ) -> Self {
        self.values.push(ValueReg {
            name,
            number,
            bind: Box::new(move || {
                let payload = serializer();
                BoundValue {
                    name,
                    number,
                    matches: Box::new(move |value| project(value).is_some()),
                    encode_payload: {
                        let s = payload.clone();
                        Box::new(move |value, out| {
                            if let Some(p) = project(value) {
                                s.codec.encode(p, out);
                            }
                        })
                    },
                    payload_to_json: {
                        let s = payload.clone();
                        Box::new(move |value, flavor| {
                            project(value).map(|p| s.codec.to_json(p, flavor))
                        })
                    },
                    decode: {
                        let s = payload.clone();
                        Box::new(move |input| Ok(inject(s.codec.decode(input)?)))
                    },
                    from_json: {
                        let s = payload.clone();
                        Box::new(move |json, keep| Ok(inject(s.codec.from_json(json, keep)?)))
                    },
                    descriptor: Box::new(move || payload.type_descriptor()),
                }
            }),
        });
        self
    }

    /// Declares the enum's removed variant numbers.
    pub fn removed(mut self, numbers: &'static [u32]) -> Self {
        self.removed = numbers;
        self
    }
}

type SecondPass = Box<dyn FnOnce() -> Result<()>>;

/// A type-erased record registration, built from a [`StructRegistration`] or
/// an [`EnumRegistration`].
pub struct Registration {
    register: Box<dyn FnOnce(&'static str) -> Result<SecondPass>>,
}

fn record_codec_of<T: Clone + PartialEq + Send + Sync + 'static>(
    serializer: &Serializer<T>,
) -> &RecordCodec<T> {
    serializer
        .codec
        .as_record()
        .expect("registered serializer was not created by record_serializer()")
}

impl<T: Default + Clone + PartialEq + Send + Sync + 'static> From<StructRegistration<T>>
    for Registration
{
    fn from(reg: StructRegistration<T>) -> Registration {
        Registration {
            register: Box::new(move |module_path| {
                let id = format!("{module_path}:{}", reg.name);
                claim_identity(&id)?;
                let descriptor = Arc::new(RecordDescriptor::new(
                    RecordKind::Struct,
                    module_path,
                    reg.name,
                    reg.removed.to_vec(),
                ));
                record_codec_of(&reg.serializer)
                    .descriptor
                    .set(TypeDescriptor::Struct(descriptor.clone()))
                    .map_err(|_| Error::DuplicateRecord(id.clone()))?;

                Ok(Box::new(move || {
                    let fields: Vec<BoundField<T>> =
                        reg.fields.into_iter().map(|f| (f.bind)()).collect();

                    let mut numbers = HashSet::new();
                    for field in &fields {
                        if !numbers.insert(field.number) {
                            return Err(Error::DuplicateFieldNumber {
                                record: id.clone(),
                                number: field.number,
                            });
                        }
                        if reg.removed.contains(&field.number) {
                            return Err(Error::RemovedFieldNumber {
                                record: id.clone(),
                                number: field.number,
                            });
                        }
                    }

                    let max_active = fields.iter().map(|f| f.number + 1).max().unwrap_or(0);
                    let max_removed = reg.removed.iter().map(|n| n + 1).max().unwrap_or(0);
                    let mut slots = vec![None; max_active.max(max_removed) as usize];
                    for (index, field) in fields.iter().enumerate() {
                        slots[field.number as usize] = Some(index);
                    }

                    descriptor.set_fields(
                        fields
                            .iter()
                            .map(|f| FieldDescriptor {
                                name: f.name.to_string(),
                                number: f.number,
                                ty: Some((f.descriptor)()),
                            })
                            .collect(),
                    );

                    record_codec_of(&reg.serializer)
                        .ops
                        .set(RecordOps::Struct(StructOps {
                            fields,
                            slots,
                            default_value: T::default(),
                            get_unrecognized: reg.get_unrecognized,
                            set_unrecognized: reg.set_unrecognized,
                        }))
                        .map_err(|_| Error::DuplicateRecord(id.clone()))?;
                    Ok(())
                }) as SecondPass)
            }),
        }
    }
}

impl<T: Clone + PartialEq + Send + Sync + 'static> From<EnumRegistration<T>> for Registration {
    fn from(reg: EnumRegistration<T>) -> Registration {
        Registration {
            register: Box::new(move |module_path| {
                let id = format!("{module_path}:{}", reg.name);
                claim_identity(&id)?;
                let descriptor = Arc::new(RecordDescriptor::new(
                    RecordKind::Enum,
                    module_path,
                    reg.name,
                    reg.removed.to_vec(),
                ));
                record_codec_of(&reg.serializer)
                    .descriptor
                    .set(TypeDescriptor::Enum(descriptor.clone()))
                    .map_err(|_| Error::DuplicateRecord(id.clone()))?;

                Ok(Box::new(move || {
                    let values: Vec<BoundValue<T>> =
                        reg.values.into_iter().map(|v| (v.bind)()).collect();

                    // Number 0 is the implicit UNKNOWN variant.
                    let mut numbers = HashSet::from([0u32]);
                    for number in reg
                        .constants
                        .iter()
                        .map(|c| c.number)
                        .chain(values.iter().map(|v| v.number))
                    {
                        if !numbers.insert(number) {
                            return Err(Error::DuplicateFieldNumber {
                                record: id.clone(),
                                number,
                            });
                        }
                        if reg.removed.contains(&number) {
                            return Err(Error::RemovedFieldNumber {
                                record: id.clone(),
                                number,
                            });
                        }
                    }

                    descriptor.set_fields(
                        reg.constants
                            .iter()
                            .map(|c| FieldDescriptor {
                                name: c.name.to_string(),
                                number: c.number,
                                ty: None,
                            })
                            .chain(values.iter().map(|v| FieldDescriptor {
                                name: v.name.to_string(),
                                number: v.number,
                                ty: Some((v.descriptor)()),
                            }))
                            .collect(),
                    );

                    record_codec_of(&reg.serializer)
                        .ops
                        .set(RecordOps::Enum(EnumOps {
                            record_id: id.clone(),
                            constants: reg.constants,
                            values,
                            removed: reg.removed.to_vec(),
                            make_unknown: reg.make_unknown,
                            as_unknown: reg.as_unknown,
                        }))
                        .map_err(|_| Error::DuplicateRecord(id.clone()))?;
                    Ok(())
                }) as SecondPass)
            }),
        }
    }
}

/// Registers every record of one generated module.
///
/// Runs in two passes so that records may reference each other, including
/// cyclically: the first pass claims identities and attaches descriptor
/// shells, the second binds field serializers and freezes each codec.
/// Registering the same record twice is an error. Callers must complete
/// registration before any serialization begins.
pub fn init_module(module_path: &'static str, records: Vec<Registration>) -> Result<()> {
    let mut second_pass = Vec::with_capacity(records.len());
    for record in records {
        second_pass.push((record.register)(module_path)?);
    }
    for finish in second_pass {
        finish()?;
    }
    Ok(())
}
