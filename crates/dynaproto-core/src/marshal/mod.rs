//! Message marshalling between canonical values and the binary wire
//! format.
//!
//! The canonical value is a `serde_json::Value` tree:
//!
//! - 64-bit integers render as decimal strings, and both strings and
//!   numbers are accepted on input
//! - enums render as symbol names (or the number when no symbol matches),
//!   and both forms are accepted on input
//! - bytes are base64 text
//! - non-finite floats are the strings `NaN`, `Infinity` and `-Infinity`
//!
//! Decoding fills every field the sender omitted with its zero value.
//! Unset message fields and unset oneof members render as `null`.

pub mod wire;

use crate::error::{Error, Result};
use crate::introspect::{json_name, Element};
use crate::registry::{EnumDecl, FieldDecl, MessageDecl, Registry, ScalarKind};
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use bytes::BufMut;
use serde_json::{Map, Number, Value};
use tracing::trace;
use wire::{encode_key, encode_len, encode_varint, WireReader, WireType};

/// Maximum message nesting accepted by the decoder
pub const RECURSION_LIMIT: usize = 100;

/// Encodes `value` as message `message`.
///
/// The value is validated completely before any byte is produced; the
/// error names the offending field path.
pub fn to_binary(registry: &Registry, message: &str, value: &Value) -> Result<Vec<u8>> {
    let decl = registry
        .message(message)
        .ok_or_else(|| Error::UnknownMessage(message.to_string()))?;
    let mut buf = Vec::new();
    Encoder { registry }.message(decl, value, &decl.full_name, &mut buf)?;
    Ok(buf)
}

/// Checks that `value` would encode as message `message`.
pub fn validate(registry: &Registry, message: &str, value: &Value) -> Result<()> {
    to_binary(registry, message, value).map(|_| ())
}

/// Decodes `bytes` as message `message`.
pub fn from_binary(registry: &Registry, message: &str, bytes: &[u8]) -> Result<Value> {
    let decl = registry
        .message(message)
        .ok_or_else(|| Error::UnknownMessage(message.to_string()))?;
    Decoder { registry }
        .message(decl, WireReader::new(bytes), 0)
        .map(Value::Object)
}

/// A resolved element type, borrowed from the registry
#[derive(Clone, Copy)]
enum Kind<'r> {
    Scalar(ScalarKind),
    Enum(&'r EnumDecl),
    Message(&'r MessageDecl),
}

impl Kind<'_> {
    fn wire_type(&self) -> WireType {
        match self {
            Kind::Scalar(kind) => WireType::of_scalar(*kind),
            Kind::Enum(_) => WireType::Varint,
            Kind::Message(_) => WireType::Len,
        }
    }

    fn is_packable(&self) -> bool {
        match self {
            Kind::Scalar(kind) => kind.is_packable(),
            Kind::Enum(_) => true,
            Kind::Message(_) => false,
        }
    }
}

fn kind_of<'r>(registry: &'r Registry, field: &FieldDecl) -> Option<Kind<'r>> {
    match Element::of(&field.ty) {
        Element::Scalar(kind) => Some(Kind::Scalar(kind)),
        Element::Enum(name) => registry.enum_decl(&name).map(Kind::Enum),
        Element::Message(name) => registry.message(&name).map(Kind::Message),
        Element::Unresolved(_) => None,
    }
}

fn child_path(parent: &str, name: &str) -> String {
    format!("{}.{}", parent, name)
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// A scalar validated against its kind, ready to write
enum Scalar {
    I32(i32),
    I64(i64),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Bool(bool),
    Text(String),
    Bytes(Vec<u8>),
}

impl Scalar {
    fn is_default(&self) -> bool {
        match self {
            Scalar::I32(v) => *v == 0,
            Scalar::I64(v) => *v == 0,
            Scalar::U32(v) => *v == 0,
            Scalar::U64(v) => *v == 0,
            Scalar::F32(v) => v.to_bits() == 0,
            Scalar::F64(v) => v.to_bits() == 0,
            Scalar::Bool(v) => !v,
            Scalar::Text(v) => v.is_empty(),
            Scalar::Bytes(v) => v.is_empty(),
        }
    }

    fn write(&self, kind: ScalarKind, buf: &mut impl BufMut) {
        match (kind, self) {
            (ScalarKind::Sint32, Scalar::I32(v)) => encode_varint(wire::zigzag32(*v), buf),
            (ScalarKind::Sfixed32, Scalar::I32(v)) => buf.put_i32_le(*v),
            // int32 is sign-extended to ten bytes when negative
            (_, Scalar::I32(v)) => encode_varint(*v as i64 as u64, buf),
            (ScalarKind::Sint64, Scalar::I64(v)) => encode_varint(wire::zigzag64(*v), buf),
            (ScalarKind::Sfixed64, Scalar::I64(v)) => buf.put_i64_le(*v),
            (_, Scalar::I64(v)) => encode_varint(*v as u64, buf),
            (ScalarKind::Fixed32, Scalar::U32(v)) => buf.put_u32_le(*v),
            (_, Scalar::U32(v)) => encode_varint(*v as u64, buf),
            (ScalarKind::Fixed64, Scalar::U64(v)) => buf.put_u64_le(*v),
            (_, Scalar::U64(v)) => encode_varint(*v, buf),
            (_, Scalar::F32(v)) => buf.put_f32_le(*v),
            (_, Scalar::F64(v)) => buf.put_f64_le(*v),
            (_, Scalar::Bool(v)) => encode_varint(u64::from(*v), buf),
            (_, Scalar::Text(v)) => encode_len(v.as_bytes(), buf),
            (_, Scalar::Bytes(v)) => encode_len(v, buf),
        }
    }
}

struct Encoder<'r> {
    registry: &'r Registry,
}

impl<'r> Encoder<'r> {
    fn message(&self, decl: &MessageDecl, value: &Value, path: &str, buf: &mut Vec<u8>) -> Result<()> {
        let object = match value {
            Value::Object(object) => object,
            other => {
                return Err(Error::validation(
                    path,
                    format!(
                        "expected an object for message '{}', found {}",
                        decl.full_name,
                        describe(other)
                    ),
                ))
            }
        };

        // Pair every present key with its field, by name or JSON name.
        let mut assigned: Vec<(usize, &Value)> = Vec::with_capacity(object.len());
        for (key, value) in object {
            let index = decl
                .fields
                .iter()
                .position(|f| f.name == *key)
                .or_else(|| decl.fields.iter().position(|f| json_name(&f.name) == *key))
                .ok_or_else(|| {
                    Error::validation(
                        child_path(path, key),
                        format!("message '{}' has no field '{}'", decl.full_name, key),
                    )
                })?;
            if value.is_null() {
                continue;
            }
            if assigned.iter().any(|(seen, _)| *seen == index) {
                return Err(Error::validation(
                    child_path(path, key),
                    format!("field '{}' is set twice", decl.fields[index].name),
                ));
            }
            if let Some(group) = decl.fields[index].oneof {
                if let Some((other, _)) = assigned
                    .iter()
                    .find(|(seen, _)| decl.fields[*seen].oneof == Some(group))
                {
                    return Err(Error::validation(
                        child_path(path, key),
                        format!(
                            "oneof '{}' already has '{}' set",
                            decl.oneofs.get(group).map(String::as_str).unwrap_or(""),
                            decl.fields[*other].name
                        ),
                    ));
                }
            }
            assigned.push((index, value));
        }

        assigned.sort_by_key(|(index, _)| *index);
        for (index, value) in assigned {
            let field = &decl.fields[index];
            self.field(field, value, &child_path(path, &field.name), buf)?;
        }
        Ok(())
    }

    fn field(&self, field: &FieldDecl, value: &Value, path: &str, buf: &mut Vec<u8>) -> Result<()> {
        let kind = kind_of(self.registry, field).ok_or_else(|| {
            Error::validation(
                path,
                format!("type '{}' of this field is unresolved", field.ty.token()),
            )
        })?;

        if let Some(key_kind) = field.map_key {
            let Value::Object(entries) = value else {
                return Err(Error::validation(
                    path,
                    format!("expected an object for a map, found {}", describe(value)),
                ));
            };
            for (key, entry_value) in entries {
                let entry_path = format!("{}[{:?}]", path, key);
                let mut entry = Vec::new();
                let key_value = match key_kind {
                    ScalarKind::Bool => match key.as_str() {
                        "true" => Value::Bool(true),
                        "false" => Value::Bool(false),
                        _ => {
                            return Err(Error::validation(
                                entry_path,
                                "bool map keys must be \"true\" or \"false\"",
                            ))
                        }
                    },
                    _ => Value::String(key.clone()),
                };
                let key_scalar = scalar_from_json(key_kind, &key_value, &entry_path)?;
                encode_key(1, WireType::of_scalar(key_kind), &mut entry);
                key_scalar.write(key_kind, &mut entry);
                if !entry_value.is_null() {
                    self.single(2, kind, entry_value, &entry_path, false, &mut entry)?;
                }
                encode_key(field.number, WireType::Len, buf);
                encode_len(&entry, buf);
            }
            return Ok(());
        }

        if field.is_repeated() {
            let Value::Array(items) = value else {
                return Err(Error::validation(
                    path,
                    format!("expected an array, found {}", describe(value)),
                ));
            };
            if field.packed && kind.is_packable() {
                if items.is_empty() {
                    return Ok(());
                }
                let mut packed = Vec::new();
                for (i, item) in items.iter().enumerate() {
                    let item_path = format!("{}[{}]", path, i);
                    self.raw(kind, item, &item_path, &mut packed)?;
                }
                encode_key(field.number, WireType::Len, buf);
                encode_len(&packed, buf);
            } else {
                for (i, item) in items.iter().enumerate() {
                    let item_path = format!("{}[{}]", path, i);
                    self.single(field.number, kind, item, &item_path, false, buf)?;
                }
            }
            return Ok(());
        }

        self.single(
            field.number,
            kind,
            value,
            path,
            field.has_implicit_presence(),
            buf,
        )
    }

    /// Writes one keyed value; zero values are dropped when `implicit`.
    fn single(
        &self,
        number: u32,
        kind: Kind<'_>,
        value: &Value,
        path: &str,
        implicit: bool,
        buf: &mut Vec<u8>,
    ) -> Result<()> {
        match kind {
            Kind::Message(decl) => {
                let mut nested = Vec::new();
                self.message(decl, value, path, &mut nested)?;
                encode_key(number, WireType::Len, buf);
                encode_len(&nested, buf);
            }
            Kind::Enum(decl) => {
                let n = enum_from_json(decl, value, path)?;
                if !(implicit && n == 0) {
                    encode_key(number, WireType::Varint, buf);
                    encode_varint(n as i64 as u64, buf);
                }
            }
            Kind::Scalar(scalar_kind) => {
                let scalar = scalar_from_json(scalar_kind, value, path)?;
                if !(implicit && scalar.is_default()) {
                    encode_key(number, WireType::of_scalar(scalar_kind), buf);
                    scalar.write(scalar_kind, buf);
                }
            }
        }
        Ok(())
    }

    /// Writes one unkeyed value of a packed run.
    fn raw(&self, kind: Kind<'_>, value: &Value, path: &str, buf: &mut Vec<u8>) -> Result<()> {
        match kind {
            Kind::Enum(decl) => {
                let n = enum_from_json(decl, value, path)?;
                encode_varint(n as i64 as u64, buf);
            }
            Kind::Scalar(scalar_kind) => {
                scalar_from_json(scalar_kind, value, path)?.write(scalar_kind, buf);
            }
            Kind::Message(_) => {
                return Err(Error::internal("messages cannot be packed"));
            }
        }
        Ok(())
    }
}

fn enum_from_json(decl: &EnumDecl, value: &Value, path: &str) -> Result<i32> {
    match value {
        Value::String(name) => decl.number_of(name).ok_or_else(|| {
            Error::validation(
                path,
                format!("'{}' is not a symbol of enum '{}'", name, decl.full_name),
            )
        }),
        Value::Number(n) => n
            .as_i64()
            .and_then(|n| i32::try_from(n).ok())
            .ok_or_else(|| {
                Error::validation(path, format!("{} is out of range for an enum", n))
            }),
        other => Err(Error::validation(
            path,
            format!(
                "expected a symbol of enum '{}', found {}",
                decl.full_name,
                describe(other)
            ),
        )),
    }
}

fn scalar_from_json(kind: ScalarKind, value: &Value, path: &str) -> Result<Scalar> {
    let scalar = match kind {
        ScalarKind::Int32 | ScalarKind::Sint32 | ScalarKind::Sfixed32 => {
            Scalar::I32(integer_from_json(kind, value, path)?)
        }
        ScalarKind::Int64 | ScalarKind::Sint64 | ScalarKind::Sfixed64 => {
            Scalar::I64(integer_from_json(kind, value, path)?)
        }
        ScalarKind::Uint32 | ScalarKind::Fixed32 => {
            Scalar::U32(integer_from_json(kind, value, path)?)
        }
        ScalarKind::Uint64 | ScalarKind::Fixed64 => {
            Scalar::U64(integer_from_json(kind, value, path)?)
        }
        ScalarKind::Float => Scalar::F32(float_from_json(kind, value, path)? as f32),
        ScalarKind::Double => Scalar::F64(float_from_json(kind, value, path)?),
        ScalarKind::Bool => match value {
            Value::Bool(b) => Scalar::Bool(*b),
            other => return Err(mismatch(kind, other, path)),
        },
        ScalarKind::String => match value {
            Value::String(s) => Scalar::Text(s.clone()),
            other => return Err(mismatch(kind, other, path)),
        },
        ScalarKind::Bytes => match value {
            Value::String(s) => Scalar::Bytes(decode_base64(s).ok_or_else(|| {
                Error::validation(path, "bytes must be base64 text")
            })?),
            other => return Err(mismatch(kind, other, path)),
        },
    };
    Ok(scalar)
}

fn mismatch(kind: ScalarKind, value: &Value, path: &str) -> Error {
    Error::validation(path, format!("expected {}, found {}", kind, describe(value)))
}

fn integer_from_json<T>(kind: ScalarKind, value: &Value, path: &str) -> Result<T>
where
    T: TryFrom<i64> + TryFrom<u64> + std::str::FromStr,
{
    let out_of_range = || Error::validation(path, format!("value out of range for {}", kind));
    match value {
        Value::Number(n) => {
            if let Some(v) = n.as_u64() {
                T::try_from(v).map_err(|_| out_of_range())
            } else if let Some(v) = n.as_i64() {
                T::try_from(v).map_err(|_| out_of_range())
            } else {
                match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < 9.007_199_254_740_992e15 => {
                        T::try_from(f as i64).map_err(|_| out_of_range())
                    }
                    _ => Err(Error::validation(
                        path,
                        format!("{} is not an integer", n),
                    )),
                }
            }
        }
        Value::String(s) => s.trim().parse::<T>().map_err(|_| {
            Error::validation(path, format!("'{}' is not a valid {}", s, kind))
        }),
        other => Err(mismatch(kind, other, path)),
    }
}

fn float_from_json(kind: ScalarKind, value: &Value, path: &str) -> Result<f64> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| Error::validation(path, format!("{} is not a number", n))),
        Value::String(s) => match s.as_str() {
            "NaN" => Ok(f64::NAN),
            "Infinity" => Ok(f64::INFINITY),
            "-Infinity" => Ok(f64::NEG_INFINITY),
            text => text.trim().parse::<f64>().map_err(|_| {
                Error::validation(path, format!("'{}' is not a valid {}", text, kind))
            }),
        },
        other => Err(mismatch(kind, other, path)),
    }
}

fn decode_base64(text: &str) -> Option<Vec<u8>> {
    [STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD]
        .iter()
        .find_map(|engine| engine.decode(text).ok())
}

/// Decoded state of one field
#[derive(Clone)]
enum Slot {
    Absent,
    Single(Value),
    /// Singular message bytes; repeated occurrences merge
    Message(Vec<u8>, usize),
    List(Vec<Value>),
    Map(Map<String, Value>),
}

struct Decoder<'r> {
    registry: &'r Registry,
}

impl<'r> Decoder<'r> {
    fn message(
        &self,
        decl: &MessageDecl,
        mut reader: WireReader<'_>,
        depth: usize,
    ) -> Result<Map<String, Value>> {
        if depth >= RECURSION_LIMIT {
            return Err(Error::invalid_wire_format(
                reader.offset(),
                "recursion limit exceeded",
            ));
        }

        let mut slots = vec![Slot::Absent; decl.fields.len()];
        while !reader.is_empty() {
            let key_offset = reader.offset();
            let (number, wire_type) = reader.read_key()?;

            let Some(index) = decl.fields.iter().position(|f| f.number == number) else {
                trace!("Skipping unknown field {} of {}", number, decl.full_name);
                reader.skip(number, wire_type)?;
                continue;
            };
            let field = &decl.fields[index];
            let Some(kind) = kind_of(self.registry, field) else {
                trace!("Skipping unresolved field {}.{}", decl.full_name, field.name);
                reader.skip(number, wire_type)?;
                continue;
            };

            if let Some(key_kind) = field.map_key {
                expect_wire_type(field, wire_type, WireType::Len, key_offset)?;
                let (payload, start) = reader.read_len()?;
                let (key, value) =
                    self.map_entry(key_kind, kind, WireReader::nested(payload, start), depth)?;
                if !matches!(slots[index], Slot::Map(_)) {
                    slots[index] = Slot::Map(Map::new());
                }
                if let Slot::Map(entries) = &mut slots[index] {
                    entries.insert(key, value);
                }
                continue;
            }

            if field.is_repeated() {
                if !matches!(slots[index], Slot::List(_)) {
                    slots[index] = Slot::List(Vec::new());
                }
                let mut values = Vec::new();
                if wire_type == WireType::Len && kind.is_packable() {
                    let (payload, start) = reader.read_len()?;
                    let mut packed = WireReader::nested(payload, start);
                    while !packed.is_empty() {
                        values.push(self.value(kind, &mut packed, depth)?);
                    }
                } else {
                    expect_wire_type(field, wire_type, kind.wire_type(), key_offset)?;
                    values.push(self.value(kind, &mut reader, depth)?);
                }
                if let Slot::List(list) = &mut slots[index] {
                    list.extend(values);
                }
                continue;
            }

            expect_wire_type(field, wire_type, kind.wire_type(), key_offset)?;
            if let Some(group) = field.oneof {
                // The last member of a oneof on the wire wins.
                for (other, slot) in slots.iter_mut().enumerate() {
                    if other != index && decl.fields[other].oneof == Some(group) {
                        *slot = Slot::Absent;
                    }
                }
            }
            if let Kind::Message(_) = kind {
                let (payload, start) = reader.read_len()?;
                match &mut slots[index] {
                    Slot::Message(bytes, _) => bytes.extend_from_slice(payload),
                    slot => *slot = Slot::Message(payload.to_vec(), start),
                }
            } else {
                slots[index] = Slot::Single(self.value(kind, &mut reader, depth)?);
            }
        }

        let mut object = Map::new();
        for (field, slot) in decl.fields.iter().zip(slots) {
            let value = match slot {
                Slot::Absent => self.absent(field),
                Slot::Single(value) => value,
                Slot::Message(bytes, start) => match kind_of(self.registry, field) {
                    Some(Kind::Message(nested)) => Value::Object(self.message(
                        nested,
                        WireReader::nested(&bytes, start),
                        depth + 1,
                    )?),
                    _ => Value::Null,
                },
                Slot::List(values) => Value::Array(values),
                Slot::Map(entries) => Value::Object(entries),
            };
            object.insert(field.name.clone(), value);
        }
        Ok(object)
    }

    fn map_entry(
        &self,
        key_kind: ScalarKind,
        value_kind: Kind<'_>,
        mut reader: WireReader<'_>,
        depth: usize,
    ) -> Result<(String, Value)> {
        let mut key = None;
        let mut value = None;
        let mut message = Vec::new();
        let mut message_start = reader.offset();
        while !reader.is_empty() {
            let (number, wire_type) = reader.read_key()?;
            match number {
                1 if wire_type == WireType::of_scalar(key_kind) => {
                    key = Some(self.value(Kind::Scalar(key_kind), &mut reader, depth)?);
                }
                2 if wire_type == value_kind.wire_type() => {
                    if let Kind::Message(_) = value_kind {
                        let (payload, start) = reader.read_len()?;
                        if message.is_empty() {
                            message_start = start;
                        }
                        message.extend_from_slice(payload);
                    } else {
                        value = Some(self.value(value_kind, &mut reader, depth)?);
                    }
                }
                _ => reader.skip(number, wire_type)?,
            }
        }

        let key = match key.unwrap_or_else(|| zero_scalar(key_kind)) {
            Value::String(s) => s,
            other => other.to_string(),
        };
        let value = match value_kind {
            Kind::Message(decl) => Value::Object(self.message(
                decl,
                WireReader::nested(&message, message_start),
                depth + 1,
            )?),
            _ => value.unwrap_or_else(|| zero_value(value_kind)),
        };
        Ok((key, value))
    }

    /// Reads one unkeyed scalar or enum value.
    fn value(&self, kind: Kind<'_>, reader: &mut WireReader<'_>, depth: usize) -> Result<Value> {
        let scalar_kind = match kind {
            Kind::Scalar(scalar_kind) => scalar_kind,
            Kind::Enum(decl) => {
                let n = reader.read_varint()? as i32;
                return Ok(render_enum(decl, n));
            }
            Kind::Message(decl) => {
                let (payload, start) = reader.read_len()?;
                return self
                    .message(decl, WireReader::nested(payload, start), depth + 1)
                    .map(Value::Object);
            }
        };

        let value = match scalar_kind {
            ScalarKind::Int32 => Value::from(reader.read_varint()? as i32),
            ScalarKind::Int64 => Value::String((reader.read_varint()? as i64).to_string()),
            ScalarKind::Uint32 => Value::from(reader.read_varint()? as u32),
            ScalarKind::Uint64 => Value::String(reader.read_varint()?.to_string()),
            ScalarKind::Sint32 => Value::from(wire::unzigzag32(reader.read_varint()?)),
            ScalarKind::Sint64 => {
                Value::String(wire::unzigzag64(reader.read_varint()?).to_string())
            }
            ScalarKind::Fixed32 => Value::from(reader.read_fixed32()?),
            ScalarKind::Sfixed32 => Value::from(reader.read_fixed32()? as i32),
            ScalarKind::Fixed64 => Value::String(reader.read_fixed64()?.to_string()),
            ScalarKind::Sfixed64 => Value::String((reader.read_fixed64()? as i64).to_string()),
            ScalarKind::Float => render_f32(f32::from_bits(reader.read_fixed32()?)),
            ScalarKind::Double => render_f64(f64::from_bits(reader.read_fixed64()?)),
            ScalarKind::Bool => Value::Bool(reader.read_varint()? != 0),
            ScalarKind::String => {
                let (payload, start) = reader.read_len()?;
                let text = std::str::from_utf8(payload).map_err(|e| {
                    Error::invalid_wire_format(start, format!("invalid UTF-8 in string: {}", e))
                })?;
                Value::String(text.to_string())
            }
            ScalarKind::Bytes => {
                let (payload, _) = reader.read_len()?;
                Value::String(STANDARD.encode(payload))
            }
        };
        Ok(value)
    }

    fn absent(&self, field: &FieldDecl) -> Value {
        if field.is_map() {
            return Value::Object(Map::new());
        }
        if field.is_repeated() {
            return Value::Array(Vec::new());
        }
        if field.oneof.is_some() {
            return Value::Null;
        }
        match kind_of(self.registry, field) {
            Some(Kind::Message(_)) | None => Value::Null,
            Some(kind) => zero_value(kind),
        }
    }
}

fn expect_wire_type(field: &FieldDecl, actual: WireType, expected: WireType, offset: usize) -> Result<()> {
    if actual == expected {
        return Ok(());
    }
    Err(Error::invalid_wire_format(
        offset,
        format!(
            "field '{}' ({}) has wire type {:?}, expected {:?}",
            field.name, field.number, actual, expected
        ),
    ))
}

fn render_enum(decl: &EnumDecl, number: i32) -> Value {
    match decl.name_of(number) {
        Some(name) => Value::String(name.to_string()),
        None => Value::from(number),
    }
}

fn render_f32(value: f32) -> Value {
    if !value.is_finite() {
        return render_f64(value as f64);
    }
    // Shortest text form of the f32, so 0.1f32 renders as 0.1
    let widened = value.to_string().parse::<f64>().unwrap_or(value as f64);
    render_f64(widened)
}

fn render_f64(value: f64) -> Value {
    if value.is_nan() {
        return Value::String("NaN".to_string());
    }
    if value.is_infinite() {
        let text = if value > 0.0 { "Infinity" } else { "-Infinity" };
        return Value::String(text.to_string());
    }
    if value.fract() == 0.0 && value.abs() < 9.007_199_254_740_992e15 {
        return Value::from(value as i64);
    }
    Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null)
}

fn zero_scalar(kind: ScalarKind) -> Value {
    match kind {
        ScalarKind::String | ScalarKind::Bytes => Value::String(String::new()),
        ScalarKind::Bool => Value::Bool(false),
        kind if kind.is_64bit_integer() => Value::String("0".to_string()),
        _ => Value::from(0),
    }
}

fn zero_value(kind: Kind<'_>) -> Value {
    match kind {
        Kind::Scalar(scalar_kind) => zero_scalar(scalar_kind),
        Kind::Enum(decl) => render_enum(decl, decl.default_number()),
        Kind::Message(_) => Value::Null,
    }
}
