//! Schema-driven entity codec.
//!
//! Reading and writing walk the same shape: ancestors' attributes first,
//! then the entity's own packed boolean bytes, then its remaining attributes
//! in declared order, recursing into nested entities, vectors and
//! type-id-selected subtypes.

use crate::buffer::{ByteReader, ByteWriter};
use crate::descriptor::{PrimitiveKind, TypeDescriptor};
use crate::error::{CodecError, Result};
use crate::flags::{get_flag, set_flag};
use crate::schema::Schema;
use crate::value::{Entity, Value};

/// Deepest chain of nested entities accepted in either direction. Each
/// `EntityRef`, `TypeId` or `TypeIdVector` element counts one level.
pub const MAX_NESTING: usize = 128;

/// Elements that occupy no bytes cannot be bounded by the input size.
const MAX_ZERO_WIDTH_COUNT: usize = u16::MAX as usize;

/// Encoder/decoder bound to one schema version.
///
/// Holds no mutable state, so a single `Codec` can serve any number of
/// threads at once. Load a newer schema by building a new `Codec`.
#[derive(Debug)]
pub struct Codec {
    schema: Schema,
}

impl Codec {
    pub fn new(schema: Schema) -> Self {
        Codec { schema }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Decode one entity body (no message header) of type `name`.
    /// Returns the entity and the number of bytes it occupied.
    pub fn decode_entity(&self, name: &str, bytes: &[u8]) -> Result<(Entity, usize)> {
        let mut r = ByteReader::new(bytes);
        let entity = self.read_entity(&mut r, name, 0)?;
        Ok((entity, r.position()))
    }

    /// Encode one entity body (no message header) using its own name tag.
    pub fn encode_entity(&self, entity: &Entity) -> Result<Vec<u8>> {
        let mut w = ByteWriter::new();
        self.write_entity(&mut w, &entity.name, entity, 0)?;
        Ok(w.into_bytes())
    }

    pub(crate) fn read_entity(&self, r: &mut ByteReader<'_>, name: &str, depth: usize) -> Result<Entity> {
        check_depth(depth, name)?;
        let mut entity = Entity::new(name);
        for (def, layout) in self.schema.lineage(name)? {
            for group in &layout.flag_groups {
                let byte = r.read_u8()?;
                for (bit, &i) in group.iter().enumerate() {
                    entity.insert(def.attributes[i].name.clone(), get_flag(byte, bit as u8)?);
                }
            }
            for &i in &layout.fields {
                let attr = &def.attributes[i];
                let value = self.read_value(r, &attr.ty, depth)?;
                entity.insert(attr.name.clone(), value);
            }
        }
        Ok(entity)
    }

    pub(crate) fn write_entity(
        &self,
        w: &mut ByteWriter,
        name: &str,
        entity: &Entity,
        depth: usize,
    ) -> Result<()> {
        check_depth(depth, name)?;
        for (def, layout) in self.schema.lineage(name)? {
            for group in &layout.flag_groups {
                let mut byte = 0u8;
                for (bit, &i) in group.iter().enumerate() {
                    let value = attribute(entity, &def.attributes[i].name)?;
                    let flag = value.as_bool().ok_or_else(|| mismatch("bool", value))?;
                    byte = set_flag(byte, bit as u8, flag)?;
                }
                w.write_u8(byte)?;
            }
            for &i in &layout.fields {
                let attr = &def.attributes[i];
                self.write_value(w, &attr.ty, attribute(entity, &attr.name)?, depth)?;
            }
        }
        Ok(())
    }

    fn read_value(&self, r: &mut ByteReader<'_>, ty: &TypeDescriptor, depth: usize) -> Result<Value> {
        match ty {
            TypeDescriptor::Primitive(kind) => read_primitive(r, *kind),
            TypeDescriptor::EntityRef(name) => Ok(Value::Entity(self.read_entity(r, name, depth + 1)?)),
            TypeDescriptor::Vector(len, elem) => {
                let n = read_count(r, len, self.schema.min_width(elem))?;
                let mut items = Vec::with_capacity(n.min(r.remaining()));
                for _ in 0..n {
                    items.push(self.read_value(r, elem, depth)?);
                }
                Ok(Value::List(items))
            }
            TypeDescriptor::TypeIdVector(len, _) => {
                let n = read_count(r, len, TYPE_ID_WIDTH)?;
                let mut items = Vec::with_capacity(n.min(r.remaining()));
                for _ in 0..n {
                    items.push(Value::Entity(self.read_polymorphic(r, depth + 1)?));
                }
                Ok(Value::List(items))
            }
            TypeDescriptor::TypeId(_) => Ok(Value::Entity(self.read_polymorphic(r, depth + 1)?)),
        }
    }

    /// The concrete type comes from the wire id, not the declared type.
    fn read_polymorphic(&self, r: &mut ByteReader<'_>, depth: usize) -> Result<Entity> {
        let id = r.read_u16()?;
        let def = self.schema.entity_by_id(id)?;
        self.read_entity(r, &def.name, depth)
    }

    fn write_value(&self, w: &mut ByteWriter, ty: &TypeDescriptor, value: &Value, depth: usize) -> Result<()> {
        match ty {
            TypeDescriptor::Primitive(kind) => write_primitive(w, *kind, value),
            TypeDescriptor::EntityRef(name) => {
                let entity = value.as_entity().ok_or_else(|| mismatch("entity", value))?;
                self.write_entity(w, name, entity, depth + 1)
            }
            TypeDescriptor::Vector(len, elem) => {
                let items = value.as_list().ok_or_else(|| mismatch("list", value))?;
                write_count(w, len, items.len())?;
                for item in items {
                    self.write_value(w, elem, item, depth)?;
                }
                Ok(())
            }
            TypeDescriptor::TypeIdVector(len, _) => {
                let items = value.as_list().ok_or_else(|| mismatch("list", value))?;
                write_count(w, len, items.len())?;
                for item in items {
                    let entity = item.as_entity().ok_or_else(|| mismatch("entity", item))?;
                    self.write_polymorphic(w, entity, depth + 1)?;
                }
                Ok(())
            }
            TypeDescriptor::TypeId(_) => {
                let entity = value.as_entity().ok_or_else(|| mismatch("entity", value))?;
                self.write_polymorphic(w, entity, depth + 1)
            }
        }
    }

    /// The wire id is taken from the value's own name tag.
    fn write_polymorphic(&self, w: &mut ByteWriter, entity: &Entity, depth: usize) -> Result<()> {
        let def = self.schema.entity(&entity.name)?;
        w.write_u16(def.id)?;
        self.write_entity(w, &def.name, entity, depth)
    }
}

const TYPE_ID_WIDTH: usize = 2;

fn check_depth(depth: usize, name: &str) -> Result<()> {
    if depth > MAX_NESTING {
        return Err(CodecError::Range(format!(
            "{} nested more than {} entities deep",
            name, MAX_NESTING
        )));
    }
    Ok(())
}

fn attribute<'e>(entity: &'e Entity, name: &str) -> Result<&'e Value> {
    entity.get(name).ok_or_else(|| CodecError::MissingAttribute {
        entity: entity.name.clone(),
        attribute: name.to_string(),
    })
}

fn mismatch(expected: &'static str, found: &Value) -> CodecError {
    CodecError::TypeMismatch {
        expected,
        found: found.kind(),
    }
}

fn read_count(r: &mut ByteReader<'_>, len: &TypeDescriptor, element_width: usize) -> Result<usize> {
    let TypeDescriptor::Primitive(kind) = len else {
        return Err(CodecError::Schema(format!("vector length type {} is not primitive", len)));
    };
    let offset = r.position();
    let raw = read_primitive(r, *kind)?;
    let n = raw
        .as_i64()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| CodecError::Range(format!("vector length {:?} at offset {}", raw, offset)))?;
    if element_width == 0 && n > MAX_ZERO_WIDTH_COUNT {
        return Err(CodecError::Range(format!(
            "vector length {} of empty elements at offset {}",
            n, offset
        )));
    }
    // Refuse counts the remaining bytes cannot possibly hold.
    let needed = n.saturating_mul(element_width);
    if needed > r.remaining() {
        return Err(CodecError::BufferUnderrun {
            offset: r.position(),
            needed,
            available: r.remaining(),
        });
    }
    Ok(n)
}

fn write_count(w: &mut ByteWriter, len: &TypeDescriptor, n: usize) -> Result<()> {
    let TypeDescriptor::Primitive(kind) = len else {
        return Err(CodecError::Schema(format!("vector length type {} is not primitive", len)));
    };
    write_primitive(w, *kind, &Value::U64(n as u64))
}

fn read_primitive(r: &mut ByteReader<'_>, kind: PrimitiveKind) -> Result<Value> {
    Ok(match kind {
        PrimitiveKind::Boolean => Value::Bool(r.read_bool()?),
        PrimitiveKind::Byte => Value::I8(r.read_i8()?),
        PrimitiveKind::UnsignedByte => Value::U8(r.read_u8()?),
        PrimitiveKind::Short => Value::I16(r.read_i16()?),
        PrimitiveKind::UnsignedShort => Value::U16(r.read_u16()?),
        PrimitiveKind::Int => Value::I32(r.read_i32()?),
        PrimitiveKind::UnsignedInt => Value::U32(r.read_u32()?),
        PrimitiveKind::Float => Value::Float(r.read_f32()?),
        PrimitiveKind::Double => Value::Double(r.read_f64()?),
        PrimitiveKind::String => Value::String(r.read_utf(None)?),
        PrimitiveKind::VarInt | PrimitiveKind::VarUhInt => Value::I32(r.read_var_int()?),
        PrimitiveKind::VarShort | PrimitiveKind::VarUhShort => Value::I16(r.read_var_short()?),
        PrimitiveKind::VarLong | PrimitiveKind::VarUhLong => Value::U64(r.read_var_long()?),
    })
}

/// Integer value converted into the domain of `kind`.
fn int<T: TryFrom<i64>>(value: &Value, kind: PrimitiveKind) -> Result<T> {
    let x = value.as_i64().ok_or_else(|| mismatch("integer", value))?;
    T::try_from(x).map_err(|_| CodecError::Range(format!("{} does not fit {}", x, kind.name())))
}

fn write_primitive(w: &mut ByteWriter, kind: PrimitiveKind, value: &Value) -> Result<()> {
    match kind {
        PrimitiveKind::Boolean => w.write_bool(value.as_bool().ok_or_else(|| mismatch("bool", value))?),
        PrimitiveKind::Byte => w.write_i8(int(value, kind)?),
        PrimitiveKind::UnsignedByte => w.write_u8(int(value, kind)?),
        PrimitiveKind::Short => w.write_i16(int(value, kind)?),
        PrimitiveKind::UnsignedShort => w.write_u16(int(value, kind)?),
        PrimitiveKind::Int => w.write_i32(int(value, kind)?),
        PrimitiveKind::UnsignedInt => w.write_u32(int(value, kind)?),
        PrimitiveKind::Float => w.write_f32(value.as_f64().ok_or_else(|| mismatch("float", value))? as f32),
        PrimitiveKind::Double => w.write_f64(value.as_f64().ok_or_else(|| mismatch("double", value))?),
        PrimitiveKind::String => w.write_utf(value.as_str().ok_or_else(|| mismatch("string", value))?, true),
        PrimitiveKind::VarInt | PrimitiveKind::VarUhInt => {
            // Unsigned 32-bit values share the signed encoding's bit pattern.
            let x: i64 = int(value, kind)?;
            if x < i64::from(i32::MIN) || x > i64::from(u32::MAX) {
                return Err(CodecError::Range(format!("{} does not fit {}", x, kind.name())));
            }
            w.write_var_int(x as i32)
        }
        PrimitiveKind::VarShort | PrimitiveKind::VarUhShort => w.write_var_short(int(value, kind)?),
        PrimitiveKind::VarLong | PrimitiveKind::VarUhLong => {
            let x = match value {
                Value::U64(x) => *x,
                other => int(other, kind)?,
            };
            w.write_var_long(x)
        }
    }
}
