//! Attribute type descriptors: parsed once from the schema's type strings
//! into a tagged tree the codec dispatches on with a plain `match`.

use crate::error::{CodecError, Result};
use pest::Parser;
use pest_derive::Parser as PestParser;
use std::fmt;
use std::str::FromStr;

#[derive(PestParser)]
#[grammar = "descriptor.pest"]
struct DescriptorParser;

/// Primitive wire types understood by the buffer codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Boolean,
    Byte,
    UnsignedByte,
    Short,
    UnsignedShort,
    Int,
    UnsignedInt,
    Float,
    Double,
    String,
    VarInt,
    VarUhInt,
    VarShort,
    VarUhShort,
    VarLong,
    VarUhLong,
}

impl PrimitiveKind {
    /// Map a schema identifier to a primitive. `UTF` is the writer-side
    /// spelling of `String`.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "Boolean" => PrimitiveKind::Boolean,
            "Byte" => PrimitiveKind::Byte,
            "UnsignedByte" => PrimitiveKind::UnsignedByte,
            "Short" => PrimitiveKind::Short,
            "UnsignedShort" => PrimitiveKind::UnsignedShort,
            "Int" => PrimitiveKind::Int,
            "UnsignedInt" => PrimitiveKind::UnsignedInt,
            "Float" => PrimitiveKind::Float,
            "Double" => PrimitiveKind::Double,
            "String" | "UTF" => PrimitiveKind::String,
            "VarInt" => PrimitiveKind::VarInt,
            "VarUhInt" => PrimitiveKind::VarUhInt,
            "VarShort" => PrimitiveKind::VarShort,
            "VarUhShort" => PrimitiveKind::VarUhShort,
            "VarLong" => PrimitiveKind::VarLong,
            "VarUhLong" => PrimitiveKind::VarUhLong,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            PrimitiveKind::Boolean => "Boolean",
            PrimitiveKind::Byte => "Byte",
            PrimitiveKind::UnsignedByte => "UnsignedByte",
            PrimitiveKind::Short => "Short",
            PrimitiveKind::UnsignedShort => "UnsignedShort",
            PrimitiveKind::Int => "Int",
            PrimitiveKind::UnsignedInt => "UnsignedInt",
            PrimitiveKind::Float => "Float",
            PrimitiveKind::Double => "Double",
            PrimitiveKind::String => "String",
            PrimitiveKind::VarInt => "VarInt",
            PrimitiveKind::VarUhInt => "VarUhInt",
            PrimitiveKind::VarShort => "VarShort",
            PrimitiveKind::VarUhShort => "VarUhShort",
            PrimitiveKind::VarLong => "VarLong",
            PrimitiveKind::VarUhLong => "VarUhLong",
        }
    }

    /// Fewest bytes a value of this kind occupies on the wire.
    pub fn min_width(self) -> usize {
        match self {
            PrimitiveKind::Short | PrimitiveKind::UnsignedShort | PrimitiveKind::String => 2,
            PrimitiveKind::Int | PrimitiveKind::UnsignedInt | PrimitiveKind::Float => 4,
            PrimitiveKind::Double => 8,
            _ => 1,
        }
    }

    /// True for kinds usable as a vector length.
    pub fn is_integer(self) -> bool {
        !matches!(
            self,
            PrimitiveKind::Boolean
                | PrimitiveKind::Float
                | PrimitiveKind::Double
                | PrimitiveKind::String
        )
    }
}

/// Parsed form of an attribute type string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeDescriptor {
    Primitive(PrimitiveKind),
    /// Nested entity, decoded with its own definition.
    EntityRef(String),
    /// `Vector<len,elem>`: a count written as `len`, then the elements.
    Vector(Box<TypeDescriptor>, Box<TypeDescriptor>),
    /// `TypeIdVector<len,elem>`: like `Vector`, each element preceded by a u16 type id.
    TypeIdVector(Box<TypeDescriptor>, Box<TypeDescriptor>),
    /// `TypeId<declared>`: the value is preceded by a u16 id selecting its concrete type.
    TypeId(Box<TypeDescriptor>),
}

impl TypeDescriptor {
    pub fn is_boolean(&self) -> bool {
        matches!(self, TypeDescriptor::Primitive(PrimitiveKind::Boolean))
    }

    /// Visit every entity name this descriptor refers to.
    pub fn for_each_entity_ref<'a>(&'a self, f: &mut impl FnMut(&'a str)) {
        match self {
            TypeDescriptor::Primitive(_) => {}
            TypeDescriptor::EntityRef(name) => f(name),
            TypeDescriptor::Vector(len, elem) | TypeDescriptor::TypeIdVector(len, elem) => {
                len.for_each_entity_ref(f);
                elem.for_each_entity_ref(f);
            }
            TypeDescriptor::TypeId(declared) => declared.for_each_entity_ref(f),
        }
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDescriptor::Primitive(kind) => f.write_str(kind.name()),
            TypeDescriptor::EntityRef(name) => f.write_str(name),
            TypeDescriptor::Vector(len, elem) => write!(f, "Vector<{},{}>", len, elem),
            TypeDescriptor::TypeIdVector(len, elem) => write!(f, "TypeIdVector<{},{}>", len, elem),
            TypeDescriptor::TypeId(declared) => write!(f, "TypeId<{}>", declared),
        }
    }
}

impl FromStr for TypeDescriptor {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self> {
        parse(s)
    }
}

/// Parse a schema type string.
pub fn parse(source: &str) -> Result<TypeDescriptor> {
    let pairs = DescriptorParser::parse(Rule::descriptor, source)
        .map_err(|e| CodecError::Schema(format!("type descriptor {:?}: {}", source, e)))?;
    let descriptor = pairs
        .into_iter()
        .next()
        .ok_or_else(|| CodecError::Schema(format!("empty type descriptor {:?}", source)))?;
    let expr = descriptor
        .into_inner()
        .find(|p| p.as_rule() != Rule::EOI)
        .ok_or_else(|| CodecError::Schema(format!("empty type descriptor {:?}", source)))?;
    build(expr)
}

fn build(pair: pest::iterators::Pair<Rule>) -> Result<TypeDescriptor> {
    let text = pair.as_str();
    match pair.as_rule() {
        Rule::name => Ok(match PrimitiveKind::from_name(text) {
            Some(kind) => TypeDescriptor::Primitive(kind),
            None => TypeDescriptor::EntityRef(text.to_string()),
        }),
        Rule::vector | Rule::type_id_vector => {
            let rule = pair.as_rule();
            let mut it = pair.into_inner();
            let len = it
                .next()
                .ok_or_else(|| CodecError::Schema(format!("{}: missing length type", text)))?;
            let elem = it
                .next()
                .ok_or_else(|| CodecError::Schema(format!("{}: missing element type", text)))?;
            let len = build(len)?;
            match &len {
                TypeDescriptor::Primitive(kind) if kind.is_integer() => {}
                other => {
                    return Err(CodecError::Schema(format!(
                        "{}: length type {} is not an integer primitive",
                        text, other
                    )))
                }
            }
            let elem = Box::new(build(elem)?);
            Ok(if rule == Rule::vector {
                TypeDescriptor::Vector(Box::new(len), elem)
            } else {
                TypeDescriptor::TypeIdVector(Box::new(len), elem)
            })
        }
        Rule::type_id => {
            let declared = pair
                .into_inner()
                .next()
                .ok_or_else(|| CodecError::Schema(format!("{}: missing declared type", text)))?;
            Ok(TypeDescriptor::TypeId(Box::new(build(declared)?)))
        }
        other => Err(CodecError::Schema(format!(
            "unexpected rule {:?} in type descriptor {:?}",
            other, text
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prim(kind: PrimitiveKind) -> Box<TypeDescriptor> {
        Box::new(TypeDescriptor::Primitive(kind))
    }

    #[test]
    fn parse_primitives_and_aliases() {
        assert_eq!(parse("VarInt").unwrap(), *prim(PrimitiveKind::VarInt));
        assert_eq!(parse("UTF").unwrap(), *prim(PrimitiveKind::String));
        assert_eq!(parse(" Boolean ").unwrap(), *prim(PrimitiveKind::Boolean));
    }

    #[test]
    fn parse_entity_ref() {
        assert_eq!(
            parse("GuildRecruitmentInformation").unwrap(),
            TypeDescriptor::EntityRef("GuildRecruitmentInformation".into())
        );
    }

    #[test]
    fn parse_vectors() {
        assert_eq!(
            parse("Vector<Short,VarInt>").unwrap(),
            TypeDescriptor::Vector(prim(PrimitiveKind::Short), prim(PrimitiveKind::VarInt))
        );
        assert_eq!(
            parse("TypeIdVector<UnsignedShort, ActorInfo>").unwrap(),
            TypeDescriptor::TypeIdVector(
                prim(PrimitiveKind::UnsignedShort),
                Box::new(TypeDescriptor::EntityRef("ActorInfo".into()))
            )
        );
    }

    #[test]
    fn parse_type_id() {
        assert_eq!(
            parse("TypeId<ActorInfo>").unwrap(),
            TypeDescriptor::TypeId(Box::new(TypeDescriptor::EntityRef("ActorInfo".into())))
        );
    }

    #[test]
    fn parse_nested_vector() {
        let d = parse("Vector<Short,Vector<VarInt,String>>").unwrap();
        assert_eq!(d.to_string(), "Vector<Short,Vector<VarInt,String>>");
    }

    #[test]
    fn names_with_keyword_prefix_are_entities() {
        assert_eq!(
            parse("VectorInfo").unwrap(),
            TypeDescriptor::EntityRef("VectorInfo".into())
        );
        assert_eq!(
            parse("TypeIdentity").unwrap(),
            TypeDescriptor::EntityRef("TypeIdentity".into())
        );
    }

    #[test]
    fn rejects_malformed() {
        for bad in ["", "Vector<Short>", "Vector<Short,VarInt", "TypeId<>", "1abc", "Vector<String,Int>", "A B"] {
            assert!(
                matches!(parse(bad), Err(CodecError::Schema(_))),
                "expected schema error for {:?}",
                bad
            );
        }
    }

    #[test]
    fn entity_refs_are_visited() {
        let d = parse("TypeIdVector<Short,TypeId<Base>>").unwrap();
        let mut seen = Vec::new();
        d.for_each_entity_ref(&mut |n| seen.push(n.to_string()));
        assert_eq!(seen, vec!["Base".to_string()]);
    }
}
