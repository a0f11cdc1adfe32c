//! Format decoded entities for display: an indented text dump and a JSON
//! rendering where each entity carries its type under `_name`, plus the
//! reverse mapping from that JSON back to an entity tree.
//!
//! Attributes are listed in the order they occupy on the wire: ancestors
//! first, each level's packed booleans before its other attributes.

use crate::error::{CodecError, Result};
use crate::schema::Schema;
use crate::value::{Entity, Value};
use serde_json::{json, Map};

/// Key holding the entity type name in the JSON rendering.
pub const NAME_KEY: &str = "_name";

/// Attribute keys of `entity` in wire order. Keys the schema does not
/// declare for this entity follow, sorted.
fn wire_keys<'e>(schema: &Schema, entity: &'e Entity) -> Vec<&'e String> {
    let mut keys = Vec::with_capacity(entity.attributes.len());
    if let Ok(lineage) = schema.lineage(&entity.name) {
        for (def, layout) in lineage {
            let flags = layout.flag_groups.iter().flatten();
            for &i in flags.chain(&layout.fields) {
                if let Some((k, _)) = entity.attributes.get_key_value(&def.attributes[i].name) {
                    if !keys.contains(&k) {
                        keys.push(k);
                    }
                }
            }
        }
    }
    let mut extra: Vec<&String> = entity.attributes.keys().filter(|k| !keys.contains(k)).collect();
    extra.sort();
    keys.extend(extra);
    keys
}

/// JSON rendering of an entity, `_name` first.
pub fn entity_to_json(schema: &Schema, entity: &Entity) -> serde_json::Value {
    let keys = wire_keys(schema, entity);
    let mut map = Map::with_capacity(keys.len() + 1);
    map.insert(NAME_KEY.to_string(), json!(entity.name));
    for k in keys {
        map.insert(k.clone(), value_to_json(schema, &entity.attributes[k]));
    }
    serde_json::Value::Object(map)
}

pub fn value_to_json(schema: &Schema, v: &Value) -> serde_json::Value {
    match v {
        Value::Bool(x) => json!(x),
        Value::I8(x) => json!(x),
        Value::U8(x) => json!(x),
        Value::I16(x) => json!(x),
        Value::U16(x) => json!(x),
        Value::I32(x) => json!(x),
        Value::U32(x) => json!(x),
        Value::U64(x) => json!(x),
        Value::Float(x) => json!(x),
        Value::Double(x) => json!(x),
        Value::String(s) => json!(s),
        Value::Entity(e) => entity_to_json(schema, e),
        Value::List(items) => serde_json::Value::Array(items.iter().map(|i| value_to_json(schema, i)).collect()),
    }
}

/// Rebuild an entity from its JSON rendering. The object must carry its type
/// under `_name`; nested objects become nested entities.
///
/// Integers become `I32` when they fit and `U64` above that, decimals become
/// `Double`. The encoder narrows each to the declared kind.
pub fn entity_from_json(json: &serde_json::Value) -> Result<Entity> {
    let serde_json::Value::Object(map) = json else {
        return Err(CodecError::TypeMismatch {
            expected: "object",
            found: json_kind(json),
        });
    };
    let name = match map.get(NAME_KEY) {
        Some(serde_json::Value::String(s)) => s,
        Some(other) => {
            return Err(CodecError::TypeMismatch {
                expected: "string",
                found: json_kind(other),
            })
        }
        None => {
            return Err(CodecError::MissingAttribute {
                entity: "object".to_string(),
                attribute: NAME_KEY.to_string(),
            })
        }
    };
    let mut entity = Entity::new(name.as_str());
    for (k, v) in map.iter().filter(|(k, _)| k.as_str() != NAME_KEY) {
        entity.insert(k.clone(), value_from_json(v)?);
    }
    Ok(entity)
}

pub fn value_from_json(json: &serde_json::Value) -> Result<Value> {
    Ok(match json {
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(items) => Value::List(items.iter().map(value_from_json).collect::<Result<_>>()?),
        serde_json::Value::Object(_) => Value::Entity(entity_from_json(json)?),
        serde_json::Value::Number(n) => {
            if let Some(x) = n.as_i64() {
                i32::try_from(x)
                    .map(Value::I32)
                    .or_else(|_| u64::try_from(x).map(Value::U64))
                    .map_err(|_| CodecError::Range(format!("{} fits no wire integer", x)))?
            } else if let Some(x) = n.as_u64() {
                Value::U64(x)
            } else {
                Value::Double(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::Null => {
            return Err(CodecError::TypeMismatch {
                expected: "value",
                found: "null",
            })
        }
    })
}

fn json_kind(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Indented text dump, one attribute per line.
pub fn entity_to_dump(schema: &Schema, entity: &Entity) -> String {
    let mut out = String::new();
    write_entity(&mut out, schema, entity, 0);
    out
}

fn write_entity(out: &mut String, schema: &Schema, entity: &Entity, indent: usize) {
    out.push_str(&entity.name);
    out.push_str(" {\n");
    for k in wire_keys(schema, entity) {
        push_pad(out, indent + 1);
        out.push_str(k);
        out.push_str(": ");
        write_value(out, schema, &entity.attributes[k], indent + 1);
        out.push('\n');
    }
    push_pad(out, indent);
    out.push('}');
}

fn write_value(out: &mut String, schema: &Schema, v: &Value, indent: usize) {
    match v {
        Value::Entity(e) => write_entity(out, schema, e, indent),
        Value::List(items) if items.is_empty() => out.push_str("[]"),
        Value::List(items) => {
            out.push_str("[\n");
            for item in items {
                push_pad(out, indent + 1);
                write_value(out, schema, item, indent + 1);
                out.push('\n');
            }
            push_pad(out, indent);
            out.push(']');
        }
        Value::String(s) => out.push_str(&format!("{:?}", s)),
        other => out.push_str(&scalar(other)),
    }
}

fn scalar(v: &Value) -> String {
    match v {
        Value::Bool(x) => x.to_string(),
        Value::I8(x) => x.to_string(),
        Value::U8(x) => x.to_string(),
        Value::I16(x) => x.to_string(),
        Value::U16(x) => x.to_string(),
        Value::I32(x) => x.to_string(),
        Value::U32(x) => x.to_string(),
        Value::U64(x) => x.to_string(),
        Value::Float(x) => x.to_string(),
        Value::Double(x) => x.to_string(),
        _ => format!("{:?}", v),
    }
}

fn push_pad(out: &mut String, indent: usize) {
    for _ in 0..indent {
        out.push_str("  ");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader;

    const DOC: &str = r#"{
        "Outer": {
            "id": 1, "superclass": "NetworkMessage",
            "attributes": { "label": "String", "items": "Vector<Short,UnsignedByte>", "inner": "Inner", "count": "Int" }
        },
        "Inner": { "id": 2, "superclass": "", "attributes": { "flag": "Boolean" } }
    }"#;

    fn schema() -> Schema {
        Schema::resolve(loader::parse_events_json(DOC).unwrap()).unwrap()
    }

    fn sample() -> Entity {
        Entity::new("Outer")
            .with("count", 3i32)
            .with("label", "hi")
            .with("inner", Entity::new("Inner").with("flag", true))
            .with("items", vec![Value::U8(1), Value::U8(2)])
    }

    #[test]
    fn json_carries_name_tags() {
        let j = entity_to_json(&schema(), &sample());
        assert_eq!(j[NAME_KEY], "Outer");
        assert_eq!(j["inner"][NAME_KEY], "Inner");
        assert_eq!(j["inner"]["flag"], true);
        assert_eq!(j["items"], json!([1, 2]));
        assert_eq!(j["label"], "hi");
    }

    #[test]
    fn json_keys_follow_declared_order() {
        let j = entity_to_json(&schema(), &sample().with("zz", 1i32).with("aa", 2i32));
        let keys: Vec<&str> = j.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(keys, vec![NAME_KEY, "label", "items", "inner", "count", "aa", "zz"]);
    }

    #[test]
    fn dump_is_in_wire_order_and_indented() {
        let text = entity_to_dump(&schema(), &sample());
        let expected = "Outer {\n  label: \"hi\"\n  items: [\n    1\n    2\n  ]\n  inner: Inner {\n    flag: true\n  }\n  count: 3\n}";
        assert_eq!(text, expected);
    }

    #[test]
    fn unknown_entity_falls_back_to_sorted_keys() {
        let e = Entity::new("Stranger").with("b", 1i32).with("a", 2i32);
        assert_eq!(entity_to_dump(&schema(), &e), "Stranger {\n  a: 2\n  b: 1\n}");
    }

    #[test]
    fn json_maps_back_to_entity() {
        let j = json!({
            "_name": "Outer",
            "label": "hi",
            "items": [1, 2],
            "inner": { "_name": "Inner", "flag": true },
            "count": 3,
            "big": 4294967296u64,
            "ratio": 0.5
        });
        let e = entity_from_json(&j).unwrap();
        assert_eq!(e.name, "Outer");
        assert_eq!(e.get("items"), Some(&Value::List(vec![Value::I32(1), Value::I32(2)])));
        assert_eq!(e.get("inner").and_then(Value::as_entity).map(|i| i.name.as_str()), Some("Inner"));
        assert_eq!(e.get("big"), Some(&Value::U64(1 << 32)));
        assert_eq!(e.get("ratio"), Some(&Value::Double(0.5)));
        assert!(e.get(NAME_KEY).is_none());
    }

    #[test]
    fn json_without_name_tag_is_rejected() {
        let err = entity_from_json(&json!({ "count": 3 })).unwrap_err();
        assert!(matches!(err, CodecError::MissingAttribute { attribute, .. } if attribute == NAME_KEY));
        assert!(matches!(entity_from_json(&json!([1])), Err(CodecError::TypeMismatch { .. })));
        let err = entity_from_json(&json!({ "_name": "Outer", "count": null })).unwrap_err();
        assert!(matches!(err, CodecError::TypeMismatch { found: "null", .. }));
    }
}
