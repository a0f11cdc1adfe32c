//! Build a [`Schema`] from the Datafus export files.
//!
//! `events.json` maps each entity name to `{ id, superclass, attributes }`,
//! with `attributes` an object from attribute name to type string whose key
//! order is the wire order. `events.properties`, when present, is the
//! id ↔ name index as `key=value` lines.
//!
//! Fetching and caching versioned exports is left to the caller.

use crate::descriptor;
use crate::error::{CodecError, Result};
use crate::schema::{Attribute, EntityDef, Schema};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

pub const EVENTS_JSON: &str = "events.json";
pub const EVENTS_PROPERTIES: &str = "events.properties";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawId {
    Number(u64),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct RawEntity {
    id: RawId,
    #[serde(default)]
    superclass: Option<String>,
    #[serde(default)]
    attributes: serde_json::Map<String, serde_json::Value>,
}

/// Parse an `events.json` document into entity definitions, in document order.
pub fn parse_events_json(text: &str) -> Result<Vec<EntityDef>> {
    let doc: serde_json::Map<String, serde_json::Value> = serde_json::from_str(text)?;
    let mut entities = Vec::with_capacity(doc.len());
    for (name, raw) in doc {
        let raw: RawEntity = serde_json::from_value(raw)
            .map_err(|e| CodecError::Schema(format!("{}: {}", name, e)))?;
        let id = match raw.id {
            RawId::Number(n) => u16::try_from(n).ok(),
            RawId::Text(s) => s.trim().parse::<u16>().ok(),
        }
        .ok_or_else(|| CodecError::Schema(format!("{}: id is not a 16-bit number", name)))?;

        let mut attributes = Vec::with_capacity(raw.attributes.len());
        for (attr, ty) in raw.attributes {
            let ty = ty.as_str().ok_or_else(|| {
                CodecError::Schema(format!("{}.{}: type is not a string", name, attr))
            })?;
            attributes.push(Attribute::new(attr, descriptor::parse(ty)?));
        }

        entities.push(EntityDef {
            name,
            id,
            superclass: raw.superclass.filter(|s| !s.is_empty()),
            attributes,
        });
    }
    Ok(entities)
}

/// Parse an `events.properties` id index. Each line is `id=name` or
/// `name=id`; blank lines and `#`/`!` comments are ignored.
pub fn parse_properties(text: &str) -> Result<HashMap<u16, String>> {
    let mut ids = HashMap::new();
    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }
        let (key, value) = line
            .split_once('=')
            .or_else(|| line.split_once(':'))
            .ok_or_else(|| CodecError::Schema(format!("properties line {}: no separator", line_no + 1)))?;
        let (key, value) = (key.trim(), value.trim());
        let (id, name) = match (key.parse::<u16>(), value.parse::<u16>()) {
            (Ok(id), _) => (id, value),
            (_, Ok(id)) => (id, key),
            _ => {
                return Err(CodecError::Schema(format!(
                    "properties line {}: no numeric id in {:?}",
                    line_no + 1,
                    line
                )))
            }
        };
        ids.insert(id, name.to_string());
    }
    Ok(ids)
}

/// Load `events.json` (and `events.properties` when present) from `dir`.
/// The directory name becomes the schema version label.
pub fn load_dir(dir: &Path) -> Result<Schema> {
    let json = fs::read_to_string(dir.join(EVENTS_JSON))?;
    let entities = parse_events_json(&json)?;

    let properties = dir.join(EVENTS_PROPERTIES);
    let schema = if properties.is_file() {
        let ids = parse_properties(&fs::read_to_string(&properties)?)?;
        Schema::resolve_with_ids(entities, ids)?
    } else {
        Schema::resolve(entities)?
    };

    let schema = match dir.file_name().and_then(|n| n.to_str()) {
        Some(version) => schema.with_version(version),
        None => schema,
    };
    tracing::info!(
        dir = %dir.display(),
        version = schema.version().unwrap_or("-"),
        entities = schema.len(),
        "loaded schema"
    );
    Ok(schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{PrimitiveKind, TypeDescriptor};

    const DOC: &str = r#"{
        "ZMessage": {
            "id": 12,
            "superclass": "NetworkMessage",
            "attributes": { "zeta": "VarInt", "alpha": "Vector<Short,String>", "mid": "Boolean" }
        },
        "Base": { "id": "7", "superclass": "", "attributes": {} }
    }"#;

    #[test]
    fn attribute_order_follows_document() {
        let entities = parse_events_json(DOC).unwrap();
        assert_eq!(entities.len(), 2);
        let m = &entities[0];
        assert_eq!(m.name, "ZMessage");
        assert_eq!(m.id, 12);
        let names: Vec<_> = m.attributes.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
        assert_eq!(m.attributes[0].ty, TypeDescriptor::Primitive(PrimitiveKind::VarInt));
        assert_eq!(entities[1].id, 7);
        assert_eq!(entities[1].superclass, None);
    }

    #[test]
    fn bad_documents_are_schema_errors() {
        let bad_id = r#"{ "M": { "id": 70000, "attributes": {} } }"#;
        assert!(matches!(parse_events_json(bad_id), Err(CodecError::Schema(_))));
        let bad_type = r#"{ "M": { "id": 1, "attributes": { "x": "Vector<Short>" } } }"#;
        assert!(matches!(parse_events_json(bad_type), Err(CodecError::Schema(_))));
        assert!(matches!(parse_events_json("[1, 2]"), Err(CodecError::Json(_))));
    }

    #[test]
    fn properties_either_direction() {
        let ids = parse_properties("# comment\n12=ZMessage\n\nBase = 7\n").unwrap();
        assert_eq!(ids.get(&12).map(String::as_str), Some("ZMessage"));
        assert_eq!(ids.get(&7).map(String::as_str), Some("Base"));
        assert!(parse_properties("A=B").is_err());
    }

    #[test]
    fn load_dir_with_and_without_properties() {
        let dir = tempfile::tempdir().unwrap();
        let version_dir = dir.path().join("2.71.4");
        fs::create_dir(&version_dir).unwrap();
        fs::write(version_dir.join(EVENTS_JSON), DOC).unwrap();

        let schema = load_dir(&version_dir).unwrap();
        assert_eq!(schema.version(), Some("2.71.4"));
        assert_eq!(schema.name_for_id(12), Some("ZMessage"));

        fs::write(version_dir.join(EVENTS_PROPERTIES), "500=ZMessage\n7=Base\n").unwrap();
        let schema = load_dir(&version_dir).unwrap();
        assert_eq!(schema.name_for_id(500), Some("ZMessage"));
        assert_eq!(schema.name_for_id(12), None);
    }

    #[test]
    fn missing_dir_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(load_dir(&dir.path().join("nope")), Err(CodecError::Io(_))));
    }
}
