//! Schema registry: entity definitions by name, the numeric id index, and
//! the wire layout precomputed for every entity when the schema is resolved.
//!
//! A resolved [`Schema`] is immutable. A newer schema version replaces it as
//! a whole; nothing in the codec writes to it.

use crate::descriptor::{PrimitiveKind, TypeDescriptor};
use crate::error::{CodecError, Result};
use std::collections::HashMap;

/// Superclass name that terminates an inheritance chain without adding bytes.
pub const ROOT_SUPERCLASS: &str = "NetworkMessage";

/// Largest id that fits the 14-bit message header field.
pub const MAX_MESSAGE_ID: u16 = 0x3FFF;

/// Booleans declared on one entity are bit-packed only from this many up.
const MIN_PACKED_BOOLEANS: usize = 2;
const FLAGS_PER_BYTE: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub ty: TypeDescriptor,
}

impl Attribute {
    pub fn new(name: impl Into<String>, ty: TypeDescriptor) -> Self {
        Attribute {
            name: name.into(),
            ty,
        }
    }
}

/// One entity as the schema declares it. Attribute order is wire order.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDef {
    pub name: String,
    pub id: u16,
    pub superclass: Option<String>,
    pub attributes: Vec<Attribute>,
}

impl EntityDef {
    fn parent(&self) -> Option<&str> {
        match self.superclass.as_deref() {
            None | Some("") | Some(ROOT_SUPERCLASS) => None,
            Some(name) => Some(name),
        }
    }
}

/// Wire layout of the attributes an entity declares itself (not inherited).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Layout {
    /// Indices of packed booleans, one group per flag byte, bit i = i-th in group.
    pub flag_groups: Vec<Vec<usize>>,
    /// Indices of every other attribute, in declared order.
    pub fields: Vec<usize>,
}

impl Layout {
    fn of(def: &EntityDef) -> Self {
        let booleans: Vec<usize> = def
            .attributes
            .iter()
            .enumerate()
            .filter(|(_, a)| a.ty.is_boolean())
            .map(|(i, _)| i)
            .collect();
        if booleans.len() < MIN_PACKED_BOOLEANS {
            // A lone boolean stays in place and goes through the primitive path.
            return Layout {
                flag_groups: Vec::new(),
                fields: (0..def.attributes.len()).collect(),
            };
        }
        Layout {
            flag_groups: booleans.chunks(FLAGS_PER_BYTE).map(<[usize]>::to_vec).collect(),
            fields: (0..def.attributes.len())
                .filter(|&i| !def.attributes[i].ty.is_boolean())
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
struct Resolved {
    /// Entity indices from the outermost ancestor down to the entity itself.
    lineage: Vec<usize>,
    layout: Layout,
    /// Fewest body bytes the entity can occupy, ancestors included.
    min_width: usize,
}

/// Read-only registry the codec runs against.
#[derive(Debug, Clone)]
pub struct Schema {
    version: Option<String>,
    entities: Vec<EntityDef>,
    resolved: Vec<Resolved>,
    by_name: HashMap<String, usize>,
    by_id: HashMap<u16, usize>,
}

impl Schema {
    /// Resolve definitions, deriving the id index from each entity's `id`.
    pub fn resolve(entities: Vec<EntityDef>) -> Result<Self> {
        let by_name = index_names(&entities)?;
        let mut by_id = HashMap::with_capacity(entities.len());
        for (i, e) in entities.iter().enumerate() {
            if let Some(prev) = by_id.insert(e.id, i) {
                return Err(CodecError::Schema(format!(
                    "duplicate id {}: {} and {}",
                    e.id, entities[prev].name, e.name
                )));
            }
        }
        Self::finish(entities, by_name, by_id)
    }

    /// Resolve definitions against an externally supplied id→name index.
    /// Index entries naming unknown entities are skipped.
    pub fn resolve_with_ids(entities: Vec<EntityDef>, ids: HashMap<u16, String>) -> Result<Self> {
        let by_name = index_names(&entities)?;
        let mut by_id = HashMap::with_capacity(ids.len());
        for (id, name) in ids {
            match by_name.get(&name) {
                Some(&i) => {
                    by_id.insert(id, i);
                }
                None => tracing::warn!(id, name = %name, "id index names an unknown entity"),
            }
        }
        Self::finish(entities, by_name, by_id)
    }

    fn finish(
        entities: Vec<EntityDef>,
        by_name: HashMap<String, usize>,
        by_id: HashMap<u16, usize>,
    ) -> Result<Self> {
        for e in &entities {
            for a in &e.attributes {
                let mut unknown = None;
                a.ty.for_each_entity_ref(&mut |name| {
                    if unknown.is_none() && !by_name.contains_key(name) {
                        unknown = Some(name.to_string());
                    }
                });
                if let Some(name) = unknown {
                    return Err(CodecError::Schema(format!(
                        "{}.{}: unknown type {}",
                        e.name, a.name, name
                    )));
                }
            }
        }

        let mut resolved = Vec::with_capacity(entities.len());
        for (i, e) in entities.iter().enumerate() {
            let lineage = lineage_of(&entities, &by_name, i)?;
            tracing::trace!(entity = %e.name, depth = lineage.len(), "resolved lineage");
            resolved.push(Resolved {
                lineage,
                layout: Layout::of(e),
                min_width: 0,
            });
        }
        let widths = MinWidths::compute(&entities, &by_name, &resolved);
        for (r, w) in resolved.iter_mut().zip(widths) {
            r.min_width = w;
        }

        Ok(Schema {
            version: None,
            entities,
            resolved,
            by_name,
            by_id,
        })
    }

    /// Label the schema with the version it was loaded from.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityDef> {
        self.entities.iter()
    }

    pub fn get(&self, name: &str) -> Option<&EntityDef> {
        self.by_name.get(name).map(|&i| &self.entities[i])
    }

    pub fn entity(&self, name: &str) -> Result<&EntityDef> {
        self.get(name)
            .ok_or_else(|| CodecError::SchemaLookup(format!("unknown entity {}", name)))
    }

    pub fn name_for_id(&self, id: u16) -> Option<&str> {
        self.by_id.get(&id).map(|&i| self.entities[i].name.as_str())
    }

    pub fn entity_by_id(&self, id: u16) -> Result<&EntityDef> {
        self.by_id
            .get(&id)
            .map(|&i| &self.entities[i])
            .ok_or_else(|| CodecError::SchemaLookup(format!("unknown entity id {}", id)))
    }

    /// Own layout of one entity.
    pub fn layout(&self, name: &str) -> Option<&Layout> {
        self.by_name.get(name).map(|&i| &self.resolved[i].layout)
    }

    /// Fewest bytes a value of type `ty` occupies on the wire. Used to refuse
    /// vector counts the remaining input cannot hold.
    pub fn min_width(&self, ty: &TypeDescriptor) -> usize {
        type_min_width(ty, &mut |name| {
            self.by_name.get(name).map_or(0, |&i| self.resolved[i].min_width)
        })
    }

    /// Definitions and layouts of `name` and its ancestors, outermost first:
    /// the order their attributes occupy on the wire.
    pub fn lineage(&self, name: &str) -> Result<impl Iterator<Item = (&EntityDef, &Layout)>> {
        let &i = self
            .by_name
            .get(name)
            .ok_or_else(|| CodecError::SchemaLookup(format!("unknown entity {}", name)))?;
        Ok(self.resolved[i]
            .lineage
            .iter()
            .map(move |&j| (&self.entities[j], &self.resolved[j].layout)))
    }
}

const TYPE_ID_WIDTH: usize = 2;

fn type_min_width(ty: &TypeDescriptor, entity_width: &mut impl FnMut(&str) -> usize) -> usize {
    match ty {
        TypeDescriptor::Primitive(kind) => kind.min_width(),
        // An empty vector is just its count.
        TypeDescriptor::Vector(len, _) | TypeDescriptor::TypeIdVector(len, _) => match **len {
            TypeDescriptor::Primitive(kind) => kind.min_width(),
            _ => PrimitiveKind::Byte.min_width(),
        },
        TypeDescriptor::TypeId(_) => TYPE_ID_WIDTH,
        TypeDescriptor::EntityRef(name) => entity_width(name),
    }
}

/// Memoized minimum widths. An entity reached again while its own width is
/// still being summed counts as 0, which keeps the result a lower bound.
struct MinWidths<'a> {
    entities: &'a [EntityDef],
    by_name: &'a HashMap<String, usize>,
    resolved: &'a [Resolved],
    memo: Vec<Option<usize>>,
    visiting: Vec<bool>,
}

impl<'a> MinWidths<'a> {
    fn compute(
        entities: &'a [EntityDef],
        by_name: &'a HashMap<String, usize>,
        resolved: &'a [Resolved],
    ) -> Vec<usize> {
        let mut pass = MinWidths {
            entities,
            by_name,
            resolved,
            memo: vec![None; entities.len()],
            visiting: vec![false; entities.len()],
        };
        (0..entities.len()).map(|i| pass.entity(i)).collect()
    }

    fn entity(&mut self, i: usize) -> usize {
        if let Some(w) = self.memo[i] {
            return w;
        }
        if self.visiting[i] {
            return 0;
        }
        self.visiting[i] = true;
        let (entities, by_name, resolved) = (self.entities, self.by_name, self.resolved);
        let mut width = 0;
        for &j in &resolved[i].lineage {
            let layout = &resolved[j].layout;
            width += layout.flag_groups.len();
            for &f in &layout.fields {
                let ty = &entities[j].attributes[f].ty;
                width += type_min_width(ty, &mut |name| match by_name.get(name) {
                    Some(&k) => self.entity(k),
                    None => 0,
                });
            }
        }
        self.visiting[i] = false;
        self.memo[i] = Some(width);
        width
    }
}

fn index_names(entities: &[EntityDef]) -> Result<HashMap<String, usize>> {
    let mut by_name = HashMap::with_capacity(entities.len());
    for (i, e) in entities.iter().enumerate() {
        if by_name.insert(e.name.clone(), i).is_some() {
            return Err(CodecError::Schema(format!("duplicate entity name {}", e.name)));
        }
    }
    Ok(by_name)
}

fn lineage_of(entities: &[EntityDef], by_name: &HashMap<String, usize>, start: usize) -> Result<Vec<usize>> {
    let mut chain = vec![start];
    let mut current = start;
    while let Some(parent) = entities[current].parent() {
        let &p = by_name.get(parent).ok_or_else(|| {
            CodecError::SchemaLookup(format!(
                "{}: unknown superclass {}",
                entities[current].name, parent
            ))
        })?;
        if chain.contains(&p) {
            return Err(CodecError::Schema(format!(
                "inheritance cycle through {}",
                entities[p].name
            )));
        }
        chain.push(p);
        current = p;
    }
    chain.reverse();
    Ok(chain)
}
