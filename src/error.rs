//! Error taxonomy shared by the buffer, schema and codec layers.

/// Errors raised while loading a schema or encoding/decoding a message.
///
/// None of these are retried internally: they mean corrupt input bytes or a
/// schema/data mismatch, and no partial value tree is ever returned with them.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// A read needed more bytes than the buffer holds.
    #[error("buffer underrun: needed {needed} byte(s) at offset {offset}, {available} available")]
    BufferUnderrun {
        offset: usize,
        needed: usize,
        available: usize,
    },
    /// A variable-length integer did not terminate within its group budget.
    #[error("too much data: {0} did not terminate")]
    TooMuchData(&'static str),
    /// Unknown numeric id or entity name.
    #[error("schema lookup: {0}")]
    SchemaLookup(String),
    /// Malformed type descriptor, invalid schema document, or id outside its domain.
    #[error("schema: {0}")]
    Schema(String),
    /// Value outside a fixed encoding domain.
    #[error("range: {0}")]
    Range(String),
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    #[error("missing attribute {attribute} on {entity}")]
    MissingAttribute { entity: String, attribute: String },
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CodecError>;
