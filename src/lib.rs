//! # datafus-codec: schema-driven codec for Dofus network messages
//!
//! Decodes and encodes the game's binary messages using the entity schema
//! exported by Datafus (`events.json`): every message and nested type is an
//! entity with a numeric id, an optional superclass and an ordered list of
//! typed attributes.
//!
//! ## Wire format
//!
//! - **Header**: u16 big-endian; bits 15..2 are the entity id, bits 1..0 the
//!   width code of the length field that follows (none, u8, u16, 3 bytes).
//! - **Body**: the entity's attributes, superclass attributes first. Two or
//!   more booleans declared on the same entity share flag bytes, eight per
//!   byte; a lone boolean is a plain byte.
//! - **Primitives**: big-endian fixed-width integers and floats, u16-prefixed
//!   text, and the VarInt / VarShort / VarLong 7-bit group encodings.
//! - **Polymorphism**: `TypeId<T>` and `TypeIdVector<L,T>` prefix each value
//!   with the u16 id of its concrete type.
//!
//! ## Usage
//!
//! ```no_run
//! use datafus_codec::{loader, Codec};
//! use std::path::Path;
//!
//! let codec = Codec::new(loader::load_dir(Path::new("datafus/2.71.4"))?);
//! let bytes = hex::decode("58c12604b79a01000000000000010100000032000a4a75616e2d426f6d6261427889362ce540000000")?;
//! let decoded = codec.decode_message(&bytes)?;
//! assert_eq!(decoded.entity.name, "RecruitmentInformationMessage");
//! assert_eq!(codec.encode_message(&decoded.entity)?, bytes);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod buffer;
pub mod codec;
pub mod descriptor;
pub mod dump;
pub mod error;
pub mod flags;
pub mod frame;
pub mod loader;
pub mod schema;
pub mod value;

pub use codec::{Codec, MAX_NESTING};
pub use descriptor::{PrimitiveKind, TypeDescriptor};
pub use error::{CodecError, Result};
pub use frame::{decode_stream, Decoded, FrameHeader, StreamDecodeResult};
pub use schema::{Attribute, EntityDef, Schema};
pub use value::{Entity, Value};
