//! Message framing: the 16-bit header (14-bit entity id, 2-bit length code),
//! the optional length field, and back-to-back message streams.
//!
//! The length field is advisory. A message body is whatever the entity
//! codec consumes from the rest of the buffer; callers compare `consumed`
//! with the input length to spot trailing data.

use crate::buffer::{ByteReader, ByteWriter};
use crate::codec::Codec;
use crate::error::{CodecError, Result};
use crate::schema::MAX_MESSAGE_ID;
use crate::value::Entity;
use tracing::debug;

const ID_SHIFT: u16 = 2;
const LEN_CODE_MASK: u16 = 0x3;
/// Largest body the three-byte length field can describe.
pub const MAX_BODY_LEN: usize = 0xFF_FFFF;

/// Decoded message header plus its length field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Entity numeric id, bits 15..2 of the header word.
    pub id: u16,
    /// Width code of the length field, bits 1..0 of the header word.
    pub len_code: u8,
    /// Value of the length field; `None` when `len_code` is 0.
    pub declared_len: Option<u32>,
    /// Header word plus length field, in bytes.
    pub header_len: usize,
}

impl FrameHeader {
    pub fn split_word(word: u16) -> (u16, u8) {
        ((word >> ID_SHIFT) & MAX_MESSAGE_ID, (word & LEN_CODE_MASK) as u8)
    }

    /// Smallest length code able to carry a body of `len` bytes.
    pub fn len_code_for(len: usize) -> u8 {
        match len {
            0 => 0,
            1..=0xFF => 1,
            0x100..=0xFFFF => 2,
            _ => 3,
        }
    }

    /// Read the header word and length field from the front of `bytes`.
    pub fn read(bytes: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(bytes);
        Self::read_from(&mut r)
    }

    fn read_from(r: &mut ByteReader<'_>) -> Result<Self> {
        let (id, len_code) = Self::split_word(r.read_u16()?);
        let declared_len = match len_code {
            0 => None,
            1 => Some(u32::from(r.read_u8()?)),
            2 => Some(u32::from(r.read_u16()?)),
            _ => {
                let b0 = u32::from(r.read_u8()?);
                let b1 = u32::from(r.read_u8()?);
                let b2 = u32::from(r.read_u8()?);
                Some(((b0 & 0xFF) << 16) + ((b1 & 0xFF) << 8) + (b2 & 0xFF))
            }
        };
        Ok(FrameHeader {
            id,
            len_code,
            declared_len,
            header_len: r.position(),
        })
    }
}

/// A decoded message.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub entity: Entity,
    pub header: FrameHeader,
    /// Header, length field and body bytes actually used.
    pub consumed: usize,
}

impl Codec {
    /// Decode one message from the front of `bytes`.
    pub fn decode_message(&self, bytes: &[u8]) -> Result<Decoded> {
        let mut r = ByteReader::new(bytes);
        let header = FrameHeader::read_from(&mut r)?;
        let def = self.schema().entity_by_id(header.id)?;
        let (entity, used) = self.decode_entity(&def.name, r.rest())?;
        let consumed = header.header_len + used;
        debug!(
            entity = %entity.name,
            id = header.id,
            declared_len = ?header.declared_len,
            consumed,
            trailing = bytes.len() - consumed,
            "decoded message"
        );
        Ok(Decoded {
            entity,
            header,
            consumed,
        })
    }

    /// Encode a message: header word, length field, then the body of the
    /// entity named by `entity.name`.
    pub fn encode_message(&self, entity: &Entity) -> Result<Vec<u8>> {
        let def = self.schema().entity(&entity.name)?;
        if def.id > MAX_MESSAGE_ID {
            return Err(CodecError::Schema(format!(
                "{}: id {} does not fit the 14-bit header",
                def.name, def.id
            )));
        }
        let body = self.encode_entity(entity)?;
        if body.len() > MAX_BODY_LEN {
            return Err(CodecError::Range(format!(
                "{}: body of {} bytes exceeds the length field",
                def.name,
                body.len()
            )));
        }
        let len_code = FrameHeader::len_code_for(body.len());
        let mut w = ByteWriter::new();
        w.write_u16((def.id << ID_SHIFT) | u16::from(len_code))?;
        let len = body.len();
        match len_code {
            0 => {}
            1 => w.write_u8(len as u8)?,
            2 => w.write_u16(len as u16)?,
            _ => {
                w.write_u8((len >> 16) as u8)?;
                w.write_u8((len >> 8) as u8)?;
                w.write_u8(len as u8)?;
            }
        }
        w.write_bytes(&body);
        debug!(entity = %def.name, id = def.id, body_len = len, "encoded message");
        Ok(w.into_bytes())
    }
}

/// Result of decoding a buffer holding several messages back to back.
#[derive(Debug, Default)]
pub struct StreamDecodeResult {
    /// Messages that decoded, with their byte range in the input.
    pub messages: Vec<StreamMessage>,
    /// Messages skipped because their type is unknown to the schema. Only
    /// possible when the length field says where the next message starts.
    pub skipped: Vec<SkippedMessage>,
    /// The error that stopped decoding, with the offset of the failing message.
    pub error: Option<(usize, CodecError)>,
}

#[derive(Debug)]
pub struct StreamMessage {
    pub entity: Entity,
    pub byte_range: (usize, usize),
}

#[derive(Debug)]
pub struct SkippedMessage {
    pub id: u16,
    pub byte_range: (usize, usize),
    pub reason: String,
}

/// Decode messages from `bytes` until the input ends or a message fails.
///
/// A message whose id or nested type id is unknown is skipped when it
/// carries a length field that fits the input; any other failure stops
/// decoding, since the next message boundary is then unknown.
pub fn decode_stream(codec: &Codec, bytes: &[u8]) -> StreamDecodeResult {
    let mut result = StreamDecodeResult::default();
    let mut offset = 0;

    while offset < bytes.len() {
        let rest = &bytes[offset..];
        match codec.decode_message(rest) {
            Ok(decoded) => {
                result.messages.push(StreamMessage {
                    entity: decoded.entity,
                    byte_range: (offset, offset + decoded.consumed),
                });
                offset += decoded.consumed;
            }
            Err(CodecError::SchemaLookup(reason)) => {
                let skip = FrameHeader::read(rest).ok().and_then(|h| {
                    let len = h.header_len + h.declared_len? as usize;
                    (len <= rest.len()).then_some((h.id, len))
                });
                match skip {
                    Some((id, len)) => {
                        debug!(id, offset, len, "skipping message of unknown type");
                        result.skipped.push(SkippedMessage {
                            id,
                            byte_range: (offset, offset + len),
                            reason,
                        });
                        offset += len;
                    }
                    None => {
                        result.error = Some((offset, CodecError::SchemaLookup(reason)));
                        break;
                    }
                }
            }
            Err(e) => {
                result.error = Some((offset, e));
                break;
            }
        }
    }
    result
}
