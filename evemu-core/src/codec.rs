//! Binary marshal format for [`WireValue`] trees.
//!
//! A stream is a header byte, a little-endian u32 count of saved objects
//! (always zero here) and exactly one value. Every value starts with a
//! one-byte opcode. Lengths use a single byte, or `0xFF` followed by a u32
//! when they do not fit.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::value::{SubStream, WireValue};

pub const STREAM_HEADER: u8 = 0x7E;

const LENGTH_EXTENDED: u8 = 0xFF;

pub mod opcode {
    pub const NONE: u8 = 0x01;
    pub const LONG: u8 = 0x03;
    pub const INT: u8 = 0x04;
    pub const TRUE: u8 = 0x09;
    pub const FALSE: u8 = 0x0A;
    pub const STR: u8 = 0x13;
    pub const TUPLE: u8 = 0x14;
    pub const LIST: u8 = 0x15;
    pub const DICT: u8 = 0x16;
    pub const OBJECT: u8 = 0x17;
    pub const SUBSTREAM: u8 = 0x2B;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("Invalid stream header 0x{0:02x}")]
    InvalidHeader(u8),

    #[error("Unexpected end of stream at offset {0}")]
    UnexpectedEof(usize),

    #[error("Unknown opcode 0x{opcode:02x} at offset {offset}")]
    UnknownOpcode { opcode: u8, offset: usize },

    #[error("String at offset {0} is not valid UTF-8")]
    InvalidUtf8(usize),

    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),

    #[error("Nesting deeper than {0} levels")]
    DepthLimit(usize),

    #[error("Length {0} does not fit the wire format")]
    TooLarge(usize),
}

/// Bounds applied while parsing untrusted input. The encoder enforces the
/// same bound so that everything it writes can be read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeLimits {
    pub max_depth: usize,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self { max_depth: 64 }
    }
}

pub fn encode(value: &WireValue) -> Result<Bytes, CodecError> {
    encode_with_limits(value, DecodeLimits::default())
}

pub fn encode_with_limits(value: &WireValue, limits: DecodeLimits) -> Result<Bytes, CodecError> {
    let mut writer = Writer {
        buf: BytesMut::with_capacity(64),
        limits,
    };
    writer.buf.put_u8(STREAM_HEADER);
    writer.buf.put_u32_le(0);
    writer.value(value, 0)?;
    Ok(writer.buf.freeze())
}

pub fn decode(data: &[u8]) -> Result<WireValue, CodecError> {
    decode_with_limits(data, DecodeLimits::default())
}

pub fn decode_with_limits(data: &[u8], limits: DecodeLimits) -> Result<WireValue, CodecError> {
    let mut reader = Reader {
        buf: data,
        total: data.len(),
        limits,
    };

    let header = reader.u8()?;
    if header != STREAM_HEADER {
        return Err(CodecError::InvalidHeader(header));
    }
    // saved-object count; references are never emitted
    reader.u32()?;

    let value = reader.value(0)?;
    if reader.buf.has_remaining() {
        return Err(CodecError::TrailingBytes(reader.buf.remaining()));
    }
    Ok(value)
}

fn put_length(len: usize, buf: &mut BytesMut) -> Result<(), CodecError> {
    if len < LENGTH_EXTENDED as usize {
        buf.put_u8(len as u8);
    } else {
        let len = u32::try_from(len).map_err(|_| CodecError::TooLarge(len))?;
        buf.put_u8(LENGTH_EXTENDED);
        buf.put_u32_le(len);
    }
    Ok(())
}

fn put_blob(data: &[u8], buf: &mut BytesMut) -> Result<(), CodecError> {
    put_length(data.len(), buf)?;
    buf.put_slice(data);
    Ok(())
}

struct Writer {
    buf: BytesMut,
    limits: DecodeLimits,
}

impl Writer {
    // depth is counted exactly as `Reader::value` counts it
    fn value(&mut self, value: &WireValue, depth: usize) -> Result<(), CodecError> {
        if depth > self.limits.max_depth {
            return Err(CodecError::DepthLimit(self.limits.max_depth));
        }

        match value {
            WireValue::None => self.buf.put_u8(opcode::NONE),
            WireValue::Int(v) => {
                self.buf.put_u8(opcode::INT);
                self.buf.put_i32_le(*v);
            }
            WireValue::Long(v) => {
                self.buf.put_u8(opcode::LONG);
                self.buf.put_i64_le(*v);
            }
            WireValue::Bool(true) => self.buf.put_u8(opcode::TRUE),
            WireValue::Bool(false) => self.buf.put_u8(opcode::FALSE),
            WireValue::Str(s) => {
                self.buf.put_u8(opcode::STR);
                put_blob(s.as_bytes(), &mut self.buf)?;
            }
            WireValue::Tuple(items) | WireValue::List(items) => {
                let op = if matches!(value, WireValue::Tuple(_)) {
                    opcode::TUPLE
                } else {
                    opcode::LIST
                };
                self.buf.put_u8(op);
                put_length(items.len(), &mut self.buf)?;
                for item in items {
                    self.value(item, depth + 1)?;
                }
            }
            WireValue::Dict(pairs) => {
                self.buf.put_u8(opcode::DICT);
                put_length(pairs.len(), &mut self.buf)?;
                for (key, val) in pairs {
                    self.value(key, depth + 1)?;
                    self.value(val, depth + 1)?;
                }
            }
            // already marshaled; its own depth was checked when it was built
            WireValue::SubStream(sub) => {
                self.buf.put_u8(opcode::SUBSTREAM);
                put_blob(sub.raw(), &mut self.buf)?;
            }
            WireValue::Object { type_tag, payload } => {
                self.buf.put_u8(opcode::OBJECT);
                put_blob(type_tag.as_bytes(), &mut self.buf)?;
                self.value(payload, depth + 1)?;
            }
        }
        Ok(())
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    total: usize,
    limits: DecodeLimits,
}

impl<'a> Reader<'a> {
    fn offset(&self) -> usize {
        self.total - self.buf.remaining()
    }

    fn need(&self, n: usize) -> Result<(), CodecError> {
        if self.buf.remaining() < n {
            Err(CodecError::UnexpectedEof(self.offset()))
        } else {
            Ok(())
        }
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        self.need(4)?;
        Ok(self.buf.get_u32_le())
    }

    fn length(&mut self) -> Result<usize, CodecError> {
        match self.u8()? {
            LENGTH_EXTENDED => Ok(self.u32()? as usize),
            len => Ok(len as usize),
        }
    }

    fn blob(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.length()?;
        self.need(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    fn string(&mut self) -> Result<String, CodecError> {
        let offset = self.offset();
        let raw = self.blob()?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| CodecError::InvalidUtf8(offset))
    }

    fn value(&mut self, depth: usize) -> Result<WireValue, CodecError> {
        if depth > self.limits.max_depth {
            return Err(CodecError::DepthLimit(self.limits.max_depth));
        }

        let offset = self.offset();
        let value = match self.u8()? {
            opcode::NONE => WireValue::None,
            opcode::INT => {
                self.need(4)?;
                WireValue::Int(self.buf.get_i32_le())
            }
            opcode::LONG => {
                self.need(8)?;
                WireValue::Long(self.buf.get_i64_le())
            }
            opcode::TRUE => WireValue::Bool(true),
            opcode::FALSE => WireValue::Bool(false),
            opcode::STR => WireValue::Str(self.string()?),
            opcode::TUPLE => WireValue::Tuple(self.sequence(depth)?),
            opcode::LIST => WireValue::List(self.sequence(depth)?),
            opcode::DICT => {
                let count = self.length()?;
                let mut pairs = Vec::with_capacity(count.min(self.buf.remaining()));
                for _ in 0..count {
                    let key = self.value(depth + 1)?;
                    let val = self.value(depth + 1)?;
                    pairs.push((key, val));
                }
                WireValue::Dict(pairs)
            }
            opcode::SUBSTREAM => {
                let raw = Bytes::copy_from_slice(self.blob()?);
                WireValue::SubStream(SubStream::from_bytes(raw))
            }
            opcode::OBJECT => {
                let type_tag = self.string()?;
                let payload = self.value(depth + 1)?;
                WireValue::Object {
                    type_tag,
                    payload: Box::new(payload),
                }
            }
            other => {
                return Err(CodecError::UnknownOpcode {
                    opcode: other,
                    offset,
                })
            }
        };
        Ok(value)
    }

    fn sequence(&mut self, depth: usize) -> Result<Vec<WireValue>, CodecError> {
        let count = self.length()?;
        // every element takes at least one byte, so cap the preallocation
        let mut items = Vec::with_capacity(count.min(self.buf.remaining()));
        for _ in 0..count {
            items.push(self.value(depth + 1)?);
        }
        Ok(items)
    }
}
