//! Typed fields making up db-server message payloads.
//!
//! Every field on the wire starts with a one-byte type tag. Numbers are
//! big-endian and come in 1, 2 and 4 byte widths; strings are UTF-16BE with
//! a leading code-unit count and a trailing NUL; binary blobs carry a
//! leading byte count. Tags we do not recognize decode to an opaque field
//! (length-prefixed, like every variable-length field in this protocol)
//! instead of failing, so newer players do not break us.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{MetadataError, Result};

pub const TAG_U8: u8 = 0x0f;
pub const TAG_U16: u8 = 0x10;
pub const TAG_U32: u8 = 0x11;
pub const TAG_BINARY: u8 = 0x14;
pub const TAG_STRING: u8 = 0x26;

/// Largest buffer preallocated from a wire-declared length. Declared
/// lengths are untrusted; anything longer grows only as bytes arrive.
const MAX_PREALLOC: usize = 8192;

/// One argument of a db-server message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    U8(u8),
    U16(u16),
    U32(u32),
    String(String),
    Binary(Vec<u8>),
    /// A field with a type tag we do not understand, kept as raw bytes.
    Unknown { tag: u8, bytes: Vec<u8> },
}

impl Field {
    /// Append this field's wire representation to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Field::U8(v) => {
                out.push(TAG_U8);
                out.push(*v);
            }
            Field::U16(v) => {
                out.push(TAG_U16);
                out.extend_from_slice(&v.to_be_bytes());
            }
            Field::U32(v) => {
                out.push(TAG_U32);
                out.extend_from_slice(&v.to_be_bytes());
            }
            Field::String(s) => {
                out.push(TAG_STRING);
                let units: Vec<u16> = s.encode_utf16().chain(std::iter::once(0)).collect();
                out.extend_from_slice(&(units.len() as u32).to_be_bytes());
                for unit in units {
                    out.extend_from_slice(&unit.to_be_bytes());
                }
            }
            Field::Binary(bytes) => {
                out.push(TAG_BINARY);
                out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
                out.extend_from_slice(bytes);
            }
            Field::Unknown { tag, bytes } => {
                out.push(*tag);
                out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
                out.extend_from_slice(bytes);
            }
        }
    }

    /// Read one field from the stream.
    pub async fn read<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Field> {
        let tag = stream.read_u8().await?;
        Self::read_tagged(stream, tag).await
    }

    async fn read_tagged<R: AsyncRead + Unpin>(stream: &mut R, tag: u8) -> Result<Field> {
        match tag {
            TAG_U8 => Ok(Field::U8(stream.read_u8().await?)),
            TAG_U16 => Ok(Field::U16(stream.read_u16().await?)),
            TAG_U32 => Ok(Field::U32(stream.read_u32().await?)),
            TAG_STRING => {
                let unit_count = stream.read_u32().await? as usize;
                let mut units = Vec::with_capacity(unit_count.min(MAX_PREALLOC / 2));
                for _ in 0..unit_count {
                    units.push(stream.read_u16().await?);
                }
                // Strip the trailing NUL the players always send.
                if units.last() == Some(&0) {
                    units.pop();
                }
                let text = String::from_utf16(&units)
                    .map_err(|e| MetadataError::protocol(format!("bad UTF-16 string: {e}")))?;
                Ok(Field::String(text))
            }
            TAG_BINARY => {
                let len = stream.read_u32().await? as usize;
                Ok(Field::Binary(read_sized(stream, len).await?))
            }
            other => {
                let len = stream.read_u32().await? as usize;
                let bytes = read_sized(stream, len).await?;
                tracing::debug!(tag = other, len, "decoded unknown field type as opaque bytes");
                Ok(Field::Unknown { tag: other, bytes })
            }
        }
    }

    /// Numeric value of this field, if it is a number.
    pub fn number(&self) -> Option<u32> {
        match self {
            Field::U8(v) => Some(*v as u32),
            Field::U16(v) => Some(*v as u32),
            Field::U32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Field::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            Field::Binary(bytes) => Some(bytes),
            _ => None,
        }
    }
}

/// Read exactly `len` bytes without trusting `len` for the allocation.
async fn read_sized<R: AsyncRead + Unpin>(stream: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut bytes = Vec::with_capacity(len.min(MAX_PREALLOC));
    stream.take(len as u64).read_to_end(&mut bytes).await?;
    if bytes.len() != len {
        return Err(MetadataError::protocol(format!(
            "field truncated: declared {len} bytes, stream ended after {}",
            bytes.len()
        )));
    }
    Ok(bytes)
}
