use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Default maximum payload size: 1 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 1024 * 1024;

/// Default chunk size used by writers that split larger payloads
/// into multiple frames: 16 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

/// Maximum encoded length of a `u32` varint.
const MAX_U32_VARINT_LEN: usize = 5;

/// A framed message with channel routing.
#[derive(Debug, Clone)]
pub struct Frame {
    /// The channel this message belongs to.
    pub channel: u32,
    /// The message payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(channel: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            channel,
            payload: payload.into(),
        }
    }

    /// The total wire size of this frame (header varints + payload).
    pub fn wire_size(&self) -> usize {
        varint_len(u64::from(self.channel))
            + varint_len(self.payload.len() as u64)
            + self.payload.len()
    }
}

/// Append an unsigned LEB128 varint to `dst`.
pub fn put_varint(dst: &mut BytesMut, mut value: u64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            dst.put_u8(byte);
            return;
        }
        dst.put_u8(byte | 0x80);
    }
}

/// Encoded length of `value` as an unsigned LEB128 varint.
pub fn varint_len(value: u64) -> usize {
    (64 - (value | 1).leading_zeros() as usize).div_ceil(7)
}

/// Decode an unsigned LEB128 varint from the front of `src` without
/// consuming it.
///
/// Returns `Ok(None)` if `src` ends mid-varint, otherwise the decoded
/// value and its encoded width. Varints wider than a `u32` allows are a
/// `MalformedFrame` error: frame headers only ever carry `u32` values.
pub fn peek_varint(src: &[u8]) -> Result<Option<(u32, usize)>> {
    let mut value: u64 = 0;
    for (i, &byte) in src.iter().enumerate() {
        if i >= MAX_U32_VARINT_LEN {
            return Err(FrameError::MalformedFrame(format!(
                "varint wider than {MAX_U32_VARINT_LEN} bytes"
            )));
        }
        value |= u64::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            let value = u32::try_from(value).map_err(|_| {
                FrameError::MalformedFrame(format!("varint value {value} exceeds u32"))
            })?;
            return Ok(Some((value, i + 1)));
        }
    }
    Ok(None) // Need more data
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌─────────────────────┬─────────────────────┬──────────────────┐
/// │ Channel (varint)    │ Length (varint)     │ Payload          │
/// │ unsigned LEB128     │ unsigned LEB128     │ (Length bytes)   │
/// └─────────────────────┴─────────────────────┴──────────────────┘
/// ```
pub fn encode_frame(channel: u32, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > u32::MAX as usize {
        return Err(FrameError::FrameTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        });
    }
    dst.reserve(2 * MAX_U32_VARINT_LEN + payload.len());
    put_varint(dst, u64::from(channel));
    put_varint(dst, payload.len() as u64);
    dst.put_slice(payload);
    Ok(())
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer. The buffer is
/// left untouched on `Ok(None)` so decoding is resumable across
/// arbitrarily chunked reads.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    let Some((channel, channel_width)) = peek_varint(src)? else {
        return Ok(None); // Need more data
    };

    let Some((payload_len, len_width)) = peek_varint(&src[channel_width..])? else {
        return Ok(None); // Need more data
    };
    let payload_len = payload_len as usize;

    if payload_len > max_payload {
        return Err(FrameError::FrameTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    let header = channel_width + len_width;
    if src.len() < header + payload_len {
        return Ok(None); // Need more data
    }

    src.advance(header);
    let payload = src.split_to(payload_len).freeze();

    Ok(Some(Frame { channel, payload }))
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 1 MiB.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}
