use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Frame header: stream id (4) + length (4) = 8 bytes.
pub const HEADER_SIZE: usize = 8;

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// One unit of traffic on the physical connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The logical stream this payload belongs to.
    pub stream_id: u32,
    /// The payload bytes.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(stream_id: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            stream_id,
            payload: payload.into(),
        }
    }

    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Encode a frame into the wire format.
///
/// ```text
/// ┌────────────────┬────────────────┬─────────────────┐
/// │ Stream ID      │ Length         │ Payload         │
/// │ (4B LE)        │ (4B LE)        │ (Length bytes)  │
/// └────────────────┴────────────────┴─────────────────┘
/// ```
pub fn encode_frame(stream_id: u32, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    let len = u32::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge {
        size: payload.len(),
        max: u32::MAX as usize,
    })?;
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_u32_le(stream_id);
    dst.put_u32_le(len);
    dst.put_slice(payload);
    Ok(())
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't hold a complete frame yet. On
/// success the frame's bytes are consumed from the buffer.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    let mut header = &src[..HEADER_SIZE];
    let stream_id = header.get_u32_le();
    let payload_len = header.get_u32_le() as usize;

    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    if src.len() < HEADER_SIZE + payload_len {
        src.reserve(HEADER_SIZE + payload_len - src.len());
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(payload_len).freeze();
    Ok(Some(Frame { stream_id, payload }))
}

/// Configuration for frame encoding/decoding.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}
