//! `tokio_util::codec` adapter for the session wire format.
//!
//! Lets async code read and write the same frames the blocking
//! [`FrameReader`](crate::FrameReader)/[`FrameWriter`](crate::FrameWriter)
//! produce, e.g. to inspect or relay a session without a thread per side.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{decode_frame, encode_frame, Frame, FrameConfig};
use crate::error::{FrameError, Result};

/// Frame codec for `FramedRead`/`FramedWrite`.
#[derive(Debug, Clone, Default)]
pub struct MuxCodec {
    config: FrameConfig,
}

impl MuxCodec {
    pub fn new(config: FrameConfig) -> Self {
        Self { config }
    }
}

impl Decoder for MuxCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        decode_frame(src, self.config.max_payload_size)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None if buf.is_empty() => Ok(None),
            None => Err(FrameError::ConnectionClosed),
        }
    }
}

impl Encoder<Frame> for MuxCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        if frame.payload.len() > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: frame.payload.len(),
                max: self.config.max_payload_size,
            });
        }
        encode_frame(frame.stream_id, &frame.payload, dst)
    }
}
