//! Stream lifecycle messages carried on [`CONTROL_STREAM`].
//!
//! Payload layout: `[kind:u8][stream-id:u32 LE]`.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::Frame;
use crate::error::{FrameError, Result};
use crate::stream::CONTROL_STREAM;

/// Encoded size of a control payload.
pub const CONTROL_FRAME_LEN: usize = 5;

/// What a control frame asks of the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ControlKind {
    /// The sender wants a logical stream with this ID.
    Open = 1,
    /// The sender accepted a previously requested stream.
    Accept = 2,
    /// The sender is done with the stream; both directions end.
    Close = 3,
}

impl ControlKind {
    fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            1 => Ok(Self::Open),
            2 => Ok(Self::Accept),
            3 => Ok(Self::Close),
            other => Err(FrameError::MalformedControl(format!(
                "unknown control kind {other}"
            ))),
        }
    }
}

/// A decoded control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlFrame {
    pub kind: ControlKind,
    pub stream_id: u32,
}

impl ControlFrame {
    pub fn open(stream_id: u32) -> Self {
        Self {
            kind: ControlKind::Open,
            stream_id,
        }
    }

    pub fn accept(stream_id: u32) -> Self {
        Self {
            kind: ControlKind::Accept,
            stream_id,
        }
    }

    pub fn close(stream_id: u32) -> Self {
        Self {
            kind: ControlKind::Close,
            stream_id,
        }
    }

    /// Serialize into a frame addressed to the control stream.
    pub fn to_frame(self) -> Frame {
        let mut payload = BytesMut::with_capacity(CONTROL_FRAME_LEN);
        payload.put_u8(self.kind as u8);
        payload.put_u32_le(self.stream_id);
        Frame::new(CONTROL_STREAM, payload.freeze())
    }

    /// Parse the payload of a frame received on the control stream.
    pub fn decode(payload: &Bytes) -> Result<Self> {
        if payload.len() != CONTROL_FRAME_LEN {
            return Err(FrameError::MalformedControl(format!(
                "expected {CONTROL_FRAME_LEN} bytes, got {}",
                payload.len()
            )));
        }
        let mut buf = payload.clone();
        let kind = ControlKind::from_byte(buf.get_u8())?;
        let stream_id = buf.get_u32_le();
        if stream_id == CONTROL_STREAM {
            return Err(FrameError::MalformedControl(
                "control frame addresses the control stream".to_string(),
            ));
        }
        Ok(Self { kind, stream_id })
    }
}
