//! RPC records on a logical stream.
//!
//! ```text
//! ┌─────────┬──────────────┬────────┬────────────┬──────┐
//! │ Tag     │ Header len   │ Header │ Body len   │ Body │
//! │ (1B)    │ (4B LE)      │        │ (4B LE)    │      │
//! └─────────┴──────────────┴────────┴────────────┴──────┘
//! ```
//!
//! Header and body are encoded separately with the connection's codec; the
//! body stays opaque until the handler (or caller) knows its type.

use std::sync::{Mutex, PoisonError};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use plugrpc_mux::{MuxError, StreamReader, StreamWriter};
use serde::{Deserialize, Serialize};

use crate::codec::Codec;
use crate::error::{Result, RpcError, WireError};

/// Largest header or body accepted from the peer: 64 MiB.
pub const MAX_SECTION_SIZE: usize = 64 * 1024 * 1024;

const PREFIX_LEN: usize = 1 + 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHeader {
    pub seq: u64,
    pub service_method: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseHeader {
    pub seq: u64,
    pub service_method: String,
    pub error: Option<WireError>,
}

/// One record as read off the stream, before header decoding.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub tag: u8,
    pub header: Bytes,
    pub body: Bytes,
}

/// Assemble a record. `header` and `body` are already encoded.
pub fn encode_record(tag: u8, header: &[u8], body: &[u8], dst: &mut BytesMut) -> Result<()> {
    let section_len = |len: usize| {
        u32::try_from(len)
            .ok()
            .filter(|&n| (n as usize) <= MAX_SECTION_SIZE)
            .ok_or_else(|| RpcError::Encode(format!("record section of {len} bytes is too large")))
    };
    let header_len = section_len(header.len())?;
    let body_len = section_len(body.len())?;

    dst.reserve(PREFIX_LEN + header.len() + 4 + body.len());
    dst.put_u8(tag);
    dst.put_u32_le(header_len);
    dst.put_slice(header);
    dst.put_u32_le(body_len);
    dst.put_slice(body);
    Ok(())
}

/// Take one complete record off the front of `src`, if there is one.
pub fn decode_record(src: &mut BytesMut) -> Result<Option<RawRecord>> {
    if src.len() < PREFIX_LEN {
        return Ok(None);
    }
    let header_len = (&src[1..PREFIX_LEN]).get_u32_le() as usize;
    if header_len > MAX_SECTION_SIZE {
        return Err(RpcError::Protocol(format!(
            "record header of {header_len} bytes exceeds limit"
        )));
    }

    let body_prefix = PREFIX_LEN + header_len;
    if src.len() < body_prefix + 4 {
        return Ok(None);
    }
    let body_len = (&src[body_prefix..body_prefix + 4]).get_u32_le() as usize;
    if body_len > MAX_SECTION_SIZE {
        return Err(RpcError::Protocol(format!(
            "record body of {body_len} bytes exceeds limit"
        )));
    }
    if src.len() < body_prefix + 4 + body_len {
        return Ok(None);
    }

    let tag = src.get_u8();
    src.advance(4);
    let header = src.split_to(header_len).freeze();
    src.advance(4);
    let body = src.split_to(body_len).freeze();
    Ok(Some(RawRecord { tag, header, body }))
}

/// Reads whole records from the receiving half of a stream.
pub(crate) struct RecordReader {
    stream: StreamReader,
    buf: BytesMut,
}

impl RecordReader {
    pub(crate) fn new(stream: StreamReader) -> Self {
        Self {
            stream,
            buf: BytesMut::new(),
        }
    }

    /// Tear down the session after a protocol violation on this stream.
    pub(crate) fn close_session(&self, reason: &str) {
        self.stream.close_session(reason);
    }

    /// Next record, or `None` when the peer closed the stream cleanly.
    pub(crate) fn next_record(&mut self) -> Result<Option<RawRecord>> {
        loop {
            if let Some(record) = decode_record(&mut self.buf)? {
                return Ok(Some(record));
            }
            match self.stream.recv() {
                Ok(Some(chunk)) => self.buf.extend_from_slice(&chunk),
                Ok(None) if self.buf.is_empty() => return Ok(None),
                Ok(None) => {
                    return Err(RpcError::Protocol(format!(
                        "stream closed inside a record ({} bytes pending)",
                        self.buf.len()
                    )))
                }
                Err(MuxError::StreamClosed { .. }) => return Ok(None),
                Err(err) => return Err(err.into()),
            }
        }
    }
}

/// Serializes record writes on one stream.
pub(crate) struct RecordWriter {
    codec: Codec,
    stream: Mutex<StreamWriter>,
}

impl RecordWriter {
    pub(crate) fn new(codec: Codec, stream: StreamWriter) -> Self {
        Self {
            codec,
            stream: Mutex::new(stream),
        }
    }

    /// Encode `header` and write it with the already-encoded `body` as one
    /// record.
    pub(crate) fn write<H: Serialize>(&self, header: &H, body: &[u8]) -> Result<()> {
        self.write_tagged(self.codec.tag(), header, body)
    }

    pub(crate) fn write_tagged<H: Serialize>(&self, tag: u8, header: &H, body: &[u8]) -> Result<()> {
        let header = self.codec.encode(header)?;
        let mut record = BytesMut::new();
        encode_record(tag, &header, body, &mut record)?;

        let stream = self.stream.lock().unwrap_or_else(PoisonError::into_inner);
        stream.send(&record).map_err(RpcError::from)
    }

    pub(crate) fn close(&self) {
        self.stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .close();
    }
}
