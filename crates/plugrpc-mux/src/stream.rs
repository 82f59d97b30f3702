//! Logical streams handed out by the [`Broker`](crate::Broker).

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::{Buf, Bytes};
use plugrpc_frame::ControlFrame;
use tracing::debug;

use crate::broker::Session;
use crate::error::{MuxError, Result};
use crate::table::Inbound;

/// Owned by every write side of one stream. The stream closes when the last
/// owner goes away.
struct StreamCore {
    id: u32,
    session: Arc<Session>,
    closed: AtomicBool,
}

impl StreamCore {
    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let removed = {
            let mut table = self.session.table();
            !table.is_closed() && table.retire(self.id)
        };
        if removed {
            debug!(stream_id = self.id, "closing stream");
            let _ = self.session.send_control(ControlFrame::close(self.id));
        }
    }
}

impl Drop for StreamCore {
    fn drop(&mut self) {
        self.close();
    }
}

/// A duplex byte stream multiplexed over the session.
///
/// Behaves like an independent connection: bytes written here arrive on the
/// peer's stream with the same ID, in order. Dropping it closes the stream.
pub struct LogicalStream {
    reader: StreamReader,
    writer: StreamWriter,
}

impl LogicalStream {
    pub(crate) fn new(id: u32, inbound: Receiver<Inbound>, session: Arc<Session>) -> Self {
        let core = Arc::new(StreamCore {
            id,
            session: Arc::clone(&session),
            closed: AtomicBool::new(false),
        });
        Self {
            reader: StreamReader {
                id,
                inbound,
                leftover: Bytes::new(),
                finished: false,
                session,
            },
            writer: StreamWriter { core },
        }
    }

    pub fn id(&self) -> u32 {
        self.writer.id()
    }

    pub fn send(&self, data: &[u8]) -> Result<()> {
        self.writer.send(data)
    }

    /// Next chunk from the peer; `None` once the peer closed the stream.
    pub fn recv(&mut self) -> Result<Option<Bytes>> {
        self.reader.recv()
    }

    pub fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Bytes>> {
        self.reader.recv_timeout(timeout)
    }

    /// Separate the two directions so they can be used from different threads.
    pub fn split(self) -> (StreamReader, StreamWriter) {
        (self.reader, self.writer)
    }

    pub fn handle(&self) -> StreamHandle {
        self.writer.handle()
    }

    pub fn close(&self) {
        self.writer.close();
    }
}

impl Read for LogicalStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.reader.read(buf)
    }
}

impl Write for LogicalStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

impl std::fmt::Debug for LogicalStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogicalStream")
            .field("id", &self.id())
            .field("closed", &self.writer.is_closed())
            .finish()
    }
}

/// Receiving half of a [`LogicalStream`].
///
/// Does not keep the stream open: once every [`StreamWriter`] is gone the
/// stream closes and a blocked `recv` returns `StreamClosed`.
pub struct StreamReader {
    id: u32,
    inbound: Receiver<Inbound>,
    leftover: Bytes,
    finished: bool,
    session: Arc<Session>,
}

impl StreamReader {
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Next chunk from the peer (blocking).
    ///
    /// `Ok(None)` means the peer closed the stream. If the session ended the
    /// error is `ConnectionClosed`; if the stream was closed locally it is
    /// `StreamClosed`.
    pub fn recv(&mut self) -> Result<Option<Bytes>> {
        if let Some(pending) = self.take_leftover() {
            return Ok(Some(pending));
        }
        if self.finished {
            return Ok(None);
        }
        match self.inbound.recv() {
            Ok(inbound) => Ok(self.deliver(inbound)),
            Err(_) => Err(self.gone()),
        }
    }

    /// Tear down the whole session this stream runs on. Used when the peer
    /// breaks the protocol carried by the stream.
    pub fn close_session(&self, reason: &str) {
        self.session.terminate(reason);
    }

    /// Like [`recv`](Self::recv) but gives up with `Timeout`.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Bytes>> {
        if let Some(pending) = self.take_leftover() {
            return Ok(Some(pending));
        }
        if self.finished {
            return Ok(None);
        }
        match self.inbound.recv_timeout(timeout) {
            Ok(inbound) => Ok(self.deliver(inbound)),
            Err(RecvTimeoutError::Timeout) => Err(MuxError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(self.gone()),
        }
    }

    fn take_leftover(&mut self) -> Option<Bytes> {
        if self.leftover.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.leftover))
        }
    }

    fn deliver(&mut self, inbound: Inbound) -> Option<Bytes> {
        match inbound {
            Inbound::Data(bytes) => Some(bytes),
            Inbound::Closed => {
                self.finished = true;
                None
            }
        }
    }

    fn gone(&self) -> MuxError {
        if self.finished {
            return MuxError::StreamClosed { id: self.id };
        }
        self.session.closed_or(MuxError::StreamClosed { id: self.id })
    }
}

impl Read for StreamReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.leftover.is_empty() {
            match self.recv()? {
                Some(bytes) => self.leftover = bytes,
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.leftover.len());
        buf[..n].copy_from_slice(&self.leftover[..n]);
        self.leftover.advance(n);
        Ok(n)
    }
}

/// Sending half of a [`LogicalStream`]. Clones share the stream.
#[derive(Clone)]
pub struct StreamWriter {
    core: Arc<StreamCore>,
}

impl StreamWriter {
    pub fn id(&self) -> u32 {
        self.core.id
    }

    /// Send `data` to the peer. Large writes are split into several frames,
    /// all written before any other writer gets the connection.
    pub fn send(&self, data: &[u8]) -> Result<()> {
        let id = self.core.id;
        if self.core.closed.load(Ordering::Acquire) {
            return Err(MuxError::StreamClosed { id });
        }
        {
            let table = self.core.session.table();
            table.ensure_open()?;
            if !table.streams.contains_key(&id) {
                return Err(MuxError::StreamClosed { id });
            }
        }
        self.core.session.send_data(id, data)
    }

    pub fn close(&self) {
        self.core.close();
    }

    pub fn is_closed(&self) -> bool {
        self.core.closed.load(Ordering::Acquire)
    }

    pub fn handle(&self) -> StreamHandle {
        StreamHandle {
            id: self.core.id,
            core: Arc::downgrade(&self.core),
        }
    }
}

impl Write for StreamWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.send(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Closes a stream from elsewhere without keeping it open.
#[derive(Clone)]
pub struct StreamHandle {
    id: u32,
    core: Weak<StreamCore>,
}

impl StreamHandle {
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Close the stream if it is still open.
    pub fn close(&self) {
        if let Some(core) = self.core.upgrade() {
            core.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.core
            .upgrade()
            .map_or(true, |core| core.closed.load(Ordering::Acquire))
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}
