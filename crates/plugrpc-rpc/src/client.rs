use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::codec::{Codec, RpcConnection};
use crate::error::{Result, RpcError, WireError};
use crate::record::{RecordReader, RecordWriter, RequestHeader, ResponseHeader};

type Reply = std::result::Result<Bytes, WireError>;

/// Why the connection stopped accepting calls.
#[derive(Debug, Clone)]
enum Ended {
    Closed,
    Mismatch { expected: u8, got: u8 },
    Protocol(String),
}

impl Ended {
    fn to_error(&self) -> RpcError {
        match self {
            Self::Closed => RpcError::ConnectionClosed,
            Self::Mismatch { expected, got } => RpcError::ProtocolMismatch {
                expected: *expected,
                got: *got,
            },
            Self::Protocol(msg) => RpcError::Protocol(msg.clone()),
        }
    }
}

#[derive(Default)]
struct Pending {
    calls: HashMap<u64, Sender<Reply>>,
    ended: Option<Ended>,
}

fn lock(pending: &Mutex<Pending>) -> MutexGuard<'_, Pending> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

struct ClientInner {
    codec: Codec,
    stream_id: u32,
    writer: RecordWriter,
    next_seq: AtomicU64,
    pending: Arc<Mutex<Pending>>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.writer.close();
    }
}

/// Calls methods on the endpoints served at the other end of one stream.
///
/// Any number of threads may call concurrently; replies are matched to
/// callers by sequence number, so a slow call never holds up a fast one.
/// Clones share the connection, which closes when the last clone drops.
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<ClientInner>,
}

impl RpcClient {
    /// Start a client on `conn`. Spawns the reply reader thread.
    pub fn new(conn: RpcConnection) -> Result<Self> {
        let stream_id = conn.stream_id();
        let (codec, reader, writer) = conn.into_parts();
        let pending = Arc::new(Mutex::new(Pending::default()));

        let reader_pending = Arc::clone(&pending);
        std::thread::Builder::new()
            .name(format!("plugrpc-rpc-client-{stream_id}"))
            .spawn(move || read_replies(codec, RecordReader::new(reader), &reader_pending))
            .map_err(|err| RpcError::Protocol(format!("failed to spawn reply reader: {err}")))?;

        debug!(stream_id, %codec, "rpc client started");
        Ok(Self {
            inner: Arc::new(ClientInner {
                codec,
                stream_id,
                writer: RecordWriter::new(codec, writer),
                next_seq: AtomicU64::new(1),
                pending,
            }),
        })
    }

    /// Call `service_method` (`"Endpoint.Method"`) and wait for the reply.
    pub fn call<A, R>(&self, service_method: &str, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.invoke(service_method, args, None)
    }

    /// Like [`call`](Self::call), giving up after `timeout`.
    ///
    /// The remote method keeps running; only the wait is abandoned.
    pub fn call_timeout<A, R>(&self, service_method: &str, args: &A, timeout: Duration) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.invoke(service_method, args, Some(timeout))
    }

    fn invoke<A, R>(&self, service_method: &str, args: &A, timeout: Option<Duration>) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let inner = &self.inner;
        let body = inner.codec.encode(args)?;
        let seq = inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = mpsc::channel();
        {
            let mut pending = lock(&inner.pending);
            if let Some(ended) = &pending.ended {
                return Err(ended.to_error());
            }
            pending.calls.insert(seq, reply_tx);
        }

        trace!(stream_id = inner.stream_id, seq, service_method, "call");
        let header = RequestHeader {
            seq,
            service_method: service_method.to_string(),
        };
        if let Err(err) = inner.writer.write(&header, &body) {
            lock(&inner.pending).calls.remove(&seq);
            return Err(err);
        }

        let reply = match timeout {
            None => reply_rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            Some(timeout) => reply_rx.recv_timeout(timeout),
        };
        match reply {
            Ok(Ok(body)) => inner.codec.decode(&body),
            Ok(Err(wire)) => Err(wire.into()),
            Err(RecvTimeoutError::Timeout) => {
                lock(&inner.pending).calls.remove(&seq);
                debug!(seq, service_method, "call timed out");
                Err(RpcError::Timeout(timeout.unwrap_or_default()))
            }
            Err(RecvTimeoutError::Disconnected) => Err(lock(&inner.pending)
                .ended
                .as_ref()
                .map_or(RpcError::ConnectionClosed, Ended::to_error)),
        }
    }

    pub fn codec(&self) -> Codec {
        self.inner.codec
    }

    pub fn stream_id(&self) -> u32 {
        self.inner.stream_id
    }

    /// Whether the connection has ended.
    pub fn is_closed(&self) -> bool {
        lock(&self.inner.pending).ended.is_some()
    }

    /// Close the stream for every clone. Pending calls fail with
    /// `ConnectionClosed`.
    pub fn close(&self) {
        self.inner.writer.close();
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("stream_id", &self.inner.stream_id)
            .field("codec", &self.inner.codec)
            .finish()
    }
}

fn read_replies(codec: Codec, mut records: RecordReader, pending: &Mutex<Pending>) {
    let ended = loop {
        let record = match records.next_record() {
            Ok(Some(record)) => record,
            Ok(None) | Err(RpcError::ConnectionClosed) => break Ended::Closed,
            Err(RpcError::Protocol(msg)) => {
                warn!(error = %msg, "malformed reply record");
                records.close_session("malformed rpc reply");
                break Ended::Protocol(msg);
            }
            Err(err) => {
                debug!(error = %err, "reply stream ended");
                break Ended::Closed;
            }
        };

        if record.tag != codec.tag() {
            warn!(
                expected = codec.tag(),
                got = record.tag,
                "reply encoded with a different codec"
            );
            break Ended::Mismatch {
                expected: codec.tag(),
                got: record.tag,
            };
        }

        let header: ResponseHeader = match codec.decode(&record.header) {
            Ok(header) => header,
            Err(err) => {
                warn!(error = %err, "undecodable reply header");
                records.close_session("undecodable rpc reply header");
                break Ended::Protocol(format!("undecodable reply header: {err}"));
            }
        };

        let waiter = lock(pending).calls.remove(&header.seq);
        match waiter {
            Some(waiter) => {
                let reply = match header.error {
                    Some(err) => Err(err),
                    None => Ok(record.body),
                };
                let _ = waiter.send(reply);
            }
            None => warn!(
                seq = header.seq,
                service_method = %header.service_method,
                "reply for unknown call"
            ),
        }
    };

    let mut pending = lock(pending);
    debug!(?ended, abandoned = pending.calls.len(), "rpc client reader finished");
    pending.ended = Some(ended);
    pending.calls.clear();
}
