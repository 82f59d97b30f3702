use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use plugrpc_frame::{
    stream_name, ControlFrame, FrameError, FrameReader, FrameWriter, CONTROL_STREAM,
};
use plugrpc_transport::{IpcStream, ReadHalf, ShutdownHandle, WriteHalf};
use tracing::{debug, info, trace, warn};

use crate::config::{BrokerConfig, Role};
use crate::error::{MuxError, Result};
use crate::stream::LogicalStream;
use crate::table::{DialAck, Inbound, Route, RouteTable};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared by the broker, its routing loop and every logical stream.
pub(crate) struct Session {
    pub(crate) role: Role,
    pub(crate) config: BrokerConfig,
    table: Mutex<RouteTable>,
    writer: Mutex<FrameWriter<WriteHalf>>,
    shutdown: ShutdownHandle,
}

impl Session {
    pub(crate) fn table(&self) -> MutexGuard<'_, RouteTable> {
        lock(&self.table)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.table().is_closed()
    }

    /// Error for a stream whose channel went away: the whole session if it
    /// ended, otherwise `fallback`.
    pub(crate) fn closed_or(&self, fallback: MuxError) -> MuxError {
        if self.is_closed() {
            MuxError::ConnectionClosed
        } else {
            fallback
        }
    }

    pub(crate) fn send_control(&self, control: ControlFrame) -> Result<()> {
        let result = lock(&self.writer).send_control(control);
        result.map_err(|err| self.write_failed(err))
    }

    /// Write `payload` on stream `id`, split into frames of at most
    /// `max_payload_size` bytes. The frames of one call are never interleaved
    /// with another writer's.
    pub(crate) fn send_data(&self, id: u32, payload: &[u8]) -> Result<()> {
        if payload.is_empty() {
            return Ok(());
        }
        let chunk = self.config.max_payload_size.max(1);
        let mut writer = lock(&self.writer);
        let result = payload
            .chunks(chunk)
            .try_for_each(|part| writer.send(id, part));
        drop(writer);
        trace!(stream_id = id, len = payload.len(), "sent data");
        result.map_err(|err| self.write_failed(err))
    }

    fn write_failed(&self, err: FrameError) -> MuxError {
        if !self.is_closed() {
            warn!(error = %err, "write to transport failed, closing session");
            self.terminate("transport write failed");
        }
        MuxError::ConnectionClosed
    }

    /// Tear down routing state and the transport. Safe to call repeatedly.
    pub(crate) fn terminate(&self, reason: &str) {
        let first = self.table().teardown(reason);
        if first {
            info!(role = %self.role, reason, "session closed");
        }
        if let Err(err) = self.shutdown.shutdown() {
            debug!(error = %err, "transport shutdown failed");
        }
    }
}

/// Multiplexes logical streams over one physical connection.
///
/// Cloning is cheap; all clones drive the same session. The routing loop
/// ([`run`](Self::run) or [`spawn`](Self::spawn)) must be running for dials,
/// accepts and reads to make progress.
#[derive(Clone)]
pub struct Broker {
    session: Arc<Session>,
    reader: Arc<Mutex<Option<FrameReader<ReadHalf>>>>,
}

impl Broker {
    /// Wrap a transport. The routing loop is not started.
    pub fn new(transport: IpcStream, role: Role, config: BrokerConfig) -> Result<Self> {
        let kind = transport.kind();
        let (read_half, write_half, shutdown) = transport.into_split()?;
        let reader = FrameReader::with_config(read_half, config.frame.clone());
        let writer = FrameWriter::with_config(write_half, config.frame.clone());
        debug!(%role, transport = kind, "broker created");

        Ok(Self {
            session: Arc::new(Session {
                role,
                table: Mutex::new(RouteTable::new(role)),
                writer: Mutex::new(writer),
                shutdown,
                config,
            }),
            reader: Arc::new(Mutex::new(Some(reader))),
        })
    }

    /// Run the routing loop on the calling thread.
    ///
    /// Returns `Ok(())` when the transport reaches EOF or the broker is closed
    /// locally, and an error on a framing, protocol or I/O failure. Either way
    /// the session is torn down before this returns.
    pub fn run(&self) -> Result<()> {
        let mut reader = lock(&self.reader)
            .take()
            .ok_or(MuxError::AlreadyRunning)?;
        info!(role = %self.session.role, "routing loop started");

        let outcome = loop {
            let frame = match reader.read_frame() {
                Ok(frame) => frame,
                Err(FrameError::ConnectionClosed) => break Ok(()),
                Err(_) if self.session.is_closed() => break Ok(()),
                Err(err) => break Err(MuxError::from(err)),
            };

            let routed = if frame.stream_id == CONTROL_STREAM {
                ControlFrame::decode(&frame.payload)
                    .map_err(MuxError::from)
                    .and_then(|control| {
                        trace!(kind = ?control.kind, stream_id = control.stream_id, "control");
                        self.session.table().route_control(control)
                    })
            } else {
                self.session
                    .table()
                    .route_data(frame.stream_id, frame.payload)
            };
            if let Err(err) = routed {
                break Err(err);
            }
        };

        match &outcome {
            Ok(()) => self.session.terminate("transport closed"),
            Err(err) => {
                warn!(role = %self.session.role, error = %err, "routing loop failed");
                self.session.terminate("routing error");
            }
        }
        outcome
    }

    /// Run the routing loop on a dedicated thread.
    pub fn spawn(&self) -> Result<JoinHandle<Result<()>>> {
        let broker = self.clone();
        std::thread::Builder::new()
            .name(format!("plugrpc-mux-{}", self.session.role))
            .spawn(move || broker.run())
            .map_err(MuxError::Spawn)
    }

    /// Allocate a fresh stream ID with this side's parity.
    pub fn next_id(&self) -> u32 {
        self.session.table().allocate()
    }

    /// Open stream `id` and wait for the peer to accept it.
    pub fn dial(&self, id: u32) -> Result<LogicalStream> {
        if id == CONTROL_STREAM {
            return Err(MuxError::Protocol(format!(
                "stream {id} is reserved for control frames"
            )));
        }

        let (inbound_tx, inbound) = mpsc::channel();
        let (ack_tx, ack) = mpsc::channel();
        {
            let mut table = self.session.table();
            table.ensure_open()?;
            if table.in_use(id) {
                return Err(MuxError::DuplicateStream(id));
            }
            if table.is_retired(id) {
                return Err(MuxError::StreamClosed { id });
            }
            table.streams.insert(
                id,
                Route::Dialing {
                    inbound: inbound_tx,
                    ack: ack_tx,
                },
            );
        }

        debug!(stream_id = id, stream = stream_name(id), "dialing");
        self.session.send_control(ControlFrame::open(id))?;

        let answer = match self.session.config.dial_timeout {
            None => ack.recv().ok(),
            Some(timeout) => match ack.recv_timeout(timeout) {
                Ok(answer) => Some(answer),
                Err(RecvTimeoutError::Disconnected) => None,
                Err(RecvTimeoutError::Timeout) => {
                    return self.abandon_dial(id, inbound, timeout);
                }
            },
        };

        match answer {
            Some(DialAck::Accepted) => {
                debug!(stream_id = id, "dial accepted");
                Ok(LogicalStream::new(id, inbound, Arc::clone(&self.session)))
            }
            Some(DialAck::Refused) => Err(MuxError::StreamClosed { id }),
            None => Err(MuxError::ConnectionClosed),
        }
    }

    fn abandon_dial(
        &self,
        id: u32,
        inbound: Receiver<Inbound>,
        timeout: Duration,
    ) -> Result<LogicalStream> {
        let mut table = self.session.table();
        table.ensure_open()?;
        if let Some(Route::Live { .. }) = table.streams.get(&id) {
            // Accept landed between the timeout and taking the lock.
            return Ok(LogicalStream::new(id, inbound, Arc::clone(&self.session)));
        }
        table.retire(id);
        drop(table);

        warn!(stream_id = id, ?timeout, "dial timed out");
        let _ = self.session.send_control(ControlFrame::close(id));
        Err(MuxError::Timeout(timeout))
    }

    /// Accept stream `id` once the peer dials it, waiting at most
    /// `BrokerConfig::accept_timeout`.
    pub fn accept(&self, id: u32) -> Result<LogicalStream> {
        self.accept_with_timeout(id, Some(self.session.config.accept_timeout))
    }

    /// Accept stream `id` with an explicit bound; `None` waits until the peer
    /// dials or the session ends.
    ///
    /// A timed-out or cancelled accept retires the ID and tells the peer, so
    /// a late dial fails instead of hanging.
    pub fn accept_with_timeout(
        &self,
        id: u32,
        timeout: Option<Duration>,
    ) -> Result<LogicalStream> {
        if id == CONTROL_STREAM {
            return Err(MuxError::Protocol(format!(
                "stream {id} is reserved for control frames"
            )));
        }

        let waiting = {
            let mut table = self.session.table();
            table.ensure_open()?;
            if table.streams.contains_key(&id) || table.accept_waiters.contains_key(&id) {
                return Err(MuxError::DuplicateStream(id));
            }
            if table.is_retired(id) {
                return Err(MuxError::StreamClosed { id });
            }
            if table.pending_opens.remove(&id) {
                let inbound = table.insert_live(id);
                drop(table);
                return self.acknowledge(id, inbound);
            }
            let (waiter, waiting) = mpsc::channel();
            table.accept_waiters.insert(id, waiter);
            waiting
        };

        trace!(stream_id = id, ?timeout, "waiting for peer to open");
        let received = match timeout {
            None => waiting.recv().map_err(|_| RecvTimeoutError::Disconnected),
            Some(timeout) => waiting.recv_timeout(timeout),
        };

        match received {
            Ok(inbound) => self.acknowledge(id, inbound),
            Err(RecvTimeoutError::Disconnected) => {
                Err(self.session.closed_or(MuxError::Cancelled))
            }
            Err(RecvTimeoutError::Timeout) => {
                let mut table = self.session.table();
                if table.accept_waiters.remove(&id).is_some() {
                    table.retire(id);
                    drop(table);
                    let timeout = timeout.unwrap_or_default();
                    warn!(stream_id = id, ?timeout, "accept timed out");
                    let _ = self.session.send_control(ControlFrame::close(id));
                    return Err(MuxError::Timeout(timeout));
                }
                drop(table);
                match waiting.try_recv() {
                    Ok(inbound) => self.acknowledge(id, inbound),
                    Err(_) => Err(self.session.closed_or(MuxError::Cancelled)),
                }
            }
        }
    }

    fn acknowledge(&self, id: u32, inbound: Receiver<Inbound>) -> Result<LogicalStream> {
        self.session.send_control(ControlFrame::accept(id))?;
        debug!(stream_id = id, stream = stream_name(id), "accepted");
        Ok(LogicalStream::new(id, inbound, Arc::clone(&self.session)))
    }

    /// Give up on accepting `id`.
    ///
    /// A blocked `accept(id)` returns `Cancelled`, a peer still dialing the
    /// ID is refused, and the ID is never routed again. Returns false if the
    /// stream was already accepted (close it instead) or the session ended.
    pub fn cancel_accept(&self, id: u32) -> bool {
        let mut table = self.session.table();
        if table.is_closed() || table.streams.contains_key(&id) {
            return false;
        }
        let had_waiter = table.accept_waiters.contains_key(&id);
        let newly_retired = !table.is_retired(id);
        table.retire(id);
        drop(table);

        if newly_retired {
            debug!(stream_id = id, had_waiter, "accept cancelled");
            let _ = self.session.send_control(ControlFrame::close(id));
        }
        had_waiter
    }

    /// Close the session: shut the transport down and fail every pending or
    /// future operation with `ConnectionClosed`. Idempotent.
    pub fn close(&self) {
        self.session.terminate("closed locally");
    }

    pub fn is_closed(&self) -> bool {
        self.session.is_closed()
    }

    /// Number of routed streams, including ones still being dialed.
    pub fn live_streams(&self) -> usize {
        self.session.table().streams.len()
    }

    pub fn role(&self) -> Role {
        self.session.role
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.session.config
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("role", &self.session.role)
            .field("live_streams", &self.live_streams())
            .field("closed", &self.is_closed())
            .finish()
    }
}
