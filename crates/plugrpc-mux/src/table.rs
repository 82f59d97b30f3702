//! Routing state shared by the routing loop and callers.
//!
//! Everything here runs under the broker's table lock. Nothing in this module
//! touches the transport: the routing loop only reads, and any frame that has
//! to go out in response is written by the caller that needs it.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::mpsc::{self, Receiver, Sender};

use bytes::Bytes;
use plugrpc_frame::stream::is_reserved;
use plugrpc_frame::{ControlFrame, ControlKind};
use tracing::{debug, trace};

use crate::config::Role;
use crate::error::{MuxError, Result};

/// What the routing loop hands to a stream's reader.
#[derive(Debug)]
pub(crate) enum Inbound {
    Data(Bytes),
    /// The peer closed the stream. Nothing follows.
    Closed,
}

/// Peer's answer to a dial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DialAck {
    Accepted,
    Refused,
}

pub(crate) enum Route {
    /// `Open` sent, waiting for the peer's `Accept`.
    Dialing {
        inbound: Sender<Inbound>,
        ack: Sender<DialAck>,
    },
    Live {
        inbound: Sender<Inbound>,
    },
}

/// How many retired IDs of the peer's numbering are remembered. Late frames
/// for anything older are treated as unknown.
pub(crate) const RETIRED_MEMORY: usize = 4096;

/// Retired IDs this side did not allocate, oldest forgotten first.
#[derive(Default)]
struct RecentIds {
    order: VecDeque<u32>,
    ids: HashSet<u32>,
}

impl RecentIds {
    fn insert(&mut self, id: u32) {
        if !self.ids.insert(id) {
            return;
        }
        self.order.push_back(id);
        if self.order.len() > RETIRED_MEMORY {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }

    fn contains(&self, id: u32) -> bool {
        self.ids.contains(&id)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.order.len()
    }
}

pub(crate) struct RouteTable {
    first_id: u32,
    next_id: u32,
    /// IDs from `allocate` that have not been retired yet. Every other ID
    /// below the high-water mark `next_id` is retired.
    outstanding: HashSet<u32>,
    pub(crate) streams: HashMap<u32, Route>,
    /// Peer opens nobody has accepted yet.
    pub(crate) pending_opens: HashSet<u32>,
    pub(crate) accept_waiters: HashMap<u32, Sender<Receiver<Inbound>>>,
    /// Closed, refused or abandoned IDs outside our own allocation range.
    retired: RecentIds,
    closed: Option<String>,
}

impl RouteTable {
    pub(crate) fn new(role: Role) -> Self {
        Self {
            first_id: role.first_id(),
            next_id: role.first_id(),
            outstanding: HashSet::new(),
            streams: HashMap::new(),
            pending_opens: HashSet::new(),
            accept_waiters: HashMap::new(),
            retired: RecentIds::default(),
            closed: None,
        }
    }

    /// Hand out the next ID of this side's parity.
    pub(crate) fn allocate(&mut self) -> u32 {
        let mut id = self.next_id;
        while is_reserved(id) {
            id = id.wrapping_add(2);
        }
        self.next_id = id.wrapping_add(2);
        self.outstanding.insert(id);
        id
    }

    /// Whether `id` came from [`allocate`](Self::allocate).
    fn allocated(&self, id: u32) -> bool {
        id % 2 == self.first_id % 2 && id >= self.first_id && id < self.next_id
    }

    /// Closed, refused or abandoned; never routed again.
    pub(crate) fn is_retired(&self, id: u32) -> bool {
        if self.allocated(id) {
            !self.outstanding.contains(&id)
        } else {
            self.retired.contains(id)
        }
    }

    fn mark_retired(&mut self, id: u32) {
        if self.allocated(id) {
            self.outstanding.remove(&id);
        } else {
            self.retired.insert(id);
        }
    }

    /// Entries held to answer [`is_retired`](Self::is_retired).
    #[cfg(test)]
    pub(crate) fn retired_entries(&self) -> usize {
        self.outstanding.len() + self.retired.len()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.is_some()
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(MuxError::ConnectionClosed)
        } else {
            Ok(())
        }
    }

    /// Whether `id` is routed, pending, or awaited in either direction.
    pub(crate) fn in_use(&self, id: u32) -> bool {
        self.streams.contains_key(&id)
            || self.pending_opens.contains(&id)
            || self.accept_waiters.contains_key(&id)
    }

    /// Register a live route and return its receiving end.
    pub(crate) fn insert_live(&mut self, id: u32) -> Receiver<Inbound> {
        let (inbound, rx) = mpsc::channel();
        self.streams.insert(id, Route::Live { inbound });
        rx
    }

    /// Drop the route for `id` and remember it as retired.
    ///
    /// Returns true if a route was removed.
    pub(crate) fn retire(&mut self, id: u32) -> bool {
        self.mark_retired(id);
        self.pending_opens.remove(&id);
        self.accept_waiters.remove(&id);
        self.streams.remove(&id).is_some()
    }

    pub(crate) fn route_data(&mut self, id: u32, payload: Bytes) -> Result<()> {
        match self.streams.get(&id) {
            Some(Route::Live { inbound }) => {
                if inbound.send(Inbound::Data(payload)).is_err() {
                    trace!(stream_id = id, "reader dropped, discarding data");
                }
                Ok(())
            }
            Some(Route::Dialing { .. }) => Err(MuxError::Protocol(format!(
                "data on stream {id} before it was accepted"
            ))),
            None if self.is_retired(id) => {
                trace!(stream_id = id, "discarding data for retired stream");
                Ok(())
            }
            None => Err(MuxError::Protocol(format!(
                "data for stream {id} that was never opened"
            ))),
        }
    }

    pub(crate) fn route_control(&mut self, control: ControlFrame) -> Result<()> {
        let id = control.stream_id;
        match control.kind {
            ControlKind::Open => self.on_open(id),
            ControlKind::Accept => self.on_accept(id),
            ControlKind::Close => {
                self.on_close(id);
                Ok(())
            }
        }
    }

    fn on_open(&mut self, id: u32) -> Result<()> {
        if self.streams.contains_key(&id) || self.pending_opens.contains(&id) {
            return Err(MuxError::Protocol(format!(
                "open for stream {id} which is already open"
            )));
        }
        if self.is_retired(id) {
            // Close has already been sent for it, which fails the peer's dial.
            debug!(stream_id = id, "ignoring open for retired stream");
            return Ok(());
        }

        match self.accept_waiters.remove(&id) {
            Some(waiter) => {
                let rx = self.insert_live(id);
                if waiter.send(rx).is_err() {
                    self.streams.remove(&id);
                    self.pending_opens.insert(id);
                }
            }
            None => {
                trace!(stream_id = id, "queueing open until accepted");
                self.pending_opens.insert(id);
            }
        }
        Ok(())
    }

    fn on_accept(&mut self, id: u32) -> Result<()> {
        match self.streams.remove(&id) {
            Some(Route::Dialing { inbound, ack }) => {
                self.streams.insert(id, Route::Live { inbound });
                let _ = ack.send(DialAck::Accepted);
                Ok(())
            }
            Some(live @ Route::Live { .. }) => {
                self.streams.insert(id, live);
                Err(MuxError::Protocol(format!(
                    "accept for stream {id} which is already live"
                )))
            }
            None if self.is_retired(id) => {
                debug!(stream_id = id, "ignoring accept for abandoned dial");
                Ok(())
            }
            None => Err(MuxError::Protocol(format!(
                "accept for stream {id} which was never dialed"
            ))),
        }
    }

    fn on_close(&mut self, id: u32) {
        match self.streams.remove(&id) {
            Some(Route::Live { inbound }) => {
                debug!(stream_id = id, "peer closed stream");
                let _ = inbound.send(Inbound::Closed);
            }
            Some(Route::Dialing { ack, .. }) => {
                debug!(stream_id = id, "peer refused dial");
                let _ = ack.send(DialAck::Refused);
            }
            None => {
                trace!(stream_id = id, "close for stream with no route");
            }
        }
        self.pending_opens.remove(&id);
        self.accept_waiters.remove(&id);
        self.mark_retired(id);
    }

    /// Mark the session closed and drop every route.
    ///
    /// Dropping the senders wakes every blocked dial, accept and read. Returns
    /// false if the table was already torn down.
    pub(crate) fn teardown(&mut self, reason: &str) -> bool {
        if self.closed.is_some() {
            return false;
        }
        debug!(
            reason,
            streams = self.streams.len(),
            waiters = self.accept_waiters.len(),
            "tearing down routing table"
        );
        self.closed = Some(reason.to_string());
        self.streams.clear();
        self.pending_opens.clear();
        self.accept_waiters.clear();
        true
    }
}
