//! Serving a local object on a fresh logical stream.
//!
//! ```text
//!   export()            peer dials            retire()
//! ──────────▶ Serving ─────────────▶ Dialed ───────────▶ Retired
//!                │                                          ▲
//!                └──────────── retire() / accept timeout ───┘
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use plugrpc_mux::{Broker, StreamHandle};
use plugrpc_rpc::{Codec, RpcServer};
use tracing::{debug, trace};

use crate::error::{PluginError, Result};
use crate::interfaces::ServeContext;
use crate::kind::{InterfaceKind, LocalObject};

enum ExportState {
    Serving,
    Dialed(StreamHandle),
    Retired,
}

fn lock(state: &Mutex<ExportState>) -> MutexGuard<'_, ExportState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Serve `object` on a newly allocated stream.
///
/// The returned [`Export`]'s [`id`](Export::id) is what goes on the wire in
/// place of the object. The peer has `BrokerConfig::accept_timeout` to dial
/// it.
pub fn export(broker: &Broker, codec: Codec, object: LocalObject) -> Result<Export> {
    let id = broker.next_id();
    let kind = object.kind();
    let state = Arc::new(Mutex::new(ExportState::Serving));

    let mut server = RpcServer::new();
    server.register(
        kind.endpoint_name(),
        object.into_service(ServeContext::new(broker.clone(), codec)),
    );

    let thread_broker = broker.clone();
    let thread_state = Arc::clone(&state);
    let thread = std::thread::Builder::new()
        .name(format!("plugrpc-export-{kind}-{id}"))
        .spawn(move || serve_export(&thread_broker, id, kind, codec, &server, &thread_state))
        .map_err(|err| PluginError::failed(format!("failed to spawn export thread: {err}")))?;

    trace!(stream_id = id, %kind, "exported");
    Ok(Export {
        id,
        kind,
        broker: broker.clone(),
        state,
        thread: Some(thread),
        detached: false,
    })
}

fn serve_export(
    broker: &Broker,
    id: u32,
    kind: InterfaceKind,
    codec: Codec,
    server: &RpcServer,
    state: &Mutex<ExportState>,
) {
    let stream = match broker.accept(id) {
        Ok(stream) => stream,
        Err(err) => {
            debug!(stream_id = id, %kind, error = %err, "export never dialed");
            *lock(state) = ExportState::Retired;
            return;
        }
    };

    {
        let mut state = lock(state);
        if matches!(*state, ExportState::Retired) {
            stream.close();
            return;
        }
        *state = ExportState::Dialed(stream.handle());
    }

    if let Err(err) = server.serve(codec.connect(stream)) {
        debug!(stream_id = id, %kind, error = %err, "export stream failed");
    }
    *lock(state) = ExportState::Retired;
    trace!(stream_id = id, %kind, "export finished");
}

/// A local object being served to the peer.
///
/// Dropping an `Export` retires it. Use [`detach`](Self::detach) for objects
/// returned as results, whose lifetime the peer decides.
pub struct Export {
    id: u32,
    kind: InterfaceKind,
    broker: Broker,
    state: Arc<Mutex<ExportState>>,
    thread: Option<JoinHandle<()>>,
    detached: bool,
}

impl Export {
    /// Stream ID to send in place of the object.
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn kind(&self) -> InterfaceKind {
        self.kind
    }

    pub fn is_retired(&self) -> bool {
        matches!(*lock(&self.state), ExportState::Retired)
    }

    /// Stop serving and wait for the serving thread.
    ///
    /// A never-dialed export is cancelled; a dialed one has its stream
    /// closed, so the peer's proxy fails with `ConnectionClosed` from then on.
    pub fn retire(mut self) {
        self.shut_down();
    }

    /// Leave the object served until the peer closes its proxy or the
    /// session ends.
    pub fn detach(mut self) -> u32 {
        self.detached = true;
        self.thread.take();
        self.id
    }

    fn shut_down(&mut self) {
        if self.detached {
            return;
        }
        let Some(thread) = self.thread.take() else {
            return;
        };
        let previous = std::mem::replace(&mut *lock(&self.state), ExportState::Retired);
        match previous {
            ExportState::Serving => {
                self.broker.cancel_accept(self.id);
            }
            ExportState::Dialed(handle) => handle.close(),
            ExportState::Retired => {}
        }
        let _ = thread.join();
        trace!(stream_id = self.id, kind = %self.kind, "export retired");
    }
}

impl Drop for Export {
    fn drop(&mut self) {
        self.shut_down();
    }
}

impl std::fmt::Debug for Export {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Export")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("retired", &self.is_retired())
            .field("detached", &self.detached)
            .finish()
    }
}
