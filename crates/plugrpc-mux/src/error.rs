use std::time::Duration;

/// Errors that can occur in multiplexer operations.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// The session has ended; no stream on it can make progress.
    #[error("connection closed")]
    ConnectionClosed,

    /// The logical stream was closed by either side.
    #[error("stream {id} closed")]
    StreamClosed { id: u32 },

    /// A dial or accept did not complete in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// A pending accept was cancelled locally.
    #[error("accept cancelled")]
    Cancelled,

    /// The stream ID is already in use in this session.
    #[error("stream {0} is already open")]
    DuplicateStream(u32),

    /// The peer violated the session protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// `run` was called on a broker whose routing loop already started.
    #[error("routing loop already running")]
    AlreadyRunning,

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] plugrpc_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] plugrpc_frame::FrameError),

    /// Failed to start the routing thread.
    #[error("failed to spawn routing thread: {0}")]
    Spawn(std::io::Error),
}

impl MuxError {
    /// True for errors that mean the whole session is gone.
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, Self::ConnectionClosed)
    }
}

impl From<MuxError> for std::io::Error {
    fn from(err: MuxError) -> Self {
        let kind = match &err {
            MuxError::ConnectionClosed => std::io::ErrorKind::ConnectionAborted,
            MuxError::StreamClosed { .. } => std::io::ErrorKind::BrokenPipe,
            MuxError::Timeout(_) => std::io::ErrorKind::TimedOut,
            MuxError::Protocol(_) => std::io::ErrorKind::InvalidData,
            _ => std::io::ErrorKind::Other,
        };
        std::io::Error::new(kind, err)
    }
}

pub type Result<T> = std::result::Result<T, MuxError>;
