use plugrpc_mux::MuxError;
use plugrpc_rpc::RpcError;

/// Errors that can occur in plugin operations.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// An RPC call failed.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// Stream management failed.
    #[error("multiplexer error: {0}")]
    Mux(#[from] MuxError),

    /// Transport-level error while establishing a session.
    #[error("transport error: {0}")]
    Transport(#[from] plugrpc_transport::TransportError),

    /// A local implementation reported a failure.
    #[error("{0}")]
    Failed(String),

    /// An I/O error while moving file contents.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PluginError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    /// True when the session or the object's stream is gone.
    pub fn is_connection_closed(&self) -> bool {
        match self {
            Self::Rpc(err) => err.is_connection_closed(),
            Self::Mux(err) => matches!(err, MuxError::ConnectionClosed | MuxError::StreamClosed { .. }),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, PluginError>;
