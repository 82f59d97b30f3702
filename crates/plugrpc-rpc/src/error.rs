use std::time::Duration;

use plugrpc_mux::MuxError;
use serde::{Deserialize, Serialize};

/// Errors returned by RPC calls and servers.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The stream or the whole session ended.
    #[error("connection closed")]
    ConnectionClosed,

    /// The caller's timeout elapsed before a reply arrived.
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// Malformed traffic on the RPC stream.
    #[error("rpc protocol error: {0}")]
    Protocol(String),

    /// The two ends do not speak the same codec.
    #[error("codec mismatch: expected tag {expected:#04x}, got {got:#04x}")]
    ProtocolMismatch { expected: u8, got: u8 },

    /// The peer could not route the request.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// The remote implementation returned an error.
    #[error("remote error: {0}")]
    Remote(String),

    /// A value could not be encoded or decoded.
    #[error("codec error: {0}")]
    Encode(String),
}

impl RpcError {
    /// The remote side ran the method and it failed.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }

    /// The connection is gone; retrying on it is pointless.
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, Self::ConnectionClosed)
    }

    /// The request never reached an implementation.
    pub fn is_dispatch(&self) -> bool {
        matches!(self, Self::Dispatch(_))
    }
}

/// Why a request could not be dispatched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("no such endpoint: {0}")]
    NoSuchEndpoint(String),

    #[error("no such method: {0}")]
    NoSuchMethod(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
}

impl From<MuxError> for RpcError {
    fn from(err: MuxError) -> Self {
        match err {
            MuxError::ConnectionClosed | MuxError::StreamClosed { .. } => Self::ConnectionClosed,
            MuxError::Timeout(timeout) => Self::Timeout(timeout),
            other => Self::Protocol(other.to_string()),
        }
    }
}

/// Error carried in a response header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireError {
    NoSuchEndpoint(String),
    NoSuchMethod(String),
    InvalidArguments(String),
    Remote(String),
    ProtocolMismatch { expected: u8, got: u8 },
}

impl From<WireError> for RpcError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::NoSuchEndpoint(name) => DispatchError::NoSuchEndpoint(name).into(),
            WireError::NoSuchMethod(name) => DispatchError::NoSuchMethod(name).into(),
            WireError::InvalidArguments(msg) => DispatchError::InvalidArguments(msg).into(),
            WireError::Remote(msg) => Self::Remote(msg),
            // The peer reports what it expected; from our side the roles swap.
            WireError::ProtocolMismatch { expected, got } => Self::ProtocolMismatch {
                expected: got,
                got: expected,
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;
