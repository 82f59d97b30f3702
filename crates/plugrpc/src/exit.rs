use std::fmt;
use std::io;

use plugrpc_mux::MuxError;
use plugrpc_plugin::PluginError;
use plugrpc_rpc::RpcError;
use plugrpc_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

fn rpc_error(context: &str, err: RpcError) -> CliError {
    let code = match &err {
        RpcError::ConnectionClosed | RpcError::Remote(_) => FAILURE,
        RpcError::Timeout(_) => TIMEOUT,
        RpcError::ProtocolMismatch { .. } | RpcError::Encode(_) | RpcError::Dispatch(_) => {
            DATA_INVALID
        }
        RpcError::Protocol(_) => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn plugin_error(context: &str, err: PluginError) -> CliError {
    match err {
        PluginError::Transport(err) => transport_error(context, err),
        PluginError::Rpc(err) => rpc_error(context, err),
        PluginError::Io(err) => io_error(context, err),
        PluginError::Mux(MuxError::Timeout(_)) => {
            CliError::new(TIMEOUT, format!("{context}: {err}"))
        }
        PluginError::Mux(MuxError::ConnectionClosed) | PluginError::Failed(_) => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}
