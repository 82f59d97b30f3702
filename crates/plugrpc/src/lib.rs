//! Plugin RPC over a multiplexed IPC session.
//!
//! A core process and a plugin process share one connection. Many logical
//! streams run over it; stream 0 carries the plugin's RPC endpoints and every
//! object passed by reference gets a stream of its own.
//!
//! # Crate Structure
//!
//! - [`transport`]: duplex byte channels (Unix sockets, pipes, stdio)
//! - [`frame`]: stream-id tagged, length-prefixed framing
//! - [`mux`]: the stream broker
//! - [`rpc`]: request/response records, codecs, client and server
//! - [`plugin`]: plugin interfaces, proxies and session entry points

pub mod transport {
    pub use plugrpc_transport::*;
}

pub mod frame {
    pub use plugrpc_frame::*;
}

pub mod mux {
    pub use plugrpc_mux::*;
}

pub mod rpc {
    pub use plugrpc_rpc::*;
}

pub mod plugin {
    pub use plugrpc_plugin::*;
}

pub use plugrpc_plugin::{connect, PluginClient, PluginError, PluginListener, PluginServer};
pub use plugrpc_rpc::{Codec, ConfigValue};
