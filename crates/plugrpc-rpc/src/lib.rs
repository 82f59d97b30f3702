//! RPC over logical streams.
//!
//! Each logical stream carries one RPC connection. Requests name an
//! `"Endpoint.Method"`; the serving side dispatches them to registered
//! [`Service`]s. Both directions use the same [`Codec`], chosen once per
//! session.
//!
//! # Example
//!
//! ```no_run
//! use plugrpc_mux::Broker;
//! use plugrpc_rpc::{Codec, RpcClient};
//!
//! fn greet(broker: &Broker) -> plugrpc_rpc::Result<String> {
//!     let stream = broker.dial(0)?;
//!     let client = RpcClient::new(Codec::Compact.connect(stream))?;
//!     client.call("Ui.Ask", &"name?".to_string())
//! }
//! ```

pub mod client;
pub mod codec;
pub mod error;
pub mod record;
pub mod server;
pub mod value;

pub use client::RpcClient;
pub use codec::{Codec, RpcConnection};
pub use error::{DispatchError, Result, RpcError, WireError};
pub use record::{RequestHeader, ResponseHeader};
pub use server::{Request, RpcServer, ServeError, Service};
pub use value::{check_config, AttributeSpec, ConfigSpec, ConfigValue, ValueType};
