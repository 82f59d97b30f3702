//! Plugin interfaces over a multiplexed RPC session.
//!
//! The core talks to a plugin through a [`PluginClient`]; the plugin answers
//! through a [`PluginServer`]. Interface-valued arguments and results (a UI,
//! a communicator, an artifact, ...) are never serialized: the side that owns
//! the object [`export`]s it on a fresh logical stream and sends only the
//! stream ID, and the other side dials that ID and talks to a proxy.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use plugrpc_plugin::{connect, Communicator, Provisioner, Ui};
//! use plugrpc_rpc::{Codec, ConfigValue};
//!
//! fn provision(ui: Arc<dyn Ui>, comm: Arc<dyn Communicator>) -> plugrpc_plugin::Result<()> {
//!     let plugin = connect("/tmp/plugin.sock", Codec::Compact)?;
//!     let provisioner = plugin.provisioner();
//!     provisioner.prepare(&[ConfigValue::map().with("inline", "echo hi")])?;
//!     provisioner.provision(ui, comm, &ConfigValue::Null)?;
//!     plugin.close();
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod export;
pub mod interfaces;
pub mod kind;
pub mod listener;
pub mod server;

pub use client::PluginClient;
pub use config::PluginConfig;
pub use error::{PluginError, Result};
pub use export::{export, Export};
pub use interfaces::{
    Artifact, ArtifactProxy, Build, BuildProxy, Builder, BuilderProxy, CommandOutcome,
    Communicator, CommunicatorProxy, Datasource, DatasourceProxy, Hook, HookProxy,
    PostProcessOutcome, PostProcessor, PostProcessorProxy, PrepareOutcome, Provisioner,
    ProvisionerProxy, RemoteCommand, Ui, UiProxy, HOOK_PROVISION,
};
pub use kind::{InterfaceKind, LocalObject, RemoteObject};
pub use listener::{connect, connect_with_config, PluginListener};
pub use server::PluginServer;
