//! Interface traits, their proxies and their service adapters.
//!
//! Every interface comes in three parts:
//! - the trait, implemented by real objects on either side
//! - `XxxProxy`, which implements the trait by calling the peer
//! - `XxxService`, which serves a local implementation to the peer
//!
//! Interface-valued arguments travel as stream IDs. The proxy exports them
//! for the duration of the call; the service dials them and hands the
//! resulting proxies to the implementation, dropping them before it replies.

mod artifact;
mod build;
mod builder;
mod communicator;
mod datasource;
mod hook;
mod post_processor;
mod provisioner;
mod ui;

use plugrpc_mux::Broker;
use plugrpc_rpc::{Codec, Request, ServeError};
use serde::Serialize;

pub use artifact::{Artifact, ArtifactProxy};
pub use build::{Build, BuildProxy};
pub use builder::{Builder, BuilderProxy, PrepareOutcome};
pub use communicator::{CommandOutcome, Communicator, CommunicatorProxy, RemoteCommand};
pub use datasource::{Datasource, DatasourceProxy};
pub use hook::{Hook, HookProxy, HOOK_PROVISION};
pub use post_processor::{PostProcessOutcome, PostProcessor, PostProcessorProxy};
pub use provisioner::{Provisioner, ProvisionerProxy};
pub use ui::{Ui, UiProxy};

pub(crate) use artifact::ArtifactService;
pub(crate) use build::BuildService;
pub(crate) use builder::BuilderService;
pub(crate) use communicator::CommunicatorService;
pub(crate) use datasource::DatasourceService;
pub(crate) use hook::HookService;
pub(crate) use post_processor::PostProcessorService;
pub(crate) use provisioner::ProvisionerService;
pub(crate) use ui::UiService;

use crate::client::PluginClient;
use crate::error::Result;
use crate::export::{export, Export};
use crate::kind::LocalObject;

/// What a service adapter needs to reach objects passed as arguments.
#[derive(Clone)]
pub(crate) struct ServeContext {
    broker: Broker,
    codec: Codec,
}

impl ServeContext {
    pub(crate) fn new(broker: Broker, codec: Codec) -> Self {
        Self { broker, codec }
    }

    /// Connect to an object the caller exported.
    pub(crate) fn dial(&self, id: u32) -> std::result::Result<PluginClient, ServeError> {
        PluginClient::with_broker(&self.broker, id, self.codec).map_err(ServeError::failed)
    }

    /// Serve a result object back to the caller.
    pub(crate) fn export(&self, object: LocalObject) -> std::result::Result<Export, ServeError> {
        export(&self.broker, self.codec, object).map_err(ServeError::failed)
    }

    pub(crate) fn broker(&self) -> &Broker {
        &self.broker
    }
}

/// Encode the outcome of a local call as a reply.
pub(crate) fn reply<T: Serialize>(
    request: &Request<'_>,
    outcome: Result<T>,
) -> std::result::Result<Vec<u8>, ServeError> {
    let value = outcome.map_err(ServeError::failed)?;
    request.reply(&value)
}

pub(crate) fn no_such_method(method: &str) -> ServeError {
    ServeError::NoSuchMethod(method.to_string())
}
