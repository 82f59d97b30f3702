use std::sync::Arc;

use plugrpc_rpc::{ConfigValue, Request, ServeError, Service};

use super::{no_such_method, reply};
use crate::client::PluginClient;
use crate::error::Result;
use crate::kind::InterfaceKind;

/// The output of a build.
pub trait Artifact: Send + Sync {
    /// ID of the builder that produced this artifact.
    fn builder_id(&self) -> Result<String>;
    fn files(&self) -> Result<Vec<String>>;
    fn id(&self) -> Result<String>;
    /// Human-readable summary.
    fn description(&self) -> Result<String>;
    /// Builder-specific state stored under `name`, or `Null`.
    fn state(&self, name: &str) -> Result<ConfigValue>;
    fn destroy(&self) -> Result<()>;
}

pub struct ArtifactProxy {
    client: PluginClient,
}

impl ArtifactProxy {
    pub fn new(client: PluginClient) -> Self {
        Self { client }
    }

    /// Stream the artifact is reached on.
    pub fn stream_id(&self) -> u32 {
        self.client.stream_id()
    }
}

impl Artifact for ArtifactProxy {
    fn builder_id(&self) -> Result<String> {
        self.client.call(InterfaceKind::Artifact, "BuilderId", &())
    }

    fn files(&self) -> Result<Vec<String>> {
        self.client.call(InterfaceKind::Artifact, "Files", &())
    }

    fn id(&self) -> Result<String> {
        self.client.call(InterfaceKind::Artifact, "Id", &())
    }

    fn description(&self) -> Result<String> {
        self.client.call(InterfaceKind::Artifact, "String", &())
    }

    fn state(&self, name: &str) -> Result<ConfigValue> {
        self.client.call(InterfaceKind::Artifact, "State", name)
    }

    fn destroy(&self) -> Result<()> {
        self.client.call(InterfaceKind::Artifact, "Destroy", &())
    }
}

pub(crate) struct ArtifactService {
    inner: Arc<dyn Artifact>,
}

impl ArtifactService {
    pub(crate) fn new(inner: Arc<dyn Artifact>) -> Self {
        Self { inner }
    }
}

impl Service for ArtifactService {
    fn call(&self, method: &str, request: &Request<'_>) -> std::result::Result<Vec<u8>, ServeError> {
        match method {
            "BuilderId" => reply(request, self.inner.builder_id()),
            "Files" => reply(request, self.inner.files()),
            "Id" => reply(request, self.inner.id()),
            "String" => reply(request, self.inner.description()),
            "State" => {
                let name: String = request.args()?;
                reply(request, self.inner.state(&name))
            }
            "Destroy" => reply(request, self.inner.destroy()),
            other => Err(no_such_method(other)),
        }
    }
}
