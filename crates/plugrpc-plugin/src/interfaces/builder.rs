use std::sync::Arc;

use plugrpc_rpc::{ConfigSpec, ConfigValue, Request, ServeError, Service};
use serde::{Deserialize, Serialize};

use super::{
    no_such_method, reply, Artifact, ArtifactProxy, Hook, HookProxy, ServeContext, Ui, UiProxy,
};
use crate::client::PluginClient;
use crate::error::Result;
use crate::kind::{InterfaceKind, LocalObject};

/// What [`Builder::prepare`] learned from its configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrepareOutcome {
    /// Names of variables the builder will make available to provisioners.
    pub generated_vars: Vec<String>,
    pub warnings: Vec<String>,
}

/// Creates a machine image or other artifact.
pub trait Builder: Send + Sync {
    fn config_spec(&self) -> Result<ConfigSpec>;
    fn prepare(&self, configs: &[ConfigValue]) -> Result<PrepareOutcome>;
    /// Build, calling `hook` at the points provisioning should happen.
    /// Returns `None` when the build produced nothing.
    fn run(&self, ui: Arc<dyn Ui>, hook: Arc<dyn Hook>) -> Result<Option<Arc<dyn Artifact>>>;
}

#[derive(Serialize, Deserialize)]
struct BuilderRunArgs {
    ui: u32,
    hook: u32,
}

pub struct BuilderProxy {
    client: PluginClient,
}

impl BuilderProxy {
    pub fn new(client: PluginClient) -> Self {
        Self { client }
    }
}

impl Builder for BuilderProxy {
    fn config_spec(&self) -> Result<ConfigSpec> {
        self.client.call(InterfaceKind::Builder, "ConfigSpec", &())
    }

    fn prepare(&self, configs: &[ConfigValue]) -> Result<PrepareOutcome> {
        self.client.call(InterfaceKind::Builder, "Prepare", configs)
    }

    fn run(&self, ui: Arc<dyn Ui>, hook: Arc<dyn Hook>) -> Result<Option<Arc<dyn Artifact>>> {
        let ui = self.client.export(LocalObject::Ui(ui))?;
        let hook = self.client.export(LocalObject::Hook(hook))?;
        let args = BuilderRunArgs {
            ui: ui.id(),
            hook: hook.id(),
        };
        let artifact: Result<Option<u32>> = self.client.call(InterfaceKind::Builder, "Run", &args);
        ui.retire();
        hook.retire();

        match artifact? {
            Some(id) => {
                let client = PluginClient::with_broker(self.client.broker(), id, self.client.codec())?;
                Ok(Some(Arc::new(ArtifactProxy::new(client))))
            }
            None => Ok(None),
        }
    }
}

pub(crate) struct BuilderService {
    inner: Arc<dyn Builder>,
    ctx: ServeContext,
}

impl BuilderService {
    pub(crate) fn new(inner: Arc<dyn Builder>, ctx: ServeContext) -> Self {
        Self { inner, ctx }
    }
}

impl Service for BuilderService {
    fn call(&self, method: &str, request: &Request<'_>) -> std::result::Result<Vec<u8>, ServeError> {
        match method {
            "ConfigSpec" => reply(request, self.inner.config_spec()),
            "Prepare" => {
                let configs: Vec<ConfigValue> = request.args()?;
                reply(request, self.inner.prepare(&configs))
            }
            "Run" => {
                let args: BuilderRunArgs = request.args()?;
                let ui = UiProxy::new(self.ctx.dial(args.ui)?);
                let hook = HookProxy::new(self.ctx.dial(args.hook)?);
                let artifact = self
                    .inner
                    .run(Arc::new(ui), Arc::new(hook))
                    .map_err(ServeError::failed)?;

                let id = match artifact {
                    Some(artifact) => Some(self.ctx.export(LocalObject::Artifact(artifact))?.detach()),
                    None => None,
                };
                request.reply(&id)
            }
            other => Err(no_such_method(other)),
        }
    }
}
