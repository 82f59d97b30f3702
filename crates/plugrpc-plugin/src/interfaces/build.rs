use std::sync::Arc;

use plugrpc_rpc::{Request, ServeError, Service};
use serde::{Deserialize, Serialize};

use super::{no_such_method, reply, Artifact, ArtifactProxy, ServeContext, Ui, UiProxy};
use crate::client::PluginClient;
use crate::error::Result;
use crate::kind::{InterfaceKind, LocalObject};

/// One configured build, as driven by the core.
pub trait Build: Send + Sync {
    fn name(&self) -> Result<String>;
    /// Prepare the build; returns warnings.
    fn prepare(&self) -> Result<Vec<String>>;
    fn run(&self, ui: Arc<dyn Ui>) -> Result<Vec<Arc<dyn Artifact>>>;
    fn set_debug(&self, debug: bool) -> Result<()>;
    fn set_force(&self, force: bool) -> Result<()>;
    /// What to do when a step fails, e.g. `"cleanup"` or `"abort"`.
    fn set_on_error(&self, mode: &str) -> Result<()>;
}

#[derive(Serialize, Deserialize)]
struct BuildRunArgs {
    ui: u32,
}

pub struct BuildProxy {
    client: PluginClient,
}

impl BuildProxy {
    pub fn new(client: PluginClient) -> Self {
        Self { client }
    }
}

impl Build for BuildProxy {
    fn name(&self) -> Result<String> {
        self.client.call(InterfaceKind::Build, "Name", &())
    }

    fn prepare(&self) -> Result<Vec<String>> {
        self.client.call(InterfaceKind::Build, "Prepare", &())
    }

    fn run(&self, ui: Arc<dyn Ui>) -> Result<Vec<Arc<dyn Artifact>>> {
        let ui = self.client.export(LocalObject::Ui(ui))?;
        let ids: Result<Vec<u32>> = self
            .client
            .call(InterfaceKind::Build, "Run", &BuildRunArgs { ui: ui.id() });
        ui.retire();

        let broker = self.client.broker();
        let codec = self.client.codec();
        ids?.into_iter()
            .map(|id| {
                let client = PluginClient::with_broker(broker, id, codec)?;
                Ok(Arc::new(ArtifactProxy::new(client)) as Arc<dyn Artifact>)
            })
            .collect()
    }

    fn set_debug(&self, debug: bool) -> Result<()> {
        self.client.call(InterfaceKind::Build, "SetDebug", &debug)
    }

    fn set_force(&self, force: bool) -> Result<()> {
        self.client.call(InterfaceKind::Build, "SetForce", &force)
    }

    fn set_on_error(&self, mode: &str) -> Result<()> {
        self.client.call(InterfaceKind::Build, "SetOnError", mode)
    }
}

pub(crate) struct BuildService {
    inner: Arc<dyn Build>,
    ctx: ServeContext,
}

impl BuildService {
    pub(crate) fn new(inner: Arc<dyn Build>, ctx: ServeContext) -> Self {
        Self { inner, ctx }
    }
}

impl Service for BuildService {
    fn call(&self, method: &str, request: &Request<'_>) -> std::result::Result<Vec<u8>, ServeError> {
        match method {
            "Name" => reply(request, self.inner.name()),
            "Prepare" => reply(request, self.inner.prepare()),
            "Run" => {
                let args: BuildRunArgs = request.args()?;
                let ui = UiProxy::new(self.ctx.dial(args.ui)?);
                let artifacts = self.inner.run(Arc::new(ui));
                let artifacts = artifacts.map_err(ServeError::failed)?;

                let mut ids = Vec::with_capacity(artifacts.len());
                for artifact in artifacts {
                    ids.push(self.ctx.export(LocalObject::Artifact(artifact))?.detach());
                }
                request.reply(&ids)
            }
            "SetDebug" => {
                let debug: bool = request.args()?;
                reply(request, self.inner.set_debug(debug))
            }
            "SetForce" => {
                let force: bool = request.args()?;
                reply(request, self.inner.set_force(force))
            }
            "SetOnError" => {
                let mode: String = request.args()?;
                reply(request, self.inner.set_on_error(&mode))
            }
            other => Err(no_such_method(other)),
        }
    }
}
