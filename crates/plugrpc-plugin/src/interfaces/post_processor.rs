use std::sync::Arc;

use plugrpc_rpc::{ConfigSpec, ConfigValue, Request, ServeError, Service};
use serde::{Deserialize, Serialize};

use super::{no_such_method, reply, Artifact, ArtifactProxy, ServeContext, Ui, UiProxy};
use crate::client::PluginClient;
use crate::error::Result;
use crate::kind::{InterfaceKind, LocalObject};

/// Result of [`PostProcessor::post_process`].
pub struct PostProcessOutcome {
    pub artifact: Arc<dyn Artifact>,
    /// Keep the input artifact rather than letting the core destroy it.
    pub keep: bool,
    /// Force `keep` regardless of what the user configured.
    pub force_override: bool,
}

impl std::fmt::Debug for PostProcessOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostProcessOutcome")
            .field("keep", &self.keep)
            .field("force_override", &self.force_override)
            .finish_non_exhaustive()
    }
}

/// Turns one artifact into another (compression, upload, ...).
pub trait PostProcessor: Send + Sync {
    fn config_spec(&self) -> Result<ConfigSpec>;
    fn configure(&self, configs: &[ConfigValue]) -> Result<()>;
    fn post_process(&self, ui: Arc<dyn Ui>, artifact: Arc<dyn Artifact>) -> Result<PostProcessOutcome>;
}

#[derive(Serialize, Deserialize)]
struct PostProcessArgs {
    ui: u32,
    artifact: u32,
}

#[derive(Serialize, Deserialize)]
struct PostProcessReply {
    artifact: u32,
    keep: bool,
    force_override: bool,
}

pub struct PostProcessorProxy {
    client: PluginClient,
}

impl PostProcessorProxy {
    pub fn new(client: PluginClient) -> Self {
        Self { client }
    }
}

impl PostProcessor for PostProcessorProxy {
    fn config_spec(&self) -> Result<ConfigSpec> {
        self.client.call(InterfaceKind::PostProcessor, "ConfigSpec", &())
    }

    fn configure(&self, configs: &[ConfigValue]) -> Result<()> {
        self.client.call(InterfaceKind::PostProcessor, "Configure", configs)
    }

    fn post_process(&self, ui: Arc<dyn Ui>, artifact: Arc<dyn Artifact>) -> Result<PostProcessOutcome> {
        let ui = self.client.export(LocalObject::Ui(ui))?;
        // The returned artifact may be the input one, so it must outlive the call.
        let artifact = self.client.export(LocalObject::Artifact(artifact))?.detach();
        let args = PostProcessArgs { ui: ui.id(), artifact };
        let outcome: Result<PostProcessReply> =
            self.client.call(InterfaceKind::PostProcessor, "PostProcess", &args);
        ui.retire();

        let outcome = outcome?;
        let client =
            PluginClient::with_broker(self.client.broker(), outcome.artifact, self.client.codec())?;
        Ok(PostProcessOutcome {
            artifact: Arc::new(ArtifactProxy::new(client)),
            keep: outcome.keep,
            force_override: outcome.force_override,
        })
    }
}

pub(crate) struct PostProcessorService {
    inner: Arc<dyn PostProcessor>,
    ctx: ServeContext,
}

impl PostProcessorService {
    pub(crate) fn new(inner: Arc<dyn PostProcessor>, ctx: ServeContext) -> Self {
        Self { inner, ctx }
    }
}

impl Service for PostProcessorService {
    fn call(&self, method: &str, request: &Request<'_>) -> std::result::Result<Vec<u8>, ServeError> {
        match method {
            "ConfigSpec" => reply(request, self.inner.config_spec()),
            "Configure" => {
                let configs: Vec<ConfigValue> = request.args()?;
                reply(request, self.inner.configure(&configs))
            }
            "PostProcess" => {
                let args: PostProcessArgs = request.args()?;
                let ui = UiProxy::new(self.ctx.dial(args.ui)?);
                let input = ArtifactProxy::new(self.ctx.dial(args.artifact)?);
                let outcome = self
                    .inner
                    .post_process(Arc::new(ui), Arc::new(input))
                    .map_err(ServeError::failed)?;

                let artifact = self
                    .ctx
                    .export(LocalObject::Artifact(outcome.artifact))?
                    .detach();
                request.reply(&PostProcessReply {
                    artifact,
                    keep: outcome.keep,
                    force_override: outcome.force_override,
                })
            }
            other => Err(no_such_method(other)),
        }
    }
}
