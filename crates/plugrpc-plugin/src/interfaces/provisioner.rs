use std::sync::Arc;

use plugrpc_rpc::{ConfigSpec, ConfigValue, Request, ServeError, Service};
use serde::{Deserialize, Serialize};

use super::{no_such_method, reply, Communicator, CommunicatorProxy, ServeContext, Ui, UiProxy};
use crate::client::PluginClient;
use crate::error::Result;
use crate::kind::{InterfaceKind, LocalObject};

/// Configures a running machine through a communicator.
pub trait Provisioner: Send + Sync {
    fn config_spec(&self) -> Result<ConfigSpec>;
    fn prepare(&self, configs: &[ConfigValue]) -> Result<()>;
    /// `generated_data` carries the values the builder generated.
    fn provision(
        &self,
        ui: Arc<dyn Ui>,
        communicator: Arc<dyn Communicator>,
        generated_data: &ConfigValue,
    ) -> Result<()>;
}

#[derive(Serialize, Deserialize)]
struct ProvisionArgs {
    ui: u32,
    communicator: u32,
    generated_data: ConfigValue,
}

pub struct ProvisionerProxy {
    client: PluginClient,
}

impl ProvisionerProxy {
    pub fn new(client: PluginClient) -> Self {
        Self { client }
    }
}

impl Provisioner for ProvisionerProxy {
    fn config_spec(&self) -> Result<ConfigSpec> {
        self.client.call(InterfaceKind::Provisioner, "ConfigSpec", &())
    }

    fn prepare(&self, configs: &[ConfigValue]) -> Result<()> {
        self.client.call(InterfaceKind::Provisioner, "Prepare", configs)
    }

    fn provision(
        &self,
        ui: Arc<dyn Ui>,
        communicator: Arc<dyn Communicator>,
        generated_data: &ConfigValue,
    ) -> Result<()> {
        let ui = self.client.export(LocalObject::Ui(ui))?;
        let communicator = self.client.export(LocalObject::Communicator(communicator))?;
        let args = ProvisionArgs {
            ui: ui.id(),
            communicator: communicator.id(),
            generated_data: generated_data.clone(),
        };
        let outcome = self.client.call(InterfaceKind::Provisioner, "Provision", &args);
        ui.retire();
        communicator.retire();
        outcome
    }
}

pub(crate) struct ProvisionerService {
    inner: Arc<dyn Provisioner>,
    ctx: ServeContext,
}

impl ProvisionerService {
    pub(crate) fn new(inner: Arc<dyn Provisioner>, ctx: ServeContext) -> Self {
        Self { inner, ctx }
    }
}

impl Service for ProvisionerService {
    fn call(&self, method: &str, request: &Request<'_>) -> std::result::Result<Vec<u8>, ServeError> {
        match method {
            "ConfigSpec" => reply(request, self.inner.config_spec()),
            "Prepare" => {
                let configs: Vec<ConfigValue> = request.args()?;
                reply(request, self.inner.prepare(&configs))
            }
            "Provision" => {
                let args: ProvisionArgs = request.args()?;
                let ui = UiProxy::new(self.ctx.dial(args.ui)?);
                let communicator = CommunicatorProxy::new(self.ctx.dial(args.communicator)?);
                let outcome =
                    self.inner
                        .provision(Arc::new(ui), Arc::new(communicator), &args.generated_data);
                reply(request, outcome)
            }
            other => Err(no_such_method(other)),
        }
    }
}
