use std::sync::Arc;

use plugrpc_rpc::{ConfigValue, Request, ServeError, Service};
use serde::{Deserialize, Serialize};

use super::{no_such_method, reply, Communicator, CommunicatorProxy, ServeContext, Ui, UiProxy};
use crate::client::PluginClient;
use crate::error::Result;
use crate::kind::{InterfaceKind, LocalObject};

/// Well-known hook name run once a machine is reachable.
pub const HOOK_PROVISION: &str = "provision";

/// A named callback a builder triggers during its run.
pub trait Hook: Send + Sync {
    fn run(
        &self,
        name: &str,
        ui: Arc<dyn Ui>,
        communicator: Option<Arc<dyn Communicator>>,
        data: &ConfigValue,
    ) -> Result<()>;
}

#[derive(Serialize, Deserialize)]
struct HookRunArgs {
    name: String,
    ui: u32,
    communicator: Option<u32>,
    data: ConfigValue,
}

pub struct HookProxy {
    client: PluginClient,
}

impl HookProxy {
    pub fn new(client: PluginClient) -> Self {
        Self { client }
    }
}

impl Hook for HookProxy {
    fn run(
        &self,
        name: &str,
        ui: Arc<dyn Ui>,
        communicator: Option<Arc<dyn Communicator>>,
        data: &ConfigValue,
    ) -> Result<()> {
        let ui = self.client.export(LocalObject::Ui(ui))?;
        let communicator = communicator
            .map(|comm| self.client.export(LocalObject::Communicator(comm)))
            .transpose()?;

        let args = HookRunArgs {
            name: name.to_string(),
            ui: ui.id(),
            communicator: communicator.as_ref().map(|comm| comm.id()),
            data: data.clone(),
        };
        let outcome = self.client.call(InterfaceKind::Hook, "Run", &args);

        ui.retire();
        if let Some(comm) = communicator {
            comm.retire();
        }
        outcome
    }
}

pub(crate) struct HookService {
    inner: Arc<dyn Hook>,
    ctx: ServeContext,
}

impl HookService {
    pub(crate) fn new(inner: Arc<dyn Hook>, ctx: ServeContext) -> Self {
        Self { inner, ctx }
    }
}

impl Service for HookService {
    fn call(&self, method: &str, request: &Request<'_>) -> std::result::Result<Vec<u8>, ServeError> {
        match method {
            "Run" => {
                let args: HookRunArgs = request.args()?;
                let ui: Arc<dyn Ui> = Arc::new(UiProxy::new(self.ctx.dial(args.ui)?));
                let communicator = match args.communicator {
                    Some(id) => {
                        let comm: Arc<dyn Communicator> =
                            Arc::new(CommunicatorProxy::new(self.ctx.dial(id)?));
                        Some(comm)
                    }
                    None => None,
                };
                let outcome = self.inner.run(&args.name, ui, communicator, &args.data);
                reply(request, outcome)
            }
            other => Err(no_such_method(other)),
        }
    }
}
