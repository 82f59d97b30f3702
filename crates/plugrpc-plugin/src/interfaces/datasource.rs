use std::sync::Arc;

use plugrpc_rpc::{ConfigSpec, ConfigValue, Request, ServeError, Service};

use super::{no_such_method, reply};
use crate::client::PluginClient;
use crate::error::Result;
use crate::kind::InterfaceKind;

/// Produces a value for use in configuration.
pub trait Datasource: Send + Sync {
    fn config_spec(&self) -> Result<ConfigSpec>;
    /// Shape of the value [`execute`](Self::execute) returns.
    fn output_spec(&self) -> Result<ConfigSpec>;
    fn configure(&self, configs: &[ConfigValue]) -> Result<()>;
    fn execute(&self) -> Result<ConfigValue>;
}

pub struct DatasourceProxy {
    client: PluginClient,
}

impl DatasourceProxy {
    pub fn new(client: PluginClient) -> Self {
        Self { client }
    }
}

impl Datasource for DatasourceProxy {
    fn config_spec(&self) -> Result<ConfigSpec> {
        self.client.call(InterfaceKind::Datasource, "ConfigSpec", &())
    }

    fn output_spec(&self) -> Result<ConfigSpec> {
        self.client.call(InterfaceKind::Datasource, "OutputSpec", &())
    }

    fn configure(&self, configs: &[ConfigValue]) -> Result<()> {
        self.client.call(InterfaceKind::Datasource, "Configure", configs)
    }

    fn execute(&self) -> Result<ConfigValue> {
        self.client.call(InterfaceKind::Datasource, "Execute", &())
    }
}

pub(crate) struct DatasourceService {
    inner: Arc<dyn Datasource>,
}

impl DatasourceService {
    pub(crate) fn new(inner: Arc<dyn Datasource>) -> Self {
        Self { inner }
    }
}

impl Service for DatasourceService {
    fn call(&self, method: &str, request: &Request<'_>) -> std::result::Result<Vec<u8>, ServeError> {
        match method {
            "ConfigSpec" => reply(request, self.inner.config_spec()),
            "OutputSpec" => reply(request, self.inner.output_spec()),
            "Configure" => {
                let configs: Vec<ConfigValue> = request.args()?;
                reply(request, self.inner.configure(&configs))
            }
            "Execute" => reply(request, self.inner.execute()),
            other => Err(no_such_method(other)),
        }
    }
}
