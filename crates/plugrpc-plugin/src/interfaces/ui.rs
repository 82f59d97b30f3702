use std::sync::Arc;

use plugrpc_rpc::{Request, ServeError, Service};
use serde::{Deserialize, Serialize};

use super::{no_such_method, reply};
use crate::client::PluginClient;
use crate::error::Result;
use crate::kind::InterfaceKind;

/// User-facing output and input.
pub trait Ui: Send + Sync {
    /// Ask the user a question and return the answer.
    fn ask(&self, query: &str) -> Result<String>;
    fn say(&self, message: &str) -> Result<()>;
    fn message(&self, message: &str) -> Result<()>;
    fn error(&self, message: &str) -> Result<()>;
    /// Machine-readable output.
    fn machine(&self, category: &str, args: &[String]) -> Result<()>;
}

#[derive(Serialize, Deserialize)]
struct MachineArgs {
    category: String,
    args: Vec<String>,
}

pub struct UiProxy {
    client: PluginClient,
}

impl UiProxy {
    pub fn new(client: PluginClient) -> Self {
        Self { client }
    }

    fn call<A: Serialize + ?Sized, R: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        args: &A,
    ) -> Result<R> {
        self.client.call(InterfaceKind::Ui, method, args)
    }
}

impl Ui for UiProxy {
    fn ask(&self, query: &str) -> Result<String> {
        self.call("Ask", query)
    }

    fn say(&self, message: &str) -> Result<()> {
        self.call("Say", message)
    }

    fn message(&self, message: &str) -> Result<()> {
        self.call("Message", message)
    }

    fn error(&self, message: &str) -> Result<()> {
        self.call("Error", message)
    }

    fn machine(&self, category: &str, args: &[String]) -> Result<()> {
        let args = MachineArgs {
            category: category.to_string(),
            args: args.to_vec(),
        };
        self.call("Machine", &args)
    }
}

pub(crate) struct UiService {
    inner: Arc<dyn Ui>,
}

impl UiService {
    pub(crate) fn new(inner: Arc<dyn Ui>) -> Self {
        Self { inner }
    }
}

impl Service for UiService {
    fn call(&self, method: &str, request: &Request<'_>) -> std::result::Result<Vec<u8>, ServeError> {
        match method {
            "Ask" => {
                let query: String = request.args()?;
                reply(request, self.inner.ask(&query))
            }
            "Say" => {
                let message: String = request.args()?;
                reply(request, self.inner.say(&message))
            }
            "Message" => {
                let message: String = request.args()?;
                reply(request, self.inner.message(&message))
            }
            "Error" => {
                let message: String = request.args()?;
                reply(request, self.inner.error(&message))
            }
            "Machine" => {
                let args: MachineArgs = request.args()?;
                reply(request, self.inner.machine(&args.category, &args.args))
            }
            other => Err(no_such_method(other)),
        }
    }
}
