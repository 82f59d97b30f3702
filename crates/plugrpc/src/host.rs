//! Core-side objects the `run` command lends to a plugin.

use std::sync::{Arc, Mutex, PoisonError};

use plugrpc_plugin::{
    Communicator, Hook, PluginError, Provisioner, ProvisionerProxy, Result, Ui, HOOK_PROVISION,
};
use plugrpc_rpc::ConfigValue;
use tracing::{debug, info, warn};

/// Records everything a plugin shows the user and echoes it to the log.
#[derive(Default)]
pub struct CollectingUi {
    lines: Mutex<Vec<String>>,
}

impl CollectingUi {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn push(&self, line: String) {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner).push(line);
    }
}

impl Ui for CollectingUi {
    fn ask(&self, query: &str) -> Result<String> {
        warn!(query, "plugin asked a question; answering with an empty string");
        self.push(format!("? {query}"));
        Ok(String::new())
    }

    fn say(&self, message: &str) -> Result<()> {
        info!("{message}");
        self.push(message.to_string());
        Ok(())
    }

    fn message(&self, message: &str) -> Result<()> {
        info!("{message}");
        self.push(message.to_string());
        Ok(())
    }

    fn error(&self, message: &str) -> Result<()> {
        warn!("{message}");
        self.push(format!("error: {message}"));
        Ok(())
    }

    fn machine(&self, category: &str, args: &[String]) -> Result<()> {
        debug!(category, ?args, "machine-readable output");
        self.push(format!("{category}: {}", args.join(",")));
        Ok(())
    }
}

/// Runs a provisioner whenever the builder reaches the provision hook.
///
/// The communicator the builder hands over goes straight to the provisioner.
pub struct ProvisionHook {
    provisioner: Arc<ProvisionerProxy>,
    config: ConfigValue,
}

impl ProvisionHook {
    pub fn new(provisioner: Arc<ProvisionerProxy>, config: ConfigValue) -> Self {
        Self {
            provisioner,
            config,
        }
    }
}

impl Hook for ProvisionHook {
    fn run(
        &self,
        name: &str,
        ui: Arc<dyn Ui>,
        communicator: Option<Arc<dyn Communicator>>,
        data: &ConfigValue,
    ) -> Result<()> {
        if name != HOOK_PROVISION {
            debug!(hook = name, "no handler for hook");
            return Ok(());
        }
        let communicator = communicator
            .ok_or_else(|| PluginError::failed("provision hook needs a communicator"))?;

        self.provisioner.prepare(std::slice::from_ref(&self.config))?;
        self.provisioner.provision(ui, communicator, data)
    }
}
