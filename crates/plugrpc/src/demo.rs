//! Objects the `serve` command offers to a core.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use plugrpc_plugin::{
    Artifact, Builder, Communicator, Datasource, Hook, PluginError, PluginServer,
    PostProcessOutcome, PostProcessor, PrepareOutcome, Provisioner, RemoteCommand, Result, Ui,
    HOOK_PROVISION,
};
use plugrpc_rpc::{check_config, AttributeSpec, ConfigSpec, ConfigValue, ValueType};
use tracing::{debug, info};

use crate::machine::{list_files, LocalCommunicator};

pub fn register(server: &mut PluginServer) {
    server.register_builder(Arc::new(DirBuilder::default()));
    server.register_provisioner(Arc::new(ShellProvisioner::default()));
    server.register_post_processor(Arc::new(ManifestPostProcessor));
    server.register_datasource(Arc::new(EnvDatasource::default()));
}

fn merged(configs: &[ConfigValue]) -> ConfigValue {
    let mut merged = ConfigValue::map();
    for config in configs {
        merged.merge(config.clone());
    }
    merged
}

fn checked(spec: &ConfigSpec, config: &ConfigValue) -> Result<()> {
    let problems = check_config(spec, config);
    if problems.is_empty() {
        Ok(())
    } else {
        Err(PluginError::failed(problems.join("; ")))
    }
}

#[derive(Debug, Default)]
struct ShellConfig {
    inline: Vec<String>,
    files: BTreeMap<String, String>,
}

/// Uploads files, then runs shell commands through the core's communicator.
#[derive(Default)]
pub struct ShellProvisioner {
    config: Mutex<ShellConfig>,
}

impl Provisioner for ShellProvisioner {
    fn config_spec(&self) -> Result<ConfigSpec> {
        let mut spec = ConfigSpec::new();
        spec.insert("inline".into(), AttributeSpec::required(ValueType::List));
        spec.insert("files".into(), AttributeSpec::optional(ValueType::Map));
        Ok(spec)
    }

    fn prepare(&self, configs: &[ConfigValue]) -> Result<()> {
        let config = merged(configs);
        checked(&self.config_spec()?, &config)?;

        let mut parsed = ShellConfig::default();
        if let Some(ConfigValue::List(items)) = config.get("inline") {
            for item in items {
                let command = item
                    .as_str()
                    .ok_or_else(|| PluginError::failed("inline commands must be strings"))?;
                parsed.inline.push(command.to_string());
            }
        }
        if let Some(ConfigValue::Map(files)) = config.get("files") {
            for (path, contents) in files {
                let contents = contents
                    .as_str()
                    .ok_or_else(|| PluginError::failed(format!("contents of {path} must be a string")))?;
                parsed.files.insert(path.clone(), contents.to_string());
            }
        }

        debug!(commands = parsed.inline.len(), files = parsed.files.len(), "shell provisioner prepared");
        *self.config.lock().unwrap_or_else(PoisonError::into_inner) = parsed;
        Ok(())
    }

    fn provision(
        &self,
        ui: Arc<dyn Ui>,
        communicator: Arc<dyn Communicator>,
        generated_data: &ConfigValue,
    ) -> Result<()> {
        let (inline, files) = {
            let config = self.config.lock().unwrap_or_else(PoisonError::into_inner);
            (config.inline.clone(), config.files.clone())
        };
        let host = generated_data
            .get("host")
            .and_then(ConfigValue::as_str)
            .unwrap_or("machine");
        ui.say(&format!("provisioning {host} with {} commands", inline.len()))?;

        for (path, contents) in &files {
            communicator.upload(path, &mut contents.as_bytes())?;
        }
        for command in &inline {
            let outcome = communicator.start(&RemoteCommand::new(command.as_str()))?;
            let stdout = String::from_utf8_lossy(&outcome.stdout);
            if !stdout.trim().is_empty() {
                ui.message(stdout.trim_end())?;
            }
            if !outcome.success() {
                let msg = format!("{command:?} exited with {}", outcome.exit_status);
                ui.error(&msg)?;
                return Err(PluginError::failed(msg));
            }
        }

        ui.machine("provision-complete", &[inline.len().to_string()])?;
        info!(host, commands = inline.len(), "provisioned");
        Ok(())
    }
}

/// Reports facts about the plugin process.
#[derive(Default)]
pub struct EnvDatasource {
    prefix: Mutex<Option<String>>,
}

impl Datasource for EnvDatasource {
    fn config_spec(&self) -> Result<ConfigSpec> {
        let mut spec = ConfigSpec::new();
        spec.insert("prefix".into(), AttributeSpec::optional(ValueType::String));
        Ok(spec)
    }

    fn output_spec(&self) -> Result<ConfigSpec> {
        let mut spec = ConfigSpec::new();
        for key in ["plugin", "version", "os", "pid"] {
            spec.insert(key.into(), AttributeSpec::required(ValueType::Any));
        }
        Ok(spec)
    }

    fn configure(&self, configs: &[ConfigValue]) -> Result<()> {
        let config = merged(configs);
        checked(&self.config_spec()?, &config)?;
        *self.prefix.lock().unwrap_or_else(PoisonError::into_inner) =
            config.get("prefix").and_then(ConfigValue::as_str).map(str::to_string);
        Ok(())
    }

    fn execute(&self) -> Result<ConfigValue> {
        let prefix = self.prefix.lock().unwrap_or_else(PoisonError::into_inner).clone();
        let key = |name: &str| match &prefix {
            Some(prefix) => format!("{prefix}{name}"),
            None => name.to_string(),
        };
        Ok(ConfigValue::map()
            .with(key("plugin"), "plugrpc")
            .with(key("version"), env!("CARGO_PKG_VERSION"))
            .with(key("os"), std::env::consts::OS)
            .with(key("pid"), i64::from(std::process::id())))
    }
}

/// "Builds" a machine by creating a directory, provisions it through the
/// hook and returns the directory as the artifact.
#[derive(Default)]
pub struct DirBuilder {
    workdir: Mutex<Option<PathBuf>>,
}

impl Builder for DirBuilder {
    fn config_spec(&self) -> Result<ConfigSpec> {
        let mut spec = ConfigSpec::new();
        spec.insert("workdir".into(), AttributeSpec::required(ValueType::String));
        Ok(spec)
    }

    fn prepare(&self, configs: &[ConfigValue]) -> Result<PrepareOutcome> {
        let config = merged(configs);
        checked(&self.config_spec()?, &config)?;
        let workdir = PathBuf::from(
            config
                .get("workdir")
                .and_then(ConfigValue::as_str)
                .unwrap_or("."),
        );

        let mut warnings = Vec::new();
        if !workdir.exists() {
            warnings.push(format!("{} does not exist and will be created", workdir.display()));
        }
        *self.workdir.lock().unwrap_or_else(PoisonError::into_inner) = Some(workdir);
        Ok(PrepareOutcome {
            generated_vars: vec!["host".to_string(), "workdir".to_string()],
            warnings,
        })
    }

    fn run(&self, ui: Arc<dyn Ui>, hook: Arc<dyn Hook>) -> Result<Option<Arc<dyn Artifact>>> {
        let workdir = self
            .workdir
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| PluginError::failed("builder was not prepared"))?;
        std::fs::create_dir_all(&workdir)?;
        ui.say(&format!("machine ready at {}", workdir.display()))?;

        let machine = Arc::new(LocalCommunicator::new(&workdir));
        let data = ConfigValue::map()
            .with("host", "localhost")
            .with("workdir", workdir.display().to_string());
        let communicator: Arc<dyn Communicator> = machine.clone();
        hook.run(HOOK_PROVISION, Arc::clone(&ui), Some(communicator), &data)?;
        debug!(commands = ?machine.commands(), uploaded = ?machine.uploaded(), "machine provisioned");

        Ok(Some(Arc::new(DirArtifact {
            files: list_files(&workdir)?,
            root: workdir,
        })))
    }
}

/// A directory produced by [`DirBuilder`].
pub struct DirArtifact {
    root: PathBuf,
    files: Vec<String>,
}

impl Artifact for DirArtifact {
    fn builder_id(&self) -> Result<String> {
        Ok("plugrpc.dir".to_string())
    }

    fn files(&self) -> Result<Vec<String>> {
        Ok(self.files.clone())
    }

    fn id(&self) -> Result<String> {
        Ok(format!("dir:{}", self.root.display()))
    }

    fn description(&self) -> Result<String> {
        Ok(format!("directory {} with {} files", self.root.display(), self.files.len()))
    }

    fn state(&self, name: &str) -> Result<ConfigValue> {
        Ok(match name {
            "workdir" => ConfigValue::from(self.root.display().to_string()),
            _ => ConfigValue::Null,
        })
    }

    fn destroy(&self) -> Result<()> {
        std::fs::remove_dir_all(&self.root)?;
        Ok(())
    }
}

/// Wraps an artifact with a listing of its files.
pub struct ManifestPostProcessor;

impl PostProcessor for ManifestPostProcessor {
    fn config_spec(&self) -> Result<ConfigSpec> {
        Ok(ConfigSpec::new())
    }

    fn configure(&self, _configs: &[ConfigValue]) -> Result<()> {
        Ok(())
    }

    fn post_process(&self, ui: Arc<dyn Ui>, artifact: Arc<dyn Artifact>) -> Result<PostProcessOutcome> {
        let id = artifact.id()?;
        let mut files = artifact.files()?;
        ui.say(&format!("listing {} files of {id}", files.len()))?;
        files.push("MANIFEST".to_string());

        Ok(PostProcessOutcome {
            artifact: Arc::new(ManifestArtifact {
                id: format!("{id}+manifest"),
                builder_id: artifact.builder_id()?,
                files,
            }),
            keep: true,
            force_override: false,
        })
    }
}

struct ManifestArtifact {
    id: String,
    builder_id: String,
    files: Vec<String>,
}

impl Artifact for ManifestArtifact {
    fn builder_id(&self) -> Result<String> {
        Ok(self.builder_id.clone())
    }

    fn files(&self) -> Result<Vec<String>> {
        Ok(self.files.clone())
    }

    fn id(&self) -> Result<String> {
        Ok(self.id.clone())
    }

    fn description(&self) -> Result<String> {
        Ok(format!("manifest of {} files", self.files.len().saturating_sub(1)))
    }

    fn state(&self, _name: &str) -> Result<ConfigValue> {
        Ok(ConfigValue::Null)
    }

    fn destroy(&self) -> Result<()> {
        Ok(())
    }
}
