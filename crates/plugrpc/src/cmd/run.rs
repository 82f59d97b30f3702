use std::sync::Arc;

use plugrpc_plugin::{
    connect_with_config, Builder, PluginClient, PluginConfig, PluginError, PostProcessor,
};
use plugrpc_rpc::ConfigValue;
use tracing::{debug, warn};

use crate::cmd::RunArgs;
use crate::exit::{io_error, plugin_error, CliError, CliResult, SUCCESS, USAGE};
use crate::host::{CollectingUi, ProvisionHook};
use crate::logging::session_span;
use crate::output::{print_report, ArtifactReport, OutputFormat, RunReport};

pub fn run(args: RunArgs, format: OutputFormat) -> CliResult<i32> {
    let provisioner_config = provisioner_config(&args)?;
    let workdir = std::path::absolute(&args.workdir).map_err(|err| io_error("workdir", err))?;

    let codec = args.session.codec();
    let _span = session_span("core", 1, codec).entered();
    let client = connect_with_config(&args.path, &PluginConfig::new(codec))
        .map_err(|err| plugin_error("connect failed", err))?;

    let ui = Arc::new(CollectingUi::default());
    let builder_config = ConfigValue::map().with("workdir", workdir.display().to_string());
    let outcome = build(&client, ui.clone(), builder_config, provisioner_config);
    client.close();
    let (warnings, artifact) = outcome.map_err(|err| plugin_error("run failed", err))?;

    let report = RunReport {
        socket: args.path.display().to_string(),
        codec: codec.name(),
        warnings,
        ui: ui.lines(),
        artifact,
    };
    print_report(&report, format);
    Ok(SUCCESS)
}

/// Prepare and run the builder, provisioning through the hook, then pass the
/// artifact through the post-processor.
fn build(
    client: &PluginClient,
    ui: Arc<CollectingUi>,
    builder_config: ConfigValue,
    provisioner_config: ConfigValue,
) -> plugrpc_plugin::Result<(Vec<String>, ArtifactReport)> {
    let builder = client.builder();
    let prepared = builder.prepare(&[builder_config])?;
    for warning in &prepared.warnings {
        warn!("{warning}");
    }
    debug!(generated = ?prepared.generated_vars, "builder prepared");

    let hook = Arc::new(ProvisionHook::new(
        Arc::new(client.provisioner()),
        provisioner_config,
    ));
    let artifact = builder
        .run(ui.clone(), hook)?
        .ok_or_else(|| PluginError::failed("builder produced no artifact"))?;
    debug!(id = %artifact.id()?, "build finished");

    let post_processor = client.post_processor();
    post_processor.configure(&[])?;
    let outcome = post_processor.post_process(ui, artifact)?;
    let artifact = outcome.artifact;

    let report = ArtifactReport {
        id: artifact.id()?,
        builder_id: artifact.builder_id()?,
        description: artifact.description()?,
        files: artifact.files()?,
        keep: outcome.keep,
    };
    Ok((prepared.warnings, report))
}

fn provisioner_config(args: &RunArgs) -> CliResult<ConfigValue> {
    let inline: Vec<ConfigValue> = args
        .inline
        .iter()
        .map(|command| ConfigValue::from(command.as_str()))
        .collect();
    let mut files = ConfigValue::map();
    for upload in &args.uploads {
        let (path, contents) = upload.split_once('=').ok_or_else(|| {
            CliError::new(USAGE, format!("--upload expects PATH=CONTENTS, got {upload:?}"))
        })?;
        files = files.with(path, contents);
    }
    Ok(ConfigValue::map().with("inline", inline).with("files", files))
}
