mod support;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use plugrpc_plugin::{
    Artifact, Build, Builder, Communicator, Datasource, Hook, InterfaceKind, PluginError,
    PostProcessOutcome, PostProcessor, PrepareOutcome, Provisioner, RemoteCommand, Result, Ui,
    HOOK_PROVISION,
};
use plugrpc_rpc::{
    check_config, AttributeSpec, Codec, ConfigSpec, ConfigValue, DispatchError, RpcError,
    ValueType,
};

use support::{start, MemArtifact, MemCommunicator, RecordingUi};

const CODECS: [Codec; 2] = [Codec::Legacy, Codec::Compact];

/// Plugin-side provisioner: talks back through the UI and communicator it
/// was handed.
#[derive(Default)]
struct ShellProvisioner {
    configs: Mutex<Vec<ConfigValue>>,
    downloaded: Mutex<Vec<u8>>,
    stdout: Mutex<Vec<u8>>,
    keep_ui: bool,
    kept_ui: Mutex<Option<Arc<dyn Ui>>>,
}

impl Provisioner for ShellProvisioner {
    fn config_spec(&self) -> Result<ConfigSpec> {
        let mut spec = ConfigSpec::new();
        spec.insert("inline".into(), AttributeSpec::required(ValueType::String));
        Ok(spec)
    }

    fn prepare(&self, configs: &[ConfigValue]) -> Result<()> {
        self.configs.lock().unwrap().extend_from_slice(configs);
        Ok(())
    }

    fn provision(
        &self,
        ui: Arc<dyn Ui>,
        communicator: Arc<dyn Communicator>,
        generated_data: &ConfigValue,
    ) -> Result<()> {
        let host = generated_data
            .get("host")
            .and_then(ConfigValue::as_str)
            .unwrap_or("unknown");
        ui.say(&format!("provisioning {host}"))?;

        let outcome = communicator.start(&RemoteCommand::new("uname -a"))?;
        if !outcome.success() {
            return Err(PluginError::failed("uname failed"));
        }
        *self.stdout.lock().unwrap() = outcome.stdout;

        communicator.upload("a", &mut &b"b"[..])?;
        let mut contents = Vec::new();
        communicator.download("a", &mut contents)?;
        *self.downloaded.lock().unwrap() = contents;

        if self.keep_ui {
            *self.kept_ui.lock().unwrap() = Some(ui);
        }
        Ok(())
    }
}

#[test]
fn provision_with_communicator_reference() {
    for codec in CODECS {
        let provisioner = Arc::new(ShellProvisioner::default());
        let plugin_side = Arc::clone(&provisioner);
        let session = start(codec, move |server| server.register_provisioner(plugin_side));

        let ui = Arc::new(RecordingUi::default());
        let comm = Arc::new(MemCommunicator::default());
        let proxy = session.core.provisioner();

        let spec = proxy.config_spec().unwrap();
        assert_eq!(spec["inline"], AttributeSpec::required(ValueType::String));
        proxy
            .prepare(&[ConfigValue::map().with("inline", "echo hi")])
            .unwrap();
        proxy
            .provision(
                ui.clone(),
                comm.clone(),
                &ConfigValue::map().with("host", "10.0.0.5"),
            )
            .unwrap();

        assert_eq!(ui.lines(), vec!["provisioning 10.0.0.5".to_string()]);
        assert_eq!(comm.commands(), vec!["uname -a".to_string()]);
        assert_eq!(comm.file("a").as_deref(), Some(&b"b"[..]));
        assert_eq!(*provisioner.downloaded.lock().unwrap(), b"b");
        assert_eq!(*provisioner.stdout.lock().unwrap(), b"ran uname -a");
        assert_eq!(
            provisioner.configs.lock().unwrap()[0].get("inline"),
            Some(&ConfigValue::from("echo hi"))
        );

        session.wait_for_baseline();
        session.finish();
    }
}

#[test]
fn back_to_back_calls_do_not_leak_streams() {
    let provisioner = Arc::new(ShellProvisioner::default());
    let plugin_side = Arc::clone(&provisioner);
    let session = start(Codec::Compact, move |server| {
        server.register_provisioner(plugin_side)
    });

    let ui = Arc::new(RecordingUi::default());
    let comm = Arc::new(MemCommunicator::default());
    let proxy = session.core.provisioner();
    for round in 0..5 {
        let data = ConfigValue::map().with("host", format!("host-{round}"));
        proxy.provision(ui.clone(), comm.clone(), &data).unwrap();
    }

    assert_eq!(ui.lines().len(), 5);
    assert_eq!(ui.lines()[4], "provisioning host-4");
    session.wait_for_baseline();
    session.finish();
}

#[test]
fn retired_argument_fails_with_connection_closed() {
    let provisioner = Arc::new(ShellProvisioner {
        keep_ui: true,
        ..Default::default()
    });
    let plugin_side = Arc::clone(&provisioner);
    let session = start(Codec::Legacy, move |server| {
        server.register_provisioner(plugin_side)
    });

    let ui = Arc::new(RecordingUi::default());
    session
        .core
        .provisioner()
        .provision(ui.clone(), Arc::new(MemCommunicator::default()), &ConfigValue::Null)
        .unwrap();

    let kept = provisioner.kept_ui.lock().unwrap().take().unwrap();
    let err = kept.say("too late").unwrap_err();
    assert!(err.is_connection_closed(), "unexpected error: {err}");
    assert_eq!(ui.lines(), vec!["provisioning unknown".to_string()]);

    drop(kept);
    session.wait_for_baseline();
    session.finish();
}

#[test]
fn communicator_served_by_plugin() {
    for codec in CODECS {
        let comm = Arc::new(MemCommunicator::default());
        let plugin_side = Arc::clone(&comm);
        let session = start(codec, move |server| server.register_communicator(plugin_side));
        let proxy = session.core.communicator();

        // Bigger than one data frame, so the copy spans several chunks.
        let payload: Vec<u8> = (0..300_000u32).map(|i| (i % 251) as u8).collect();
        proxy.upload("/tmp/big", &mut payload.as_slice()).unwrap();
        assert_eq!(comm.file("/tmp/big").unwrap(), payload);

        let mut back = Vec::new();
        proxy.download("/tmp/big", &mut back).unwrap();
        assert_eq!(back, payload);

        proxy.upload("/tmp/empty", &mut &b""[..]).unwrap();
        assert_eq!(comm.file("/tmp/empty").unwrap(), b"");

        let mut command = RemoteCommand::new("cat");
        command.stdin = b"piped".to_vec();
        let outcome = proxy.start(&command).unwrap();
        assert_eq!(outcome.stderr, b"piped");

        proxy
            .upload_dir("/srv", "./site", &["*.tmp".to_string()])
            .unwrap();
        proxy.download_dir("/var/log", "./logs", &[]).unwrap();
        assert_eq!(
            comm.commands()[1..],
            [
                "upload_dir ./site -> /srv excluding *.tmp".to_string(),
                "download_dir /var/log -> ./logs excluding ".to_string(),
            ]
        );

        session.wait_for_baseline();
        session.finish();
    }
}

#[test]
fn failed_download_reports_remote_error() {
    let session = start(Codec::Compact, |server| {
        server.register_communicator(Arc::new(MemCommunicator::default()))
    });

    let mut sink = Vec::new();
    let err = session
        .core
        .communicator()
        .download("/missing", &mut sink)
        .unwrap_err();
    assert!(
        matches!(&err, PluginError::Rpc(RpcError::Remote(msg)) if msg.contains("no such file: /missing")),
        "unexpected error: {err:?}"
    );
    assert!(sink.is_empty());

    session.wait_for_baseline();
    session.finish();
}

/// Plugin-side builder: runs the provision hook with its own communicator
/// and returns an artifact it keeps serving.
struct ImageBuilder {
    comm: Arc<MemCommunicator>,
    artifact_destroyed: Arc<AtomicBool>,
}

impl Builder for ImageBuilder {
    fn config_spec(&self) -> Result<ConfigSpec> {
        Ok(ConfigSpec::new())
    }

    fn prepare(&self, configs: &[ConfigValue]) -> Result<PrepareOutcome> {
        Ok(PrepareOutcome {
            generated_vars: vec!["host".to_string()],
            warnings: vec![format!("{} config blocks", configs.len())],
        })
    }

    fn run(&self, ui: Arc<dyn Ui>, hook: Arc<dyn Hook>) -> Result<Option<Arc<dyn Artifact>>> {
        ui.say("building")?;
        let comm: Arc<dyn Communicator> = self.comm.clone();
        hook.run(
            HOOK_PROVISION,
            ui,
            Some(comm),
            &ConfigValue::map().with("host", "10.0.0.9"),
        )?;

        let mut artifact = MemArtifact::new("image-1");
        artifact.destroyed = Arc::clone(&self.artifact_destroyed);
        Ok(Some(Arc::new(artifact)))
    }
}

/// Core-side hook.
#[derive(Default)]
struct RecordingHook {
    runs: Mutex<Vec<(String, ConfigValue)>>,
}

impl Hook for RecordingHook {
    fn run(
        &self,
        name: &str,
        ui: Arc<dyn Ui>,
        communicator: Option<Arc<dyn Communicator>>,
        data: &ConfigValue,
    ) -> Result<()> {
        self.runs
            .lock()
            .unwrap()
            .push((name.to_string(), data.clone()));
        if let Some(comm) = communicator {
            comm.upload("/etc/motd", &mut &b"hooked"[..])?;
        }
        ui.say("hook ran")
    }
}

#[test]
fn builder_run_passes_hook_and_returns_artifact() {
    for codec in CODECS {
        let plugin_comm = Arc::new(MemCommunicator::default());
        let destroyed = Arc::new(AtomicBool::new(false));
        let builder = ImageBuilder {
            comm: Arc::clone(&plugin_comm),
            artifact_destroyed: Arc::clone(&destroyed),
        };
        let session = start(codec, move |server| server.register_builder(Arc::new(builder)));

        let proxy = session.core.builder();
        let prepared = proxy.prepare(&[ConfigValue::Null, ConfigValue::Null]).unwrap();
        assert_eq!(prepared.generated_vars, vec!["host".to_string()]);
        assert_eq!(prepared.warnings, vec!["2 config blocks".to_string()]);

        let ui = Arc::new(RecordingUi::default());
        let hook = Arc::new(RecordingHook::default());
        let artifact = proxy.run(ui.clone(), hook.clone()).unwrap().unwrap();

        assert_eq!(ui.lines(), vec!["building".to_string(), "hook ran".to_string()]);
        let runs = hook.runs.lock().unwrap().clone();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].0, HOOK_PROVISION);
        assert_eq!(runs[0].1.get("host"), Some(&ConfigValue::from("10.0.0.9")));
        assert_eq!(plugin_comm.file("/etc/motd").as_deref(), Some(&b"hooked"[..]));

        // The artifact outlives the call that produced it.
        assert_eq!(artifact.id().unwrap(), "image-1");
        assert_eq!(artifact.builder_id().unwrap(), "plugrpc.image");
        assert_eq!(artifact.files().unwrap(), vec!["image-1.img".to_string()]);
        assert_eq!(artifact.description().unwrap(), "image image-1");
        assert_eq!(artifact.state("region").unwrap(), ConfigValue::from("eu-west"));
        assert!(artifact.state("zone").unwrap().is_null());
        artifact.destroy().unwrap();
        assert!(destroyed.load(Ordering::SeqCst));

        assert_eq!(session.core_broker().live_streams(), 2);
        drop(artifact);
        session.wait_for_baseline();
        session.finish();
    }
}

/// Plugin-side post-processor: wraps whatever artifact it is given.
struct Compressor;

impl PostProcessor for Compressor {
    fn config_spec(&self) -> Result<ConfigSpec> {
        Ok(ConfigSpec::new())
    }

    fn configure(&self, _configs: &[ConfigValue]) -> Result<()> {
        Ok(())
    }

    fn post_process(&self, ui: Arc<dyn Ui>, artifact: Arc<dyn Artifact>) -> Result<PostProcessOutcome> {
        let id = artifact.id()?;
        ui.message(&format!("compressing {id}"))?;
        Ok(PostProcessOutcome {
            artifact: Arc::new(MemArtifact::new(&format!("{id}.tar.gz"))),
            keep: true,
            force_override: false,
        })
    }
}

#[test]
fn post_processor_wraps_core_artifact() {
    let session = start(Codec::Legacy, |server| {
        server.register_post_processor(Arc::new(Compressor))
    });

    let ui = Arc::new(RecordingUi::default());
    let input = Arc::new(MemArtifact::new("image-7"));
    let outcome = session
        .core
        .post_processor()
        .post_process(ui.clone(), input.clone())
        .unwrap();

    assert!(outcome.keep);
    assert!(!outcome.force_override);
    assert_eq!(outcome.artifact.id().unwrap(), "image-7.tar.gz");
    assert_eq!(ui.lines(), vec!["message: compressing image-7".to_string()]);
    assert!(!input.is_destroyed());

    drop(outcome);
    session.wait_for_baseline();
    session.finish();
}

/// Plugin-side build with two results.
#[derive(Default)]
struct TwoImageBuild {
    flags: Mutex<Vec<String>>,
}

impl Build for TwoImageBuild {
    fn name(&self) -> Result<String> {
        Ok("twin".to_string())
    }

    fn prepare(&self) -> Result<Vec<String>> {
        Ok(vec!["deprecated option".to_string()])
    }

    fn run(&self, ui: Arc<dyn Ui>) -> Result<Vec<Arc<dyn Artifact>>> {
        let answer = ui.ask("continue?")?;
        if answer != "yes" {
            return Ok(Vec::new());
        }
        Ok(vec![
            Arc::new(MemArtifact::new("left")),
            Arc::new(MemArtifact::new("right")),
        ])
    }

    fn set_debug(&self, debug: bool) -> Result<()> {
        self.flags.lock().unwrap().push(format!("debug={debug}"));
        Ok(())
    }

    fn set_force(&self, force: bool) -> Result<()> {
        self.flags.lock().unwrap().push(format!("force={force}"));
        Ok(())
    }

    fn set_on_error(&self, mode: &str) -> Result<()> {
        self.flags.lock().unwrap().push(format!("on_error={mode}"));
        Ok(())
    }
}

#[test]
fn build_returns_each_artifact_by_reference() {
    let build = Arc::new(TwoImageBuild::default());
    let plugin_side = Arc::clone(&build);
    let session = start(Codec::Compact, move |server| server.register_build(plugin_side));
    let proxy = session.core.build();

    assert_eq!(proxy.name().unwrap(), "twin");
    assert_eq!(proxy.prepare().unwrap(), vec!["deprecated option".to_string()]);
    proxy.set_debug(true).unwrap();
    proxy.set_force(false).unwrap();
    proxy.set_on_error("abort").unwrap();
    assert_eq!(
        *build.flags.lock().unwrap(),
        vec!["debug=true", "force=false", "on_error=abort"]
    );

    let ui = Arc::new(RecordingUi::default());
    let artifacts = proxy.run(ui.clone()).unwrap();
    let ids: Vec<String> = artifacts.iter().map(|a| a.id().unwrap()).collect();
    assert_eq!(ids, vec!["left", "right"]);
    assert_eq!(ui.lines(), vec!["ask: continue?".to_string()]);

    drop(artifacts);
    session.wait_for_baseline();
    session.finish();
}

struct StaticDatasource {
    configured: Mutex<ConfigValue>,
}

impl StaticDatasource {
    fn spec() -> ConfigSpec {
        let mut spec = ConfigSpec::new();
        spec.insert("name".into(), AttributeSpec::required(ValueType::String));
        spec.insert("tags".into(), AttributeSpec::optional(ValueType::List));
        spec
    }
}

impl Datasource for StaticDatasource {
    fn config_spec(&self) -> Result<ConfigSpec> {
        Ok(Self::spec())
    }

    fn output_spec(&self) -> Result<ConfigSpec> {
        let mut spec = ConfigSpec::new();
        spec.insert("greeting".into(), AttributeSpec::required(ValueType::String));
        Ok(spec)
    }

    fn configure(&self, configs: &[ConfigValue]) -> Result<()> {
        let mut merged = ConfigValue::Null;
        for config in configs {
            merged.merge(config.clone());
        }
        let problems = check_config(&Self::spec(), &merged);
        if !problems.is_empty() {
            return Err(PluginError::failed(problems.join("; ")));
        }
        *self.configured.lock().unwrap() = merged;
        Ok(())
    }

    fn execute(&self) -> Result<ConfigValue> {
        let configured = self.configured.lock().unwrap();
        let name = configured.get("name").and_then(ConfigValue::as_str).unwrap_or("nobody");
        Ok(ConfigValue::map().with("greeting", format!("hello {name}")))
    }
}

#[test]
fn datasource_configure_and_execute() {
    for codec in CODECS {
        let session = start(codec, |server| {
            server.register_datasource(Arc::new(StaticDatasource {
                configured: Mutex::new(ConfigValue::Null),
            }))
        });
        let proxy = session.core.datasource();

        assert_eq!(proxy.config_spec().unwrap(), StaticDatasource::spec());
        assert!(proxy.output_spec().unwrap().contains_key("greeting"));

        let err = proxy.configure(&[ConfigValue::map().with("tags", true)]).unwrap_err();
        assert!(matches!(&err, PluginError::Rpc(e) if e.is_remote()), "{err:?}");
        assert!(err.to_string().contains("name"));

        proxy
            .configure(&[
                ConfigValue::map().with("name", "first"),
                ConfigValue::map().with("name", "plugrpc"),
            ])
            .unwrap();
        let output = proxy.execute().unwrap();
        assert_eq!(output.get("greeting"), Some(&ConfigValue::from("hello plugrpc")));

        session.finish();
    }
}

#[test]
fn unknown_endpoints_and_methods_are_dispatch_errors() {
    let session = start(Codec::Legacy, |server| {
        server.register_ui(Arc::new(RecordingUi::default()))
    });

    let err = session
        .core
        .call::<_, ()>(InterfaceKind::Builder, "Run", &())
        .unwrap_err();
    assert!(matches!(
        err,
        PluginError::Rpc(RpcError::Dispatch(DispatchError::NoSuchEndpoint(ref name))) if name == "Builder"
    ));

    let err = session
        .core
        .call::<_, ()>(InterfaceKind::Ui, "Shout", &())
        .unwrap_err();
    assert!(matches!(
        err,
        PluginError::Rpc(RpcError::Dispatch(DispatchError::NoSuchMethod(ref name))) if name == "Ui.Shout"
    ));

    let err = session
        .core
        .call::<_, ()>(InterfaceKind::Ui, "Say", &42u32)
        .unwrap_err();
    assert!(matches!(
        err,
        PluginError::Rpc(RpcError::Dispatch(DispatchError::InvalidArguments(_)))
    ));

    // The session is still usable afterwards.
    session.core.ui().say("still here").unwrap();
    session.finish();
}
