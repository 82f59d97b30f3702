#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use plugrpc_mux::Broker;
use plugrpc_plugin::{
    Artifact, CommandOutcome, Communicator, PluginClient, PluginError, PluginServer,
    RemoteCommand, Result, Ui,
};
use plugrpc_rpc::{Codec, ConfigValue};
use plugrpc_transport::IpcStream;

pub struct Session {
    pub core: PluginClient,
    pub plugin_broker: Broker,
    pub serving: thread::JoinHandle<Result<()>>,
}

impl Session {
    pub fn core_broker(&self) -> &Broker {
        self.core.broker()
    }

    /// Both ends are down to the primary stream.
    pub fn wait_for_baseline(&self) {
        wait_until("core streams back to baseline", || {
            self.core_broker().live_streams() == 1
        });
        wait_until("plugin streams back to baseline", || {
            self.plugin_broker.live_streams() == 1
        });
    }

    pub fn finish(self) {
        self.core.close();
        let _ = self.serving.join().unwrap();
    }
}

/// Start a plugin over a socket pair, letting `setup` register its objects.
pub fn start(codec: Codec, setup: impl FnOnce(&mut PluginServer)) -> Session {
    let (core_end, plugin_end) = IpcStream::pair().unwrap();
    let mut server = PluginServer::new(plugin_end, codec).unwrap();
    setup(&mut server);
    let plugin_broker = server.broker().clone();
    let serving = thread::spawn(move || server.serve());

    let core = PluginClient::new(core_end, codec).unwrap();
    Session {
        core,
        plugin_broker,
        serving,
    }
}

pub fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(3);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting: {what}");
        thread::sleep(Duration::from_millis(10));
    }
}

#[derive(Default)]
pub struct RecordingUi {
    pub lines: Mutex<Vec<String>>,
}

impl RecordingUi {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

impl Ui for RecordingUi {
    fn ask(&self, query: &str) -> Result<String> {
        self.lines.lock().unwrap().push(format!("ask: {query}"));
        Ok("yes".to_string())
    }

    fn say(&self, message: &str) -> Result<()> {
        self.lines.lock().unwrap().push(message.to_string());
        Ok(())
    }

    fn message(&self, message: &str) -> Result<()> {
        self.lines.lock().unwrap().push(format!("message: {message}"));
        Ok(())
    }

    fn error(&self, message: &str) -> Result<()> {
        self.lines.lock().unwrap().push(format!("error: {message}"));
        Ok(())
    }

    fn machine(&self, category: &str, args: &[String]) -> Result<()> {
        self.lines
            .lock()
            .unwrap()
            .push(format!("machine: {category} {}", args.join(",")));
        Ok(())
    }
}

/// A machine whose file system is a map.
#[derive(Default)]
pub struct MemCommunicator {
    pub files: Mutex<HashMap<String, Vec<u8>>>,
    pub commands: Mutex<Vec<String>>,
}

impl MemCommunicator {
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(path).cloned()
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

impl Communicator for MemCommunicator {
    fn start(&self, command: &RemoteCommand) -> Result<CommandOutcome> {
        self.commands.lock().unwrap().push(command.command.clone());
        Ok(CommandOutcome {
            exit_status: 0,
            stdout: format!("ran {}", command.command).into_bytes(),
            stderr: command.stdin.clone(),
        })
    }

    fn upload(&self, dst: &str, src: &mut dyn Read) -> Result<()> {
        let mut contents = Vec::new();
        src.read_to_end(&mut contents)?;
        self.files.lock().unwrap().insert(dst.to_string(), contents);
        Ok(())
    }

    fn upload_dir(&self, dst: &str, src: &str, exclude: &[String]) -> Result<()> {
        self.commands
            .lock()
            .unwrap()
            .push(format!("upload_dir {src} -> {dst} excluding {}", exclude.join(",")));
        Ok(())
    }

    fn download(&self, src: &str, dst: &mut dyn Write) -> Result<()> {
        let contents = self
            .file(src)
            .ok_or_else(|| PluginError::failed(format!("no such file: {src}")))?;
        dst.write_all(&contents)?;
        Ok(())
    }

    fn download_dir(&self, src: &str, dst: &str, exclude: &[String]) -> Result<()> {
        self.commands
            .lock()
            .unwrap()
            .push(format!("download_dir {src} -> {dst} excluding {}", exclude.join(",")));
        Ok(())
    }
}

pub struct MemArtifact {
    pub id: String,
    pub destroyed: Arc<AtomicBool>,
}

impl MemArtifact {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            destroyed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

impl Artifact for MemArtifact {
    fn builder_id(&self) -> Result<String> {
        Ok("plugrpc.image".to_string())
    }

    fn files(&self) -> Result<Vec<String>> {
        Ok(vec![format!("{}.img", self.id)])
    }

    fn id(&self) -> Result<String> {
        Ok(self.id.clone())
    }

    fn description(&self) -> Result<String> {
        Ok(format!("image {}", self.id))
    }

    fn state(&self, name: &str) -> Result<ConfigValue> {
        Ok(match name {
            "region" => ConfigValue::from("eu-west"),
            _ => ConfigValue::Null,
        })
    }

    fn destroy(&self) -> Result<()> {
        self.destroyed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
