use std::io::{Read, Write};
use std::sync::Arc;

use plugrpc_mux::Broker;
use plugrpc_rpc::{Request, ServeError, Service};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{no_such_method, reply, ServeContext};
use crate::client::PluginClient;
use crate::error::{PluginError, Result};
use crate::kind::InterfaceKind;

/// A command to run on the machine behind a communicator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCommand {
    pub command: String,
    /// Fed to the command's standard input.
    #[serde(default)]
    pub stdin: Vec<u8>,
}

impl RemoteCommand {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            stdin: Vec::new(),
        }
    }
}

/// How a [`RemoteCommand`] ended.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub exit_status: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

/// Runs commands on and moves files to and from a machine.
pub trait Communicator: Send + Sync {
    fn start(&self, command: &RemoteCommand) -> Result<CommandOutcome>;
    /// Write everything `src` yields to `dst` on the machine.
    fn upload(&self, dst: &str, src: &mut dyn Read) -> Result<()>;
    fn upload_dir(&self, dst: &str, src: &str, exclude: &[String]) -> Result<()>;
    /// Copy `src` from the machine into `dst`.
    fn download(&self, src: &str, dst: &mut dyn Write) -> Result<()>;
    fn download_dir(&self, src: &str, dst: &str, exclude: &[String]) -> Result<()>;
}

#[derive(Serialize, Deserialize)]
struct TransferArgs {
    path: String,
    stream_id: u32,
}

#[derive(Serialize, Deserialize)]
struct DirArgs {
    src: String,
    dst: String,
    exclude: Vec<String>,
}

pub struct CommunicatorProxy {
    client: PluginClient,
}

impl CommunicatorProxy {
    pub fn new(client: PluginClient) -> Self {
        Self { client }
    }

    /// Run `method` while file contents move over a dedicated stream.
    ///
    /// The call runs on a scoped thread; `copy` runs here and owns the
    /// data stream, which the peer dials with the ID sent in the call.
    fn transfer(
        &self,
        method: &str,
        path: &str,
        copy: impl FnOnce(&Broker, u32) -> Result<u64>,
    ) -> Result<()> {
        let broker = self.client.broker();
        let stream_id = broker.next_id();
        let args = TransferArgs {
            path: path.to_string(),
            stream_id,
        };

        std::thread::scope(|scope| {
            let call = scope.spawn(|| {
                let outcome =
                    self.client
                        .call::<_, ()>(InterfaceKind::Communicator, method, &args);
                if outcome.is_err() {
                    broker.cancel_accept(stream_id);
                }
                outcome
            });
            let copied = copy(broker, stream_id);
            let called = call
                .join()
                .unwrap_or_else(|_| Err(PluginError::failed(format!("{method} call panicked"))));
            let bytes = called.and(copied)?;
            debug!(method, path, bytes, "transfer finished");
            Ok(())
        })
    }
}

fn send_stream(broker: &Broker, id: u32, src: &mut dyn Read) -> Result<u64> {
    let mut stream = broker.accept(id)?;
    let copied = std::io::copy(src, &mut stream);
    stream.close();
    Ok(copied?)
}

fn receive_stream(broker: &Broker, id: u32, dst: &mut dyn Write) -> Result<u64> {
    let mut stream = broker.accept(id)?;
    Ok(std::io::copy(&mut stream, dst)?)
}

impl Communicator for CommunicatorProxy {
    fn start(&self, command: &RemoteCommand) -> Result<CommandOutcome> {
        self.client.call(InterfaceKind::Communicator, "Start", command)
    }

    fn upload(&self, dst: &str, src: &mut dyn Read) -> Result<()> {
        self.transfer("Upload", dst, |broker, id| send_stream(broker, id, src))
    }

    fn upload_dir(&self, dst: &str, src: &str, exclude: &[String]) -> Result<()> {
        let args = DirArgs {
            src: src.to_string(),
            dst: dst.to_string(),
            exclude: exclude.to_vec(),
        };
        self.client.call(InterfaceKind::Communicator, "UploadDir", &args)
    }

    fn download(&self, src: &str, dst: &mut dyn Write) -> Result<()> {
        self.transfer("Download", src, |broker, id| receive_stream(broker, id, dst))
    }

    fn download_dir(&self, src: &str, dst: &str, exclude: &[String]) -> Result<()> {
        let args = DirArgs {
            src: src.to_string(),
            dst: dst.to_string(),
            exclude: exclude.to_vec(),
        };
        self.client.call(InterfaceKind::Communicator, "DownloadDir", &args)
    }
}

pub(crate) struct CommunicatorService {
    inner: Arc<dyn Communicator>,
    ctx: ServeContext,
}

impl CommunicatorService {
    pub(crate) fn new(inner: Arc<dyn Communicator>, ctx: ServeContext) -> Self {
        Self { inner, ctx }
    }
}

impl Service for CommunicatorService {
    fn call(&self, method: &str, request: &Request<'_>) -> std::result::Result<Vec<u8>, ServeError> {
        match method {
            "Start" => {
                let command: RemoteCommand = request.args()?;
                reply(request, self.inner.start(&command))
            }
            "Upload" => {
                let args: TransferArgs = request.args()?;
                let mut stream = self
                    .ctx
                    .broker()
                    .dial(args.stream_id)
                    .map_err(ServeError::failed)?;
                let outcome = self.inner.upload(&args.path, &mut stream);
                drop(stream);
                reply(request, outcome)
            }
            "Download" => {
                let args: TransferArgs = request.args()?;
                let mut stream = self
                    .ctx
                    .broker()
                    .dial(args.stream_id)
                    .map_err(ServeError::failed)?;
                let outcome = self.inner.download(&args.path, &mut stream);
                stream.close();
                reply(request, outcome)
            }
            "UploadDir" => {
                let args: DirArgs = request.args()?;
                reply(request, self.inner.upload_dir(&args.dst, &args.src, &args.exclude))
            }
            "DownloadDir" => {
                let args: DirArgs = request.args()?;
                reply(
                    request,
                    self.inner.download_dir(&args.src, &args.dst, &args.exclude),
                )
            }
            other => Err(no_such_method(other)),
        }
    }
}
