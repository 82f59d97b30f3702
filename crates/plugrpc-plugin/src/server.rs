use std::sync::Arc;

use plugrpc_frame::PRIMARY_STREAM;
use plugrpc_mux::{Broker, Role};
use plugrpc_rpc::{Codec, RpcServer};
use plugrpc_transport::IpcStream;
use tracing::info;

use crate::config::PluginConfig;
use crate::error::{PluginError, Result};
use crate::interfaces::{
    Artifact, Build, Builder, Communicator, Datasource, Hook, PostProcessor, Provisioner,
    ServeContext, Ui,
};
use crate::kind::LocalObject;

/// The plugin side of a session: serves registered objects on stream 0.
pub struct PluginServer {
    broker: Broker,
    codec: Codec,
    rpc: RpcServer,
    owns_broker: bool,
}

impl PluginServer {
    /// Run a server-role broker over `transport`.
    pub fn new(transport: IpcStream, codec: Codec) -> Result<Self> {
        Self::with_config(transport, &PluginConfig::new(codec))
    }

    pub fn with_config(transport: IpcStream, config: &PluginConfig) -> Result<Self> {
        let broker = Broker::new(transport, Role::Server, config.broker.clone())?;
        broker.spawn()?;
        Ok(Self {
            broker,
            codec: config.codec(),
            rpc: RpcServer::new(),
            owns_broker: true,
        })
    }

    /// Serve on a broker whose routing loop is already running.
    pub fn with_broker(broker: Broker, codec: Codec) -> Self {
        Self {
            broker,
            codec,
            rpc: RpcServer::new(),
            owns_broker: false,
        }
    }

    /// Register `object` under its interface's endpoint name.
    pub fn register(&mut self, object: LocalObject) {
        let kind = object.kind();
        let ctx = ServeContext::new(self.broker.clone(), self.codec);
        self.rpc.register(kind.endpoint_name(), object.into_service(ctx));
    }

    pub fn register_builder(&mut self, builder: Arc<dyn Builder>) {
        self.register(LocalObject::Builder(builder));
    }

    pub fn register_provisioner(&mut self, provisioner: Arc<dyn Provisioner>) {
        self.register(LocalObject::Provisioner(provisioner));
    }

    pub fn register_post_processor(&mut self, post_processor: Arc<dyn PostProcessor>) {
        self.register(LocalObject::PostProcessor(post_processor));
    }

    pub fn register_datasource(&mut self, datasource: Arc<dyn Datasource>) {
        self.register(LocalObject::Datasource(datasource));
    }

    pub fn register_artifact(&mut self, artifact: Arc<dyn Artifact>) {
        self.register(LocalObject::Artifact(artifact));
    }

    pub fn register_build(&mut self, build: Arc<dyn Build>) {
        self.register(LocalObject::Build(build));
    }

    pub fn register_communicator(&mut self, communicator: Arc<dyn Communicator>) {
        self.register(LocalObject::Communicator(communicator));
    }

    pub fn register_hook(&mut self, hook: Arc<dyn Hook>) {
        self.register(LocalObject::Hook(hook));
    }

    pub fn register_ui(&mut self, ui: Arc<dyn Ui>) {
        self.register(LocalObject::Ui(ui));
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    /// Accept stream 0 and dispatch requests until the core closes it.
    ///
    /// Waits for the core as long as the session lives. Closes the session
    /// afterwards if this server started it.
    pub fn serve(self) -> Result<()> {
        let endpoints: Vec<&str> = self.rpc.endpoints().collect();
        info!(codec = %self.codec, ?endpoints, "serving plugin");

        let outcome: Result<()> = match self.broker.accept_with_timeout(PRIMARY_STREAM, None) {
            Ok(stream) => self
                .rpc
                .serve(self.codec.connect(stream))
                .map_err(PluginError::from),
            Err(err) => Err(err.into()),
        };

        if self.owns_broker {
            self.broker.close();
        }
        info!(ok = outcome.is_ok(), "plugin session finished");
        outcome
    }
}
