use plugrpc_frame::PRIMARY_STREAM;
use plugrpc_mux::{Broker, Role};
use plugrpc_rpc::{Codec, RpcClient};
use plugrpc_transport::IpcStream;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::PluginConfig;
use crate::error::Result;
use crate::export::{export, Export};
use crate::interfaces::{
    ArtifactProxy, BuildProxy, BuilderProxy, CommunicatorProxy, DatasourceProxy, HookProxy,
    PostProcessorProxy, ProvisionerProxy, UiProxy,
};
use crate::kind::{InterfaceKind, LocalObject};

/// RPC access to whatever the peer serves on one stream.
///
/// The session-level client (from [`new`](Self::new)) owns its broker and
/// talks on stream 0. Clients made with [`with_broker`](Self::with_broker)
/// reach a single exported object on its own stream.
#[derive(Clone)]
pub struct PluginClient {
    rpc: RpcClient,
    broker: Broker,
    owns_broker: bool,
}

impl PluginClient {
    /// Start a session as the core: run a client-role broker over
    /// `transport` and dial the primary stream.
    pub fn new(transport: IpcStream, codec: Codec) -> Result<Self> {
        Self::with_config(transport, &PluginConfig::new(codec))
    }

    pub fn with_config(transport: IpcStream, config: &PluginConfig) -> Result<Self> {
        let transport_kind = transport.kind();
        let broker = Broker::new(transport, Role::Client, config.broker.clone())?;
        broker.spawn()?;

        let stream = match broker.dial(PRIMARY_STREAM) {
            Ok(stream) => stream,
            Err(err) => {
                broker.close();
                return Err(err.into());
            }
        };
        let codec = config.codec();
        let rpc = RpcClient::new(codec.connect(stream))?;
        info!(transport = transport_kind, %codec, "plugin session started");

        Ok(Self {
            rpc,
            broker,
            owns_broker: true,
        })
    }

    /// Dial stream `id` on an existing session, typically an ID the peer
    /// sent in place of an object.
    pub fn with_broker(broker: &Broker, id: u32, codec: Codec) -> Result<Self> {
        let stream = broker.dial(id)?;
        let rpc = RpcClient::new(codec.connect(stream))?;
        debug!(stream_id = id, "connected to exported object");
        Ok(Self {
            rpc,
            broker: broker.clone(),
            owns_broker: false,
        })
    }

    /// Call `method` on the `kind` endpoint.
    pub fn call<A, R>(&self, kind: InterfaceKind, method: &str, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let service_method = format!("{}.{method}", kind.endpoint_name());
        Ok(self.rpc.call(&service_method, args)?)
    }

    /// Serve a local object to the peer of this session.
    pub fn export(&self, object: LocalObject) -> Result<Export> {
        export(&self.broker, self.codec(), object)
    }

    pub fn codec(&self) -> Codec {
        self.rpc.codec()
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    pub fn rpc(&self) -> &RpcClient {
        &self.rpc
    }

    pub fn stream_id(&self) -> u32 {
        self.rpc.stream_id()
    }

    /// Close this client's stream, and the whole session if this client
    /// started it.
    pub fn close(&self) {
        self.rpc.close();
        if self.owns_broker {
            info!("plugin session closing");
            self.broker.close();
        }
    }

    pub fn builder(&self) -> BuilderProxy {
        BuilderProxy::new(self.clone())
    }

    pub fn provisioner(&self) -> ProvisionerProxy {
        ProvisionerProxy::new(self.clone())
    }

    pub fn post_processor(&self) -> PostProcessorProxy {
        PostProcessorProxy::new(self.clone())
    }

    pub fn datasource(&self) -> DatasourceProxy {
        DatasourceProxy::new(self.clone())
    }

    pub fn artifact(&self) -> ArtifactProxy {
        ArtifactProxy::new(self.clone())
    }

    pub fn build(&self) -> BuildProxy {
        BuildProxy::new(self.clone())
    }

    pub fn communicator(&self) -> CommunicatorProxy {
        CommunicatorProxy::new(self.clone())
    }

    pub fn hook(&self) -> HookProxy {
        HookProxy::new(self.clone())
    }

    pub fn ui(&self) -> UiProxy {
        UiProxy::new(self.clone())
    }
}

impl std::fmt::Debug for PluginClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginClient")
            .field("stream_id", &self.rpc.stream_id())
            .field("codec", &self.rpc.codec())
            .field("owns_broker", &self.owns_broker)
            .finish()
    }
}
