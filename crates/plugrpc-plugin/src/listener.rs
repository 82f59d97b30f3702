use std::path::Path;

use plugrpc_rpc::Codec;
use plugrpc_transport::UnixSocketListener;
use tracing::debug;

use crate::client::PluginClient;
use crate::config::PluginConfig;
use crate::error::Result;
use crate::server::PluginServer;

/// Accepts plugin sessions on a Unix domain socket.
///
/// Each accepted connection becomes a [`PluginServer`]; register objects on
/// it and call [`PluginServer::serve`], usually on a thread per session.
pub struct PluginListener {
    socket: UnixSocketListener,
    config: PluginConfig,
}

impl PluginListener {
    /// Bind to a socket path.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            socket: UnixSocketListener::bind(path)?,
            config: PluginConfig::default(),
        })
    }

    /// Override the session config used for accepted connections.
    pub fn with_config(mut self, config: PluginConfig) -> Self {
        self.config = config;
        self
    }

    /// Accept the next session (blocking).
    pub fn accept(&self) -> Result<PluginServer> {
        let stream = self.socket.accept()?;
        debug!(path = ?self.socket.path(), "plugin session accepted");
        PluginServer::with_config(stream, &self.config)
    }

    /// Bound socket path.
    pub fn path(&self) -> &Path {
        self.socket.path()
    }
}

/// Connect to a listening plugin as the core.
pub fn connect(path: impl AsRef<Path>, codec: Codec) -> Result<PluginClient> {
    connect_with_config(path, &PluginConfig::new(codec))
}

/// Connect with explicit session configuration.
pub fn connect_with_config(path: impl AsRef<Path>, config: &PluginConfig) -> Result<PluginClient> {
    let stream = UnixSocketListener::connect(path)?;
    PluginClient::with_config(stream, config)
}
