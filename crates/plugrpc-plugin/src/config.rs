use plugrpc_mux::BrokerConfig;
use plugrpc_rpc::Codec;

/// Settings fixed for the lifetime of a plugin session.
#[derive(Debug, Clone, Default)]
pub struct PluginConfig {
    /// Use the compact binary codec instead of the legacy JSON one. Both
    /// ends must agree.
    pub use_compact: bool,
    pub broker: BrokerConfig,
}

impl PluginConfig {
    pub fn new(codec: Codec) -> Self {
        Self {
            use_compact: codec == Codec::Compact,
            broker: BrokerConfig::default(),
        }
    }

    pub fn codec(&self) -> Codec {
        Codec::from_flag(self.use_compact)
    }
}
