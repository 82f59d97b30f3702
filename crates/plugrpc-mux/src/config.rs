use std::fmt;
use std::time::Duration;

use plugrpc_frame::FrameConfig;

/// How long `accept` waits for the peer's open by default.
pub const DEFAULT_ACCEPT_TIMEOUT: Duration = Duration::from_secs(5);

/// Largest payload put into a single data frame: 1 MiB.
pub const DEFAULT_DATA_CHUNK: usize = 1024 * 1024;

/// Which end of the session this broker is.
///
/// The role only decides the parity of locally allocated stream IDs: the
/// client (the side that initiated the connection) hands out odd IDs, the
/// server even ones. ID 0 belongs to neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    /// First ID this side allocates.
    pub(crate) fn first_id(self) -> u32 {
        match self {
            Self::Client => 1,
            Self::Server => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Server => "server",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broker tuning.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Upper bound on `accept` waiting for the peer. Default: 5 s.
    pub accept_timeout: Duration,
    /// Upper bound on `dial` waiting for the peer's accept. Default: none,
    /// a dial blocks until the peer serves the ID or the session ends.
    pub dial_timeout: Option<Duration>,
    /// Writes larger than this are split into several data frames.
    pub max_payload_size: usize,
    /// Limits applied when reading frames off the connection.
    pub frame: FrameConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            accept_timeout: DEFAULT_ACCEPT_TIMEOUT,
            dial_timeout: None,
            max_payload_size: DEFAULT_DATA_CHUNK,
            frame: FrameConfig::default(),
        }
    }
}
