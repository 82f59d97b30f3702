//! Wire encodings for RPC records.
//!
//! | Codec    | Encoding            | Tag  |
//! |----------|---------------------|------|
//! | Legacy   | JSON (`serde_json`) | `J`  |
//! | Compact  | `postcard`          | `P`  |
//!
//! The tag is the first byte of every record, so two ends configured with
//! different codecs fail with a clear mismatch rather than garbage decodes.

use plugrpc_mux::{LogicalStream, StreamReader, StreamWriter};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, RpcError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Codec {
    /// JSON, understood by first-generation plugins.
    #[default]
    Legacy,
    /// Compact binary.
    Compact,
}

impl Codec {
    /// Pick the codec from the session's `use_compact` flag.
    pub fn from_flag(use_compact: bool) -> Self {
        if use_compact {
            Self::Compact
        } else {
            Self::Legacy
        }
    }

    pub fn tag(self) -> u8 {
        match self {
            Self::Legacy => b'J',
            Self::Compact => b'P',
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Legacy => "legacy",
            Self::Compact => "compact",
        }
    }

    pub fn encode<T: Serialize + ?Sized>(self, value: &T) -> Result<Vec<u8>> {
        match self {
            Self::Legacy => serde_json::to_vec(value).map_err(|e| RpcError::Encode(e.to_string())),
            Self::Compact => {
                postcard::to_stdvec(value).map_err(|e| RpcError::Encode(e.to_string()))
            }
        }
    }

    pub fn decode<T: DeserializeOwned>(self, bytes: &[u8]) -> Result<T> {
        match self {
            Self::Legacy => {
                serde_json::from_slice(bytes).map_err(|e| RpcError::Encode(e.to_string()))
            }
            Self::Compact => {
                // postcard is not self-describing; leftover bytes mean the
                // value was written as some other type.
                let (value, rest) = postcard::take_from_bytes(bytes)
                    .map_err(|e| RpcError::Encode(e.to_string()))?;
                if !rest.is_empty() {
                    return Err(RpcError::Encode(format!(
                        "{} trailing bytes after value",
                        rest.len()
                    )));
                }
                Ok(value)
            }
        }
    }

    /// Wrap a logical stream as an RPC connection speaking this codec.
    pub fn connect(self, stream: LogicalStream) -> RpcConnection {
        RpcConnection {
            codec: self,
            stream,
        }
    }
}

impl std::fmt::Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A logical stream dedicated to RPC in one codec.
///
/// Handed to either [`RpcClient::new`](crate::RpcClient::new) or
/// [`RpcServer::serve`](crate::RpcServer::serve).
#[derive(Debug)]
pub struct RpcConnection {
    codec: Codec,
    stream: LogicalStream,
}

impl RpcConnection {
    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn stream_id(&self) -> u32 {
        self.stream.id()
    }

    pub(crate) fn into_parts(self) -> (Codec, StreamReader, StreamWriter) {
        let (reader, writer) = self.stream.split();
        (self.codec, reader, writer)
    }
}
