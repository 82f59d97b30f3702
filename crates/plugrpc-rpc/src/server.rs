use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::codec::{Codec, RpcConnection};
use crate::error::{Result, RpcError, WireError};
use crate::record::{RecordReader, RecordWriter, RequestHeader, ResponseHeader};

/// Failure of a single request inside a [`Service`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServeError {
    #[error("no such method: {0}")]
    NoSuchMethod(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The implementation ran and failed.
    #[error("{0}")]
    Failed(String),
}

impl ServeError {
    pub fn failed(err: impl std::fmt::Display) -> Self {
        Self::Failed(err.to_string())
    }
}

/// Arguments of one incoming request, still encoded.
pub struct Request<'a> {
    codec: Codec,
    body: &'a [u8],
}

impl<'a> Request<'a> {
    pub fn new(codec: Codec, body: &'a [u8]) -> Self {
        Self { codec, body }
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Decode the arguments as `T`.
    pub fn args<T: DeserializeOwned>(&self) -> std::result::Result<T, ServeError> {
        self.codec
            .decode(self.body)
            .map_err(|err| ServeError::InvalidArguments(err.to_string()))
    }

    /// Encode a successful reply.
    pub fn reply<T: Serialize + ?Sized>(&self, value: &T) -> std::result::Result<Vec<u8>, ServeError> {
        self.codec.encode(value).map_err(ServeError::failed)
    }
}

/// A named method surface that can be served on an RPC connection.
pub trait Service: Send + Sync {
    /// Run `method` and return the encoded reply body.
    fn call(&self, method: &str, request: &Request<'_>) -> std::result::Result<Vec<u8>, ServeError>;
}

/// Dispatches requests to registered endpoints.
#[derive(Clone, Default)]
pub struct RpcServer {
    endpoints: HashMap<String, Arc<dyn Service>>,
}

impl RpcServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `service` under `name`. A later registration replaces an
    /// earlier one with the same name.
    pub fn register(&mut self, name: impl Into<String>, service: Arc<dyn Service>) {
        let name = name.into();
        debug!(endpoint = %name, "endpoint registered");
        self.endpoints.insert(name, service);
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &str> {
        self.endpoints.keys().map(String::as_str)
    }

    /// Serve requests on `conn` until the peer closes it.
    ///
    /// Each request runs on its own thread, so a handler that calls back
    /// into the peer does not block other requests on the connection. Waits
    /// for running handlers before returning.
    pub fn serve(&self, conn: RpcConnection) -> Result<()> {
        let stream_id = conn.stream_id();
        let (codec, reader, writer) = conn.into_parts();
        let writer = Arc::new(RecordWriter::new(codec, writer));
        let endpoints = Arc::new(self.endpoints.clone());
        let mut records = RecordReader::new(reader);
        let mut handlers: Vec<JoinHandle<()>> = Vec::new();

        debug!(stream_id, %codec, "serving rpc connection");
        let outcome = loop {
            let record = match records.next_record() {
                Ok(Some(record)) => record,
                Ok(None) | Err(RpcError::ConnectionClosed) => break Ok(()),
                Err(err @ RpcError::Protocol(_)) => {
                    warn!(stream_id, error = %err, "malformed request record");
                    records.close_session("malformed rpc request");
                    break Err(err);
                }
                Err(err) => break Err(err),
            };

            if record.tag != codec.tag() {
                warn!(stream_id, expected = codec.tag(), got = record.tag, "request in a different codec");
                let header = ResponseHeader {
                    seq: 0,
                    service_method: String::new(),
                    error: Some(WireError::ProtocolMismatch {
                        expected: codec.tag(),
                        got: record.tag,
                    }),
                };
                let _ = writer.write(&header, &[]);
                writer.close();
                break Err(RpcError::ProtocolMismatch {
                    expected: codec.tag(),
                    got: record.tag,
                });
            }

            let header: RequestHeader = match codec.decode(&record.header) {
                Ok(header) => header,
                Err(err) => {
                    // The caller cannot be told which call failed.
                    warn!(stream_id, error = %err, "undecodable request header");
                    records.close_session("undecodable rpc request header");
                    break Err(RpcError::Protocol(format!("undecodable request header: {err}")));
                }
            };

            handlers.retain(|handler| !handler.is_finished());
            let job = Job {
                codec,
                endpoints: Arc::clone(&endpoints),
                writer: Arc::clone(&writer),
                header,
                body: record.body,
            };
            let spawned = std::thread::Builder::new()
                .name(format!("plugrpc-rpc-serve-{stream_id}"))
                .spawn(move || job.run());
            match spawned {
                Ok(handler) => handlers.push(handler),
                Err(err) => {
                    warn!(error = %err, "failed to spawn request thread");
                    break Err(RpcError::Protocol(format!("failed to spawn request thread: {err}")));
                }
            }
        };

        for handler in handlers {
            let _ = handler.join();
        }
        debug!(stream_id, ok = outcome.is_ok(), "rpc connection finished");
        outcome
    }
}

struct Job {
    codec: Codec,
    endpoints: Arc<HashMap<String, Arc<dyn Service>>>,
    writer: Arc<RecordWriter>,
    header: RequestHeader,
    body: Bytes,
}

impl Job {
    fn run(self) {
        let header = self.header;
        trace!(seq = header.seq, service_method = %header.service_method, "dispatch");

        let outcome = dispatch(&self.endpoints, self.codec, &header.service_method, &self.body);
        let (error, body) = match outcome {
            Ok(body) => (None, body),
            Err(err) => (Some(err), Vec::new()),
        };
        let response = ResponseHeader {
            seq: header.seq,
            service_method: header.service_method,
            error,
        };
        if let Err(err) = self.writer.write(&response, &body) {
            debug!(seq = response.seq, error = %err, "reply not delivered");
        }
    }
}

fn dispatch(
    endpoints: &HashMap<String, Arc<dyn Service>>,
    codec: Codec,
    service_method: &str,
    body: &[u8],
) -> std::result::Result<Vec<u8>, WireError> {
    let (endpoint, method) = service_method
        .split_once('.')
        .ok_or_else(|| WireError::NoSuchEndpoint(service_method.to_string()))?;
    let service = endpoints
        .get(endpoint)
        .ok_or_else(|| WireError::NoSuchEndpoint(endpoint.to_string()))?;

    service
        .call(method, &Request::new(codec, body))
        .map_err(|err| match err {
            ServeError::NoSuchMethod(_) => WireError::NoSuchMethod(service_method.to_string()),
            ServeError::InvalidArguments(msg) => WireError::InvalidArguments(msg),
            ServeError::Failed(msg) => WireError::Remote(msg),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl Service for Echo {
        fn call(&self, method: &str, request: &Request<'_>) -> std::result::Result<Vec<u8>, ServeError> {
            match method {
                "Echo" => {
                    let text: String = request.args()?;
                    request.reply(&text)
                }
                "Fail" => Err(ServeError::failed("refused")),
                other => Err(ServeError::NoSuchMethod(other.to_string())),
            }
        }
    }

    fn endpoints() -> HashMap<String, Arc<dyn Service>> {
        let mut map: HashMap<String, Arc<dyn Service>> = HashMap::new();
        map.insert("Test".into(), Arc::new(Echo));
        map
    }

    #[test]
    fn dispatch_routes_by_endpoint_and_method() {
        let codec = Codec::Legacy;
        let body = codec.encode("hi").unwrap();
        let reply = dispatch(&endpoints(), codec, "Test.Echo", &body).unwrap();
        assert_eq!(codec.decode::<String>(&reply).unwrap(), "hi");
    }

    #[test]
    fn dispatch_errors_become_wire_errors() {
        let codec = Codec::Compact;
        let eps = endpoints();
        assert_eq!(
            dispatch(&eps, codec, "Nope.Echo", &[]),
            Err(WireError::NoSuchEndpoint("Nope".into()))
        );
        assert_eq!(
            dispatch(&eps, codec, "NoDot", &[]),
            Err(WireError::NoSuchEndpoint("NoDot".into()))
        );
        assert_eq!(
            dispatch(&eps, codec, "Test.Shout", &[]),
            Err(WireError::NoSuchMethod("Test.Shout".into()))
        );
        assert!(matches!(
            dispatch(&eps, codec, "Test.Echo", &[0xFF]),
            Err(WireError::InvalidArguments(_))
        ));
        assert_eq!(
            dispatch(&eps, codec, "Test.Fail", &[]),
            Err(WireError::Remote("refused".into()))
        );
    }
}
