//! Duplex byte transports for plugin sessions.
//!
//! A session runs over exactly one physical connection. This crate hides what
//! that connection is:
//! - a Unix domain socket (listener/connector or an in-process pair)
//! - a pair of pipes (a child process's stdin/stdout)
//! - this process's own stdio
//!
//! Everything above works with [`IpcStream`] and its split halves.

pub mod error;
pub mod stream;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use stream::{IpcStream, ReadHalf, ShutdownHandle, WriteHalf};

#[cfg(unix)]
pub use uds::UnixSocketListener;
