//! Stream multiplexing for plugin sessions.
//!
//! A [`Broker`] owns one physical connection and presents any number of
//! independent logical streams over it. One side dials a stream ID, the other
//! accepts it; after that the stream behaves like its own duplex connection.
//!
//! ```text
//! core                                   plugin
//!  │  dial(0) ──── Open(0) ───────────────▶ accept(0)
//!  │         ◀─── Accept(0) ──────────────  │
//!  │  next_id() = 3, serve on 3             │
//!  │  call(.., 3) on stream 0 ────────────▶ dial(3)
//!  │  accept(3) ◀──────────── Open(3) ────  │
//! ```
//!
//! Stream IDs handed out by [`Broker::next_id`] are partitioned by [`Role`],
//! so the two sides can allocate concurrently without coordination.

pub mod broker;
pub mod config;
pub mod error;
pub mod stream;

mod table;

pub use broker::Broker;
pub use config::{BrokerConfig, Role, DEFAULT_ACCEPT_TIMEOUT, DEFAULT_DATA_CHUNK};
pub use error::{MuxError, Result};
pub use stream::{LogicalStream, StreamHandle, StreamReader, StreamWriter};
