//! Framing for multiplexed plugin sessions.
//!
//! Every frame on the physical connection is:
//! - a 4-byte little-endian stream ID
//! - a 4-byte little-endian payload length
//! - the payload
//!
//! Stream lifecycle (open, accept, close) travels as [`ControlFrame`]s on the
//! reserved [`CONTROL_STREAM`].

pub mod codec;
pub mod control;
pub mod error;
pub mod reader;
pub mod stream;
pub mod writer;

#[cfg(feature = "async")]
pub mod async_codec;

#[cfg(feature = "async")]
pub use async_codec::MuxCodec;
pub use codec::{decode_frame, encode_frame, Frame, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE};
pub use control::{ControlFrame, ControlKind, CONTROL_FRAME_LEN};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use stream::{stream_name, CONTROL_STREAM, PRIMARY_STREAM};
pub use writer::FrameWriter;
