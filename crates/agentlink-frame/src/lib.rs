//! Varint-delimited message framing with channel routing.
//!
//! This is the only layer of agentlink that touches the wire directly.
//! Every frame carries:
//! - The channel ID as an unsigned LEB128 varint
//! - The payload length as an unsigned LEB128 varint
//! - The payload bytes
//!
//! Frames from different channels may interleave arbitrarily on the wire;
//! no partial reads or buffer management leaks into user code.

pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_frame, encode_frame, Frame, FrameConfig, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_PAYLOAD,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
