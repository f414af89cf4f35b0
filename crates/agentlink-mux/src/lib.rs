//! Stream multiplexor: N independent logical channels over one
//! bidirectional byte connection.
//!
//! One background thread demultiplexes inbound frames into per-channel
//! buffers; any number of foreground callers read and write distinct
//! channels concurrently. Per-channel byte order is preserved; no
//! ordering is guaranteed across channels.
//!
//! Channel 0 is reserved for control traffic by convention of the
//! layers above; the multiplexor itself treats all channel IDs alike.

mod buffer;
mod registry;

pub mod error;
pub mod multiplexor;
pub mod stream;

pub use error::{MuxError, Result};
pub use multiplexor::{Multiplexor, MuxConfig, CONTROL_CHANNEL};
pub use stream::{ChannelReader, ChannelStreams, ChannelWriter};
