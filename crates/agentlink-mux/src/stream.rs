use std::io::{Read, Write};
use std::sync::Arc;

use crate::buffer::{closed_error, ChannelBuffer};
use crate::multiplexor::Shared;

/// The logical stream pair bound to one channel.
///
/// Cloning yields handles over the same logical stream: two readers for
/// the same channel compete for the same bytes.
#[derive(Clone)]
pub struct ChannelStreams {
    pub reader: ChannelReader,
    pub writer: ChannelWriter,
}

impl std::fmt::Debug for ChannelStreams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelStreams")
            .field("channel", &self.channel())
            .finish_non_exhaustive()
    }
}

impl ChannelStreams {
    pub(crate) fn new(channel: u32, buffer: Arc<ChannelBuffer>, shared: Arc<Shared>) -> Self {
        Self {
            reader: ChannelReader { buffer },
            writer: ChannelWriter { channel, shared },
        }
    }

    /// The channel ID both halves are bound to.
    pub fn channel(&self) -> u32 {
        self.writer.channel
    }
}

/// Read half of a logical channel.
///
/// Sees only bytes framed for its channel, in the order the peer sent
/// them. Blocks until data arrives or the connection dies; buffered
/// data is drained before a dead connection is reported.
#[derive(Clone)]
pub struct ChannelReader {
    buffer: Arc<ChannelBuffer>,
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.buffer.read(buf)
    }
}

/// Write half of a logical channel.
///
/// Payloads larger than the configured chunk size are split into
/// multiple frames so one channel cannot monopolize the wire. All
/// channel writers funnel through a single frame-writer lock: frames
/// are never interleaved mid-frame.
#[derive(Clone)]
pub struct ChannelWriter {
    channel: u32,
    shared: Arc<Shared>,
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.shared.is_dead() {
            return Err(closed_error());
        }
        self.shared.write_chunked(self.channel, buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if self.shared.is_dead() {
            return Err(closed_error());
        }
        self.shared.flush_raw()
    }
}
