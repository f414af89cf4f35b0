use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use agentlink_frame::{
    FrameConfig, FrameError, FrameReader, FrameWriter, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_PAYLOAD,
};
use tracing::{debug, error};

use crate::buffer::closed_error;
use crate::error::{MuxError, Result};
use crate::registry::ChannelRegistry;
use crate::stream::ChannelStreams;

/// Channel 0, reserved by convention for control traffic.
pub const CONTROL_CHANNEL: u32 = 0;

/// Configuration for a multiplexed connection.
#[derive(Debug, Clone)]
pub struct MuxConfig {
    /// Maximum inbound frame payload size. Larger frames kill the
    /// connection (byte alignment cannot be trusted afterwards).
    pub max_payload_size: usize,
    /// Outbound payloads are split into frames of at most this size.
    pub chunk_size: usize,
    /// Per-channel inbound buffer limit in bytes. Once a channel's
    /// buffer is full the demultiplexing thread blocks until a reader
    /// drains it (bounded-buffer backpressure).
    pub inbound_buffer_limit: usize,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            chunk_size: DEFAULT_CHUNK_SIZE,
            inbound_buffer_limit: 256 * 1024,
        }
    }
}

pub(crate) struct Shared {
    registry: ChannelRegistry,
    writer: Mutex<FrameWriter<Box<dyn Write + Send>>>,
    dead: AtomicBool,
    chunk_size: usize,
}

impl Shared {
    pub(crate) fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    /// Mark the connection dead and fail every logical stream. The
    /// transition is total and irreversible; only the first call acts.
    pub(crate) fn fail(&self) {
        if !self.dead.swap(true, Ordering::AcqRel) {
            debug!("connection marked dead, failing all channels");
            self.registry.close_all();
        }
    }

    /// Write `buf` as one or more frames on `channel`, holding the raw
    /// write lock per frame so concurrent writers never interleave
    /// mid-frame.
    pub(crate) fn write_chunked(&self, channel: u32, buf: &[u8]) -> std::io::Result<()> {
        for chunk in buf.chunks(self.chunk_size) {
            let mut writer = self.writer.lock().unwrap();
            if let Err(err) = writer.send(channel, chunk) {
                drop(writer);
                return Err(self.fail_on_write_error(err));
            }
        }
        Ok(())
    }

    pub(crate) fn flush_raw(&self) -> std::io::Result<()> {
        let mut writer = self.writer.lock().unwrap();
        if let Err(err) = writer.flush() {
            drop(writer);
            return Err(self.fail_on_write_error(err));
        }
        Ok(())
    }

    fn fail_on_write_error(&self, err: FrameError) -> std::io::Error {
        self.fail();
        match err {
            FrameError::Io(io) => io,
            FrameError::ConnectionClosed => closed_error(),
            other => std::io::Error::other(other.to_string()),
        }
    }
}

/// Owns one raw bidirectional connection and demultiplexes it into
/// independent logical channels.
///
/// Construction spawns a single background thread that reads frames
/// from the raw input until EOF or I/O error, routing each payload to
/// its channel's inbound buffer. Handles are cheap clones over shared
/// state.
#[derive(Clone)]
pub struct Multiplexor {
    shared: Arc<Shared>,
}

impl Multiplexor {
    /// Take ownership of a raw connection and start demultiplexing.
    pub fn new<R, W>(conn_in: R, conn_out: W) -> Self
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        Self::with_config(conn_in, conn_out, MuxConfig::default())
    }

    /// As [`Multiplexor::new`], with explicit configuration.
    pub fn with_config<R, W>(conn_in: R, conn_out: W, config: MuxConfig) -> Self
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let frame_config = FrameConfig {
            max_payload_size: config.max_payload_size,
        };
        let shared = Arc::new(Shared {
            registry: ChannelRegistry::new(config.inbound_buffer_limit),
            writer: Mutex::new(FrameWriter::with_config(
                Box::new(conn_out) as Box<dyn Write + Send>,
                frame_config.clone(),
            )),
            dead: AtomicBool::new(false),
            chunk_size: config.chunk_size,
        });

        let demux_shared = Arc::clone(&shared);
        let frames = FrameReader::with_config(conn_in, frame_config);
        thread::Builder::new()
            .name("agentlink-demux".into())
            .spawn(move || demux_loop(frames, demux_shared))
            .expect("failed to spawn demux thread");

        Self { shared }
    }

    /// The logical stream pair for `channel`.
    ///
    /// Idempotent: the same channel always resolves to the same logical
    /// stream, whether or not frames for it have arrived yet. Fails once
    /// the connection is dead or the channel has been released.
    pub fn streams_for_channel(&self, channel: u32) -> Result<ChannelStreams> {
        if self.shared.is_dead() {
            return Err(MuxError::ConnectionClosed);
        }
        let buffer = self
            .shared
            .registry
            .get_or_create(channel)
            .ok_or(MuxError::ChannelReleased(channel))?;
        Ok(ChannelStreams::new(channel, buffer, Arc::clone(&self.shared)))
    }

    /// Tear down `channel`: readers see EOF, late inbound frames are
    /// dropped, and the ID is never handed out again.
    pub fn release_channel(&self, channel: u32) {
        self.shared.registry.release(channel);
    }

    /// Close the connection locally. All logical streams fail from here
    /// on; the demux thread winds down when the raw input drains.
    pub fn close(&self) {
        self.shared.fail();
    }

    /// Whether the connection has been marked dead.
    pub fn is_closed(&self) -> bool {
        self.shared.is_dead()
    }
}

fn demux_loop<R: Read>(mut frames: FrameReader<R>, shared: Arc<Shared>) {
    loop {
        match frames.read_frame() {
            Ok(frame) => {
                if shared.is_dead() {
                    break;
                }
                match shared.registry.get_or_create(frame.channel) {
                    Some(buffer) => buffer.push(frame.payload),
                    None => debug!(channel = frame.channel, "dropping frame for released channel"),
                }
            }
            Err(FrameError::ConnectionClosed) => {
                debug!("raw connection closed");
                break;
            }
            Err(err) => {
                error!(error = %err, "demultiplexing failed");
                break;
            }
        }
    }
    shared.fail();
}
