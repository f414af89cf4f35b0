//! IDE-side session coordination: allocates logical channels, runs the
//! start-session handshake over the control channel, and hands out
//! per-session stream pairs.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{debug, warn};

use agentlink_mux::{ChannelStreams, ChannelWriter, MuxConfig, Multiplexor, CONTROL_CHANNEL};

use crate::control::{AttachDebugger, SessionParams, StartSession, TaskKind};
use crate::error::{RemoteError, Result};
use crate::sender::Sender;

/// Lifecycle of one session.
///
/// `Allocated` and `Handshaking` are transient: a handle returned by
/// [`Connection::new_session`] is already `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Allocated,
    Handshaking,
    Active,
    Closed,
    Failed,
}

/// Multiplex a raw connection and take its control channel, yielding a
/// connection that can start sessions.
pub fn open_connection<R, W>(conn_in: R, conn_out: W) -> Result<Connection>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    open_connection_with_config(conn_in, conn_out, MuxConfig::default())
}

pub fn open_connection_with_config<R, W>(
    conn_in: R,
    conn_out: W,
    config: MuxConfig,
) -> Result<Connection>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    let mux = Multiplexor::with_config(conn_in, conn_out, config);
    let control = mux.streams_for_channel(CONTROL_CHANNEL)?;
    let sender = Arc::new(Sender::new(control.reader, control.writer));
    Ok(Connection {
        mux,
        sender,
        next_channel: AtomicU32::new(1),
    })
}

/// IDE-side endpoint of one multiplexed connection.
///
/// Channel ids are allocated monotonically starting at 1 and never
/// reused; channel 0 stays reserved for the control protocol.
pub struct Connection {
    mux: Multiplexor,
    sender: Arc<Sender<ChannelWriter>>,
    next_channel: AtomicU32,
}

impl Connection {
    /// Start a session: allocate a channel, register its streams, and
    /// run the start-session handshake. Returns only once the remote
    /// has acknowledged; on any failure the channel is released so no
    /// half-open session lingers.
    pub fn new_session(&self, params: SessionParams) -> Result<SessionHandle> {
        if self.mux.is_closed() {
            return Err(RemoteError::ConnectionClosed);
        }
        let channel = self.next_channel.fetch_add(1, Ordering::Relaxed);
        debug!(channel, name = %params.name, "allocated session channel");

        // Register before announcing, so nothing the remote sends on
        // this channel the moment it learns the id can be lost.
        let streams = self.mux.streams_for_channel(channel)?;

        match self.handshake(channel, &params) {
            Ok(()) => Ok(SessionHandle {
                channel,
                params,
                streams,
                mux: self.mux.clone(),
                sender: Arc::clone(&self.sender),
                state: Mutex::new(SessionState::Active),
            }),
            Err(err) => {
                warn!(channel, error = %err, "session handshake failed");
                self.mux.release_channel(channel);
                Err(err)
            }
        }
    }

    fn handshake(&self, channel: u32, params: &SessionParams) -> Result<()> {
        let request = StartSession {
            channel,
            params: params.clone(),
        };
        let future = self
            .sender
            .send_and_receive::<_, Value>(TaskKind::StartSession, &request)?;
        future.wait()?;
        Ok(())
    }

    /// Ask the remote to wind down, then tear down the local endpoint.
    /// The shutdown notice is best effort; a dead connection does not
    /// keep the local side from closing.
    pub fn shutdown(&self) {
        if let Err(err) = self.sender.notify(TaskKind::Shutdown, &Value::Null) {
            debug!(error = %err, "shutdown notice not delivered");
        }
        self.mux.close();
    }

    pub fn is_closed(&self) -> bool {
        self.mux.is_closed()
    }
}

/// One active session on a connection.
pub struct SessionHandle {
    channel: u32,
    params: SessionParams,
    streams: ChannelStreams,
    mux: Multiplexor,
    sender: Arc<Sender<ChannelWriter>>,
    state: Mutex<SessionState>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("channel", &self.channel)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl SessionHandle {
    pub fn channel(&self) -> u32 {
        self.channel
    }

    pub fn params(&self) -> &SessionParams {
        &self.params
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    /// The session's dedicated byte streams.
    pub fn streams(&self) -> Result<ChannelStreams> {
        match self.state() {
            SessionState::Active => Ok(self.streams.clone()),
            _ => Err(RemoteError::SessionClosed),
        }
    }

    /// Ask the remote to connect this session's process to a debugger
    /// listening at `host:port`.
    pub fn attach_debugger(
        &self,
        host: &str,
        port: u16,
        properties: BTreeMap<String, String>,
    ) -> Result<()> {
        if self.state() != SessionState::Active {
            return Err(RemoteError::SessionClosed);
        }
        let request = AttachDebugger {
            channel: self.channel,
            host: host.to_owned(),
            port,
            properties,
        };
        let result = self
            .sender
            .send_and_receive::<_, Value>(TaskKind::AttachDebugger, &request)
            .and_then(|future| future.wait());
        match result {
            Ok(_) => Ok(()),
            Err(err) => {
                if matches!(err, RemoteError::ConnectionClosed) {
                    *self.state.lock().unwrap() = SessionState::Failed;
                }
                Err(err)
            }
        }
    }

    /// Close the session and release its channel. Idempotent; the
    /// channel id is never handed out again.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        if matches!(*state, SessionState::Closed | SessionState::Failed) {
            return;
        }
        *state = SessionState::Closed;
        drop(state);
        debug!(channel = self.channel, "closing session");
        self.mux.release_channel(self.channel);
    }
}
