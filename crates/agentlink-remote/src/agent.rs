//! Remote-agent bootstrap: multiplexes the raw connection, answers
//! control tasks, and hands accepted sessions to a [`SessionFactory`].

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{debug, info};

use agentlink_mux::{ChannelStreams, MuxConfig, Multiplexor, CONTROL_CHANNEL};

use crate::control::{AttachDebugger, SessionParams, StartSession, TaskKind};
use crate::error::Result;
use crate::responder::{Responder, ResponderBuilder};

/// A session as the agent sees it: the channel the IDE allocated, the
/// parameters it sent, and the dedicated streams for the session.
pub struct AgentSession {
    pub channel: u32,
    pub params: SessionParams,
    pub streams: ChannelStreams,
}

/// Supplies the agent-side behavior for accepted sessions.
///
/// Both callbacks run on the control dispatch thread; a returned error
/// message is reported to the IDE as the task's failure outcome.
pub trait SessionFactory: Send + 'static {
    /// A start-session handshake arrived. Take ownership of the
    /// session's streams and start serving it; returning `Err` rejects
    /// the session.
    fn start_session(&mut self, session: AgentSession) -> std::result::Result<(), String>;

    /// The IDE asked to connect the session on `channel` to a debugger
    /// listening at `host:port`.
    fn attach_debugger(
        &mut self,
        channel: u32,
        host: &str,
        port: u16,
        properties: &BTreeMap<String, String>,
    ) -> std::result::Result<(), String>;
}

/// The agent-side endpoint of one multiplexed connection.
pub struct Agent {
    responder: Responder,
    mux: Multiplexor,
    stop: Arc<AtomicBool>,
}

impl Agent {
    /// Multiplex the raw connection and start answering control tasks.
    pub fn run<R, W, F>(conn_in: R, conn_out: W, factory: F) -> Result<Agent>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
        F: SessionFactory,
    {
        Self::run_with_config(conn_in, conn_out, factory, MuxConfig::default())
    }

    pub fn run_with_config<R, W, F>(
        conn_in: R,
        conn_out: W,
        factory: F,
        config: MuxConfig,
    ) -> Result<Agent>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
        F: SessionFactory,
    {
        let mux = Multiplexor::with_config(conn_in, conn_out, config);
        let control = mux.streams_for_channel(CONTROL_CHANNEL)?;
        let stop = Arc::new(AtomicBool::new(false));
        let factory = Arc::new(Mutex::new(factory));

        let start_mux = mux.clone();
        let start_factory = Arc::clone(&factory);
        let attach_factory = Arc::clone(&factory);
        let stop_flag = Arc::clone(&stop);

        let responder = ResponderBuilder::new(control.reader, control.writer)
            .handle(TaskKind::StartSession, move |request: StartSession| {
                debug!(channel = request.channel, name = %request.params.name, "session requested");
                let streams = start_mux
                    .streams_for_channel(request.channel)
                    .map_err(|err| format!("channel {} unavailable: {err}", request.channel))?;
                let session = AgentSession {
                    channel: request.channel,
                    params: request.params,
                    streams,
                };
                start_factory.lock().unwrap().start_session(session)?;
                Ok::<_, String>(Value::Null)
            })
            .handle(TaskKind::AttachDebugger, move |request: AttachDebugger| {
                attach_factory.lock().unwrap().attach_debugger(
                    request.channel,
                    &request.host,
                    request.port,
                    &request.properties,
                )?;
                Ok::<_, String>(Value::Null)
            })
            .handle(TaskKind::Shutdown, move |_: Value| {
                info!("shutdown requested");
                stop_flag.store(true, Ordering::Release);
                Ok::<_, String>(Value::Null)
            })
            .stop_flag(Arc::clone(&stop))
            .start();

        Ok(Agent {
            responder,
            mux,
            stop,
        })
    }

    pub fn shutdown_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Block until the control loop exits, then tear down the
    /// multiplexor.
    pub fn join(self) {
        self.responder.join();
        self.mux.close();
    }
}
