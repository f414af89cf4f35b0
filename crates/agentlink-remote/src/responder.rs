//! Agent-side half of the control channel: a dispatch loop that routes
//! incoming tasks to registered handlers and writes back correlated
//! outcomes.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::control::{
    write_message, MessageReader, Outcome, RequestEnvelope, ResponseEnvelope, TaskKind,
};
use crate::error::RemoteError;

type HandlerFn = Box<dyn FnMut(Value) -> std::result::Result<Value, String> + Send>;

/// Registers task handlers, then starts the dispatch loop.
///
/// Each handler takes the decoded request payload and returns either a
/// success payload or a failure message; both travel back to the caller
/// as the response outcome. Handlers run one at a time on the dispatch
/// thread, in arrival order.
pub struct ResponderBuilder<R, W> {
    reader: R,
    writer: W,
    handlers: HashMap<TaskKind, HandlerFn>,
    stop: Option<Arc<AtomicBool>>,
}

impl<R, W> ResponderBuilder<R, W>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            handlers: HashMap::new(),
            stop: None,
        }
    }

    /// Register the handler for one task kind.
    ///
    /// The payload is decoded to `P` before the handler runs; a payload
    /// that does not decode fails that one request. Registering the
    /// same kind twice is a bug in the caller.
    ///
    /// # Panics
    ///
    /// Panics if a handler for `kind` is already registered.
    pub fn handle<P, T, F>(mut self, kind: TaskKind, mut handler: F) -> Self
    where
        P: DeserializeOwned,
        T: Serialize,
        F: FnMut(P) -> std::result::Result<T, String> + Send + 'static,
    {
        let wrapped: HandlerFn = Box::new(move |payload| {
            let request: P =
                serde_json::from_value(payload).map_err(|err| format!("bad payload: {err}"))?;
            let response = handler(request)?;
            serde_json::to_value(response).map_err(|err| format!("unencodable response: {err}"))
        });
        let previous = self.handlers.insert(kind, wrapped);
        assert!(previous.is_none(), "duplicate handler for {kind:?}");
        self
    }

    /// Stop the dispatch loop once this flag is set. The response for
    /// the request that set it still goes out first.
    pub fn stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Spawn the dispatch thread.
    pub fn start(self) -> Responder {
        let Self {
            reader,
            writer,
            handlers,
            stop,
        } = self;
        let handle = thread::Builder::new()
            .name("agentlink-responder".into())
            .spawn(move || dispatch_loop(reader, writer, handlers, stop))
            .expect("failed to spawn responder thread");
        Responder { handle }
    }
}

fn dispatch_loop<R: Read, W: Write>(
    reader: R,
    mut writer: W,
    mut handlers: HashMap<TaskKind, HandlerFn>,
    stop: Option<Arc<AtomicBool>>,
) {
    let mut messages = MessageReader::new(reader);
    loop {
        let payload = match messages.next_payload() {
            Ok(payload) => payload,
            Err(RemoteError::ConnectionClosed) => {
                debug!("control channel closed");
                return;
            }
            Err(err) => {
                warn!(error = %err, "control channel failed");
                return;
            }
        };

        let request: RequestEnvelope = match serde_json::from_slice(&payload) {
            Ok(request) => request,
            Err(err) => {
                warn!(error = %err, "dropping undecodable request");
                continue;
            }
        };
        debug!(id = request.id, task = ?request.task, "dispatching task");

        let outcome = match handlers.get_mut(&request.task) {
            Some(handler) => match handler(request.payload) {
                Ok(value) => Outcome::Success(value),
                Err(message) => Outcome::Failure { message },
            },
            None => Outcome::Failure {
                message: format!("no handler for task {:?}", request.task),
            },
        };

        let response = ResponseEnvelope {
            id: request.id,
            outcome,
        };
        if let Err(err) = write_message(&mut writer, &response) {
            warn!(error = %err, "failed to write response");
            return;
        }

        // Checked after the write so a shutdown request is answered
        // before the loop winds down.
        if stop
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Acquire))
        {
            debug!("responder stopping");
            return;
        }
    }
}

/// Handle to a running dispatch loop.
pub struct Responder {
    handle: JoinHandle<()>,
}

impl Responder {
    /// Block until the dispatch loop exits.
    pub fn join(self) {
        let _ = self.handle.join();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
