//! IDE-side half of the control channel: correlated requests with
//! future-style responses.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::control::{
    write_message, MessageReader, Outcome, RequestEnvelope, ResponseEnvelope, TaskKind,
};
use crate::error::{RemoteError, Result};

/// How a pending call ended.
#[derive(Debug, Clone)]
enum Resolution {
    Success(serde_json::Value),
    Failure(String),
    ConnectionClosed,
}

#[derive(Debug)]
enum CallState {
    Pending,
    Resolved(Resolution),
    Cancelled,
}

/// One in-flight call's eventual-result slot. Resolved exactly once;
/// read by any number of waiters.
struct CallSlot {
    state: Mutex<CallState>,
    resolved: Condvar,
}

impl CallSlot {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(CallState::Pending),
            resolved: Condvar::new(),
        })
    }

    fn resolve(&self, resolution: Resolution) {
        let mut state = self.state.lock().unwrap();
        if matches!(*state, CallState::Pending) {
            *state = CallState::Resolved(resolution);
            self.resolved.notify_all();
        }
    }

    fn cancel(&self) {
        let mut state = self.state.lock().unwrap();
        if matches!(*state, CallState::Pending) {
            *state = CallState::Cancelled;
            self.resolved.notify_all();
        }
    }
}

/// The set of calls awaiting responses, keyed by correlation id.
struct PendingCalls {
    calls: Mutex<HashMap<u64, Arc<CallSlot>>>,
    closed: AtomicBool,
}

impl PendingCalls {
    fn insert(&self, id: u64, slot: Arc<CallSlot>) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        let mut calls = self.calls.lock().unwrap();
        // Re-check under the lock so a concurrent close cannot strand
        // this slot unresolved.
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        calls.insert(id, slot);
        true
    }

    fn remove(&self, id: u64) -> Option<Arc<CallSlot>> {
        self.calls.lock().unwrap().remove(&id)
    }

    /// Fail every outstanding call; no call registered afterwards.
    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let drained: Vec<_> = {
            let mut calls = self.calls.lock().unwrap();
            calls.drain().map(|(_, slot)| slot).collect()
        };
        for slot in drained {
            slot.resolve(Resolution::ConnectionClosed);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Sends typed tasks over a logical stream and resolves their futures
/// from a single background response-reader thread.
///
/// Correlation ids are allocated monotonically starting at 1 and never
/// reused. Concurrent callers are safe: request writes are serialized,
/// and responses may resolve in any order relative to request order.
pub struct Sender<W> {
    writer: Mutex<W>,
    pending: Arc<PendingCalls>,
    next_id: AtomicU64,
}

impl<W: Write> Sender<W> {
    /// Build a sender over a logical stream pair and start the response
    /// reader.
    pub fn new<R>(reader: R, writer: W) -> Self
    where
        R: Read + Send + 'static,
    {
        let pending = Arc::new(PendingCalls {
            calls: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        });

        let loop_pending = Arc::clone(&pending);
        thread::Builder::new()
            .name("agentlink-sender".into())
            .spawn(move || response_loop(reader, loop_pending))
            .expect("failed to spawn response reader thread");

        Self {
            writer: Mutex::new(writer),
            pending,
            next_id: AtomicU64::new(1),
        }
    }

    /// Send a request and receive a future for its response.
    ///
    /// Returns as soon as the request bytes are written; the future
    /// resolves when the matching response arrives, the call is
    /// cancelled, or the connection dies.
    pub fn send_and_receive<Req, Resp>(
        &self,
        task: TaskKind,
        request: &Req,
    ) -> Result<ResponseFuture<Resp>>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let slot = CallSlot::new();

        if !self.pending.insert(id, Arc::clone(&slot)) {
            return Err(RemoteError::ConnectionClosed);
        }

        if let Err(err) = self.write_request(id, task, request) {
            self.pending.remove(id);
            return Err(err);
        }

        Ok(ResponseFuture {
            id,
            slot,
            pending: Arc::clone(&self.pending),
            _response: PhantomData,
        })
    }

    /// Fire-and-forget request: allocates a correlation id and writes
    /// the envelope without registering a pending call. Any response
    /// the remote sends is dropped as an unknown correlation.
    pub fn notify<Req: Serialize>(&self, task: TaskKind, request: &Req) -> Result<()> {
        if self.pending.is_closed() {
            return Err(RemoteError::ConnectionClosed);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.write_request(id, task, request)
    }

    fn write_request<Req: Serialize>(&self, id: u64, task: TaskKind, request: &Req) -> Result<()> {
        let envelope = RequestEnvelope {
            id,
            task,
            payload: serde_json::to_value(request)?,
        };
        let mut writer = self.writer.lock().unwrap();
        write_message(&mut *writer, &envelope)
    }

    /// Whether the response reader has observed the connection dying.
    pub fn is_closed(&self) -> bool {
        self.pending.is_closed()
    }
}

fn response_loop<R: Read>(reader: R, pending: Arc<PendingCalls>) {
    let mut messages = MessageReader::new(reader);
    loop {
        let payload = match messages.next_payload() {
            Ok(payload) => payload,
            Err(RemoteError::ConnectionClosed) => {
                debug!("control channel closed");
                break;
            }
            Err(err) => {
                warn!(error = %err, "control channel failed");
                break;
            }
        };

        // Framing is intact even if one message is garbage, so a bad
        // envelope is dropped rather than killing the connection.
        let envelope: ResponseEnvelope = match serde_json::from_slice(&payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(error = %err, "dropping undecodable response");
                continue;
            }
        };

        let Some(slot) = pending.remove(envelope.id) else {
            // Stale, duplicate, or cancelled call.
            warn!(id = envelope.id, "response for unknown correlation id");
            continue;
        };

        slot.resolve(match envelope.outcome {
            Outcome::Success(value) => Resolution::Success(value),
            Outcome::Failure { message } => Resolution::Failure(message),
        });
    }
    pending.close();
}

/// Handle to one pending call's eventual response.
///
/// The response type is decoded lazily on [`wait`](Self::wait), so a
/// payload that does not match `Resp` fails only this call.
pub struct ResponseFuture<Resp> {
    id: u64,
    slot: Arc<CallSlot>,
    pending: Arc<PendingCalls>,
    _response: PhantomData<fn() -> Resp>,
}

impl<Resp> std::fmt::Debug for ResponseFuture<Resp> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseFuture")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl<Resp: DeserializeOwned> ResponseFuture<Resp> {
    /// The correlation id of this call.
    pub fn correlation_id(&self) -> u64 {
        self.id
    }

    /// Block until the call resolves.
    pub fn wait(&self) -> Result<Resp> {
        let mut state = self.slot.state.lock().unwrap();
        loop {
            match &*state {
                CallState::Pending => state = self.slot.resolved.wait(state).unwrap(),
                CallState::Cancelled => return Err(RemoteError::Cancelled),
                CallState::Resolved(resolution) => return decode(resolution.clone()),
            }
        }
    }

    /// Block until the call resolves or `timeout` elapses.
    /// Returns `Ok(None)` on timeout; the call stays pending.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<Option<Resp>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.slot.state.lock().unwrap();
        loop {
            match &*state {
                CallState::Pending => {
                    let Some(remaining) = deadline.checked_duration_since(Instant::now()).filter(|d| !d.is_zero()) else {
                        return Ok(None);
                    };
                    let (next, _timed_out) =
                        self.slot.resolved.wait_timeout(state, remaining).unwrap();
                    state = next;
                }
                CallState::Cancelled => return Err(RemoteError::Cancelled),
                CallState::Resolved(resolution) => return decode(resolution.clone()).map(Some),
            }
        }
    }

    /// Whether the call has resolved (or been cancelled).
    pub fn is_resolved(&self) -> bool {
        !matches!(*self.slot.state.lock().unwrap(), CallState::Pending)
    }

    /// Cancel the call. Local-only: no wire message is sent, and a late
    /// response is dropped as an unknown correlation. Idempotent, and a
    /// no-op if the call already resolved.
    pub fn cancel(&self) {
        self.pending.remove(self.id);
        self.slot.cancel();
    }
}

fn decode<Resp: DeserializeOwned>(resolution: Resolution) -> Result<Resp> {
    match resolution {
        Resolution::Success(value) => Ok(serde_json::from_value(value)?),
        Resolution::Failure(message) => Err(RemoteError::Rejected(message)),
        Resolution::ConnectionClosed => Err(RemoteError::ConnectionClosed),
    }
}
