use std::collections::VecDeque;
use std::io;
use std::sync::{Condvar, Mutex};

use bytes::{Buf, Bytes};
use tracing::trace;

/// Why a channel buffer stopped accepting data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CloseReason {
    /// The raw connection died; readers must observe an error.
    ConnectionClosed,
    /// The channel was released locally; readers observe clean EOF.
    Released,
}

struct State {
    chunks: VecDeque<Bytes>,
    buffered: usize,
    closed: Option<CloseReason>,
}

/// Inbound byte buffer for one logical channel.
///
/// The demultiplexing thread pushes frame payloads; channel readers pop
/// bytes in arrival order. Bounded: `push` blocks once `limit` bytes are
/// buffered until a reader drains them (backpressure is per-channel).
pub(crate) struct ChannelBuffer {
    channel: u32,
    limit: usize,
    state: Mutex<State>,
    readable: Condvar,
    writable: Condvar,
}

impl ChannelBuffer {
    pub(crate) fn new(channel: u32, limit: usize) -> Self {
        Self {
            channel,
            limit,
            state: Mutex::new(State {
                chunks: VecDeque::new(),
                buffered: 0,
                closed: None,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
        }
    }

    /// Append a frame payload, blocking while the buffer is full.
    ///
    /// A payload larger than `limit` is admitted alone once the buffer
    /// drains, so the buffer may overshoot by one payload; a frame up to
    /// the connection's max payload size must always be deliverable.
    ///
    /// Payloads pushed after close are silently dropped: the demux loop
    /// may race with a local release or connection teardown.
    pub(crate) fn push(&self, payload: Bytes) {
        if payload.is_empty() {
            return;
        }
        let mut state = self.state.lock().unwrap();
        while state.closed.is_none()
            && state.buffered > 0
            && state.buffered + payload.len() > self.limit
        {
            trace!(channel = self.channel, "inbound buffer full, waiting");
            state = self.writable.wait(state).unwrap();
        }
        if state.closed.is_some() {
            trace!(channel = self.channel, "dropping payload for closed buffer");
            return;
        }
        state.buffered += payload.len();
        state.chunks.push_back(payload);
        self.readable.notify_all();
    }

    /// Pop up to `buf.len()` bytes, blocking until data arrives or the
    /// buffer is closed. Buffered data is drained before a close is
    /// reported. A `Released` close reads as clean EOF; a
    /// `ConnectionClosed` close reads as an error.
    pub(crate) fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut state = self.state.lock().unwrap();
        while state.chunks.is_empty() {
            match state.closed {
                Some(CloseReason::Released) => return Ok(0),
                Some(CloseReason::ConnectionClosed) => return Err(closed_error()),
                None => state = self.readable.wait(state).unwrap(),
            }
        }

        let front = state.chunks.front_mut().unwrap();
        let n = front.len().min(buf.len());
        buf[..n].copy_from_slice(&front[..n]);
        if n == front.len() {
            state.chunks.pop_front();
        } else {
            front.advance(n);
        }
        state.buffered -= n;
        self.writable.notify_all();
        Ok(n)
    }

    /// Mark the buffer closed and wake all blocked readers and writers.
    /// The first close reason wins.
    pub(crate) fn close(&self, reason: CloseReason) {
        let mut state = self.state.lock().unwrap();
        if state.closed.is_none() {
            state.closed = Some(reason);
        }
        self.readable.notify_all();
        self.writable.notify_all();
    }
}

/// The error every logical stream reports once the connection is dead.
pub(crate) fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "connection closed")
}
