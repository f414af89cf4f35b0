use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::buffer::{ChannelBuffer, CloseReason};

struct State {
    endpoints: HashMap<u32, Arc<ChannelBuffer>>,
    released: HashSet<u32>,
}

/// Maps channel IDs to their inbound buffers.
///
/// Endpoints are created lazily on first use from either side: a local
/// `streams_for_channel` call or an inbound frame for an ID nobody asked
/// for yet. Released IDs are tombstoned — they are never re-registered,
/// so late traffic for a torn-down channel is dropped rather than
/// buffered for a reader that will never come.
pub(crate) struct ChannelRegistry {
    state: Mutex<State>,
    buffer_limit: usize,
}

impl ChannelRegistry {
    pub(crate) fn new(buffer_limit: usize) -> Self {
        Self {
            state: Mutex::new(State {
                endpoints: HashMap::new(),
                released: HashSet::new(),
            }),
            buffer_limit,
        }
    }

    /// Fetch the buffer for `channel`, creating it if absent.
    /// Returns `None` for released channels.
    pub(crate) fn get_or_create(&self, channel: u32) -> Option<Arc<ChannelBuffer>> {
        let mut state = self.state.lock().unwrap();
        if state.released.contains(&channel) {
            return None;
        }
        Some(Arc::clone(state.endpoints.entry(channel).or_insert_with(
            || Arc::new(ChannelBuffer::new(channel, self.buffer_limit)),
        )))
    }

    /// Tombstone `channel`: close its buffer (clean EOF for readers) and
    /// drop all future inbound frames for it.
    pub(crate) fn release(&self, channel: u32) {
        let mut state = self.state.lock().unwrap();
        if !state.released.insert(channel) {
            return;
        }
        if let Some(buffer) = state.endpoints.remove(&channel) {
            buffer.close(CloseReason::Released);
        }
        debug!(channel, "released channel");
    }

    /// Close every registered buffer; used when the connection dies.
    pub(crate) fn close_all(&self) {
        let state = self.state.lock().unwrap();
        for buffer in state.endpoints.values() {
            buffer.close(CloseReason::ConnectionClosed);
        }
    }
}
