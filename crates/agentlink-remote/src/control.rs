//! Control-channel message types and their wire form.
//!
//! Messages travel over a logical stream as a varint length prefix
//! followed by a JSON document. Requests carry a task kind and a
//! correlation id; responses echo the id with a success or failure
//! outcome.

use std::collections::BTreeMap;
use std::io::{ErrorKind, Read, Write};

use agentlink_frame::codec::{peek_varint, put_varint};
use bytes::{Buf, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{RemoteError, Result};

/// Maximum size of a single control-channel message.
pub(crate) const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// The closed set of tasks the control channel understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    /// Bring up a new session on a freshly allocated channel.
    StartSession,
    /// Attach a debugger to the target behind an existing session.
    AttachDebugger,
    /// Request orderly agent exit.
    Shutdown,
}

/// A control-channel request.
#[derive(Debug, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub id: u64,
    pub task: TaskKind,
    pub payload: serde_json::Value,
}

/// A control-channel response, correlated by `id`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub id: u64,
    pub outcome: Outcome,
}

/// Result of a control-channel request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    Success(serde_json::Value),
    Failure { message: String },
}

/// Caller-supplied session metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionParams {
    /// What the session is for, e.g. a service name.
    #[serde(default)]
    pub name: String,
    /// Free-form properties forwarded to the agent.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl SessionParams {
    /// Params carrying just a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: BTreeMap::new(),
        }
    }
}

/// Payload of [`TaskKind::StartSession`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartSession {
    /// The channel the caller pre-registered for this session.
    pub channel: u32,
    pub params: SessionParams,
}

/// Payload of [`TaskKind::AttachDebugger`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachDebugger {
    /// The session channel the debugger wire protocol will run on.
    pub channel: u32,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

/// Serialize `value` and write it as one length-prefixed message.
pub fn write_message<T: Serialize, W: Write>(writer: &mut W, value: &T) -> Result<()> {
    let json = serde_json::to_vec(value)?;
    if json.len() > MAX_MESSAGE_SIZE {
        return Err(RemoteError::Protocol(format!(
            "outbound message too large: {} bytes (max {MAX_MESSAGE_SIZE})",
            json.len()
        )));
    }
    let mut buf = BytesMut::with_capacity(json.len() + 5);
    put_varint(&mut buf, json.len() as u64);
    buf.extend_from_slice(&json);
    writer.write_all(&buf)?;
    writer.flush()?;
    Ok(())
}

/// Reads length-prefixed messages from any `Read` stream.
///
/// Resumable across partial reads, same discipline as the frame reader.
pub struct MessageReader<R> {
    inner: R,
    buf: BytesMut,
}

impl<R: Read> MessageReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(4 * 1024),
        }
    }

    /// Read the next complete message payload (blocking).
    pub fn next_payload(&mut self) -> Result<Bytes> {
        loop {
            if let Some(payload) = self.decode_buffered()? {
                return Ok(payload);
            }

            let mut chunk = [0u8; 4 * 1024];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            };
            if read == 0 {
                return Err(RemoteError::ConnectionClosed);
            }
            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Deserialize the next complete message (blocking).
    pub fn next_message<T: DeserializeOwned>(&mut self) -> Result<T> {
        let payload = self.next_payload()?;
        Ok(serde_json::from_slice(&payload)?)
    }

    fn decode_buffered(&mut self) -> Result<Option<Bytes>> {
        let Some((len, width)) = peek_varint(&self.buf)
            .map_err(|err| RemoteError::Protocol(err.to_string()))?
        else {
            return Ok(None);
        };
        let len = len as usize;
        if len > MAX_MESSAGE_SIZE {
            return Err(RemoteError::Protocol(format!(
                "inbound message too large: {len} bytes (max {MAX_MESSAGE_SIZE})"
            )));
        }
        if self.buf.len() < width + len {
            return Ok(None);
        }
        self.buf.advance(width);
        Ok(Some(self.buf.split_to(len).freeze()))
    }
}
