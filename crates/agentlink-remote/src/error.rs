/// Errors that can occur in control-channel and session operations.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// The underlying connection is dead. Terminal for every pending
    /// call and every session on this connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// The remote side returned a failure outcome for a request.
    #[error("request rejected by remote: {0}")]
    Rejected(String),

    /// The pending call was cancelled locally.
    #[error("request cancelled")]
    Cancelled,

    /// The session was closed or failed; its channel will not be reused.
    #[error("session is no longer active")]
    SessionClosed,

    /// The control-channel byte stream violated the message framing.
    /// Fatal to the control connection, alignment is lost.
    #[error("control protocol violation: {0}")]
    Protocol(String),

    /// A control message could not be serialized or deserialized.
    #[error("control message encoding error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error on the control channel.
    #[error("control I/O error: {0}")]
    Io(std::io::Error),

    /// Multiplexor-level error.
    #[error(transparent)]
    Mux(#[from] agentlink_mux::MuxError),
}

impl From<std::io::Error> for RemoteError {
    fn from(err: std::io::Error) -> Self {
        // The mux reports a dead connection through this kind; fold it
        // into the terminal error every consumer matches on.
        if err.kind() == std::io::ErrorKind::ConnectionAborted {
            RemoteError::ConnectionClosed
        } else {
            RemoteError::Io(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, RemoteError>;
