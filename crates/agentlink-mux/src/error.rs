/// Errors that can occur on a multiplexed connection.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// The underlying connection is dead. Terminal: every logical
    /// stream on every channel reports this once it is raised.
    #[error("connection closed")]
    ConnectionClosed,

    /// The channel was explicitly released and its ID will never be
    /// reused for the lifetime of this connection.
    #[error("channel {0} has been released")]
    ChannelReleased(u32),

    /// Frame-level error on the raw connection.
    #[error("frame error: {0}")]
    Frame(#[from] agentlink_frame::FrameError),

    /// An I/O error occurred on the raw connection.
    #[error("mux I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MuxError>;
