/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame header could not be parsed. Byte alignment on the
    /// connection cannot be trusted afterwards, so this is fatal.
    #[error("malformed frame header: {0}")]
    MalformedFrame(String),

    /// The payload exceeds the configured maximum size. Fatal for the
    /// same reason as a malformed header.
    #[error("frame too large ({size} bytes, max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
