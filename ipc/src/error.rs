use std::time::Duration;

/// Errors raised by the message channel and its endpoints.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("channel '{0}' is already served by another endpoint")]
    NameInUse(String),

    #[error("timed out connecting to channel '{0}'")]
    ConnectTimeout(String),

    #[error("channel disconnected")]
    Disconnected,

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("frame of {0} bytes exceeds the channel limit")]
    FrameTooLarge(usize),

    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),

    #[error("unknown frame kind 0x{0:02x}")]
    UnknownFrameKind(u8),
}

pub type Result<T> = std::result::Result<T, IpcError>;
