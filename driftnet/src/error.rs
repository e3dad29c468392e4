use thiserror::Error;

/// All errors produced by the Drift overlay core.
#[derive(Debug, Error)]
pub enum DriftNetError {
    #[error("malformed packet: {0}")]
    MalformedPacket(&'static str),

    #[error("unknown message id: 0x{0:02x}")]
    UnknownMessageType(u8),

    #[error("message encryption failed: {0}")]
    Encryption(String),

    #[error("message decryption failed: {0}")]
    Decryption(String),

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("session already present for {0}")]
    DuplicateSession(String),

    #[error("no session found for {0}")]
    SessionNotFound(String),

    #[error("session closed")]
    SessionClosed,

    #[error("request timed out")]
    RequestTimeout,

    #[error("peer returned no nodes")]
    EmptyResponse,

    #[error("{0} channel closed")]
    ChannelClosed(&'static str),
}

pub type Result<T> = std::result::Result<T, DriftNetError>;
