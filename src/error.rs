use thiserror::Error;

/// Error kinds as observed at the coordinator boundary.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("config error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("network error: {0}")]
    Net(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("target is blacklisted")]
    Blacklisted,

    #[error("observer error: {0}")]
    Observer(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("varint overflow: more than 5 bytes consumed")]
    VarIntOverflow,

    #[error("connection truncated: expected {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },

    #[error("invalid utf-8 in status payload")]
    InvalidUtf8,

    #[error("malformed json: {0}")]
    MalformedJson(String),

    #[error("unexpected packet id: {0}")]
    UnexpectedPacketId(i32),

    #[error("malformed legacy ping response")]
    MalformedLegacy,
}

pub type ScanResult<T> = std::result::Result<T, ScanError>;
