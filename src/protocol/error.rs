//! Protocol error types.

use crate::IdentityError;
use thiserror::Error;

/// Errors related to protocol message handling.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid message type: 0x{0:02x}")]
    InvalidMessageType(u8),

    #[error("invalid segment kind: 0x{0:02x}")]
    InvalidSegmentKind(u8),

    #[error("message too short: expected at least {expected}, got {got}")]
    MessageTooShort { expected: usize, got: usize },

    #[error("message too long: max {max}, got {got}")]
    MessageTooLong { max: usize, got: usize },

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("invalid utf-8 in {0}")]
    InvalidUtf8(&'static str),

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("invalid identity: {0}")]
    Identity(#[from] IdentityError),
}
