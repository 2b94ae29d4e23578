//! Wire-level error hierarchy.
//!
//! Mirrors the teacher's `HandlerError`/`ChannelError` split: one error
//! type for framing/decode failures, distinct from the runtime-level
//! errors the server crate layers on top.

use thiserror::Error;

/// Errors that can occur while framing or decoding a datagram.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("frame exceeds maximum length {max} (got {len})")]
    FrameTooLarge { len: usize, max: usize },

    #[error("truncated frame: expected {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },

    #[error("unknown message code: {0}")]
    UnknownMessageCode(u16),

    #[error("malformed field value for tag {0}")]
    MalformedValue(u8),

    #[error("string is not valid utf-8")]
    InvalidUtf8,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
