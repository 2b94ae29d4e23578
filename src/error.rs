//! Runtime-level error hierarchy.
//!
//! Mirrors the teacher's `HandlerError`/`ChannelError` split: one error type
//! per layer, each carrying enough information to either reply to the
//! client, log, or escalate, per the error table in SPEC_FULL.md §1.2.

use thiserror::Error;

/// Errors surfaced while handling a single client message.
///
/// Most variants are non-fatal: the caller logs and drops the message
/// (*Unauthorized action*, *Missing object*) rather than tearing down the
/// session. [`ClientError::disconnect_code`] gives the wire code for the
/// variants that do warrant a disconnect.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] otp_proto::WireError),

    #[error("message not permitted before login")]
    NotAuthenticated,

    #[error("field update not permitted: doId={do_id} field={field_id}")]
    UnauthorizedFieldUpdate { do_id: u32, field_id: u16 },

    #[error("avatar {0} does not belong to the logged-in account")]
    AvatarNotOwned(u32),

    #[error("object {0} not found")]
    MissingObject(u32),

    #[error("login failed: {resp_string} (code {return_code})")]
    LoginFailed {
        return_code: i32,
        resp_string: String,
        disconnect_code: Option<u16>,
    },

    #[error("database error: {0}")]
    Db(#[from] crate::db::DbError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ClientError {
    /// The wire disconnect code this error should produce, if any.
    /// `None` means "log and keep the session" (§7 *Unauthorized action* /
    /// *Missing object*).
    pub fn disconnect_code(&self) -> Option<u16> {
        match self {
            ClientError::MalformedFrame(_) => Some(200),
            ClientError::NotAuthenticated => Some(220),
            ClientError::LoginFailed { disconnect_code, .. } => *disconnect_code,
            ClientError::UnauthorizedFieldUpdate { .. }
            | ClientError::AvatarNotOwned(_)
            | ClientError::MissingObject(_)
            | ClientError::Db(_)
            | ClientError::Internal(_) => None,
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Database RPC errors, mapped to the 0/1 return-code convention rather
/// than a disconnect (§4.4, §7).
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("object not found: {0}")]
    NotFound(u32),

    #[error("version mismatch: stored {stored:?} not in supported range {min:?}..={current:?}")]
    VersionMismatch {
        stored: (u16, u16, u16),
        min: (u16, u16, u16),
        current: (u16, u16, u16),
    },

    #[error("unknown dclass: {0}")]
    UnknownClass(String),

    #[error("backend error: {0}")]
    Backend(#[from] crate::db::DbError),
}

impl RpcError {
    /// True for errors that should propagate as a fatal error rather than a
    /// return-code-1 RPC response (§7 *Version mismatch on load* is fatal).
    pub fn is_fatal(&self) -> bool {
        matches!(self, RpcError::VersionMismatch { .. })
    }
}

pub type RpcResult<T> = Result<T, RpcError>;
