//! Session error types.

use thiserror::Error;

/// Errors raised while establishing a new session.
///
/// The pool treats these as opaque beyond success or failure; the
/// classification is for callers deciding whether to retry.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConnectError {
    /// The server rejected the supplied credentials.
    #[error("authentication failed for user {user}: {message}")]
    Authentication {
        /// User that attempted to log in.
        user: String,
        /// Server-provided reason.
        message: String,
    },

    /// The endpoint could not be reached.
    #[error("endpoint {endpoint} is unreachable: {message}")]
    Unreachable {
        /// Endpoint that was dialed.
        endpoint: String,
        /// Reason reported by the transport.
        message: String,
    },

    /// Startup or protocol negotiation failed after the channel was opened.
    #[error("protocol negotiation failed: {0}")]
    Negotiation(String),

    /// IO error while connecting.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConnectError {
    /// Check if this error is transient and may succeed on retry.
    ///
    /// Authentication and negotiation failures are considered permanent
    /// for the given parameters.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable { .. } | Self::Io(_))
    }
}

/// Errors that can occur while decoding a value into a Rust type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DecodeError {
    /// Value is null when non-null was expected.
    #[error("unexpected null value")]
    UnexpectedNull,

    /// Type mismatch during conversion.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Expected type name.
        expected: &'static str,
        /// Actual type name.
        actual: &'static str,
    },

    /// Value is out of range for target type.
    #[error("value out of range for {target_type}")]
    OutOfRange {
        /// Target type name.
        target_type: &'static str,
    },
}

/// Errors produced by session operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    /// The server or the protocol layer reported an error.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The result could not be decoded into the requested type.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The session has already been closed.
    #[error("session is closed")]
    Closed,

    /// IO error on the underlying channel.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Check if this error came from decoding a result.
    #[must_use]
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode(_))
    }

    /// Check if this error means the channel can no longer be used.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Closed | Self::Io(_))
    }
}

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;
