//! Pool error types.

use pgx_session::ConnectError;
use thiserror::Error;

/// Errors that can occur during pool operations.
///
/// Errors returned by a session once it is checked out are
/// [`SessionError`](pgx_session::SessionError)s and never pass through the
/// pool.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// Failed to acquire a session within the timeout.
    #[error("connection acquisition timeout after {0:?}")]
    AcquisitionTimeout(std::time::Duration),

    /// Pool is closed.
    #[error("pool is closed")]
    PoolClosed,

    /// The factory failed to open a new session.
    ///
    /// No capacity is consumed; a later acquire may try to grow again.
    #[error("failed to create connection: {0}")]
    ConnectionCreation(#[source] ConnectError),

    /// Pool configuration error.
    #[error("pool configuration error: {0}")]
    Configuration(String),
}

impl PoolError {
    /// Check if the pool was closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::PoolClosed)
    }

    /// Check if the acquire timed out.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::AcquisitionTimeout(_))
    }

    /// Get the underlying connect error, if session creation failed.
    #[must_use]
    pub fn connect_error(&self) -> Option<&ConnectError> {
        match self {
            Self::ConnectionCreation(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConnectError> for PoolError {
    fn from(e: ConnectError) -> Self {
        Self::ConnectionCreation(e)
    }
}
