//! Session and session factory contracts.
//!
//! These traits are the narrow boundary between the pool and the wire
//! protocol. The pool only ever creates sessions through a
//! [`SessionFactory`] and only ever destroys them through
//! [`Session::close`].
//!
//! # Send futures
//!
//! Both traits use `#[async_trait]` so that the returned futures are `Send`
//! and pooled sessions can move freely between tokio worker threads.

use async_trait::async_trait;

use crate::error::{ConnectError, Result};
use crate::from_value::FromValue;
use crate::params::ConnectionParameters;
use crate::value::Value;

/// Outcome of a command that does not return rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteResult {
    /// Command tag reported by the server (e.g. `UPDATE 1`).
    pub tag: String,
    /// Number of rows affected by the command.
    pub rows_affected: u64,
}

impl ExecuteResult {
    /// Create a new execute result.
    pub fn new(tag: impl Into<String>, rows_affected: u64) -> Self {
        Self {
            tag: tag.into(),
            rows_affected,
        }
    }
}

/// A single stateful channel to the database server.
///
/// A session runs one operation at a time; every operation takes `&mut self`,
/// so exclusive access is enforced by the borrow checker and implementations
/// need no internal locking.
#[async_trait]
pub trait Session: Send + 'static {
    /// Run a single command to completion.
    async fn execute(&mut self, command: &str) -> Result<ExecuteResult>;

    /// Run a query expected to return exactly one scalar.
    async fn query_scalar(&mut self, query: &str) -> Result<Value>;

    /// Run a query and decode its single scalar into `T`.
    ///
    /// Shape mismatches surface as [`SessionError::Decode`](crate::SessionError::Decode).
    async fn scalar<T>(&mut self, query: &str) -> Result<T>
    where
        T: FromValue + Send,
    {
        let value = self.query_scalar(query).await?;
        tracing::trace!(value_type = value.type_name(), "decoding scalar");
        Ok(T::from_value(&value)?)
    }

    /// Release the underlying channel and any server-side resources.
    ///
    /// Must be idempotent.
    async fn close(&mut self);

    /// Check if the channel has already been closed.
    fn is_closed(&self) -> bool;
}

/// Produces new sessions from connection parameters.
///
/// A factory knows nothing about pool bookkeeping. It is called outside the
/// pool lock and may take as long as the handshake needs.
#[async_trait]
pub trait SessionFactory: Send + Sync + 'static {
    /// Session type produced by this factory.
    type Session: Session;

    /// Open a new session.
    async fn create_session(
        &self,
        params: &ConnectionParameters,
    ) -> std::result::Result<Self::Session, ConnectError>;
}
