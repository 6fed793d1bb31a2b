//! # pgx-pool
//!
//! Bounded session pool for database sessions.
//!
//! The pool hands out at most `max_connections` sessions at a time. Idle
//! sessions are reused before new ones are opened, and new sessions are
//! opened lazily on demand. Once every session is checked out, acquirers
//! queue in FIFO order and each returned session goes straight to the
//! oldest waiter.
//!
//! ## Features
//!
//! - Lazy growth up to a fixed capacity
//! - Strict FIFO hand-off to queued acquirers
//! - LIFO or FIFO reuse of idle sessions
//! - Optional acquisition timeout, cancellation-safe waits
//! - RAII checkout guard that returns the session on drop
//! - Orderly close that wakes waiters and destroys idle sessions
//!
//! ## Example
//!
//! ```rust,ignore
//! use pgx_pool::{Pool, PoolConfig};
//!
//! let pool = Pool::with_config(
//!     factory,
//!     params,
//!     PoolConfig::new()
//!         .max_connections(20)
//!         .connection_timeout(Duration::from_secs(30)),
//! )?;
//!
//! let mut session = pool.get().await?;
//! let n: i32 = session.scalar("select 1").await?;
//! // Session automatically returned to pool on drop
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod pool;

pub use config::{DEFAULT_MAX_CONNECTIONS, PoolConfig, ReuseOrder};
pub use error::PoolError;
pub use lifecycle::{SessionMetadata, SessionState};
pub use metrics::PoolMetrics;
pub use pool::{Pool, PoolBuilder, PoolStatus, PooledSession};
