//! Pool configuration.

use std::time::Duration;

/// Default maximum number of sessions.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Order in which idle sessions are reused.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReuseOrder {
    /// Most recently returned session first.
    ///
    /// Keeps a small hot set of sessions busy and lets the rest sit idle.
    #[default]
    Lifo,
    /// Least recently returned session first.
    ///
    /// Rotates through every idle session, spreading use evenly.
    Fifo,
}

/// Configuration for the session pool.
///
/// This struct is marked `#[non_exhaustive]` to allow adding new fields
/// in future minor versions without breaking changes. Use the builder
/// pattern methods or [`Default::default()`] to construct instances.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Maximum number of sessions alive at once.
    pub max_connections: u32,

    /// Time to wait for a session before timing out.
    ///
    /// `None` waits until a session is released or the pool closes.
    pub connection_timeout: Option<Duration>,

    /// Order in which idle sessions are handed out.
    pub reuse_order: ReuseOrder,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connection_timeout: None,
            reuse_order: ReuseOrder::Lifo,
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of sessions.
    #[must_use]
    pub fn max_connections(mut self, count: u32) -> Self {
        self.max_connections = count;
        self
    }

    /// Set the session acquisition timeout.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = Some(timeout);
        self
    }

    /// Wait indefinitely for a session.
    #[must_use]
    pub fn no_connection_timeout(mut self) -> Self {
        self.connection_timeout = None;
        self
    }

    /// Set the idle reuse order.
    #[must_use]
    pub fn reuse_order(mut self, order: ReuseOrder) -> Self {
        self.reuse_order = order;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), crate::error::PoolError> {
        if self.max_connections == 0 {
            return Err(crate::error::PoolError::Configuration(
                "max_connections must be greater than 0".into(),
            ));
        }
        if self.connection_timeout == Some(Duration::ZERO) {
            return Err(crate::error::PoolError::Configuration(
                "connection_timeout must be non-zero; use try_get for non-blocking checkout".into(),
            ));
        }
        Ok(())
    }
}
