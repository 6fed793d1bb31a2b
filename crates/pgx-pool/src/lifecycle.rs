//! Session lifecycle tracking.
//!
//! The pool attaches a [`SessionMetadata`] record to every session it
//! creates. The record travels with the session between the idle list and
//! its holders and is exposed read-only through
//! [`PooledSession::metadata`](crate::PooledSession::metadata).

use std::time::{Duration, Instant};

/// Session state tracked by the pool.
///
/// ```text
/// Idle -> CheckedOut -> Idle | Destroyed
/// Idle -> Destroyed            (pool close)
/// CheckedOut -> Destroyed      (release after close, discard)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Session is held by the pool and available for checkout.
    Idle,
    /// Session is held by exactly one caller.
    CheckedOut,
    /// Session has been closed and removed from the pool.
    Destroyed,
}

impl SessionState {
    /// Check if the session is available for checkout.
    #[must_use]
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Check if the session is currently held by a caller.
    #[must_use]
    pub fn is_checked_out(&self) -> bool {
        matches!(self, Self::CheckedOut)
    }
}

/// Metadata about a pooled session.
#[derive(Debug, Clone)]
pub struct SessionMetadata {
    /// Pool-assigned identifier, unique within one pool.
    pub id: u64,
    /// When the session was created.
    pub created_at: Instant,
    /// When the session was last checked out or returned.
    pub last_used_at: Instant,
    /// Number of times the session has been checked out.
    pub checkout_count: u64,
    /// Current state of the session.
    pub state: SessionState,
}

impl SessionMetadata {
    /// Create metadata for a new session.
    pub fn new(id: u64) -> Self {
        let now = Instant::now();
        Self {
            id,
            created_at: now,
            last_used_at: now,
            checkout_count: 0,
            state: SessionState::Idle,
        }
    }

    /// Time since the session was created.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Time since the session was last checked out or returned.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_used_at.elapsed()
    }

    /// Mark the session as checked out.
    pub fn mark_checkout(&mut self) {
        self.last_used_at = Instant::now();
        self.checkout_count += 1;
        self.state = SessionState::CheckedOut;
    }

    /// Mark the session as returned to idle.
    pub fn mark_checkin(&mut self) {
        self.last_used_at = Instant::now();
        self.state = SessionState::Idle;
    }

    /// Mark the session as destroyed.
    pub fn mark_destroyed(&mut self) {
        self.state = SessionState::Destroyed;
    }
}
