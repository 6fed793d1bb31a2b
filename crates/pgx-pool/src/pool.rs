//! Session pool implementation.
//!
//! All pool state lives behind a single mutex that is never held across an
//! `.await`. Acquirers that find the pool exhausted enqueue a oneshot sender
//! and sleep on the receiver. Returning a session picks its next holder
//! while the lock is held, so a newcomer can never overtake a queued waiter.
//!
//! Capacity that frees up while waiters are queued (a failed factory call, a
//! discarded session) is passed on as a growth permit the same way.

use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use pgx_session::{ConnectionParameters, Session, SessionFactory};
use tokio::sync::oneshot;

use crate::config::{PoolConfig, ReuseOrder};
use crate::error::PoolError;
use crate::lifecycle::SessionMetadata;
use crate::metrics::{MetricsRecorder, PoolMetrics};

/// A session together with the pool's bookkeeping for it.
struct Pooled<S> {
    session: S,
    metadata: SessionMetadata,
}

/// What a waiter can be woken with.
enum Handoff<S> {
    /// A live session, already counted in `allocated`.
    Session(Pooled<S>),
    /// A reserved slot; the waiter must create the session itself.
    Permit,
}

struct Waiter<S> {
    id: u64,
    tx: oneshot::Sender<Handoff<S>>,
}

struct PoolState<S> {
    idle: VecDeque<Pooled<S>>,
    /// Idle + checked out + slots reserved for sessions being created.
    allocated: u32,
    waiters: VecDeque<Waiter<S>>,
    next_waiter_id: u64,
    closed: bool,
}

impl<S> PoolState<S> {
    fn pop_idle(&mut self, order: ReuseOrder) -> Option<Pooled<S>> {
        match order {
            ReuseOrder::Lifo => self.idle.pop_back(),
            ReuseOrder::Fifo => self.idle.pop_front(),
        }
    }

    /// Offer `handoff` to the oldest live waiter. Returns it if nobody took it.
    fn hand_off(&mut self, mut handoff: Handoff<S>) -> Option<Handoff<S>> {
        while let Some(waiter) = self.waiters.pop_front() {
            match waiter.tx.send(handoff) {
                Ok(()) => return None,
                Err(rejected) => handoff = rejected,
            }
        }
        Some(handoff)
    }
}

struct PoolInner<F: SessionFactory> {
    factory: F,
    params: ConnectionParameters,
    config: PoolConfig,
    state: Mutex<PoolState<F::Session>>,
    metrics: MetricsRecorder,
    next_session_id: AtomicU64,
}

impl<F: SessionFactory> PoolInner<F> {
    fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Give up one unit of capacity.
    fn release_slot(&self) {
        let mut state = self.state.lock();
        self.release_slot_locked(&mut state);
    }

    fn release_slot_locked(&self, state: &mut PoolState<F::Session>) {
        if !state.closed && state.hand_off(Handoff::Permit).is_none() {
            self.metrics.handoff();
            tracing::trace!(allocated = state.allocated, "growth permit handed to waiter");
            return;
        }
        state.allocated -= 1;
    }

    /// Take a session back from its holder.
    ///
    /// Returns the session if it must be destroyed instead of reused; its
    /// slot has already been accounted for.
    fn check_in(&self, mut pooled: Pooled<F::Session>) -> Option<Pooled<F::Session>> {
        let mut state = self.state.lock();
        if state.closed {
            state.allocated -= 1;
            pooled.metadata.mark_destroyed();
            return Some(pooled);
        }
        if pooled.session.is_closed() {
            tracing::debug!(
                session_id = pooled.metadata.id,
                "session returned closed, dropping it from the pool"
            );
            self.release_slot_locked(&mut state);
            pooled.metadata.mark_destroyed();
            return Some(pooled);
        }

        pooled.metadata.mark_checkin();
        let id = pooled.metadata.id;
        if let Some(Handoff::Session(pooled)) = state.hand_off(Handoff::Session(pooled)) {
            state.idle.push_back(pooled);
            tracing::trace!(session_id = id, idle = state.idle.len(), "session returned to pool");
        } else {
            self.metrics.handoff();
            tracing::trace!(session_id = id, "session handed to waiter");
        }
        None
    }

    async fn destroy(&self, mut pooled: Pooled<F::Session>) {
        pooled.metadata.mark_destroyed();
        pooled.session.close().await;
        self.metrics.connection_closed();
        tracing::debug!(session_id = pooled.metadata.id, "session destroyed");
    }

    /// Destroy a session from a synchronous context (guard drop).
    ///
    /// Only a session closed on a spawned task counts as closed. Without a
    /// runtime the session is dropped unclosed.
    fn destroy_in_background(&self, mut pooled: Pooled<F::Session>) {
        let id = pooled.metadata.id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                self.metrics.connection_closed();
                handle.spawn(async move {
                    pooled.session.close().await;
                    tracing::debug!(session_id = id, "session destroyed");
                });
            }
            Err(_) => {
                // Dropping the session still releases the channel.
                tracing::debug!(session_id = id, "no runtime to close session on, dropping it");
            }
        }
    }
}

/// A reserved unit of capacity, released on drop unless committed.
struct Slot<'a, F: SessionFactory> {
    inner: &'a PoolInner<F>,
    armed: bool,
}

impl<'a, F: SessionFactory> Slot<'a, F> {
    fn reserved(inner: &'a PoolInner<F>) -> Self {
        Self { inner, armed: true }
    }

    fn commit(mut self) {
        self.armed = false;
    }
}

impl<F: SessionFactory> Drop for Slot<'_, F> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.release_slot();
        }
    }
}

/// A queued acquire. Dropping it before it is woken withdraws it from the
/// queue and returns anything already handed to it.
struct Waiting<'a, F: SessionFactory> {
    inner: &'a PoolInner<F>,
    id: u64,
    rx: Option<oneshot::Receiver<Handoff<F::Session>>>,
}

impl<F: SessionFactory> Waiting<'_, F> {
    async fn wait(mut self) -> Result<Handoff<F::Session>, PoolError> {
        let Some(rx) = self.rx.as_mut() else {
            return Err(PoolError::PoolClosed);
        };
        let received = rx.await;
        self.rx = None;
        // The sender is only dropped unsent when the pool closes.
        received.map_err(|_| PoolError::PoolClosed)
    }
}

impl<F: SessionFactory> Drop for Waiting<'_, F> {
    fn drop(&mut self) {
        let Some(mut rx) = self.rx.take() else {
            return;
        };
        let id = self.id;
        self.inner.state.lock().waiters.retain(|w| w.id != id);

        rx.close();
        if let Ok(handoff) = rx.try_recv() {
            tracing::debug!(waiter = id, "waiter abandoned after hand-off, reclaiming");
            match handoff {
                Handoff::Session(pooled) => {
                    if let Some(doomed) = self.inner.check_in(pooled) {
                        self.inner.destroy_in_background(doomed);
                    }
                }
                Handoff::Permit => self.inner.release_slot(),
            }
        }
    }
}

/// A bounded pool of database sessions.
///
/// The pool grows lazily up to `max_connections`, reuses idle sessions,
/// and queues acquirers in FIFO order once every session is checked out.
/// Cloning a pool yields another handle to the same sessions.
///
/// Dropping the last handle drops idle sessions without the close
/// handshake; call [`Pool::close`] for an orderly shutdown.
pub struct Pool<F: SessionFactory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: SessionFactory> Pool<F> {
    /// Create a pool with the given capacity and default settings.
    ///
    /// No session is opened until the first acquire.
    pub fn new(
        factory: F,
        params: ConnectionParameters,
        max_connections: u32,
    ) -> Result<Self, PoolError> {
        Self::with_config(
            factory,
            params,
            PoolConfig::new().max_connections(max_connections),
        )
    }

    /// Create a pool from a full configuration.
    pub fn with_config(
        factory: F,
        params: ConnectionParameters,
        config: PoolConfig,
    ) -> Result<Self, PoolError> {
        config.validate()?;
        tracing::debug!(
            max_connections = config.max_connections,
            endpoint = params.endpoint(),
            database = params.database(),
            "session pool created"
        );
        let state = PoolState {
            idle: VecDeque::with_capacity(config.max_connections as usize),
            allocated: 0,
            waiters: VecDeque::new(),
            next_waiter_id: 0,
            closed: false,
        };
        Ok(Self {
            inner: Arc::new(PoolInner {
                factory,
                params,
                config,
                state: Mutex::new(state),
                metrics: MetricsRecorder::default(),
                next_session_id: AtomicU64::new(1),
            }),
        })
    }

    /// Create a builder for a pool.
    pub fn builder() -> PoolBuilder<F> {
        PoolBuilder::new()
    }

    /// Get a session from the pool.
    ///
    /// Returns an idle session if there is one, otherwise opens a new one
    /// if the pool is below capacity. At capacity, waits in FIFO order
    /// until a session is released, the pool closes, or the configured
    /// [`connection_timeout`](PoolConfig::connection_timeout) elapses.
    pub async fn get(&self) -> Result<PooledSession<F>, PoolError> {
        match self.inner.config.connection_timeout {
            Some(timeout) => self.get_timeout(timeout).await,
            None => self.acquire().await,
        }
    }

    /// Get a session, waiting at most `timeout`.
    ///
    /// An abandoned wait leaves no trace in the pool.
    pub async fn get_timeout(&self, timeout: Duration) -> Result<PooledSession<F>, PoolError> {
        match tokio::time::timeout(timeout, self.acquire()).await {
            Ok(result) => result,
            Err(_) => {
                self.inner.metrics.timed_out();
                self.inner.metrics.checkout(false);
                tracing::debug!(?timeout, "session acquisition timed out");
                Err(PoolError::AcquisitionTimeout(timeout))
            }
        }
    }

    /// Get an idle session without waiting and without opening a new one.
    ///
    /// Returns `Ok(None)` when no session is idle.
    pub fn try_get(&self) -> Result<Option<PooledSession<F>>, PoolError> {
        let pooled = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(PoolError::PoolClosed);
            }
            state.pop_idle(self.inner.config.reuse_order)
        };
        Ok(pooled.map(|pooled| {
            self.inner.metrics.checkout(true);
            self.checkout(pooled)
        }))
    }

    async fn acquire(&self) -> Result<PooledSession<F>, PoolError> {
        let result = self.acquire_inner().await;
        self.inner.metrics.checkout(result.is_ok());
        result
    }

    async fn acquire_inner(&self) -> Result<PooledSession<F>, PoolError> {
        let inner = &*self.inner;
        let waiting = {
            let mut state = inner.state.lock();
            if state.closed {
                return Err(PoolError::PoolClosed);
            }
            if let Some(pooled) = state.pop_idle(inner.config.reuse_order) {
                drop(state);
                return Ok(self.checkout(pooled));
            }
            if state.allocated < inner.config.max_connections {
                state.allocated += 1;
                None
            } else {
                let id = state.next_waiter_id;
                state.next_waiter_id += 1;
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(Waiter { id, tx });
                tracing::debug!(
                    waiter = id,
                    queued = state.waiters.len(),
                    "pool exhausted, waiting for a session"
                );
                Some(Waiting {
                    inner,
                    id,
                    rx: Some(rx),
                })
            }
        };

        let slot = match waiting {
            None => Slot::reserved(inner),
            Some(waiting) => {
                inner.metrics.waited();
                match waiting.wait().await? {
                    Handoff::Session(pooled) => {
                        if inner.is_closed() {
                            if let Some(doomed) = inner.check_in(pooled) {
                                inner.destroy(doomed).await;
                            }
                            return Err(PoolError::PoolClosed);
                        }
                        return Ok(self.checkout(pooled));
                    }
                    Handoff::Permit => Slot::reserved(inner),
                }
            }
        };
        self.open_session(slot).await
    }

    async fn open_session(&self, slot: Slot<'_, F>) -> Result<PooledSession<F>, PoolError> {
        let inner = &*self.inner;
        if inner.is_closed() {
            return Err(PoolError::PoolClosed);
        }

        let session = match inner.factory.create_session(&inner.params).await {
            Ok(session) => session,
            Err(e) => {
                inner.metrics.creation_failed();
                tracing::warn!(
                    error = %e,
                    endpoint = inner.params.endpoint(),
                    "failed to create session"
                );
                drop(slot);
                return Err(PoolError::ConnectionCreation(e));
            }
        };

        let metadata = SessionMetadata::new(inner.next_session_id.fetch_add(1, Ordering::Relaxed));
        let pooled = Pooled { session, metadata };
        inner.metrics.connection_created();

        if inner.is_closed() {
            tracing::debug!(
                session_id = pooled.metadata.id,
                "pool closed while session was being created"
            );
            inner.destroy(pooled).await;
            drop(slot);
            return Err(PoolError::PoolClosed);
        }

        slot.commit();
        tracing::debug!(session_id = pooled.metadata.id, "session created");
        Ok(self.checkout(pooled))
    }

    fn checkout(&self, mut pooled: Pooled<F::Session>) -> PooledSession<F> {
        pooled.metadata.mark_checkout();
        tracing::trace!(
            session_id = pooled.metadata.id,
            checkout_count = pooled.metadata.checkout_count,
            "session checked out"
        );
        PooledSession {
            pool: Arc::clone(&self.inner),
            pooled: Some(pooled),
        }
    }

    /// Return a session to the pool.
    ///
    /// Equivalent to dropping the guard, except that a session destroyed
    /// because the pool is closed is closed before this returns.
    ///
    /// A session always goes back to the pool that issued it, even when
    /// released through a different pool handle.
    pub async fn release(&self, session: PooledSession<F>) {
        if !Arc::ptr_eq(&self.inner, &session.pool) {
            tracing::warn!("session released through a pool that did not issue it");
        }
        session.release().await;
    }

    /// Close the pool.
    ///
    /// Wakes every waiter with [`PoolError::PoolClosed`] and destroys idle
    /// sessions. Checked-out sessions are destroyed as they are released;
    /// this does not wait for them. Closing twice is a no-op.
    pub async fn close(&self) {
        let (idle, waiters) = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let idle: Vec<_> = state.idle.drain(..).collect();
            state.allocated -= idle.len() as u32;
            (idle, std::mem::take(&mut state.waiters))
        };

        tracing::info!(
            idle = idle.len(),
            waiters = waiters.len(),
            "session pool closed"
        );
        // Dropping the senders wakes every waiter.
        drop(waiters);

        for pooled in idle {
            self.inner.destroy(pooled).await;
        }
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Maximum number of sessions this pool will hold.
    #[must_use]
    pub fn max_connections(&self) -> u32 {
        self.inner.config.max_connections
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        let available = state.idle.len() as u32;
        PoolStatus {
            available,
            in_use: state.allocated - available,
            total: state.allocated,
            max: self.inner.config.max_connections,
            waiting: state.waiters.len() as u32,
        }
    }

    /// Get a snapshot of pool counters.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        self.inner.metrics.snapshot()
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Get the parameters used to open sessions.
    #[must_use]
    pub fn params(&self) -> &ConnectionParameters {
        &self.inner.params
    }
}

impl<F: SessionFactory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: SessionFactory> fmt::Debug for Pool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("params", &self.inner.params)
            .field("config", &self.inner.config)
            .field("status", &self.status())
            .finish()
    }
}

/// Builder for [`Pool`].
pub struct PoolBuilder<F> {
    factory: Option<F>,
    params: Option<ConnectionParameters>,
    config: PoolConfig,
}

impl<F: SessionFactory> PoolBuilder<F> {
    /// Create a builder with the default configuration.
    pub fn new() -> Self {
        Self {
            factory: None,
            params: None,
            config: PoolConfig::default(),
        }
    }

    /// Set the session factory.
    #[must_use]
    pub fn factory(mut self, factory: F) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Set the connection parameters.
    #[must_use]
    pub fn params(mut self, params: ConnectionParameters) -> Self {
        self.params = Some(params);
        self
    }

    /// Replace the whole configuration.
    #[must_use]
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the maximum number of sessions.
    #[must_use]
    pub fn max_connections(mut self, count: u32) -> Self {
        self.config = self.config.max_connections(count);
        self
    }

    /// Set the session acquisition timeout.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.connection_timeout(timeout);
        self
    }

    /// Set the idle reuse order.
    #[must_use]
    pub fn reuse_order(mut self, order: ReuseOrder) -> Self {
        self.config = self.config.reuse_order(order);
        self
    }

    /// Build the pool.
    pub fn build(self) -> Result<Pool<F>, PoolError> {
        let factory = self
            .factory
            .ok_or_else(|| PoolError::Configuration("a session factory is required".into()))?;
        let params = self
            .params
            .ok_or_else(|| PoolError::Configuration("connection parameters are required".into()))?;
        Pool::with_config(factory, params, self.config)
    }
}

impl<F: SessionFactory> Default for PoolBuilder<F> {
    fn default() -> Self {
        Self::new()
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of idle sessions available.
    pub available: u32,
    /// Number of sessions checked out or being created.
    pub in_use: u32,
    /// Total number of sessions allocated.
    pub total: u32,
    /// Maximum allowed sessions.
    pub max: u32,
    /// Number of acquires queued.
    pub waiting: u32,
}

impl PoolStatus {
    /// Percentage of capacity in use.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        f64::from(self.in_use) / f64::from(self.max) * 100.0
    }
}

/// A session checked out of the pool.
///
/// Dereferences to the underlying session. When dropped, the session goes
/// back to the pool that issued it. Since releasing consumes the guard, a
/// session cannot be returned twice.
pub struct PooledSession<F: SessionFactory> {
    pool: Arc<PoolInner<F>>,
    pooled: Option<Pooled<F::Session>>,
}

impl<F: SessionFactory> PooledSession<F> {
    fn pooled(&self) -> &Pooled<F::Session> {
        match &self.pooled {
            Some(pooled) => pooled,
            None => unreachable!("pooled session accessed after being returned"),
        }
    }

    /// Get the pool's metadata for this session.
    #[must_use]
    pub fn metadata(&self) -> &SessionMetadata {
        &self.pooled().metadata
    }

    /// Return the session to the pool.
    ///
    /// If the pool has been closed, the session is closed before this
    /// returns.
    pub async fn release(mut self) {
        if let Some(pooled) = self.pooled.take() {
            if let Some(doomed) = self.pool.check_in(pooled) {
                self.pool.destroy(doomed).await;
            }
        }
    }

    /// Close the session instead of returning it, freeing its slot.
    ///
    /// Use this when the holder knows the channel is no longer usable.
    pub async fn discard(mut self) {
        if let Some(pooled) = self.pooled.take() {
            let slot = Slot::reserved(&self.pool);
            tracing::debug!(session_id = pooled.metadata.id, "session discarded by holder");
            self.pool.destroy(pooled).await;
            drop(slot);
        }
    }

    /// Detach the session from the pool.
    ///
    /// The pool forgets the session and frees its slot; the caller becomes
    /// responsible for closing it.
    pub fn detach(mut self) -> Option<F::Session> {
        let pooled = self.pooled.take()?;
        self.pool.release_slot();
        tracing::debug!(session_id = pooled.metadata.id, "session detached from pool");
        Some(pooled.session)
    }
}

impl<F: SessionFactory> Deref for PooledSession<F> {
    type Target = F::Session;

    fn deref(&self) -> &Self::Target {
        &self.pooled().session
    }
}

impl<F: SessionFactory> DerefMut for PooledSession<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.pooled {
            Some(pooled) => &mut pooled.session,
            None => unreachable!("pooled session accessed after being returned"),
        }
    }
}

impl<F: SessionFactory> Drop for PooledSession<F> {
    fn drop(&mut self) {
        if let Some(pooled) = self.pooled.take() {
            if let Some(doomed) = self.pool.check_in(pooled) {
                self.pool.destroy_in_background(doomed);
            }
        }
    }
}

impl<F: SessionFactory> fmt::Debug for PooledSession<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledSession")
            .field("metadata", &self.pooled.as_ref().map(|p| &p.metadata))
            .finish()
    }
}
