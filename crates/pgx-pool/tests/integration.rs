//! Session pool integration tests.
//!
//! These tests run the pool against the in-memory mock server from
//! `pgx-testing`, so they need no database:
//!
//! ```bash
//! cargo test -p pgx-pool --test integration
//! ```

#![allow(clippy::unwrap_used, clippy::panic)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pgx_pool::{Pool, PoolConfig, PoolError, ReuseOrder, SessionState};
use pgx_session::Session;
use pgx_testing::{ConnectFailure, CounterTable, MockFactory, MockServer};

fn pool_of(server: &MockServer, max_connections: u32) -> Pool<MockFactory> {
    Pool::new(server.factory(), server.params(), max_connections).unwrap()
}

/// Poll until `n` acquires are queued on the pool.
async fn wait_for_waiters(pool: &Pool<MockFactory>, n: u32) {
    for _ in 0..500 {
        if pool.status().waiting == n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("expected {n} waiters, pool status: {:?}", pool.status());
}

// =============================================================================
// Construction and Growth
// =============================================================================

#[tokio::test]
async fn test_pool_reports_max_connections() {
    let server = MockServer::builder().build();
    let pool = pool_of(&server, 5);

    assert_eq!(pool.max_connections(), 5);
    assert_eq!(pool.config().max_connections, 5);
    assert_eq!(pool.params().database(), "pgx_test");
    assert!(!pool.is_closed());
}

#[tokio::test]
async fn test_pool_grows_lazily() {
    let server = MockServer::builder().build();
    let pool = pool_of(&server, 3);
    assert_eq!(server.connection_count(), 0);

    let a = pool.get().await.unwrap();
    assert_eq!(server.connection_count(), 1);
    drop(a);

    // The idle session is reused rather than opening a second one.
    let _b = pool.get().await.unwrap();
    assert_eq!(server.connection_count(), 1);
    assert_eq!(pool.metrics().connections_created, 1);
}

#[tokio::test]
async fn test_no_session_is_checked_out_twice() {
    let server = MockServer::builder().build();
    let pool = pool_of(&server, 3);

    let sessions = vec![
        pool.get().await.unwrap(),
        pool.get().await.unwrap(),
        pool.get().await.unwrap(),
    ];
    let ids: HashSet<u64> = sessions.iter().map(|s| s.metadata().id).collect();
    let server_ids: HashSet<u64> = sessions.iter().map(|s| s.id()).collect();
    assert_eq!(ids.len(), 3);
    assert_eq!(server_ids.len(), 3);

    for session in &sessions {
        assert_eq!(session.metadata().state, SessionState::CheckedOut);
        assert_eq!(session.metadata().checkout_count, 1);
    }

    let status = pool.status();
    assert_eq!(status.in_use, 3);
    assert_eq!(status.available, 0);
    assert!((status.utilization() - 100.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_third_acquire_blocks_until_release() {
    let server = MockServer::builder().build();
    let pool = pool_of(&server, 2);

    let a = pool.get().await.unwrap();
    let _b = pool.get().await.unwrap();
    let a_id = a.metadata().id;

    let blocked = tokio::time::timeout(Duration::from_millis(30), pool.get()).await;
    assert!(blocked.is_err(), "third acquire should block at capacity");
    assert_eq!(pool.status().waiting, 0);
    assert_eq!(server.connection_count(), 2);

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.get().await.map(|s| s.metadata().id) })
    };
    wait_for_waiters(&pool, 1).await;

    drop(a);
    assert_eq!(waiter.await.unwrap().unwrap(), a_id);
    assert_eq!(server.connection_count(), 2);
    assert_eq!(pool.metrics().checkouts_waited, 2);
    assert_eq!(pool.metrics().handoffs, 1);
}

// =============================================================================
// Waiters
// =============================================================================

#[tokio::test]
async fn test_waiters_are_served_in_fifo_order() {
    let server = MockServer::builder().build();
    let pool = pool_of(&server, 1);
    let held = pool.get().await.unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let mut handles = Vec::new();
    for i in 0..4u32 {
        let task_pool = pool.clone();
        let order = Arc::clone(&order);
        handles.push(tokio::spawn(async move {
            let session = task_pool.get().await.unwrap();
            order.lock().unwrap().push(i);
            drop(session);
        }));
        wait_for_waiters(&pool, i + 1).await;
    }

    drop(held);
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    assert_eq!(server.stats().sessions_opened, 1);
}

#[tokio::test]
async fn test_released_session_is_not_stolen_by_newcomer() {
    let server = MockServer::builder().build();
    let pool = pool_of(&server, 1);
    let held = pool.get().await.unwrap();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.get().await.map(|s| s.metadata().id) })
    };
    wait_for_waiters(&pool, 1).await;

    // The session is handed to the waiter before anyone else can see it.
    let id = held.metadata().id;
    drop(held);
    assert!(pool.try_get().unwrap().is_none());
    assert_eq!(pool.status().available, 0);

    assert_eq!(waiter.await.unwrap().unwrap(), id);
}

#[tokio::test]
async fn test_timeout_removes_waiter() {
    let server = MockServer::builder().build();
    let pool = pool_of(&server, 1);
    let held = pool.get().await.unwrap();

    let err = pool
        .get_timeout(Duration::from_millis(20))
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert!(matches!(err, PoolError::AcquisitionTimeout(d) if d == Duration::from_millis(20)));
    assert_eq!(pool.status().waiting, 0);

    drop(held);
    assert_eq!(pool.status().available, 1);
    assert!(pool.try_get().unwrap().is_some());

    let metrics = pool.metrics();
    assert_eq!(metrics.acquisition_timeouts, 1);
    assert_eq!(metrics.checkouts_failed, 1);
}

#[tokio::test]
async fn test_configured_timeout_applies_to_get() {
    let server = MockServer::builder().build();
    let pool = Pool::builder()
        .factory(server.factory())
        .params(server.params())
        .max_connections(1)
        .connection_timeout(Duration::from_millis(20))
        .build()
        .unwrap();

    let _held = pool.get().await.unwrap();
    let err = pool.get().await.unwrap_err();
    assert!(err.is_timeout());
}

#[tokio::test]
async fn test_cancelled_waiter_does_not_leak_session() {
    let server = MockServer::builder().build();
    let pool = pool_of(&server, 1);
    let held = pool.get().await.unwrap();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.get().await.map(|s| s.metadata().id) })
    };
    wait_for_waiters(&pool, 1).await;

    // Hand the session over, then cancel the waiter before it runs again.
    drop(held);
    waiter.abort();
    assert!(waiter.await.unwrap_err().is_cancelled());

    let status = pool.status();
    assert_eq!(status.waiting, 0);
    assert_eq!(status.total, 1);
    assert_eq!(status.available, 1);
    assert_eq!(server.connection_count(), 1);
    assert!(pool.try_get().unwrap().is_some());
}

#[tokio::test]
async fn test_cancelled_waiter_leaves_queue() {
    let server = MockServer::builder().build();
    let pool = pool_of(&server, 1);
    let held = pool.get().await.unwrap();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.get().await.map(|_| ()) })
    };
    wait_for_waiters(&pool, 1).await;
    waiter.abort();
    let _ = waiter.await;

    assert_eq!(pool.status().waiting, 0);
    drop(held);
    assert_eq!(pool.status().available, 1);
}

// =============================================================================
// Idle Reuse Order
// =============================================================================

async fn reused_after_returning_in_order(order: ReuseOrder) -> (u64, [u64; 3]) {
    let server = MockServer::builder().build();
    let pool = Pool::with_config(
        server.factory(),
        server.params(),
        PoolConfig::new().max_connections(3).reuse_order(order),
    )
    .unwrap();

    let a = pool.get().await.unwrap();
    let b = pool.get().await.unwrap();
    let c = pool.get().await.unwrap();
    let ids = [a.metadata().id, b.metadata().id, c.metadata().id];
    pool.release(a).await;
    pool.release(b).await;
    pool.release(c).await;

    let next = pool.get().await.unwrap();
    (next.metadata().id, ids)
}

#[tokio::test]
async fn test_lifo_reuses_most_recent_session() {
    let (next, ids) = reused_after_returning_in_order(ReuseOrder::Lifo).await;
    assert_eq!(next, ids[2]);
}

#[tokio::test]
async fn test_fifo_reuses_least_recent_session() {
    let (next, ids) = reused_after_returning_in_order(ReuseOrder::Fifo).await;
    assert_eq!(next, ids[0]);
}

// =============================================================================
// Release Paths
// =============================================================================

#[tokio::test]
async fn test_drop_returns_session_to_pool() {
    let server = MockServer::builder().build();
    let pool = pool_of(&server, 2);

    {
        let mut session = pool.get().await.unwrap();
        let n: i32 = session.scalar("select 1").await.unwrap();
        assert_eq!(n, 1);
    }

    let status = pool.status();
    assert_eq!(status.available, 1);
    assert_eq!(status.in_use, 0);

    let session = pool.try_get().unwrap().unwrap();
    assert_eq!(session.metadata().checkout_count, 2);
    assert_eq!(session.statements(), 1);
}

#[tokio::test]
async fn test_session_error_does_not_affect_pool() {
    let server = MockServer::builder().build();
    let pool = pool_of(&server, 1);

    let mut session = pool.get().await.unwrap();
    assert!(session.execute("vacuum full").await.is_err());
    let id = session.metadata().id;
    pool.release(session).await;

    let mut session = pool.get().await.unwrap();
    assert_eq!(session.metadata().id, id);
    let n: i32 = session.scalar("select 7").await.unwrap();
    assert_eq!(n, 7);
}

#[tokio::test]
async fn test_closed_session_is_not_returned_to_idle() {
    let server = MockServer::builder().build();
    let pool = pool_of(&server, 1);

    let mut session = pool.get().await.unwrap();
    let id = session.metadata().id;
    session.close().await;
    pool.release(session).await;

    let status = pool.status();
    assert_eq!(status.total, 0);
    assert_eq!(status.available, 0);

    let fresh = pool.get().await.unwrap();
    assert_ne!(fresh.metadata().id, id);
    assert_eq!(server.stats().sessions_closed, 1);
}

#[tokio::test]
async fn test_try_get_never_grows() {
    let server = MockServer::builder().build();
    let pool = pool_of(&server, 2);

    assert!(pool.try_get().unwrap().is_none());
    assert_eq!(server.connection_count(), 0);

    drop(pool.get().await.unwrap());
    let session = pool.try_get().unwrap();
    assert!(session.is_some());
    assert!(pool.try_get().unwrap().is_none());
    assert_eq!(server.connection_count(), 1);
}

#[tokio::test]
async fn test_detach_frees_slot() {
    let server = MockServer::builder().build();
    let pool = pool_of(&server, 1);

    let session = pool.get().await.unwrap();
    let mut detached = session.detach().unwrap();
    assert_eq!(pool.status().total, 0);

    // The slot is free, so a new session can be opened alongside it.
    let pooled = pool.get().await.unwrap();
    assert_ne!(pooled.id(), detached.id());
    assert_eq!(server.connection_count(), 2);

    detached.close().await;
    assert_eq!(server.connection_count(), 1);
}

#[tokio::test]
async fn test_discard_hands_permit_to_waiter() {
    let server = MockServer::builder().build();
    let pool = pool_of(&server, 1);
    let held = pool.get().await.unwrap();
    let held_id = held.metadata().id;

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.get().await.map(|s| s.metadata().id) })
    };
    wait_for_waiters(&pool, 1).await;

    held.discard().await;
    let id = waiter.await.unwrap().unwrap();
    assert_ne!(id, held_id);
    assert_eq!(server.stats().peak_live_sessions, 1);
    assert_eq!(pool.status().total, 1);
}

#[tokio::test]
async fn test_release_through_other_pool_goes_home() {
    let server = MockServer::builder().build();
    let home = pool_of(&server, 1);
    let other = pool_of(&server, 1);

    let session = home.get().await.unwrap();
    other.release(session).await;

    assert_eq!(home.status().available, 1);
    assert_eq!(other.status().total, 0);
}

// =============================================================================
// Factory Failures
// =============================================================================

#[tokio::test]
async fn test_factory_failure_does_not_consume_capacity() {
    let server = MockServer::builder().build();
    let pool = pool_of(&server, 1);

    server.inject_connect_failure(ConnectFailure::Unreachable);
    let err = pool.get().await.unwrap_err();
    let connect = err.connect_error().unwrap();
    assert!(connect.is_transient());
    assert_eq!(pool.status().total, 0);

    let session = pool.get().await.unwrap();
    assert_eq!(session.metadata().id, 1);

    let metrics = pool.metrics();
    assert_eq!(metrics.creation_failures, 1);
    assert_eq!(metrics.checkouts_failed, 1);
    assert_eq!(metrics.checkouts_successful, 1);
}

#[tokio::test]
async fn test_failed_growth_passes_capacity_to_waiter() {
    let server = MockServer::builder()
        .with_connect_latency(Duration::from_millis(30))
        .build();
    let pool = pool_of(&server, 1);
    server.inject_connect_failure(ConnectFailure::Authentication);

    let first = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.get().await.map(|_| ()) })
    };
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.get().await.map(|s| s.metadata().id) })
    };
    wait_for_waiters(&pool, 1).await;

    let err = first.await.unwrap().unwrap_err();
    assert!(matches!(err, PoolError::ConnectionCreation(_)));
    assert!(second.await.unwrap().is_ok());
    assert_eq!(pool.metrics().handoffs, 1);
    assert_eq!(server.stats().failed_connects, 1);
}

#[tokio::test]
async fn test_unknown_database_surfaces_as_creation_error() {
    let server = MockServer::builder().with_database("pgx_test").build();
    let params = pgx_session::ConnectionParameters::new(server.endpoint(), "pgx_none", "missing");
    let pool = Pool::new(server.factory(), params, 2).unwrap();

    let err = pool.get().await.unwrap_err();
    assert!(err.to_string().contains("database \"missing\" does not exist"));
    assert_eq!(pool.status().total, 0);
}

// =============================================================================
// Close
// =============================================================================

#[tokio::test]
async fn test_close_is_idempotent() {
    let server = MockServer::builder().build();
    let pool = pool_of(&server, 2);
    drop(pool.get().await.unwrap());

    pool.close().await;
    pool.close().await;

    assert!(pool.is_closed());
    assert_eq!(server.stats().sessions_closed, 1);
    assert_eq!(pool.metrics().connections_closed, 1);
}

#[tokio::test]
async fn test_acquire_after_close_fails() {
    let server = MockServer::builder().build();
    let pool = pool_of(&server, 2);
    pool.close().await;

    assert!(pool.get().await.unwrap_err().is_closed());
    assert!(pool.try_get().unwrap_err().is_closed());
    assert_eq!(server.connection_count(), 0);
}

#[tokio::test]
async fn test_close_with_idle_and_checked_out_sessions() {
    let server = MockServer::builder().build();
    let pool = pool_of(&server, 2);

    let a = pool.get().await.unwrap();
    let b = pool.get().await.unwrap();
    drop(b);

    pool.close().await;
    let stats = server.stats();
    assert_eq!(stats.sessions_closed, 1);
    assert_eq!(stats.live_sessions, 1);
    assert_eq!(pool.status().total, 1);

    // Releasing after close destroys the session instead of pooling it.
    pool.release(a).await;
    let stats = server.stats();
    assert_eq!(stats.sessions_closed, 2);
    assert_eq!(stats.live_sessions, 0);
    assert_eq!(stats.sessions_dropped, 0);

    let status = pool.status();
    assert_eq!(status.total, 0);
    assert_eq!(status.available, 0);
}

#[tokio::test]
async fn test_close_wakes_waiters() {
    let server = MockServer::builder().build();
    let pool = pool_of(&server, 1);
    let held = pool.get().await.unwrap();

    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let pool = pool.clone();
            tokio::spawn(async move { pool.get().await.map(|_| ()) })
        })
        .collect();
    wait_for_waiters(&pool, 3).await;

    pool.close().await;
    for waiter in waiters {
        assert!(matches!(waiter.await.unwrap(), Err(PoolError::PoolClosed)));
    }
    assert_eq!(pool.status().waiting, 0);

    held.release().await;
    assert_eq!(server.connection_count(), 0);
}

#[tokio::test]
async fn test_close_during_growth_destroys_new_session() {
    let server = MockServer::builder()
        .with_connect_latency(Duration::from_millis(30))
        .build();
    let pool = pool_of(&server, 1);

    let acquire = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.get().await.map(|_| ()) })
    };
    tokio::time::sleep(Duration::from_millis(5)).await;
    pool.close().await;

    assert!(matches!(acquire.await.unwrap(), Err(PoolError::PoolClosed)));
    assert_eq!(pool.status().total, 0);
    assert_eq!(server.stats().sessions_closed, 1);
    assert_eq!(server.connection_count(), 0);
}

#[tokio::test]
async fn test_guard_dropped_after_close_destroys_session() {
    let server = MockServer::builder().build();
    let pool = pool_of(&server, 2);

    let session = pool.get().await.unwrap();
    pool.close().await;
    drop(session);
    tokio::task::yield_now().await;

    let status = pool.status();
    assert_eq!(status.total, 0);
    assert_eq!(status.available, 0);
    let stats = server.stats();
    assert_eq!(stats.sessions_closed, 1);
    assert_eq!(stats.sessions_dropped, 0);
    assert_eq!(pool.metrics().connections_closed, 1);
}

#[tokio::test]
async fn test_close_after_hand_off_destroys_session_for_waiter() {
    let server = MockServer::builder().build();
    let pool = pool_of(&server, 1);
    let held = pool.get().await.unwrap();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.get().await.map(|_| ()) })
    };
    wait_for_waiters(&pool, 1).await;

    // The session is on its way to the waiter when the pool closes.
    drop(held);
    pool.close().await;

    assert!(matches!(waiter.await.unwrap(), Err(PoolError::PoolClosed)));
    assert_eq!(pool.status().total, 0);
    assert_eq!(server.connection_count(), 0);
    assert_eq!(server.stats().sessions_closed, 1);
}

// =============================================================================
// Stress
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pool_cycles_work_across_sessions() {
    const TASKS: i32 = 100;
    const MAX: u32 = 2;

    let fixture = CounterTable::default();
    let server = fixture.install(MockServer::builder()).build();
    let pool = pool_of(&server, MAX);

    // Give every session its own counter table.
    let mut setup = Vec::new();
    for _ in 0..MAX {
        let mut session = pool.get().await.unwrap();
        session.execute(&fixture.create_sql()).await.unwrap();
        session.execute(&fixture.insert_sql()).await.unwrap();
        setup.push(session);
    }
    drop(setup);

    let handles: Vec<_> = (0..TASKS)
        .map(|_| {
            let pool = pool.clone();
            let sql = fixture.increment_sql();
            tokio::spawn(async move {
                let mut session = pool.get().await.unwrap();
                session.execute(&sql).await.unwrap();
                tokio::time::sleep(Duration::from_millis(2)).await;
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let mut sessions = Vec::new();
    for _ in 0..MAX {
        sessions.push(pool.get().await.unwrap());
    }
    let mut total = 0;
    for session in &mut sessions {
        let count: i32 = session.scalar(&fixture.select_sql()).await.unwrap();
        assert!(count > 0, "session {} was never used", session.id());
        total += count;
    }
    assert_eq!(total, TASKS);
    drop(sessions);

    let stats = server.stats();
    assert_eq!(stats.sessions_opened, u64::from(MAX));
    assert!(stats.peak_live_sessions <= MAX as usize);

    let status = pool.status();
    assert_eq!(status.total, MAX);
    assert_eq!(status.available, MAX);
    assert_eq!(status.waiting, 0);

    pool.close().await;
    assert_eq!(server.connection_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_acquire_with_timeouts_keeps_accounting() {
    let server = MockServer::builder()
        .with_statement_latency(Duration::from_millis(1))
        .build();
    let pool = pool_of(&server, 3);

    let handles: Vec<_> = (0..50)
        .map(|i| {
            let pool = pool.clone();
            tokio::spawn(async move {
                // Some callers give up early; their abandoned waits must not leak.
                let timeout = Duration::from_millis(if i % 5 == 0 { 1 } else { 2_000 });
                if let Ok(mut session) = pool.get_timeout(timeout).await {
                    session.execute("select 1").await.unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let status = pool.status();
    assert_eq!(status.waiting, 0);
    assert_eq!(status.in_use, 0);
    assert_eq!(status.total, status.available);
    assert!(status.total <= 3);
    assert!(server.stats().peak_live_sessions <= 3);
}
