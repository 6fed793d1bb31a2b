//! Session pooling with metrics example.
//!
//! This example runs the pool against the in-memory mock server and shows
//! growth, waiting, hand-off and shutdown through the pool's status and
//! metrics.
//!
//! # Running
//!
//! ```bash
//! cargo run -p pgx-pool --example session_pool
//! ```

// Allow common patterns in example code
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use pgx_pool::{Pool, PoolConfig, ReuseOrder};
use pgx_session::Session;
use pgx_testing::{CounterTable, MockFactory, MockServer};
use tokio::time::Instant;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let fixture = CounterTable::default();
    let server = fixture
        .install(MockServer::builder())
        .with_statement_latency(Duration::from_millis(5))
        .build();

    println!("=== Session Pool with Metrics Example ===\n");

    let pool_config = PoolConfig::new()
        .max_connections(4)
        .connection_timeout(Duration::from_secs(10))
        .reuse_order(ReuseOrder::Lifo);

    println!("Pool configuration:");
    println!("  Max connections: {}", pool_config.max_connections);
    println!("  Connection timeout: {:?}", pool_config.connection_timeout);
    println!("  Reuse order: {:?}", pool_config.reuse_order);
    println!();

    let pool = Pool::with_config(server.factory(), server.params(), pool_config)?;
    println!("Pool created against {}, no sessions open yet.\n", server.endpoint());
    print_pool_status(&pool);

    // Example 1: Basic pool usage
    println!("\n1. Basic pool usage:");
    {
        let mut session = pool.get().await?;
        let answer: i32 = session.scalar("select 42").await?;
        println!("  Session {} answered {}", session.metadata().id, answer);
        // Session is automatically returned to pool when dropped
    }

    // Example 2: Per-session state
    println!("\n2. Preparing a counter table on every session:");
    let mut prepared = Vec::new();
    for _ in 0..pool.max_connections() {
        let mut session = pool.get().await?;
        session.execute(&fixture.create_sql()).await?;
        session.execute(&fixture.insert_sql()).await?;
        prepared.push(session);
    }
    print_pool_status(&pool);
    drop(prepared);

    // Example 3: More tasks than sessions
    println!("\n3. Concurrent pool usage (40 tasks, 4 sessions):");
    let start = Instant::now();
    let mut handles = vec![];

    for _ in 0..40 {
        let pool = pool.clone();
        let sql = fixture.increment_sql();
        handles.push(tokio::spawn(async move {
            let mut session = pool.get().await?;
            session.execute(&sql).await?;
            Ok::<_, Box<dyn std::error::Error + Send + Sync>>(())
        }));
    }

    // Monitor while the tasks run
    tokio::time::sleep(Duration::from_millis(10)).await;
    print_pool_status(&pool);

    let mut completed = 0;
    for handle in handles {
        if handle.await?.is_ok() {
            completed += 1;
        }
    }
    println!("  Completed {} tasks in {:?}", completed, start.elapsed());
    print_pool_metrics(&pool);

    // Example 4: How the work was spread
    println!("\n4. Work per session:");
    let mut sessions = Vec::new();
    for _ in 0..pool.max_connections() {
        sessions.push(pool.get().await?);
    }
    for session in &mut sessions {
        let count: i32 = session.scalar(&fixture.select_sql()).await?;
        println!(
            "  Session {}: {} increments over {} checkouts",
            session.metadata().id,
            count,
            session.metadata().checkout_count
        );
    }
    drop(sessions);

    // Example 5: Pool health
    println!("\n5. Pool health monitoring:");
    let utilization = pool.status().utilization();
    let health_status = if utilization < 70.0 {
        "HEALTHY"
    } else if utilization < 90.0 {
        "WARNING"
    } else {
        "CRITICAL"
    };
    println!("  Pool health: {}", health_status);
    println!("  Utilization: {:.1}%", utilization);

    // Graceful shutdown
    println!("\n6. Graceful shutdown:");
    pool.close().await;
    println!("  Pool closed, {} sessions still open on the server.", server.connection_count());
    match pool.get().await {
        Err(e) => println!("  Acquire after close: {}", e),
        Ok(_) => println!("  Acquire after close unexpectedly succeeded"),
    }
    print_pool_metrics(&pool);

    Ok(())
}

fn print_pool_status(pool: &Pool<MockFactory>) {
    let status = pool.status();
    println!(
        "  Status: {}/{} sessions in use, {} idle, {} waiting ({:.1}% utilization)",
        status.in_use,
        status.max,
        status.available,
        status.waiting,
        status.utilization()
    );
}

fn print_pool_metrics(pool: &Pool<MockFactory>) {
    let metrics = pool.metrics();
    println!("  Metrics:");
    println!("    Sessions created: {}", metrics.connections_created);
    println!("    Sessions closed: {}", metrics.connections_closed);
    println!(
        "    Checkout success rate: {:.2}%",
        metrics.checkout_success_rate() * 100.0
    );
    println!(
        "    Checkouts waited: {}, handed off: {}",
        metrics.checkouts_waited, metrics.handoffs
    );
}
