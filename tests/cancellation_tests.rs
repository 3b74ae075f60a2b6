//! Cancellation and Timeout Tests
//!
//! Tests for:
//! - Cancelling an in-flight query
//! - Controller reuse after a cancel
//! - Pre-fired signals and per-call timeouts
//! - Cancelled results never reach the cache
//! - Dispose does not wait for an abandoned statement

use quackdb::cache::MemoryCacheStore;
use quackdb::{
    CancelSignal, Config, EngineState, ExecutionError, QueryStatus, RunOptions, Session,
};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Test Helpers
// ============================================================================

/// Cross join large enough to keep one engine thread busy for a long time
const SLOW_QUERY: &str =
    "SELECT sum(a.range * b.range) AS s FROM range(200000) a, range(200000) b";

fn single_threaded_session() -> Session {
    let mut config = Config::default();
    config.engine.threads = 1;
    Session::with_store(config, Arc::new(MemoryCacheStore::open("cancel-tests")))
}

async fn wait_for_in_flight(session: &Session) {
    while session.coordinator().cancellation().in_flight() == 0 {
        tokio::task::yield_now().await;
    }
}

// ============================================================================
// In-flight Cancellation
// ============================================================================

#[tokio::test]
async fn test_cancel_in_flight_query() {
    let session = Arc::new(single_threaded_session());

    let running = {
        let session = Arc::clone(&session);
        tokio::spawn(async move {
            session
                .run_query(SLOW_QUERY, RunOptions::default())
                .await
        })
    };

    wait_for_in_flight(&session).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(session.cancel_query("user pressed stop"));

    let outcome = running.await.unwrap().unwrap();
    assert_eq!(outcome.meta.status, QueryStatus::Cancelled);
    assert!(outcome.result.is_none());
    assert_eq!(
        outcome.meta.error.as_deref(),
        Some("Query cancelled: user pressed stop")
    );
    assert_eq!(session.cache_stats().stores, 0);
    session.dispose().await;
}

#[tokio::test]
async fn test_dispose_returns_while_abandoned_query_runs() {
    let session = single_threaded_session();
    let opts = RunOptions::default().with_timeout(Duration::from_millis(200));
    let outcome = session.run_query(SLOW_QUERY, opts).await.unwrap();
    assert_eq!(outcome.meta.status, QueryStatus::Cancelled);

    // The engine thread is still inside the cross join here
    tokio::time::timeout(Duration::from_secs(5), session.dispose())
        .await
        .expect("dispose blocked on the abandoned statement");
    assert_eq!(session.engine_state(), EngineState::Disposed);
    assert!(matches!(
        session.run_query("SELECT 1", RunOptions::no_cache()).await,
        Err(ExecutionError::Disposed)
    ));
}

#[tokio::test]
async fn test_cancel_with_nothing_running_is_noop() {
    let session = single_threaded_session();
    assert!(!session.cancel_query("nobody home"));

    let outcome = session
        .run_query("SELECT 1 AS one", RunOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome.meta.status, QueryStatus::Success);
    session.dispose().await;
}

#[tokio::test]
async fn test_controller_reusable_after_cancel() {
    let session = single_threaded_session();
    let controller = session.coordinator().cancellation();

    let stale = controller.signal();
    let pending = controller.race(&stale, std::future::pending::<()>());
    tokio::pin!(pending);

    // Poll once so the race registers as in flight, then cancel it.
    tokio::select! {
        biased;
        _ = &mut pending => unreachable!("pending future resolved"),
        () = async {} => {}
    }
    assert!(session.cancel_query("first"));
    assert!(pending.await.is_err());

    let outcome = session
        .run_query("SELECT 2 AS two", RunOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome.meta.status, QueryStatus::Success);
    assert!(!controller.is_current(&stale));
    session.dispose().await;
}

// ============================================================================
// Signals and Timeouts
// ============================================================================

#[tokio::test]
async fn test_prefired_signal_short_circuits() {
    let session = single_threaded_session();
    let signal = CancelSignal::new();
    signal.cancel("before start");

    let outcome = session
        .coordinator()
        .run_query_with_signal("SELECT 1", RunOptions::default(), &signal)
        .await
        .unwrap();
    assert_eq!(outcome.meta.status, QueryStatus::Cancelled);
    assert_eq!(
        outcome.meta.error.as_deref(),
        Some("Query cancelled: before start")
    );
    assert_eq!(session.cache_stats().stores, 0);
}

#[tokio::test]
async fn test_timeout_reports_cancelled() {
    let session = single_threaded_session();
    let opts = RunOptions::default().with_timeout(Duration::from_millis(50));

    let outcome = session.run_query(SLOW_QUERY, opts).await.unwrap();
    assert_eq!(outcome.meta.status, QueryStatus::Cancelled);
    assert_eq!(
        outcome.meta.error.as_deref(),
        Some("Query cancelled: query timed out after 50ms")
    );
    assert!(outcome.meta.execution_time_ms >= 50.0);
}

#[tokio::test]
async fn test_config_default_timeout_applies() {
    let mut config = Config::default();
    config.engine.threads = 1;
    config.engine.query_timeout_ms = 50;
    let session = Session::open(config).await.unwrap();

    let outcome = session
        .run_query(SLOW_QUERY, RunOptions::no_cache())
        .await
        .unwrap();
    assert_eq!(outcome.meta.status, QueryStatus::Cancelled);
}

#[tokio::test]
async fn test_generous_timeout_lets_query_finish() {
    let session = single_threaded_session();
    let opts = RunOptions::default().with_timeout(Duration::from_secs(30));
    let outcome = session.run_query("SELECT 1", opts).await.unwrap();
    assert_eq!(outcome.meta.status, QueryStatus::Success);
    session.dispose().await;
}
