//! Engine worker thread
//!
//! The DuckDB connection is owned by one OS thread for its whole life.
//! Async callers send `Command`s over a crossbeam channel and await the reply
//! on a tokio oneshot, so statements from concurrent callers are serialized
//! and never interleave.
//!
//! Shutdown never waits on a statement. A cancelled query keeps the thread
//! busy until DuckDB finishes it, so `shutdown` gives the thread a short
//! grace period and then detaches it; the stop flag makes the detached
//! thread skip anything still queued and exit after its current statement.

use super::error::{EngineError, EngineResult};
use super::RawResult;
use crossbeam_channel::{Receiver, Sender};
use duckdb::arrow::record_batch::RecordBatch;
use duckdb::Connection;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};

pub(crate) enum Command {
    /// Run statements in order; reply with the last one's result
    Execute {
        statements: Vec<String>,
        reply: oneshot::Sender<EngineResult<RawResult>>,
    },
    Shutdown,
}

/// How the worker opens its database
#[derive(Debug, Clone)]
pub(crate) struct WorkerSettings {
    pub database_path: Option<PathBuf>,
    /// Executed once right after the connection opens
    pub startup_sql: String,
}

/// How long `shutdown` waits for the thread before detaching it
pub(crate) const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

const JOIN_POLL: Duration = Duration::from_millis(5);

pub(crate) struct Worker {
    tx: Sender<Command>,
    stop: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    /// Spawn the thread and wait until the connection is open
    pub async fn spawn(settings: WorkerSettings) -> EngineResult<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let (ready_tx, ready_rx) = oneshot::channel();
        let stop = Arc::new(AtomicBool::new(false));

        let thread = {
            let stop = Arc::clone(&stop);
            std::thread::Builder::new()
                .name("quackdb-engine".to_string())
                .spawn(move || worker_main(&settings, &rx, &stop, ready_tx))
                .map_err(|e| EngineError::Init(format!("failed to spawn engine thread: {e}")))?
        };

        let worker = Worker {
            tx,
            stop,
            thread: Mutex::new(Some(thread)),
        };

        match ready_rx.await {
            Ok(Ok(())) => Ok(worker),
            Ok(Err(e)) => {
                worker.join(SHUTDOWN_GRACE).await;
                Err(e)
            }
            Err(_) => {
                worker.join(SHUTDOWN_GRACE).await;
                Err(EngineError::Init(
                    "engine worker exited during startup".to_string(),
                ))
            }
        }
    }

    pub async fn execute(&self, statements: Vec<String>) -> EngineResult<RawResult> {
        if self.stop.load(Ordering::Acquire) {
            return Err(EngineError::WorkerGone);
        }
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Execute { statements, reply })
            .map_err(|_| EngineError::WorkerGone)?;
        rx.await.map_err(|_| EngineError::WorkerGone)?
    }

    /// Ask the thread to stop and wait up to `SHUTDOWN_GRACE` for it.
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        self.stop.store(true, Ordering::Release);
        let _ = self.tx.send(Command::Shutdown);
        self.join(SHUTDOWN_GRACE).await;
    }

    /// Wait for the thread to exit; past `grace`, detach it instead.
    async fn join(&self, grace: Duration) {
        let Some(thread) = self.thread.lock().take() else {
            return;
        };
        let deadline = Instant::now() + grace;
        while !thread.is_finished() {
            if Instant::now() >= deadline {
                warn!(
                    grace_ms = grace.as_millis(),
                    "engine worker still busy, detaching"
                );
                return;
            }
            tokio::time::sleep(JOIN_POLL).await;
        }
        match thread.join() {
            Ok(()) => debug!("engine worker stopped"),
            Err(_) => warn!("engine worker panicked"),
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        // The thread exits on its own once it sees this; no join on drop.
        self.stop.store(true, Ordering::Release);
        let _ = self.tx.send(Command::Shutdown);
    }
}

fn worker_main(
    settings: &WorkerSettings,
    rx: &Receiver<Command>,
    stop: &AtomicBool,
    ready: oneshot::Sender<EngineResult<()>>,
) {
    let conn = match open_connection(settings) {
        Ok(conn) => conn,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    if ready.send(Ok(())).is_err() {
        // Nobody is waiting for this engine anymore
        return;
    }

    while let Ok(command) = rx.recv() {
        // Commands queued behind a shutdown are dropped unanswered
        if stop.load(Ordering::Acquire) {
            break;
        }
        match command {
            Command::Execute { statements, reply } => {
                let result = run_statements(&conn, &statements);
                // The caller may have given up (cancelled); drop the result
                let _ = reply.send(result);
            }
            Command::Shutdown => break,
        }
    }
}

fn open_connection(settings: &WorkerSettings) -> EngineResult<Connection> {
    let conn = match &settings.database_path {
        Some(path) => Connection::open(path),
        None => Connection::open_in_memory(),
    }
    .map_err(|e| EngineError::Init(e.to_string()))?;

    if !settings.startup_sql.is_empty() {
        conn.execute_batch(&settings.startup_sql)
            .map_err(|e| EngineError::Init(e.to_string()))?;
    }
    Ok(conn)
}

fn run_statements(conn: &Connection, statements: &[String]) -> EngineResult<RawResult> {
    let Some((last, leading)) = statements.split_last() else {
        return Err(EngineError::Query("No SQL statements to execute".to_string()));
    };

    for sql in leading {
        conn.execute_batch(sql)?;
    }

    let mut stmt = conn.prepare(last)?;
    let arrow = stmt.query_arrow([])?;
    let schema = arrow.get_schema();
    let batches: Vec<RecordBatch> = arrow.collect();
    Ok(RawResult::new(schema, batches))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn in_memory() -> WorkerSettings {
        WorkerSettings {
            database_path: None,
            startup_sql: String::new(),
        }
    }

    #[tokio::test]
    async fn test_execute_returns_last_result() {
        let worker = Worker::spawn(in_memory()).await.unwrap();
        let result = worker
            .execute(vec![
                "CREATE TABLE t AS SELECT 1 AS x".to_string(),
                "SELECT x + 1 AS y FROM t".to_string(),
            ])
            .await
            .unwrap();
        assert_eq!(result.num_rows(), 1);
        assert_eq!(result.schema().field(0).name(), "y");
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_error_message_from_engine() {
        let worker = Worker::spawn(in_memory()).await.unwrap();
        let err = worker
            .execute(vec!["SELECT * FROM missing_table".to_string()])
            .await
            .unwrap_err();
        match err {
            EngineError::Query(msg) => assert!(msg.contains("missing_table"), "{msg}"),
            other => panic!("unexpected error: {other:?}"),
        }
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_bad_startup_sql_fails_init() {
        let settings = WorkerSettings {
            database_path: None,
            startup_sql: "SET no_such_setting = 1".to_string(),
        };
        assert!(matches!(
            Worker::spawn(settings).await,
            Err(EngineError::Init(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_does_not_wait_for_busy_statement() {
        let settings = WorkerSettings {
            database_path: None,
            startup_sql: "SET threads = 1;".to_string(),
        };
        let worker = Arc::new(Worker::spawn(settings).await.unwrap());
        let busy = {
            let worker = Arc::clone(&worker);
            tokio::spawn(async move {
                worker
                    .execute(vec![
                        "SELECT sum(a.range * b.range) FROM range(200000) a, range(200000) b"
                            .to_string(),
                    ])
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = Instant::now();
        worker.shutdown().await;
        assert!(started.elapsed() < SHUTDOWN_GRACE + Duration::from_secs(2));
        assert!(matches!(
            worker.execute(vec!["SELECT 1".to_string()]).await,
            Err(EngineError::WorkerGone)
        ));
        busy.abort();
    }

    #[tokio::test]
    async fn test_execute_after_shutdown() {
        let worker = Worker::spawn(in_memory()).await.unwrap();
        worker.shutdown().await;
        worker.shutdown().await;
        assert!(matches!(
            worker.execute(vec!["SELECT 1".to_string()]).await,
            Err(EngineError::WorkerGone)
        ));
    }
}
