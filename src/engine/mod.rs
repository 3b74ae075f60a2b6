//! Engine Connection Manager
//!
//! Owns the lifecycle of the single embedded DuckDB instance:
//!
//! ```text
//! Uninitialized ──connection()──▶ Initializing ──ok──▶ Ready ──dispose()──▶ Disposed
//!                                      │
//!                                      └──err──▶ Uninitialized (next call retries)
//! ```
//!
//! Initialization is lazy and single-flight: concurrent first callers share
//! one startup. Once disposed, every operation fails with
//! `EngineError::Disposed` and the engine is never restarted.

mod error;
mod files;
mod worker;

pub use error::{EngineError, EngineResult, RegistrationError};
pub use files::{validate_name, FileHandle, FileRegistry};

use crate::config::EngineConfig;
use crate::value::{record_batches_to_result, ArrowConvertError, QueryResult};
use duckdb::arrow::datatypes::SchemaRef;
use duckdb::arrow::record_batch::RecordBatch;
use files::FilesDir;
use parking_lot::Mutex;
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{error, info};
use worker::{Worker, WorkerSettings};

/// Raw Arrow result of the final statement
#[derive(Debug, Clone)]
pub struct RawResult {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
}

impl RawResult {
    pub fn new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Self {
        RawResult { schema, batches }
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }

    /// Normalize into row objects
    pub fn to_query_result(&self) -> Result<QueryResult, ArrowConvertError> {
        record_batches_to_result(&self.schema, &self.batches)
    }
}

/// Lifecycle state of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Uninitialized,
    Initializing,
    Ready,
    Disposed,
}

struct Engine {
    worker: Worker,
    files_dir: FilesDir,
}

/// Cheap, cloneable handle to a running engine
#[derive(Clone)]
pub struct EngineHandle {
    inner: Arc<Engine>,
}

impl EngineHandle {
    async fn start(config: &EngineConfig) -> EngineResult<Self> {
        let files_dir = FilesDir::prepare(config.files_dir.as_deref()).await?;
        let settings = WorkerSettings {
            database_path: config.database_path.clone(),
            startup_sql: startup_sql(config, files_dir.path()),
        };
        let worker = Worker::spawn(settings).await?;
        Ok(EngineHandle {
            inner: Arc::new(Engine { worker, files_dir }),
        })
    }

    /// Run a single statement
    pub async fn execute(&self, sql: &str) -> EngineResult<RawResult> {
        self.inner.worker.execute(vec![sql.to_string()]).await
    }

    /// Run statements in order, returning the final statement's result
    pub async fn execute_batch(&self, statements: Vec<String>) -> EngineResult<RawResult> {
        self.inner.worker.execute(statements).await
    }

    /// Directory the engine resolves bare file names against
    pub fn files_dir(&self) -> &Path {
        self.inner.files_dir.path()
    }

    async fn shutdown(&self) {
        self.inner.worker.shutdown().await;
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("files_dir", &self.files_dir())
            .finish()
    }
}

/// Settings applied once per connection
fn startup_sql(config: &EngineConfig, files_dir: &Path) -> String {
    let mut sql = format!("SET threads = {};", config.effective_threads());
    if let Some(limit) = &config.memory_limit {
        sql.push_str(&format!(" SET memory_limit = {};", quote_literal(limit)));
    }
    sql.push_str(&format!(
        " SET file_search_path = {};",
        quote_literal(&files_dir.to_string_lossy())
    ));
    sql
}

/// SQL string literal with embedded quotes doubled
pub(crate) fn quote_literal(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', "''"))
}

/// Owner of the engine instance and its registered files
pub struct EngineManager {
    config: EngineConfig,
    engine: OnceCell<EngineHandle>,
    state: Mutex<EngineState>,
    disposed: AtomicBool,
    files: FileRegistry,
}

impl EngineManager {
    pub fn new(config: EngineConfig) -> Self {
        EngineManager {
            config,
            engine: OnceCell::new(),
            state: Mutex::new(EngineState::Uninitialized),
            disposed: AtomicBool::new(false),
            files: FileRegistry::new(),
        }
    }

    pub fn state(&self) -> EngineState {
        *self.state.lock()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn ensure_live(&self) -> EngineResult<()> {
        if self.is_disposed() {
            return Err(EngineError::Disposed);
        }
        Ok(())
    }

    /// Running engine, starting it on first use
    pub async fn connection(&self) -> EngineResult<EngineHandle> {
        self.ensure_live()?;
        let handle = self.engine.get_or_try_init(|| self.start()).await?.clone();
        // dispose() may have won the race with startup
        self.ensure_live()?;
        Ok(handle)
    }

    async fn start(&self) -> EngineResult<EngineHandle> {
        *self.state.lock() = EngineState::Initializing;
        info!(
            database = ?self.config.database_path,
            threads = self.config.effective_threads(),
            "starting engine"
        );

        match EngineHandle::start(&self.config).await {
            Ok(handle) => {
                let disposed = {
                    let mut state = self.state.lock();
                    if *state == EngineState::Disposed {
                        true
                    } else {
                        *state = EngineState::Ready;
                        false
                    }
                };
                if disposed {
                    handle.shutdown().await;
                    return Err(EngineError::Disposed);
                }
                info!(files_dir = %handle.files_dir().display(), "engine ready");
                Ok(handle)
            }
            Err(e) => {
                let mut state = self.state.lock();
                if *state != EngineState::Disposed {
                    *state = EngineState::Uninitialized;
                }
                error!(error = %e, "engine initialization failed");
                Err(e)
            }
        }
    }

    pub async fn execute(&self, sql: &str) -> EngineResult<RawResult> {
        self.connection().await?.execute(sql).await
    }

    pub async fn execute_batch(&self, statements: Vec<String>) -> EngineResult<RawResult> {
        self.connection().await?.execute_batch(statements).await
    }

    /// Expose a file to SQL under `name`.
    ///
    /// The name is validated and claimed before the engine is touched, so a
    /// bad or duplicate name fails without starting anything.
    pub async fn register_file(&self, name: &str, handle: FileHandle) -> EngineResult<()> {
        self.ensure_live()?;
        self.files.reserve(name)?;

        let outcome = async {
            let engine = self.connection().await?;
            engine.inner.files_dir.materialize(name, handle).await
        }
        .await;

        match outcome {
            Ok(()) => {
                info!(name, "registered file");
                Ok(())
            }
            Err(e) => {
                self.files.release(name);
                Err(e)
            }
        }
    }

    /// Unregister `name` and delete its file; returns whether it was registered
    pub async fn drop_file(&self, name: &str) -> EngineResult<bool> {
        self.ensure_live()?;
        if !self.files.release(name) {
            return Ok(false);
        }
        if let Some(engine) = self.engine.get() {
            engine.inner.files_dir.remove(name).await?;
        }
        Ok(true)
    }

    pub fn registered_files(&self) -> Vec<String> {
        self.files.list()
    }

    /// Bytes of a file in the virtual directory (registered or exported)
    pub async fn copy_file_to_buffer(&self, name: &str) -> EngineResult<Vec<u8>> {
        validate_name(name)?;
        let engine = self.connection().await?;
        engine.inner.files_dir.read(name).await
    }

    /// Write `query`'s result as Parquet to `name` and return the bytes
    pub async fn export_parquet(&self, query: &str, name: &str) -> EngineResult<Vec<u8>> {
        validate_name(name)?;
        let engine = self.connection().await?;
        let target = engine.inner.files_dir.resolve(name);
        let sql = format!(
            "COPY ({}) TO {} (FORMAT PARQUET)",
            crate::key::normalize_sql(query),
            quote_literal(&target.to_string_lossy())
        );
        engine.execute(&sql).await?;
        info!(name, "exported parquet");
        engine.inner.files_dir.read(name).await
    }

    /// Stop the engine. Idempotent; later calls are no-ops.
    ///
    /// Returns promptly even while an abandoned statement is still running:
    /// the worker thread is detached and exits once DuckDB finishes it.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        *self.state.lock() = EngineState::Disposed;
        self.files.clear();
        if let Some(engine) = self.engine.get() {
            engine.shutdown().await;
        }
        info!("engine disposed");
    }
}

impl std::fmt::Debug for EngineManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineManager")
            .field("state", &self.state())
            .field("files", &self.files.list())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal("2GB"), "'2GB'");
        assert_eq!(quote_literal("it's"), "'it''s'");
    }

    #[test]
    fn test_startup_sql() {
        let config = EngineConfig {
            threads: 2,
            memory_limit: Some("1GB".into()),
            ..EngineConfig::default()
        };
        let sql = startup_sql(&config, Path::new("/tmp/files"));
        assert_eq!(
            sql,
            "SET threads = 2; SET memory_limit = '1GB'; SET file_search_path = '/tmp/files';"
        );
    }

    #[tokio::test]
    async fn test_lazy_start() {
        let manager = EngineManager::new(EngineConfig::default());
        assert_eq!(manager.state(), EngineState::Uninitialized);
        let result = manager.execute("SELECT 42 AS answer").await.unwrap();
        assert_eq!(result.num_rows(), 1);
        assert_eq!(manager.state(), EngineState::Ready);
        manager.dispose().await;
        assert_eq!(manager.state(), EngineState::Disposed);
    }

    #[tokio::test]
    async fn test_raw_result_normalizes() {
        let manager = EngineManager::new(EngineConfig::default());
        let raw = manager.execute("SELECT 1 AS a, 'hello' AS b").await.unwrap();
        let result = raw.to_query_result().unwrap();
        assert_eq!(result.column_names(), vec!["a", "b"]);
        assert_eq!(result.count, 1);
        manager.dispose().await;
    }
}
