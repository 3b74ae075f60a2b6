//! Session
//!
//! The UI-facing facade: one engine, one result cache, one cancellation
//! controller, wired together from a `Config`.

use crate::cache::{CacheError, CacheStats, CacheStore, FsCacheStore, MemoryCacheStore, ResultCache};
use crate::config::{CacheBackend, Config};
use crate::engine::{EngineError, EngineManager, EngineState, FileHandle, RawResult};
use crate::execution::{
    CancellationController, ExecutionResult, QueryCoordinator, QueryOutcome, RunOptions,
};
use crate::splitter::split_statements;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Settings a UI reads back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionConfig {
    pub should_cache: bool,
}

#[derive(Debug)]
pub struct Session {
    coordinator: QueryCoordinator,
}

impl Session {
    /// Build a session with the cache backend `config` selects
    pub async fn open(config: Config) -> Result<Self, CacheError> {
        let store: Arc<dyn CacheStore> = match config.cache.backend {
            CacheBackend::Memory => Arc::new(MemoryCacheStore::open(&config.cache.cache_name)),
            CacheBackend::Fs => Arc::new(
                FsCacheStore::open(&config.cache.dir, &config.cache.cache_name).await?,
            ),
        };
        Ok(Session::with_store(config, store))
    }

    /// Build a session over an existing cache store
    pub fn with_store(config: Config, store: Arc<dyn CacheStore>) -> Self {
        let cache = ResultCache::new(store, config.cache.ttl_seconds);
        cache.set_enabled(config.cache.enabled);

        let default_timeout = match config.engine.query_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };
        let coordinator = QueryCoordinator::new(
            Arc::new(EngineManager::new(config.engine)),
            Arc::new(cache),
            Arc::new(CancellationController::new()),
        )
        .with_normalized_keys(config.cache.normalize_keys)
        .with_default_timeout(default_timeout);

        Session { coordinator }
    }

    pub fn coordinator(&self) -> &QueryCoordinator {
        &self.coordinator
    }

    pub async fn run_query(&self, sql: &str, opts: RunOptions) -> ExecutionResult<QueryOutcome> {
        self.coordinator.run_query(sql, opts).await
    }

    /// Abort the running query; returns whether anything was running
    pub fn cancel_query(&self, reason: &str) -> bool {
        let cancelled = self.coordinator.cancellation().cancel(reason);
        if cancelled {
            info!(reason, "query cancelled");
        }
        cancelled
    }

    pub fn toggle_cache(&self, enabled: bool) {
        self.coordinator.cache().set_enabled(enabled);
    }

    pub fn config(&self) -> SessionConfig {
        SessionConfig {
            should_cache: self.coordinator.cache().is_enabled(),
        }
    }

    pub async fn register_file_handle(
        &self,
        name: &str,
        handle: FileHandle,
    ) -> Result<(), EngineError> {
        self.coordinator.engine().register_file(name, handle).await
    }

    pub async fn drop_file(&self, name: &str) -> Result<bool, EngineError> {
        self.coordinator.engine().drop_file(name).await
    }

    pub fn registered_files(&self) -> Vec<String> {
        self.coordinator.engine().registered_files()
    }

    /// Uncached query returning the engine's Arrow result, for exports
    pub async fn query(&self, sql: &str) -> Result<RawResult, EngineError> {
        let statements = split_statements(sql)
            .into_iter()
            .map(str::to_string)
            .collect();
        self.coordinator.engine().execute_batch(statements).await
    }

    pub async fn copy_file_to_buffer(&self, name: &str) -> Result<Vec<u8>, EngineError> {
        self.coordinator.engine().copy_file_to_buffer(name).await
    }

    pub async fn export_parquet(&self, sql: &str, name: &str) -> Result<Vec<u8>, EngineError> {
        self.coordinator.engine().export_parquet(sql, name).await
    }

    /// Forget every cached result
    pub async fn reset(&self) {
        self.coordinator.cache().clear().await;
        self.coordinator.cache().reset_stats();
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.coordinator.cache().stats()
    }

    pub fn engine_state(&self) -> EngineState {
        self.coordinator.engine().state()
    }

    /// Cancel anything in flight and shut the engine down
    pub async fn dispose(&self) {
        self.coordinator.cancellation().cancel("session disposed");
        self.coordinator.engine().dispose().await;
    }
}
