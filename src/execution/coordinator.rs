//! Query Execution Coordinator
//!
//! Given SQL text: derive the cache key, consult the cache, execute on a
//! miss, normalize the result, store it, and report metadata.
//!
//! Query failures (syntax errors, missing tables, ...) are reported inside
//! the outcome with `QueryStatus::Error` and the engine's message verbatim.
//! Only engine startup failure and use-after-dispose escalate to `Err`.

use super::cancel::{CancelSignal, CancellationController};
use super::{ExecutionError, ExecutionResult, QueryMeta, QueryOutcome, QueryStatus, RunOptions};
use crate::cache::ResultCache;
use crate::engine::{EngineError, EngineManager};
use crate::key::{derive_key, normalize_sql, CacheKey};
use crate::splitter::split_statements;
use crate::value::QueryResult;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Message reported for SQL with nothing to run
pub const NO_STATEMENTS: &str = "No SQL statements to execute";

enum Step {
    Hit(QueryResult),
    Executed {
        result: QueryResult,
        statements: usize,
    },
    Failed {
        message: String,
        statements: usize,
    },
}

/// Cache-first query runner
#[derive(Debug, Clone)]
pub struct QueryCoordinator {
    engine: Arc<EngineManager>,
    cache: Arc<ResultCache>,
    cancellation: Arc<CancellationController>,
    normalize_keys: bool,
    default_timeout: Option<Duration>,
}

impl QueryCoordinator {
    pub fn new(
        engine: Arc<EngineManager>,
        cache: Arc<ResultCache>,
        cancellation: Arc<CancellationController>,
    ) -> Self {
        QueryCoordinator {
            engine,
            cache,
            cancellation,
            normalize_keys: false,
            default_timeout: None,
        }
    }

    /// Hash normalized SQL instead of the raw text
    pub fn with_normalized_keys(mut self, enabled: bool) -> Self {
        self.normalize_keys = enabled;
        self
    }

    /// Timeout applied when `RunOptions::timeout` is unset
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn engine(&self) -> &Arc<EngineManager> {
        &self.engine
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn cancellation(&self) -> &Arc<CancellationController> {
        &self.cancellation
    }

    /// Key this coordinator files `sql` under
    pub fn cache_key(&self, sql: &str) -> CacheKey {
        if self.normalize_keys {
            derive_key(normalize_sql(sql))
        } else {
            derive_key(sql)
        }
    }

    /// Run `sql` against the controller's current cancellation signal
    pub async fn run_query(&self, sql: &str, opts: RunOptions) -> ExecutionResult<QueryOutcome> {
        let signal = self.cancellation.signal();
        self.run_query_with_signal(sql, opts, &signal).await
    }

    /// Run `sql`, giving up when `signal` fires
    pub async fn run_query_with_signal(
        &self,
        sql: &str,
        opts: RunOptions,
        signal: &CancelSignal,
    ) -> ExecutionResult<QueryOutcome> {
        let started = Instant::now();
        let hash = self.cache_key(sql);
        let mut meta = QueryMeta::running(sql, hash.clone());
        debug!(hash = %hash, no_cache = opts.no_cache, "running query");

        let timeout = opts.timeout.or(self.default_timeout);
        let raced = self
            .cancellation
            .race_with_timeout(signal, timeout, self.execute(sql, &hash, opts, signal))
            .await;

        let result = match raced {
            Ok(Ok(Step::Hit(result))) => {
                meta.cache_hit = true;
                meta.status = QueryStatus::Success;
                Some(result)
            }
            Ok(Ok(Step::Executed { result, statements })) => {
                meta.statements = statements;
                meta.status = QueryStatus::Success;
                Some(result)
            }
            Ok(Ok(Step::Failed {
                message,
                statements,
            })) => {
                meta.statements = statements;
                meta.status = QueryStatus::Error;
                meta.error = Some(message);
                None
            }
            Ok(Err(e)) => {
                warn!(hash = %hash, error = %e, "query aborted");
                return Err(e);
            }
            Err(cancelled) => {
                meta.status = QueryStatus::Cancelled;
                meta.error = Some(cancelled.to_string());
                None
            }
        };

        meta.execution_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        match meta.status {
            QueryStatus::Error | QueryStatus::Cancelled => warn!(
                hash = %meta.hash,
                status = ?meta.status,
                elapsed_ms = meta.execution_time_ms,
                error = meta.error.as_deref().unwrap_or_default(),
                "query failed"
            ),
            _ => info!(
                hash = %meta.hash,
                cache_hit = meta.cache_hit,
                rows = result.as_ref().map_or(0, |r| r.count),
                elapsed_ms = meta.execution_time_ms,
                "query finished"
            ),
        }

        Ok(QueryOutcome { result, meta })
    }

    async fn execute(
        &self,
        sql: &str,
        hash: &CacheKey,
        opts: RunOptions,
        signal: &CancelSignal,
    ) -> ExecutionResult<Step> {
        if !opts.no_cache {
            if let Some(entry) = self.cache.lookup(hash).await {
                return Ok(Step::Hit(entry.into_result()));
            }
        }

        let statements: Vec<String> = split_statements(sql)
            .into_iter()
            .map(str::to_string)
            .collect();
        let count = statements.len();
        if count == 0 {
            return Ok(Step::Failed {
                message: NO_STATEMENTS.to_string(),
                statements: 0,
            });
        }

        let raw = match self.engine.execute_batch(statements).await {
            Ok(raw) => raw,
            Err(EngineError::Init(msg)) => return Err(ExecutionError::EngineInit(msg)),
            Err(EngineError::Disposed) => return Err(ExecutionError::Disposed),
            Err(e) => {
                return Ok(Step::Failed {
                    message: e.to_string(),
                    statements: count,
                })
            }
        };

        let result = match raw.to_query_result() {
            Ok(result) => result,
            Err(e) => {
                return Ok(Step::Failed {
                    message: e.to_string(),
                    statements: count,
                })
            }
        };

        // A result that arrives after cancellation is never cached
        if !opts.no_cache && signal.check().is_ok() {
            self.cache
                .store(hash, &result, self.cache.default_ttl())
                .await;
        }

        Ok(Step::Executed {
            result,
            statements: count,
        })
    }
}
