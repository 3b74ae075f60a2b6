//! Query Execution Module
//!
//! Provides the query execution path with:
//! - Cache-first coordination (`QueryCoordinator`)
//! - Cooperative cancellation and timeouts (`CancellationController`)

mod cancel;
mod coordinator;

pub use cancel::{CancelSignal, Cancelled, CancellationController};
pub use coordinator::QueryCoordinator;

use crate::key::CacheKey;
use crate::value::QueryResult;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

/// Execution error types.
///
/// Query failures are not errors at this level: they come back as a
/// `QueryOutcome` with `QueryStatus::Error`. Only conditions that make the
/// whole session unusable escalate.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecutionError {
    /// The engine could not be started
    #[error("Engine initialization failed: {0}")]
    EngineInit(String),

    /// The session was disposed
    #[error("Engine has been disposed")]
    Disposed,
}

/// Result type for execution operations
pub type ExecutionResult<T> = Result<T, ExecutionError>;

/// Lifecycle of one query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryStatus {
    Idle,
    Running,
    Success,
    Error,
    Cancelled,
}

/// Per-call options
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Skip the cache entirely: no lookup, no store
    pub no_cache: bool,
    /// Give up after this long (reported as cancelled)
    pub timeout: Option<Duration>,
}

impl RunOptions {
    pub fn no_cache() -> Self {
        RunOptions {
            no_cache: true,
            ..RunOptions::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Metadata describing one `run_query` call
#[derive(Debug, Clone, Serialize)]
pub struct QueryMeta {
    pub id: Uuid,
    pub sql: String,
    pub cache_hit: bool,
    pub execution_time_ms: f64,
    pub status: QueryStatus,
    pub error: Option<String>,
    pub hash: CacheKey,
    pub created: DateTime<Utc>,
    /// Statements sent to the engine (0 on a cache hit)
    pub statements: usize,
}

impl QueryMeta {
    pub(crate) fn running(sql: &str, hash: CacheKey) -> Self {
        QueryMeta {
            id: Uuid::new_v4(),
            sql: sql.to_string(),
            cache_hit: false,
            execution_time_ms: 0.0,
            status: QueryStatus::Running,
            error: None,
            hash,
            created: Utc::now(),
            statements: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }
}

/// What `run_query` hands back: a result on success, metadata always
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub result: Option<QueryResult>,
    pub meta: QueryMeta,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::derive_key;

    #[test]
    fn test_execution_error_display() {
        let err = ExecutionError::EngineInit("out of memory".to_string());
        assert_eq!(
            format!("{err}"),
            "Engine initialization failed: out of memory"
        );
        assert_eq!(ExecutionError::Disposed.to_string(), "Engine has been disposed");
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&QueryStatus::Success).unwrap();
        assert_eq!(json, "\"SUCCESS\"");
        let json = serde_json::to_string(&QueryStatus::Cancelled).unwrap();
        assert_eq!(json, "\"CANCELLED\"");
    }

    #[test]
    fn test_run_options() {
        let opts = RunOptions::default();
        assert!(!opts.no_cache);
        assert!(opts.timeout.is_none());

        let opts = RunOptions::no_cache().with_timeout(Duration::from_secs(1));
        assert!(opts.no_cache);
        assert_eq!(opts.timeout, Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_running_meta() {
        let meta = QueryMeta::running("SELECT 1", derive_key("SELECT 1"));
        assert_eq!(meta.status, QueryStatus::Running);
        assert!(!meta.cache_hit);
        assert!(meta.error.is_none());
        assert!(!meta.is_success());
    }
}
