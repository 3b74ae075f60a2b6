//! # QuackDB Query Core
//!
//! Query execution and result caching for the QuackDB SQL playground.
//! Runs SQL on an embedded DuckDB and serves repeated queries from a
//! content-addressed result cache.
//!
//! ## Pipeline Architecture
//!
//! ```text
//! run_query(sql)
//!     ↓
//! [Hash-Key Deriver]        → "query-" + sha256(sql)
//!     ↓
//! [Result Cache lookup]     → hit: return cached rows
//!     ↓ miss
//! [Statement Splitter]      → statements in source order
//!     ↓
//! [Engine worker thread]    → Arrow result of the last statement
//!     ↓
//! [Arrow normalization]     → rows + schema
//!     ↓
//! [Result Cache store]      → best-effort, last write wins
//!     ↓
//! QueryOutcome { result, meta }
//! ```
//!
//! The Cancellation Controller races the whole pipeline, so a caller can
//! abort between any two steps.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use quackdb::{Config, RunOptions, Session};
//!
//! let session = Session::open(Config::default()).await?;
//!
//! let first = session.run_query("SELECT 1 AS a, 'hello' AS b", RunOptions::default()).await?;
//! assert!(!first.meta.cache_hit);
//!
//! let again = session.run_query("SELECT 1 AS a, 'hello' AS b", RunOptions::default()).await?;
//! assert!(again.meta.cache_hit);
//!
//! session.dispose().await;
//! ```
//!
//! ## Module Organization
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `key` | SQL text → cache key |
//! | `splitter` | SQL text → statements |
//! | `value` | Cell values, schema, Arrow normalization |
//! | `cache` | Result cache over pluggable stores |
//! | `engine` | Engine lifecycle, worker thread, registered files |
//! | `execution` | Coordinator and cancellation |
//! | `session` | UI-facing facade |
//! | `config` | Layered configuration |

pub mod cache;
pub mod config;
pub mod engine;
pub mod execution;
pub mod key;
pub mod session;
pub mod splitter;
pub mod value;

pub use cache::{CacheError, CacheStats, CacheStore, CachedEntry, ResultCache};
pub use config::Config;
pub use engine::{EngineError, EngineManager, EngineState, FileHandle, RawResult};
pub use execution::{
    CancelSignal, Cancelled, CancellationController, ExecutionError, QueryCoordinator,
    QueryMeta, QueryOutcome, QueryStatus, RunOptions,
};
pub use key::{derive_key, normalize_sql, CacheKey};
pub use session::{Session, SessionConfig};
pub use splitter::split_statements;
pub use value::{ColumnSchema, ColumnType, QueryResult, Row, Value};
