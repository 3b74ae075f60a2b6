//! Configuration System
//!
//! Provides hierarchical configuration loading from:
//! - quackdb.toml (default configuration)
//! - quackdb.local.toml (git-ignored local overrides)
//! - Environment variables (QUACKDB_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # quackdb.toml
//! [cache]
//! backend = "fs"
//! dir = "/var/cache/quackdb"
//! ttl_seconds = 600
//!
//! [engine]
//! threads = 4
//! memory_limit = "2GB"
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! QUACKDB_CACHE__ENABLED=false
//! QUACKDB_ENGINE__MEMORY_LIMIT=512MB
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Result cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Serve and store results through the cache
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Namespace of the cache store
    #[serde(default = "default_cache_name")]
    pub cache_name: String,

    /// Lifetime of a cached result in seconds
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,

    /// Where cached results live
    #[serde(default)]
    pub backend: CacheBackend,

    /// Root directory for the `fs` backend
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,

    /// Trim whitespace and trailing semicolons before hashing
    #[serde(default)]
    pub normalize_keys: bool,
}

/// Cache storage backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// Process memory; gone on exit
    #[default]
    Memory,
    /// JSON files on disk; survives restarts
    Fs,
}

/// Embedded engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Database file (None = in-memory database)
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Engine worker threads
    /// 0 = use all available CPU cores
    #[serde(default)]
    pub threads: usize,

    /// Engine memory cap, e.g. "2GB" (None = engine default)
    #[serde(default)]
    pub memory_limit: Option<String>,

    /// Directory for registered files (None = private temp dir)
    #[serde(default)]
    pub files_dir: Option<PathBuf>,

    /// Default per-query timeout in milliseconds. 0 = no timeout.
    #[serde(default)]
    pub query_timeout_ms: u64,
}

impl EngineConfig {
    /// Thread count with 0 resolved to the number of cores
    pub fn effective_threads(&self) -> usize {
        if self.threads == 0 {
            num_cpus::get()
        } else {
            self.threads
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Write logs to this file instead of stderr
    #[serde(default)]
    pub file: Option<PathBuf>,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_cache_name() -> String {
    "quackdb-query-cache".to_string()
}

fn default_ttl_seconds() -> u64 {
    3600 // 1 hour
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./.quackdb/cache")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Merges in order:
    /// 1. quackdb.toml (base configuration)
    /// 2. quackdb.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (QUACKDB_* prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("quackdb.toml"))
            .merge(Toml::file("quackdb.local.toml"))
            .merge(Env::prefixed("QUACKDB_").split("__"))
            .extract()
    }

    /// Load configuration from specific file path
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("QUACKDB_").split("__"))
            .extract()
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            enabled: true,
            cache_name: default_cache_name(),
            ttl_seconds: default_ttl_seconds(),
            backend: CacheBackend::Memory,
            dir: default_cache_dir(),
            normalize_keys: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}
