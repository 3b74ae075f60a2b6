//! # QuackDB REPL
//!
//! Interactive shell over a QuackDB session: SQL runs through the cached
//! query path, dot-commands manage the cache and registered files.
//!
//! ## Usage
//!
//! ```bash
//! quackdb                              # in-memory database
//! quackdb --database analytics.duckdb  # persistent database
//! quackdb -c "SELECT 42 AS answer"     # run once and exit
//! ```
//!
//! SQL is executed once the input ends with `;`. Ctrl-C while a query runs
//! cancels it; Ctrl-D exits.

use anyhow::{Context, Result};
use clap::Parser;
use quackdb::config::LoggingConfig;
use quackdb::engine::FileHandle;
use quackdb::{Config, QueryOutcome, QueryResult, QueryStatus, RunOptions, Session};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

static TRACE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// QuackDB SQL playground shell
#[derive(Parser, Debug)]
#[command(name = "quackdb")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (default: quackdb.toml, quackdb.local.toml, QUACKDB_* env)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Database file (default: in-memory)
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Start with the result cache disabled
    #[arg(long)]
    no_cache: bool,

    /// Print results as JSON instead of a table
    #[arg(long)]
    json: bool,

    /// Run this SQL and exit
    #[arg(short, long)]
    command: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(&path.to_string_lossy())
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::load().context("failed to load configuration")?,
    };
    if let Some(db) = &args.database {
        config.engine.database_path = Some(db.clone());
    }
    if args.no_cache {
        config.cache.enabled = false;
    }

    init_tracing(&config.logging);

    let session = Arc::new(
        Session::open(config.clone())
            .await
            .context("failed to open result cache")?,
    );
    let mut shell = Shell {
        session: Arc::clone(&session),
        config,
        json: args.json,
    };

    let outcome = match args.command {
        Some(sql) => shell.run_sql(&sql).await,
        None => shell.repl().await,
    };

    session.dispose().await;
    outcome
}

fn init_tracing(logging: &LoggingConfig) {
    // QUACKDB_LOG takes precedence over the configured level
    let level = std::env::var("QUACKDB_LOG").unwrap_or_else(|_| logging.level.clone());
    let filter = tracing_subscriber::EnvFilter::try_new(&level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let writer = match &logging.file {
        Some(path) => {
            let file = match std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
            {
                Ok(f) => f,
                Err(e) => {
                    eprintln!("ERROR: Unable to open log file '{}': {e}", path.display());
                    return;
                }
            };
            tracing_appender::non_blocking(file)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };
    let (non_blocking, guard) = writer;
    let _ = TRACE_GUARD.set(guard);

    let base = || {
        tracing_subscriber::fmt()
            .with_env_filter(filter.clone())
            .with_ansi(false)
            .with_thread_names(true)
            .with_writer(non_blocking.clone())
    };

    let subscriber: Box<dyn tracing::Subscriber + Send + Sync> = if logging.format == "json" {
        Box::new(base().json().finish())
    } else {
        Box::new(base().compact().finish())
    };

    let _ = tracing::subscriber::set_global_default(subscriber);
}

struct Shell {
    session: Arc<Session>,
    config: Config,
    json: bool,
}

impl Shell {
    async fn repl(&mut self) -> Result<()> {
        println!("QuackDB v{}", env!("CARGO_PKG_VERSION"));
        println!("Type .help for commands; end SQL with ';'.");
        println!();

        let mut editor = DefaultEditor::new()?;
        let mut buffer = String::new();

        loop {
            let prompt = if buffer.is_empty() { "quackdb> " } else { "   ...> " };
            match editor.readline(prompt) {
                Ok(line) => {
                    let trimmed = line.trim();
                    if buffer.is_empty() && trimmed.starts_with('.') {
                        let _ = editor.add_history_entry(trimmed);
                        match self.meta_command(trimmed).await {
                            Ok(true) => continue,
                            Ok(false) => break,
                            Err(e) => {
                                eprintln!("Error: {e:#}");
                                continue;
                            }
                        }
                    }

                    buffer.push_str(&line);
                    buffer.push('\n');
                    if trimmed.ends_with(';') {
                        let sql = std::mem::take(&mut buffer);
                        let _ = editor.add_history_entry(sql.trim());
                        if let Err(e) = self.run_sql(&sql).await {
                            eprintln!("Error: {e:#}");
                        }
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    buffer.clear();
                    println!("Use .quit or Ctrl-D to exit");
                }
                Err(ReadlineError::Eof) => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Run SQL; Ctrl-C cancels it
    async fn run_sql(&self, sql: &str) -> Result<()> {
        let mut task = {
            let session = Arc::clone(&self.session);
            let sql = sql.to_string();
            tokio::spawn(async move { session.run_query(&sql, RunOptions::default()).await })
        };

        let outcome = tokio::select! {
            joined = &mut task => joined?,
            _ = tokio::signal::ctrl_c() => {
                self.session.cancel_query("interrupted");
                task.await?
            }
        }?;

        self.print_outcome(&outcome)
    }

    fn print_outcome(&self, outcome: &QueryOutcome) -> Result<()> {
        let meta = &outcome.meta;
        match (&outcome.result, meta.status) {
            (Some(result), QueryStatus::Success) => {
                if self.json {
                    println!("{}", serde_json::to_string_pretty(&result.to_json_rows())?);
                } else {
                    print!("{}", format_table(result));
                }
                let source = if meta.cache_hit { "cache" } else { "engine" };
                println!(
                    "{} row(s) in {:.1}ms ({source})",
                    result.count, meta.execution_time_ms
                );
            }
            _ => {
                let error = meta.error.as_deref().unwrap_or("unknown error");
                println!("{:?}: {error}", meta.status);
            }
        }
        Ok(())
    }

    /// Handle a dot-command; `Ok(false)` means exit
    async fn meta_command(&mut self, line: &str) -> Result<bool> {
        let mut parts = line.splitn(3, char::is_whitespace);
        let cmd = parts.next().unwrap_or_default();
        let arg1 = parts.next().map(str::trim).filter(|s| !s.is_empty());
        let rest = parts.next().map(str::trim).filter(|s| !s.is_empty());

        match (cmd, arg1, rest) {
            (".quit" | ".exit" | ".q", _, _) => return Ok(false),
            (".help" | ".h", _, _) => print_help(),
            (".cache", Some("on"), _) => {
                self.session.toggle_cache(true);
                println!("Result cache enabled");
            }
            (".cache", Some("off"), _) => {
                self.session.toggle_cache(false);
                println!("Result cache disabled");
            }
            (".cache", _, _) => {
                let state = if self.session.config().should_cache { "on" } else { "off" };
                println!("Result cache is {state}");
            }
            (".clear", _, _) => {
                self.session.reset().await;
                println!("Result cache cleared");
            }
            (".stats", _, _) => {
                let stats = self.session.cache_stats();
                println!(
                    "hits={} misses={} stores={} store_failures={} lookup_failures={} hit_rate={:.1}%",
                    stats.hits,
                    stats.misses,
                    stats.stores,
                    stats.store_failures,
                    stats.lookup_failures,
                    stats.hit_rate() * 100.0
                );
            }
            (".register", Some(name), Some(path)) => {
                self.session
                    .register_file_handle(name, FileHandle::Path(PathBuf::from(path)))
                    .await?;
                println!("Registered '{name}'");
            }
            (".files", _, _) => {
                let files = self.session.registered_files();
                if files.is_empty() {
                    println!("No registered files");
                }
                for name in files {
                    println!("  {name}");
                }
            }
            (".export", Some(name), Some(sql)) => {
                let bytes = self.session.export_parquet(sql, name).await?;
                std::fs::write(name, &bytes)
                    .with_context(|| format!("failed to write {name}"))?;
                println!("Wrote {} bytes to {name}", bytes.len());
            }
            (".config", _, _) => {
                print!("{}", toml::to_string_pretty(&self.config)?);
            }
            (".hash", Some(_), _) => {
                let sql = line.trim_start_matches(".hash").trim();
                println!("{}", self.session.coordinator().cache_key(sql));
            }
            _ => println!("Unknown or incomplete command: {line} (try .help)"),
        }
        Ok(true)
    }
}

fn print_help() {
    println!("Commands:");
    println!("  .cache on|off            Enable or disable the result cache");
    println!("  .clear                   Drop every cached result");
    println!("  .stats                   Cache hit/miss counters");
    println!("  .register <name> <path>  Expose a file to SQL as '<name>'");
    println!("  .files                   List registered files");
    println!("  .export <name> <sql>     Write a query result to <name> as Parquet");
    println!("  .hash <sql>              Show the cache key for SQL");
    println!("  .config                  Show the effective configuration");
    println!("  .help                    Show this help");
    println!("  .quit                    Exit");
}

fn format_table(result: &QueryResult) -> String {
    let headers: Vec<String> = result.schema.iter().map(|c| c.name.clone()).collect();
    let cells: Vec<Vec<String>> = result
        .rows
        .iter()
        .map(|row| row.values().map(ToString::to_string).collect())
        .collect();

    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in &cells {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let line = |values: &[String]| {
        let padded: Vec<String> = values
            .iter()
            .zip(&widths)
            .map(|(v, w)| format!("{v:<width$}", width = *w))
            .collect();
        format!("| {} |\n", padded.join(" | "))
    };
    let rule = format!(
        "+{}+\n",
        widths
            .iter()
            .map(|w| "-".repeat(w + 2))
            .collect::<Vec<_>>()
            .join("+")
    );

    let mut out = String::new();
    out.push_str(&rule);
    out.push_str(&line(&headers));
    out.push_str(&rule);
    for row in &cells {
        out.push_str(&line(row));
    }
    out.push_str(&rule);
    out
}
