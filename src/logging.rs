//! Structured logging utilities
//!
//! All cache operations log with structured fields so runs can be analyzed
//! after the fact:
//!
//! - `store`: the cache store involved ("local", "remote")
//! - `script`: the script name being cached
//! - `operation`: what was attempted ("save", "load", "restore", "cleanup")
//! - `status`: how it went ("hit", "miss", "error")

use std::{fmt as std_fmt, io};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{
    fmt::{self, format::Writer},
    prelude::*,
    EnvFilter,
};

/// Custom formatter that shows "scriptcache" instead of full module path
struct ScriptcacheFormatter {
    with_ansi: bool,
}

impl<S, N> FormatEvent<S, N> for ScriptcacheFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std_fmt::Result {
        let meta = event.metadata();

        write!(
            writer,
            "{} ",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.6fZ")
        )?;

        if self.with_ansi {
            let level_style = match *meta.level() {
                tracing::Level::ERROR => "\x1b[31m", // Red
                tracing::Level::WARN => "\x1b[33m",  // Yellow
                tracing::Level::INFO => "\x1b[32m",  // Green
                tracing::Level::DEBUG => "\x1b[34m", // Blue
                tracing::Level::TRACE => "\x1b[35m", // Magenta
            };
            write!(
                writer,
                "{}{:5}(scriptcache)\x1b[0m: ",
                level_style,
                meta.level()
            )?;
        } else {
            write!(writer, "{:5}(scriptcache): ", meta.level())?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format (default for development)
    Pretty,
    /// Compact format (for CI/production)
    Compact,
    /// JSON format (for log aggregation systems)
    Json,
}

impl LogFormat {
    /// Parse from environment variable (SCRIPTCACHE_LOG_FORMAT)
    pub fn from_env() -> Self {
        match std::env::var("SCRIPTCACHE_LOG_FORMAT")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "json" => Self::Json,
            "compact" => Self::Compact,
            "pretty" => Self::Pretty,
            _ => {
                // Default: pretty for dev, compact for CI
                if std::env::var("CI").is_ok() {
                    Self::Compact
                } else {
                    Self::Pretty
                }
            }
        }
    }
}

/// Initialize the global tracing subscriber
///
/// # Environment Variables
///
/// - `RUST_LOG`: Set log level (e.g., "debug", "info", "warn")
/// - `SCRIPTCACHE_LOG_FORMAT`: Set format ("pretty", "compact", "json")
/// - `CI`: If set, defaults to compact format
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();

    let format = LogFormat::from_env();

    match format {
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .event_format(ScriptcacheFormatter { with_ansi: true })
                        .with_writer(io::stderr),
                )
                .init();
        }
        LogFormat::Compact => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .event_format(ScriptcacheFormatter { with_ansi: false })
                        .with_writer(io::stderr),
                )
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_target(false)
                        .with_file(false)
                        .with_line_number(false)
                        .with_ansi(false)
                        .with_writer(io::stderr)
                        .json(),
                )
                .init();
        }
    }
}

/// Standard field names for consistent logging
#[allow(dead_code)]
pub mod fields {
    /// Cache store name ("local", "remote")
    pub const STORE: &str = "store";
    /// Script name being cached
    pub const SCRIPT: &str = "script";
    /// Operation name (e.g., "save", "load", "restore", "cleanup")
    pub const OPERATION: &str = "operation";
    /// Status (e.g., "hit", "miss", "error")
    pub const STATUS: &str = "status";
    /// Cache entry file name (key hash)
    pub const FILE: &str = "file";
    /// Number of entries (for cleanup runs)
    pub const ENTRY_COUNT: &str = "entry_count";
}

/// Operation names for consistent logging
#[allow(dead_code)]
pub mod operations {
    pub const SAVE: &str = "save";
    pub const LOAD: &str = "load";
    pub const RESTORE: &str = "restore";
    pub const CLEANUP: &str = "cleanup";
}

/// Status values for consistent logging
#[allow(dead_code)]
pub mod status {
    pub const HIT: &str = "hit";
    pub const MISS: &str = "miss";
    pub const ERROR: &str = "error";
}
