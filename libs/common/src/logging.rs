//! Logging configuration for dbkit
//!
//! Two layers live here:
//! - process-wide subscriber setup ([`init_logging`]), done once by binaries
//! - [`InstanceLogger`], the per-connection logger whose verbosity is decided
//!   when the connection is built and never leaks into other instances

use errors::{DbkitError, DbkitResult};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::level_filters::LevelFilter;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self as tracing_fmt, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level or filter directive (trace, debug, info, warn, error, `dbkit_redis=debug`)
    pub level: String,
    /// Enable console output
    pub console: bool,
    /// Enable file output
    pub file: Option<String>,
    /// Log format (json, pretty, compact)
    pub format: LogFormat,
    /// Enable ANSI colors in console output
    pub ansi: bool,
    /// Include span events
    pub span_events: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console: true,
            file: None,
            format: LogFormat::Compact,
            ansi: true,
            span_events: false,
        }
    }
}

fn env_filter(level: &str) -> DbkitResult<EnvFilter> {
    EnvFilter::try_new(level)
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| DbkitError::Configuration(format!("Invalid log level: {}", e)))
}

fn span_events(enabled: bool) -> FmtSpan {
    if enabled {
        FmtSpan::FULL
    } else {
        FmtSpan::NONE
    }
}

/// Initialize logging with the given configuration
///
/// Returns a guard that must be kept alive for file logging to work
pub fn init_logging(config: &LogConfig) -> DbkitResult<Option<WorkerGuard>> {
    let mut layers = Vec::new();
    let mut guard = None;

    // Console layer
    if config.console {
        let console_layer = match config.format {
            LogFormat::Json => tracing_fmt::layer()
                .json()
                .with_ansi(config.ansi)
                .with_target(true)
                .with_thread_names(true)
                .with_span_events(span_events(config.span_events))
                .boxed(),
            LogFormat::Pretty => tracing_fmt::layer()
                .pretty()
                .with_ansi(config.ansi)
                .with_target(true)
                .with_thread_names(true)
                .with_span_events(span_events(config.span_events))
                .boxed(),
            LogFormat::Compact => tracing_fmt::layer()
                .compact()
                .with_ansi(config.ansi)
                .with_target(true)
                .with_span_events(span_events(config.span_events))
                .boxed(),
        };

        layers.push(console_layer.with_filter(env_filter(&config.level)?).boxed());
    }

    // File layer
    if let Some(file_path) = &config.file {
        let path = Path::new(file_path);
        let directory = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(directory)?;

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("dbkit.log");
        let file_appender = tracing_appender::rolling::daily(directory, file_name);
        let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);
        guard = Some(file_guard);

        let file_layer = match config.format {
            LogFormat::Json => tracing_fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true)
                .with_thread_names(true)
                .with_span_events(span_events(config.span_events))
                .boxed(),
            LogFormat::Pretty | LogFormat::Compact => tracing_fmt::layer()
                .compact()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true)
                .with_span_events(span_events(config.span_events))
                .boxed(),
        };

        layers.push(file_layer.with_filter(env_filter(&config.level)?).boxed());
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|e| DbkitError::Configuration(format!("Failed to initialize logging: {}", e)))?;

    Ok(guard)
}

/// A builder for constructing log configuration
pub struct LogConfigBuilder {
    config: LogConfig,
}

impl Default for LogConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LogConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: LogConfig::default(),
        }
    }

    pub fn level(mut self, level: impl Into<String>) -> Self {
        self.config.level = level.into();
        self
    }

    pub fn console(mut self, enable: bool) -> Self {
        self.config.console = enable;
        self
    }

    pub fn file(mut self, path: impl Into<String>) -> Self {
        self.config.file = Some(path.into());
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.config.format = format;
        self
    }

    pub fn ansi(mut self, enable: bool) -> Self {
        self.config.ansi = enable;
        self
    }

    pub fn span_events(mut self, enable: bool) -> Self {
        self.config.span_events = enable;
        self
    }

    pub fn build(self) -> LogConfig {
        self.config
    }
}

// ============================================================================
// Per-instance logger
// ============================================================================

/// Logger owned by a single database instance.
///
/// Every event carries an `instance` field with the logger's name. Events
/// above `max_level` are dropped here, before they reach the global
/// subscriber, so turning one connection quiet leaves every other
/// connection's output untouched.
#[derive(Debug, Clone)]
pub struct InstanceLogger {
    name: Arc<str>,
    max_level: LevelFilter,
}

impl InstanceLogger {
    pub fn new(name: impl Into<Arc<str>>, max_level: LevelFilter) -> Self {
        Self {
            name: name.into(),
            max_level,
        }
    }

    /// Logger that forwards everything; the global filter still applies
    pub fn verbose(name: impl Into<Arc<str>>) -> Self {
        Self::new(name, LevelFilter::TRACE)
    }

    /// Logger that emits nothing
    pub fn disabled(name: impl Into<Arc<str>>) -> Self {
        Self::new(name, LevelFilter::OFF)
    }

    /// Build from an on/off switch as found in connection configuration
    pub fn from_flag(name: impl Into<Arc<str>>, enabled: bool) -> Self {
        if enabled {
            Self::verbose(name)
        } else {
            Self::disabled(name)
        }
    }

    #[must_use]
    pub fn with_max_level(mut self, max_level: LevelFilter) -> Self {
        self.max_level = max_level;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_level(&self) -> LevelFilter {
        self.max_level
    }

    pub fn enabled(&self, level: Level) -> bool {
        level <= self.max_level
    }

    pub fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        if !self.enabled(level) {
            return;
        }
        let instance = &*self.name;
        match level {
            Level::ERROR => tracing::error!(instance, "{}", args),
            Level::WARN => tracing::warn!(instance, "{}", args),
            Level::INFO => tracing::info!(instance, "{}", args),
            Level::DEBUG => tracing::debug!(instance, "{}", args),
            Level::TRACE => tracing::trace!(instance, "{}", args),
        }
    }

    pub fn error(&self, args: fmt::Arguments<'_>) {
        self.log(Level::ERROR, args);
    }

    pub fn warn(&self, args: fmt::Arguments<'_>) {
        self.log(Level::WARN, args);
    }

    pub fn info(&self, args: fmt::Arguments<'_>) {
        self.log(Level::INFO, args);
    }

    pub fn debug(&self, args: fmt::Arguments<'_>) {
        self.log(Level::DEBUG, args);
    }

    pub fn trace(&self, args: fmt::Arguments<'_>) {
        self.log(Level::TRACE, args);
    }
}
