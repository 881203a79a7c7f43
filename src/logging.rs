//! Structured logging initialization.
//!
//! One init routine for the CLI, configured from `FLEETDIAG_LOG_*`
//! environment variables with `RUST_LOG` taking precedence for filtering.

use anyhow::Result;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::Subscriber;
use tracing_subscriber::{fmt, util::SubscriberInitExt, EnvFilter};

/// Logging output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Compact single-line logs (default).
    Compact,
    /// JSON-formatted logs for machine parsing.
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "compact" => Some(Self::Compact),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Configuration for logging initialization.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Base log level (trace, debug, info, warn, error, off).
    pub level: String,
    pub format: LogFormat,
    /// Optional file path for daily-rotated logs.
    pub file_path: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            file_path: None,
        }
    }
}

impl LogConfig {
    /// Build a logging configuration from `FLEETDIAG_LOG_LEVEL`,
    /// `FLEETDIAG_LOG_FORMAT` and `FLEETDIAG_LOG_FILE`.
    pub fn from_env(default_level: &str) -> Self {
        let mut config = Self {
            level: std::env::var("FLEETDIAG_LOG_LEVEL")
                .unwrap_or_else(|_| default_level.to_string()),
            ..Self::default()
        };

        if let Ok(format) = std::env::var("FLEETDIAG_LOG_FORMAT") {
            if let Some(parsed) = LogFormat::parse(&format) {
                config.format = parsed;
            }
        }

        if let Ok(path) = std::env::var("FLEETDIAG_LOG_FILE") {
            if !path.trim().is_empty() {
                config.file_path = Some(PathBuf::from(path));
            }
        }

        config
    }

    fn env_filter(&self) -> EnvFilter {
        if std::env::var_os("RUST_LOG").is_some() {
            if let Ok(filter) = EnvFilter::try_from_default_env() {
                return filter;
            }
        }
        EnvFilter::new(self.level.clone())
    }
}

/// Guard keeping the background file-logging worker alive.
pub struct LoggingGuards {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Initialize tracing for the current process. The returned guards must be
/// kept alive for the duration of the program when file logging is enabled.
pub fn init_logging(config: &LogConfig) -> Result<LoggingGuards> {
    let filter = config.env_filter();

    let file_guard = if let Some(path) = config.file_path.as_ref() {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let file_name = path
            .file_name()
            .unwrap_or_else(|| OsStr::new("fleetdiag.log"));
        let appender = tracing_appender::rolling::daily(dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        let subscriber = fmt::Subscriber::builder()
            .with_writer(non_blocking)
            .with_env_filter(filter)
            .with_ansi(false)
            .with_target(true)
            .compact()
            .finish();
        finish_subscriber(subscriber)?;
        Some(guard)
    } else {
        match config.format {
            LogFormat::Compact => {
                let subscriber = fmt::Subscriber::builder()
                    .with_writer(std::io::stderr)
                    .with_env_filter(filter)
                    .with_target(true)
                    .compact()
                    .finish();
                finish_subscriber(subscriber)?;
            }
            LogFormat::Json => {
                let subscriber = fmt::Subscriber::builder()
                    .with_writer(std::io::stderr)
                    .with_env_filter(filter)
                    .with_ansi(false)
                    .with_target(true)
                    .json()
                    .finish();
                finish_subscriber(subscriber)?;
            }
        }
        None
    };

    Ok(LoggingGuards {
        _file_guard: file_guard,
    })
}

fn finish_subscriber<S>(subscriber: S) -> Result<()>
where
    S: Subscriber + Send + Sync + 'static,
{
    if let Err(err) = subscriber.try_init() {
        // Tests and repeated CLI invocations may already have a subscriber.
        if err.to_string().contains("already initialized") {
            return Ok(());
        }
        return Err(err.into());
    }
    Ok(())
}
