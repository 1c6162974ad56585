//! Process-wide logging setup for the `infratest` binary.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use crate::config::EnvParser;
use crate::error::{HarnessError, HarnessResult};

/// Console output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// `EnvFilter` directive, e.g. `info` or `infratest_common=debug`.
    pub level: String,
    pub format: LogFormat,
    /// Optional JSONL file sink.
    pub file: Option<PathBuf>,
    pub stderr: bool,
}

impl LogConfig {
    /// Read `INFRATEST_LOG_LEVEL`, `INFRATEST_LOG_FORMAT` and
    /// `INFRATEST_LOG_FILE`. Malformed values fall back to defaults.
    pub fn from_env(default_level: &str) -> Self {
        let mut parser = EnvParser::new();
        let level = parser.get_log_level("LOG_LEVEL", default_level);
        let format =
            LogFormat::parse(&parser.get_string("LOG_FORMAT", "pretty")).unwrap_or(LogFormat::Pretty);
        let file = parser.get_optional_string("LOG_FILE").map(PathBuf::from);

        Self {
            level,
            format,
            file,
            stderr: false,
        }
    }

    #[must_use]
    pub fn with_stderr(mut self) -> Self {
        self.stderr = true;
        self
    }

    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }
}

/// Keeps non-blocking writers flushing. Hold until exit.
#[must_use = "dropping the guards stops file logging"]
pub struct LoggingGuards {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber described by `config`.
pub fn init_logging(config: &LogConfig) -> HarnessResult<LoggingGuards> {
    let filter = EnvFilter::try_new(&config.level)
        .map_err(|e| HarnessError::Config(format!("invalid log level '{}': {e}", config.level)))?;

    let (file_layer, file_guard) = match &config.file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));
            let Some(name) = path.file_name() else {
                return Err(HarnessError::Config(format!(
                    "log file path has no file name: {}",
                    path.display()
                )));
            };
            std::fs::create_dir_all(&dir)?;

            let appender = tracing_appender::rolling::never(&dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .with_thread_ids(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let pretty_layer = (config.stderr && config.format == LogFormat::Pretty)
        .then(|| fmt::layer().with_writer(std::io::stderr).with_target(false));
    let json_layer = (config.stderr && config.format == LogFormat::Json)
        .then(|| fmt::layer().json().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(pretty_layer)
        .with(json_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| HarnessError::Config(format!("logging already initialized: {e}")))?;

    Ok(LoggingGuards { _file: file_guard })
}
