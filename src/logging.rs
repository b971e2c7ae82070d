use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

use crate::{
    error::{Error, Result},
    fs::FileTool,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    Console,
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Never,
    Hourly,
    Daily,
}

impl From<LogRotation> for Rotation {
    fn from(r: LogRotation) -> Self {
        match r {
            LogRotation::Never => Rotation::NEVER,
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Daily => Rotation::DAILY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub target: LogTarget,
    // Directory for log files; unused for console output.
    pub log_path: PathBuf,
    pub file_prefix: String,
    // Minimum level, one of trace/debug/info/warn/error. `RUST_LOG`
    // directives are applied on top.
    pub level: String,
    pub rotation: LogRotation,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            target: LogTarget::Console,
            log_path: PathBuf::from("logs"),
            file_prefix: "lsm-engine.log".to_owned(),
            level: "info".to_owned(),
            rotation: LogRotation::Never,
        }
    }
}

// Keeps the background writer alive. Lines still queued are flushed when
// this is dropped.
#[must_use]
pub struct LogGuard {
    _guard: WorkerGuard,
}

impl LogGuard {
    pub fn shutdown(self) {
        drop(self)
    }
}

// Installs the process-wide subscriber. Only the first call in a process can
// succeed.
pub fn init(config: &LogConfig) -> Result<LogGuard> {
    let level: tracing::Level = config
        .level
        .parse()
        .map_err(|_| Error::Logger(format!("unknown log level {:?}", config.level)))?;

    let (writer, guard, ansi) = match config.target {
        LogTarget::Console => {
            let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
            (writer, guard, true)
        }
        LogTarget::File => {
            FileTool::create_dir(&config.log_path)?;
            let appender = RollingFileAppender::builder()
                .rotation(config.rotation.into())
                .filename_prefix(config.file_prefix.as_str())
                .build(&config.log_path)
                .map_err(|e| Error::Logger(e.to_string()))?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (writer, guard, false)
        }
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer).with_ansi(ansi))
        .with(EnvFilter::from_default_env().add_directive(LevelFilter::from_level(level).into()))
        .try_init()
        .map_err(|e| Error::Logger(e.to_string()))?;

    Ok(LogGuard { _guard: guard })
}
