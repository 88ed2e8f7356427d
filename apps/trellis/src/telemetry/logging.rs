use std::fs::OpenOptions;
use std::path::PathBuf;

use clap::ValueEnum;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Overrides the directives derived from the level when set.
pub const FILTER_ENV: &str = "TRELLIS_LOG_FILTER";

#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct LogConfig {
    pub level: LogLevel,
    /// Append to this file instead of writing to stderr.
    pub file: Option<PathBuf>,
}

#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error("failed to open log file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("a global subscriber is already installed")]
    AlreadyInstalled,
}

/// Keeps the background log writer alive; logs still buffered are flushed
/// when it drops.
#[must_use = "dropping the guard stops the log writer"]
pub struct LogGuard {
    _writer: WorkerGuard,
}

/// Installs the global subscriber.
pub fn init(config: &LogConfig) -> Result<LogGuard, InitError> {
    let (writer, guard) = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| InitError::Io {
                    path: path.clone(),
                    source,
                })?;
            tracing_appender::non_blocking(file)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    let filter = match std::env::var(FILTER_ENV) {
        Ok(directives) => EnvFilter::new(directives),
        Err(_) => EnvFilter::new(directives(config.level, super::enabled())),
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.level >= LogLevel::Debug)
        .with_thread_names(config.level >= LogLevel::Trace)
        .with_ansi(config.file.is_none())
        .with_writer(writer)
        .finish();
    tracing::subscriber::set_global_default(subscriber).map_err(|_| InitError::AlreadyInstalled)?;

    Ok(LogGuard { _writer: guard })
}

/// Verbose levels only open up this crate; perf totals stay visible whenever
/// counters are on.
fn directives(level: LogLevel, perf: bool) -> String {
    let mut directives = match LevelFilter::from(level) {
        LevelFilter::TRACE => "info,trellis=trace".to_owned(),
        LevelFilter::DEBUG => "info,trellis=debug".to_owned(),
        other => other.to_string().to_lowercase(),
    };
    if perf && level < LogLevel::Info {
        directives.push_str(",trellis::perf=info");
    }
    directives
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn verbose_levels_only_open_up_this_crate() {
        assert_eq!(directives(LogLevel::Debug, false), "info,trellis=debug");
        assert_eq!(directives(LogLevel::Warn, false), "warn");
        assert_eq!(directives(LogLevel::Error, true), "error,trellis::perf=info");
        assert_eq!(directives(LogLevel::Trace, true), "info,trellis=trace");
    }
}
