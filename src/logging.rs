//! Logging bootstrap for the `tasker` binary.
//!
//! Logs go to a size-rotated file under `<config dir>/logs`; warnings and
//! errors are also copied to stderr.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use flexi_logger::{
    Cleanup, Criterion, Duplicate, FileSpec, FlexiLoggerError, Logger, LoggerHandle, Naming,
    WriteMode,
};

pub const LOG_DIR_NAME: &str = "logs";

const LOG_FILE_BASENAME: &str = "tasker";
const MAX_LOG_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
const MAX_LOG_FILES: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("unsupported log level '{0}'; expected one of trace, debug, info, warn, error, off")]
    Level(String),
    #[error("could not create log directory {}: {source}", path.display())]
    Dir { path: PathBuf, source: io::Error },
    #[error("could not start logger: {0}")]
    Start(#[from] FlexiLoggerError),
}

/// Level used when neither `--log-level` nor `RUST_LOG` is given.
pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) { "debug" } else { "info" }
}

/// Canonical spelling of a user-supplied level.
pub fn normalize_level(level: &str) -> Result<&'static str, LoggingError> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok("trace"),
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warn" | "warning" => Ok("warn"),
        "error" => Ok("error"),
        "off" | "none" => Ok("off"),
        _ => Err(LoggingError::Level(level.to_string())),
    }
}

pub fn log_dir(config_dir: &Path) -> PathBuf {
    config_dir.join(LOG_DIR_NAME)
}

/// Start the global logger. The returned handle must stay alive for the
/// rest of the process; dropping it flushes buffered records.
///
/// An explicit `level` wins over `RUST_LOG`, which wins over the default.
pub fn init_logging(config_dir: &Path, level: Option<&str>) -> Result<LoggerHandle, LoggingError> {
    let dir = log_dir(config_dir);
    fs::create_dir_all(&dir).map_err(|source| LoggingError::Dir {
        path: dir.clone(),
        source,
    })?;

    let logger = match level {
        Some(level) => Logger::try_with_str(normalize_level(level)?)?,
        None => Logger::try_with_env_or_str(default_log_level())?,
    };

    let handle = logger
        .log_to_file(
            FileSpec::default()
                .directory(&dir)
                .basename(LOG_FILE_BASENAME),
        )
        .rotate(
            Criterion::Size(MAX_LOG_FILE_SIZE_BYTES),
            Naming::Numbers,
            Cleanup::KeepLogFiles(MAX_LOG_FILES),
        )
        .duplicate_to_stderr(Duplicate::Warn)
        .format_for_files(flexi_logger::detailed_format)
        .format_for_stderr(flexi_logger::default_format)
        .write_mode(WriteMode::BufferAndFlush)
        .append()
        .start()?;

    log::debug!(
        "tasker {} logging to {}",
        env!("CARGO_PKG_VERSION"),
        dir.display()
    );
    Ok(handle)
}
