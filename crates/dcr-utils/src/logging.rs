//! # Logging
//!
//! `tracing` setup shared by the dcr binaries and tests.
//!
//! Output goes to stderr so that stdout stays free for command results. An
//! optional file sink receives the same events without ANSI colouring.
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: filter directives (`debug`, `dcr_core=trace,warn`, ...)
//! - `DCR_LOG_FORMAT`: `pretty` (default) or `json`
//! - `DCR_LOG_FILE`: log file path; the file name gets a `YYYY-MM-DD-` prefix
//!
//! ## Example
//!
//! ```rust,no_run
//! use dcr_utils::{init_logging_with_level, LogFormat, LogLevel};
//!
//! let _guard = init_logging_with_level(LogLevel::Debug, LogFormat::Pretty).unwrap();
//! tracing::debug!("descriptor reader starting");
//! ```

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{env, io};

use chrono::{NaiveDate, Utc};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::{self};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Variable selecting the output format
pub const FORMAT_VAR: &str = "DCR_LOG_FORMAT";

/// Variable naming the log file
pub const FILE_VAR: &str = "DCR_LOG_FILE";

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat
{
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

impl FromStr for LogFormat
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(LoggingError::InvalidFormat(s.to_string())),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel
{
    /// Errors only
    Error,
    /// Warnings and errors
    Warn,
    /// Informational (default)
    #[default]
    Info,
    /// Debug
    Debug,
    /// Everything
    Trace,
}

impl From<LogLevel> for Level
{
    fn from(level: LogLevel) -> Self
    {
        match level {
            LogLevel::Error => Self::ERROR,
            LogLevel::Warn => Self::WARN,
            LogLevel::Info => Self::INFO,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Trace => Self::TRACE,
        }
    }
}

impl FromStr for LogLevel
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            _ => Err(LoggingError::InvalidLevel(s.to_string())),
        }
    }
}

/// Resolved logging settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings
{
    /// Filter directives handed to [`EnvFilter`]
    pub directives: String,
    /// Output format
    pub format: LogFormat,
    /// Optional file sink
    pub file: Option<PathBuf>,
}

impl LogSettings
{
    /// Settings for an explicit level and format, with the file taken from
    /// `DCR_LOG_FILE`.
    #[must_use]
    pub fn new(level: LogLevel, format: LogFormat) -> Self
    {
        Self {
            directives: Level::from(level).to_string(),
            format,
            file: env::var_os(FILE_VAR).map(PathBuf::from),
        }
    }

    /// Settings built from a variable lookup.
    ///
    /// `RUST_LOG` is used verbatim when present. An unparsable format falls
    /// back to pretty with a note on stderr, since no subscriber exists yet.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self
    {
        let format = match lookup(FORMAT_VAR).map(|raw| raw.parse::<LogFormat>()) {
            Some(Ok(format)) => format,
            Some(Err(err)) => {
                eprintln!("{err}, using pretty output");
                LogFormat::Pretty
            }
            None => LogFormat::Pretty,
        };

        Self {
            directives: lookup("RUST_LOG").unwrap_or_else(|| Level::INFO.to_string()),
            format,
            file: lookup(FILE_VAR).filter(|path| !path.is_empty()).map(PathBuf::from),
        }
    }

    /// Settings read from the process environment
    #[must_use]
    pub fn from_env() -> Self
    {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn filter(&self) -> Result<EnvFilter, LoggingError>
    {
        EnvFilter::try_new(&self.directives).map_err(|err| LoggingError::InvalidFilter(err.to_string()))
    }
}

/// Keeps the background file writer alive.
///
/// Dropping it flushes and stops the file sink; console output is unaffected.
#[derive(Debug, Default)]
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard
{
    _file: Option<WorkerGuard>,
}

/// Initialize logging from the environment.
///
/// ## Errors
///
/// - [`LoggingError::InvalidFilter`] if `RUST_LOG` cannot be parsed
/// - [`LoggingError::FileError`] if `DCR_LOG_FILE` names an unusable path
/// - [`LoggingError::InitializationFailed`] if a global subscriber is
///   already installed
pub fn init_logging() -> Result<LoggingGuard, LoggingError>
{
    init_logging_with(&LogSettings::from_env())
}

/// Initialize logging with an explicit level and format.
///
/// `DCR_LOG_FILE` is still honoured.
///
/// ## Errors
///
/// As for [`init_logging`].
pub fn init_logging_with_level(level: LogLevel, format: LogFormat) -> Result<LoggingGuard, LoggingError>
{
    init_logging_with(&LogSettings::new(level, format))
}

/// Initialize logging from resolved settings.
///
/// ## Errors
///
/// As for [`init_logging`].
pub fn init_logging_with(settings: &LogSettings) -> Result<LoggingGuard, LoggingError>
{
    let (file_layer, guard) = match &settings.file {
        Some(path) => {
            let (writer, guard) = tracing_appender::non_blocking(file_appender(path)?);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_timer(ChronoUtc::rfc_3339());
            let layer = match settings.format {
                LogFormat::Pretty => layer.with_filter(settings.filter()?).boxed(),
                LogFormat::Json => layer
                    .json()
                    .with_current_span(true)
                    .with_filter(settings.filter()?)
                    .boxed(),
            };
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let console = fmt::layer()
        .with_writer(io::stderr)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(ChronoUtc::rfc_3339());
    let console = match settings.format {
        LogFormat::Pretty => console.with_filter(settings.filter()?).boxed(),
        LogFormat::Json => console
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_filter(settings.filter()?)
            .boxed(),
    };

    Registry::default()
        .with(console)
        .with(file_layer)
        .try_init()
        .map_err(|err| LoggingError::InitializationFailed(err.to_string()))?;

    Ok(LoggingGuard { _file: guard })
}

fn file_appender(path: &Path) -> Result<tracing_appender::rolling::RollingFileAppender, LoggingError>
{
    let name = path
        .file_name()
        .ok_or_else(|| LoggingError::FileError(io::Error::new(io::ErrorKind::InvalidInput, "log path has no file name")))?;
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    Ok(tracing_appender::rolling::never(dir, dated_file_name(name, Utc::now().date_naive())))
}

fn dated_file_name(name: &OsStr, day: NaiveDate) -> String
{
    format!("{}-{}", day.format("%Y-%m-%d"), name.to_string_lossy())
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError
{
    /// Unknown format name
    #[error("Invalid log format: {0} (use 'pretty' or 'json')")]
    InvalidFormat(String),

    /// Unknown level name
    #[error("Invalid log level: {0} (use 'error', 'warn', 'info', 'debug' or 'trace')")]
    InvalidLevel(String),

    /// Filter directives did not parse
    #[error("Invalid log filter: {0}")]
    InvalidFilter(String),

    /// A subscriber was already installed
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    /// The log file could not be opened
    #[error("File logging error: {0}")]
    FileError(#[from] io::Error),
}
