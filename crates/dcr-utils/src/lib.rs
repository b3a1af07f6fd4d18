//! # dcr utilities
//!
//! Logging setup shared across the dcr workspace.

pub mod logging;

pub use logging::{
    init_logging, init_logging_with, init_logging_with_level, LogFormat, LogLevel, LogSettings, LoggingError,
    LoggingGuard,
};
pub use tracing::{debug, error, info, trace, warn};
