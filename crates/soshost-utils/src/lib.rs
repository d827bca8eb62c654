//! # soshost Utilities
//!
//! Logging bootstrap shared by the soshost binaries, built on `tracing`.

pub mod logging;

pub use logging::{init_logging, init_logging_with, LogFormat, LogLevel, LogOptions, LoggingError, LoggingGuard};
pub use tracing::{debug, error, info, trace, warn};
