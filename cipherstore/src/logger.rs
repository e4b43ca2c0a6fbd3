//! Injected logging sink.
//!
//! A [`Logger`] implementation can be handed to an [`OpenHelper`] or a
//! [`Database`] at construction time. Every handle opened from it reports
//! through the same [`LogSink`]. When no logger is injected, messages go to
//! the `log` crate facade under the `cipherstore` target, so any
//! `log`-compatible backend picks them up.
//!
//! [`OpenHelper`]: crate::OpenHelper
//! [`Database`]: crate::Database

use std::fmt;
use std::sync::Arc;

/// Trait representing a logger that can receive messages at various levels.
///
/// # Examples
///
/// ```rust
/// use cipherstore::logger::{LogLevel, Logger};
///
/// struct MyLogger;
///
/// impl Logger for MyLogger {
///     fn log(&self, level: LogLevel, message: String) {
///         eprintln!("[{level:?}] {message}");
///     }
/// }
/// ```
pub trait Logger: Sync + Send {
    /// Logs a message at the specified log level.
    ///
    /// # Arguments
    ///
    /// * `level` - The severity level of the log message.
    /// * `message` - The log message to be recorded.
    fn log(&self, level: LogLevel, message: String);
}

/// Enumeration of possible log levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Designates very low priority, often extremely detailed messages.
    Trace,
    /// Designates lower priority debugging information.
    Debug,
    /// Designates informational messages that highlight the progress of the application.
    Info,
    /// Designates potentially harmful situations.
    Warn,
    /// Designates error events that might still allow the application to continue running.
    Error,
}

/// Converts a `LogLevel` to a `log::Level`.
const fn log_level(level: LogLevel) -> log::Level {
    match level {
        LogLevel::Error => log::Level::Error,
        LogLevel::Warn => log::Level::Warn,
        LogLevel::Info => log::Level::Info,
        LogLevel::Debug => log::Level::Debug,
        LogLevel::Trace => log::Level::Trace,
    }
}

/// Target used when messages are forwarded to the `log` facade.
const LOG_TARGET: &str = "cipherstore";

/// Cheaply cloneable handle to the logger a helper was constructed with.
#[derive(Clone, Default)]
pub struct LogSink {
    logger: Option<Arc<dyn Logger>>,
}

impl LogSink {
    /// Creates a sink that forwards to `logger`.
    #[must_use]
    pub const fn new(logger: Arc<dyn Logger>) -> Self {
        Self {
            logger: Some(logger),
        }
    }

    /// Creates a sink that forwards to the `log` crate facade.
    #[must_use]
    pub const fn facade() -> Self {
        Self { logger: None }
    }

    /// Emits `message` at `level`.
    pub fn log(&self, level: LogLevel, message: impl fmt::Display) {
        match &self.logger {
            Some(logger) => logger.log(level, message.to_string()),
            None => log::log!(target: LOG_TARGET, log_level(level), "{message}"),
        }
    }

    /// Emits a debug-level message.
    pub fn debug(&self, message: impl fmt::Display) {
        self.log(LogLevel::Debug, message);
    }

    /// Emits an info-level message.
    pub fn info(&self, message: impl fmt::Display) {
        self.log(LogLevel::Info, message);
    }

    /// Emits a warn-level message.
    pub fn warn(&self, message: impl fmt::Display) {
        self.log(LogLevel::Warn, message);
    }

    /// Emits an error-level message.
    pub fn error(&self, message: impl fmt::Display) {
        self.log(LogLevel::Error, message);
    }
}

impl fmt::Debug for LogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogSink")
            .field("injected", &self.logger.is_some())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::test_support::RecordingLogger;
    use super::*;

    #[test]
    fn test_injected_logger_receives_messages() {
        let logger = Arc::new(RecordingLogger::default());
        let sink = LogSink::new(logger.clone());
        sink.warn(format_args!("opened {} read-only", "main.db"));
        sink.debug("fill");
        assert!(logger.contains(LogLevel::Warn, "opened main.db read-only"));
        assert!(logger.contains(LogLevel::Debug, "fill"));
    }

    #[test]
    fn test_facade_sink_does_not_panic_without_backend() {
        LogSink::facade().error("nobody is listening");
    }
}
