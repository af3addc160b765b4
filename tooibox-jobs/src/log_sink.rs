// SPDX-License-Identifier: MIT

//! Diagnostic sink used by the job engine.
//!
//! The engine only ever needs one call: `log(message, category, severity)`.
//! Anything implementing [`LogSink`] can receive it. [`LogCrateSink`] hands
//! the message to the `log` facade (the category becomes the log target),
//! [`NoopSink`] drops everything and is meant for tests.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
        };
        f.write_str(s)
    }
}

impl From<Severity> for log::Level {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Debug => log::Level::Debug,
            Severity::Info => log::Level::Info,
            Severity::Warning => log::Level::Warn,
            Severity::Error => log::Level::Error,
        }
    }
}

pub trait LogSink: Send + Sync {
    fn log(&self, message: &str, category: &str, severity: Severity);
}

/// Forwards to whatever `log` backend the host application installed.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogCrateSink;

impl LogSink for LogCrateSink {
    fn log(&self, message: &str, category: &str, severity: Severity) {
        log::log!(target: category, log::Level::from(severity), "{message}");
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl LogSink for NoopSink {
    fn log(&self, _message: &str, _category: &str, _severity: Severity) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Debug < Severity::Info);
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Error);
    }

    #[test]
    fn test_severity_maps_onto_log_levels() {
        assert_eq!(log::Level::from(Severity::Warning), log::Level::Warn);
        assert_eq!(log::Level::from(Severity::Debug), log::Level::Debug);
        assert_eq!(Severity::Error.to_string(), "ERROR");
    }

    #[test]
    fn test_sinks_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LogCrateSink>();
        assert_send_sync::<NoopSink>();
        NoopSink.log("dropped", "Test", Severity::Error);
        LogCrateSink.log("forwarded", "Test", Severity::Debug);
    }
}
