// SPDX-License-Identifier: MIT

use std::sync::Mutex;

use tooibox_jobs::{LogSink, Severity};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedLine {
    pub message: String,
    pub category: String,
    pub severity: Severity,
}

/// Keeps every line so tests can assert on what the engine reported.
#[derive(Debug, Default)]
pub struct RecordingSink {
    lines: Mutex<Vec<LoggedLine>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<LoggedLine> {
        self.lines.lock().unwrap().clone()
    }

    pub fn contains(&self, severity: Severity, needle: &str) -> bool {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .any(|l| l.severity == severity && l.message.contains(needle))
    }
}

impl LogSink for RecordingSink {
    fn log(&self, message: &str, category: &str, severity: Severity) {
        self.lines.lock().unwrap().push(LoggedLine {
            message: message.to_string(),
            category: category.to_string(),
            severity,
        });
    }
}
