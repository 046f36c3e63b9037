//! Reporter that keeps every message for assertions

use azbake_builder::progress::Reporter;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Progress,
    Error,
}

#[derive(Debug, Default)]
pub struct RecordingReporter {
    messages: Mutex<Vec<(Level, String)>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(Level, String)> {
        self.messages.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn progress_messages(&self) -> Vec<String> {
        self.filtered(Level::Progress)
    }

    pub fn error_messages(&self) -> Vec<String> {
        self.filtered(Level::Error)
    }

    /// Check if any message of either level contains `needle`
    pub fn saw(&self, needle: &str) -> bool {
        self.messages().iter().any(|(_, m)| m.contains(needle))
    }

    fn filtered(&self, level: Level) -> Vec<String> {
        self.messages()
            .into_iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m)
            .collect()
    }

    fn record(&self, level: Level, message: &str) {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((level, message.to_string()));
    }
}

impl Reporter for RecordingReporter {
    fn progress(&self, message: &str) {
        self.record(Level::Progress, message);
    }

    fn error(&self, message: &str) {
        self.record(Level::Error, message);
    }
}
