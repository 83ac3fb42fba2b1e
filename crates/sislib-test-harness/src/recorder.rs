//! Diagnostics sink that keeps every record for later assertions.

use std::sync::{Mutex, PoisonError};

use sislib_core::{Diagnostics, SessionKey};

/// A [`Diagnostics`] implementation that stores records in memory.
#[derive(Debug, Default)]
pub struct RecordingDiagnostics {
    records: Mutex<Vec<(SessionKey, String)>>,
}

impl RecordingDiagnostics {
    pub fn new() -> Self {
        RecordingDiagnostics::default()
    }

    /// All records, oldest first.
    pub fn records(&self) -> Vec<(SessionKey, String)> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Messages recorded for one session, oldest first.
    pub fn messages(&self, key: &SessionKey) -> Vec<String> {
        self.records()
            .into_iter()
            .filter(|(k, _)| k == key)
            .map(|(_, m)| m)
            .collect()
    }

    /// Whether any message for `key` contains `needle`.
    pub fn contains(&self, key: &SessionKey, needle: &str) -> bool {
        self.messages(key).iter().any(|m| m.contains(needle))
    }
}

impl Diagnostics for RecordingDiagnostics {
    fn record_error(&self, key: &SessionKey, message: &str) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((key.clone(), message.to_string()));
    }
}
