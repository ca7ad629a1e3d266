//! Append-only log sink with three severities.
//!
//! Engine code writes through a [`LogSink`]; the default [`TracingSink`]
//! forwards to `tracing`. Error-severity records are also what the engine
//! loop turns into a raised error flag on the coupling channel.

use std::collections::VecDeque;
use std::fmt;

use parking_lot::Mutex;
use tracing::{error, info, warn};

/// Message severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Progress information.
    Normal,
    /// Something unexpected but recoverable.
    Warning,
    /// Fatal for the current coupling call.
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Normal => write!(f, "NORMAL"),
            Severity::Warning => write!(f, "WARNING"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}

/// One record in the log stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Severity.
    pub severity: Severity,
    /// Message text.
    pub message: String,
}

/// Destination for engine log records.
pub trait LogSink: Send + Sync {
    /// Append a record.
    fn record(&self, severity: Severity, message: &str);

    /// Append a normal record.
    fn normal(&self, message: &str) {
        self.record(Severity::Normal, message);
    }

    /// Append a warning.
    fn warning(&self, message: &str) {
        self.record(Severity::Warning, message);
    }

    /// Append an error.
    fn error(&self, message: &str) {
        self.record(Severity::Error, message);
    }
}

/// Forwards records to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn record(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Normal => info!(target: "roomflow", "{}", message),
            Severity::Warning => warn!(target: "roomflow", "{}", message),
            Severity::Error => error!(target: "roomflow", "{}", message),
        }
    }
}

/// Bounded in-memory sink, mostly for tests.
#[derive(Debug)]
pub struct MemorySink {
    records: Mutex<VecDeque<LogRecord>>,
    max_records: usize,
}

impl MemorySink {
    /// Create a sink keeping at most `max_records` entries.
    pub fn new(max_records: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(max_records.min(1024))),
            max_records,
        }
    }

    /// All stored records, oldest first.
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().iter().cloned().collect()
    }

    /// Records at or above `severity`.
    pub fn at_least(&self, severity: Severity) -> Vec<LogRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.severity >= severity)
            .cloned()
            .collect()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether the sink is empty.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new(4096)
    }
}

impl LogSink for MemorySink {
    fn record(&self, severity: Severity, message: &str) {
        let mut records = self.records.lock();
        if self.max_records == 0 {
            return;
        }
        if records.len() >= self.max_records {
            records.pop_front();
        }
        records.push_back(LogRecord {
            severity,
            message: message.to_string(),
        });
    }
}
