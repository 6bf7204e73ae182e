//! Destinations for streamed log lines

use std::sync::{Mutex, PoisonError};
use tracing::info;

/// Receives the log lines a worker streams back for a job
pub trait LogSink: Send + Sync {
    fn write_line(&self, job_id: &str, text: &str);
}

/// Emits log lines as tracing events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn write_line(&self, job_id: &str, text: &str) {
        info!(job_id, "{}", text);
    }
}

/// Collects log lines in memory
#[derive(Debug, Default)]
pub struct MemoryLogSink {
    lines: Mutex<Vec<String>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every line received so far
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl LogSink for MemoryLogSink {
    fn write_line(&self, _job_id: &str, text: &str) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(text.to_string());
    }
}
