//! Reply message domain types

/// A message sent by a worker to a job's reply destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyMessage {
    /// Informational output; does not end the wait
    LogLine { text: String },
    /// Terminal pass/fail result
    StatusResult { success: bool },
}

impl ReplyMessage {
    pub fn log(text: impl Into<String>) -> Self {
        Self::LogLine { text: text.into() }
    }

    pub fn status(success: bool) -> Self {
        Self::StatusResult { success }
    }
}
