//! Job domain types

use std::fmt;

use thiserror::Error;

/// Maximum length of a job identifier in bytes.
///
/// Keeps `reply.<id>` within the 255 byte AMQP short string limit.
pub const MAX_JOB_ID_LEN: usize = 200;

/// Prefix of every reply destination name
pub const REPLY_QUEUE_PREFIX: &str = "reply.";

/// Reasons a job identifier is rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidJobId {
    #[error("job identifier is empty")]
    Empty,

    #[error("job identifier is {0} bytes long (max {MAX_JOB_ID_LEN})")]
    TooLong(usize),

    #[error("job identifier contains control characters")]
    ControlCharacter,
}

/// A job to hand off to a worker
///
/// The identifier is opaque to the dispatcher (e.g. a pull request number).
/// Once constructed the descriptor is immutable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobDescriptor {
    identifier: String,
}

impl JobDescriptor {
    /// Creates a job descriptor after validating the identifier
    pub fn new(identifier: impl Into<String>) -> Result<Self, InvalidJobId> {
        let identifier = identifier.into();

        if identifier.is_empty() {
            return Err(InvalidJobId::Empty);
        }
        if identifier.len() > MAX_JOB_ID_LEN {
            return Err(InvalidJobId::TooLong(identifier.len()));
        }
        if identifier.chars().any(char::is_control) {
            return Err(InvalidJobId::ControlCharacter);
        }

        Ok(Self { identifier })
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Name of the reply destination correlated with this job
    ///
    /// The mapping is injective: distinct identifiers never share a name.
    pub fn reply_destination_name(&self) -> String {
        format!("{REPLY_QUEUE_PREFIX}{}", self.identifier)
    }
}

impl fmt::Display for JobDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identifier)
    }
}

/// A named, ephemeral broker queue that receives replies for one job
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReplyDestination {
    name: String,
}

impl ReplyDestination {
    pub fn for_job(job: &JobDescriptor) -> Self {
        Self {
            name: job.reply_destination_name(),
        }
    }

    /// Wraps a destination name received from the wire (worker side)
    pub fn from_name(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ReplyDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_reply_destination_name() {
        let job = JobDescriptor::new("2521").unwrap();
        assert_eq!(job.reply_destination_name(), "reply.2521");
        assert_eq!(ReplyDestination::for_job(&job).name(), "reply.2521");
    }

    #[test]
    fn test_reply_destinations_do_not_collide() {
        let ids = ["1", "12", "1.2", "reply.1", "2521", "pr-2521", "PR-2521", "ü"];
        let names: HashSet<String> = ids
            .iter()
            .map(|id| JobDescriptor::new(*id).unwrap().reply_destination_name())
            .collect();
        assert_eq!(names.len(), ids.len());
    }

    #[test]
    fn test_rejects_invalid_identifiers() {
        assert_eq!(JobDescriptor::new(""), Err(InvalidJobId::Empty));
        assert_eq!(
            JobDescriptor::new("x".repeat(MAX_JOB_ID_LEN + 1)),
            Err(InvalidJobId::TooLong(MAX_JOB_ID_LEN + 1))
        );
        assert_eq!(
            JobDescriptor::new("42\n"),
            Err(InvalidJobId::ControlCharacter)
        );
        assert!(JobDescriptor::new("x".repeat(MAX_JOB_ID_LEN)).is_ok());
    }

    #[test]
    fn test_display() {
        let job = JobDescriptor::new("42").unwrap();
        assert_eq!(job.to_string(), "42");
        assert_eq!(ReplyDestination::for_job(&job).to_string(), "reply.42");
    }
}
