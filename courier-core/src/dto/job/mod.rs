//! Job request DTOs

use serde::{Deserialize, Serialize};

use crate::domain::job::{JobDescriptor, ReplyDestination};

/// Body of a message published on the work queue
///
/// `reply_to` tells the worker where to send replies, so it never has to
/// guess the per-job destination name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub job_id: String,
    pub reply_to: String,
}

impl JobRequest {
    pub fn new(job: &JobDescriptor, reply_to: &ReplyDestination) -> Self {
        Self {
            job_id: job.identifier().to_string(),
            reply_to: reply_to.name().to_string(),
        }
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(body: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        let job = JobDescriptor::new("2521").unwrap();
        let req = JobRequest::new(&job, &ReplyDestination::for_job(&job));
        let body = req.to_bytes().unwrap();
        assert_eq!(
            String::from_utf8(body).unwrap(),
            r#"{"job_id":"2521","reply_to":"reply.2521"}"#
        );
    }

    #[test]
    fn test_rejects_missing_reply_to() {
        assert!(JobRequest::from_bytes(br#"{"job_id":"2521"}"#).is_err());
    }
}
