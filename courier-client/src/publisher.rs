//! Publishing jobs and replies

use courier_core::domain::job::{JobDescriptor, ReplyDestination};
use courier_core::domain::reply::ReplyMessage;
use courier_core::dto::job::JobRequest;
use courier_core::dto::reply::ReplyPayload;
use tracing::{debug, info};

use crate::broker::{Channel, QueueOptions};
use crate::error::Result;

/// Publishes job requests to the shared work queue
pub struct JobPublisher<'a> {
    channel: &'a dyn Channel,
}

impl<'a> JobPublisher<'a> {
    pub fn new(channel: &'a dyn Channel) -> Self {
        Self { channel }
    }

    /// Publishes one job request
    ///
    /// The body carries the reply destination name so the worker knows where
    /// to answer. Only the broker's write acknowledgment is awaited.
    pub async fn publish(
        &self,
        work_queue: &str,
        job: &JobDescriptor,
        reply_to: &ReplyDestination,
    ) -> Result<()> {
        let body = JobRequest::new(job, reply_to).to_bytes()?;

        self.channel
            .declare_queue(work_queue, QueueOptions::work_queue())
            .await?;
        self.channel.publish(work_queue, &body, true).await?;

        info!(
            "Published job {} to '{}' (replies on '{}')",
            job, work_queue, reply_to
        );
        Ok(())
    }
}

/// Sends replies for one job to its reply destination
///
/// This is the worker's half of the protocol: any number of log lines
/// followed by exactly one status.
pub struct ReplyPublisher<'a> {
    channel: &'a dyn Channel,
    destination: ReplyDestination,
}

impl<'a> ReplyPublisher<'a> {
    pub fn new(channel: &'a dyn Channel, destination: ReplyDestination) -> Self {
        Self {
            channel,
            destination,
        }
    }

    pub fn destination(&self) -> &ReplyDestination {
        &self.destination
    }

    /// Sends a reply message
    pub async fn send(&self, message: ReplyMessage) -> Result<()> {
        let body = ReplyPayload::from(message).to_bytes()?;
        self.channel
            .publish(self.destination.name(), &body, false)
            .await
    }

    /// Sends a log line
    pub async fn log(&self, text: impl Into<String>) -> Result<()> {
        self.send(ReplyMessage::log(text)).await
    }

    /// Sends the terminal status
    pub async fn status(&self, success: bool) -> Result<()> {
        debug!(
            "Sending status {} to '{}'",
            if success { "success" } else { "failure" },
            self.destination
        );
        self.send(ReplyMessage::status(success)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Connector, MemoryBroker};
    use crate::endpoint::BrokerEndpoint;

    #[tokio::test]
    async fn test_publish_job_request() {
        let broker = MemoryBroker::new();
        let endpoint = BrokerEndpoint::parse("amqp://localhost").unwrap();
        let conn = broker.connect(&endpoint).await.unwrap();
        let channel = conn.create_channel().await.unwrap();

        let job = JobDescriptor::new("2521").unwrap();
        let reply_to = ReplyDestination::for_job(&job);
        JobPublisher::new(channel.as_ref())
            .publish("job_requests", &job, &reply_to)
            .await
            .unwrap();

        let body = broker.take_message("job_requests").unwrap();
        let request = JobRequest::from_bytes(&body).unwrap();
        assert_eq!(request.job_id, "2521");
        assert_eq!(request.reply_to, "reply.2521");
    }

    #[tokio::test]
    async fn test_publish_failure_is_reported() {
        let broker = MemoryBroker::new();
        let endpoint = BrokerEndpoint::parse("amqp://localhost").unwrap();
        let conn = broker.connect(&endpoint).await.unwrap();
        let channel = conn.create_channel().await.unwrap();
        broker.fail_publishes(true);

        let job = JobDescriptor::new("7").unwrap();
        let err = JobPublisher::new(channel.as_ref())
            .publish("job_requests", &job, &ReplyDestination::for_job(&job))
            .await
            .unwrap_err();
        assert!(matches!(err, crate::ClientError::Publish { .. }));
    }

    #[tokio::test]
    async fn test_reply_publisher_wire_format() {
        let broker = MemoryBroker::new();
        let endpoint = BrokerEndpoint::parse("amqp://localhost").unwrap();
        let conn = broker.connect(&endpoint).await.unwrap();
        let channel = conn.create_channel().await.unwrap();
        channel
            .declare_queue("reply.9", QueueOptions::reply_queue())
            .await
            .unwrap();

        let replies = ReplyPublisher::new(channel.as_ref(), ReplyDestination::from_name("reply.9"));
        replies.log("building").await.unwrap();
        replies.status(false).await.unwrap();

        assert_eq!(
            broker.take_message("reply.9").unwrap(),
            br#"{"kind":"log","data":"building"}"#
        );
        assert_eq!(
            broker.take_message("reply.9").unwrap(),
            br#"{"kind":"status","data":false}"#
        );
    }
}
