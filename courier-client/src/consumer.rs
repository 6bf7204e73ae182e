//! Reply consumer
//!
//! Waits on a job's reply destination and turns the reply stream into a
//! single [`DispatchOutcome`]. The per-message logic is the pure
//! [`transition`] function; [`ReplyConsumer::run`] adds I/O around it:
//! bounded waits, acknowledgments and log streaming.

use courier_core::domain::job::ReplyDestination;
use courier_core::domain::outcome::DispatchOutcome;
use courier_core::domain::reply::ReplyMessage;
use courier_core::dto::reply::decode_reply;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::broker::Channel;
use crate::error::{ClientError, Result};
use crate::sink::LogSink;

/// State of a consumer session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Waiting,
    LogReceived,
    Done(DispatchOutcome),
}

impl ConsumerState {
    pub fn outcome(self) -> Option<DispatchOutcome> {
        match self {
            Self::Done(outcome) => Some(outcome),
            _ => None,
        }
    }
}

/// Applies one reply message to the session state
///
/// A status is terminal; once `Done`, further messages change nothing.
pub fn transition(state: ConsumerState, message: &ReplyMessage) -> ConsumerState {
    match (state, message) {
        (ConsumerState::Done(outcome), _) => ConsumerState::Done(outcome),
        (_, ReplyMessage::LogLine { .. }) => ConsumerState::LogReceived,
        (_, ReplyMessage::StatusResult { success }) => {
            ConsumerState::Done(DispatchOutcome::from(*success))
        }
    }
}

/// Consumes replies for one job until a status arrives or time runs out
pub struct ReplyConsumer {
    channel: Box<dyn Channel>,
    destination: ReplyDestination,
    job_id: String,
    inactivity_timeout: Duration,
    deadline: Option<Instant>,
}

impl ReplyConsumer {
    /// Creates a consumer that owns `channel` and closes it when done
    pub fn new(
        channel: Box<dyn Channel>,
        destination: ReplyDestination,
        job_id: impl Into<String>,
        inactivity_timeout: Duration,
    ) -> Self {
        Self {
            channel,
            destination,
            job_id: job_id.into(),
            inactivity_timeout,
            deadline: None,
        }
    }

    /// Sets an overall deadline after which the session times out
    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Runs the session to completion
    ///
    /// The channel is closed before returning on every path.
    pub async fn run(self, sink: &dyn LogSink) -> Result<DispatchOutcome> {
        let result = self.receive(sink).await;

        if let Err(e) = self.channel.close().await {
            warn!("Failed to close reply channel for job {}: {}", self.job_id, e);
        }

        result
    }

    async fn receive(&self, sink: &dyn LogSink) -> Result<DispatchOutcome> {
        let mut subscription = self.channel.consume(self.destination.name()).await?;
        debug!(
            "Waiting for replies on '{}' (inactivity timeout {:?})",
            self.destination, self.inactivity_timeout
        );

        let mut state = ConsumerState::Waiting;
        let mut last_activity = Instant::now();

        loop {
            let wake_at = self.wake_at(last_activity);

            let delivery =
                match tokio::time::timeout_at(wake_at, subscription.next_delivery()).await {
                    Err(_) => {
                        info!(
                            "No reply for job {} on '{}' before timeout",
                            self.job_id, self.destination
                        );
                        return Ok(DispatchOutcome::Timeout);
                    }
                    Ok(None) => {
                        return Err(ClientError::consume(
                            self.destination.name(),
                            "subscription cancelled by broker",
                        ));
                    }
                    Ok(Some(delivery)) => delivery?,
                };
            last_activity = Instant::now();

            match decode_reply(delivery.body()) {
                Ok(message) => {
                    if let ReplyMessage::LogLine { text } = &message {
                        sink.write_line(&self.job_id, text);
                    }
                    delivery.ack().await?;
                    state = transition(state, &message);
                }
                Err(e) => {
                    warn!(
                        "Ignoring malformed reply for job {}: {} (body: {:?})",
                        self.job_id,
                        e,
                        String::from_utf8_lossy(delivery.body())
                    );
                    delivery.ack().await?;
                }
            }

            if let Some(outcome) = state.outcome() {
                info!("Job {} finished with {}", self.job_id, outcome);
                return Ok(outcome);
            }
        }
    }

    /// Next instant at which the wait gives up
    fn wake_at(&self, last_activity: Instant) -> Instant {
        let idle_limit = last_activity + self.inactivity_timeout;
        match self.deadline {
            Some(deadline) => idle_limit.min(deadline),
            None => idle_limit,
        }
    }
}
