//! Dispatch client
//!
//! Ties the pieces together for one job: open a connection, provision the
//! reply destination, publish the request, wait for the correlated reply and
//! clean up. Cleanup runs on every path before the outcome is returned.

use courier_core::domain::job::{JobDescriptor, ReplyDestination};
use courier_core::domain::outcome::DispatchOutcome;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::broker::{AmqpConnector, BrokerConnection, Channel, Connector, DEFAULT_CONNECT_TIMEOUT};
use crate::consumer::ReplyConsumer;
use crate::endpoint::BrokerEndpoint;
use crate::error::Result;
use crate::provisioner::ReplyChannelProvisioner;
use crate::publisher::JobPublisher;
use crate::sink::{LogSink, TracingLogSink};

/// Work queue shared by dispatchers and workers
pub const DEFAULT_WORK_QUEUE: &str = "job_requests";

/// Default idle time allowed between replies
pub const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(300);

/// Settings for dispatching jobs
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Broker to connect to
    pub endpoint: BrokerEndpoint,
    /// Queue workers read job requests from
    pub work_queue: String,
    /// Maximum idle time between two replies
    pub inactivity_timeout: Duration,
    /// Optional bound on the whole dispatch, measured from its start
    pub deadline: Option<Duration>,
    /// Bound on establishing the broker connection
    pub connect_timeout: Duration,
}

impl DispatchConfig {
    /// Creates a configuration with default queue and timeouts
    pub fn new(endpoint: BrokerEndpoint) -> Self {
        Self {
            endpoint,
            work_queue: DEFAULT_WORK_QUEUE.to_string(),
            inactivity_timeout: DEFAULT_INACTIVITY_TIMEOUT,
            deadline: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_work_queue(mut self, work_queue: impl Into<String>) -> Self {
        self.work_queue = work_queue.into();
        self
    }

    pub fn with_inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout = timeout;
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Dispatches jobs and waits for their correlated replies
#[derive(Clone)]
pub struct DispatchClient {
    config: DispatchConfig,
    connector: Arc<dyn Connector>,
    sink: Arc<dyn LogSink>,
}

impl DispatchClient {
    /// Creates a client that talks AMQP and logs worker output through tracing
    pub fn new(config: DispatchConfig) -> Self {
        Self::with_connector(config, Arc::new(AmqpConnector::new()))
    }

    /// Creates a client on top of a custom connector
    pub fn with_connector(config: DispatchConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            sink: Arc::new(TracingLogSink),
        }
    }

    /// Replaces the sink receiving streamed log lines
    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Dispatches a job and returns its outcome
    ///
    /// Broker failures are logged and reported as
    /// [`DispatchOutcome::BrokerError`].
    pub async fn dispatch(&self, job: &JobDescriptor) -> DispatchOutcome {
        match self.try_dispatch(job).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Dispatch of job {} failed: {}", job, e);
                DispatchOutcome::BrokerError
            }
        }
    }

    /// Dispatches a job, returning broker failures as errors
    pub async fn try_dispatch(&self, job: &JobDescriptor) -> Result<DispatchOutcome> {
        let deadline = self.config.deadline.map(|d| Instant::now() + d);

        let connection = BrokerConnection::open(
            self.connector.as_ref(),
            &self.config.endpoint,
            self.config.connect_timeout,
        )
        .await?;

        let result = self.run_on_connection(&connection, job, deadline).await;

        if let Err(e) = connection.close().await {
            warn!("Failed to close broker connection: {}", e);
        }

        result
    }

    async fn run_on_connection(
        &self,
        connection: &BrokerConnection,
        job: &JobDescriptor,
        deadline: Option<Instant>,
    ) -> Result<DispatchOutcome> {
        let control = connection.channel().await?;

        let result = self
            .run_on_channel(connection, control.as_ref(), job, deadline)
            .await;

        if let Err(e) = control.close().await {
            warn!("Failed to close control channel: {}", e);
        }

        result
    }

    async fn run_on_channel(
        &self,
        connection: &BrokerConnection,
        control: &dyn Channel,
        job: &JobDescriptor,
        deadline: Option<Instant>,
    ) -> Result<DispatchOutcome> {
        let provisioner = ReplyChannelProvisioner::new(control);
        let destination = match within(deadline, provisioner.provision(job)).await {
            Some(destination) => destination?,
            None => {
                info!("Deadline reached while provisioning reply destination for job {}", job);
                // The declare may still have reached the broker
                let destination = ReplyDestination::for_job(job);
                if let Err(e) = provisioner.teardown(&destination).await {
                    warn!("Failed to tear down '{}': {}", destination, e);
                }
                return Ok(DispatchOutcome::Timeout);
            }
        };

        let result = self
            .publish_and_wait(connection, control, job, &destination, deadline)
            .await;

        if let Err(e) = provisioner.teardown(&destination).await {
            // The queue is exclusive, so closing the connection still removes it
            warn!("Failed to tear down '{}': {}", destination, e);
        }

        result
    }

    async fn publish_and_wait(
        &self,
        connection: &BrokerConnection,
        control: &dyn Channel,
        job: &JobDescriptor,
        destination: &ReplyDestination,
        deadline: Option<Instant>,
    ) -> Result<DispatchOutcome> {
        let setup = async {
            JobPublisher::new(control)
                .publish(&self.config.work_queue, job, destination)
                .await?;
            connection.channel().await
        };

        let reply_channel = match within(deadline, setup).await {
            Some(channel) => channel?,
            None => {
                info!("Deadline reached while publishing job {}", job);
                return Ok(DispatchOutcome::Timeout);
            }
        };
        let outcome = ReplyConsumer::new(
            reply_channel,
            destination.clone(),
            job.identifier(),
            self.config.inactivity_timeout,
        )
        .with_deadline(deadline)
        .run(self.sink.as_ref())
        .await?;

        info!("Dispatch of job {} completed: {}", job, outcome);
        Ok(outcome)
    }
}

/// Runs `future` to completion, or until `deadline` if there is one
async fn within<F: Future>(deadline: Option<Instant>, future: F) -> Option<F::Output> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, future).await.ok(),
        None => Some(future.await),
    }
}

/// Dispatches a single job over AMQP with default settings
pub async fn dispatch(
    endpoint: &BrokerEndpoint,
    work_queue: &str,
    job: &JobDescriptor,
    inactivity_timeout: Duration,
) -> DispatchOutcome {
    let config = DispatchConfig::new(endpoint.clone())
        .with_work_queue(work_queue)
        .with_inactivity_timeout(inactivity_timeout);

    DispatchClient::new(config).dispatch(job).await
}
