//! Job consumer
//!
//! Consumes job requests from the work queue and executes them. Each job
//! runs in its own task; its output is streamed to the job's reply
//! destination and the work message is acknowledged only after the final
//! status has been published, so a crash mid-job leads to redelivery.

use anyhow::{Context, Result};
use courier_client::broker::{Channel, Delivery, QueueOptions};
use courier_client::{BrokerConnection, ReplyPublisher};
use courier_core::domain::job::{JobDescriptor, ReplyDestination};
use courier_core::dto::job::JobRequest;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::service::ExecutionService;

/// Buffered output lines per job before the command is slowed down
const LINE_BUFFER: usize = 256;

/// Channel shared between the consume loop and the job tasks
type SharedChannel = Arc<Box<dyn Channel>>;

/// Job consumer that serves the work queue until shutdown
pub struct JobConsumer {
    config: Config,
    execution: Arc<dyn ExecutionService>,
    semaphore: Arc<Semaphore>,
}

impl JobConsumer {
    /// Creates a new job consumer
    pub fn new(config: Config, execution: Arc<dyn ExecutionService>) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_parallel_jobs));
        Self {
            config,
            execution,
            semaphore,
        }
    }

    /// Serves jobs until `shutdown` resolves, then waits for running jobs
    pub async fn run<F>(&self, connection: &BrokerConnection, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let channel: SharedChannel =
            Arc::new(connection.channel().await.context("Failed to open channel")?);

        let result = self.serve(Arc::clone(&channel), shutdown).await;

        // Every job task has been joined, so this is the last reference
        match Arc::try_unwrap(channel) {
            Ok(channel) => {
                if let Err(e) = channel.close().await {
                    warn!("Failed to close worker channel: {}", e);
                }
            }
            Err(_) => warn!("Worker channel still shared at shutdown"),
        }

        result
    }

    async fn serve<F>(&self, channel: SharedChannel, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let work_queue = &self.config.work_queue;

        channel
            .declare_queue(work_queue, QueueOptions::work_queue())
            .await
            .context("Failed to declare work queue")?;
        channel
            .set_prefetch(self.config.prefetch())
            .await
            .context("Failed to set prefetch")?;
        let mut subscription = channel
            .consume(work_queue)
            .await
            .context("Failed to consume work queue")?;

        info!(
            "Worker {} waiting for jobs on '{}' (max {} parallel)",
            self.config.worker_id, work_queue, self.config.max_parallel_jobs
        );

        let mut tasks = JoinSet::new();
        tokio::pin!(shutdown);

        let result = loop {
            let permit = tokio::select! {
                _ = &mut shutdown => break Ok(()),
                permit = Arc::clone(&self.semaphore).acquire_owned() => {
                    permit.context("Job semaphore closed")?
                }
            };

            let delivery = tokio::select! {
                _ = &mut shutdown => break Ok(()),
                next = subscription.next_delivery() => match next {
                    Some(Ok(delivery)) => delivery,
                    Some(Err(e)) => {
                        break Err(anyhow::Error::new(e).context("Failed to receive job request"));
                    }
                    None => break Err(anyhow::anyhow!("Work queue subscription cancelled by broker")),
                },
            };

            let channel = Arc::clone(&channel);
            let execution = Arc::clone(&self.execution);
            tasks.spawn(async move {
                handle_delivery(delivery, channel, execution).await;
                drop(permit);
            });

            // Reap finished tasks so the set does not grow unbounded
            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    error!("Job task panicked: {}", e);
                }
            }
        };

        info!("Waiting for {} running job(s) to finish", tasks.len());
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Job task panicked: {}", e);
            }
        }

        result
    }
}

/// Executes one job request and acknowledges it
async fn handle_delivery(
    delivery: Delivery,
    channel: SharedChannel,
    execution: Arc<dyn ExecutionService>,
) {
    let request = match JobRequest::from_bytes(delivery.body()) {
        Ok(request) => request,
        Err(e) => {
            warn!(
                "Discarding malformed job request: {} (body: {:?})",
                e,
                String::from_utf8_lossy(delivery.body())
            );
            ack(delivery).await;
            return;
        }
    };

    let job = match JobDescriptor::new(request.job_id.as_str()) {
        Ok(job) => job,
        Err(e) => {
            warn!("Discarding job request with invalid id: {}", e);
            ack(delivery).await;
            return;
        }
    };

    info!("Executing job {} (replies to '{}')", job, request.reply_to);

    let replies = ReplyPublisher::new(
        channel.as_ref().as_ref(),
        ReplyDestination::from_name(request.reply_to),
    );
    let success = run_job(&job, execution.as_ref(), &replies).await;

    if let Err(e) = replies.status(success).await {
        error!("Failed to publish status for job {}: {}", job, e);
    }

    info!(
        "Job {} completed with status: {}",
        job,
        if success { "success" } else { "failure" }
    );

    ack(delivery).await;
}

/// Runs a job while forwarding its output as log replies
async fn run_job(
    job: &JobDescriptor,
    execution: &dyn ExecutionService,
    replies: &ReplyPublisher<'_>,
) -> bool {
    let (tx, mut rx) = mpsc::channel::<String>(LINE_BUFFER);

    let forward = async {
        while let Some(line) = rx.recv().await {
            if let Err(e) = replies.log(line).await {
                warn!("Failed to send log line for job {}: {}", job, e);
            }
        }
    };

    let (result, ()) = tokio::join!(execution.execute(job, tx), forward);

    match result {
        Ok(success) => success,
        Err(e) => {
            error!("Failed to execute job {}: {:#}", job, e);
            if let Err(e) = replies.log(format!("worker error: {:#}", e)).await {
                warn!("Failed to send error line for job {}: {}", job, e);
            }
            false
        }
    }
}

async fn ack(delivery: Delivery) {
    if let Err(e) = delivery.ack().await {
        error!("Failed to acknowledge job request: {}", e);
    } else {
        debug!("Acknowledged job request");
    }
}
