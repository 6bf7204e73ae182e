//! Courier Runner
//!
//! A worker that serves the job dispatch protocol: it takes job requests
//! off the work queue, runs the configured command for each, streams the
//! command's output to the job's reply destination and finishes with a
//! pass/fail status.
//!
//! Architecture:
//! - Configuration: Load settings from environment
//! - Services: Job execution (shell command per job)
//! - Scheduler: Work queue consumption and job lifecycle

mod config;
mod scheduler;
mod service;

use anyhow::{Context, Result};
use courier_client::{AmqpConnector, BrokerConnection, BrokerEndpoint};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::scheduler::JobConsumer;
use crate::service::{CommandExecutionService, ExecutionService};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courier_runner=info,courier_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Courier Runner");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    let endpoint = config.validate().context("Invalid configuration")?;
    info!(
        "Loaded configuration: worker_id={}, broker={}, work_queue={}",
        config.worker_id, endpoint, config.work_queue
    );

    let execution: Arc<dyn ExecutionService> = Arc::new(CommandExecutionService::new(
        config.command.clone(),
        config.job_timeout,
    ));

    // Connect to the broker (with retry logic)
    let connection = connect_with_retry(&endpoint, config.connect_timeout).await?;

    let consumer = JobConsumer::new(config, execution);

    let result = consumer.run(&connection, shutdown_signal()).await;

    if let Err(e) = connection.close().await {
        warn!("Failed to close broker connection: {}", e);
    }

    if let Err(e) = &result {
        error!("Worker error: {:#}", e);
    }

    info!("Courier Runner stopped");
    result
}

/// Resolves on Ctrl+C
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown requested"),
        Err(e) => {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

/// Connect to the broker with retry logic and exponential backoff
///
/// This handles the case where the broker may not be ready yet when
/// the worker starts (common in container environments).
async fn connect_with_retry(
    endpoint: &BrokerEndpoint,
    connect_timeout: Duration,
) -> Result<BrokerConnection> {
    const MAX_RETRIES: u32 = 10;
    const INITIAL_DELAY_MS: u64 = 500;
    const MAX_DELAY_MS: u64 = 30_000;

    let connector = AmqpConnector::new();
    let mut attempt = 0;
    let mut delay_ms = INITIAL_DELAY_MS;

    loop {
        attempt += 1;

        match BrokerConnection::open(&connector, endpoint, connect_timeout).await {
            Ok(connection) => {
                if attempt > 1 {
                    info!(
                        "Connected to broker at {} after {} attempt(s)",
                        connection.endpoint(),
                        attempt
                    );
                }
                return Ok(connection);
            }
            Err(e) => {
                if attempt >= MAX_RETRIES {
                    error!("Failed to connect to broker after {} attempts", MAX_RETRIES);
                    return Err(anyhow::anyhow!("Failed to connect to broker: {}", e));
                }

                warn!(
                    "Failed to connect to broker (attempt {}/{}): {}",
                    attempt, MAX_RETRIES, e
                );
                warn!("Retrying in {} ms...", delay_ms);

                tokio::time::sleep(Duration::from_millis(delay_ms)).await;

                // Exponential backoff with cap
                delay_ms = (delay_ms * 2).min(MAX_DELAY_MS);
            }
        }
    }
}
