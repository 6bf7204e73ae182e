//! Reply command handlers
//!
//! Lets shell-script workers answer a dispatch without linking the client
//! library: `courier reply reply.2521 log "building"` then
//! `courier reply reply.2521 status true`.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use courier_client::broker::AmqpConnector;
use courier_client::{BrokerConnection, DispatchOutcome, ReplyPublisher};
use courier_core::domain::job::{REPLY_QUEUE_PREFIX, ReplyDestination};
use tracing::warn;

use crate::config::Config;

/// Reply subcommands
#[derive(Subcommand)]
pub enum ReplyCommands {
    /// Send a log line
    Log {
        /// Text of the line
        text: String,
    },
    /// Send the final status
    Status {
        /// true for success, false for failure
        #[arg(action = clap::ArgAction::Set)]
        success: bool,
    },
}

/// Handle reply commands
pub async fn handle_reply_command(
    config: &Config,
    reply_to: &str,
    command: ReplyCommands,
) -> Result<i32> {
    if !reply_to.starts_with(REPLY_QUEUE_PREFIX) {
        anyhow::bail!(
            "reply destination must start with '{}', got '{}'",
            REPLY_QUEUE_PREFIX,
            reply_to
        );
    }
    let destination = ReplyDestination::from_name(reply_to);

    match publish_reply(config, destination, command).await {
        Ok(()) => {
            println!("{}", "✓ Reply sent".green());
            Ok(0)
        }
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            Ok(DispatchOutcome::BrokerError.exit_code())
        }
    }
}

/// Opens a connection, sends one reply and closes the connection
async fn publish_reply(
    config: &Config,
    destination: ReplyDestination,
    command: ReplyCommands,
) -> Result<()> {
    let connection =
        BrokerConnection::open(&AmqpConnector::new(), &config.endpoint, config.connect_timeout)
            .await
            .context("Failed to connect to broker")?;

    let result = send_reply(&connection, destination, command).await;

    if let Err(e) = connection.close().await {
        warn!("Failed to close broker connection: {}", e);
    }

    result
}

async fn send_reply(
    connection: &BrokerConnection,
    destination: ReplyDestination,
    command: ReplyCommands,
) -> Result<()> {
    let channel = connection.channel().await?;
    let publisher = ReplyPublisher::new(channel.as_ref(), destination);

    let result = match command {
        ReplyCommands::Log { text } => publisher.log(text).await,
        ReplyCommands::Status { success } => publisher.status(success).await,
    };

    if let Err(e) = channel.close().await {
        warn!("Failed to close channel: {}", e);
    }

    result.context("Failed to publish reply")
}
