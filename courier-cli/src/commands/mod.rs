//! Commands module
//!
//! Defines all CLI commands and their handlers. Every handler returns the
//! process exit code.

mod dispatch;
mod reply;

pub use reply::ReplyCommands;

use anyhow::Result;
use clap::Subcommand;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Dispatch a job and wait for its result
    Dispatch {
        /// Job identifier, e.g. a pull request number
        job_id: String,

        /// Seconds without any reply before giving up
        #[arg(short, long, env = "COURIER_INACTIVITY_TIMEOUT", default_value_t = 300)]
        timeout: u64,

        /// Overall limit in seconds for the whole dispatch
        #[arg(long, env = "COURIER_DEADLINE")]
        deadline: Option<u64>,

        /// Do not print the worker's log lines
        #[arg(short, long)]
        quiet: bool,
    },
    /// Publish a reply by hand (worker side of the protocol)
    Reply {
        /// Reply destination, as received in the job request's `reply_to`
        reply_to: String,

        #[command(subcommand)]
        command: ReplyCommands,
    },
}

/// Handle a CLI command
///
/// # Arguments
/// * `command` - The command to execute
/// * `config` - The CLI configuration
///
/// # Returns
/// The process exit code
pub async fn handle_command(command: Commands, config: &Config) -> Result<i32> {
    match command {
        Commands::Dispatch {
            job_id,
            timeout,
            deadline,
            quiet,
        } => dispatch::handle_dispatch(config, &job_id, timeout, deadline, quiet).await,
        Commands::Reply { reply_to, command } => {
            reply::handle_reply_command(config, &reply_to, command).await
        }
    }
}
