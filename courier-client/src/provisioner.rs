//! Reply destination provisioning
//!
//! Each job gets its own reply queue, `reply.<job id>`. The queue is declared
//! exclusive and auto-delete so the broker reclaims it even if this process
//! dies, but the client still deletes it explicitly when the wait is over.

use courier_core::domain::job::{JobDescriptor, ReplyDestination};
use tracing::debug;

use crate::broker::{Channel, QueueOptions};
use crate::error::Result;

/// Creates and removes per-job reply destinations
pub struct ReplyChannelProvisioner<'a> {
    channel: &'a dyn Channel,
}

impl<'a> ReplyChannelProvisioner<'a> {
    pub fn new(channel: &'a dyn Channel) -> Self {
        Self { channel }
    }

    /// Declares the reply destination for a job
    pub async fn provision(&self, job: &JobDescriptor) -> Result<ReplyDestination> {
        let destination = ReplyDestination::for_job(job);
        self.channel
            .declare_queue(destination.name(), QueueOptions::reply_queue())
            .await?;

        debug!("Provisioned reply destination '{}'", destination);
        Ok(destination)
    }

    /// Deletes a reply destination
    ///
    /// Idempotent: tearing down a destination that no longer exists succeeds.
    pub async fn teardown(&self, destination: &ReplyDestination) -> Result<()> {
        self.channel.delete_queue(destination.name()).await?;

        debug!("Tore down reply destination '{}'", destination);
        Ok(())
    }
}
