//! Broker abstraction
//!
//! The dispatch protocol only needs a handful of broker operations: open a
//! connection, open channels, declare/delete/publish to named queues, and
//! consume with explicit acknowledgment. They are expressed as traits so the
//! protocol logic runs unchanged against RabbitMQ (via lapin) or the
//! in-process [`MemoryBroker`].

mod amqp;
mod memory;

pub use amqp::AmqpConnector;
pub use memory::MemoryBroker;

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

use crate::endpoint::BrokerEndpoint;
use crate::error::{ClientError, Result};

/// Default bound on connection establishment
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Queue declaration flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueOptions {
    /// Survives broker restarts
    pub durable: bool,
    /// Removed by the broker once its last consumer goes away
    pub auto_delete: bool,
    /// Owned by the declaring connection and removed when it closes
    pub exclusive: bool,
}

impl QueueOptions {
    /// Shared work queue read by workers
    pub fn work_queue() -> Self {
        Self {
            durable: true,
            ..Self::default()
        }
    }

    /// Per-job reply destination
    pub fn reply_queue() -> Self {
        Self {
            durable: false,
            auto_delete: true,
            exclusive: true,
        }
    }
}

/// Opens connections to a broker
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establishes a connection to the endpoint
    async fn connect(&self, endpoint: &BrokerEndpoint) -> Result<Box<dyn Connection>>;
}

/// An open broker connection
#[async_trait]
pub trait Connection: Send + Sync {
    /// Opens a new channel on this connection
    async fn create_channel(&self) -> Result<Box<dyn Channel>>;

    /// Closes the connection; consumes it so it cannot be closed twice
    async fn close(self: Box<Self>) -> Result<()>;
}

/// A channel multiplexed over a connection
#[async_trait]
pub trait Channel: Send + Sync {
    /// Declares a queue; declaring an existing queue with the same flags is a no-op
    async fn declare_queue(&self, name: &str, options: QueueOptions) -> Result<()>;

    /// Deletes a queue; deleting an absent queue succeeds
    async fn delete_queue(&self, name: &str) -> Result<()>;

    /// Publishes a message to a queue through the default exchange
    ///
    /// Returns once the broker has accepted the write.
    async fn publish(&self, queue: &str, body: &[u8], persistent: bool) -> Result<()>;

    /// Limits the number of unacknowledged deliveries on this channel
    async fn set_prefetch(&self, count: u16) -> Result<()>;

    /// Starts a manual-ack consumer on a queue
    async fn consume(&self, queue: &str) -> Result<Box<dyn Subscription>>;

    /// Closes the channel, returning unacknowledged deliveries to their queues
    async fn close(self: Box<Self>) -> Result<()>;
}

/// A stream of deliveries from one queue
#[async_trait]
pub trait Subscription: Send {
    /// Waits for the next delivery
    ///
    /// Returns `None` once the broker has cancelled the subscription.
    async fn next_delivery(&mut self) -> Option<Result<Delivery>>;
}

/// Acknowledges a single delivery
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<()>;
}

/// A message received from a queue, pending acknowledgment
pub struct Delivery {
    body: Vec<u8>,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(body: Vec<u8>, acker: Box<dyn Acknowledger>) -> Self {
        Self { body, acker }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Acknowledges the delivery, consuming it
    pub async fn ack(self) -> Result<()> {
        self.acker.ack().await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("body", &String::from_utf8_lossy(&self.body))
            .finish_non_exhaustive()
    }
}

/// The single connection owned by one dispatch
///
/// Opened with a bounded connect timeout and closed exactly once through
/// [`BrokerConnection::close`], which takes `self`.
pub struct BrokerConnection {
    inner: Box<dyn Connection>,
    endpoint: BrokerEndpoint,
}

impl BrokerConnection {
    /// Opens a connection, failing with [`ClientError::Connection`] if the
    /// broker does not answer within `socket_timeout`
    pub async fn open(
        connector: &dyn Connector,
        endpoint: &BrokerEndpoint,
        socket_timeout: Duration,
    ) -> Result<Self> {
        debug!("Connecting to broker at {}", endpoint);

        let inner = tokio::time::timeout(socket_timeout, connector.connect(endpoint))
            .await
            .map_err(|_| {
                ClientError::Connection(format!(
                    "no answer from {} within {:?}",
                    endpoint, socket_timeout
                ))
            })??;

        info!("Connected to broker at {}", endpoint);

        Ok(Self {
            inner,
            endpoint: endpoint.clone(),
        })
    }

    /// Opens a new channel
    pub async fn channel(&self) -> Result<Box<dyn Channel>> {
        self.inner.create_channel().await
    }

    pub fn endpoint(&self) -> &BrokerEndpoint {
        &self.endpoint
    }

    /// Closes the connection
    pub async fn close(self) -> Result<()> {
        debug!("Closing broker connection to {}", self.endpoint);
        self.inner.close().await
    }
}
