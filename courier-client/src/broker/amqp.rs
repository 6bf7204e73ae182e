//! RabbitMQ implementation of the broker traits, built on lapin

use async_trait::async_trait;
use futures::StreamExt;
use lapin::acker::Acker;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    QueueDeclareOptions, QueueDeleteOptions,
};
use lapin::protocol::{AMQPErrorKind, AMQPSoftError};
use lapin::types::FieldTable;
use lapin::{BasicProperties, ConnectionProperties};
use tracing::debug;
use uuid::Uuid;

use super::{Acknowledger, Channel, Connection, Connector, Delivery, QueueOptions, Subscription};
use crate::endpoint::BrokerEndpoint;
use crate::error::{ClientError, Result};

/// AMQP reply code for a normal shutdown
const REPLY_SUCCESS: u16 = 200;

/// Delivery mode marking a message as persistent
const PERSISTENT: u8 = 2;

/// Connects to RabbitMQ (or any AMQP 0-9-1 broker)
#[derive(Debug, Clone, Default)]
pub struct AmqpConnector;

impl AmqpConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for AmqpConnector {
    async fn connect(&self, endpoint: &BrokerEndpoint) -> Result<Box<dyn Connection>> {
        let connection =
            lapin::Connection::connect(endpoint.as_uri(), ConnectionProperties::default())
                .await
                .map_err(|e| ClientError::Connection(format!("{}: {}", endpoint, e)))?;

        Ok(Box::new(AmqpConnection { connection }))
    }
}

struct AmqpConnection {
    connection: lapin::Connection,
}

#[async_trait]
impl Connection for AmqpConnection {
    async fn create_channel(&self) -> Result<Box<dyn Channel>> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| ClientError::Channel(format!("failed to open channel: {}", e)))?;

        Ok(Box::new(AmqpChannel { channel }))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        if !self.connection.status().connected() {
            return Ok(());
        }
        self.connection
            .close(REPLY_SUCCESS, "OK")
            .await
            .map_err(|e| ClientError::Connection(format!("failed to close connection: {}", e)))
    }
}

struct AmqpChannel {
    channel: lapin::Channel,
}

#[async_trait]
impl Channel for AmqpChannel {
    async fn declare_queue(&self, name: &str, options: QueueOptions) -> Result<()> {
        self.channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    durable: options.durable,
                    auto_delete: options.auto_delete,
                    exclusive: options.exclusive,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| ClientError::Channel(format!("failed to declare '{}': {}", name, e)))?;

        Ok(())
    }

    async fn delete_queue(&self, name: &str) -> Result<()> {
        match self
            .channel
            .queue_delete(name, QueueDeleteOptions::default())
            .await
        {
            Ok(purged) => {
                debug!("Deleted queue '{}' ({} message(s) dropped)", name, purged);
                Ok(())
            }
            Err(e) if is_not_found(&e) => {
                debug!("Queue '{}' already gone", name);
                Ok(())
            }
            Err(e) => Err(ClientError::Channel(format!(
                "failed to delete '{}': {}",
                name, e
            ))),
        }
    }

    async fn publish(&self, queue: &str, body: &[u8], persistent: bool) -> Result<()> {
        let mut properties = BasicProperties::default().with_content_type("application/json".into());
        if persistent {
            properties = properties.with_delivery_mode(PERSISTENT);
        }

        self.channel
            .basic_publish("", queue, BasicPublishOptions::default(), body, properties)
            .await
            .map_err(|e| ClientError::publish(queue, e))?
            .await
            .map_err(|e| ClientError::publish(queue, e))?;

        Ok(())
    }

    async fn set_prefetch(&self, count: u16) -> Result<()> {
        self.channel
            .basic_qos(count, BasicQosOptions::default())
            .await
            .map_err(|e| ClientError::Channel(format!("failed to set prefetch: {}", e)))
    }

    async fn consume(&self, queue: &str) -> Result<Box<dyn Subscription>> {
        let tag = format!("courier-{}", Uuid::new_v4());
        let consumer = self
            .channel
            .basic_consume(
                queue,
                &tag,
                BasicConsumeOptions {
                    no_ack: false,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| ClientError::consume(queue, e))?;

        Ok(Box::new(AmqpSubscription {
            queue: queue.to_string(),
            consumer,
        }))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        if !self.channel.status().connected() {
            return Ok(());
        }
        self.channel
            .close(REPLY_SUCCESS, "OK")
            .await
            .map_err(|e| ClientError::Channel(format!("failed to close channel: {}", e)))
    }
}

struct AmqpSubscription {
    queue: String,
    consumer: lapin::Consumer,
}

#[async_trait]
impl Subscription for AmqpSubscription {
    async fn next_delivery(&mut self) -> Option<Result<Delivery>> {
        let next = self.consumer.next().await?;
        Some(
            next.map(|delivery| {
                Delivery::new(
                    delivery.data,
                    Box::new(AmqpAcker {
                        acker: delivery.acker,
                        queue: self.queue.clone(),
                    }),
                )
            })
            .map_err(|e| ClientError::consume(&self.queue, e)),
        )
    }
}

struct AmqpAcker {
    acker: Acker,
    queue: String,
}

#[async_trait]
impl Acknowledger for AmqpAcker {
    async fn ack(&self) -> Result<()> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| ClientError::consume(&self.queue, e))
    }
}

fn is_not_found(error: &lapin::Error) -> bool {
    matches!(
        error,
        lapin::Error::ProtocolError(e)
            if matches!(e.kind(), AMQPErrorKind::Soft(AMQPSoftError::NOTFOUND))
    )
}
