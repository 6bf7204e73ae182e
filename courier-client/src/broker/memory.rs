//! In-process broker
//!
//! A small AMQP-like broker living in memory: named queues, exclusive and
//! auto-delete semantics, manual acknowledgment with redelivery of
//! unacknowledged messages. Used by tests and local runs where no RabbitMQ
//! instance is available. Every handle shares the same state, so a
//! dispatcher and a worker can talk through clones of one `MemoryBroker`.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::debug;

use super::{Acknowledger, Channel, Connection, Connector, Delivery, QueueOptions, Subscription};
use crate::endpoint::BrokerEndpoint;
use crate::error::{ClientError, Result};

/// Shared handle to an in-memory broker
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, MemoryQueue>,
    delete_requests: HashMap<String, usize>,
    next_connection_id: u64,
    next_queue_id: u64,
    open_connections: usize,
    open_channels: usize,
    refuse_connections: bool,
    stall_connections: bool,
    fail_publishes: bool,
    stall_publishes: bool,
}

struct MemoryQueue {
    /// Distinguishes a re-declared queue from an earlier one with the same name
    id: u64,
    options: QueueOptions,
    owner: Option<u64>,
    ready: VecDeque<Vec<u8>>,
    unacked: HashMap<u64, Vec<u8>>,
    next_tag: u64,
    consumers: usize,
    notify: Arc<Notify>,
}

impl MemoryQueue {
    fn new(id: u64, options: QueueOptions, owner: Option<u64>) -> Self {
        Self {
            id,
            options,
            owner,
            ready: VecDeque::new(),
            unacked: HashMap::new(),
            next_tag: 0,
            consumers: 0,
            notify: Arc::new(Notify::new()),
        }
    }

    /// Wakes every consumer so it can observe the queue being gone
    fn wake_all(&self) {
        self.notify.notify_waiters();
        self.notify.notify_one();
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // =============================================================================
    // Fault injection
    // =============================================================================

    /// Makes subsequent connection attempts fail immediately
    pub fn refuse_connections(&self, refuse: bool) {
        self.lock().refuse_connections = refuse;
    }

    /// Makes subsequent connection attempts never complete
    pub fn stall_connections(&self, stall: bool) {
        self.lock().stall_connections = stall;
    }

    /// Makes subsequent publishes fail
    pub fn fail_publishes(&self, fail: bool) {
        self.lock().fail_publishes = fail;
    }

    /// Makes subsequent publishes never complete, like a broker blocking
    /// publishers on a resource alarm
    pub fn stall_publishes(&self, stall: bool) {
        self.lock().stall_publishes = stall;
    }

    // =============================================================================
    // Inspection
    // =============================================================================

    pub fn queue_exists(&self, name: &str) -> bool {
        self.lock().queues.contains_key(name)
    }

    /// Number of explicit delete requests issued for a queue name
    pub fn delete_requests(&self, name: &str) -> usize {
        self.lock().delete_requests.get(name).copied().unwrap_or(0)
    }

    /// Messages waiting to be delivered
    pub fn ready_count(&self, name: &str) -> usize {
        self.lock().queues.get(name).map_or(0, |q| q.ready.len())
    }

    /// Messages delivered but not yet acknowledged
    pub fn unacked_count(&self, name: &str) -> usize {
        self.lock().queues.get(name).map_or(0, |q| q.unacked.len())
    }

    pub fn open_connections(&self) -> usize {
        self.lock().open_connections
    }

    pub fn open_channels(&self) -> usize {
        self.lock().open_channels
    }

    /// Removes and returns the oldest ready message of a queue
    pub fn take_message(&self, name: &str) -> Option<Vec<u8>> {
        self.lock().queues.get_mut(name)?.ready.pop_front()
    }

    /// Enqueues a raw body, bypassing channels; returns false if the queue is absent
    pub fn inject(&self, name: &str, body: impl Into<Vec<u8>>) -> bool {
        let mut state = self.lock();
        match state.queues.get_mut(name) {
            Some(queue) => {
                queue.ready.push_back(body.into());
                queue.notify.notify_one();
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl Connector for MemoryBroker {
    async fn connect(&self, endpoint: &BrokerEndpoint) -> Result<Box<dyn Connection>> {
        let stall = {
            let state = self.lock();
            if state.refuse_connections {
                return Err(ClientError::Connection(format!(
                    "{}: connection refused",
                    endpoint
                )));
            }
            state.stall_connections
        };

        if stall {
            std::future::pending::<()>().await;
        }

        let mut state = self.lock();
        state.next_connection_id += 1;
        state.open_connections += 1;
        let id = state.next_connection_id;
        debug!("Memory broker: connection {} opened", id);

        Ok(Box::new(MemoryConnection {
            broker: self.clone(),
            id,
        }))
    }
}

struct MemoryConnection {
    broker: MemoryBroker,
    id: u64,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn create_channel(&self) -> Result<Box<dyn Channel>> {
        self.broker.lock().open_channels += 1;
        Ok(Box::new(MemoryChannel {
            broker: self.broker.clone(),
            connection_id: self.id,
        }))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let mut state = self.broker.lock();
        state.open_connections -= 1;

        let owned: Vec<String> = state
            .queues
            .iter()
            .filter(|(_, q)| q.owner == Some(self.id))
            .map(|(name, _)| name.clone())
            .collect();
        for name in owned {
            if let Some(queue) = state.queues.remove(&name) {
                debug!("Memory broker: exclusive queue '{}' removed with its connection", name);
                queue.wake_all();
            }
        }

        Ok(())
    }
}

struct MemoryChannel {
    broker: MemoryBroker,
    connection_id: u64,
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn declare_queue(&self, name: &str, options: QueueOptions) -> Result<()> {
        let mut state = self.broker.lock();

        if let Some(queue) = state.queues.get(name) {
            if queue.owner.is_some() && queue.owner != Some(self.connection_id) {
                return Err(ClientError::Channel(format!(
                    "queue '{}' is exclusive to another connection",
                    name
                )));
            }
            if queue.options != options {
                return Err(ClientError::Channel(format!(
                    "queue '{}' already declared with different flags",
                    name
                )));
            }
            return Ok(());
        }

        let owner = options.exclusive.then_some(self.connection_id);
        state.next_queue_id += 1;
        let id = state.next_queue_id;
        state
            .queues
            .insert(name.to_string(), MemoryQueue::new(id, options, owner));
        Ok(())
    }

    async fn delete_queue(&self, name: &str) -> Result<()> {
        let mut state = self.broker.lock();
        *state.delete_requests.entry(name.to_string()).or_default() += 1;

        if let Some(queue) = state.queues.remove(name) {
            queue.wake_all();
        }
        Ok(())
    }

    async fn publish(&self, queue: &str, body: &[u8], _persistent: bool) -> Result<()> {
        let stall = self.broker.lock().stall_publishes;
        if stall {
            std::future::pending::<()>().await;
        }

        let mut state = self.broker.lock();
        if state.fail_publishes {
            return Err(ClientError::publish(queue, "channel closed by broker"));
        }

        match state.queues.get_mut(queue) {
            Some(q) => {
                q.ready.push_back(body.to_vec());
                q.notify.notify_one();
            }
            // Unroutable messages are dropped, as with the AMQP default exchange
            None => debug!("Memory broker: dropped message for absent queue '{}'", queue),
        }
        Ok(())
    }

    async fn set_prefetch(&self, _count: u16) -> Result<()> {
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<Box<dyn Subscription>> {
        let mut state = self.broker.lock();
        let q = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| ClientError::consume(queue, "no such queue"))?;
        q.consumers += 1;

        Ok(Box::new(MemorySubscription {
            broker: self.broker.clone(),
            queue: queue.to_string(),
            queue_id: q.id,
            delivered: Vec::new(),
        }))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.broker.lock().open_channels -= 1;
        Ok(())
    }
}

struct MemorySubscription {
    broker: MemoryBroker,
    queue: String,
    queue_id: u64,
    delivered: Vec<u64>,
}

impl MemorySubscription {
    /// The subscribed queue, unless it has been deleted (and maybe re-declared)
    fn queue<'a>(&self, state: &'a mut BrokerState) -> Option<&'a mut MemoryQueue> {
        state
            .queues
            .get_mut(&self.queue)
            .filter(|q| q.id == self.queue_id)
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next_delivery(&mut self) -> Option<Result<Delivery>> {
        loop {
            let notify = {
                let mut state = self.broker.lock();
                let queue = self.queue(&mut state)?;

                if let Some(body) = queue.ready.pop_front() {
                    queue.next_tag += 1;
                    let tag = queue.next_tag;
                    queue.unacked.insert(tag, body.clone());
                    self.delivered.push(tag);

                    return Some(Ok(Delivery::new(
                        body,
                        Box::new(MemoryAcker {
                            broker: self.broker.clone(),
                            queue: self.queue.clone(),
                            queue_id: self.queue_id,
                            tag,
                        }),
                    )));
                }

                Arc::clone(&queue.notify)
            };

            notify.notified().await;
        }
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        let mut state = self.broker.lock();
        let Some(queue) = self.queue(&mut state) else {
            return;
        };

        // Unacknowledged deliveries go back to the head of the queue
        for tag in self.delivered.iter().rev() {
            if let Some(body) = queue.unacked.remove(tag) {
                queue.ready.push_front(body);
            }
        }
        queue.consumers -= 1;

        if queue.options.auto_delete && queue.consumers == 0 {
            debug!("Memory broker: auto-deleting queue '{}'", self.queue);
            if let Some(queue) = state.queues.remove(&self.queue) {
                queue.wake_all();
            }
        } else if !queue.ready.is_empty() {
            queue.notify.notify_one();
        }
    }
}

struct MemoryAcker {
    broker: MemoryBroker,
    queue: String,
    queue_id: u64,
    tag: u64,
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> Result<()> {
        let mut state = self.broker.lock();
        state
            .queues
            .get_mut(&self.queue)
            .filter(|q| q.id == self.queue_id)
            .and_then(|q| q.unacked.remove(&self.tag))
            .map(|_| ())
            .ok_or_else(|| ClientError::consume(&self.queue, format!("unknown delivery tag {}", self.tag)))
    }
}
