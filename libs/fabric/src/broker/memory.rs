use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::broker::{Channel, Connection, Connector};
use crate::error::{Error, Result};
use crate::message::{Acker, ConsumeMode, Deliveries, Delivery, Message};

/// Address scheme accepted by [`MemoryBroker`]
pub const MEMORY_SCHEME: &str = "memory://";

/// In-process broker with AMQP-like routing
///
/// Supports the default exchange, fanout exchanges, broker-named exclusive
/// queues, per-consumer prefetch with ack/nack/requeue and round-robin
/// dispatch across consumers of one queue. Unacknowledged deliveries return
/// to the head of their queue when the consumer's channel closes.
///
/// Clones share the same broker.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

struct Inner {
    available: AtomicBool,
    ids: AtomicU64,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    queues: HashMap<String, Queue>,
    exchanges: HashMap<String, Vec<String>>,
}

#[derive(Default)]
struct Queue {
    ready: VecDeque<Message>,
    consumers: Vec<Consumer>,
    unacked: HashMap<u64, Unacked>,
    next_tag: u64,
    cursor: usize,
    owner: Option<u64>,
}

struct Consumer {
    id: u64,
    channel: u64,
    mode: ConsumeMode,
    prefetch: u16,
    in_flight: usize,
    tx: mpsc::UnboundedSender<Delivery>,
}

struct Unacked {
    consumer: u64,
    message: Message,
}

impl Consumer {
    fn can_take(&self) -> bool {
        if self.tx.is_closed() {
            return false;
        }
        match self.mode {
            ConsumeMode::AutoAck => true,
            ConsumeMode::Manual => self.prefetch == 0 || self.in_flight < usize::from(self.prefetch),
        }
    }
}

impl Queue {
    fn owned_by(owner: u64) -> Self {
        Self {
            owner: Some(owner),
            ..Self::default()
        }
    }

    fn next_consumer(&mut self) -> Option<usize> {
        let count = self.consumers.len();
        for offset in 0..count {
            let index = (self.cursor + offset) % count;
            if self.consumers[index].can_take() {
                self.cursor = index + 1;
                return Some(index);
            }
        }
        None
    }

    /// Drop a consumer and return its unacknowledged messages to the head
    /// of the queue in delivery order
    fn remove_consumer(&mut self, consumer: u64) {
        self.consumers.retain(|c| c.id != consumer);

        let mut tags: Vec<u64> = self
            .unacked
            .iter()
            .filter(|(_, entry)| entry.consumer == consumer)
            .map(|(tag, _)| *tag)
            .collect();
        tags.sort_unstable();

        for tag in tags.into_iter().rev() {
            if let Some(entry) = self.unacked.remove(&tag) {
                self.ready.push_front(entry.message);
            }
        }
    }

    fn prune_closed(&mut self) {
        let closed: Vec<u64> = self
            .consumers
            .iter()
            .filter(|c| c.tx.is_closed())
            .map(|c| c.id)
            .collect();
        for id in closed {
            self.remove_consumer(id);
        }
    }
}

enum Settle {
    Ack,
    Reject { requeue: bool },
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_id(&self) -> u64 {
        self.ids.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::BrokerUnavailable("memory broker is offline".to_string()))
        }
    }

    fn dispatch(self: &Arc<Self>, name: &str, queue: &mut Queue) {
        queue.prune_closed();

        while !queue.ready.is_empty() {
            let Some(index) = queue.next_consumer() else {
                break;
            };
            let (consumer, mode, tx) = {
                let c = &queue.consumers[index];
                (c.id, c.mode, c.tx.clone())
            };
            let Some(message) = queue.ready.pop_front() else {
                break;
            };

            let delivery = match mode {
                ConsumeMode::AutoAck => Delivery::auto_acked(message),
                ConsumeMode::Manual => {
                    let tag = queue.next_tag;
                    queue.next_tag += 1;
                    queue.unacked.insert(
                        tag,
                        Unacked {
                            consumer,
                            message: message.clone(),
                        },
                    );
                    queue.consumers[index].in_flight += 1;
                    let acker = MemoryAcker {
                        broker: Arc::clone(self),
                        queue: name.to_string(),
                        tag,
                    };
                    Delivery::new(message, Box::new(acker))
                }
            };

            trace!(queue = name, consumer, "dispatching delivery");
            if let Err(mpsc::error::SendError(returned)) = tx.send(delivery) {
                // Receiver dropped between the capacity check and the send
                queue.remove_consumer(consumer);
                if mode == ConsumeMode::AutoAck {
                    queue.ready.push_front(returned.message);
                }
            }
        }
    }

    fn settle(self: &Arc<Self>, name: &str, tag: u64, settle: Settle) -> Result<()> {
        let mut state = self.state();
        let queue = state
            .queues
            .get_mut(name)
            .ok_or(Error::ConnectionClosed)?;
        let entry = queue.unacked.remove(&tag).ok_or_else(|| {
            Error::Custom(format!("unknown delivery tag {tag} on queue '{name}'"))
        })?;

        if let Some(consumer) = queue.consumers.iter_mut().find(|c| c.id == entry.consumer) {
            consumer.in_flight = consumer.in_flight.saturating_sub(1);
        }
        if let Settle::Reject { requeue: true } = settle {
            queue.ready.push_front(entry.message);
        }

        self.dispatch(name, queue);
        Ok(())
    }

    fn publish(self: &Arc<Self>, exchange: &str, routing_key: &str, message: Message) -> Result<()> {
        self.ensure_available()?;
        let mut state = self.state();

        let targets = if exchange.is_empty() {
            vec![routing_key.to_string()]
        } else {
            state
                .exchanges
                .get(exchange)
                .cloned()
                .ok_or_else(|| Error::Custom(format!("no exchange '{exchange}'")))?
        };

        for name in targets {
            match state.queues.get_mut(&name) {
                Some(queue) => {
                    queue.ready.push_back(message.clone());
                    self.dispatch(&name, queue);
                }
                None => debug!(queue = %name, "dropping unroutable message"),
            }
        }
        Ok(())
    }

    fn close_channel(self: &Arc<Self>, channel: u64) {
        let mut state = self.state();
        let names: Vec<String> = state.queues.keys().cloned().collect();

        for name in names {
            let owned = match state.queues.get_mut(&name) {
                Some(queue) => {
                    let consumers: Vec<u64> = queue
                        .consumers
                        .iter()
                        .filter(|c| c.channel == channel)
                        .map(|c| c.id)
                        .collect();
                    for id in consumers {
                        queue.remove_consumer(id);
                    }
                    let owned = queue.owner == Some(channel);
                    if !owned {
                        self.dispatch(&name, queue);
                    }
                    owned
                }
                None => false,
            };

            if owned {
                state.queues.remove(&name);
                for bound in state.exchanges.values_mut() {
                    bound.retain(|q| q != &name);
                }
                debug!(queue = %name, "deleted exclusive queue");
            }
        }
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                available: AtomicBool::new(true),
                ids: AtomicU64::new(0),
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Take the broker offline or bring it back
    ///
    /// While offline, `connect`, `create_channel` and `publish` fail with
    /// `BrokerUnavailable`. Existing consumers keep their deliveries.
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.inner.available.load(Ordering::SeqCst)
    }

    /// Messages waiting in `queue`, or `None` if it does not exist
    pub fn queue_depth(&self, queue: &str) -> Option<usize> {
        self.inner.state().queues.get(queue).map(|q| q.ready.len())
    }

    /// Deliveries handed out from `queue` and not yet settled
    pub fn unacked_count(&self, queue: &str) -> Option<usize> {
        self.inner.state().queues.get(queue).map(|q| q.unacked.len())
    }

    pub fn consumer_count(&self, queue: &str) -> Option<usize> {
        self.inner
            .state()
            .queues
            .get(queue)
            .map(|q| q.consumers.iter().filter(|c| !c.tx.is_closed()).count())
    }

    pub fn has_queue(&self, queue: &str) -> bool {
        self.inner.state().queues.contains_key(queue)
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Connector for MemoryBroker {
    async fn connect(&self, address: &str) -> Result<Arc<dyn Connection>> {
        if !address.starts_with(MEMORY_SCHEME) {
            return Err(Error::BrokerUnavailable(format!(
                "unsupported address '{address}', expected {MEMORY_SCHEME}<name>"
            )));
        }
        self.inner.ensure_available()?;

        debug!(address, "connected to memory broker");
        Ok(Arc::new(MemoryConnection {
            broker: Arc::clone(&self.inner),
            channels: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemoryConnection {
    broker: Arc<Inner>,
    channels: Mutex<Vec<Arc<MemoryChannel>>>,
    closed: AtomicBool,
}

#[async_trait::async_trait]
impl Connection for MemoryConnection {
    async fn create_channel(&self) -> Result<Arc<dyn Channel>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ConnectionClosed);
        }
        self.broker.ensure_available()?;

        let channel = Arc::new(MemoryChannel {
            id: self.broker.next_id(),
            broker: Arc::clone(&self.broker),
            prefetch: AtomicU16::new(0),
            closed: AtomicBool::new(false),
        });
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&channel));
        Ok(channel)
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let channels =
            std::mem::take(&mut *self.channels.lock().unwrap_or_else(PoisonError::into_inner));
        for channel in channels {
            channel.shut();
        }
        Ok(())
    }
}

struct MemoryChannel {
    id: u64,
    broker: Arc<Inner>,
    prefetch: AtomicU16,
    closed: AtomicBool,
}

impl MemoryChannel {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(Error::ConnectionClosed)
        } else {
            Ok(())
        }
    }

    fn shut(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.broker.close_channel(self.id);
        }
    }
}

#[async_trait::async_trait]
impl Channel for MemoryChannel {
    async fn declare_queue(&self, name: &str) -> Result<()> {
        self.ensure_open()?;
        self.broker
            .state()
            .queues
            .entry(name.to_string())
            .or_default();
        Ok(())
    }

    async fn declare_exclusive_queue(&self) -> Result<String> {
        self.ensure_open()?;
        let name = format!("amq.gen-{}", uuid::Uuid::new_v4().simple());
        self.broker
            .state()
            .queues
            .insert(name.clone(), Queue::owned_by(self.id));
        Ok(name)
    }

    async fn declare_fanout(&self, exchange: &str) -> Result<()> {
        self.ensure_open()?;
        if exchange.is_empty() {
            return Err(Error::Custom("the default exchange cannot be redeclared".into()));
        }
        self.broker
            .state()
            .exchanges
            .entry(exchange.to_string())
            .or_default();
        Ok(())
    }

    async fn bind_queue(&self, queue: &str, exchange: &str) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.broker.state();
        if !state.queues.contains_key(queue) {
            return Err(Error::Custom(format!("no queue '{queue}'")));
        }
        let bound = state
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| Error::Custom(format!("no exchange '{exchange}'")))?;
        if !bound.iter().any(|q| q == queue) {
            bound.push(queue.to_string());
        }
        Ok(())
    }

    async fn set_prefetch(&self, count: u16) -> Result<()> {
        self.ensure_open()?;
        self.prefetch.store(count, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(&self, exchange: &str, routing_key: &str, message: Message) -> Result<()> {
        self.ensure_open()?;
        self.broker.publish(exchange, routing_key, message)
    }

    async fn consume(&self, queue: &str, mode: ConsumeMode) -> Result<Deliveries> {
        self.ensure_open()?;
        let (tx, rx) = mpsc::unbounded_channel();

        let mut state = self.broker.state();
        let target = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| Error::Custom(format!("no queue '{queue}'")))?;
        target.consumers.push(Consumer {
            id: self.broker.next_id(),
            channel: self.id,
            mode,
            prefetch: self.prefetch.load(Ordering::SeqCst),
            in_flight: 0,
            tx,
        });
        self.broker.dispatch(queue, target);

        Ok(rx)
    }

    async fn close(&self) -> Result<()> {
        self.shut();
        Ok(())
    }
}

struct MemoryAcker {
    broker: Arc<Inner>,
    queue: String,
    tag: u64,
}

#[async_trait::async_trait]
impl Acker for MemoryAcker {
    async fn ack(&self) -> Result<()> {
        self.broker.settle(&self.queue, self.tag, Settle::Ack)
    }

    async fn nack(&self, requeue: bool) -> Result<()> {
        self.broker
            .settle(&self.queue, self.tag, Settle::Reject { requeue })
    }
}
