use std::fmt::Display;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use courier_core::{ErrorCode, ErrorTable, RemoteError};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::broker::{Channel, DEFAULT_EXCHANGE};
use crate::codec::{Codec, JsonCodec};
use crate::connection::BrokerConnection;
use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::message::{ConsumeMode, Deliveries, Delivery, Message};

pub const DEFAULT_PREFETCH: u16 = 1;
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Last-resort reply when even the error envelope cannot be serialized
const INTERNAL_ENVELOPE: &[u8] = br#"{"error":{"code":"INTERNAL","message":"internal error"}}"#;

/// What to do with a request whose reply could not be published
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PublishFailurePolicy {
    /// Ack anyway; the caller times out and the request is not retried
    #[default]
    Ack,
    /// Nack with requeue so the broker redelivers the request
    Requeue,
}

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Unacknowledged requests a consumer may hold
    pub prefetch: u16,
    /// Deadline for publishing one reply
    pub publish_timeout: Duration,
    pub publish_failure_policy: PublishFailurePolicy,
    /// How long shutdown waits for in-flight requests before aborting them
    pub shutdown_grace: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            prefetch: DEFAULT_PREFETCH,
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
            publish_failure_policy: PublishFailurePolicy::default(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

impl ListenerConfig {
    pub fn with_prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = prefetch;
        self
    }

    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    pub fn with_publish_failure_policy(mut self, policy: PublishFailurePolicy) -> Self {
        self.publish_failure_policy = policy;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

/// Turns a request body into a response body or a remote error
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, request: Vec<u8>) -> std::result::Result<Vec<u8>, RemoteError>;
}

/// Handler built from an async closure, see [`handler_fn`]
pub struct HandlerFn<F> {
    f: F,
}

/// Wrap an async closure as a [`Handler`]
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Vec<u8>, RemoteError>> + Send + 'static,
{
    HandlerFn { f }
}

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Vec<u8>, RemoteError>> + Send + 'static,
{
    async fn handle(&self, request: Vec<u8>) -> std::result::Result<Vec<u8>, RemoteError> {
        (self.f)(request).await
    }
}

/// Decodes the request, runs the domain function and encodes its outcome
struct TypedHandler<Req, Res, E, F> {
    errors: ErrorTable<E>,
    f: F,
    codec: JsonCodec,
    _types: PhantomData<fn(Req) -> Res>,
}

#[async_trait]
impl<Req, Res, E, F, Fut> Handler for TypedHandler<Req, Res, E, F>
where
    Req: DeserializeOwned + Send + 'static,
    Res: Serialize + Send + 'static,
    E: Display + Send + 'static,
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Res, E>> + Send + 'static,
{
    async fn handle(&self, request: Vec<u8>) -> std::result::Result<Vec<u8>, RemoteError> {
        let request: Req = match self.codec.decode(&request) {
            Ok(request) => request,
            Err(err) => {
                warn!(error = %err, "rejecting undecodable request");
                return Err(RemoteError::invalid_request(err.to_string()));
            }
        };

        match (self.f)(request).await {
            Ok(response) => self.codec.encode(&response).map_err(|err| {
                error!(error = %err, "failed to encode response");
                RemoteError::internal()
            }),
            Err(err) => {
                let remote = self.errors.encode(&err);
                if remote.code == ErrorCode::INTERNAL {
                    error!(error = %err, "handler failed");
                } else {
                    debug!(code = %remote.code, "handler returned domain error");
                }
                Err(remote)
            }
        }
    }
}

/// Serves RPC queues and fanout subscriptions over one channel
///
/// Every queue gets its own consumer task. Requests on one queue are handled
/// one at a time in delivery order and are acked only after the reply has
/// been published.
pub struct Listener {
    channel: Arc<dyn Channel>,
    config: ListenerConfig,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    codec: JsonCodec,
}

impl Listener {
    pub async fn new(connection: &BrokerConnection, config: ListenerConfig) -> Result<Self> {
        let channel = connection.channel().await?;
        channel.set_prefetch(config.prefetch).await?;
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            channel,
            config,
            shutdown,
            tasks: Mutex::new(Vec::new()),
            codec: JsonCodec,
        })
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    /// Declare `queue` and answer every request on it with `handler`
    pub async fn serve<H: Handler>(&self, queue: &str, handler: H) -> Result<()> {
        self.ensure_running()?;
        self.channel.declare_queue(queue).await?;
        let deliveries = self.channel.consume(queue, ConsumeMode::Manual).await?;

        let worker = Worker {
            queue: queue.to_string(),
            channel: Arc::clone(&self.channel),
            handler: Arc::new(handler),
            config: self.config.clone(),
        };
        let task = tokio::spawn(worker.run(deliveries, self.shutdown.subscribe()));
        self.track(task);

        info!(queue, prefetch = self.config.prefetch, "awaiting RPC requests");
        Ok(())
    }

    /// Serve `queue` with a typed domain function
    ///
    /// Undecodable requests are answered with `INVALID_REQUEST`. Domain
    /// errors are encoded through `errors`; anything it does not know
    /// becomes `INTERNAL`.
    pub async fn serve_typed<Req, Res, E, F, Fut>(
        &self,
        queue: &str,
        errors: ErrorTable<E>,
        f: F,
    ) -> Result<()>
    where
        Req: DeserializeOwned + Send + 'static,
        Res: Serialize + Send + 'static,
        E: Display + Send + 'static,
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Res, E>> + Send + 'static,
    {
        let handler = TypedHandler {
            errors,
            f,
            codec: self.codec,
            _types: PhantomData,
        };
        self.serve(queue, handler).await
    }

    /// Receive every event published to the fanout `exchange`
    ///
    /// Events go to a private auto-ack queue; no reply is sent and events
    /// that fail to decode are logged and skipped.
    pub async fn subscribe<T, F, Fut>(&self, exchange: &str, f: F) -> Result<()>
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.ensure_running()?;
        self.channel.declare_fanout(exchange).await?;
        let queue = self.channel.declare_exclusive_queue().await?;
        self.channel.bind_queue(&queue, exchange).await?;
        let mut deliveries = self.channel.consume(&queue, ConsumeMode::AutoAck).await?;

        let mut shutdown = self.shutdown.subscribe();
        let codec = self.codec;
        let name = exchange.to_string();
        let task = tokio::spawn(async move {
            loop {
                let delivery = tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    next = deliveries.recv() => match next {
                        Some(delivery) => delivery,
                        None => break,
                    },
                };
                match codec.decode::<T>(&delivery.message.body) {
                    Ok(event) => f(event).await,
                    Err(err) => warn!(exchange = %name, error = %err, "skipping undecodable event"),
                }
            }
            debug!(exchange = %name, "subscription stopped");
        });
        self.track(task);

        info!(exchange, queue = %queue, "subscribed to events");
        Ok(())
    }

    /// Number of running consumer tasks
    pub fn active_consumers(&self) -> usize {
        self.lock_tasks().iter().filter(|t| !t.is_finished()).count()
    }

    /// Stop taking new requests, let in-flight ones finish, then close the
    /// channel
    ///
    /// Consumers still busy after `shutdown_grace` are aborted; their
    /// unsettled requests return to the queue when the channel closes.
    /// Requests still queued stay in the broker for the next consumer.
    pub async fn shutdown(&self) {
        if self.shutdown.send_replace(true) {
            return;
        }
        let tasks = std::mem::take(&mut *self.lock_tasks());
        let deadline = tokio::time::Instant::now() + self.config.shutdown_grace;
        for mut task in tasks {
            match tokio::time::timeout_at(deadline, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(error = %err, "consumer task ended abnormally"),
                Err(_) => {
                    warn!(
                        grace = ?self.config.shutdown_grace,
                        "consumer did not stop in time, aborting"
                    );
                    task.abort();
                }
            }
        }
        if let Err(err) = self.channel.close().await {
            warn!(error = %err, "failed to close listener channel");
        }
        info!("listener stopped");
    }

    fn ensure_running(&self) -> Result<()> {
        if *self.shutdown.borrow() {
            Err(Error::ConnectionClosed)
        } else {
            Ok(())
        }
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn track(&self, task: JoinHandle<()>) {
        self.lock_tasks().push(task);
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        for task in self.lock_tasks().iter() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("config", &self.config)
            .field("active_consumers", &self.active_consumers())
            .finish()
    }
}

/// Consumer loop for one RPC queue
struct Worker {
    queue: String,
    channel: Arc<dyn Channel>,
    handler: Arc<dyn Handler>,
    config: ListenerConfig,
}

impl Worker {
    async fn run(self, mut deliveries: Deliveries, mut shutdown: watch::Receiver<bool>) {
        while !*shutdown.borrow() {
            let delivery = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                next = deliveries.recv() => match next {
                    Some(delivery) => delivery,
                    None => break,
                },
            };
            self.process(delivery).await;
        }
        debug!(queue = %self.queue, "consumer stopped");
    }

    async fn process(&self, mut delivery: Delivery) {
        let correlation_id = delivery.correlation_id().unwrap_or("-").to_string();
        let Some(reply_to) = delivery.reply_to().map(str::to_string) else {
            warn!(queue = %self.queue, correlation_id = %correlation_id, "dropping request without reply-to");
            self.settle(delivery, true).await;
            return;
        };
        debug!(queue = %self.queue, correlation_id = %correlation_id, "handling request");

        let request = std::mem::take(&mut delivery.message.body);
        let handler = Arc::clone(&self.handler);
        let outcome = match tokio::spawn(async move { handler.handle(request).await }).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(queue = %self.queue, correlation_id = %correlation_id, error = %err, "handler panicked");
                Err(RemoteError::internal())
            }
        };

        let mut reply = Message::new(self.envelope(outcome)).with_content_type(JsonCodec.content_type());
        if let Some(id) = delivery.correlation_id() {
            reply = reply.with_correlation_id(id);
        }

        let published = match tokio::time::timeout(
            self.config.publish_timeout,
            self.channel.publish(DEFAULT_EXCHANGE, &reply_to, reply),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::unavailable(format!(
                "reply publish timed out after {:?}",
                self.config.publish_timeout
            ))),
        };

        let ack = match published {
            Ok(()) => true,
            Err(err) => {
                error!(
                    queue = %self.queue,
                    correlation_id = %correlation_id,
                    error = %err,
                    policy = ?self.config.publish_failure_policy,
                    "failed to publish reply"
                );
                self.config.publish_failure_policy == PublishFailurePolicy::Ack
            }
        };
        self.settle(delivery, ack).await;
    }

    fn envelope(&self, outcome: std::result::Result<Vec<u8>, RemoteError>) -> Vec<u8> {
        let envelope = match outcome {
            Ok(data) => Envelope::success(data).unwrap_or_else(|err| {
                error!(queue = %self.queue, error = %err, "handler produced a non-JSON response");
                Envelope::failure(RemoteError::internal())
            }),
            Err(remote) => Envelope::failure(remote),
        };
        envelope.to_vec().unwrap_or_else(|err| {
            error!(queue = %self.queue, error = %err, "failed to encode envelope");
            INTERNAL_ENVELOPE.to_vec()
        })
    }

    async fn settle(&self, delivery: Delivery, ack: bool) {
        let result = if ack {
            delivery.ack().await
        } else {
            delivery.nack(true).await
        };
        if let Err(err) = result {
            warn!(queue = %self.queue, error = %err, "failed to settle delivery");
        }
    }
}
