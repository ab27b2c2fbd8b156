use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use courier_core::ErrorTable;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broker::{Channel, DEFAULT_EXCHANGE};
use crate::codec::{Codec, JsonCodec};
use crate::connection::BrokerConnection;
use crate::envelope::Envelope;
use crate::error::{CallError, Error, Result};
use crate::message::{ConsumeMode, Deliveries, Message};

/// Default time a caller waits for a reply
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Deadline used by [`Client::invoke`]
    pub call_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

impl ClientConfig {
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

struct PendingCall {
    reply: oneshot::Sender<Vec<u8>>,
    created_at: Instant,
}

/// Outstanding calls keyed by correlation id
#[derive(Default)]
struct PendingCalls {
    calls: Mutex<HashMap<String, PendingCall>>,
}

impl PendingCalls {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingCall>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(self: &Arc<Self>, id: String) -> Result<(PendingGuard, oneshot::Receiver<Vec<u8>>)> {
        let (tx, rx) = oneshot::channel();
        let mut calls = self.lock();
        if calls.contains_key(&id) {
            return Err(Error::Custom(format!("correlation id {id} already in flight")));
        }
        calls.insert(
            id.clone(),
            PendingCall {
                reply: tx,
                created_at: Instant::now(),
            },
        );
        let guard = PendingGuard {
            calls: Arc::clone(self),
            id,
        };
        Ok((guard, rx))
    }

    /// Hand a reply to its waiter; false when nobody is waiting any more
    fn resolve(&self, id: &str, body: Vec<u8>) -> bool {
        let Some(call) = self.lock().remove(id) else {
            return false;
        };
        debug!(
            correlation_id = id,
            elapsed_ms = call.created_at.elapsed().as_millis() as u64,
            "reply received"
        );
        call.reply.send(body).is_ok()
    }

    fn remove(&self, id: &str) {
        self.lock().remove(id);
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    /// Drop every waiter; their receivers observe a closed channel
    fn clear(&self) {
        let drained = std::mem::take(&mut *self.lock());
        if !drained.is_empty() {
            debug!(count = drained.len(), "abandoning pending calls");
        }
    }
}

/// Deregisters a call when the waiting future completes, times out, or is
/// dropped
struct PendingGuard {
    calls: Arc<PendingCalls>,
    id: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.calls.remove(&self.id);
    }
}

/// RPC caller multiplexing many in-flight calls over one reply queue
///
/// Each client owns a channel and an exclusive reply queue. A single
/// dispatcher task routes replies to callers by correlation id, so one
/// client can be shared across tasks (wrap it in an `Arc`).
pub struct Client {
    channel: Arc<dyn Channel>,
    reply_queue: String,
    pending: Arc<PendingCalls>,
    dispatcher: JoinHandle<()>,
    config: ClientConfig,
    codec: JsonCodec,
    closed: AtomicBool,
}

impl Client {
    /// Open a channel, declare the reply queue and start the dispatcher
    pub async fn new(connection: &BrokerConnection, config: ClientConfig) -> Result<Self> {
        let channel = connection.channel().await?;
        let reply_queue = channel.declare_exclusive_queue().await?;
        let replies = channel.consume(&reply_queue, ConsumeMode::AutoAck).await?;

        let pending = Arc::new(PendingCalls::default());
        let dispatcher = tokio::spawn(dispatch_replies(replies, Arc::clone(&pending)));

        info!(reply_queue = %reply_queue, "rpc client ready");
        Ok(Self {
            channel,
            reply_queue,
            pending,
            dispatcher,
            config,
            codec: JsonCodec,
            closed: AtomicBool::new(false),
        })
    }

    pub fn reply_queue(&self) -> &str {
        &self.reply_queue
    }

    pub fn call_timeout(&self) -> Duration {
        self.config.call_timeout
    }

    /// Calls currently waiting for a reply
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// Send `body` to the queue named `method` and wait for its reply
    ///
    /// Returns the envelope's payload bytes exactly as the handler produced
    /// them. An error envelope surfaces as [`Error::Remote`].
    pub async fn call(&self, method: &str, body: Vec<u8>, timeout: Duration) -> Result<Vec<u8>> {
        let reply = self.round_trip(method, body, timeout).await?;
        Envelope::from_slice(&reply)?
            .into_result()
            .map_err(Error::Remote)
    }

    /// Typed call with the configured deadline
    ///
    /// Error envelopes whose code `errors` knows come back as
    /// [`CallError::Domain`]; anything else is a [`CallError::Rpc`].
    pub async fn invoke<Req, Res, E>(
        &self,
        method: &str,
        request: &Req,
        errors: &ErrorTable<E>,
    ) -> std::result::Result<Res, CallError<E>>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        self.invoke_with_timeout(method, request, errors, self.config.call_timeout)
            .await
    }

    pub async fn invoke_with_timeout<Req, Res, E>(
        &self,
        method: &str,
        request: &Req,
        errors: &ErrorTable<E>,
        timeout: Duration,
    ) -> std::result::Result<Res, CallError<E>>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let body = self.codec.encode(request)?;
        match self.call(method, body, timeout).await {
            Ok(data) => Ok(self.codec.decode(&data)?),
            Err(Error::Remote(remote)) => match errors.decode(&remote) {
                Some(err) => Err(CallError::Domain(err)),
                None => {
                    warn!(method, code = %remote.code, message = %remote.message, "unmapped error code");
                    Err(CallError::Rpc(Error::Remote(remote)))
                }
            },
            Err(err) => Err(err.into()),
        }
    }

    /// Fire-and-forget publish to a fanout exchange, declaring it first
    pub async fn broadcast<T: Serialize + ?Sized>(&self, exchange: &str, event: &T) -> Result<()> {
        self.ensure_open()?;
        let body = self.codec.encode(event)?;
        self.channel.declare_fanout(exchange).await?;
        let message = Message::new(body).with_content_type(self.codec.content_type());
        self.channel.publish(exchange, "", message).await?;
        debug!(exchange, "event published");
        Ok(())
    }

    /// Stop receiving replies; waiting callers fail with `ConnectionClosed`
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.dispatcher.abort();
        self.pending.clear();
        if let Err(err) = self.channel.close().await {
            warn!(error = %err, "failed to close client channel");
        }
        info!(reply_queue = %self.reply_queue, "rpc client stopped");
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(Error::ConnectionClosed)
        } else {
            Ok(())
        }
    }

    async fn round_trip(&self, method: &str, body: Vec<u8>, timeout: Duration) -> Result<Vec<u8>> {
        self.ensure_open()?;

        let correlation_id = Uuid::new_v4().to_string();
        // Registered before publishing so a fast reply always finds its waiter
        let (_guard, reply) = self.pending.register(correlation_id.clone())?;

        let message = Message::new(body)
            .with_correlation_id(correlation_id.as_str())
            .with_reply_to(self.reply_queue.as_str())
            .with_content_type(self.codec.content_type());

        debug!(method, correlation_id = %correlation_id, "sending request");
        if let Err(err) = self.channel.publish(DEFAULT_EXCHANGE, method, message).await {
            warn!(method, correlation_id = %correlation_id, error = %err, "failed to publish request");
            return Err(match err {
                Error::BrokerUnavailable(_) | Error::ConnectionClosed => err,
                other => Error::unavailable(other),
            });
        }

        match tokio::time::timeout(timeout, reply).await {
            Ok(Ok(body)) => Ok(body),
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                warn!(method, correlation_id = %correlation_id, ?timeout, "request timed out");
                Err(Error::Timeout {
                    method: method.to_string(),
                    timeout,
                })
            }
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("reply_queue", &self.reply_queue)
            .field("pending_calls", &self.pending.len())
            .field("config", &self.config)
            .finish()
    }
}

async fn dispatch_replies(mut replies: Deliveries, pending: Arc<PendingCalls>) {
    while let Some(delivery) = replies.recv().await {
        let message = delivery.message;
        let Some(id) = message.correlation_id else {
            warn!("dropping reply without correlation id");
            continue;
        };
        if !pending.resolve(&id, message.body) {
            debug!(correlation_id = %id, "dropping late or unknown reply");
        }
    }
    debug!("reply stream ended");
    pending.clear();
}
