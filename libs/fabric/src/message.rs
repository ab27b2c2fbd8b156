use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

/// Content type stamped on requests and envelopes
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// A message as published to or delivered by the broker
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub body: Vec<u8>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub content_type: Option<String>,
}

impl Message {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// How deliveries from a consumer are settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeMode {
    /// The broker forgets a message as soon as it is handed out
    AutoAck,
    /// Every delivery must be acked or nacked, and counts against prefetch
    /// until it is
    Manual,
}

/// Settles one delivery with the broker it came from
#[async_trait]
pub trait Acker: Send + Sync {
    async fn ack(&self) -> Result<()>;

    async fn nack(&self, requeue: bool) -> Result<()>;
}

/// One inbound message
///
/// `ack` and `nack` take `self`, so a delivery is settled at most once.
/// Deliveries from an auto-ack consumer carry no acker and settling them is
/// a no-op.
pub struct Delivery {
    pub message: Message,
    acker: Option<Box<dyn Acker>>,
}

impl Delivery {
    pub fn new(message: Message, acker: Box<dyn Acker>) -> Self {
        Self {
            message,
            acker: Some(acker),
        }
    }

    pub fn auto_acked(message: Message) -> Self {
        Self {
            message,
            acker: None,
        }
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.message.correlation_id.as_deref()
    }

    pub fn reply_to(&self) -> Option<&str> {
        self.message.reply_to.as_deref()
    }

    pub async fn ack(self) -> Result<()> {
        match self.acker {
            Some(acker) => acker.ack().await,
            None => Ok(()),
        }
    }

    pub async fn nack(self, requeue: bool) -> Result<()> {
        match self.acker {
            Some(acker) => acker.nack(requeue).await,
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .field("manual_ack", &self.acker.is_some())
            .finish()
    }
}

/// Stream of deliveries from one consumer; ends when the consumer is
/// cancelled or its channel closes
pub type Deliveries = mpsc::UnboundedReceiver<Delivery>;
