use std::sync::Arc;

use crate::error::Result;
use crate::message::{ConsumeMode, Deliveries, Message};

#[cfg(feature = "amqp")]
pub mod amqp;
pub mod memory;

#[cfg(feature = "amqp")]
pub use self::amqp::AmqpConnector;
pub use self::memory::MemoryBroker;

/// The default exchange: routes a message to the queue named by its routing key
pub const DEFAULT_EXCHANGE: &str = "";

/// Opens connections to a broker
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    /// Connect to `address`, failing with `BrokerUnavailable` when the broker
    /// cannot be reached
    async fn connect(&self, address: &str) -> Result<Arc<dyn Connection>>;
}

/// A live broker connection
#[async_trait::async_trait]
pub trait Connection: Send + Sync {
    /// Open a new logical channel over this connection
    async fn create_channel(&self) -> Result<Arc<dyn Channel>>;

    /// Close the connection
    async fn close(&self) -> Result<()>;
}

/// A logical session over a connection
///
/// `publish` may be called concurrently from many tasks.
#[async_trait::async_trait]
pub trait Channel: Send + Sync {
    /// Declare a named queue; declaring an existing queue is a no-op
    async fn declare_queue(&self, name: &str) -> Result<()>;

    /// Declare an exclusive, auto-deleted queue with a broker-chosen name
    async fn declare_exclusive_queue(&self) -> Result<String>;

    /// Declare a fanout exchange; declaring an existing exchange is a no-op
    async fn declare_fanout(&self, exchange: &str) -> Result<()>;

    /// Bind a queue to a fanout exchange
    async fn bind_queue(&self, queue: &str, exchange: &str) -> Result<()>;

    /// Limit unacknowledged deliveries per consumer started after this call
    async fn set_prefetch(&self, count: u16) -> Result<()>;

    /// Publish a message through `exchange`
    async fn publish(&self, exchange: &str, routing_key: &str, message: Message) -> Result<()>;

    /// Start consuming `queue`
    async fn consume(&self, queue: &str, mode: ConsumeMode) -> Result<Deliveries>;

    /// Close the channel, cancelling its consumers
    async fn close(&self) -> Result<()>;
}
