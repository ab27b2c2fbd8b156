//! Courier Fabric - request/reply RPC over a message broker
//!
//! Services talk through named queues: a [`Client`] publishes a request to
//! the queue named after the method and waits on its private reply queue; a
//! [`Listener`] consumes the method queue, runs a handler and publishes an
//! [`Envelope`] back to the caller. Replies are matched to callers by
//! correlation id, so one client carries any number of concurrent calls.
//!
//! # Example
//!
//! ```no_run
//! use courier_fabric::{BrokerConnection, Client, ClientConfig, Listener, ListenerConfig};
//! use courier_fabric::broker::MemoryBroker;
//! use courier_core::ErrorTable;
//! use std::convert::Infallible;
//!
//! # async fn example() -> courier_fabric::Result<()> {
//! let broker = MemoryBroker::new();
//! let connection = BrokerConnection::open(&broker, "memory://local").await?;
//!
//! let listener = Listener::new(&connection, ListenerConfig::default()).await?;
//! listener
//!     .serve_typed("echo.upper", ErrorTable::<Infallible>::new(), |text: String| async move {
//!         Ok::<_, Infallible>(text.to_uppercase())
//!     })
//!     .await?;
//!
//! let client = Client::new(&connection, ClientConfig::default()).await?;
//! let reply: Result<String, _> = client
//!     .invoke("echo.upper", "hello", &ErrorTable::<Infallible>::new())
//!     .await;
//! assert_eq!(reply.ok().as_deref(), Some("HELLO"));
//!
//! listener.shutdown().await;
//! client.shutdown().await;
//! connection.close().await;
//! # Ok(())
//! # }
//! ```

pub mod broker;
pub mod client;
pub mod codec;
pub mod connection;
pub mod envelope;
pub mod error;
pub mod listener;
pub mod message;

// Re-exports for convenience
pub use client::{Client, ClientConfig};
pub use connection::{with_connection, BrokerConnection};
pub use envelope::Envelope;
pub use error::{CallError, Error, Result};
pub use listener::{handler_fn, Handler, Listener, ListenerConfig, PublishFailurePolicy};
pub use message::{Delivery, Message};
