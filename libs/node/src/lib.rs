//! Courier Node - process wiring for courier services
//!
//! Loads [`NodeConfig`] from the environment, installs logging and owns the
//! broker connection, listener and client of one service process.
//!
//! ```no_run
//! use courier_fabric::broker::MemoryBroker;
//! use courier_node::{telemetry, Node, NodeConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = NodeConfig::from_env()?.with_broker_url("memory://local");
//! telemetry::init(&config)?;
//!
//! let broker = MemoryBroker::new();
//! let node = Node::start(&broker, config).await?;
//! node.run_until_shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod node;
pub mod telemetry;

pub use config::{ConfigError, NodeConfig};
pub use node::Node;

#[cfg(feature = "amqp")]
pub use courier_fabric::broker::AmqpConnector;
