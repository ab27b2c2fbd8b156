use std::future::Future;
use std::sync::Arc;

use courier_contracts::MailClient;
use courier_fabric::broker::Connector;
use courier_fabric::{BrokerConnection, Client, Listener, Result};
use tokio::sync::OnceCell;
use tracing::{error, info};

use crate::config::NodeConfig;

/// One service process: a broker connection with its listener and client
///
/// The connection is opened once at start-up and failing to reach the broker
/// is fatal. The client is created on first use and shared by every caller
/// in the process.
pub struct Node {
    config: NodeConfig,
    connection: BrokerConnection,
    listener: Listener,
    client: OnceCell<Arc<Client>>,
}

impl Node {
    pub async fn start(connector: &dyn Connector, config: NodeConfig) -> Result<Self> {
        info!(service = %config.service_name, "starting node");
        let connection = match BrokerConnection::open(connector, &config.broker_url).await {
            Ok(connection) => connection,
            Err(err) => {
                error!(service = %config.service_name, error = %err, "cannot reach broker");
                return Err(err);
            }
        };
        let listener = Listener::new(&connection, config.listener_config()).await?;

        Ok(Self {
            config,
            connection,
            listener,
            client: OnceCell::new(),
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn connection(&self) -> &BrokerConnection {
        &self.connection
    }

    /// Where this node's handlers are registered
    pub fn listener(&self) -> &Listener {
        &self.listener
    }

    /// The node's RPC client, created on first call
    pub async fn client(&self) -> Result<Arc<Client>> {
        self.client
            .get_or_try_init(|| async {
                Client::new(&self.connection, self.config.client_config())
                    .await
                    .map(Arc::new)
            })
            .await
            .cloned()
    }

    /// Mail client honouring `mail_enabled`
    pub async fn mail_client(&self) -> Result<MailClient> {
        if !self.config.mail_enabled {
            return Ok(MailClient::Idle);
        }
        Ok(MailClient::new(self.client().await?, true))
    }

    /// Stop the listener, then the client, then close the connection
    pub async fn shutdown(self) {
        info!(service = %self.config.service_name, "shutting down");
        self.listener.shutdown().await;
        if let Some(client) = self.client.get() {
            client.shutdown().await;
        }
        self.connection.close().await;
        info!(service = %self.config.service_name, "node stopped");
    }

    /// Serve until `signal` resolves, then shut down
    pub async fn run_until<F>(self, signal: F)
    where
        F: Future<Output = ()>,
    {
        signal.await;
        info!(service = %self.config.service_name, "shutdown requested");
        self.shutdown().await;
    }

    /// Serve until Ctrl-C, then shut down
    pub async fn run_until_shutdown(self) {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!(error = %err, "failed to listen for Ctrl-C");
            }
        })
        .await;
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("service", &self.config.service_name)
            .field("closed", &self.connection.is_closed())
            .field("client", &self.client.initialized())
            .finish()
    }
}
