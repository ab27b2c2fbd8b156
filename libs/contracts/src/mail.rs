//! Outgoing mail
//!
//! Mail requests are broadcast on the `mail` fanout exchange and never
//! answered. Deployments without a mail service run an idle client that
//! drops every request.
//!
//! `msg` is sent as a JSON string of UTF-8 text, not as a base64-encoded
//! byte array.

use std::sync::Arc;

use async_trait::async_trait;
use courier_fabric::{Client, Listener};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const MAIL_EXCHANGE: &str = "mail";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMailRequest {
    pub to: Vec<String>,
    pub msg: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MailError {
    #[error("failed to send mail: {0}")]
    Sending(String),
}

#[derive(Debug, Clone)]
pub enum MailClient {
    Enabled(Arc<Client>),
    Idle,
}

impl MailClient {
    pub fn new(client: Arc<Client>, enabled: bool) -> Self {
        if enabled {
            Self::Enabled(client)
        } else {
            Self::Idle
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled(_))
    }

    pub async fn send_mail(&self, to: Vec<String>, msg: impl Into<String>) -> courier_fabric::Result<()> {
        match self {
            Self::Enabled(client) => {
                let request = SendMailRequest {
                    to,
                    msg: msg.into(),
                };
                client.broadcast(MAIL_EXCHANGE, &request).await
            }
            Self::Idle => {
                debug!(recipients = to.len(), "mail disabled, dropping request");
                Ok(())
            }
        }
    }
}

#[async_trait]
pub trait MailService: Send + Sync + 'static {
    async fn send_mail(&self, request: SendMailRequest) -> Result<(), MailError>;
}

/// Subscribe `service` to the mail exchange; failures are logged
pub async fn serve<S: MailService>(listener: &Listener, service: Arc<S>) -> courier_fabric::Result<()> {
    listener
        .subscribe(MAIL_EXCHANGE, move |request: SendMailRequest| {
            let svc = Arc::clone(&service);
            async move {
                let recipients = request.to.len();
                if let Err(err) = svc.send_mail(request).await {
                    warn!(recipients, error = %err, "mail delivery failed");
                }
            }
        })
        .await
}
