use std::sync::Arc;

use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{BasicProperties, ConnectionProperties, ExchangeKind};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::broker::{Channel, Connection, Connector};
use crate::error::{Error, Result};
use crate::message::{Acker, ConsumeMode, Deliveries, Delivery, Message};

const REPLY_SUCCESS: u16 = 200;

fn broker_error(err: lapin::Error) -> Error {
    Error::unavailable(err)
}

/// A publish only counts once the broker has taken responsibility for it
fn confirmed(confirmation: Confirmation) -> Result<()> {
    match confirmation {
        Confirmation::Nack(_) => Err(Error::unavailable("broker rejected the message")),
        Confirmation::Ack(_) | Confirmation::NotRequested => Ok(()),
    }
}

/// Connects to a RabbitMQ server over AMQP 0-9-1
#[derive(Debug, Clone, Copy, Default)]
pub struct AmqpConnector;

#[async_trait::async_trait]
impl Connector for AmqpConnector {
    async fn connect(&self, address: &str) -> Result<Arc<dyn Connection>> {
        let connection = lapin::Connection::connect(address, ConnectionProperties::default())
            .await
            .map_err(broker_error)?;
        debug!("connected to AMQP broker");
        Ok(Arc::new(AmqpConnection { connection }))
    }
}

struct AmqpConnection {
    connection: lapin::Connection,
}

#[async_trait::async_trait]
impl Connection for AmqpConnection {
    async fn create_channel(&self) -> Result<Arc<dyn Channel>> {
        let channel = self.connection.create_channel().await.map_err(broker_error)?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(broker_error)?;
        Ok(Arc::new(AmqpChannel { channel }))
    }

    async fn close(&self) -> Result<()> {
        self.connection
            .close(REPLY_SUCCESS, "shutdown")
            .await
            .map_err(broker_error)
    }
}

struct AmqpChannel {
    channel: lapin::Channel,
}

fn properties(message: &Message) -> BasicProperties {
    let mut properties = BasicProperties::default();
    if let Some(id) = &message.correlation_id {
        properties = properties.with_correlation_id(id.as_str().into());
    }
    if let Some(reply_to) = &message.reply_to {
        properties = properties.with_reply_to(reply_to.as_str().into());
    }
    if let Some(content_type) = &message.content_type {
        properties = properties.with_content_type(content_type.as_str().into());
    }
    properties
}

#[async_trait::async_trait]
impl Channel for AmqpChannel {
    async fn declare_queue(&self, name: &str) -> Result<()> {
        self.channel
            .queue_declare(name, QueueDeclareOptions::default(), FieldTable::default())
            .await
            .map(|_| ())
            .map_err(broker_error)
    }

    async fn declare_exclusive_queue(&self) -> Result<String> {
        let options = QueueDeclareOptions {
            exclusive: true,
            auto_delete: true,
            ..QueueDeclareOptions::default()
        };
        let queue = self
            .channel
            .queue_declare("", options, FieldTable::default())
            .await
            .map_err(broker_error)?;
        Ok(queue.name().as_str().to_owned())
    }

    async fn declare_fanout(&self, exchange: &str) -> Result<()> {
        let options = ExchangeDeclareOptions {
            durable: true,
            ..ExchangeDeclareOptions::default()
        };
        self.channel
            .exchange_declare(exchange, ExchangeKind::Fanout, options, FieldTable::default())
            .await
            .map_err(broker_error)
    }

    async fn bind_queue(&self, queue: &str, exchange: &str) -> Result<()> {
        self.channel
            .queue_bind(queue, exchange, "", QueueBindOptions::default(), FieldTable::default())
            .await
            .map_err(broker_error)
    }

    async fn set_prefetch(&self, count: u16) -> Result<()> {
        self.channel
            .basic_qos(count, BasicQosOptions::default())
            .await
            .map_err(broker_error)
    }

    async fn publish(&self, exchange: &str, routing_key: &str, message: Message) -> Result<()> {
        let properties = properties(&message);
        let confirmation = self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &message.body,
                properties,
            )
            .await
            .map_err(broker_error)?
            .await
            .map_err(broker_error)?;
        confirmed(confirmation)
    }

    async fn consume(&self, queue: &str, mode: ConsumeMode) -> Result<Deliveries> {
        let options = BasicConsumeOptions {
            no_ack: mode == ConsumeMode::AutoAck,
            ..BasicConsumeOptions::default()
        };
        let mut consumer = self
            .channel
            .basic_consume(queue, "", options, FieldTable::default())
            .await
            .map_err(broker_error)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let queue = queue.to_owned();
        tokio::spawn(async move {
            while let Some(item) = consumer.next().await {
                let delivery = match item {
                    Ok(delivery) => delivery,
                    Err(err) => {
                        warn!(queue = %queue, error = %err, "consumer stream failed");
                        break;
                    }
                };

                let text = |value: &Option<lapin::types::ShortString>| {
                    value.as_ref().map(|s| s.as_str().to_owned())
                };
                let message = Message {
                    correlation_id: text(delivery.properties.correlation_id()),
                    reply_to: text(delivery.properties.reply_to()),
                    content_type: text(delivery.properties.content_type()),
                    body: delivery.data,
                };
                let delivery = match mode {
                    ConsumeMode::AutoAck => Delivery::auto_acked(message),
                    ConsumeMode::Manual => {
                        Delivery::new(message, Box::new(AmqpAcker(delivery.acker)))
                    }
                };

                if tx.send(delivery).is_err() {
                    break;
                }
            }
            debug!(queue = %queue, "consumer stream ended");
        });

        Ok(rx)
    }

    async fn close(&self) -> Result<()> {
        self.channel
            .close(REPLY_SUCCESS, "shutdown")
            .await
            .map_err(broker_error)
    }
}

struct AmqpAcker(lapin::acker::Acker);

#[async_trait::async_trait]
impl Acker for AmqpAcker {
    async fn ack(&self) -> Result<()> {
        self.0
            .ack(BasicAckOptions::default())
            .await
            .map(|_| ())
            .map_err(broker_error)
    }

    async fn nack(&self, requeue: bool) -> Result<()> {
        let options = BasicNackOptions {
            requeue,
            ..BasicNackOptions::default()
        };
        self.0
            .nack(options)
            .await
            .map(|_| ())
            .map_err(broker_error)
    }
}
