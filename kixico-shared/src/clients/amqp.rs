use lapin::{
    options::*, types::FieldTable, Channel, Connection, ConnectionProperties,
    Consumer,
};

use crate::types::change::routing_keys;

/// AMQP connection carrying the backend's row change feed.
#[derive(Clone)]
pub struct AmqpClient {
    channel: Channel,
}

impl AmqpClient {
    pub async fn connect(url: &str) -> Result<Self, lapin::Error> {
        let conn = Connection::connect(url, ConnectionProperties::default()).await?;
        let channel = conn.create_channel().await?;

        channel
            .exchange_declare(
                routing_keys::EXCHANGE,
                lapin::ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        tracing::info!("connected to change feed broker");
        Ok(Self { channel })
    }

    /// Open a private queue bound to `routing_keys` and start consuming it.
    ///
    /// The queue is exclusive and auto-deleted, so it lives exactly as long as
    /// the consumer that reads it.
    pub async fn subscribe(&self, routing_keys: &[String]) -> Result<Consumer, lapin::Error> {
        let queue = self
            .channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    exclusive: true,
                    auto_delete: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        let queue_name = queue.name().as_str().to_string();

        for key in routing_keys {
            self.channel
                .queue_bind(
                    &queue_name,
                    routing_keys::EXCHANGE,
                    key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await?;
        }

        let consumer = self
            .channel
            .basic_consume(
                &queue_name,
                &format!("{queue_name}-consumer"),
                BasicConsumeOptions {
                    no_ack: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        tracing::info!(queue = %queue_name, bindings = ?routing_keys, "subscribed to change feed");
        Ok(consumer)
    }

    /// Stop a consumer started by [`subscribe`](Self::subscribe).
    pub async fn cancel(&self, consumer_tag: &str) -> Result<(), lapin::Error> {
        self.channel
            .basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await
    }

    pub fn is_connected(&self) -> bool {
        self.channel.status().connected()
    }
}
