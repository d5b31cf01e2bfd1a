use async_trait::async_trait;
use futures_lite::StreamExt;
use tokio_util::sync::CancellationToken;

use kixico_shared::clients::amqp::AmqpClient;
use kixico_shared::types::change::{routing_keys, ChangeEvent};

use super::{ChangeFeed, EventHandler, FeedError, RowFilter, Subscription};

/// Change feed read from the broker's `kixico.changes` topic exchange.
///
/// Each subscription gets its own exclusive queue bound to
/// `kixico.db.<table>.*`, so no channel state is shared between components.
#[derive(Clone)]
pub struct AmqpFeed {
    client: AmqpClient,
}

impl AmqpFeed {
    pub fn new(client: AmqpClient) -> Self {
        Self { client }
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }
}

#[async_trait]
impl ChangeFeed for AmqpFeed {
    async fn subscribe(
        &self,
        table: &str,
        filter: Option<RowFilter>,
        on_event: EventHandler,
    ) -> Result<Subscription, FeedError> {
        let mut consumer = self
            .client
            .subscribe(&[routing_keys::for_table(table)])
            .await?;
        let consumer_tag = consumer.tag().as_str().to_string();

        let token = CancellationToken::new();
        let task_token = token.clone();
        let client = self.client.clone();
        let table_name = table.to_string();

        tokio::spawn(async move {
            loop {
                let delivery = tokio::select! {
                    biased;
                    _ = task_token.cancelled() => {
                        if let Err(e) = client.cancel(&consumer_tag).await {
                            tracing::warn!(error = %e, table = %table_name, "failed to cancel consumer");
                        }
                        break;
                    }
                    delivery = consumer.next() => delivery,
                };

                let delivery = match delivery {
                    Some(Ok(delivery)) => delivery,
                    Some(Err(e)) => {
                        tracing::error!(error = %e, table = %table_name, "change feed consumer error");
                        continue;
                    }
                    None => {
                        tracing::info!(table = %table_name, "change feed consumer ended");
                        break;
                    }
                };

                let event = match serde_json::from_slice::<ChangeEvent>(&delivery.data) {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::error!(
                            error = %e,
                            routing_key = %delivery.routing_key,
                            "failed to deserialize change event"
                        );
                        continue;
                    }
                };

                if event.table != table_name {
                    continue;
                }
                if delivery.routing_key.as_str() != event.routing_key() {
                    tracing::warn!(
                        routing_key = %delivery.routing_key,
                        expected = %event.routing_key(),
                        "change event published under the wrong routing key, skipped"
                    );
                    continue;
                }
                if filter.as_ref().is_some_and(|f| !f.matches(&event)) {
                    continue;
                }
                on_event(event);
            }
            task_token.cancel();
        });

        Ok(Subscription::new(table, token))
    }
}
