use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use kixico_shared::types::change::ChangeEvent;

use super::{ChangeFeed, EventHandler, FeedError, RowFilter, Subscription};

/// In-process change feed backed by a `tokio::sync::broadcast` channel.
///
/// Used when the database pushes changes over HTTP, and in tests. Subscribers
/// that fall more than `capacity` events behind skip the overflow.
#[derive(Clone)]
pub struct MemoryFeed {
    tx: broadcast::Sender<ChangeEvent>,
}

impl MemoryFeed {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(cap: usize) -> Self {
        let (tx, _) = broadcast::channel(cap);
        Self { tx }
    }

    /// Returns the number of open subscriptions that will see the event.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        tracing::debug!(routing_key = %event.routing_key(), "change published");
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for MemoryFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChangeFeed for MemoryFeed {
    async fn subscribe(
        &self,
        table: &str,
        filter: Option<RowFilter>,
        on_event: EventHandler,
    ) -> Result<Subscription, FeedError> {
        let mut rx = self.tx.subscribe();
        let token = CancellationToken::new();
        let task_token = token.clone();
        let table_name = table.to_string();

        tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    biased;
                    _ = task_token.cancelled() => break,
                    received = rx.recv() => received,
                };

                match received {
                    Ok(event) => {
                        if event.table != table_name {
                            continue;
                        }
                        if filter.as_ref().is_some_and(|f| !f.matches(&event)) {
                            continue;
                        }
                        on_event(event);
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(table = %table_name, skipped = n, "subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            task_token.cancel();
        });

        tracing::debug!(table = %table, "memory subscription opened");
        Ok(Subscription::new(table, token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn row(value: serde_json::Value) -> kixico_shared::types::change::Row {
        value.as_object().cloned().unwrap()
    }

    async fn collect(
        feed: &MemoryFeed,
        table: &str,
        filter: Option<RowFilter>,
    ) -> (Subscription, mpsc::UnboundedReceiver<ChangeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler: EventHandler = Arc::new(move |event| {
            let _ = tx.send(event);
        });
        let sub = feed.subscribe(table, filter, handler).await.unwrap();
        (sub, rx)
    }

    #[tokio::test]
    async fn delivers_only_matching_table_and_filter() {
        let feed = MemoryFeed::new();
        let (_sub, mut rx) = collect(&feed, "transactions", Some(RowFilter::eq("user_id", "u1"))).await;

        feed.publish(ChangeEvent::insert("profiles", row(json!({ "user_id": "u1" }))));
        feed.publish(ChangeEvent::insert("transactions", row(json!({ "id": "a", "user_id": "u2" }))));
        feed.publish(ChangeEvent::insert("transactions", row(json!({ "id": "b", "user_id": "u1" }))));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.after.unwrap()["id"], "b");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn preserves_publish_order() {
        let feed = MemoryFeed::new();
        let (_sub, mut rx) = collect(&feed, "profiles", None).await;

        for i in 0..5 {
            feed.publish(ChangeEvent::insert("profiles", row(json!({ "id": i }))));
        }
        for i in 0..5 {
            assert_eq!(rx.recv().await.unwrap().after.unwrap()["id"], i);
        }
    }

    #[tokio::test]
    async fn closed_subscription_stops_delivering() {
        let feed = MemoryFeed::new();
        let (sub, mut rx) = collect(&feed, "profiles", None).await;

        sub.close();
        tokio::time::timeout(Duration::from_secs(1), async {
            while feed.subscriber_count() > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        assert_eq!(feed.publish(ChangeEvent::insert("profiles", row(json!({ "id": 1 })))), 0);
        assert!(rx.recv().await.is_none());
    }
}
