//! Count of online profiles.
//!
//! The count is re-queried on mount and after every change on `profiles`,
//! whatever column changed. It is never adjusted by deltas, so missed or
//! duplicated events cannot make it drift.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use kixico_shared::errors::AppResult;
use kixico_shared::types::change::routing_keys;

use crate::feed::{subscribe_or_log, ChangeFeed, EventHandler, Subscription};

/// Source of truth for the online count.
#[async_trait]
pub trait OnlineDirectory: Send + Sync + 'static {
    async fn count_online(&self) -> AppResult<i64>;
}

/// Mounted presence aggregator. `None` until the first query succeeds.
pub struct OnlinePresence {
    count: watch::Receiver<Option<i64>>,
    refresh: mpsc::UnboundedSender<()>,
    token: CancellationToken,
    subscription: Option<Subscription>,
}

impl OnlinePresence {
    pub async fn mount(feed: &dyn ChangeFeed, directory: Arc<dyn OnlineDirectory>) -> Self {
        let (count_tx, count_rx) = watch::channel(None);
        let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();

        tokio::spawn(run_refresh_loop(directory, count_tx, refresh_rx, token.clone()));
        let _ = refresh_tx.send(());

        let trigger = refresh_tx.clone();
        let on_event: EventHandler = Arc::new(move |event| {
            tracing::trace!(operation = %event.operation, "profile changed, refreshing online count");
            let _ = trigger.send(());
        });
        let subscription = subscribe_or_log(feed, routing_keys::PROFILES, None, on_event).await;

        Self {
            count: count_rx,
            refresh: refresh_tx,
            token,
            subscription,
        }
    }

    pub fn count(&self) -> Option<i64> {
        *self.count.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<Option<i64>> {
        self.count.clone()
    }

    /// Queue one more re-fetch behind any already pending.
    pub fn refresh(&self) {
        let _ = self.refresh.send(());
    }

    pub fn is_live(&self) -> bool {
        self.subscription.as_ref().is_some_and(|s| !s.is_closed())
    }

    /// Close the subscription and drop any fetch still in flight.
    pub fn unmount(&mut self) {
        self.token.cancel();
        if let Some(subscription) = self.subscription.take() {
            subscription.close();
        }
    }
}

impl Drop for OnlinePresence {
    fn drop(&mut self) {
        self.unmount();
    }
}

/// Re-fetches run one at a time, in trigger order.
async fn run_refresh_loop(
    directory: Arc<dyn OnlineDirectory>,
    count: watch::Sender<Option<i64>>,
    mut triggers: mpsc::UnboundedReceiver<()>,
    token: CancellationToken,
) {
    loop {
        let trigger = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            trigger = triggers.recv() => trigger,
        };
        if trigger.is_none() {
            break;
        }
        fetch_online_count(directory.as_ref(), &count, &token).await;
    }
}

/// Replace the held count with a fresh query result. On failure the previous
/// value stays; after teardown the result is discarded.
pub async fn fetch_online_count(
    directory: &dyn OnlineDirectory,
    count: &watch::Sender<Option<i64>>,
    token: &CancellationToken,
) {
    let result = tokio::select! {
        biased;
        _ = token.cancelled() => return,
        result = directory.count_online() => result,
    };

    if token.is_cancelled() {
        return;
    }

    match result {
        Ok(n) => {
            count.send_replace(Some(n));
            tracing::debug!(online = n, "online count refreshed");
        }
        Err(e) => {
            tracing::warn!(error = %e, "online count query failed, keeping previous value");
        }
    }
}
