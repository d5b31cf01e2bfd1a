//! Row-level change feed.
//!
//! Components depend on the [`ChangeFeed`] capability only: subscribe to one
//! table (optionally filtered), receive a callback per committed change, and
//! close the returned [`Subscription`] when done. Reconnects belong to the
//! transport underneath; nothing here retries.

mod amqp;
mod memory;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use kixico_shared::types::change::{column_text, ChangeEvent};

pub use amqp::AmqpFeed;
pub use memory::MemoryFeed;

/// Callback invoked for every matching change, in transport order.
pub type EventHandler = Arc<dyn Fn(ChangeEvent) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("change feed transport error: {0}")]
    Transport(#[from] lapin::Error),

    #[error("change feed is closed")]
    Closed,
}

#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Open one subscription on `table`. Events that do not match `filter`
    /// are dropped before `on_event` sees them.
    async fn subscribe(
        &self,
        table: &str,
        filter: Option<RowFilter>,
        on_event: EventHandler,
    ) -> Result<Subscription, FeedError>;
}

/// Feed used when no transport could be reached. Every subscribe fails, so
/// components fall back to their initial fetch.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableFeed;

#[async_trait]
impl ChangeFeed for UnavailableFeed {
    async fn subscribe(
        &self,
        _table: &str,
        _filter: Option<RowFilter>,
        _on_event: EventHandler,
    ) -> Result<Subscription, FeedError> {
        Err(FeedError::Closed)
    }
}

/// Equality filter on one column, written `column=eq.value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFilter {
    pub column: String,
    pub value: String,
}

impl RowFilter {
    pub fn eq(column: impl Into<String>, value: impl ToString) -> Self {
        Self {
            column: column.into(),
            value: value.to_string(),
        }
    }

    /// Deletes are matched on the old row image.
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        event
            .record()
            .and_then(|row| column_text(row, &self.column))
            .is_some_and(|v| v == self.value)
    }
}

impl std::fmt::Display for RowFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}=eq.{}", self.column, self.value)
    }
}

/// Handle to one open subscription. Closing is idempotent and also happens on drop.
pub struct Subscription {
    table: String,
    token: CancellationToken,
    closed: AtomicBool,
}

impl Subscription {
    /// The transport task must stop once `token` is cancelled, and should
    /// cancel it itself when the underlying stream ends.
    pub fn new(table: impl Into<String>, token: CancellationToken) -> Self {
        Self {
            table: table.into(),
            token,
            closed: AtomicBool::new(false),
        }
    }

    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.token.cancel();
        tracing::debug!(table = %self.table, "subscription closed");
    }

    /// True once closed locally or once the transport stream ended.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.token.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

/// Subscribe, or log and carry on without live updates.
pub async fn subscribe_or_log(
    feed: &dyn ChangeFeed,
    table: &str,
    filter: Option<RowFilter>,
    on_event: EventHandler,
) -> Option<Subscription> {
    let described = filter.as_ref().map(ToString::to_string).unwrap_or_default();
    match feed.subscribe(table, filter, on_event).await {
        Ok(subscription) => Some(subscription),
        Err(e) => {
            tracing::error!(error = %e, table = %table, filter = %described, "subscribe failed, no live updates");
            None
        }
    }
}
