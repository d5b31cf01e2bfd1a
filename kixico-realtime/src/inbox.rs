//! Persisted notifications for one recipient.
//!
//! The inbox keeps the loaded list newest first. `unread_count` is always
//! derived from that list. Ownership checks live in the store's queries.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use kixico_shared::errors::AppResult;
use kixico_shared::types::change::{column_text, routing_keys, ChangeEvent, Operation};

use crate::feed::{subscribe_or_log, ChangeFeed, EventHandler, RowFilter, Subscription};
use crate::models::NotificationRecord;

#[async_trait]
pub trait NotificationStore: Send + Sync + 'static {
    async fn list(&self, recipient: Uuid) -> AppResult<Vec<NotificationRecord>>;

    /// Fails with `NotificationNotFound` unless `recipient` owns `id`.
    async fn mark_read(&self, recipient: Uuid, id: Uuid) -> AppResult<NotificationRecord>;

    async fn mark_all_read(&self, recipient: Uuid) -> AppResult<usize>;
}

#[derive(Debug, Clone, Serialize)]
pub struct InboxSnapshot {
    pub unread_count: usize,
    pub notifications: Vec<NotificationRecord>,
}

/// Live events seen while a load is in flight. They are re-applied over the
/// loaded list, which may predate them.
#[derive(Default)]
struct LoadReplay {
    in_flight: usize,
    events: Vec<ChangeEvent>,
}

struct InboxShared {
    records: Mutex<Vec<NotificationRecord>>,
    replay: Mutex<LoadReplay>,
    revision: watch::Sender<u64>,
    token: CancellationToken,
}

/// Ends a load on drop, so a failed or abandoned load still stops buffering.
struct LoadGuard<'a> {
    shared: &'a InboxShared,
    loaded: Option<Vec<NotificationRecord>>,
}

impl LoadGuard<'_> {
    fn complete(mut self, records: Vec<NotificationRecord>) {
        self.loaded = Some(records);
    }
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        self.shared.end_load(self.loaded.take());
    }
}

impl InboxShared {
    fn lock(&self) -> MutexGuard<'_, Vec<NotificationRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn replay(&self) -> MutexGuard<'_, LoadReplay> {
        self.replay.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin_load(&self) -> LoadGuard<'_> {
        self.replay().in_flight += 1;
        LoadGuard {
            shared: self,
            loaded: None,
        }
    }

    /// Replace the list with `loaded`, then replay what arrived meanwhile.
    fn end_load(&self, loaded: Option<Vec<NotificationRecord>>) {
        let mut replay = self.replay();
        replay.in_flight = replay.in_flight.saturating_sub(1);
        let events = if replay.in_flight == 0 {
            std::mem::take(&mut replay.events)
        } else {
            replay.events.clone()
        };

        if let Some(loaded) = loaded {
            self.mutate(|records| {
                *records = loaded;
                for event in &events {
                    Self::apply_to(records, event);
                }
            });
        }
    }

    /// Apply `f` unless the inbox was unmounted, then re-sort and bump the revision.
    fn mutate(&self, f: impl FnOnce(&mut Vec<NotificationRecord>)) {
        if self.token.is_cancelled() {
            return;
        }
        {
            let mut records = self.lock();
            f(&mut records);
            records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        }
        self.revision.send_modify(|r| *r += 1);
    }

    fn upsert(records: &mut Vec<NotificationRecord>, record: NotificationRecord) {
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
    }

    fn apply_to(records: &mut Vec<NotificationRecord>, event: &ChangeEvent) {
        match event.operation {
            Operation::Insert | Operation::Update => {
                let Some(row) = event.after.as_ref() else { return };
                match NotificationRecord::from_row(row) {
                    Ok(record) => Self::upsert(records, record),
                    Err(e) => tracing::warn!(error = %e, "undecodable notification row"),
                }
            }
            Operation::Delete => {
                let id = event
                    .before
                    .as_ref()
                    .and_then(|row| column_text(row, "id"))
                    .and_then(|id| Uuid::parse_str(&id).ok());
                if let Some(id) = id {
                    records.retain(|r| r.id != id);
                }
            }
        }
    }

    fn apply(&self, event: &ChangeEvent) {
        let mut replay = self.replay();
        if replay.in_flight > 0 {
            replay.events.push(event.clone());
        }
        self.mutate(|records| Self::apply_to(records, event));
    }
}

pub struct NotificationInbox<S: NotificationStore> {
    store: Arc<S>,
    recipient: Uuid,
    shared: Arc<InboxShared>,
    subscription: Option<Subscription>,
}

impl<S: NotificationStore> NotificationInbox<S> {
    pub fn new(store: Arc<S>, recipient: Uuid) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            store,
            recipient,
            shared: Arc::new(InboxShared {
                records: Mutex::new(Vec::new()),
                replay: Mutex::new(LoadReplay::default()),
                revision,
                token: CancellationToken::new(),
            }),
            subscription: None,
        }
    }

    pub fn recipient(&self) -> Uuid {
        self.recipient
    }

    /// Replace the list with the store's. Live changes that arrive while the
    /// query runs are kept. On failure the old list stays.
    pub async fn load(&self) -> AppResult<()> {
        let guard = self.shared.begin_load();
        let result = tokio::select! {
            biased;
            _ = self.shared.token.cancelled() => return Ok(()),
            result = self.store.list(self.recipient) => result,
        };

        match result {
            Ok(records) => {
                tracing::debug!(recipient = %self.recipient, count = records.len(), "inbox loaded");
                guard.complete(records);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, recipient = %self.recipient, "inbox load failed, keeping previous list");
                Err(e)
            }
        }
    }

    /// Keep the list in sync with inserts, updates and deletes on the
    /// recipient's rows.
    pub async fn follow(&mut self, feed: &dyn ChangeFeed) {
        if self.subscription.is_some() {
            return;
        }
        let shared = self.shared.clone();
        let on_event: EventHandler = Arc::new(move |event| shared.apply(&event));
        self.subscription = subscribe_or_log(
            feed,
            routing_keys::NOTIFICATIONS,
            Some(RowFilter::eq("user_id", self.recipient)),
            on_event,
        )
        .await;
    }

    pub fn apply_change(&self, event: &ChangeEvent) {
        self.shared.apply(event);
    }

    /// Newest first.
    pub fn list(&self) -> Vec<NotificationRecord> {
        self.shared.lock().clone()
    }

    pub fn unread_count(&self) -> usize {
        self.shared.lock().iter().filter(|r| !r.read).count()
    }

    pub fn snapshot(&self) -> InboxSnapshot {
        let records = self.shared.lock();
        InboxSnapshot {
            unread_count: records.iter().filter(|r| !r.read).count(),
            notifications: records.clone(),
        }
    }

    /// Ticks after every change to the list.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.shared.revision.subscribe()
    }

    pub async fn mark_as_read(&self, id: Uuid) -> AppResult<()> {
        let updated = self.store.mark_read(self.recipient, id).await?;
        self.shared.mutate(|records| InboxShared::upsert(records, updated));
        Ok(())
    }

    /// Returns how many rows the store flipped.
    pub async fn mark_all_as_read(&self) -> AppResult<usize> {
        let updated = self.store.mark_all_read(self.recipient).await?;
        self.shared.mutate(|records| records.iter_mut().for_each(|r| r.read = true));
        tracing::debug!(recipient = %self.recipient, updated, "inbox marked read");
        Ok(updated)
    }

    pub fn is_live(&self) -> bool {
        self.subscription.as_ref().is_some_and(|s| !s.is_closed())
    }

    pub fn unmount(&mut self) {
        self.shared.token.cancel();
        if let Some(subscription) = self.subscription.take() {
            subscription.close();
        }
    }
}

impl<S: NotificationStore> Drop for NotificationInbox<S> {
    fn drop(&mut self) {
        self.unmount();
    }
}
