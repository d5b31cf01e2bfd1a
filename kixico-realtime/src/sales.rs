//! "New sale" alerts for the signed-in merchant.
//!
//! Every sale is appended to the session history and becomes the single
//! current alert, which clears itself after [`DISPLAY_WINDOW`] unless it is
//! dismissed or replaced first.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use kixico_shared::types::change::{column_text, routing_keys, ChangeEvent, Operation, Row};

use crate::feed::{subscribe_or_log, ChangeFeed, EventHandler, RowFilter, Subscription};

pub const DISPLAY_WINDOW: Duration = Duration::from_secs(5);

/// Transaction statuses that count as a completed sale.
pub const SALE_STATUSES: [&str; 2] = ["completed", "paid"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaleNotification {
    pub id: String,
    pub amount: f64,
    pub timestamp: DateTime<Utc>,
}

/// What a listener sees change on the current alert.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "sale", rename_all = "snake_case")]
pub enum SaleUpdate {
    Shown(SaleNotification),
    Cleared,
}

/// Inserts always emit. Updates emit only on the transition into a sale
/// status, so re-saving a completed row emits nothing.
pub fn detect_sale(
    operation: Operation,
    before: Option<&Row>,
    after: Option<&Row>,
    received_at: DateTime<Utc>,
) -> Option<SaleNotification> {
    let after = after?;
    match operation {
        Operation::Insert => {}
        Operation::Update => {
            let new_status = column_text(after, "status")?;
            if !SALE_STATUSES.contains(&new_status.as_str()) {
                return None;
            }
            let old_status = before.and_then(|row| column_text(row, "status"));
            if old_status.as_deref() == Some(new_status.as_str()) {
                return None;
            }
        }
        Operation::Delete => return None,
    }

    Some(SaleNotification {
        id: column_text(after, "id").unwrap_or_default(),
        amount: amount_of(after),
        timestamp: received_at,
    })
}

pub fn sale_from_change(event: &ChangeEvent, received_at: DateTime<Utc>) -> Option<SaleNotification> {
    detect_sale(event.operation, event.before.as_ref(), event.after.as_ref(), received_at)
}

/// Numeric columns may arrive as JSON numbers or as decimal strings.
fn amount_of(row: &Row) -> f64 {
    match row.get("amount") {
        Some(serde_json::Value::Number(n)) => n.as_f64().unwrap_or_default(),
        Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or_default(),
        _ => 0.0,
    }
}

#[derive(Default)]
struct AlertState {
    history: Vec<SaleNotification>,
    current: Option<SaleNotification>,
    dismiss_timer: Option<JoinHandle<()>>,
    /// Bumped whenever `current` changes; a timer only clears its own alert.
    generation: u64,
    torn_down: bool,
}

struct SaleAlerts {
    state: Mutex<AlertState>,
    updates: broadcast::Sender<SaleUpdate>,
    display_window: Duration,
}

impl SaleAlerts {
    fn new(display_window: Duration) -> Arc<Self> {
        let (updates, _) = broadcast::channel(64);
        Arc::new(Self {
            state: Mutex::new(AlertState::default()),
            updates,
            display_window,
        })
    }

    fn lock(&self) -> MutexGuard<'_, AlertState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle_change(self: &Arc<Self>, event: &ChangeEvent) {
        if let Some(sale) = sale_from_change(event, Utc::now()) {
            self.emit(sale);
        }
    }

    fn emit(self: &Arc<Self>, sale: SaleNotification) {
        let mut state = self.lock();
        if state.torn_down {
            return;
        }

        state.history.push(sale.clone());
        state.current = Some(sale.clone());
        state.generation += 1;
        if let Some(timer) = state.dismiss_timer.take() {
            timer.abort();
        }

        let generation = state.generation;
        let deadline = tokio::time::Instant::now() + self.display_window;
        let alerts: Weak<Self> = Arc::downgrade(self);
        state.dismiss_timer = Some(tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(alerts) = alerts.upgrade() {
                alerts.expire(generation);
            }
        }));
        drop(state);

        tracing::info!(transaction_id = %sale.id, amount = sale.amount, "new sale");
        let _ = self.updates.send(SaleUpdate::Shown(sale));
    }

    fn expire(&self, generation: u64) {
        let mut state = self.lock();
        if state.generation != generation || state.current.is_none() {
            return;
        }
        state.current = None;
        state.dismiss_timer = None;
        drop(state);
        let _ = self.updates.send(SaleUpdate::Cleared);
    }

    fn dismiss(&self) {
        let mut state = self.lock();
        if let Some(timer) = state.dismiss_timer.take() {
            timer.abort();
        }
        if state.current.take().is_none() {
            return;
        }
        state.generation += 1;
        drop(state);
        let _ = self.updates.send(SaleUpdate::Cleared);
    }

    fn tear_down(&self) {
        let mut state = self.lock();
        state.torn_down = true;
        if let Some(timer) = state.dismiss_timer.take() {
            timer.abort();
        }
    }
}

/// Mounted sale-alert aggregator for one merchant.
pub struct SaleNotifier {
    user_id: Uuid,
    alerts: Arc<SaleAlerts>,
    subscription: Option<Subscription>,
}

impl SaleNotifier {
    pub async fn mount(feed: &dyn ChangeFeed, user_id: Uuid) -> Self {
        Self::mount_with_window(feed, user_id, DISPLAY_WINDOW).await
    }

    pub async fn mount_with_window(feed: &dyn ChangeFeed, user_id: Uuid, display_window: Duration) -> Self {
        let alerts = SaleAlerts::new(display_window);

        let handler_alerts = alerts.clone();
        let on_event: EventHandler = Arc::new(move |event| handler_alerts.handle_change(&event));
        let subscription = subscribe_or_log(
            feed,
            routing_keys::TRANSACTIONS,
            Some(RowFilter::eq("user_id", user_id)),
            on_event,
        )
        .await;

        tracing::debug!(user_id = %user_id, live = subscription.is_some(), "sale notifier mounted");
        Self {
            user_id,
            alerts,
            subscription,
        }
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn current(&self) -> Option<SaleNotification> {
        self.alerts.lock().current.clone()
    }

    /// Every sale seen this session, in arrival order.
    pub fn history(&self) -> Vec<SaleNotification> {
        self.alerts.lock().history.clone()
    }

    pub fn updates(&self) -> broadcast::Receiver<SaleUpdate> {
        self.alerts.updates.subscribe()
    }

    /// Clear the current alert now; history is kept.
    pub fn dismiss_current_notification(&self) {
        self.alerts.dismiss();
    }

    pub fn is_live(&self) -> bool {
        self.subscription.as_ref().is_some_and(|s| !s.is_closed())
    }

    pub fn unmount(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.close();
        }
        self.alerts.tear_down();
    }
}

impl Drop for SaleNotifier {
    fn drop(&mut self) {
        self.unmount();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::MemoryFeed;
    use serde_json::json;

    fn row(value: serde_json::Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn tx(id: &str, user_id: Uuid, status: &str, amount: serde_json::Value) -> Row {
        row(json!({ "id": id, "user_id": user_id.to_string(), "status": status, "amount": amount }))
    }

    #[test]
    fn insert_always_emits() {
        let after = row(json!({ "id": "t1", "status": "pending", "amount": 1500 }));
        let sale = detect_sale(Operation::Insert, None, Some(&after), Utc::now()).unwrap();
        assert_eq!(sale.id, "t1");
        assert_eq!(sale.amount, 1500.0);
    }

    #[test]
    fn transition_into_completed_emits_once() {
        let before = row(json!({ "id": "t1", "status": "pending" }));
        let after = row(json!({ "id": "t1", "status": "completed", "amount": "250.50" }));
        let sale = detect_sale(Operation::Update, Some(&before), Some(&after), Utc::now()).unwrap();
        assert_eq!(sale.amount, 250.5);
    }

    #[test]
    fn resave_of_completed_row_is_silent() {
        let before = row(json!({ "id": "t1", "status": "completed" }));
        let after = row(json!({ "id": "t1", "status": "completed", "amount": 10 }));
        assert!(detect_sale(Operation::Update, Some(&before), Some(&after), Utc::now()).is_none());
    }

    #[test]
    fn paid_counts_and_other_statuses_do_not() {
        let pending = row(json!({ "status": "pending" }));
        let paid = row(json!({ "id": "t2", "status": "paid" }));
        let failed = row(json!({ "status": "failed" }));
        assert!(detect_sale(Operation::Update, Some(&pending), Some(&paid), Utc::now()).is_some());
        assert!(detect_sale(Operation::Update, Some(&pending), Some(&failed), Utc::now()).is_none());
        // completed -> paid is still a transition into a sale status.
        let completed = row(json!({ "status": "completed" }));
        assert!(detect_sale(Operation::Update, Some(&completed), Some(&paid), Utc::now()).is_some());
    }

    #[test]
    fn missing_old_status_counts_as_different() {
        let after = row(json!({ "id": "t3", "status": "completed" }));
        assert!(detect_sale(Operation::Update, None, Some(&after), Utc::now()).is_some());
    }

    #[test]
    fn deletes_never_emit() {
        let before = row(json!({ "id": "t1", "status": "completed" }));
        assert!(detect_sale(Operation::Delete, Some(&before), None, Utc::now()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn current_alert_clears_after_display_window() {
        let alerts = SaleAlerts::new(DISPLAY_WINDOW);
        let mut updates = alerts.updates.subscribe();
        alerts.emit(SaleNotification { id: "t1".into(), amount: 5.0, timestamp: Utc::now() });

        tokio::time::sleep(Duration::from_millis(4_999)).await;
        assert!(alerts.lock().current.is_some());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(alerts.lock().current.is_none());
        assert_eq!(alerts.lock().history.len(), 1);

        assert!(matches!(updates.recv().await.unwrap(), SaleUpdate::Shown(_)));
        assert_eq!(updates.recv().await.unwrap(), SaleUpdate::Cleared);
    }

    #[tokio::test(start_paused = true)]
    async fn dismiss_clears_immediately_and_cancels_timer() {
        let alerts = SaleAlerts::new(DISPLAY_WINDOW);
        alerts.emit(SaleNotification { id: "t1".into(), amount: 5.0, timestamp: Utc::now() });

        tokio::time::sleep(Duration::from_secs(1)).await;
        alerts.dismiss();
        assert!(alerts.lock().current.is_none());
        assert!(alerts.lock().dismiss_timer.is_none());
        assert_eq!(alerts.lock().history.len(), 1);

        // A new alert shown before the old deadline gets its own full window.
        tokio::time::sleep(Duration::from_secs(1)).await;
        alerts.emit(SaleNotification { id: "t2".into(), amount: 9.0, timestamp: Utc::now() });
        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(alerts.lock().current.as_ref().map(|s| s.id.as_str()), Some("t2"));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(alerts.lock().current.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn newer_sale_replaces_current() {
        let alerts = SaleAlerts::new(DISPLAY_WINDOW);
        alerts.emit(SaleNotification { id: "a".into(), amount: 1.0, timestamp: Utc::now() });
        tokio::time::sleep(Duration::from_secs(3)).await;
        alerts.emit(SaleNotification { id: "b".into(), amount: 2.0, timestamp: Utc::now() });

        // The first alert's deadline passes without clearing the second.
        tokio::time::sleep(Duration::from_secs(3)).await;
        let state = alerts.lock();
        assert_eq!(state.current.as_ref().map(|s| s.id.as_str()), Some("b"));
        assert_eq!(state.history.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(), ["a", "b"]);
    }

    #[tokio::test]
    async fn notifier_scopes_to_current_user() {
        let feed = MemoryFeed::new();
        let me = Uuid::new_v4();
        let someone_else = Uuid::new_v4();
        let notifier = SaleNotifier::mount(&feed, me).await;
        let mut updates = notifier.updates();
        assert!(notifier.is_live());

        feed.publish(ChangeEvent::insert("transactions", tx("x", someone_else, "pending", json!(10))));
        feed.publish(ChangeEvent::update(
            "transactions",
            Some(tx("m1", me, "completed", json!(40))),
            tx("m1", me, "completed", json!(40)),
        ));
        feed.publish(ChangeEvent::update(
            "transactions",
            Some(tx("m2", me, "pending", json!(75))),
            tx("m2", me, "paid", json!(75)),
        ));

        match updates.recv().await.unwrap() {
            SaleUpdate::Shown(sale) => assert_eq!(sale.id, "m2"),
            other => panic!("unexpected update {other:?}"),
        }
        assert_eq!(notifier.history().len(), 1);
        assert_eq!(notifier.current().map(|s| s.amount), Some(75.0));

        notifier.dismiss_current_notification();
        assert!(notifier.current().is_none());
        assert_eq!(notifier.history().len(), 1);
    }

    #[tokio::test]
    async fn unmounted_notifier_ignores_late_events() {
        let feed = MemoryFeed::new();
        let me = Uuid::new_v4();
        let mut notifier = SaleNotifier::mount(&feed, me).await;

        notifier.unmount();
        notifier.unmount();
        assert!(!notifier.is_live());

        notifier
            .alerts
            .handle_change(&ChangeEvent::insert("transactions", tx("late", me, "paid", json!(1))));
        assert!(notifier.current().is_none());
        assert!(notifier.history().is_empty());
    }
}
