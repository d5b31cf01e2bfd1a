pub mod health;
pub mod internal;
pub mod notifications;
pub mod presence;
pub mod sales;

use std::sync::Arc;
use std::time::Duration;

use axum::middleware;
use axum::response::sse::{Event as SseEvent, KeepAlive};
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use kixico_shared::middleware::metrics_middleware;

use crate::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/metrics", get(health::metrics))
        .route("/presence/online-count", get(presence::online_count))
        .route("/presence/stream", get(presence::stream_online_count))
        .route("/sales/stream", get(sales::stream_sales))
        .route("/notifications", get(notifications::list_notifications))
        .route("/notifications/stream", get(notifications::stream_inbox))
        .route("/notifications/unread-count", get(notifications::unread_count))
        .route("/notifications/mark-all-read", post(notifications::mark_all_read))
        .route("/notifications/:id/read", post(notifications::mark_read))
        // Database webhooks (service-to-service, shared token)
        .route("/internal/changes", post(internal::ingest_change))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Heartbeat comment keeping SSE connections open through proxies.
pub(crate) fn keep_alive() -> KeepAlive {
    KeepAlive::new()
        .interval(Duration::from_secs(15))
        .text("heartbeat")
}

/// Serialize `payload` into a named SSE frame.
pub(crate) fn sse_frame<T: Serialize>(name: &str, payload: &T) -> Option<SseEvent> {
    match serde_json::to_string(payload) {
        Ok(json) => Some(SseEvent::default().event(name).data(json)),
        Err(e) => {
            tracing::warn!(error = %e, event = name, "failed to serialize SSE payload");
            None
        }
    }
}
