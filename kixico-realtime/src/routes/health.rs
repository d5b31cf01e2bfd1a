use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use kixico_shared::types::api::{HealthCheck, HealthResponse, HealthStatus};

use crate::AppState;

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let pool = state.db.state();
    let database = if pool.connections > 0 {
        HealthCheck::new("database", HealthStatus::Healthy)
    } else {
        HealthCheck::new("database", HealthStatus::Degraded).with_message("no open connections")
    };

    let change_feed = if state.presence.is_live() {
        HealthCheck::new("change_feed", HealthStatus::Healthy)
    } else {
        HealthCheck::new("change_feed", HealthStatus::Degraded).with_message("no live updates")
    };

    Json(
        HealthResponse::healthy("kixico-realtime", env!("CARGO_PKG_VERSION"))
            .with_checks(vec![database, change_feed]),
    )
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> String {
    state.metrics_handle.render()
}
