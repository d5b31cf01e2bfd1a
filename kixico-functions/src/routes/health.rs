use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use kixico_shared::types::api::{HealthCheck, HealthResponse, HealthStatus};

use crate::AppState;

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let database = if state.db.state().connections > 0 {
        HealthCheck::new("database", HealthStatus::Healthy)
    } else {
        HealthCheck::new("database", HealthStatus::Degraded).with_message("no open connections")
    };

    Json(
        HealthResponse::healthy("kixico-functions", env!("CARGO_PKG_VERSION"))
            .with_checks(vec![database]),
    )
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> String {
    state.metrics_handle.render()
}
