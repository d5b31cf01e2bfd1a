use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;

use kixico_shared::errors::{AppError, AppResult, ErrorCode};
use kixico_shared::types::api::ApiResponse;
use kixico_shared::types::change::ChangeEvent;

use crate::AppState;

pub const INTERNAL_TOKEN_HEADER: &str = "x-internal-token";

#[derive(Debug, serde::Serialize)]
pub struct IngestResponse {
    pub delivered: usize,
}

/// POST /internal/changes
/// Database webhook target used when the feed transport is `webhook`.
pub async fn ingest_change(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<ChangeEvent>, JsonRejection>,
) -> AppResult<Json<ApiResponse<IngestResponse>>> {
    let token = headers
        .get(INTERNAL_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if !token_matches(&state.config.internal_token, token) {
        return Err(AppError::unauthorized("unauthorized"));
    }

    let Json(event) = body.map_err(|e| AppError::bad_request(e.body_text()))?;

    let bus = state
        .local_bus
        .as_ref()
        .ok_or_else(|| AppError::new(ErrorCode::FeedUnavailable, "change webhooks are disabled"))?;

    let delivered = bus.publish(event);
    Ok(Json(ApiResponse::ok(IngestResponse { delivered })))
}

/// Constant-time; an unset expected token matches nothing.
fn token_matches(expected: &str, presented: &str) -> bool {
    use subtle::ConstantTimeEq;
    !expected.is_empty() && expected.as_bytes().ct_eq(presented.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, FeedTransport};
    use crate::feed::MemoryFeed;
    use crate::presence::{OnlineDirectory, OnlinePresence};
    use crate::services::notification_service::PgNotificationStore;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use diesel::r2d2::{ConnectionManager, Pool};
    use metrics_exporter_prometheus::PrometheusBuilder;
    use serde_json::json;
    use tower::ServiceExt;

    struct FixedDirectory(i64);

    #[async_trait]
    impl OnlineDirectory for FixedDirectory {
        async fn count_online(&self) -> AppResult<i64> {
            Ok(self.0)
        }
    }

    async fn test_state(local_bus: Option<MemoryFeed>) -> Arc<AppState> {
        let bus = local_bus.clone().unwrap_or_default();
        let config = AppConfig {
            feed_transport: FeedTransport::Webhook,
            internal_token: "hook-secret".to_string(),
            ..AppConfig::default()
        };
        let manager = ConnectionManager::new("postgres://localhost/kixico_test");
        let db = Pool::builder().build_unchecked(manager);
        let presence = OnlinePresence::mount(&bus, Arc::new(FixedDirectory(2))).await;

        Arc::new(AppState {
            config,
            notifications: Arc::new(PgNotificationStore::new(db.clone())),
            db,
            feed: Arc::new(bus),
            local_bus,
            presence,
            metrics_handle: PrometheusBuilder::new().build_recorder().handle(),
        })
    }

    fn change_request(token: Option<&str>) -> Request<Body> {
        let event = json!({
            "table": "profiles",
            "operation": "INSERT",
            "after": { "id": "p1", "status": "online" }
        });
        raw_request(token, event.to_string())
    }

    fn raw_request(token: Option<&str>, body: String) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/internal/changes")
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header(INTERNAL_TOKEN_HEADER, token);
        }
        builder.body(Body::from(body)).unwrap()
    }

    #[tokio::test]
    async fn rejects_missing_or_wrong_token() {
        let app = crate::routes::router(test_state(Some(MemoryFeed::new())).await);

        let res = app.clone().oneshot(change_request(None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let res = app.oneshot(change_request(Some("nope"))).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn token_is_checked_before_the_body() {
        let app = crate::routes::router(test_state(Some(MemoryFeed::new())).await);

        let res = app
            .clone()
            .oneshot(raw_request(Some("nope"), "{not json".to_string()))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"]["message"], "unauthorized");

        let res = app
            .oneshot(raw_request(Some("hook-secret"), "{not json".to_string()))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn publishes_to_local_subscribers() {
        let bus = MemoryFeed::new();
        let state = test_state(Some(bus.clone())).await;
        let app = crate::routes::router(state.clone());

        let res = app.oneshot(change_request(Some("hook-secret"))).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        // The presence aggregator is subscribed to profiles.
        assert_eq!(body["data"]["delivered"], 1);
    }

    #[tokio::test]
    async fn unavailable_without_local_bus() {
        let app = crate::routes::router(test_state(None).await);

        let res = app.oneshot(change_request(Some("hook-secret"))).await.unwrap();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn online_count_route_reports_settled_value() {
        let state = test_state(Some(MemoryFeed::new())).await;
        let mut counts = state.presence.watch();
        counts.wait_for(|c| c.is_some()).await.unwrap();

        let app = crate::routes::router(state);
        let res = app
            .oneshot(Request::builder().uri("/presence/online-count").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["data"]["count"], 2);
        assert_eq!(body["data"]["live"], true);
    }
}
