use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event as SseEvent, Sse};
use axum::Json;
use futures::stream::Stream;
use serde::Serialize;

use kixico_shared::types::api::ApiResponse;

use crate::routes::{keep_alive, sse_frame};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct OnlineCountResponse {
    /// `null` until the first count query has succeeded.
    pub count: Option<i64>,
    pub live: bool,
}

/// GET /presence/online-count
pub async fn online_count(State(state): State<Arc<AppState>>) -> Json<ApiResponse<OnlineCountResponse>> {
    Json(ApiResponse::ok(OnlineCountResponse {
        count: state.presence.count(),
        live: state.presence.is_live(),
    }))
}

/// GET /presence/stream
/// Sends the current count, then every new value.
pub async fn stream_online_count(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let mut counts = state.presence.watch();

    let stream = async_stream::stream! {
        loop {
            let count = *counts.borrow_and_update();
            if let Some(count) = count {
                if let Some(frame) = sse_frame("online_count", &serde_json::json!({ "count": count })) {
                    yield Ok(frame);
                }
            }
            if counts.changed().await.is_err() {
                break;
            }
        }
    };

    Sse::new(stream).keep_alive(keep_alive())
}
