use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event as SseEvent, Sse};
use axum::Json;
use futures::stream::Stream;
use uuid::Uuid;

use kixico_shared::errors::AppResult;
use kixico_shared::types::api::ApiResponse;
use kixico_shared::types::auth::AuthUser;

use crate::inbox::{NotificationInbox, NotificationStore};
use crate::models::NotificationRecord;
use crate::routes::{keep_alive, sse_frame};
use crate::AppState;

/// GET /notifications
/// All notifications for the authenticated user, newest first.
pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
) -> AppResult<Json<ApiResponse<Vec<NotificationRecord>>>> {
    let items = state.notifications.list(auth_user.id).await?;
    Ok(Json(ApiResponse::ok(items)))
}

/// GET /notifications/unread-count
pub async fn unread_count(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
) -> AppResult<Json<ApiResponse<UnreadCountResponse>>> {
    let items = state.notifications.list(auth_user.id).await?;
    let count = items.iter().filter(|n| !n.read).count();

    Ok(Json(ApiResponse::ok(UnreadCountResponse { count })))
}

#[derive(Debug, serde::Serialize)]
pub struct UnreadCountResponse {
    pub count: usize,
}

/// POST /notifications/mark-all-read
pub async fn mark_all_read(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
) -> AppResult<Json<ApiResponse<MarkAllReadResponse>>> {
    let updated = state.notifications.mark_all_read(auth_user.id).await?;

    Ok(Json(ApiResponse::ok(MarkAllReadResponse { updated })))
}

#[derive(Debug, serde::Serialize)]
pub struct MarkAllReadResponse {
    pub updated: usize,
}

/// POST /notifications/:id/read
/// 404 when the notification belongs to someone else.
pub async fn mark_read(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<NotificationRecord>>> {
    let notification = state.notifications.mark_read(auth_user.id, id).await?;

    Ok(Json(ApiResponse::ok(notification)))
}

/// GET /notifications/stream
/// Live inbox: a full snapshot on connect and after every change.
pub async fn stream_inbox(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
) -> AppResult<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>> {
    let mut inbox = NotificationInbox::new(state.notifications.clone(), auth_user.id);
    inbox.follow(state.feed.as_ref()).await;
    inbox.load().await?;

    let mut changes = inbox.changes();

    let stream = async_stream::stream! {
        let inbox = inbox;
        loop {
            if let Some(frame) = sse_frame("inbox", &inbox.snapshot()) {
                yield Ok(frame);
            }
            if changes.changed().await.is_err() {
                break;
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(keep_alive()))
}
