use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event as SseEvent, Sse};
use futures::stream::Stream;
use tokio::sync::broadcast::error::RecvError;

use kixico_shared::types::auth::AuthUser;

use crate::routes::{keep_alive, sse_frame};
use crate::sales::{SaleNotifier, SaleUpdate};
use crate::AppState;

/// GET /sales/stream
///
/// Mounts a sale notifier for the caller for as long as the connection is
/// open. Frames are `sale` (shown) and `sale_cleared` (auto-dismissed).
pub async fn stream_sales(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let notifier = SaleNotifier::mount(state.feed.as_ref(), auth_user.id).await;
    let mut updates = notifier.updates();

    tracing::info!(user_id = %auth_user.id, live = notifier.is_live(), "sales stream opened");

    let stream = async_stream::stream! {
        // Dropped with the stream, which unmounts it.
        let notifier = notifier;
        loop {
            match updates.recv().await {
                Ok(SaleUpdate::Shown(sale)) => {
                    if let Some(frame) = sse_frame("sale", &sale) {
                        yield Ok(frame);
                    }
                }
                Ok(SaleUpdate::Cleared) => {
                    yield Ok(SseEvent::default().event("sale_cleared").data("{}"));
                }
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!(user_id = %notifier.user_id(), skipped = n, "sales stream lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(keep_alive())
}
