use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

use kixico_shared::errors::{AppError, AppResult};
use kixico_shared::types::auth::AuthUser;

use crate::services::ledger_service::{self, AdjustmentRequest};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct AdjustmentResponse {
    pub success: bool,
    pub transaction_id: Uuid,
}

/// POST /manual-adjustment
/// Admin-only credit or debit on a merchant's ledger.
pub async fn manual_adjustment(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
    body: Result<Json<AdjustmentRequest>, JsonRejection>,
) -> AppResult<Json<AdjustmentResponse>> {
    if !state.roles.is_admin(auth_user.id).await? {
        tracing::warn!(user_id = %auth_user.id, "manual adjustment refused, caller is not an admin");
        return Err(AppError::forbidden("forbidden"));
    }

    let Json(req) = body.map_err(|e| AppError::bad_request(e.body_text()))?;
    let adjustment = ledger_service::validate_adjustment(req)?;

    let transaction = state.ledger.record_adjustment(adjustment, auth_user.id).await?;

    Ok(Json(AdjustmentResponse {
        success: true,
        transaction_id: transaction.id,
    }))
}
