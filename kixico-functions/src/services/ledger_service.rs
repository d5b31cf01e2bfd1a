//! Manual credits and debits on a merchant's ledger.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use diesel::prelude::*;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use kixico_shared::clients::db::{checkout, DbPool};
use kixico_shared::errors::{AppError, AppResult, ErrorCode};

use crate::models::{
    NewTransaction, Transaction, TRANSACTION_KIND_ADJUSTMENT, TRANSACTION_STATUS_COMPLETED,
};
use crate::schema::transactions;

/// Request body of `POST /manual-adjustment`. Every field is optional at the
/// wire level so a missing one is a 400, not a deserialization failure.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AdjustmentRequest {
    #[validate(required(message = "userId is required"))]
    pub user_id: Option<String>,
    #[validate(required(message = "amount is required"))]
    pub amount: Option<f64>,
    #[serde(rename = "type")]
    #[validate(required(message = "type is required"))]
    pub kind: Option<String>,
    #[validate(required(message = "justification is required"))]
    pub justification: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustmentKind {
    Credit,
    Debit,
}

impl fmt::Display for AdjustmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Credit => write!(f, "credit"),
            Self::Debit => write!(f, "debit"),
        }
    }
}

impl FromStr for AdjustmentKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "credit" => Ok(Self::Credit),
            "debit" => Ok(Self::Debit),
            other => Err(AppError::new(
                ErrorCode::InvalidAdjustmentType,
                format!("invalid type '{other}'. Must be one of: credit, debit"),
            )),
        }
    }
}

/// A request that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Adjustment {
    pub user_id: Uuid,
    pub amount: f64,
    pub kind: AdjustmentKind,
    pub justification: String,
}

impl Adjustment {
    /// Amount as written to the ledger: negative for debits.
    pub fn signed_amount(&self) -> f64 {
        match self.kind {
            AdjustmentKind::Credit => self.amount,
            AdjustmentKind::Debit => -self.amount,
        }
    }
}

pub fn validate_adjustment(req: AdjustmentRequest) -> AppResult<Adjustment> {
    req.validate().map_err(|e| {
        let details = serde_json::to_value(&e).unwrap_or_default();
        AppError::with_details(ErrorCode::ValidationError, e.to_string(), details)
    })?;

    let user_id = req
        .user_id
        .as_deref()
        .map(str::trim)
        .and_then(|id| Uuid::parse_str(id).ok())
        .ok_or_else(|| AppError::new(ErrorCode::TargetUserRequired, "userId must be a valid UUID"))?;

    let amount = req.amount.unwrap_or_default();
    if !amount.is_finite() || amount <= 0.0 {
        return Err(AppError::new(
            ErrorCode::InvalidAdjustmentAmount,
            "amount must be greater than zero",
        ));
    }

    let kind: AdjustmentKind = req.kind.as_deref().unwrap_or_default().parse()?;

    let justification = req.justification.unwrap_or_default().trim().to_string();
    if justification.is_empty() {
        return Err(AppError::new(
            ErrorCode::JustificationRequired,
            "justification is required",
        ));
    }

    Ok(Adjustment {
        user_id,
        amount,
        kind,
        justification,
    })
}

/// Where accepted adjustments are written.
#[async_trait]
pub trait Ledger: Send + Sync + 'static {
    async fn record_adjustment(&self, adjustment: Adjustment, admin_id: Uuid) -> AppResult<Transaction>;
}

/// Insert one completed `adjustment` transaction.
pub fn record_adjustment(pool: &DbPool, adjustment: &Adjustment, admin_id: Uuid) -> AppResult<Transaction> {
    let mut conn = checkout(pool)?;

    let new_transaction = NewTransaction {
        id: Uuid::new_v4(),
        user_id: adjustment.user_id,
        amount: adjustment.signed_amount(),
        kind: TRANSACTION_KIND_ADJUSTMENT.to_string(),
        status: TRANSACTION_STATUS_COMPLETED.to_string(),
        description: Some(adjustment.justification.clone()),
    };

    let transaction = diesel::insert_into(transactions::table)
        .values(&new_transaction)
        .returning(Transaction::as_returning())
        .get_result(&mut conn)?;

    tracing::info!(
        transaction_id = %transaction.id,
        user_id = %adjustment.user_id,
        admin_id = %admin_id,
        kind = %adjustment.kind,
        amount = transaction.amount,
        "manual adjustment recorded"
    );

    Ok(transaction)
}

pub struct PgLedger {
    pool: DbPool,
}

impl PgLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Ledger for PgLedger {
    async fn record_adjustment(&self, adjustment: Adjustment, admin_id: Uuid) -> AppResult<Transaction> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || record_adjustment(&pool, &adjustment, admin_id))
            .await
            .map_err(|e| AppError::Internal(e.into()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(body: serde_json::Value) -> AdjustmentRequest {
        serde_json::from_value(body).unwrap()
    }

    fn valid_body() -> serde_json::Value {
        json!({
            "userId": "0191d6a4-7c1e-7000-8000-000000000001",
            "amount": 250.0,
            "type": "debit",
            "justification": "chargeback"
        })
    }

    fn error_code(err: AppError) -> ErrorCode {
        match err {
            AppError::Known { code, .. } => code,
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn debit_is_negated() {
        let adjustment = validate_adjustment(request(valid_body())).unwrap();
        assert_eq!(adjustment.kind, AdjustmentKind::Debit);
        assert_eq!(adjustment.signed_amount(), -250.0);
    }

    #[test]
    fn credit_keeps_sign() {
        let mut body = valid_body();
        body["type"] = json!("credit");
        let adjustment = validate_adjustment(request(body)).unwrap();
        assert_eq!(adjustment.signed_amount(), 250.0);
    }

    #[test]
    fn missing_field_is_validation_error() {
        let mut body = valid_body();
        body.as_object_mut().unwrap().remove("justification");
        let err = validate_adjustment(request(body)).unwrap_err();
        match &err {
            AppError::Known { details: Some(details), .. } => {
                assert!(details.get("justification").is_some());
            }
            other => panic!("expected field details, got {other:?}"),
        }
        assert_eq!(error_code(err), ErrorCode::ValidationError);
    }

    #[test]
    fn non_positive_amount_is_rejected() {
        for amount in [0.0, -10.0] {
            let mut body = valid_body();
            body["amount"] = json!(amount);
            let err = validate_adjustment(request(body)).unwrap_err();
            assert_eq!(error_code(err), ErrorCode::InvalidAdjustmentAmount);
        }
    }

    #[test]
    fn unknown_type_is_rejected() {
        let mut body = valid_body();
        body["type"] = json!("refund");
        let err = validate_adjustment(request(body)).unwrap_err();
        assert_eq!(error_code(err), ErrorCode::InvalidAdjustmentType);
    }

    #[test]
    fn blank_justification_is_rejected() {
        let mut body = valid_body();
        body["justification"] = json!("   ");
        let err = validate_adjustment(request(body)).unwrap_err();
        assert_eq!(error_code(err), ErrorCode::JustificationRequired);
    }

    #[test]
    fn malformed_user_id_is_rejected() {
        let mut body = valid_body();
        body["userId"] = json!("merchant-42");
        let err = validate_adjustment(request(body)).unwrap_err();
        assert_eq!(error_code(err), ErrorCode::TargetUserRequired);
    }
}
