use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use kixico_shared::errors::{AppError, AppResult, ErrorCode};

use crate::services::coupon_service::{self, CouponValidation};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ValidateCouponRequest {
    pub product_id: Option<String>,
    pub coupon_code: Option<String>,
}

/// POST /validate-coupon
/// Public. Missing fields are a 400; every lookup outcome is a 200.
pub async fn validate_coupon(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ValidateCouponRequest>, JsonRejection>,
) -> AppResult<Json<CouponValidation>> {
    let Json(req) = body.map_err(|e| AppError::bad_request(e.body_text()))?;

    let product_id = req.product_id.as_deref().map(str::trim).unwrap_or_default();
    let code = coupon_service::normalize_code(req.coupon_code.as_deref().unwrap_or_default());
    if product_id.is_empty() || code.is_empty() {
        return Err(AppError::new(
            ErrorCode::CouponFieldsRequired,
            "product_id and coupon_code are required",
        ));
    }

    // A product id that is not a UUID cannot match any coupon.
    let coupon = match Uuid::parse_str(product_id) {
        Ok(product_id) => coupon_service::find_active(&state.db, product_id, &code)?,
        Err(_) => None,
    };

    let result = coupon_service::evaluate(coupon.as_ref(), chrono::Utc::now());
    tracing::debug!(code = %code, valid = result.valid, "coupon validated");

    Ok(Json(result))
}

#[cfg(test)]
mod tests {
    use crate::routes::{router, test_support::offline_state};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn post(body: &'static str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/validate-coupon")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn missing_fields_are_bad_request() {
        for body in [r#"{}"#, r#"{"product_id":"p"}"#, r#"{"coupon_code":"WELCOME"}"#, r#"{"product_id":"","coupon_code":"  "}"#] {
            let res = router(offline_state()).oneshot(post(body)).await.unwrap();
            assert_eq!(res.status(), StatusCode::BAD_REQUEST, "body: {body}");
        }
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        let res = router(offline_state()).oneshot(post("{not json")).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_product_format_is_not_found() {
        let res = router(offline_state())
            .oneshot(post(r#"{"product_id":"sku-1","coupon_code":"welcome"}"#))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body, serde_json::json!({ "valid": false, "message": "Coupon not found" }));
    }
}
