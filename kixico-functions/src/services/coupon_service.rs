use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use kixico_shared::clients::db::{checkout, DbPool};
use kixico_shared::errors::AppResult;

use crate::models::Coupon;
use crate::schema::coupons;

/// Body of a `POST /validate-coupon` answer. Invalid coupons are a normal
/// outcome and still answer 200.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CouponValidation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount_value: Option<f64>,
}

impl CouponValidation {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: Some(message.into()),
            discount_type: None,
            discount_value: None,
        }
    }

    pub fn valid(coupon: &Coupon) -> Self {
        Self {
            valid: true,
            message: None,
            discount_type: Some(coupon.discount_type.clone()),
            discount_value: Some(coupon.discount_value),
        }
    }
}

pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Active coupon for `product_id` with the given (already normalized) code.
pub fn find_active(pool: &DbPool, product_id: Uuid, code: &str) -> AppResult<Option<Coupon>> {
    let mut conn = checkout(pool)?;

    let coupon = coupons::table
        .filter(coupons::product_id.eq(product_id))
        .filter(coupons::code.eq(code))
        .filter(coupons::is_active.eq(true))
        .select(Coupon::as_select())
        .first(&mut conn)
        .optional()?;

    Ok(coupon)
}

/// Expiry is checked before the usage limit.
pub fn evaluate(coupon: Option<&Coupon>, now: DateTime<Utc>) -> CouponValidation {
    let Some(coupon) = coupon else {
        return CouponValidation::invalid("Coupon not found");
    };

    if coupon.expiry_date.is_some_and(|expiry| expiry < now) {
        return CouponValidation::invalid("Coupon has expired");
    }

    if coupon.usage_limit.is_some_and(|limit| coupon.used_count >= limit) {
        return CouponValidation::invalid("Coupon usage limit reached");
    }

    CouponValidation::valid(coupon)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn coupon() -> Coupon {
        Coupon {
            id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            code: "WELCOME10".to_string(),
            discount_type: "percentage".to_string(),
            discount_value: 10.0,
            usage_limit: Some(5),
            used_count: 2,
            expiry_date: Some(Utc::now() + Duration::days(7)),
            is_active: true,
        }
    }

    #[test]
    fn active_coupon_returns_stored_discount() {
        let c = coupon();
        let result = evaluate(Some(&c), Utc::now());
        assert_eq!(
            result,
            CouponValidation {
                valid: true,
                message: None,
                discount_type: Some("percentage".to_string()),
                discount_value: Some(10.0),
            }
        );
    }

    #[test]
    fn exhausted_coupon_is_invalid() {
        let mut c = coupon();
        c.used_count = 5;
        let result = evaluate(Some(&c), Utc::now());
        assert!(!result.valid);
        assert_eq!(result.message.as_deref(), Some("Coupon usage limit reached"));
    }

    #[test]
    fn expired_coupon_is_invalid() {
        let mut c = coupon();
        c.expiry_date = Some(Utc::now() - Duration::hours(1));
        let result = evaluate(Some(&c), Utc::now());
        assert!(!result.valid);
        assert_eq!(result.message.as_deref(), Some("Coupon has expired"));
    }

    #[test]
    fn no_limit_and_no_expiry_is_valid() {
        let mut c = coupon();
        c.usage_limit = None;
        c.expiry_date = None;
        c.used_count = 10_000;
        assert!(evaluate(Some(&c), Utc::now()).valid);
    }

    #[test]
    fn missing_coupon_is_invalid() {
        let result = evaluate(None, Utc::now());
        assert!(!result.valid);
        assert_eq!(result.message.as_deref(), Some("Coupon not found"));
    }

    #[test]
    fn invalid_answer_omits_discount_fields() {
        let json = serde_json::to_value(CouponValidation::invalid("Coupon not found")).unwrap();
        assert_eq!(json, serde_json::json!({ "valid": false, "message": "Coupon not found" }));
    }

    #[test]
    fn codes_are_uppercased() {
        assert_eq!(normalize_code(" welcome10 "), "WELCOME10");
    }
}
