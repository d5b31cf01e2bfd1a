use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::schema::{coupons, transactions};

/// `user_roles.role` value that may post manual adjustments.
pub const ROLE_ADMIN: &str = "admin";

pub const TRANSACTION_KIND_ADJUSTMENT: &str = "adjustment";
pub const TRANSACTION_STATUS_COMPLETED: &str = "completed";

#[derive(Debug, Queryable, Selectable, Serialize)]
#[diesel(table_name = transactions)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: f64,
    pub kind: String,
    pub status: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = transactions)]
pub struct NewTransaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: f64,
    pub kind: String,
    pub status: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = coupons)]
pub struct Coupon {
    pub id: Uuid,
    pub product_id: Uuid,
    pub code: String,
    pub discount_type: String,
    pub discount_value: f64,
    pub usage_limit: Option<i32>,
    pub used_count: i32,
    pub expiry_date: Option<DateTime<Utc>>,
    pub is_active: bool,
}
