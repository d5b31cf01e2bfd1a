use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use kixico_shared::types::change::Row;

use crate::schema::notifications;

/// A persisted inbox entry. Only the recipient may flip `read`.
#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = notifications)]
pub struct NotificationRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub sender: String,
    pub message: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl NotificationRecord {
    /// Decode a change-feed row image.
    pub fn from_row(row: &Row) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::Value::Object(row.clone()))
    }
}

/// Online profile statuses. Anything else counts as offline.
pub const STATUS_ONLINE: &str = "online";
