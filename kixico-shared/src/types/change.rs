use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A row snapshot as delivered by the change feed: column name -> JSON value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Row-level mutation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    #[serde(alias = "INSERT")]
    Insert,
    #[serde(alias = "UPDATE")]
    Update,
    #[serde(alias = "DELETE")]
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One committed row change on a backend table.
///
/// ```json
/// {
///   "id":        "0190...",
///   "table":     "transactions",
///   "operation": "update",
///   "before":    { "id": "...", "status": "pending" },
///   "after":     { "id": "...", "status": "completed" },
///   "committed_at": "2025-06-15T14:22:33.123Z"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(default = "Uuid::now_v7")]
    pub id: Uuid,
    pub table: String,
    pub operation: Operation,
    #[serde(default)]
    pub before: Option<Row>,
    #[serde(default)]
    pub after: Option<Row>,
    #[serde(default = "Utc::now")]
    pub committed_at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn insert(table: impl Into<String>, after: Row) -> Self {
        Self::new(table, Operation::Insert, None, Some(after))
    }

    pub fn update(table: impl Into<String>, before: Option<Row>, after: Row) -> Self {
        Self::new(table, Operation::Update, before, Some(after))
    }

    pub fn delete(table: impl Into<String>, before: Row) -> Self {
        Self::new(table, Operation::Delete, Some(before), None)
    }

    fn new(table: impl Into<String>, operation: Operation, before: Option<Row>, after: Option<Row>) -> Self {
        Self {
            id: Uuid::now_v7(),
            table: table.into(),
            operation,
            before,
            after,
            committed_at: Utc::now(),
        }
    }

    /// The row the event is about: the new image, or the old one for deletes.
    pub fn record(&self) -> Option<&Row> {
        self.after.as_ref().or(self.before.as_ref())
    }

    pub fn routing_key(&self) -> String {
        routing_keys::for_change(&self.table, self.operation)
    }
}

/// Read a column as text, whatever its JSON scalar type.
pub fn column_text(row: &Row, column: &str) -> Option<String> {
    match row.get(column)? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Change feed routing keys
///
/// Format: `kixico.db.{table}.{operation}`
pub mod routing_keys {
    use super::Operation;

    pub const EXCHANGE: &str = "kixico.changes";

    pub const PROFILES: &str = "profiles";
    pub const TRANSACTIONS: &str = "transactions";
    pub const NOTIFICATIONS: &str = "notifications";

    pub fn for_change(table: &str, operation: Operation) -> String {
        format!("kixico.db.{table}.{operation}")
    }

    /// Binding that matches every operation on a table.
    pub fn for_table(table: &str) -> String {
        format!("kixico.db.{table}.*")
    }
}
