use async_trait::async_trait;
use diesel::prelude::*;
use uuid::Uuid;

use kixico_shared::clients::db::{checkout, DbPool};
use kixico_shared::errors::{AppError, AppResult, ErrorCode};

use crate::inbox::NotificationStore;
use crate::models::NotificationRecord;
use crate::schema::notifications;

/// All notifications addressed to `user_id`, newest first.
pub fn list_for_recipient(pool: &DbPool, user_id: Uuid) -> AppResult<Vec<NotificationRecord>> {
    let mut conn = checkout(pool)?;

    let items = notifications::table
        .filter(notifications::user_id.eq(user_id))
        .order(notifications::created_at.desc())
        .load::<NotificationRecord>(&mut conn)?;

    Ok(items)
}

/// Mark all unread notifications as read for a user.
pub fn mark_all_read(pool: &DbPool, user_id: Uuid) -> AppResult<usize> {
    let mut conn = checkout(pool)?;

    let updated = diesel::update(
        notifications::table
            .filter(notifications::user_id.eq(user_id))
            .filter(notifications::read.eq(false)),
    )
    .set(notifications::read.eq(true))
    .execute(&mut conn)?;

    tracing::debug!(user_id = %user_id, updated, "notifications marked read");
    Ok(updated)
}

/// Mark a single notification as read. Rows owned by someone else look missing.
pub fn mark_read(pool: &DbPool, notification_id: Uuid, user_id: Uuid) -> AppResult<NotificationRecord> {
    let mut conn = checkout(pool)?;

    diesel::update(
        notifications::table
            .filter(notifications::id.eq(notification_id))
            .filter(notifications::user_id.eq(user_id)),
    )
    .set(notifications::read.eq(true))
    .get_result::<NotificationRecord>(&mut conn)
    .map_err(|e| match e {
        diesel::result::Error::NotFound => {
            AppError::new(ErrorCode::NotificationNotFound, "notification not found")
        }
        other => AppError::Database(other),
    })
}

/// Diesel-backed store; each call runs on the blocking pool.
pub struct PgNotificationStore {
    pool: DbPool,
}

impl PgNotificationStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn run<T, F>(&self, f: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&DbPool) -> AppResult<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || f(&pool))
            .await
            .map_err(|e| AppError::Internal(e.into()))?
    }
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    async fn list(&self, recipient: Uuid) -> AppResult<Vec<NotificationRecord>> {
        self.run(move |pool| list_for_recipient(pool, recipient)).await
    }

    async fn mark_read(&self, recipient: Uuid, id: Uuid) -> AppResult<NotificationRecord> {
        self.run(move |pool| mark_read(pool, id, recipient)).await
    }

    async fn mark_all_read(&self, recipient: Uuid) -> AppResult<usize> {
        self.run(move |pool| mark_all_read(pool, recipient)).await
    }
}
