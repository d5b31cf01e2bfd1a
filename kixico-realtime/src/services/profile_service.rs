use async_trait::async_trait;
use diesel::prelude::*;

use kixico_shared::clients::db::{checkout, DbPool};
use kixico_shared::errors::{AppError, AppResult};

use crate::models::STATUS_ONLINE;
use crate::presence::OnlineDirectory;
use crate::schema::profiles;

/// `SELECT count(*) FROM profiles WHERE status = 'online'`
pub fn count_online(pool: &DbPool) -> AppResult<i64> {
    let mut conn = checkout(pool)?;

    let count: i64 = profiles::table
        .filter(profiles::status.eq(STATUS_ONLINE))
        .count()
        .get_result(&mut conn)?;

    Ok(count)
}

pub struct PgOnlineDirectory {
    pool: DbPool,
}

impl PgOnlineDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OnlineDirectory for PgOnlineDirectory {
    async fn count_online(&self) -> AppResult<i64> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || count_online(&pool))
            .await
            .map_err(|e| AppError::Internal(e.into()))?
    }
}
