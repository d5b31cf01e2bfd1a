use async_trait::async_trait;
use diesel::prelude::*;
use uuid::Uuid;

use kixico_shared::clients::db::{checkout, DbPool};
use kixico_shared::errors::{AppError, AppResult};

use crate::models::ROLE_ADMIN;
use crate::schema::user_roles;

/// Who may do what, as recorded in `user_roles`.
#[async_trait]
pub trait RoleDirectory: Send + Sync + 'static {
    async fn is_admin(&self, user_id: Uuid) -> AppResult<bool>;
}

/// Whether `user_id` holds `role` in `user_roles`.
pub fn has_role(pool: &DbPool, user_id: Uuid, role: &str) -> AppResult<bool> {
    let mut conn = checkout(pool)?;

    let count: i64 = user_roles::table
        .filter(user_roles::user_id.eq(user_id))
        .filter(user_roles::role.eq(role))
        .count()
        .get_result(&mut conn)?;

    Ok(count > 0)
}

pub struct PgRoleDirectory {
    pool: DbPool,
}

impl PgRoleDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RoleDirectory for PgRoleDirectory {
    async fn is_admin(&self, user_id: Uuid) -> AppResult<bool> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || has_role(&pool, user_id, ROLE_ADMIN))
            .await
            .map_err(|e| AppError::Internal(e.into()))?
    }
}
