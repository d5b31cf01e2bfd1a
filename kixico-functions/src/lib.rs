pub mod config;
pub mod models;
pub mod routes;
pub mod schema;
pub mod services;

use std::sync::Arc;

use kixico_shared::clients::db::DbPool;

use crate::services::ledger_service::Ledger;
use crate::services::role_service::RoleDirectory;

pub struct AppState {
    pub config: config::AppConfig,
    pub db: DbPool,
    pub roles: Arc<dyn RoleDirectory>,
    pub ledger: Arc<dyn Ledger>,
    pub metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
}
