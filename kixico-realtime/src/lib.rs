pub mod config;
pub mod feed;
pub mod inbox;
pub mod models;
pub mod presence;
pub mod routes;
pub mod sales;
pub mod schema;
pub mod services;

use std::sync::Arc;

use kixico_shared::clients::db::DbPool;

use crate::feed::{ChangeFeed, MemoryFeed};
use crate::presence::OnlinePresence;
use crate::services::notification_service::PgNotificationStore;

pub struct AppState {
    pub config: config::AppConfig,
    pub db: DbPool,
    pub feed: Arc<dyn ChangeFeed>,
    /// Set when changes are pushed to this process over HTTP instead of AMQP.
    pub local_bus: Option<MemoryFeed>,
    pub presence: OnlinePresence,
    pub notifications: Arc<PgNotificationStore>,
    pub metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
}
