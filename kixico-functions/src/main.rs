use std::sync::Arc;

use kixico_functions::config::AppConfig;
use kixico_functions::services::ledger_service::PgLedger;
use kixico_functions::services::role_service::PgRoleDirectory;
use kixico_functions::{routes, AppState};
use kixico_shared::clients::db::create_pool;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    kixico_shared::middleware::init_tracing("kixico-functions");

    let config = AppConfig::load()?;
    let port = config.port;

    // Set JWT_SECRET env var for the auth extractor middleware
    std::env::set_var("JWT_SECRET", &config.jwt_secret);

    let db = create_pool(&config.database_url, config.db_pool_size)?;
    let metrics_handle = kixico_shared::middleware::init_metrics()?;

    let state = Arc::new(AppState {
        config,
        roles: Arc::new(PgRoleDirectory::new(db.clone())),
        ledger: Arc::new(PgLedger::new(db.clone())),
        db,
        metrics_handle,
    });

    let app = routes::router(state);

    let addr = format!("0.0.0.0:{port}");
    tracing::info!(addr = %addr, "kixico-functions starting");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
