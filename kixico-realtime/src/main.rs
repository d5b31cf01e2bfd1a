use std::sync::Arc;

use kixico_realtime::config::{AppConfig, FeedTransport};
use kixico_realtime::feed::{AmqpFeed, ChangeFeed, MemoryFeed, UnavailableFeed};
use kixico_realtime::presence::OnlinePresence;
use kixico_realtime::services::notification_service::PgNotificationStore;
use kixico_realtime::services::profile_service::PgOnlineDirectory;
use kixico_realtime::{routes, AppState};
use kixico_shared::clients::amqp::AmqpClient;
use kixico_shared::clients::db::create_pool;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    kixico_shared::middleware::init_tracing("kixico-realtime");

    let config = AppConfig::load()?;
    let port = config.port;

    // Set JWT_SECRET env var for the auth extractor middleware
    std::env::set_var("JWT_SECRET", &config.jwt_secret);

    let db = create_pool(&config.database_url, config.db_pool_size)?;
    let metrics_handle = kixico_shared::middleware::init_metrics()?;

    let (feed, local_bus) = build_feed(&config).await;

    let directory = Arc::new(PgOnlineDirectory::new(db.clone()));
    let presence = OnlinePresence::mount(feed.as_ref(), directory).await;

    let state = Arc::new(AppState {
        notifications: Arc::new(PgNotificationStore::new(db.clone())),
        db,
        config,
        feed,
        local_bus,
        presence,
        metrics_handle,
    });

    let app = routes::router(state);

    let addr = format!("0.0.0.0:{port}");
    tracing::info!(addr = %addr, "kixico-realtime starting");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// A broker that is down at startup leaves the service up on an idle local
/// bus; components mount without live updates and health reports degraded.
async fn build_feed(config: &AppConfig) -> (Arc<dyn ChangeFeed>, Option<MemoryFeed>) {
    match config.feed_transport {
        FeedTransport::Amqp => match AmqpClient::connect(&config.amqp_url).await {
            Ok(client) => (Arc::new(AmqpFeed::new(client)), None),
            Err(e) => {
                tracing::error!(error = %e, "change feed broker unreachable, live updates disabled");
                (Arc::new(UnavailableFeed), None)
            }
        },
        FeedTransport::Webhook => {
            let bus = MemoryFeed::new();
            (Arc::new(bus.clone()), Some(bus))
        }
    }
}
