mod anomaly;
mod api;
mod config;
mod control;
mod db;
mod error;
mod gateway;
mod mqtt;
mod notify;
mod parser;
mod reading_cache;

use std::sync::Arc;

use anyhow::Result;
use tokio::{net::TcpListener, signal};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::{
    anomaly::AnomalyLimits,
    api::AppState,
    config::Config,
    db::store::{PgSnapshotStore, SnapshotStore},
    gateway::GatewayService,
    mqtt::MqttCommandDispatcher,
    notify::RedisNotifier,
    reading_cache::ValidReadingCache,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env (ignore error if file absent — env vars may be set externally)
    let _ = dotenvy::dotenv();

    // Initialise tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    // Load config
    let config = Config::from_env()?;

    // Connect to DB and run migrations
    let pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&pool).await?;
    info!("Database ready");

    // Live-update channel
    let notifier = RedisNotifier::connect(&config.redis_url, &config.live_channel).await?;
    info!(channel = %config.live_channel, "Redis live channel ready");

    // MQTT broker connection; the event loop is polled in its own task
    let (mqtt_client, eventloop) = mqtt::connect(&config);

    // Build the gateway core with its collaborators injected explicitly
    let store: Arc<dyn SnapshotStore> = Arc::new(PgSnapshotStore::new(pool));
    let dispatcher = MqttCommandDispatcher::new(
        mqtt_client.clone(),
        config.command_topic_prefix.clone(),
    );
    let limits = AnomalyLimits {
        max_temp_delta: config.max_temp_delta,
        max_humidity_delta: config.max_humidity_delta,
    };
    let gateway = Arc::new(GatewayService::new(
        store.clone(),
        Arc::new(dispatcher),
        Arc::new(notifier),
        ValidReadingCache::new(),
        limits,
    ));

    // Spawn the inbound telemetry loop
    tokio::spawn(mqtt::run_ingest_loop(
        eventloop,
        mqtt_client,
        gateway.clone(),
        config.data_topic.clone(),
    ));

    // Start HTTP server
    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, api::router(AppState { store, gateway }))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
