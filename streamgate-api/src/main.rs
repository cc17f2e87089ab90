use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use streamgate_api::http::{create_router, AppState};
use streamgate_core::{
    catalog::StreamCatalog,
    logging,
    repository::{PaymentRepository, StreamRepository, WhitelistRepository},
    service::{AccessService, DeviceGate},
    session::SessionStore,
    signer::UrlSigner,
    upstream::UpstreamClient,
    Config,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load(None)?;

    // Fail fast on misconfigurations
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    logging::init_logging(&config.logging)?;
    info!("streamgate starting...");
    info!("HTTP address: {}", config.http_address());

    let pool: sqlx::PgPool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout_seconds))
        .idle_timeout(Duration::from_secs(config.database.idle_timeout_seconds))
        .connect(&config.database.url)
        .await
        .map_err(|e| anyhow::anyhow!("Database connection failed: {e}"))?;
    info!("Database connected");

    info!("Running database migrations...");
    sqlx::migrate!("../migrations")
        .run(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("Migration failed: {e}"))?;
    info!("Migrations completed");

    let sessions = SessionStore::connect(&config.redis.url, config.redis.key_prefix.clone()).await?;
    info!("Session store connected");

    let streams = StreamRepository::new(pool.clone());
    let payments = PaymentRepository::new(pool.clone());
    let whitelist = WhitelistRepository::new(pool);

    let catalog = StreamCatalog::new(
        streams.clone(),
        Duration::from_secs(config.cache.stream_ttl_seconds),
    );
    let signer = UrlSigner::new(
        config.security.signing_secret.as_bytes(),
        config.signature_validity(),
    )?;
    let upstream = Arc::new(UpstreamClient::new(&config.upstream, &config.cache)?);
    let access = AccessService::new(
        payments.clone(),
        whitelist,
        sessions.clone(),
        config.session_duration(),
    );
    let device_gate = DeviceGate::new(
        sessions.clone(),
        config.session_duration(),
        config.heartbeat_timeout(),
    );

    let state = AppState {
        config: Arc::new(config.clone()),
        catalog,
        streams,
        payments,
        sessions,
        signer,
        upstream,
        access,
        device_gate,
    };

    let router = create_router(state);
    let addr: SocketAddr = config.http_address().parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP server listening on {addr}");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
