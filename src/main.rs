use credential_relay::clock::{Clock, SystemClock};
use credential_relay::config::Config;
use credential_relay::db::{self, CredentialStore, TranscriptStore};
use credential_relay::providers::{ProviderRegistry, build_http_client};
use credential_relay::router::{RelayState, relay_router};
use credential_relay::service::{CredentialGuard, OAuthExchanger, ResilientCaller, TokenRefresher};
use mimalloc::MiMalloc;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let cfg = Config::load()?;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.basic.loglevel.clone()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(false),
        )
        .init();

    info!(
        database_url = %cfg.basic.database_url,
        proxy = %cfg.http.proxy.as_ref().map(|u| u.as_str()).unwrap_or("<none>"),
        loglevel = %cfg.basic.loglevel,
        max_retries = cfg.retry.max_retries,
        refresh_skew_secs = cfg.refresh.skew_secs,
    );
    if cfg.basic.relay_key.is_empty() {
        warn!("relay_key is empty; key-protected routes will reject every request");
    }

    let pool = db::connect(&cfg.basic.database_url).await?;
    db::init_schema(&pool).await?;
    let store = CredentialStore::new(pool.clone());
    let transcripts = TranscriptStore::new(pool);

    let http = build_http_client(&cfg.http)?;
    let registry = ProviderRegistry::from_config(&cfg, http)?;
    if registry.providers().is_empty() {
        warn!("no providers configured");
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let refresher = TokenRefresher::new(registry.clone(), &cfg);
    let guard = CredentialGuard::spawn(store.clone(), refresher, clock.clone(), &cfg.refresh).await?;
    let caller = ResilientCaller::new(registry.clone(), guard, cfg.retry.clone());
    let exchanger = OAuthExchanger::new(registry, store.clone(), clock.clone());

    let relay_key: Arc<str> = Arc::from(cfg.basic.relay_key.clone());
    let state = RelayState::new(exchanger, caller, store, transcripts, clock, relay_key);
    let app = relay_router(state);

    let listener = TcpListener::bind(&cfg.basic.listen_addr).await?;
    info!("HTTP server listening on {}", cfg.basic.listen_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("HTTP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
