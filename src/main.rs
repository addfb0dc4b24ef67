use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::Context;
use tower_http::cors::CorsLayer;

use parcel_router::api::api_routes;
use parcel_router::config::{AppConfig, CONFIG_PATH_ENV, ServerConfig};
use parcel_router::pipeline::{DeliveryPipeline, spawn_retry_driver};
use parcel_router::registry::AdapterRegistries;
use parcel_router::routing::{JournalTarget, RoutingEngine};
use parcel_router::store::DeliveryStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let app_config = AppConfig::from_env().context("Failed to load routing config")?;
    let server_config = ServerConfig::from_env();

    eprintln!("📦 Parcel Router v{}", env!("CARGO_PKG_VERSION"));
    match std::env::var(CONFIG_PATH_ENV) {
        Ok(path) => eprintln!("   Config: {}", path),
        Err(_) => eprintln!("   Config: built-in sample (set {} to override)", CONFIG_PATH_ENV),
    }
    eprintln!(
        "   Accounts: {}, targets: {}, rules: {}",
        app_config.mail_accounts.len(),
        app_config.targets.len(),
        app_config.routing_rules.len()
    );
    eprintln!(
        "   Retries: every {}s, max {} attempts",
        server_config.retry_interval.as_secs(),
        server_config.retry.max_attempts
    );
    eprintln!("   API: http://0.0.0.0:{}/deliveries\n", server_config.port);

    // ── Engines ──────────────────────────────────────────────────────────
    // Concrete target integrations run outside this process; every target
    // key is served by the journal.
    let journal = Arc::new(JournalTarget::new());
    let registries = Arc::new(AdapterRegistries::builtin(journal));

    let store = DeliveryStore::new();
    let router = Arc::new(RoutingEngine::new(
        app_config,
        Arc::clone(&registries),
        server_config.retry,
    ));
    let pipeline = Arc::new(DeliveryPipeline::new(
        Arc::clone(&registries),
        Arc::clone(&store),
        Arc::clone(&router),
    ));

    let (retry_handle, retry_shutdown) =
        spawn_retry_driver(store, router, server_config.retry_interval);

    // ── HTTP ─────────────────────────────────────────────────────────────
    let app = api_routes(pipeline, registries).layer(CorsLayer::permissive());
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", server_config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", server_config.port))?;
    tracing::info!(port = server_config.port, "HTTP server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutdown requested");
        })
        .await
        .context("HTTP server failed")?;

    retry_shutdown.store(true, Ordering::Relaxed);
    retry_handle.abort();

    Ok(())
}
