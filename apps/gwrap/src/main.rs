use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

mod cli;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = cli::Cli::parse();
    let config = gwrap_common::Config::load(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config))?;

    info!(models = config.costs.models.len(), "loaded model price table");
    for model in &config.costs.models {
        info!(name = %model.name, input = model.input, output = model.output, "model");
    }

    // A missing key CSV is not fatal: the proxy still serves callers that
    // bring their own credential.
    let pool = match gwrap_pool::KeyPool::load(&config.keys.csv_path) {
        Ok(pool) => Arc::new(pool),
        Err(err) => {
            warn!(
                error = %err,
                path = %config.keys.csv_path,
                "failed to load key csv, accepting user-provided keys only"
            );
            Arc::new(gwrap_pool::KeyPool::empty(&config.keys.csv_path))
        }
    };

    let fast = gwrap_cache::FastCache::new(
        &config.redis.uri,
        Duration::from_secs(config.redis.ttl_secs),
    )?;
    fast.ping().await.context("failed to ping redis")?;
    info!(uri = %config.redis.uri, ttl_secs = config.redis.ttl_secs, "connected to redis");

    let store = Arc::new(
        gwrap_storage::RequestStore::connect(&config.storage.dsn)
            .await
            .context("failed to connect to audit store")?,
    );
    store.sync().await.context("failed to sync audit schema")?;
    info!(dsn = %config.storage.dsn, "connected to audit store");

    let transport: Arc<dyn gwrap_core::UpstreamTransport> = Arc::new(gwrap_core::WreqTransport::new(
        &config.upstream.base_url,
        Duration::from_secs(config.upstream.timeout_secs),
    )?);
    let engine = Arc::new(gwrap_core::ProxyEngine::new(
        gwrap_core::CostModel::from_config(&config.costs),
        gwrap_cache::CacheTier::new(fast, store.clone()),
        gwrap_core::GeminiClient::new(transport, pool),
        gwrap_storage::AuditSink::new(store.clone()),
        config.cache.max_temp,
    ));

    let app = axum::Router::new()
        .merge(gwrap_router::proxy_router(engine))
        .nest("/admin", gwrap_router::admin_router(store))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let bind = format!("0.0.0.0:{}", config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(%bind, "starting server");
    axum::serve(listener, app).await?;
    Ok(())
}
