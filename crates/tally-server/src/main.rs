//! Tally server - statistics endpoint with pluggable cached providers

use anyhow::Result;
use async_trait::async_trait;
use axum::{Router, extract::State, routing::get};
use clap::Parser;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use sqlx::sqlite::SqlitePoolOptions;
use std::net::SocketAddr;
use std::path::Path;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;
mod providers;

use config::{CacheSettings, Config, LoggingConfig};
use providers::build_registry;
use tally_api::{
    ApiError, ApiHost, Authorizer, EndpointHooks, RequestContext, StatisticsEndpoint,
};
use tally_cache::{Cache, MemoryStore, RedisConfig, RedisStore};

/// Tally - statistics API over database tables, with response caching
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    /// Bind address
    #[arg(long, env = "TALLY_BIND")]
    bind: Option<String>,

    /// Port
    #[arg(short, long, env = "TALLY_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config)?;

    init_logging(&config.logging);

    info!("Starting Tally v{}", env!("CARGO_PKG_VERSION"));

    // Database pool for the configured statistic tables
    if let Some(parent) = Path::new(&config.database.path).parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    let db_url = format!("sqlite:{}?mode=rwc", config.database.path);
    let pool = SqlitePoolOptions::new().connect(&db_url).await?;

    // Optional page cache
    let cache = build_cache(&config.cache)?;
    if cache.is_some() {
        info!(
            backend = %config.cache.backend,
            ttl = ?config.cache.ttl,
            "statistic page cache enabled"
        );
    }

    // Provider registry
    let registry = build_registry(
        &pool,
        &config.statistics,
        cache.map(|cache| (cache, config.cache.ttl)),
    )?;
    if registry.is_empty() {
        info!("No statistics configured; every /stats request will 404");
    }

    let endpoint = StatisticsEndpoint::new(registry).with_hooks(RequestLogHooks);

    let mut host = ApiHost::new();
    if let Some(api_key) = config.auth.api_key.clone() {
        info!("API key authorization enabled");
        host = host.authorizer(ApiKeyAuthorizer { api_key });
    }
    let mut app = host.build(endpoint.routes());

    // Prometheus metrics
    let metrics_handle = PrometheusBuilder::new().install_recorder()?;
    app = app.merge(metrics_routes(metrics_handle));

    // Determine bind address
    let bind_addr = args.bind.unwrap_or(config.server.bind_address);
    let port = args.port.unwrap_or(config.server.port);
    let addr: SocketAddr = format!("{}:{}", bind_addr, port).parse()?;

    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Build the configured cache client, if enabled.
fn build_cache(settings: &CacheSettings) -> Result<Option<Cache>> {
    if !settings.enabled {
        return Ok(None);
    }

    let cache = match settings.backend.as_str() {
        "redis" => Cache::new(RedisStore::new(RedisConfig {
            host: settings.redis.host.clone(),
            port: settings.redis.port,
        })?),
        _ => Cache::new(MemoryStore::new()),
    };

    Ok(Some(cache))
}

/// Gates every API route on the configured key.
struct ApiKeyAuthorizer {
    api_key: String,
}

#[async_trait]
impl Authorizer for ApiKeyAuthorizer {
    async fn authorize(&self, ctx: &RequestContext) -> bool {
        ctx.header("x-api-key") == Some(self.api_key.as_str())
    }
}

/// Logs failed statistics requests with their request id.
struct RequestLogHooks;

#[async_trait]
impl EndpointHooks for RequestLogHooks {
    async fn after_request(&self, ctx: &mut RequestContext, err: Option<&ApiError>) {
        if let Some(err) = err {
            error!(request_id = %ctx.request_id, uri = %ctx.uri, error = %err, "statistics request failed");
        }
    }
}

/// Create metrics routes with the Prometheus handle
fn metrics_routes(handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/metrics", get(get_metrics))
        .with_state(handle)
}

/// GET /metrics - Prometheus metrics endpoint
async fn get_metrics(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}

/// Initialize logging
fn init_logging(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    if config.format == "json" {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C handler");
    info!("Shutdown signal received");
}
