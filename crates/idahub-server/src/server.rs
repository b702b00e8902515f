//! HTTP server implementation using Axum.

use crate::handler::{handle_health, handle_rpc};
use crate::tools;
use axum::{
    routing::{get, post},
    Router as AxumRouter,
};
use idahub_core::config::{BackendRpcConfig, ServerConfig};
use idahub_core::{
    BackendClient, HealthMonitor, HttpBackendClient, InstanceRegistry, ResponseCache, Router,
    RouterOptions,
};
use serde_json::Value;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Application state shared across handlers.
pub struct AppState {
    pub registry: Arc<InstanceRegistry>,
    pub client: Arc<dyn BackendClient>,
    pub router: Router,
    pub monitor: Arc<HealthMonitor>,
    /// Full outputs of truncated tool calls
    pub cache: ResponseCache,
    /// Tool schemas served by `tools/list`; `None` until the first refresh
    pub catalog: RwLock<Option<Vec<Value>>>,
}

impl AppState {
    pub fn new(registry: Arc<InstanceRegistry>, client: Arc<dyn BackendClient>) -> Self {
        let monitor = HealthMonitor::new(Arc::clone(&registry), Arc::clone(&client));
        Self {
            router: Router::new(
                Arc::clone(&registry),
                Arc::clone(&client),
                RouterOptions::default(),
            ),
            monitor: Arc::new(monitor),
            registry,
            client,
            cache: ResponseCache::default(),
            catalog: RwLock::new(None),
        }
    }
}

/// Options for `idahub serve`.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub host: String,
    pub port: u16,
    /// Registry document; the platform default when unset
    pub registry_path: Option<PathBuf>,
    pub sweep_interval: Duration,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            registry_path: None,
            sweep_interval: ServerConfig::SWEEP_INTERVAL,
        }
    }
}

/// Open the registry at `path`, or at the platform default location.
pub fn open_registry(path: Option<&PathBuf>) -> idahub_core::Result<InstanceRegistry> {
    match path {
        Some(path) => InstanceRegistry::open_at(path),
        None => InstanceRegistry::open(),
    }
}

/// Start the JSON-RPC HTTP server.
///
/// Runs one sweep and a catalog refresh before binding, then keeps sweeping
/// in the background. Returns the actual address the server is bound to
/// (useful when port=0).
pub async fn start_server(options: ServeOptions) -> anyhow::Result<SocketAddr> {
    let registry = Arc::new(open_registry(options.registry_path.as_ref())?);
    info!("Registry: {}", registry.path().display());

    let client: Arc<dyn BackendClient> = Arc::new(HttpBackendClient::new()?);
    let state = Arc::new(AppState::new(registry, client));

    sweep(&state).await;
    match tools::refresh_catalog(&state).await {
        Ok(count) => info!("Serving {} tools", count),
        Err(e) => warn!("Initial tool refresh failed: {}", e),
    }

    spawn_sweeper(Arc::clone(&state), options.sweep_interval);

    // Configure CORS for local clients
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = AxumRouter::new()
        .route("/health", get(handle_health))
        .route(BackendRpcConfig::ENDPOINT_PATH, post(handle_rpc))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", options.host, options.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Server listening on {}", actual_addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Server error: {}", e);
        }
    });

    Ok(actual_addr)
}

/// Expire dead instances, then rediscover if nothing is left.
///
/// Failures are logged; the next tick tries again.
pub async fn sweep(state: &Arc<AppState>) {
    let monitor = Arc::clone(&state.monitor);
    match tokio::task::spawn_blocking(move || monitor.cleanup_stale_instances()).await {
        Ok(Ok(expired)) if !expired.is_empty() => {
            info!("Expired {} dead instances", expired.len());
        }
        Ok(Ok(_)) => {}
        Ok(Err(e)) => warn!("Stale instance sweep failed: {}", e),
        Err(e) => warn!("Stale instance sweep panicked: {}", e),
    }

    match state.monitor.rediscover_if_empty().await {
        Ok(found) if !found.is_empty() => {
            info!("Rediscovered {} instances", found.len());
            if let Err(e) = tools::refresh_catalog(state).await {
                warn!("Tool refresh after rediscovery failed: {}", e);
            }
        }
        Ok(_) => {}
        Err(e) => warn!("Rediscovery failed: {}", e),
    }
}

fn spawn_sweeper(state: Arc<AppState>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately and startup already swept.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            sweep(&state).await;
        }
    })
}
