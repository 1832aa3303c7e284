//! Meridian Server: the HTTP surface over the execution runtime.
//!
//! Exposes:
//! - **Execution (POST /server/v1/execute)**: runs a plan document and
//!   streams the tabular result.
//! - **Admin (GET /server/v1/executorInfo...)**: pool registry snapshots,
//!   per-pool stats and soft eviction.
//! - **Observability**: Prometheus metrics and JSON log appenders.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{response::IntoResponse, routing::get, Json, Router};
use meridian_common::config::AppConfig;
use meridian_relational::{
    CredentialProvider, DatabaseManager, PoolRegistry, StaticCredentialProvider, VendorRegistry,
};
use meridian_runtime::Executor;
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use serde_json::json;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub const METRICS_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

pub static EXECUTION_COUNT: Lazy<IntCounter> = Lazy::new(|| {
    let opts = Opts::new(
        "meridian_executions_total",
        "Total number of plans executed",
    );
    let counter = IntCounter::with_opts(opts).unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

pub static POOL_COUNT: Lazy<IntGauge> = Lazy::new(|| {
    let opts = Opts::new("meridian_pools", "Number of live connection pools");
    let gauge = IntGauge::with_opts(opts).unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

pub static ACTIVE_CONNECTIONS: Lazy<IntGauge> = Lazy::new(|| {
    let opts = Opts::new(
        "meridian_active_connections",
        "Connections currently lent out across all pools",
    );
    let gauge = IntGauge::with_opts(opts).unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

pub mod api;

pub use api::AppState;

pub struct MeridianServer {
    app_config_path: String,
    vendors: Vec<Arc<dyn DatabaseManager>>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    api_router: Router<Arc<AppState>>,
}

impl Default for MeridianServer {
    fn default() -> Self {
        Self {
            app_config_path: "config/meridian.yaml".to_string(),
            vendors: vec![],
            credentials: None,
            api_router: Router::new(),
        }
    }
}

impl MeridianServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_app_config(mut self, path: impl Into<String>) -> Self {
        self.app_config_path = path.into();
        self
    }

    /// Register a vendor capability. Call once per vendor the deployment
    /// supports; the embedder supplies the wire drivers through each
    /// manager's opener.
    pub fn with_vendor(mut self, manager: Arc<dyn DatabaseManager>) -> Self {
        self.vendors.push(manager);
        self
    }

    pub fn with_credential_provider(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(provider);
        self
    }

    /// Merge embedder routes into the `/server/v1` surface.
    pub fn with_api_router(mut self, router: Router<Arc<AppState>>) -> Self {
        self.api_router = router;
        self
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let app_config = AppConfig::from_file(&self.app_config_path)?;

        // Ensure logs directory exists
        std::fs::create_dir_all("logs").ok();

        let metrics_appender = tracing_appender::rolling::daily("logs", "metrics.jsonl");
        let errors_appender = tracing_appender::rolling::daily("logs", "errors.jsonl");

        let metrics_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(metrics_appender)
            .with_filter(tracing_subscriber::filter::filter_fn(|metadata| {
                metadata.target() == "metrics"
            }));

        let errors_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(errors_appender)
            .with_filter(tracing_subscriber::filter::filter_fn(|metadata| {
                metadata.target() == "errors"
            }));

        let stdout_layer =
            tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());

        tracing_subscriber::registry()
            .with(stdout_layer)
            .with(metrics_layer)
            .with(errors_layer)
            .try_init()
            .ok();

        let mut builder = VendorRegistry::builder();
        for manager in self.vendors {
            builder = builder.register(manager);
        }
        let vendors = Arc::new(builder.build());

        let credentials = self
            .credentials
            .unwrap_or_else(|| Arc::new(StaticCredentialProvider::new("anonymous", "")));

        let registry = Arc::new(PoolRegistry::new());
        let executor = Arc::new(Executor::new(
            Arc::clone(&vendors),
            Arc::clone(&registry),
            credentials,
            app_config.pools,
        ));

        let state = Arc::new(AppState {
            server_name: app_config.server.name.clone(),
            registry: Arc::clone(&registry),
            executor,
        });

        let mut app = Router::new()
            .route("/health", get(health_handler))
            .merge(api::create_api_router().merge(self.api_router).with_state(state));

        if app_config.server.observability_enabled {
            app = app.route("/metrics", get(metrics_handler));
            spawn_metrics_task(Arc::clone(&registry));
        }

        let addr: SocketAddr = app_config.server.admin_addr.parse()?;
        info!(
            server = %app_config.server.name,
            vendors = ?vendors.supported(),
            "Admin & execution server listening on {}",
            addr
        );

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;
        Ok(())
    }
}

/// Refresh pool gauges from registry snapshots.
fn spawn_metrics_task(registry: Arc<PoolRegistry>) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(METRICS_REFRESH_INTERVAL).await;
            let snapshot = registry.snapshot();
            let active: usize = snapshot.pools.iter().map(|p| p.active).sum();
            POOL_COUNT.set(snapshot.pools.len() as i64);
            ACTIVE_CONNECTIONS.set(active as i64);

            info!(
                target: "metrics",
                pools = snapshot.pools.len(),
                active_connections = active,
            );
        }
    });
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer).unwrap();

    axum::response::Response::builder()
        .status(axum::http::StatusCode::OK)
        .header(axum::http::header::CONTENT_TYPE, encoder.format_type())
        .body(axum::body::Body::from(buffer))
        .unwrap()
}
