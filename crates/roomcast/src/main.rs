//! # roomcast
//!
//! Event hub server binary: loads settings, initialises logging, registers
//! the demo handlers and serves the hub next to `/health` and `/metrics`.

#![deny(unsafe_code)]

mod demo;
mod health;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusHandle;
use roomcast_server::{Server, ServerConfig};
use roomcast_settings::{LogFormat, RoomcastSettings};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// How long to wait for the listener to drain after Ctrl-C.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Room-aware WebSocket event hub.
#[derive(Parser, Debug)]
#[command(name = "roomcast", about = "Room-aware WebSocket event hub")]
struct Cli {
    /// Settings file (defaults to `~/.roomcast/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Route the WebSocket upgrade is mounted at.
    #[arg(long)]
    path: Option<String>,

    /// Outbound queue length per session.
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Dispatch peer-sent `connect`/`disconnect` events.
    #[arg(long)]
    allow_reserved_events: bool,

    /// Log filter directive (`RUST_LOG` still wins).
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format.
    #[arg(long, value_parser = parse_log_format)]
    log_format: Option<LogFormat>,
}

fn parse_log_format(s: &str) -> Result<LogFormat, String> {
    LogFormat::parse(s).ok_or_else(|| format!("unknown log format '{s}' (expected pretty or json)"))
}

impl Cli {
    /// Flags win over the file and environment layers.
    fn apply(&self, settings: &mut RoomcastSettings) {
        if let Some(ref host) = self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(ref path) = self.path {
            settings.server.path.clone_from(path);
        }
        if let Some(capacity) = self.queue_capacity {
            settings.server.queue_capacity = capacity;
        }
        if self.allow_reserved_events {
            settings.server.allow_reserved_events = true;
        }
        if let Some(ref level) = self.log_level {
            settings.logging.level.clone_from(level);
        }
        if let Some(format) = self.log_format {
            settings.logging.format = format;
        }
    }
}

/// State for the non-WebSocket routes.
#[derive(Clone)]
struct AppState {
    server: Server,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

/// Application router: `/health`, `/metrics` and the hub's upgrade route.
fn build_app(server: &Server, metrics: Option<PrometheusHandle>) -> Router {
    let state = AppState {
        server: server.clone(),
        start_time: Instant::now(),
        metrics,
    };
    let routes = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state);

    server
        .attach(routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<health::HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.server.connection_count(),
        state.server.room_names().len(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics {
        Some(ref handle) => roomcast_server::metrics::render(handle).into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = match cli.config {
        Some(ref path) => roomcast_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => roomcast_settings::load_settings().with_context(|| {
            format!(
                "Failed to load settings from {}",
                roomcast_settings::settings_path().display()
            )
        })?,
    };
    cli.apply(&mut settings);

    roomcast_logging::init_subscriber(&settings.logging).context("Failed to initialise logging")?;

    let metrics = match roomcast_server::metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "metrics disabled");
            None
        }
    };

    let server = Server::new(ServerConfig::from(&settings.server));
    demo::install(&server);

    let app = build_app(&server, metrics);
    let (addr, handle) = server.serve(app).await.context("Failed to bind server")?;
    info!(
        "roomcast listening on http://{addr} (websocket at {})",
        server.config().path
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    info!("shutting down");
    server.shutdown().await;
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await.is_err() {
        warn!("listener did not stop within {SHUTDOWN_TIMEOUT:?}");
    }
    info!("shutdown complete");
    Ok(())
}
