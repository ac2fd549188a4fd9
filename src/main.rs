//! # Call Bridge Backend - Main Application Entry Point
//!
//! Bridges telephony media streams to a realtime speech model. Every call
//! arrives as a WebSocket at `/media-stream`; the server opens a second
//! WebSocket to the model for that call and relays audio both ways,
//! transcoding between 8kHz μ-law and 24kHz PCM16.
//!
//! ## Application Architecture:
//! - **config**: Configuration layering (defaults, config.toml, environment)
//! - **state**: Shared metrics and the call admission counter
//! - **health**: Health and metrics endpoints
//! - **middleware**: Per-request metrics
//! - **handlers**: Read-only configuration endpoint
//! - **audio**: μ-law codec, resampling, framing, pending buffer
//! - **telephony**: Media-stream protocol and link state machine
//! - **realtime**: Model protocol and upstream socket client
//! - **session** / **bridge**: Per-call state and routing rules
//! - **websocket**: The per-call actor tying both sockets together
//! - **error**: Error types and HTTP error responses

mod audio;
mod bridge;
mod config;
mod error;
mod handlers;
mod health;
mod middleware;
mod realtime;
mod session;
mod state;
mod telephony;
mod websocket;

use actix_web::{web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set once SIGINT or SIGTERM arrives.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting call-bridge-backend v{}", env!("CARGO_PKG_VERSION"));
    info!(
        host = %config.server.host,
        port = config.server.port,
        model = %config.realtime.model,
        max_calls = config.bridge.max_concurrent_calls,
        "Configuration loaded"
    );
    if !config.has_credential() {
        warn!("OPENAI_API_KEY is not set; every call will fail to reach the realtime model");
    }

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let app_state = web::Data::new(AppState::new(config));

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            // Middleware runs in reverse registration order on the way in
            .wrap(middleware::MetricsMiddleware)
            .wrap(TracingLogger::default())
            .configure(routes)
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Route table, shared by the server and the route tests.
fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/media-stream", web::get().to(websocket::media_stream))
        .service(
            web::scope("/api/v1")
                .route("/health", web::get().to(health::health_check))
                .route("/metrics", web::get().to(health::detailed_metrics))
                .route("/config", web::get().to(handlers::get_config)),
        )
        .route("/health", web::get().to(health::health_check));
}

/// Initialize tracing.
///
/// ## Environment Variables:
/// - `RUST_LOG`: Controls what gets logged (e.g., "info", "call_bridge_backend=trace")
/// - If not set, defaults to "call_bridge_backend=debug,actix_web=info"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "call_bridge_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Listen for SIGTERM and SIGINT and raise the shutdown flag.
fn setup_signal_handlers() {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async {
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                (Err(e), _) | (_, Err(e)) => {
                    error!("Failed to install signal handlers: {}", e);
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Poll the shutdown flag every 100ms.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
