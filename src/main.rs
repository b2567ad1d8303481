//! # AMD AI Service - Main Application Entry Point
//!
//! This is the main entry point for the answering-machine-detection web
//! server. It sets up an Actix-web HTTP server with the following key
//! features:
//!
//! ## Application Architecture:
//! - **config**: Handles application configuration (TOML files + environment variables)
//! - **state**: Manages shared application state and metrics
//! - **limiter**: Sliding-window admission control for the API endpoints
//! - **audio**: Chunk buffering and the preprocessing pipeline
//! - **detection**: Classifier backends and the model lifecycle manager
//! - **websocket**: Streaming AMD sessions over WebSocket
//! - **health**: System health monitoring endpoints
//! - **middleware**: Custom request processing logic (logging, metrics)
//! - **handlers**: HTTP request handlers for the one-shot API
//! - **error**: Custom error types and HTTP error responses
//!
//! ## Request Paths:
//! A one-shot `POST /api/v1/amd/predict` classifies a complete upload
//! synchronously; `WS /api/v1/amd/stream` runs the buffering state machine
//! over live call audio. Both share one detector instance, so the expensive
//! model is loaded at most once per process no matter how traffic arrives.

mod audio;
mod config;
mod detection;
mod error;
mod handlers;
mod health;
mod limiter;
mod middleware;
mod state;
mod websocket;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use detection::AmdDetector;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Global shutdown signal that can be accessed from anywhere in the program.
/// Set by the signal handler task when SIGTERM/SIGINT arrives.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from files and environment variables
/// 2. **Sets up logging** for debugging and monitoring
/// 3. **Builds the detector** once, so every handler shares one model lifecycle
/// 4. **Configures the HTTP server** with middleware and routes
/// 5. **Handles graceful shutdown** when receiving system signals
///
/// ## Error Handling:
/// If any step fails (config loading, server binding, etc.), the function
/// returns an error and the program exits gracefully with an error message.
/// After startup, a single request failure never takes the process down.
#[actix_web::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting amd-ai-service v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded: {}:{} (backend: {})",
        config.server.host, config.server.port, config.detection.backend
    );

    // One detector for the whole process: the model lifecycle manager inside
    // it is the only thing allowed to load the model, and it loads lazily on
    // the first classification.
    let detector = Arc::new(AmdDetector::new(
        config.detection.clone(),
        config.audio.clone(),
    )?);

    let app_state = AppState::new(config.clone(), detector);
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .service(
                        web::scope("/amd")
                            .route("/predict", web::post().to(handlers::predict_amd))
                            .route("/model-info", web::get().to(handlers::model_info))
                            .route("/stream", web::get().to(websocket::amd_stream)),
                    ),
            )
            // Also provide health check at root level for load balancers
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    // Wait for either the server to finish OR a shutdown signal.
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

/// Initialize the tracing (logging) system for the application.
///
/// ## Environment Variables:
/// - `RUST_LOG`: Controls what gets logged (e.g., "debug", "amd_ai_service=debug")
/// - If not set, defaults to "amd_ai_service=debug,actix_web=info"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "amd_ai_service=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Set up signal handlers for graceful shutdown.
///
/// Listens for SIGTERM and SIGINT; whichever arrives first sets the global
/// shutdown flag so the server can finish in-flight requests before exiting.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

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

/// Wait for the shutdown signal to be set.
///
/// Polls the flag every 100ms; cheap enough that an event mechanism would be
/// overkill here.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
