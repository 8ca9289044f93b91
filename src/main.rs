//! # Whisper API Backend - Main Application Entry Point
//!
//! An OpenAI-compatible speech transcription server. Models are loaded on
//! first use and kept resident in a per-kind cache, so concurrent requests for
//! the same model, device and precision share one instance while requests for
//! different combinations load independently.
//!
//! ## Application Architecture:
//! - **config**: layered configuration (defaults, `config.toml`, environment)
//! - **cache**: cache keys, the per-key lock table, the model cache and the
//!   lifecycle coordinator that fronts one cache per model kind
//! - **device**: GPU detection and device selection
//! - **transcription**: candle Whisper inference and response rendering
//! - **audio**: upload decoding
//! - **state**: shared application state and metrics
//! - **health**, **handlers**, **middleware**: the HTTP surface
//! - **error**: error types and their HTTP responses

mod audio;
mod cache;
mod config;
mod device;
mod error;
mod handlers;
mod health;
mod middleware;
mod state;
mod transcription;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use cache::{LifecycleCoordinator, ModelKind, UnloadTarget};
use config::AppConfig;
use device::DeviceManager;
use state::AppState;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transcription::{CandleBackend, HubSettings};

/// ## Startup sequence:
/// 1. Load `.env`, set up tracing, load and validate configuration
/// 2. Detect GPUs and build the model backend and lifecycle coordinator
/// 3. Start preloading configured models in the background
/// 4. Serve HTTP until SIGINT / SIGTERM, then release every resident model
#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;

    info!("Starting whisper-api-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    let gpu_count = DeviceManager::gpu_count(config.models.gpu_count);
    let backend = CandleBackend::new(HubSettings::from_env(config.models.hf_cache_dir.clone()))?;
    let models = LifecycleCoordinator::new(backend, gpu_count);
    info!(gpu_count, "Model lifecycle coordinator ready");

    let app_state = AppState::new(config.clone(), models);
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    actix_web::rt::spawn(preload_models(app_state.clone()));

    info!("Starting HTTP server on {}", bind_addr);

    let server_state = app_state.clone();
    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(server_state.clone()))
            .wrap(cors)
            .wrap(middleware::MetricsMiddleware)
            .wrap(TracingLogger::default())
            .service(
                web::scope("/v1")
                    .route("/models", web::get().to(handlers::list_models))
                    .route("/models/load", web::post().to(handlers::load_model))
                    .route("/models/unload", web::post().to(handlers::unload_model))
                    .route(
                        "/audio/transcriptions",
                        web::post().to(handlers::create_transcription),
                    ),
            )
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config)),
            )
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .disable_signals()
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    let released = app_state.models.release_target(UnloadTarget::All).await;
    info!(released, "Server stopped gracefully");
    Ok(())
}

/// `RUST_LOG` controls the filter; the default is
/// `whisper_api_backend=debug,actix_web=info`.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "whisper_api_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Warm every `models.preload` entry. A failed entry is logged and skipped.
async fn preload_models(state: AppState) {
    let entries = state.get_config().models.preload;
    for entry in entries {
        let kind = match entry.kind.parse::<ModelKind>() {
            Ok(kind) => kind,
            Err(e) => {
                warn!("Skipping preload entry: {}", e);
                continue;
            }
        };

        let key = match handlers::resolve_key(
            &state,
            kind,
            entry.model.as_deref(),
            entry.device.as_deref(),
            entry.compute_type.as_deref(),
            &serde_json::Map::new(),
        ) {
            Ok(key) => key,
            Err(e) => {
                warn!(?kind, "Skipping preload entry: {}", e);
                continue;
            }
        };

        match state.models.acquire(&key).await {
            Ok(_) => info!(key = %key, "Preloaded model"),
            Err(e) => warn!(key = %key, "Preload failed: {}", e),
        }
    }
}

/// Resolves on SIGINT (Ctrl+C) or SIGTERM.
async fn wait_for_shutdown() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received SIGINT");
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received SIGTERM");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {}
        _ = terminate => {}
    }
}
