//! # Whisper Batch Backend
//!
//! HTTP service that turns uploaded audio files into transcripts and
//! subtitles asynchronously. Submissions return immediately with a job id;
//! clients poll for progress and download the artifacts once the job
//! completes. One Whisper model is kept resident at a time and a bounded
//! pool of executors works through the queue.

mod config;
mod device;
mod engine;
mod error;
mod handlers;
mod health;
mod jobs;
mod middleware;
mod model;
mod state;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use engine::WhisperEngine;
use jobs::{JobRegistry, JobRunner};
use model::ModelCache;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Global flag flipped by the signal handler to request a graceful stop.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;
    config.ensure_directories()?;

    info!("Starting whisper-batch-backend v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded: {}:{}",
        config.server.host, config.server.port
    );

    let registry = Arc::new(JobRegistry::new());
    let engine = Arc::new(WhisperEngine::new(config.paths.models_dir.clone()));
    let cache = Arc::new(ModelCache::new(engine));
    let runner = Arc::new(JobRunner::new(
        registry.clone(),
        cache.clone(),
        config.jobs.max_concurrent,
        config.paths.upload_dir.clone(),
        config.paths.output_dir.clone(),
        config.transcription.language.clone(),
    ));

    let app_state = AppState::new(config.clone(), registry, cache, runner);
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
            .wrap(Logger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/system", web::get().to(health::system_info))
                    .route("/upload", web::post().to(handlers::files::upload))
                    .route("/download/{filename}", web::get().to(handlers::files::download))
                    // /jobs/purge before /jobs/{id} so "purge" is not taken
                    // for a job id
                    .route("/jobs/purge", web::post().to(handlers::jobs::purge))
                    .route("/jobs", web::post().to(handlers::jobs::submit))
                    .route("/jobs", web::get().to(handlers::jobs::list))
                    .route("/jobs/{id}", web::get().to(handlers::jobs::get))
                    .route("/jobs/{id}/cancel", web::post().to(handlers::jobs::cancel))
                    .route("/batches", web::post().to(handlers::batches::submit))
                    .route("/batches/{id}", web::get().to(handlers::batches::get))
                    .route("/models", web::get().to(handlers::models::list))
                    .route("/models/switch", web::post().to(handlers::models::switch)),
            )
            // Health check at the root too, for load balancer probes
            .route("/health", web::get().to(health::health_check))
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

fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "whisper_batch_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

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

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
