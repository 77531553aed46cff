use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use video_service::api::{start_api_server, AppState};
use video_service::metadata_store::{PgVideoStore, VideoStore};
use video_service::probe::FfprobeInspector;
use video_service::remux::FfmpegRemuxer;
use video_service::s3_uploader::{ObjectStore, S3ObjectStore};
use video_service::thumbnails::ThumbnailCache;
use video_service::{Config, IngestPipeline, VideoSigner};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Arc::new(Config::load().context("Failed to load configuration")?);

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        bucket = %config.s3.bucket,
        "Starting Tubely Video Service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    if let Some(dir) = &config.media.temp_dir {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create temp dir {}", dir.display()))?;
    }

    let video_store = PgVideoStore::new(&config.database)
        .await
        .context("Failed to initialize video store")?;

    // Run migrations if enabled
    if config.database.run_migrations {
        video_store
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }
    let video_store: Arc<dyn VideoStore> = Arc::new(video_store);

    let object_store: Arc<dyn ObjectStore> = Arc::new(
        S3ObjectStore::new(&config.s3)
            .await
            .context("Failed to initialize S3 client")?,
    );

    let pipeline = IngestPipeline::new(
        Arc::new(FfprobeInspector::from_config(&config.media)),
        Arc::new(FfmpegRemuxer::from_config(&config.media)),
        object_store.clone(),
        video_store.clone(),
        config.s3.bucket.clone(),
    )
    .context("Invalid S3 bucket name")?;

    let api_state = AppState {
        config: config.clone(),
        videos: video_store,
        pipeline: Arc::new(pipeline),
        signer: VideoSigner::new(object_store, config.presigned_url_expiry()),
        thumbnails: Arc::new(ThumbnailCache::new()),
    };

    // Spawn API server task
    let api_config = config.api.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = start_api_server(api_state, &api_config).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Video service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down video service");

    api_handle.abort();

    info!("Video service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
