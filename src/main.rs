use std::sync::Arc;

use echarts_render_service::{
    cleanup::{CleanupConfig, CleanupScheduler},
    config::AppConfig,
    http::{self, AppState},
    manager::{ManagerConfig, TaskManager},
    metrics::MetricsCollector,
    oss::{AliyunOssAdapter, ObjectStore},
    queue::QueueConfig,
    rasterizer::{PlaceholderRasterizer, Rasterizer},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load()?;
    tracing::info!(port = config.port, production = config.is_production, "loaded configuration");

    let rasterizer: Arc<dyn Rasterizer> = Arc::new(PlaceholderRasterizer);

    let object_store: Option<Arc<dyn ObjectStore>> = match &config.oss {
        Some(oss_config) => {
            tracing::info!(bucket = %oss_config.bucket, region = %oss_config.region, "object store configured");
            Some(Arc::new(AliyunOssAdapter::new(oss_config.clone())?))
        }
        None => {
            tracing::warn!("no object store configured; rendered images will be returned as data URLs");
            None
        }
    };

    let metrics = Arc::new(MetricsCollector::new());

    let manager_config = ManagerConfig {
        queue: QueueConfig {
            max_concurrent: config.max_concurrent,
            task_timeout: std::time::Duration::from_secs(config.task_timeout_secs),
            retry_attempts: config.retry_attempts,
        },
        task_retention_days: config.task_retention_days,
    };
    let manager = TaskManager::new(manager_config, rasterizer, object_store, metrics);
    manager.start();

    let cleanup = CleanupScheduler::new(
        manager.clone(),
        CleanupConfig {
            cleanup_hour: config.cleanup_hour,
            max_retries: config.cleanup_max_retries,
        },
    );
    cleanup.start();

    let state = AppState {
        manager: manager.clone(),
        cleanup: cleanup.clone(),
    };
    let app = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cleanup.stop();
    manager.destroy();
    tracing::info!("shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
