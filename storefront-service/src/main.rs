use service_core::error::AppError;
use service_core::observability::logging::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use storefront_service::{
    build_router,
    config::StorefrontConfig,
    services::{
        Cache, InvalidationWorker, LogNotifier, MongoDb, Notifier, QueueClient, RedisCache,
        RedisQueue, SmtpNotifier,
    },
    AppState,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = StorefrontConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )?;

    storefront_service::services::metrics::init_metrics().map_err(AppError::InternalError)?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting storefront service"
    );

    tracing::info!("Initializing database connections");
    let db = MongoDb::connect(&config.mongodb.uri, &config.mongodb.database).await?;
    db.initialize_indexes().await?;
    let db = Arc::new(db);
    tracing::info!("Database initialized successfully");

    let cache: Arc<dyn Cache> = Arc::new(RedisCache::new(&config.redis).await?);
    let queue: Arc<dyn QueueClient> =
        Arc::new(RedisQueue::new(&config.redis, &config.queue).await?);
    tracing::info!(queue = %config.queue.name, "Redis cache and job queue initialized");

    let notifier: Arc<dyn Notifier> = if config.smtp.host.is_empty() {
        tracing::warn!("SMTP_HOST not set, outgoing e-mail will only be logged");
        Arc::new(LogNotifier)
    } else {
        Arc::new(SmtpNotifier::new(&config.smtp)?)
    };

    let state = AppState::new(
        config.clone(),
        db.clone(),
        db,
        cache.clone(),
        queue.clone(),
        notifier,
    )?;
    let auth_service = state.auth_service.clone();
    let pruner_shutdown = CancellationToken::new();
    let pruner_handle = state.rate_limiters.spawn_pruner(
        Duration::from_secs(config.rate_limit.prune_interval_seconds),
        pruner_shutdown.clone(),
    );
    let app = build_router(state)?;

    let worker = InvalidationWorker::new(queue, cache, &config.queue);
    let worker_shutdown = worker.shutdown_token();
    let worker_handle = worker.spawn();

    let addr = config.common.bind_address();

    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );
    let _guard = service_span.enter();

    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    service_core::axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Let the worker settle its current job before exiting
    worker_shutdown.cancel();
    if let Err(e) = worker_handle.await {
        tracing::error!(error = %e, "Invalidation worker terminated abnormally");
    }

    pruner_shutdown.cancel();
    if let Err(e) = pruner_handle.await {
        tracing::error!(error = %e, "Rate limiter pruner terminated abnormally");
    }
    auth_service.drain_outbox().await;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
