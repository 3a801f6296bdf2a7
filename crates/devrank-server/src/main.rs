//! devrank server - main entry point

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use devrank_common::logging::{init_logging, LogConfig};
use serde_json::json;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::compression::CompressionLayer;
use tracing::info;

use devrank_server::{
    cache::SubjectCache,
    config::Config,
    db::{self, PersistenceGateway},
    features,
    harvest::{
        BackoffPolicy, CredentialPool, GithubClient, HarvestPipeline, HarvestQueue, PgHarvestQueue, WorkerPool,
        WorkerPoolConfig,
    },
    lock::DistributedLock,
    middleware,
    ranking::RankingEngine,
    scheduler::Scheduler,
    store,
};

#[derive(Clone)]
struct AppState {
    db: sqlx::PgPool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let log_config = LogConfig::builder()
        .log_file_prefix("devrank-server")
        .filter_directives("devrank_server=debug,tower_http=debug,sqlx=info")
        .build()
        .merge_env()?;

    let _log_guard = init_logging(&log_config)?;

    info!("Starting devrank server");

    let config = Config::load()?;
    info!(
        host = %config.server.host,
        port = config.server.port,
        workers = config.harvest.workers,
        credentials = config.github.tokens.len(),
        "Configuration loaded"
    );

    let pool = db::create_pool(&config.database).await?;
    db::run_migrations(&pool).await?;

    let shared_store = store::connect(&config.redis).await?;
    let cache = SubjectCache::new(shared_store.clone(), config.cache_ttl());

    let credentials = Arc::new(CredentialPool::new(
        config.github.tokens.iter().cloned(),
        BackoffPolicy::from(&config.credentials),
    ));
    let client = Arc::new(GithubClient::new(&config.github, credentials)?);

    let queue: Arc<dyn HarvestQueue> = Arc::new(PgHarvestQueue::new(
        pool.clone(),
        config.harvest.max_attempts,
        Duration::from_secs(config.harvest.retry_base_delay_secs),
    ));

    let ranking = RankingEngine::new(pool.clone(), &config.ranking)?;
    let gateway = PersistenceGateway::new(pool.clone(), cache.clone());
    let pipeline = HarvestPipeline::new(client.clone(), gateway, ranking.clone(), cache.clone(), &config.harvest);

    let shutdown = CancellationToken::new();

    let workers = WorkerPool::new(
        queue.clone(),
        Arc::new(pipeline),
        WorkerPoolConfig::from(&config.harvest),
    )
    .spawn(shutdown.clone());

    let scheduler = if config.scheduler.enabled {
        let scheduler = Scheduler::new(
            pool.clone(),
            DistributedLock::new(shared_store),
            ranking.clone(),
            queue.clone(),
            client,
            config.scheduler.clone(),
        );
        Some(scheduler.spawn(shutdown.clone()))
    } else {
        info!("Scheduler disabled");
        None
    };

    let feature_state = features::FeatureState {
        db: pool.clone(),
        queue,
        ranking,
        cache,
        stale_after: chrono::Duration::hours(config.harvest.stale_after_hours),
    };

    let app = create_router(AppState { db: pool }, feature_state, &config);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on {}", addr);

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            server_shutdown.cancel();
        })
        .await?;

    // The server may also stop on its own; make sure background tasks follow
    shutdown.cancel();

    let drain = async {
        if let Err(e) = workers.await {
            tracing::error!(error = %e, "Worker pool task failed");
        }
        if let Some(handle) = scheduler {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Scheduler task failed");
            }
        }
    };

    let timeout = Duration::from_secs(config.server.shutdown_timeout_secs);
    if tokio::time::timeout(timeout, drain).await.is_err() {
        tracing::warn!(timeout_secs = timeout.as_secs(), "Background tasks did not stop in time");
    }

    info!("Server shut down gracefully");

    Ok(())
}

fn create_router(state: AppState, feature_state: features::FeatureState, config: &Config) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .with_state(state)
        .nest("/api/v1", features::router(feature_state))
        .layer(CompressionLayer::new())
        .layer(middleware::tracing_layer())
        .layer(middleware::cors_layer(&config.cors))
}

async fn health_check(State(state): State<AppState>) -> Result<Response, StatusCode> {
    match db::health_check(&state.db).await {
        Ok(()) => Ok((
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "database": "connected"
            })),
        )
            .into_response()),
        Err(e) => {
            tracing::error!("Database health check failed: {:?}", e);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        },
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}
