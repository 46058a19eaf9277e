use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tilegraph_api::config::ServerConfig;
use tilegraph_api::invalidator::Invalidator;
use tilegraph_api::renderer::HttpTileRenderer;
use tilegraph_api::router::build_app_router;
use tilegraph_api::state::AppState;
use tilegraph_core::capability::{SqlRunner, TileRenderer};
use tilegraph_db::PgSqlRunner;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tilegraph_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, dbname = %config.dbname, "Loaded server configuration");

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = tilegraph_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    tilegraph_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");

    let sql: Arc<dyn SqlRunner> = Arc::new(PgSqlRunner::new(pool.clone()));

    // --- Renderer ---
    let renderer: Arc<dyn TileRenderer> = Arc::new(
        HttpTileRenderer::new(config.renderer_url.clone()).expect("Failed to build renderer client"),
    );
    tracing::info!(url = %config.renderer_url, "Renderer configured");

    // --- Downstream cache invalidation ---
    let invalidator = match &config.varnish {
        Some(varnish) => {
            let invalidator = Invalidator::start(varnish)
                .await
                .expect("Failed to start cache invalidation");
            tracing::info!(host = %varnish.host, port = varnish.port, pool_size = varnish.pool_size, "Cache invalidation started");
            Some(invalidator)
        }
        None => {
            tracing::info!("Cache invalidation disabled");
            None
        }
    };

    // Log queue events (connection changes, overflow, exhaustion).
    let events_handle = match &invalidator {
        Some(Invalidator::Queue(queue)) => {
            let mut events = queue.subscribe();
            Some(tokio::spawn(async move {
                loop {
                    match events.recv().await {
                        Ok(event) => tracing::info!(?event, "Invalidation queue event"),
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Invalidation event logger lagged");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }))
        }
        _ => None,
    };

    // --- App state ---
    let state = AppState::new(config.clone(), sql, renderer, invalidator.clone())
        .expect("Invalid tile cache configuration");

    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");
    let grace = Duration::from_secs(config.shutdown_timeout_secs);

    if let Some(invalidator) = &invalidator {
        if tokio::time::timeout(grace, invalidator.shutdown()).await.is_err() {
            tracing::warn!("Cache invalidation did not shut down in time");
        }
        tracing::info!("Cache invalidation shut down");
    }

    // The queue closes its event channel once dropped.
    drop(invalidator);
    if let Some(handle) = events_handle {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }

    pool.close().await;
    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
