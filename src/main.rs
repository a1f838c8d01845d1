use std::sync::Arc;

use medtransport_realtime::{
    handlers::build_router,
    services::task_supervisor::TaskSupervisor,
    state::{AppConfig, AppState},
    MarketplaceResult,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> MarketplaceResult<()> {
    // Load .env file if present
    let env_loaded = dotenvy::dotenv().is_ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if env_loaded {
        tracing::info!("loaded .env file");
    }

    let config = AppConfig::from_env()?;
    let addr = config.socket_addr()?;
    let app_state = Arc::new(AppState::new(config).await?);
    tracing::info!("Using {} store", app_state.store.backend_name());

    let mut supervisor = TaskSupervisor::new();
    if app_state.config.generator.enabled {
        let generator = Arc::new(app_state.data_generator());
        generator.seed().await?;
        generator.schedule(&mut supervisor);
        tracing::info!("Data generator running with {} periodic tasks", supervisor.task_count());
    } else {
        tracing::info!("Data generator disabled");
    }

    let app = build_router(app_state.clone())?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Server running on {}", addr);

    let shutdown = supervisor.token();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => tracing::info!("Shutdown signal received"),
                _ = shutdown.cancelled() => {}
            }
        })
        .await?;

    supervisor.shutdown().await;
    Ok(())
}
