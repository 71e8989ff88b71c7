use anyhow::Context;
use clap::Parser;
use server::{Deployment, config::Config, routes};
use services::services::recurring_tasks::RecurringTaskScheduler;
use tracing::info;
use utils::logging::init_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::parse();
    let deployment = Deployment::from_config(&config).await?;

    if config.disable_scheduler {
        info!("Recurring task scheduler disabled, use POST /functions/v1/create-recurring-tasks");
    } else {
        let _scheduler =
            RecurringTaskScheduler::spawn(deployment.db().clone(), config.scheduler_interval()).await;
    }

    let app = routes::router(deployment);
    let listener = tokio::net::TcpListener::bind(config.bind_addr())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr()))?;
    info!("Server running on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install Ctrl+C handler: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, stopping...");
}
