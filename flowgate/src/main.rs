//! flowgate entry point

use std::net::SocketAddr;
use std::time::Duration;

use flowgate::captcha::CaptchaStore;
use flowgate::{config::Config, database, handlers, observability, scheduler, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    observability::init_tracing(&config);

    let pool = database::create_pool(&config.database).await?;
    database::init_schema(&pool).await?;

    let state = AppState::new(config, pool);
    CaptchaStore::start_sweeper(state.captcha.clone());

    let mut jobs = scheduler::start(state.clone()).await?;

    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.server.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "flowgate listening");

    let shutdown_timeout = Duration::from_secs(state.config.server.shutdown_timeout_secs);
    let app = handlers::build_router(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // drain background work bounded by the configured timeout
    match tokio::time::timeout(shutdown_timeout, jobs.shutdown()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "scheduler shutdown failed"),
        Err(_) => tracing::warn!("scheduler shutdown timed out"),
    }

    tracing::info!("flowgate stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    tracing::info!("shutdown signal received");
}
