//! Job queue server.
//!
//! Starts the job system with the demo processor, serves the admin routes
//! behind a bearer-token guard and drains everything on SIGINT/SIGTERM.

use std::sync::Arc;

use actors::DemoProcessor;
use anyhow::Context;
use api::{JobSystem, LifecycleState, Settings, ShutdownOrchestrator, ShutdownOutcome, logging};
use tokio::sync::watch;

mod auth;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::from_env().context("Failed to load configuration")?;
    logging::init(settings.log_level);

    tracing::info!("Starting job queue server v{}", env!("CARGO_PKG_VERSION"));

    let processor = Arc::new(DemoProcessor::new(settings.demo_job_delay));
    let system = Arc::new(
        JobSystem::start(settings.clone(), processor)
            .await
            .context("Failed to start job system")?,
    );

    let orchestrator = ShutdownOrchestrator::new(system.clone());
    let trigger = orchestrator.trigger_handle();
    let _signals = orchestrator
        .listen_for_signals()
        .context("Failed to install signal handlers")?;

    // Exit decisions are made here, independent of in-flight admin requests.
    let (outcome_tx, mut outcome_rx) = watch::channel(None::<ShutdownOutcome>);
    let grace = settings.shutdown_timeout;
    tokio::spawn(async move {
        let result = orchestrator.run().await;
        let code = api::exit_code(&result);
        if code != 0 {
            std::process::exit(code);
        }
        outcome_tx.send_replace(result.ok());
        tokio::time::sleep(grace).await;
        tracing::error!("Admin server did not stop within {:?}; exiting", grace);
        std::process::exit(1);
    });

    let token = auth::AdminToken::new(settings.admin_token.clone());
    if !token.is_configured() {
        tracing::warn!("ADMIN_TOKEN is not set; admin routes refuse every request");
    }
    let app = api::admin::router(system.service().clone()).layer(
        axum::middleware::from_fn_with_state(token, auth::require_admin_token),
    );

    let listener = tokio::net::TcpListener::bind(settings.admin_addr)
        .await
        .with_context(|| format!("Failed to bind TCP listener on {}", settings.admin_addr))?;
    tracing::info!("Admin routes listening on http://{}", settings.admin_addr);

    // Stop accepting requests as soon as draining starts. A disabled system
    // never drains, so the orchestrator finishing also counts.
    let mut state = system.watch_state();
    let mut finished = outcome_rx.clone();
    let stop_serving = async move {
        tokio::select! {
            _ = state.wait_for(LifecycleState::is_stopping) => {}
            _ = finished.wait_for(Option::is_some) => {}
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(stop_serving)
        .await
    {
        tracing::error!("Admin server terminated unexpectedly: {}", e);
        trigger.teardown();
    }

    let outcome = *outcome_rx
        .wait_for(Option::is_some)
        .await
        .context("Shutdown task stopped without an outcome")?;
    tracing::info!("Server shutdown complete ({:?})", outcome);
    Ok(())
}
