//! Daemon entry point: builds the state graph, recovers in-flight
//! deliveries, starts the schedule clock, and waits for shutdown.

use crate::config::Settings;
use crate::db;
use crate::error::AppResult;
use crate::scheduling::ScheduleClock;
use crate::state::AppState;

/// Runs the scheduling daemon until a shutdown signal arrives.
pub async fn run(settings: Settings) -> AppResult<()> {
    let pool = db::establish_async_connection_pool(&settings.database).await?;

    if settings.database.auto_migrate {
        let applied = db::run_pending_migrations(&settings.database.url).await?;
        if !applied.is_empty() {
            tracing::info!(count = applied.len(), "Applied pending migrations");
        }
    }

    let state = AppState::new(pool, &settings)?;

    // Retry timers do not survive a restart; rebuild them from the
    // persisted non-terminal delivery logs before the clock starts.
    let recovered = state.tracker.recover_inflight().await?;
    if recovered > 0 {
        tracing::info!(recovered, "Recovered in-flight deliveries");
    }

    let clock = ScheduleClock::new(
        state.dispatcher.clone(),
        state.tracker.clone(),
        settings.scheduler.clone(),
    )
    .await?;
    clock.start().await?;

    tracing::info!(
        version = crate::pkg_version(),
        "reportflow daemon running"
    );

    shutdown_signal().await;

    tracing::info!("Shutting down");
    clock.stop().await?;
    state.tracker.shutdown();

    Ok(())
}

/// Completes when the process receives Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!(error = %e, "Failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
