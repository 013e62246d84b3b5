//! Graceful Shutdown (C15, spec §9): ordered teardown of every subsystem on
//! `SIGINT`/`SIGTERM`.
//!
//! Grounded on the teacher's `tokio::select!` over `tokio::signal::ctrl_c()`
//! racing the run loop, generalized to cancel a shared root token and then
//! tear down subsystems in a fixed order, each bounded by a timeout so one
//! stuck subsystem cannot hang the process.

use std::time::Duration;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const SUBSYSTEM_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Waits for SIGINT or SIGTERM, then returns. `main` is responsible for the
/// teardown sequence that follows.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}

/// Runs `teardown` with a bounded grace period, logging (not panicking) on
/// timeout so the remaining subsystems still get a chance to shut down.
pub async fn with_timeout(name: &str, teardown: impl std::future::Future<Output = ()>) {
    match tokio::time::timeout(SUBSYSTEM_SHUTDOWN_TIMEOUT, teardown).await {
        Ok(()) => info!(subsystem = name, "shut down cleanly"),
        Err(_) => warn!(subsystem = name, timeout_secs = SUBSYSTEM_SHUTDOWN_TIMEOUT.as_secs(), "shutdown timed out"),
    }
}

/// Root cancellation token propagated to every long-running task (spec §5:
/// "`shutdown` sets a flag checked at every tick/worker message").
pub fn root_token() -> CancellationToken {
    CancellationToken::new()
}
