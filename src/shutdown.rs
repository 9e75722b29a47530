//! Graceful shutdown: SIGINT/SIGTERM raise the shared cancellation flag.
//!
//! The paginator checks the flag before each page and the worker pool
//! between dispatches, so a signal lets in-flight clones finish and leaves
//! the remaining items for the next run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Exit status for a run aborted by a second signal (128 + SIGINT).
pub const FORCED_EXIT_CODE: i32 = 130;

/// Spawn a task that sets the returned flag on the first shutdown signal.
/// A second signal exits the process at once.
pub fn install() -> Arc<AtomicBool> {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();

    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        warn!("Shutdown signal received, finishing in-flight work (signal again to abort)...");
        flag.store(true, Ordering::SeqCst);

        wait_for_shutdown_signal().await;
        warn!("Second shutdown signal received, aborting");
        std::process::exit(FORCED_EXIT_CODE);
    });

    cancel
}

/// Wait for shutdown signals (SIGTERM, SIGINT, Ctrl+C)
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => debug!("Ctrl+C received"),
                    _ = terminate.recv() => debug!("SIGTERM received"),
                }
                return;
            }
            Err(e) => warn!("Cannot listen for SIGTERM: {}", e),
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => debug!("Ctrl+C received"),
        Err(e) => {
            // Without a handler the run simply cannot be cancelled.
            warn!("Cannot listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
