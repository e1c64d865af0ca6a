//! Operator interrupts.

use thinscan_core::CancelHandle;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Cancel `cancel` on the first SIGINT or SIGTERM.
///
/// The returned task runs until a signal arrives; abort it once the work
/// it guards has finished.
pub fn cancel_on_signal(cancel: CancelHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received SIGINT (Ctrl+C)");
            }
            _ = terminate => {
                info!("Received SIGTERM");
            }
        }

        eprintln!("Interrupted: finishing teardown of mounted targets");
        cancel.cancel();
    })
}
