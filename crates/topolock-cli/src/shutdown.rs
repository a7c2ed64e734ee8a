//! Signal handling for interactive lock waits

use topolock_common::{CancelHandle, Context};
use tracing::{info, warn};

/// Derive a context that is canceled on Ctrl+C or SIGTERM
pub fn cancel_on_signal(parent: &Context) -> Context {
    let (ctx, handle) = parent.with_cancel();
    tokio::spawn(wait_for_signal(handle));
    ctx
}

async fn wait_for_signal(handle: CancelHandle) {
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
            info!("Received Ctrl+C, canceling lock wait...");
        }
        _ = terminate => {
            info!("Received SIGTERM, canceling lock wait...");
        }
    }

    handle.cancel();
}
