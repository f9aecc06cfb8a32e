//! Shutdown signal handling.

use tokio::signal;
use tracing::{error, info};

async fn wait_ctrl_c() -> &'static str {
    if let Err(e) = signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    "ctrl+c"
}

#[cfg(unix)]
async fn wait_unix(kind: signal::unix::SignalKind, name: &'static str) -> &'static str {
    match signal::unix::signal(kind) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            error!(signal = name, error = %e, "Failed to install signal handler");
            std::future::pending::<()>().await;
        }
    }
    name
}

/// Resolves when the process is asked to stop.
///
/// A handler that cannot be installed is logged and never fires; the others
/// still do.
pub async fn shutdown_signal() -> String {
    #[cfg(unix)]
    let sigterm = wait_unix(signal::unix::SignalKind::terminate(), "sigterm");
    #[cfg(unix)]
    let sigquit = wait_unix(signal::unix::SignalKind::quit(), "sigquit");

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<&str>();
    #[cfg(not(unix))]
    let sigquit = std::future::pending::<&str>();

    let signal_name = tokio::select! {
        name = wait_ctrl_c() => name,
        name = sigterm => name,
        name = sigquit => name,
    };

    info!(signal = signal_name, "Received shutdown signal");
    signal_name.to_string()
}
