//! Graceful-shutdown signal handling: resolves once either `SIGINT` (Ctrl-C)
//! or `SIGTERM` (the signal Kubernetes sends on pod termination) arrives.

/// Waits for a shutdown signal. Intended to be raced against a
/// `CancellationToken::cancel()` call via `tokio::select!` in each
/// controller's run loop.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
