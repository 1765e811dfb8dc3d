use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Detects signals sent to the process and cancels the token once one arrives.
///
/// On Windows detached processes can't detect signals sent to them, so this should be enhanced in the future to
/// support another way of sending signals.
pub async fn detect_shutdown(cancelation: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                select! {
                    _ = tokio::signal::ctrl_c() => info!("Received interrupt"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = cancelation.cancelled() => return,
                };
                cancelation.cancel();
                return;
            }
            Err(e) => tracing::warn!("Failed to register SIGTERM handler {e:?}"),
        }
    }

    select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received interrupt");
            cancelation.cancel();
        },
        _ = cancelation.cancelled() => {}
    };
}
