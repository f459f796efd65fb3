use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Funnels every external termination trigger into one cancellation token.
///
/// Installed before the first spec is started, so a signal arriving during
/// startup still drives a full, idempotent teardown of whatever has been
/// registered by then. The coordinator consumes the token exactly once via
/// its atomic guard, so racing trigger paths are harmless.
pub struct SignalBridge;

impl SignalBridge {
    pub fn install(cancel: CancellationToken) {
        tokio::spawn(Self::listen(cancel));
    }

    #[cfg(unix)]
    async fn listen(cancel: CancellationToken) {
        use tokio::signal::unix::{signal, SignalKind};

        let mut interrupt = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "failed to install SIGINT handler");
                return;
            }
        };
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        };

        loop {
            tokio::select! {
                _ = interrupt.recv() => info!("received SIGINT"),
                _ = terminate.recv() => info!("received SIGTERM"),
            }
            if cancel.is_cancelled() {
                warn!("shutdown already in progress, ignoring repeated signal");
            } else {
                cancel.cancel();
            }
        }
    }

    #[cfg(not(unix))]
    async fn listen(cancel: CancellationToken) {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            info!("received interrupt");
            if cancel.is_cancelled() {
                warn!("shutdown already in progress, ignoring repeated signal");
            } else {
                cancel.cancel();
            }
        }
    }
}
