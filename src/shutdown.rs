use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use crate::error::{DrainError, Result};

/// Install a handler that cancels the returned token on SIGTERM or SIGINT.
///
/// The token is handed to the completion listener and the probe scheduler,
/// so a signal stops event handling and abandons every pending idle probe.
pub fn install_shutdown_handler() -> Result<CancellationToken> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| DrainError::Internal(format!("failed to install SIGTERM handler: {e}")))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| DrainError::Internal(format!("failed to install SIGINT handler: {e}")))?;

    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, abandoning pending idle probes");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, abandoning pending idle probes");
            }
        }

        token_clone.cancel();
    });

    Ok(token)
}
