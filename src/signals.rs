/// Termination request source.
///
/// SIGINT (Ctrl-C) and SIGTERM both become one cancellation of a shared
/// token. The token is program-wide: whichever supervision loop is active
/// observes it, and once cancelled it stays cancelled, so the restart driver
/// can also see a request that arrived between two child instances.
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Install SIGINT/SIGTERM listeners and return the token they cancel.
///
/// Must be called from within a tokio runtime. Only the first signal
/// matters; later ones are ignored by this listener.
pub fn install() -> std::io::Result<CancellationToken> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => tracing::warn!("received SIGINT, shutting down"),
            _ = sigterm.recv() => tracing::warn!("received SIGTERM, shutting down"),
        }
        trigger.cancel();
    });

    Ok(token)
}
