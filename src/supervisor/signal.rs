//! Process signals as a cancellation token.

use std::io;

use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Cancel the returned token on the first SIGTERM or SIGINT.
///
/// Handlers are registered before this returns, so a signal arriving right
/// after startup is not lost. Must be called inside a tokio runtime.
pub fn shutdown_on_signal(daemon: &'static str) -> io::Result<CancellationToken> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        let name = tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
            _ = trigger.cancelled() => return,
        };
        tracing::info!(daemon, signal = name, "Stopping daemon");
        trigger.cancel();
    });

    Ok(token)
}
