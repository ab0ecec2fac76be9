use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use crate::errors::FleetError;

/// Cancel `cancel` on Ctrl-C or SIGTERM; forward SIGHUP as a reload request.
#[cfg(unix)]
pub fn spawn_listener(cancel: CancellationToken, reload: mpsc::Sender<()>) -> Result<(), FleetError> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::signal::ctrl_c() => {
                    info!("Received Ctrl-C, shutting down");
                    break;
                }
                _ = terminate.recv() => {
                    info!("Received SIGTERM, shutting down");
                    break;
                }
                _ = hangup.recv() => {
                    info!("Received SIGHUP, reloading agents");
                    if reload.try_send(()).is_err() {
                        warn!("Reload already pending, ignoring SIGHUP");
                    }
                }
            }
        }
        cancel.cancel();
    });
    Ok(())
}

#[cfg(not(unix))]
pub fn spawn_listener(cancel: CancellationToken, _reload: mpsc::Sender<()>) -> Result<(), FleetError> {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C, shutting down");
                cancel.cancel();
            }
        }
    });
    Ok(())
}
