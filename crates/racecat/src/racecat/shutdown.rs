use tokio::sync::watch;

/// Session-wide cancellation: flips from `false` to `true` once.
pub type ShutdownTx = watch::Sender<bool>;
pub type ShutdownRx = watch::Receiver<bool>;

pub fn channel() -> (ShutdownTx, ShutdownRx) {
    watch::channel(false)
}

pub fn is_triggered(rx: &ShutdownRx) -> bool {
    *rx.borrow()
}

/// Resolves once shutdown has been requested.
///
/// A sender dropped without ever firing means nobody can cancel any more, so this
/// then stays pending forever.
pub async fn triggered(rx: &mut ShutdownRx) {
    let fired = rx.wait_for(|v| *v).await.is_ok();
    if !fired {
        std::future::pending::<()>().await;
    }
}
