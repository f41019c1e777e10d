//! Cooperative stop signals
//!
//! Long running jobs and watch loops observe a [`StopSignal`]; whoever owns
//! the matching [`StopHandle`] decides when they should wind down.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::warn;

/// Create a connected handle/signal pair.
pub fn stop_pair() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle { tx: Arc::new(tx) }, StopSignal { rx })
}

/// Triggers every [`StopSignal`] cloned from the same pair.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }
}

/// One-shot notification that work should stop.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        stop_pair().1
    }

    /// A signal that fires when the process receives an interrupt.
    ///
    /// Must be called from within a tokio runtime.
    pub fn ctrl_c() -> Self {
        let (handle, signal) = stop_pair();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "failed to listen for Ctrl+C");
                return;
            }
            handle.stop();
        });
        signal
    }

    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the signal has fired. Pends forever if every handle was
    /// dropped without stopping.
    pub async fn stopped(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|stopped| *stopped).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
