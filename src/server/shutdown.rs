//! Process shutdown plumbing
//!
//! A watch channel fans the termination notice out to every component
//! that needs to drain. The HTTP server uses it to stop accepting new
//! connections while in-flight admission requests finish.

use tokio::sync::watch;
use tracing::info;

/// Cloneable receiver side of the shutdown notice.
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Resolves once shutdown has been requested. A dropped
    /// [`ShutdownHandle`] counts as a request.
    pub async fn triggered(mut self) {
        let _ = self.rx.wait_for(|stop| *stop).await;
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Sender side of the shutdown notice, held by main.
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        if self.tx.send(true).is_ok() {
            info!("Shutdown requested");
        }
    }
}

pub fn shutdown_pair() -> (ShutdownHandle, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle { tx }, Shutdown { rx })
}

/// Block until the process receives a termination signal. Returns the
/// signal name for the shutdown log line.
#[cfg(unix)]
pub async fn await_termination() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

#[cfg(not(unix))]
pub async fn await_termination() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("ctrl-c")
}
