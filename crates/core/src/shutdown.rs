use tokio::sync::watch;

/// Process-wide shutdown signal observed by retry loops and transfers.
///
/// Cloning is cheap; every observer sees the flag flip exactly once.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

#[derive(Debug)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

/// Create a connected handle/signal pair.
pub fn shutdown_pair() -> (ShutdownHandle, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle { tx }, ShutdownSignal { rx })
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }
}

impl ShutdownSignal {
    /// A signal that never fires, for contexts without a shutdown driver.
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        // Keep the sender alive so the channel never reads as closed.
        std::mem::forget(tx);
        Self { rx }
    }

    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until shutdown is triggered.
    pub async fn wait(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}
