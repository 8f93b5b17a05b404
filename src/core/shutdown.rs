//! Graceful shutdown for the server process
//!
//! One broadcast channel fans the stop signal out to the accept loop and
//! every connection task. The first SIGINT/SIGTERM asks for a clean stop;
//! a second one exits immediately.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Exit status used when a second signal forces the process down
const FORCED_EXIT_CODE: i32 = 130;

pub struct ShutdownCoordinator {
    shutdown_tx: broadcast::Sender<()>,
    shutdown_requested: Arc<AtomicBool>,
}

impl ShutdownCoordinator {
    pub fn new() -> (Self, broadcast::Receiver<()>) {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(8);
        let coordinator = Self {
            shutdown_tx,
            shutdown_requested: Arc::new(AtomicBool::new(false)),
        };
        (coordinator, shutdown_rx)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    pub fn trigger_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::Release);
        let _ = self.shutdown_tx.send(());
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Acquire)
    }

    /// Route process signals into this coordinator
    ///
    /// Must be called from within a tokio runtime.
    pub fn install_signal_handlers(&self) {
        setup_signal_handlers(
            self.shutdown_tx.clone(),
            Arc::clone(&self.shutdown_requested),
        );
    }

    /// Run `future_fn` with signal handling installed
    ///
    /// The closure receives the shutdown receiver to hand to the server.
    pub async fn guard<F, Fut, R, E>(future_fn: F) -> Result<R, E>
    where
        F: FnOnce(broadcast::Receiver<()>) -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        let (coordinator, shutdown_rx) = Self::new();
        coordinator.install_signal_handlers();
        let result = future_fn(shutdown_rx).await;
        drop(coordinator);
        result
    }
}

fn request_shutdown(
    tx: &broadcast::Sender<()>,
    requested: &AtomicBool,
    signal_count: &AtomicUsize,
    name: &str,
) {
    let previous = signal_count.fetch_add(1, Ordering::AcqRel);
    requested.store(true, Ordering::Release);
    let _ = tx.send(());
    if previous >= 1 {
        log::warn!("{} received again; exiting immediately", name);
        std::process::exit(FORCED_EXIT_CODE);
    }
    log::info!("{} received; draining connections", name);
}

fn setup_signal_handlers(shutdown_tx: broadcast::Sender<()>, shutdown_requested: Arc<AtomicBool>) {
    let signal_count = Arc::new(AtomicUsize::new(0));

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        // Writes to a vanished client must surface as EPIPE, not kill the process
        unsafe {
            libc::signal(libc::SIGPIPE, libc::SIG_IGN);
        }

        let signals = [
            (SignalKind::interrupt(), "SIGINT"),
            (SignalKind::terminate(), "SIGTERM"),
            (SignalKind::hangup(), "SIGHUP"),
        ];

        for (kind, name) in signals {
            let tx = shutdown_tx.clone();
            let requested = Arc::clone(&shutdown_requested);
            let counter = Arc::clone(&signal_count);

            tokio::spawn(async move {
                match signal(kind) {
                    Ok(mut stream) => {
                        while stream.recv().await.is_some() {
                            request_shutdown(&tx, &requested, &counter, name);
                        }
                    }
                    Err(e) => log::debug!("Cannot listen for {}: {}", name, e),
                }
            });
        }
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                request_shutdown(&shutdown_tx, &shutdown_requested, &signal_count, "Ctrl-C");
            }
        });
    }
}
