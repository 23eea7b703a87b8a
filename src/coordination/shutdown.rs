//! Graceful shutdown
//!
//! Shutdown is sequenced so nothing in flight is lost: stop ingest, let the
//! partitions drain their queues, flush every open window through the
//! detectors, then close the outputs.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

/// Shutdown signal types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGTERM / SIGINT or end of input
    Graceful,
    /// Skip draining, flush what is already queued
    Urgent,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownSignal::Graceful => write!(f, "graceful"),
            ShutdownSignal::Urgent => write!(f, "urgent"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Time allowed for partitions to drain their queues
    pub drain_timeout_secs: u64,
    /// Time allowed for flushing windows and writing the last outputs
    pub flush_timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_secs: 10,
            flush_timeout_secs: 10,
        }
    }
}

/// Shutdown phase tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    Running,
    StoppingIngest,
    DrainingPartitions,
    FlushingWindows,
    ClosingOutputs,
    Complete,
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownPhase::Running => write!(f, "running"),
            ShutdownPhase::StoppingIngest => write!(f, "stopping_ingest"),
            ShutdownPhase::DrainingPartitions => write!(f, "draining_partitions"),
            ShutdownPhase::FlushingWindows => write!(f, "flushing_windows"),
            ShutdownPhase::ClosingOutputs => write!(f, "closing_outputs"),
            ShutdownPhase::Complete => write!(f, "complete"),
        }
    }
}

pub type PhaseFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Graceful shutdown coordinator
pub struct GracefulShutdown {
    config: ShutdownConfig,
    shutdown_requested: AtomicBool,
    phase: watch::Sender<ShutdownPhase>,
    signal_tx: broadcast::Sender<ShutdownSignal>,
    stop_tx: watch::Sender<bool>,
}

impl GracefulShutdown {
    pub fn new(config: ShutdownConfig) -> Self {
        let (phase, _) = watch::channel(ShutdownPhase::Running);
        let (signal_tx, _) = broadcast::channel(8);
        let (stop_tx, _) = watch::channel(false);

        Self {
            config,
            shutdown_requested: AtomicBool::new(false),
            phase,
            signal_tx,
            stop_tx,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ShutdownConfig::default())
    }

    /// Subscribe to shutdown signals
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownSignal> {
        self.signal_tx.subscribe()
    }

    /// Flips to true once shutdown is requested; survives late subscription
    pub fn stop_receiver(&self) -> watch::Receiver<bool> {
        self.stop_tx.subscribe()
    }

    pub fn phase_receiver(&self) -> watch::Receiver<ShutdownPhase> {
        self.phase.subscribe()
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    pub fn current_phase(&self) -> ShutdownPhase {
        *self.phase.borrow()
    }

    /// Request shutdown with specified signal type
    pub fn request_shutdown(&self, signal: ShutdownSignal) {
        if self.shutdown_requested.swap(true, Ordering::SeqCst) {
            warn!("Shutdown already requested, ignoring duplicate signal: {}", signal);
            return;
        }

        info!("Shutdown requested: {}", signal);
        let _ = self.signal_tx.send(signal);
        self.stop_tx.send_replace(true);
    }

    fn set_phase(&self, phase: ShutdownPhase) {
        self.phase.send_replace(phase);
        info!("Shutdown phase: {}", phase);
    }

    /// Run the shutdown sequence.
    ///
    /// `drain` resolves to true when every partition queue emptied in time.
    pub async fn execute<F1, F2, F3, F4>(
        &self,
        stop_ingest: F1,
        drain: F2,
        flush_windows: F3,
        close_outputs: F4,
    ) where
        F1: FnOnce() -> PhaseFuture<()>,
        F2: FnOnce() -> PhaseFuture<bool>,
        F3: FnOnce() -> PhaseFuture<()>,
        F4: FnOnce() -> PhaseFuture<()>,
    {
        let start = std::time::Instant::now();

        self.set_phase(ShutdownPhase::StoppingIngest);
        stop_ingest().await;
        debug!("Ingest stopped");

        self.set_phase(ShutdownPhase::DrainingPartitions);
        let drain_timeout = Duration::from_secs(self.config.drain_timeout_secs);
        match tokio::time::timeout(drain_timeout, drain()).await {
            Ok(true) => info!("Partition queues drained"),
            Ok(false) => warn!("Some partitions stopped before draining"),
            Err(_) => warn!(
                "Partition drain timeout after {}s, proceeding anyway",
                self.config.drain_timeout_secs
            ),
        }

        let flush_timeout = Duration::from_secs(self.config.flush_timeout_secs);
        self.set_phase(ShutdownPhase::FlushingWindows);
        if tokio::time::timeout(flush_timeout, flush_windows())
            .await
            .is_err()
        {
            error!(
                "Window flush timeout after {}s",
                self.config.flush_timeout_secs
            );
        }

        self.set_phase(ShutdownPhase::ClosingOutputs);
        if tokio::time::timeout(flush_timeout, close_outputs())
            .await
            .is_err()
        {
            warn!("Output close timeout after {}s", self.config.flush_timeout_secs);
        }

        self.set_phase(ShutdownPhase::Complete);
        info!("Graceful shutdown completed in {:?}", start.elapsed());
    }
}

/// Request shutdown on SIGINT/SIGTERM (Ctrl+C only on non-unix)
pub async fn install_signal_handlers(shutdown: Arc<GracefulShutdown>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        for (kind, name) in [
            (SignalKind::terminate(), "SIGTERM"),
            (SignalKind::interrupt(), "SIGINT"),
        ] {
            let shutdown = Arc::clone(&shutdown);
            match signal(kind) {
                Ok(mut stream) => {
                    tokio::spawn(async move {
                        stream.recv().await;
                        info!("Received {}", name);
                        shutdown.request_shutdown(ShutdownSignal::Graceful);
                    });
                }
                Err(e) => error!("Failed to install {} handler: {}", name, e),
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received Ctrl+C");
                    shutdown.request_shutdown(ShutdownSignal::Graceful);
                }
                Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_phase_display() {
        assert_eq!(ShutdownPhase::Running.to_string(), "running");
        assert_eq!(
            ShutdownPhase::DrainingPartitions.to_string(),
            "draining_partitions"
        );
        assert_eq!(ShutdownPhase::Complete.to_string(), "complete");
    }

    #[tokio::test]
    async fn test_shutdown_request() {
        let shutdown = GracefulShutdown::with_defaults();
        let stop = shutdown.stop_receiver();

        assert!(!shutdown.is_shutdown_requested());
        assert_eq!(shutdown.current_phase(), ShutdownPhase::Running);

        shutdown.request_shutdown(ShutdownSignal::Graceful);
        assert!(shutdown.is_shutdown_requested());
        assert!(*stop.borrow());

        // Duplicate request is ignored
        shutdown.request_shutdown(ShutdownSignal::Urgent);
        assert!(shutdown.is_shutdown_requested());
    }

    #[tokio::test]
    async fn test_phases_run_in_order() {
        let shutdown = GracefulShutdown::with_defaults();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let (o1, o2, o3, o4) = (
            Arc::clone(&order),
            Arc::clone(&order),
            Arc::clone(&order),
            Arc::clone(&order),
        );
        shutdown
            .execute(
                move || Box::pin(async move { o1.lock().unwrap().push("ingest") }),
                move || {
                    Box::pin(async move {
                        o2.lock().unwrap().push("drain");
                        true
                    })
                },
                move || Box::pin(async move { o3.lock().unwrap().push("flush") }),
                move || Box::pin(async move { o4.lock().unwrap().push("close") }),
            )
            .await;

        assert_eq!(*order.lock().unwrap(), vec!["ingest", "drain", "flush", "close"]);
        assert_eq!(shutdown.current_phase(), ShutdownPhase::Complete);
    }
}
