use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::service::Florist;
use crate::store::Store;

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Periodic date sweep.
///
/// Runs once at start-up, then every `interval`. A failed sweep is logged
/// and retried on the next tick; the sweep is idempotent, so a restart never
/// does harm.
#[derive(Debug)]
pub struct ReclassifyWorker;

impl ReclassifyWorker {
    pub const THREAD_NAME: &'static str = "florist-reclassify";

    pub fn spawn<S>(florist: Arc<Florist<S>>, interval: Duration) -> std::io::Result<WorkerHandle>
    where
        S: Store + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let join = thread::Builder::new()
            .name(Self::THREAD_NAME.to_string())
            .spawn(move || worker_loop(&florist, interval, shutdown_rx))?;

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

fn worker_loop<S: Store>(florist: &Florist<S>, interval: Duration, shutdown_rx: mpsc::Receiver<()>) {
    loop {
        match florist.reclassify_due_orders() {
            Ok(report) if !report.moved.is_empty() => {
                info!(worker = ReclassifyWorker::THREAD_NAME, moved = report.moved.len(), "orders reclassified");
            }
            Ok(_) => {}
            Err(err) => {
                warn!(worker = ReclassifyWorker::THREAD_NAME, error = %err, "reclassification sweep failed");
            }
        }

        match shutdown_rx.recv_timeout(interval) {
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}
