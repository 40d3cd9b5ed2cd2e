use super::engine::ReconcileEngine;
use crate::core::{Result, SyncError};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{Instrument, Level, event, info_span};

/// Background loop that drains the outbox every poll interval.
///
/// Each tick runs one [`ReconcileEngine::run_once`]; the first pass starts
/// immediately. A failed pass is logged and the loop carries on.
pub struct DrainWorker {
    passes: Arc<AtomicU64>,
    stop_tx: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
}

impl DrainWorker {
    /// Number of drain passes completed so far, failed ones included.
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::SeqCst)
    }

    /// Signals the worker to stop and waits for the in-flight pass, if any,
    /// to finish.
    pub async fn stop(mut self) -> Result<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        if let Some(join_handle) = self.join_handle.take() {
            join_handle
                .await
                .map_err(|err| SyncError::Io(format!("drain worker join: {err}")))?;
        }
        Ok(())
    }
}

impl Drop for DrainWorker {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.abort();
        }
    }
}

/// Spawns the drain loop on the current tokio runtime.
pub fn spawn_drain_worker(engine: Arc<ReconcileEngine>) -> DrainWorker {
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let passes = Arc::new(AtomicU64::new(0));
    let passes_for_worker = passes.clone();
    let interval = engine.policy().poll_interval_duration();
    let span = info_span!("sync.worker", worker_id = %engine.worker_id());

    let join_handle = tokio::spawn(
        async move {
            event!(Level::INFO, interval_ms = interval.as_millis() as u64, "drain worker started");
            loop {
                if let Err(err) = engine.run_once().await {
                    event!(Level::ERROR, error = %err, "drain pass failed");
                }
                passes_for_worker.fetch_add(1, Ordering::SeqCst);

                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = engine.clock().sleep(interval) => {}
                }
            }
            event!(Level::INFO, "drain worker stopped");
        }
        .instrument(span),
    );

    DrainWorker {
        passes,
        stop_tx: Some(stop_tx),
        join_handle: Some(join_handle),
    }
}
