//! Update batching queue: debounced, last-write-wins, one flush in flight.
//!
//! Rapid-fire mutations (holding the quantity button) must not hammer the
//! authoritative store. The queue keeps only the newest snapshot and flushes
//! it after a quiet period; anything enqueued while a flush is in flight is
//! held and flushed immediately afterwards. Earlier snapshots are
//! superseded, never sent late or out of order.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use basket_core::CartSnapshot;

use crate::session::LifecycleGuard;

/// Where flushed snapshots go. The sink owns its error handling; delivery
/// failures degrade status internally and are never surfaced here, so the
/// queue itself cannot fail.
#[async_trait]
pub trait UpdateSink: Send + Sync {
    async fn deliver(&self, snapshot: CartSnapshot);
}

/// Handle for enqueueing snapshots. Cheap to clone.
#[derive(Debug, Clone)]
pub struct BatchQueue {
    tx: mpsc::UnboundedSender<CartSnapshot>,
}

impl BatchQueue {
    /// Spawn the queue task. The task exits when the lifecycle guard
    /// retires, when every handle is dropped, or when it is aborted via the
    /// returned join handle.
    #[must_use]
    pub fn spawn(
        debounce: Duration,
        sink: Arc<dyn UpdateSink>,
        lifecycle: LifecycleGuard,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(rx, debounce, sink, lifecycle));
        (Self { tx }, task)
    }

    /// Queue a snapshot for delivery. Only the newest snapshot at flush time
    /// is ever sent; every enqueue restarts the debounce timer.
    pub fn enqueue(&self, snapshot: CartSnapshot) {
        if self.tx.send(snapshot).is_err() {
            tracing::debug!("batch queue task gone, dropping enqueue");
        }
    }
}

async fn run(
    mut rx: mpsc::UnboundedReceiver<CartSnapshot>,
    debounce: Duration,
    sink: Arc<dyn UpdateSink>,
    lifecycle: LifecycleGuard,
) {
    'outer: while let Some(mut latest) = rx.recv().await {
        // Debounce: every newer snapshot supersedes and restarts the timer.
        loop {
            tokio::select! {
                next = rx.recv() => match next {
                    Some(snapshot) => latest = snapshot,
                    None => break,
                },
                () = tokio::time::sleep(debounce) => break,
            }
        }

        if !lifecycle.is_active() {
            break;
        }
        sink.deliver(latest).await;

        // Whatever arrived during the flush goes out right away (newest
        // wins), preserving at-most-one-in-flight without a second debounce.
        loop {
            let mut held = None;
            while let Ok(snapshot) = rx.try_recv() {
                held = Some(snapshot);
            }
            let Some(snapshot) = held else { break };
            if !lifecycle.is_active() {
                break 'outer;
            }
            sink.deliver(snapshot).await;
        }
    }
    tracing::debug!("batch queue task finished");
}
