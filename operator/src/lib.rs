pub mod dns;
pub mod error;
pub mod intent;
pub mod labels;
pub mod projector;
pub mod reconciler;
pub mod retry;
pub mod stripe;

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use error::{Error, Result};
pub use intent::{IntentSender, ProjectionIntent, channel};

use kecs_storage::{Storage, now_ms};

/// Liveness handle shared with the admin endpoints: the reconciler stamps it
/// every tick.
#[derive(Clone, Default)]
pub struct OperatorHealth {
    last_tick_ms: Arc<AtomicI64>,
}

impl OperatorHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn beat(&self) {
        self.last_tick_ms.store(now_ms(), Ordering::Relaxed);
    }

    pub fn last_tick_ms(&self) -> i64 {
        self.last_tick_ms.load(Ordering::Relaxed)
    }

    /// True once a tick happened within the given window.
    pub fn ticked_within(&self, window: Duration) -> bool {
        let last = self.last_tick_ms();
        last > 0 && now_ms() - last <= window.as_millis() as i64
    }
}

/// Runs the projection workers and the reconciler until cancellation.
pub async fn run(
    client: kube::Client,
    storage: Storage,
    intents_rx: mpsc::Receiver<ProjectionIntent>,
    intents: IntentSender,
    reconcile_interval: Duration,
    health: OperatorHealth,
    cancel: CancellationToken,
) {
    let locks = Arc::new(stripe::LockMap::default());
    let projector = projector::Projector::new(client.clone(), storage.clone());
    let reconciler = reconciler::Reconciler::new(
        client,
        storage,
        intents,
        locks.clone(),
        reconcile_interval,
        health,
    );

    let workers = projector::run_workers(projector, intents_rx, locks, cancel.clone());
    let reconcile = async {
        if let Err(e) = reconciler.run(cancel).await {
            tracing::error!(error = %e, "reconciler exited with error");
        }
    };
    tokio::join!(workers, reconcile);
}
