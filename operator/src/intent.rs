//! Projection intents.
//!
//! API handlers commit to the state store, enqueue one of these, and return.
//! The projector consumes the queue and is the only component that talks to
//! Kubernetes on the write path. The channel is bounded so a wedged
//! Kubernetes API can never back-pressure into request handling; a full
//! queue is dropped with a warning and repaired by the next resync tick.

use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectionIntent {
    /// Create or update the workload objects for a service. `restart`
    /// stamps the pod template so a new rollout happens even when nothing
    /// else changed (UpdateService with forceNewDeployment).
    SyncService {
        service_arn: String,
        restart: bool,
    },
    /// Tear down a DRAINING service's objects, then remove its row.
    DeleteService { service_arn: String },
    /// Create the pod backing a task.
    RunTask { task_arn: String },
    /// Delete the pod backing a task.
    StopTask { task_arn: String },
    /// Create or rescale a task-set deployment.
    SyncTaskSet {
        service_arn: String,
        task_set_id: String,
    },
    /// Delete a task-set deployment.
    DeleteTaskSet {
        service_arn: String,
        task_set_id: String,
    },
    /// Remove the namespace left behind by a deleted cluster.
    DeleteClusterNamespace { namespace: String },
}

impl ProjectionIntent {
    /// Key used for per-entity serialization.
    pub fn entity_key(&self) -> &str {
        match self {
            ProjectionIntent::SyncService { service_arn, .. }
            | ProjectionIntent::DeleteService { service_arn }
            | ProjectionIntent::SyncTaskSet { service_arn, .. }
            | ProjectionIntent::DeleteTaskSet { service_arn, .. } => service_arn,
            ProjectionIntent::RunTask { task_arn } | ProjectionIntent::StopTask { task_arn } => {
                task_arn
            }
            ProjectionIntent::DeleteClusterNamespace { namespace } => namespace,
        }
    }
}

#[derive(Clone)]
pub struct IntentSender {
    tx: mpsc::Sender<ProjectionIntent>,
}

impl IntentSender {
    /// Enqueues without blocking. Dropping on overflow is safe: the resync
    /// tick re-derives projection state from the store.
    pub fn send(&self, intent: ProjectionIntent) {
        if let Err(e) = self.tx.try_send(intent) {
            tracing::warn!(error = %e, "projection queue full, dropping intent");
            metrics::counter!("kecs_projection_intents_dropped_total").increment(1);
        }
    }
}

pub fn channel(capacity: usize) -> (IntentSender, mpsc::Receiver<ProjectionIntent>) {
    let (tx, rx) = mpsc::channel(capacity);
    (IntentSender { tx }, rx)
}
