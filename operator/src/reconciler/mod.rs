//! Watches Kubernetes and folds observed reality back into the state store:
//! pod phases into task statuses, workload replica counts into service and
//! cluster counters. One logical loop per process; per-entity work is
//! serialized through the shared ARN lock stripes.

mod orphan;
pub mod status;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams};
use kube::client::Client;
use kube::ResourceExt;
use kube::runtime::watcher;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::intent::{IntentSender, ProjectionIntent};
use crate::labels;
use crate::projector::workload;
use crate::retry;
use crate::stripe::LockMap;
use crate::OperatorHealth;
use kecs_storage::{Storage, TaskRow, now_ms};
use kecs_types::{
    DeploymentControllerType, HealthStatus, LaunchType, SchedulingStrategy, ServiceStatus,
    StopCode, TaskStatus,
};

pub struct Reconciler {
    pub(crate) client: Client,
    pub(crate) storage: Storage,
    pub(crate) intents: IntentSender,
    pub(crate) locks: Arc<LockMap>,
    interval: Duration,
    health: OperatorHealth,
}

impl Reconciler {
    pub fn new(
        client: Client,
        storage: Storage,
        intents: IntentSender,
        locks: Arc<LockMap>,
        interval: Duration,
        health: OperatorHealth,
    ) -> Self {
        Reconciler {
            client,
            storage,
            intents,
            locks,
            interval,
            health,
        }
    }

    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        if let Err(e) = orphan::sweep(&self).await {
            tracing::warn!(error = %e, "startup orphan sweep failed");
        }

        let pod_api: Api<Pod> = Api::all(self.client.clone());
        let pod_stream = watcher(
            pod_api,
            watcher::Config::default().labels(labels::MANAGED_SELECTOR),
        );
        futures::pin_mut!(pod_stream);

        let dep_api: Api<Deployment> = Api::all(self.client.clone());
        let dep_stream = watcher(
            dep_api,
            watcher::Config::default().labels(labels::MANAGED_SELECTOR),
        );
        futures::pin_mut!(dep_stream);

        let mut tick = tokio::time::interval(self.interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {
                    let started = std::time::Instant::now();
                    if let Err(e) = self.resync().await {
                        tracing::warn!(error = %e, "resync pass failed");
                    }
                    metrics::histogram!("kecs_reconcile_duration_seconds")
                        .record(started.elapsed().as_secs_f64());
                    self.health.beat();
                }
                event = pod_stream.next() => match event {
                    Some(Ok(event)) => self.handle_pod_event(event).await,
                    Some(Err(e)) => tracing::warn!(error = %e, "pod watch error"),
                    None => break,
                },
                event = dep_stream.next() => match event {
                    Some(Ok(event)) => self.handle_deployment_event(event).await,
                    Some(Err(e)) => tracing::warn!(error = %e, "deployment watch error"),
                    None => break,
                },
            }
        }
        tracing::info!("reconciler stopped");
        Ok(())
    }

    async fn handle_pod_event(&self, event: watcher::Event<Pod>) {
        match event {
            watcher::Event::Apply(pod) | watcher::Event::InitApply(pod) => {
                self.observe_pod(pod, false).await
            }
            watcher::Event::Delete(pod) => self.observe_pod(pod, true).await,
            watcher::Event::Init | watcher::Event::InitDone => {}
        }
    }

    async fn handle_deployment_event(&self, event: watcher::Event<Deployment>) {
        let dep = match event {
            watcher::Event::Apply(dep) | watcher::Event::InitApply(dep) => dep,
            _ => return,
        };
        let Some(service_arn) = dep.annotations().get(labels::ANN_SERVICE_ARN).cloned() else {
            return;
        };
        let _guard = self.locks.lock(&service_arn).await;
        let Ok(Some(service)) = self.storage.services.get_by_arn(&service_arn).await else {
            return;
        };
        // Task-set deployments are rolled up during resync, not here.
        if dep.labels().contains_key(labels::TASK_SET) {
            return;
        }
        let (running, pending) = status::deployment_counts(&dep);
        if running != service.running_count || pending != service.pending_count {
            if let Err(e) = self
                .storage
                .services
                .update_counters(&service.arn, running, pending)
                .await
            {
                tracing::warn!(service = %service.name, error = %e, "counter write-back failed");
            }
        }
    }

    /// Folds one observed pod into its task row. Pods carrying a task ARN
    /// annotation belong to RunTask/StartTask; pods carrying only service
    /// labels were created by a workload controller and get their task row
    /// synthesized here, closing the loop via labels rather than pointers.
    async fn observe_pod(&self, pod: Pod, deleted: bool) {
        if let Some(task_arn) = pod.annotations().get(labels::ANN_TASK_ARN).cloned() {
            let _guard = self.locks.lock(&task_arn).await;
            match self.storage.tasks.get_by_arn(&task_arn).await {
                Ok(Some(_)) => self.write_back_task(&task_arn, &pod, deleted).await,
                Ok(None) => {
                    if !deleted {
                        self.delete_orphan_pod(&pod).await;
                    }
                }
                Err(e) => tracing::warn!(task = %task_arn, error = %e, "task lookup failed"),
            }
            return;
        }

        if pod.labels().contains_key(labels::SERVICE) {
            self.observe_service_pod(pod, deleted).await;
        }
    }

    async fn observe_service_pod(&self, pod: Pod, deleted: bool) {
        let Some(service_arn) = pod.annotations().get(labels::ANN_SERVICE_ARN).cloned() else {
            return;
        };
        let Ok(Some(service)) = self.storage.services.get_by_arn(&service_arn).await else {
            // The owning service is gone; the deployment teardown collects
            // this pod.
            return;
        };
        let Some(uid) = pod.uid() else { return };
        let cluster_name = service.cluster_arn.rsplit('/').next().unwrap_or_default();
        let task_arn = format!(
            "arn:aws:ecs:{}:{}:task/{}/{}",
            service.region, service.account_id, cluster_name, uid
        );

        let _guard = self.locks.lock(&task_arn).await;
        match self.storage.tasks.get_by_arn(&task_arn).await {
            Ok(Some(_)) => self.write_back_task(&task_arn, &pod, deleted).await,
            Ok(None) if !deleted => {
                let now = now_ms();
                let observed = status::task_status(&pod).unwrap_or(TaskStatus::Provisioning);
                let row = TaskRow {
                    arn: task_arn.clone(),
                    id: uid,
                    cluster_arn: service.cluster_arn.clone(),
                    task_definition_arn: service.task_definition_arn.clone(),
                    container_instance_arn: None,
                    overrides: None,
                    last_status: observed,
                    desired_status: TaskStatus::Running,
                    cpu: None,
                    memory: None,
                    containers: json!(status::container_views(&pod, &task_arn)),
                    version: 1,
                    stop_code: None,
                    stopped_reason: None,
                    started_by: Some(format!("ecs-svc/{}", service.name)),
                    group_name: Some(format!("service:{}", service.name)),
                    launch_type: service.launch_type,
                    health_status: status::task_health(&pod),
                    attributes: json!([]),
                    attachments: json!([]),
                    capacity_provider_name: None,
                    tags: json!([]),
                    pod_name: pod.metadata.name.clone(),
                    pod_namespace: pod.metadata.namespace.clone(),
                    region: service.region.clone(),
                    account_id: service.account_id.clone(),
                    created_at: now,
                    started_at: (observed == TaskStatus::Running).then_some(now),
                    stopping_at: None,
                    stopped_at: None,
                    pull_started_at: None,
                    pull_stopped_at: None,
                    execution_stopped_at: None,
                    updated_at: now,
                };
                if let Err(e) = self.storage.tasks.create_batch(&[row]).await {
                    tracing::warn!(task = %task_arn, error = %e, "failed to record service task");
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(task = %task_arn, error = %e, "task lookup failed"),
        }
    }

    /// Validates the observed transition against the state machine and
    /// writes it back under the task's optimistic version, retrying a
    /// bounded number of times before deferring to the next tick.
    async fn write_back_task(&self, task_arn: &str, pod: &Pod, deleted: bool) {
        let observed = if deleted {
            TaskStatus::Stopped
        } else {
            match status::task_status(pod) {
                Some(s) => s,
                None => return,
            }
        };
        let containers = status::container_views(pod, task_arn);
        let health = status::task_health(pod);
        let clean_exit = status::exited_cleanly(pod);

        for attempt in 0..retry::MAX_ATTEMPTS {
            let row = match self.storage.tasks.get_by_arn(task_arn).await {
                Ok(Some(row)) => row,
                Ok(None) => return,
                Err(e) => {
                    tracing::warn!(task = %task_arn, error = %e, "task re-read failed");
                    return;
                }
            };
            if row.last_status == observed && observed != TaskStatus::Stopped {
                return;
            }
            if !row.last_status.can_transition_to(observed) {
                tracing::warn!(
                    task = %task_arn,
                    from = row.last_status.as_str(),
                    to = observed.as_str(),
                    "rejecting illegal task status transition"
                );
                return;
            }

            let mut next = row.clone();
            next.last_status = observed;
            if !containers.is_empty() {
                next.containers = json!(containers);
            }
            if !deleted {
                next.health_status = health;
            }
            let now = now_ms();
            match observed {
                TaskStatus::Running => {
                    if next.started_at.is_none() {
                        next.started_at = Some(now);
                        next.pull_started_at = next.pull_started_at.or(Some(row.created_at));
                        next.pull_stopped_at = next.pull_stopped_at.or(Some(now));
                    }
                }
                TaskStatus::Stopping => {
                    if next.stopping_at.is_none() {
                        next.stopping_at = Some(now);
                    }
                }
                TaskStatus::Stopped => {
                    // stoppedAt is set exactly once.
                    if next.stopped_at.is_none() {
                        next.stopped_at = Some(now);
                    }
                    if next.execution_stopped_at.is_none() {
                        next.execution_stopped_at = Some(now);
                    }
                    if next.stop_code.is_none() {
                        let code = if row.desired_status == TaskStatus::Stopped {
                            StopCode::UserInitiated
                        } else if clean_exit {
                            StopCode::EssentialContainerExited
                        } else {
                            StopCode::TaskFailedToStart
                        };
                        next.stop_code = Some(code.as_str().to_string());
                    }
                    if next.health_status == HealthStatus::Healthy {
                        next.health_status = HealthStatus::Unknown;
                    }
                }
                _ => {}
            }

            match self.storage.tasks.update_with_version(&next).await {
                Ok(()) => {
                    metrics::counter!("kecs_task_writebacks_total").increment(1);
                    return;
                }
                Err(kecs_storage::StorageError::Conflict(_)) => {
                    tokio::time::sleep(retry::backoff(attempt)).await;
                }
                Err(e) => {
                    tracing::warn!(task = %task_arn, error = %e, "task write-back failed");
                    return;
                }
            }
        }
        tracing::warn!(task = %task_arn, "task write-back deferred after repeated conflicts");
    }

    async fn delete_orphan_pod(&self, pod: &Pod) {
        let (Some(name), Some(namespace)) = (pod.metadata.name.clone(), pod.metadata.namespace.clone())
        else {
            return;
        };
        tracing::info!(pod = %name, %namespace, "deleting orphaned pod");
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &namespace);
        match api.delete(&name, &DeleteParams::default()).await {
            Ok(_) => {}
            Err(kube::Error::Api(ae)) if ae.code == 404 => {}
            Err(e) => tracing::warn!(pod = %name, error = %e, "failed to delete orphaned pod"),
        }
    }

    /// Timer-driven full pass: service and cluster counters, plus
    /// convergence nudges for tasks whose projection never landed.
    async fn resync(&self) -> Result<()> {
        self.resync_services().await?;
        self.resync_clusters().await?;
        self.resync_tasks().await?;
        Ok(())
    }

    async fn resync_services(&self) -> Result<()> {
        for service in self.storage.services.list_all().await? {
            if service.status != ServiceStatus::Active {
                continue;
            }
            let _guard = self.locks.lock(&service.arn).await;
            let (running, pending) = match service.deployment_controller_type {
                DeploymentControllerType::External => {
                    self.resync_task_sets(&service).await?
                }
                _ => match service.scheduling_strategy {
                    SchedulingStrategy::Replica => {
                        let api: Api<Deployment> =
                            Api::namespaced(self.client.clone(), &service.namespace);
                        match api.get(&service.deployment_name).await {
                            Ok(dep) => status::deployment_counts(&dep),
                            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                                // Missing deployment for an ACTIVE service:
                                // re-project.
                                self.intents.send(ProjectionIntent::SyncService {
                                    service_arn: service.arn.clone(),
                                    restart: false,
                                });
                                continue;
                            }
                            Err(e) => {
                                tracing::warn!(service = %service.name, error = %e, "deployment read failed");
                                continue;
                            }
                        }
                    }
                    SchedulingStrategy::Daemon => {
                        let api: Api<DaemonSet> =
                            Api::namespaced(self.client.clone(), &service.namespace);
                        match api.get(&service.deployment_name).await {
                            Ok(ds) => status::daemonset_counts(&ds),
                            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                                self.intents.send(ProjectionIntent::SyncService {
                                    service_arn: service.arn.clone(),
                                    restart: false,
                                });
                                continue;
                            }
                            Err(e) => {
                                tracing::warn!(service = %service.name, error = %e, "daemonset read failed");
                                continue;
                            }
                        }
                    }
                },
            };
            if running != service.running_count || pending != service.pending_count {
                self.storage
                    .services
                    .update_counters(&service.arn, running, pending)
                    .await?;
            }
        }
        Ok(())
    }

    /// Rolls task-set deployment counts into the task-set rows and returns
    /// the service-level aggregate.
    async fn resync_task_sets(&self, service: &kecs_storage::ServiceRow) -> Result<(i32, i32)> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &service.namespace);
        let mut total = (0, 0);
        for mut ts in self.storage.task_sets.list(&service.arn).await? {
            let name = workload::task_set_deployment_name(&service.name, &ts.id);
            let (running, pending) = match api.get(&name).await {
                Ok(dep) => status::deployment_counts(&dep),
                Err(kube::Error::Api(ae)) if ae.code == 404 => {
                    self.intents.send(ProjectionIntent::SyncTaskSet {
                        service_arn: service.arn.clone(),
                        task_set_id: ts.id.clone(),
                    });
                    continue;
                }
                Err(e) => {
                    tracing::warn!(task_set = %ts.id, error = %e, "task set read failed");
                    continue;
                }
            };
            total.0 += running;
            total.1 += pending;
            let stable = running == ts.computed_desired_count && pending == 0;
            let stability = if stable { "STEADY_STATE" } else { "STABILIZING" };
            if running != ts.running_count
                || pending != ts.pending_count
                || stability != ts.stability_status
            {
                ts.running_count = running;
                ts.pending_count = pending;
                ts.stability_status = stability.to_string();
                self.storage.task_sets.update(&ts).await?;
            }
        }
        Ok(total)
    }

    async fn resync_clusters(&self) -> Result<()> {
        for cluster in self.storage.clusters.list(1000, 0).await? {
            let tasks = self.storage.tasks.list_unstopped(Some(&cluster.arn)).await?;
            let running = tasks
                .iter()
                .filter(|t| t.last_status == TaskStatus::Running)
                .count() as i32;
            let pending = (tasks.len() as i32) - running;
            let active = self
                .storage
                .services
                .count_active_by_cluster(&cluster.arn)
                .await? as i32;
            if running != cluster.running_tasks_count
                || pending != cluster.pending_tasks_count
                || active != cluster.active_services_count
            {
                self.storage
                    .clusters
                    .update_counters(&cluster.arn, running, pending, active)
                    .await?;
            }
        }
        Ok(())
    }

    async fn resync_tasks(&self) -> Result<()> {
        for task in self.storage.tasks.list_unstopped(None).await? {
            if task.desired_status == TaskStatus::Stopped {
                self.intents.send(ProjectionIntent::StopTask {
                    task_arn: task.arn.clone(),
                });
            } else if task.pod_name.is_none()
                && task.last_status == TaskStatus::Provisioning
                && task.launch_type != LaunchType::External
                && task.started_by.as_deref().is_none_or(|s| !s.starts_with("ecs-svc/"))
            {
                // RunTask whose pod never materialized.
                self.intents.send(ProjectionIntent::RunTask {
                    task_arn: task.arn.clone(),
                });
            }
        }
        Ok(())
    }
}
