//! Makes Kubernetes reflect the authoritative ECS state.
//!
//! Object construction lives in the `workload`/`pod`/`discovery` submodules;
//! this module owns the apply path: create-or-replace with bounded conflict
//! retry, ordered deletion, and the intent worker pool.

pub mod discovery;
pub mod pod;
pub mod workload;

use std::fmt::Debug;
use std::sync::Arc;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{Namespace, Pod, Service};
use kube::api::{Api, DeleteParams, ObjectMeta, PostParams};
use kube::client::Client;
use kube::{Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;

use crate::dns::DnsManager;
use crate::error::{Error, Result};
use crate::intent::ProjectionIntent;
use crate::stripe::LockMap;
use crate::{labels, retry};
use kecs_storage::{ServiceEventRow, Storage, TaskRow, now_ms};
use kecs_types::{DeploymentControllerType, SchedulingStrategy, ServiceStatus, TaskStatus};

#[derive(Clone)]
pub struct Projector {
    client: Client,
    storage: Storage,
    dns: DnsManager,
}

fn name_from_arn(arn: &str) -> &str {
    arn.rsplit('/').next().unwrap_or(arn)
}

impl Projector {
    pub fn new(client: Client, storage: Storage) -> Self {
        let dns = DnsManager::new(client.clone());
        Projector {
            client,
            storage,
            dns,
        }
    }

    pub async fn apply(&self, intent: &ProjectionIntent) -> Result<()> {
        metrics::counter!("kecs_projection_intents_total").increment(1);
        match intent {
            ProjectionIntent::SyncService {
                service_arn,
                restart,
            } => self.sync_service(service_arn, *restart).await,
            ProjectionIntent::DeleteService { service_arn } => {
                self.delete_service(service_arn).await
            }
            ProjectionIntent::RunTask { task_arn } => self.run_task(task_arn).await,
            ProjectionIntent::StopTask { task_arn } => self.stop_task(task_arn).await,
            ProjectionIntent::SyncTaskSet {
                service_arn,
                task_set_id,
            } => self.sync_task_set(service_arn, task_set_id).await,
            ProjectionIntent::DeleteTaskSet {
                service_arn,
                task_set_id,
            } => self.delete_task_set(service_arn, task_set_id).await,
            ProjectionIntent::DeleteClusterNamespace { namespace } => {
                self.delete_namespace(namespace).await
            }
        }
    }

    /// Records a projection failure as a service event so it shows up in
    /// DescribeServices instead of silently vanishing.
    pub async fn record_failure(&self, intent: &ProjectionIntent, error: &Error) {
        let service_arn = match intent {
            ProjectionIntent::SyncService { service_arn, .. }
            | ProjectionIntent::DeleteService { service_arn }
            | ProjectionIntent::SyncTaskSet { service_arn, .. }
            | ProjectionIntent::DeleteTaskSet { service_arn, .. } => service_arn,
            _ => return,
        };
        let event = ServiceEventRow {
            id: uuid::Uuid::new_v4().to_string(),
            service_arn: service_arn.clone(),
            message: format!("projection failed: {error}"),
            created_at: now_ms(),
        };
        if let Err(e) = self.storage.service_events.append(&event).await {
            tracing::warn!(error = %e, "failed to record projection failure event");
        }
    }

    async fn sync_service(&self, service_arn: &str, restart: bool) -> Result<()> {
        let Some(service) = self.storage.services.get_by_arn(service_arn).await? else {
            return Ok(());
        };
        if service.status == ServiceStatus::Inactive {
            return Ok(());
        }
        let cluster_name = name_from_arn(&service.cluster_arn).to_string();
        self.ensure_namespace(&service.namespace, &cluster_name)
            .await?;

        // EXTERNAL-controller services get their workloads from task sets
        // and may not pin a task definition at all.
        if service.deployment_controller_type != DeploymentControllerType::External {
            let Some(taskdef) = self
                .storage
                .task_definitions
                .get_by_arn(&service.task_definition_arn)
                .await?
            else {
                return Err(Error::InvalidState(format!(
                    "service {} pins unknown task definition {}",
                    service.name, service.task_definition_arn
                )));
            };
            match service.scheduling_strategy {
                SchedulingStrategy::Replica => {
                    let stamp = restart.then(|| now_ms().to_string());
                    let dep = workload::deployment_for_service(
                        &service,
                        &taskdef,
                        &cluster_name,
                        stamp.as_deref(),
                    )?;
                    let api: Api<Deployment> =
                        Api::namespaced(self.client.clone(), &service.namespace);
                    create_or_replace(&api, &dep).await?;
                }
                SchedulingStrategy::Daemon => {
                    let ds = workload::daemonset_for_service(&service, &taskdef, &cluster_name)?;
                    let api: Api<DaemonSet> =
                        Api::namespaced(self.client.clone(), &service.namespace);
                    create_or_replace(&api, &ds).await?;
                }
            }
        }

        self.sync_discovery(&service, &cluster_name).await
    }

    async fn sync_discovery(
        &self,
        service: &kecs_storage::ServiceRow,
        cluster_name: &str,
    ) -> Result<()> {
        let registries = discovery::registries_of(service);
        let api: Api<Service> = Api::namespaced(self.client.clone(), &service.namespace);
        if registries.is_empty() {
            delete_ignore_missing(&api, &discovery::headless_name(&service.name)).await?;
            return Ok(());
        }

        create_or_replace(&api, &discovery::headless_service(service, cluster_name)).await?;
        create_or_replace(&api, &discovery::alias_service(service, cluster_name)).await?;

        if let Some(registry_arn) = registries.iter().find_map(|r| r.registry_arn.as_deref()) {
            let (namespace_id, domain) = discovery::sd_namespace(registry_arn, cluster_name);
            self.dns
                .ensure_entry(&namespace_id, &domain, &service.namespace)
                .await?;
        }
        Ok(())
    }

    /// Tears a DRAINING service down in dependency order, then removes its
    /// rows. Dependent pods go away with the Deployment.
    async fn delete_service(&self, service_arn: &str) -> Result<()> {
        let Some(service) = self.storage.services.get_by_arn(service_arn).await? else {
            return Ok(());
        };
        let cluster_name = name_from_arn(&service.cluster_arn).to_string();

        let deployments: Api<Deployment> =
            Api::namespaced(self.client.clone(), &service.namespace);
        for ts in self.storage.task_sets.list(&service.arn).await? {
            let name = workload::task_set_deployment_name(&service.name, &ts.id);
            delete_ignore_missing(&deployments, &name).await?;
            self.storage.task_sets.delete(&ts.arn).await?;
        }

        match service.scheduling_strategy {
            SchedulingStrategy::Replica => {
                delete_ignore_missing(&deployments, &service.deployment_name).await?;
            }
            SchedulingStrategy::Daemon => {
                let api: Api<DaemonSet> =
                    Api::namespaced(self.client.clone(), &service.namespace);
                delete_ignore_missing(&api, &service.deployment_name).await?;
            }
        }

        let services: Api<Service> = Api::namespaced(self.client.clone(), &service.namespace);
        let registries = discovery::registries_of(&service);
        if !registries.is_empty() {
            delete_ignore_missing(&services, &discovery::headless_name(&service.name)).await?;
            delete_ignore_missing(&services, &labels::dns_safe(&service.name)).await?;
            if let Some(registry_arn) = registries.iter().find_map(|r| r.registry_arn.as_deref()) {
                let (namespace_id, _) = discovery::sd_namespace(registry_arn, &cluster_name);
                self.dns.remove_entry(&namespace_id).await?;
            }
        }

        self.storage
            .service_events
            .delete_for_service(&service.arn)
            .await?;
        self.storage.services.delete(&service.arn).await?;
        tracing::info!(service = %service.name, "service removed");
        Ok(())
    }

    async fn run_task(&self, task_arn: &str) -> Result<()> {
        let Some(task) = self.storage.tasks.get_by_arn(task_arn).await? else {
            return Ok(());
        };
        if task.desired_status != TaskStatus::Running || task.last_status.is_terminal() {
            return Ok(());
        }
        let cluster_name = name_from_arn(&task.cluster_arn).to_string();
        let namespace = task
            .pod_namespace
            .clone()
            .unwrap_or_else(|| labels::cluster_namespace(&cluster_name, &task.region));
        self.ensure_namespace(&namespace, &cluster_name).await?;

        let Some(taskdef) = self
            .storage
            .task_definitions
            .get_by_arn(&task.task_definition_arn)
            .await?
        else {
            return Err(Error::InvalidState(format!(
                "task {} references unknown task definition {}",
                task.arn, task.task_definition_arn
            )));
        };

        let mut task_for_pod = task.clone();
        task_for_pod.pod_namespace = Some(namespace.clone());
        let pod = pod::pod_for_task(&task_for_pod, &taskdef, &cluster_name)?;
        let pod_name = pod.name_any();

        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &namespace);
        match pods.create(&PostParams::default(), &pod).await {
            Ok(_) => {}
            Err(kube::Error::Api(ae)) if ae.code == 409 => {}
            Err(e) => return Err(e.into()),
        }

        self.persist_task(task_arn, |row| {
            row.pod_name = Some(pod_name.clone());
            row.pod_namespace = Some(namespace.clone());
            if row.last_status.can_transition_to(TaskStatus::Pending) {
                row.last_status = TaskStatus::Pending;
            }
        })
        .await
    }

    async fn stop_task(&self, task_arn: &str) -> Result<()> {
        let Some(task) = self.storage.tasks.get_by_arn(task_arn).await? else {
            return Ok(());
        };
        if task.last_status.is_terminal() {
            return Ok(());
        }
        let cluster_name = name_from_arn(&task.cluster_arn).to_string();
        let namespace = task
            .pod_namespace
            .clone()
            .unwrap_or_else(|| labels::cluster_namespace(&cluster_name, &task.region));
        let pod_name = task
            .pod_name
            .clone()
            .unwrap_or_else(|| pod::pod_name_for_task(&task));

        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &namespace);
        match pods.delete(&pod_name, &DeleteParams::default()).await {
            Ok(_) => {
                // The watch stream walks the task to STOPPED once the pod is
                // actually gone; record that stopping began.
                self.persist_task(task_arn, |row| {
                    if row.stopping_at.is_none() {
                        row.stopping_at = Some(now_ms());
                    }
                    if row.last_status.can_transition_to(TaskStatus::Stopping) {
                        row.last_status = TaskStatus::Stopping;
                    }
                })
                .await
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                // Pod already gone; no event will arrive.
                self.persist_task(task_arn, |row| {
                    row.last_status = TaskStatus::Stopped;
                    if row.stopped_at.is_none() {
                        row.stopped_at = Some(now_ms());
                    }
                })
                .await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn sync_task_set(&self, service_arn: &str, task_set_id: &str) -> Result<()> {
        let Some(service) = self.storage.services.get_by_arn(service_arn).await? else {
            return Ok(());
        };
        let Some(task_set) = self.storage.task_sets.get(service_arn, task_set_id).await? else {
            return Ok(());
        };
        let Some(taskdef) = self
            .storage
            .task_definitions
            .get_by_arn(&task_set.task_definition_arn)
            .await?
        else {
            return Err(Error::InvalidState(format!(
                "task set {} pins unknown task definition {}",
                task_set.id, task_set.task_definition_arn
            )));
        };
        let cluster_name = name_from_arn(&service.cluster_arn).to_string();
        self.ensure_namespace(&service.namespace, &cluster_name)
            .await?;

        let dep = workload::deployment_for_task_set(&service, &task_set, &taskdef, &cluster_name)?;
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &service.namespace);
        create_or_replace(&api, &dep).await?;
        self.sync_discovery(&service, &cluster_name).await
    }

    async fn delete_task_set(&self, service_arn: &str, task_set_id: &str) -> Result<()> {
        let Some(service) = self.storage.services.get_by_arn(service_arn).await? else {
            return Ok(());
        };
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &service.namespace);
        let name = workload::task_set_deployment_name(&service.name, task_set_id);
        delete_ignore_missing(&api, &name).await
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        match api.delete(namespace, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn ensure_namespace(&self, namespace: &str, cluster_name: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(namespace.to_string()),
                labels: Some(labels::base_labels(cluster_name)),
                ..Default::default()
            },
            ..Default::default()
        };
        match api.create(&PostParams::default(), &ns).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Read-modify-write on a task row under its optimistic version, with
    /// the standard bounded backoff.
    async fn persist_task(
        &self,
        task_arn: &str,
        mutate: impl Fn(&mut TaskRow),
    ) -> Result<()> {
        for attempt in 0..retry::MAX_ATTEMPTS {
            let Some(mut row) = self.storage.tasks.get_by_arn(task_arn).await? else {
                return Ok(());
            };
            mutate(&mut row);
            match self.storage.tasks.update_with_version(&row).await {
                Ok(()) => return Ok(()),
                Err(kecs_storage::StorageError::Conflict(_)) => {
                    tokio::time::sleep(retry::backoff(attempt)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(Error::InvalidState(format!(
            "persistent version conflict updating task {task_arn}"
        )))
    }
}

/// Create-or-replace. Creation conflicts fall back to a refetch/replace
/// loop so a concurrent writer cannot wedge the projection.
pub(crate) async fn create_or_replace<K>(api: &Api<K>, obj: &K) -> Result<()>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Debug,
{
    let name = obj
        .meta()
        .name
        .clone()
        .ok_or_else(|| Error::InvalidState("object is missing metadata.name".to_string()))?;
    match api.create(&PostParams::default(), obj).await {
        Ok(_) => return Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 409 => {}
        Err(e) => return Err(e.into()),
    }
    for attempt in 0..retry::MAX_ATTEMPTS {
        let existing = api.get(&name).await?;
        let mut desired = obj.clone();
        desired.meta_mut().resource_version = existing.meta().resource_version.clone();
        match api.replace(&name, &PostParams::default(), &desired).await {
            Ok(_) => return Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                tokio::time::sleep(retry::backoff(attempt)).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(Error::InvalidState(format!(
        "persistent conflict replacing {name}"
    )))
}

pub(crate) async fn delete_ignore_missing<K>(api: &Api<K>, name: &str) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Intent consumer. Work fans out onto a pool bounded by the host's
/// parallelism; per-entity ordering is preserved by the ARN lock stripes.
pub async fn run_workers(
    projector: Projector,
    mut rx: mpsc::Receiver<ProjectionIntent>,
    locks: Arc<LockMap>,
    cancel: CancellationToken,
) {
    let workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    let permits = Arc::new(Semaphore::new(workers));
    loop {
        let intent = tokio::select! {
            _ = cancel.cancelled() => break,
            intent = rx.recv() => match intent {
                Some(intent) => intent,
                None => break,
            },
        };
        let permit = match permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let projector = projector.clone();
        let locks = locks.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let _guard = locks.lock_owned(intent.entity_key()).await;
            if let Err(e) = projector.apply(&intent).await {
                tracing::warn!(error = %e, intent = ?intent, "projection failed");
                projector.record_failure(&intent, &e).await;
            }
        });
    }
    tracing::info!("projection workers stopped");
}
