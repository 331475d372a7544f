//! Startup diff between Kubernetes and the state store.
//!
//! Pods carrying a task ARN with no backing row are deleted; ACTIVE services
//! whose workload object disappeared while the control plane was down are
//! re-projected.

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use kube::api::{Api, ListParams};

use super::Reconciler;
use crate::error::Result;
use crate::intent::ProjectionIntent;
use crate::labels;
use kecs_types::{DeploymentControllerType, SchedulingStrategy, ServiceStatus};

pub(super) async fn sweep(reconciler: &Reconciler) -> Result<()> {
    sweep_pods(reconciler).await?;
    sweep_services(reconciler).await?;
    Ok(())
}

async fn sweep_pods(reconciler: &Reconciler) -> Result<()> {
    let api: Api<Pod> = Api::all(reconciler.client.clone());
    let pods = api
        .list(&ListParams::default().labels(labels::MANAGED_SELECTOR))
        .await?;
    for pod in pods {
        let Some(task_arn) = pod.annotations().get(labels::ANN_TASK_ARN).cloned() else {
            continue;
        };
        if reconciler.storage.tasks.get_by_arn(&task_arn).await?.is_none() {
            reconciler.delete_orphan_pod(&pod).await;
        }
    }
    Ok(())
}

async fn sweep_services(reconciler: &Reconciler) -> Result<()> {
    for service in reconciler.storage.services.list_all().await? {
        if service.status != ServiceStatus::Active
            || service.deployment_controller_type == DeploymentControllerType::External
        {
            continue;
        }
        let missing = match service.scheduling_strategy {
            SchedulingStrategy::Replica => {
                let api: Api<Deployment> =
                    Api::namespaced(reconciler.client.clone(), &service.namespace);
                matches!(api.get(&service.deployment_name).await,
                    Err(kube::Error::Api(ae)) if ae.code == 404)
            }
            SchedulingStrategy::Daemon => {
                let api: Api<DaemonSet> =
                    Api::namespaced(reconciler.client.clone(), &service.namespace);
                matches!(api.get(&service.deployment_name).await,
                    Err(kube::Error::Api(ae)) if ae.code == 404)
            }
        };
        if missing {
            tracing::info!(service = %service.name, "re-projecting service with missing workload");
            reconciler.intents.send(ProjectionIntent::SyncService {
                service_arn: service.arn.clone(),
                restart: false,
            });
        }
    }
    Ok(())
}
