//! Builders translating ECS services and task definitions into Kubernetes
//! workload objects. Pure functions; the apply half lives in the parent
//! module so shapes can be unit-tested without a cluster.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetSpec, Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, HostPathVolumeSource, PodSpec, PodTemplateSpec,
    ResourceRequirements, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::ObjectMeta;

use crate::error::{Error, Result};
use crate::labels;
use kecs_storage::{ServiceRow, TaskDefinitionRow, TaskSetRow};
use kecs_types as ecs;

/// Decodes the opaque container-definitions blob of a task definition.
pub fn container_definitions(taskdef: &TaskDefinitionRow) -> Result<Vec<ecs::ContainerDefinition>> {
    Ok(serde_json::from_value(taskdef.container_definitions.clone())?)
}

fn volumes_of(taskdef: &TaskDefinitionRow) -> Result<Vec<ecs::Volume>> {
    Ok(serde_json::from_value(taskdef.volumes.clone())?)
}

/// ECS cpu units (1024 = 1 vCPU) to Kubernetes millicores.
fn cpu_millis(units: i32) -> i64 {
    ((units as i64) * 1000) / 1024
}

fn container_resources(def: &ecs::ContainerDefinition) -> Option<ResourceRequirements> {
    let mut requests = BTreeMap::new();
    let mut limits = BTreeMap::new();
    if let Some(cpu) = def.cpu.filter(|c| *c > 0) {
        requests.insert("cpu".to_string(), Quantity(format!("{}m", cpu_millis(cpu))));
    }
    if let Some(memory) = def.memory.filter(|m| *m > 0) {
        limits.insert("memory".to_string(), Quantity(format!("{memory}Mi")));
    }
    if let Some(reservation) = def.memory_reservation.filter(|m| *m > 0) {
        requests.insert("memory".to_string(), Quantity(format!("{reservation}Mi")));
    }
    if requests.is_empty() && limits.is_empty() {
        return None;
    }
    Some(ResourceRequirements {
        requests: (!requests.is_empty()).then_some(requests),
        limits: (!limits.is_empty()).then_some(limits),
        ..Default::default()
    })
}

fn container_of(def: &ecs::ContainerDefinition) -> Container {
    let ports: Vec<ContainerPort> = def
        .port_mappings
        .iter()
        .filter_map(|pm| {
            pm.container_port.map(|port| ContainerPort {
                container_port: port,
                protocol: pm.protocol.as_deref().map(|p| p.to_uppercase()),
                name: pm.name.clone(),
                ..Default::default()
            })
        })
        .collect();
    let env: Vec<EnvVar> = def
        .environment
        .iter()
        .filter_map(|kv| {
            kv.name.clone().map(|name| EnvVar {
                name,
                value: kv.value.clone(),
                ..Default::default()
            })
        })
        .collect();
    let mounts: Vec<VolumeMount> = def
        .mount_points
        .iter()
        .filter_map(|mp| {
            match (&mp.source_volume, &mp.container_path) {
                (Some(source), Some(path)) => Some(VolumeMount {
                    name: source.clone(),
                    mount_path: path.clone(),
                    read_only: mp.read_only,
                    ..Default::default()
                }),
                _ => None,
            }
        })
        .collect();

    Container {
        name: def.name.clone(),
        image: Some(def.image.clone()),
        command: def.entry_point.clone(),
        args: def.command.clone(),
        working_dir: def.working_directory.clone(),
        ports: (!ports.is_empty()).then_some(ports),
        env: (!env.is_empty()).then_some(env),
        volume_mounts: (!mounts.is_empty()).then_some(mounts),
        resources: container_resources(def),
        ..Default::default()
    }
}

fn pod_volumes(taskdef: &TaskDefinitionRow) -> Result<Vec<Volume>> {
    Ok(volumes_of(taskdef)?
        .into_iter()
        .map(|vol| {
            // host{} volumes with a sourcePath become hostPath; everything
            // else is task-scoped scratch space.
            let host_path = vol.host.as_ref().and_then(|h| h.source_path.clone());
            match host_path {
                Some(path) => Volume {
                    name: vol.name,
                    host_path: Some(HostPathVolumeSource {
                        path,
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                None => Volume {
                    name: vol.name,
                    empty_dir: Some(Default::default()),
                    ..Default::default()
                },
            }
        })
        .collect())
}

/// Pod spec shared by service deployments, task-set deployments and bare
/// task pods.
pub fn pod_spec(taskdef: &TaskDefinitionRow, restart_policy: &str) -> Result<PodSpec> {
    let defs = container_definitions(taskdef)?;
    if defs.is_empty() {
        return Err(Error::InvalidState(format!(
            "task definition {} has no containers",
            taskdef.arn
        )));
    }
    let volumes = pod_volumes(taskdef)?;
    Ok(PodSpec {
        containers: defs.iter().map(container_of).collect(),
        volumes: (!volumes.is_empty()).then_some(volumes),
        restart_policy: Some(restart_policy.to_string()),
        ..Default::default()
    })
}

fn workload_labels(service: &ServiceRow, cluster_name: &str) -> BTreeMap<String, String> {
    let mut labels = labels::base_labels(cluster_name);
    labels.insert(labels::SERVICE.to_string(), service.name.clone());
    if let Some((family, revision)) = labels::family_revision(&service.task_definition_arn) {
        labels.insert(labels::TASK_DEF_FAMILY.to_string(), family);
        labels.insert(labels::TASK_DEF_REVISION.to_string(), revision);
    }
    labels
}

fn workload_annotations(service: &ServiceRow) -> BTreeMap<String, String> {
    let mut ann = BTreeMap::new();
    ann.insert(labels::ANN_SERVICE_ARN.to_string(), service.arn.clone());
    ann.insert(labels::ANN_CLUSTER_ARN.to_string(), service.cluster_arn.clone());
    ann.insert(
        labels::ANN_TASK_DEFINITION_ARN.to_string(),
        service.task_definition_arn.clone(),
    );
    ann
}

/// Selector labels must stay stable across revisions, so only the managed
/// marker and service name participate.
fn selector_labels(service_name: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(labels::MANAGED.to_string(), "true".to_string());
    labels.insert(labels::SERVICE.to_string(), service_name.to_string());
    labels
}

fn pod_template(
    service: &ServiceRow,
    taskdef: &TaskDefinitionRow,
    cluster_name: &str,
    restart_stamp: Option<&str>,
) -> Result<PodTemplateSpec> {
    let mut annotations = workload_annotations(service);
    if let Some(stamp) = restart_stamp {
        annotations.insert("kecs.io/restarted-at".to_string(), stamp.to_string());
    }
    Ok(PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(workload_labels(service, cluster_name)),
            annotations: Some(annotations),
            ..Default::default()
        }),
        spec: Some(pod_spec(taskdef, "Always")?),
    })
}

/// REPLICA service -> Deployment with `replicas = desiredCount`.
pub fn deployment_for_service(
    service: &ServiceRow,
    taskdef: &TaskDefinitionRow,
    cluster_name: &str,
    restart_stamp: Option<&str>,
) -> Result<Deployment> {
    Ok(Deployment {
        metadata: ObjectMeta {
            name: Some(service.deployment_name.clone()),
            namespace: Some(service.namespace.clone()),
            labels: Some(workload_labels(service, cluster_name)),
            annotations: Some(workload_annotations(service)),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(service.desired_count),
            selector: LabelSelector {
                match_labels: Some(selector_labels(&service.name)),
                ..Default::default()
            },
            template: pod_template(service, taskdef, cluster_name, restart_stamp)?,
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// DAEMON service -> DaemonSet (one task per node, no replica count).
pub fn daemonset_for_service(
    service: &ServiceRow,
    taskdef: &TaskDefinitionRow,
    cluster_name: &str,
) -> Result<DaemonSet> {
    Ok(DaemonSet {
        metadata: ObjectMeta {
            name: Some(service.deployment_name.clone()),
            namespace: Some(service.namespace.clone()),
            labels: Some(workload_labels(service, cluster_name)),
            annotations: Some(workload_annotations(service)),
            ..Default::default()
        },
        spec: Some(DaemonSetSpec {
            selector: LabelSelector {
                match_labels: Some(selector_labels(&service.name)),
                ..Default::default()
            },
            template: pod_template(service, taskdef, cluster_name, None)?,
            ..Default::default()
        }),
        ..Default::default()
    })
}

pub fn task_set_deployment_name(service_name: &str, task_set_id: &str) -> String {
    format!("{}-ts-{task_set_id}", labels::dns_safe(service_name))
}

/// TaskSet -> independent Deployment scaled per the task set's resolved
/// count. Pods keep the service selector labels so service discovery spans
/// every task set of the service.
pub fn deployment_for_task_set(
    service: &ServiceRow,
    task_set: &TaskSetRow,
    taskdef: &TaskDefinitionRow,
    cluster_name: &str,
) -> Result<Deployment> {
    let mut labels = workload_labels(service, cluster_name);
    labels.insert(labels::TASK_SET.to_string(), task_set.id.clone());
    let mut selector = selector_labels(&service.name);
    selector.insert(labels::TASK_SET.to_string(), task_set.id.clone());
    let mut annotations = workload_annotations(service);
    annotations.insert(labels::ANN_TASK_SET_ARN.to_string(), task_set.arn.clone());

    let mut template = pod_template(service, taskdef, cluster_name, None)?;
    if let Some(meta) = template.metadata.as_mut() {
        if let Some(tl) = meta.labels.as_mut() {
            tl.insert(labels::TASK_SET.to_string(), task_set.id.clone());
        }
    }

    Ok(Deployment {
        metadata: ObjectMeta {
            name: Some(task_set_deployment_name(&service.name, &task_set.id)),
            namespace: Some(service.namespace.clone()),
            labels: Some(labels),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(task_set.computed_desired_count),
            selector: LabelSelector {
                match_labels: Some(selector),
                ..Default::default()
            },
            template,
            ..Default::default()
        }),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kecs_types::{
        DeploymentControllerType, LaunchType, SchedulingStrategy, ServiceStatus,
        TaskDefinitionStatus,
    };
    use serde_json::json;

    fn taskdef() -> TaskDefinitionRow {
        TaskDefinitionRow {
            arn: "arn:aws:ecs:us-east-1:000000000000:task-definition/web:3".into(),
            family: "web".into(),
            revision: 3,
            status: TaskDefinitionStatus::Active,
            region: "us-east-1".into(),
            account_id: "000000000000".into(),
            container_definitions: json!([{
                "name": "nginx",
                "image": "nginx:1.22",
                "memory": 256,
                "cpu": 512,
                "essential": true,
                "portMappings": [{"containerPort": 80, "protocol": "tcp"}],
                "environment": [{"name": "MODE", "value": "dev"}],
                "mountPoints": [{"sourceVolume": "data", "containerPath": "/data"}]
            }]),
            volumes: json!([
                {"name": "data", "host": {"sourcePath": "/var/data"}},
                {"name": "scratch"}
            ]),
            network_mode: None,
            requires_compatibilities: json!(["EC2"]),
            cpu: None,
            memory: None,
            task_role_arn: None,
            execution_role_arn: None,
            placement_constraints: json!([]),
            tags: json!([]),
            created_at: 0,
            deregistered_at: None,
        }
    }

    fn service() -> ServiceRow {
        ServiceRow {
            arn: "arn:aws:ecs:us-east-1:000000000000:service/c1/web".into(),
            name: "web".into(),
            cluster_arn: "arn:aws:ecs:us-east-1:000000000000:cluster/c1".into(),
            task_definition_arn: "arn:aws:ecs:us-east-1:000000000000:task-definition/web:3".into(),
            desired_count: 2,
            running_count: 0,
            pending_count: 0,
            status: ServiceStatus::Active,
            launch_type: LaunchType::Ec2,
            scheduling_strategy: SchedulingStrategy::Replica,
            deployment_controller_type: DeploymentControllerType::Ecs,
            load_balancers: json!([]),
            service_registries: json!([]),
            network_configuration: None,
            deployment_configuration: None,
            placement_constraints: json!([]),
            placement_strategy: json!([]),
            tags: json!([]),
            enable_ecs_managed_tags: false,
            propagate_tags: None,
            enable_execute_command: false,
            primary_task_set_id: None,
            deployment_name: "web".into(),
            namespace: "c1-us-east-1".into(),
            region: "us-east-1".into(),
            account_id: "000000000000".into(),
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn deployment_shape() {
        let dep = deployment_for_service(&service(), &taskdef(), "c1", None).unwrap();
        assert_eq!(dep.metadata.name.as_deref(), Some("web"));
        assert_eq!(dep.metadata.namespace.as_deref(), Some("c1-us-east-1"));
        let spec = dep.spec.unwrap();
        assert_eq!(spec.replicas, Some(2));

        let selector = spec.selector.match_labels.unwrap();
        assert_eq!(selector.get(labels::SERVICE).map(String::as_str), Some("web"));
        assert!(!selector.contains_key(labels::TASK_DEF_REVISION));

        let template_labels = spec.template.metadata.unwrap().labels.unwrap();
        assert_eq!(
            template_labels.get(labels::TASK_DEF_REVISION).map(String::as_str),
            Some("3")
        );

        let pod = spec.template.spec.unwrap();
        let container = &pod.containers[0];
        assert_eq!(container.image.as_deref(), Some("nginx:1.22"));
        assert_eq!(container.ports.as_ref().unwrap()[0].container_port, 80);
        let env = container.env.as_ref().unwrap();
        assert_eq!(env[0].name, "MODE");
        let mounts = container.volume_mounts.as_ref().unwrap();
        assert_eq!(mounts[0].mount_path, "/data");

        let volumes = pod.volumes.unwrap();
        assert!(volumes[0].host_path.is_some());
        assert!(volumes[1].empty_dir.is_some());
    }

    #[test]
    fn cpu_units_become_millicores() {
        assert_eq!(cpu_millis(1024), 1000);
        assert_eq!(cpu_millis(512), 500);
        assert_eq!(cpu_millis(256), 250);
    }

    #[test]
    fn restart_stamp_lands_in_template_annotations() {
        let dep = deployment_for_service(&service(), &taskdef(), "c1", Some("1700000000")).unwrap();
        let ann = dep.spec.unwrap().template.metadata.unwrap().annotations.unwrap();
        assert_eq!(ann.get("kecs.io/restarted-at").map(String::as_str), Some("1700000000"));
    }

    #[test]
    fn task_set_deployment_is_scoped_by_id() {
        let svc = service();
        let ts = TaskSetRow {
            id: "ts-1".into(),
            arn: "arn:aws:ecs:us-east-1:000000000000:task-set/c1/web/ts-1".into(),
            service_arn: svc.arn.clone(),
            cluster_arn: svc.cluster_arn.clone(),
            status: "ACTIVE".into(),
            task_definition_arn: svc.task_definition_arn.clone(),
            external_id: None,
            launch_type: LaunchType::External,
            scale: json!({"value": 50.0, "unit": "PERCENT"}),
            computed_desired_count: 1,
            pending_count: 0,
            running_count: 0,
            stability_status: "STABILIZING".into(),
            tags: json!([]),
            region: "us-east-1".into(),
            account_id: "000000000000".into(),
            created_at: 0,
            updated_at: 0,
        };
        let dep = deployment_for_task_set(&svc, &ts, &taskdef(), "c1").unwrap();
        assert_eq!(dep.metadata.name.as_deref(), Some("web-ts-ts-1"));
        let spec = dep.spec.unwrap();
        assert_eq!(spec.replicas, Some(1));
        let selector = spec.selector.match_labels.unwrap();
        assert_eq!(selector.get(labels::TASK_SET).map(String::as_str), Some("ts-1"));
    }

    #[test]
    fn empty_container_definitions_are_rejected() {
        let mut def = taskdef();
        def.container_definitions = json!([]);
        assert!(pod_spec(&def, "Always").is_err());
    }
}
