//! Kubernetes halves of ECS service discovery: a headless Service selecting
//! the workload's pods plus an ExternalName alias under the plain service
//! name. The CoreDNS rewrite lives in `crate::dns`.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use kube::api::ObjectMeta;

use crate::labels;
use kecs_storage::ServiceRow;
use kecs_types as ecs;

pub fn headless_name(service_name: &str) -> String {
    format!("sd-{}", labels::dns_safe(service_name))
}

pub fn registries_of(service: &ServiceRow) -> Vec<ecs::ServiceRegistry> {
    serde_json::from_value(service.service_registries.clone()).unwrap_or_default()
}

/// The service-discovery namespace behind a registry ARN: the id is the
/// ARN's final path segment, the DNS domain defaults to
/// `<clusterName>.local`.
pub fn sd_namespace(registry_arn: &str, cluster_name: &str) -> (String, String) {
    let id = registry_arn
        .rsplit('/')
        .next()
        .unwrap_or(registry_arn)
        .to_string();
    (id, format!("{cluster_name}.local"))
}

fn discovery_labels(service: &ServiceRow, cluster_name: &str) -> BTreeMap<String, String> {
    let mut labels = labels::base_labels(cluster_name);
    labels.insert(labels::SERVICE.to_string(), service.name.clone());
    labels
}

fn discovery_annotations(service: &ServiceRow) -> BTreeMap<String, String> {
    let mut ann = BTreeMap::new();
    ann.insert(labels::ANN_SERVICE_ARN.to_string(), service.arn.clone());
    ann.insert(labels::ANN_CLUSTER_ARN.to_string(), service.cluster_arn.clone());
    ann
}

/// Headless Service `sd-<name>` selecting the workload's pods.
pub fn headless_service(service: &ServiceRow, cluster_name: &str) -> Service {
    let registries = registries_of(service);
    let ports: Vec<ServicePort> = registries
        .iter()
        .filter_map(|r| r.container_port.or(r.port))
        .map(|port| ServicePort {
            port,
            name: Some(format!("port-{port}")),
            ..Default::default()
        })
        .collect();
    let mut selector = BTreeMap::new();
    selector.insert(labels::MANAGED.to_string(), "true".to_string());
    selector.insert(labels::SERVICE.to_string(), service.name.clone());

    Service {
        metadata: ObjectMeta {
            name: Some(headless_name(&service.name)),
            namespace: Some(service.namespace.clone()),
            labels: Some(discovery_labels(service, cluster_name)),
            annotations: Some(discovery_annotations(service)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            selector: Some(selector),
            ports: (!ports.is_empty()).then_some(ports),
            ..Default::default()
        }),
        status: None,
    }
}

/// ExternalName alias `<name>` pointing at the headless service, so the
/// plain service name resolves inside the cluster namespace.
pub fn alias_service(service: &ServiceRow, cluster_name: &str) -> Service {
    let target = format!(
        "{}.{}.svc.cluster.local",
        headless_name(&service.name),
        service.namespace
    );
    Service {
        metadata: ObjectMeta {
            name: Some(labels::dns_safe(&service.name)),
            namespace: Some(service.namespace.clone()),
            labels: Some(discovery_labels(service, cluster_name)),
            annotations: Some(discovery_annotations(service)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ExternalName".to_string()),
            external_name: Some(target),
            ..Default::default()
        }),
        status: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kecs_types::{
        DeploymentControllerType, LaunchType, SchedulingStrategy, ServiceStatus,
    };
    use serde_json::json;

    fn service() -> ServiceRow {
        ServiceRow {
            arn: "arn:aws:ecs:us-east-1:000000000000:service/c1/web".into(),
            name: "web".into(),
            cluster_arn: "arn:aws:ecs:us-east-1:000000000000:cluster/c1".into(),
            task_definition_arn: "arn:aws:ecs:us-east-1:000000000000:task-definition/web:1".into(),
            desired_count: 1,
            running_count: 0,
            pending_count: 0,
            status: ServiceStatus::Active,
            launch_type: LaunchType::Ec2,
            scheduling_strategy: SchedulingStrategy::Replica,
            deployment_controller_type: DeploymentControllerType::Ecs,
            load_balancers: json!([]),
            service_registries: json!([{
                "registryArn": "arn:aws:servicediscovery:us-east-1:000000000000:service/srv-x",
                "containerName": "web",
                "containerPort": 80
            }]),
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
    fn headless_service_shape() {
        let svc = headless_service(&service(), "c1");
        assert_eq!(svc.metadata.name.as_deref(), Some("sd-web"));
        let spec = svc.spec.unwrap();
        assert_eq!(spec.cluster_ip.as_deref(), Some("None"));
        assert_eq!(spec.ports.unwrap()[0].port, 80);
        assert_eq!(
            spec.selector.unwrap().get(labels::SERVICE).map(String::as_str),
            Some("web")
        );
    }

    #[test]
    fn alias_points_at_headless_fqdn() {
        let svc = alias_service(&service(), "c1");
        assert_eq!(svc.metadata.name.as_deref(), Some("web"));
        let spec = svc.spec.unwrap();
        assert_eq!(spec.type_.as_deref(), Some("ExternalName"));
        assert_eq!(
            spec.external_name.as_deref(),
            Some("sd-web.c1-us-east-1.svc.cluster.local")
        );
    }

    #[test]
    fn sd_namespace_derivation() {
        let (id, domain) = sd_namespace(
            "arn:aws:servicediscovery:us-east-1:000000000000:service/srv-x",
            "c1",
        );
        assert_eq!(id, "srv-x");
        assert_eq!(domain, "c1.local");
    }
}
