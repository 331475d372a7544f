//! Labels and annotations stamped on every projected Kubernetes object.
//!
//! ARNs contain `:` and `/`, which are not legal in label values, so labels
//! carry short names/ids for selection and annotations carry the
//! authoritative ARNs for back-lookup.

use std::collections::BTreeMap;

pub const MANAGED: &str = "kecs.io/managed";
pub const CLUSTER: &str = "kecs.io/cluster";
pub const SERVICE: &str = "kecs.io/service";
pub const TASK_ID: &str = "kecs.io/task-id";
pub const TASK_SET: &str = "kecs.io/task-set";
pub const TASK_DEF_FAMILY: &str = "kecs.io/task-def-family";
pub const TASK_DEF_REVISION: &str = "kecs.io/task-def-revision";

pub const ANN_CLUSTER_ARN: &str = "kecs.io/cluster-arn";
pub const ANN_SERVICE_ARN: &str = "kecs.io/service-arn";
pub const ANN_TASK_ARN: &str = "kecs.io/task-arn";
pub const ANN_TASK_SET_ARN: &str = "kecs.io/task-set-arn";
pub const ANN_TASK_DEFINITION_ARN: &str = "kecs.io/task-definition-arn";

/// Label selector matching every object this control plane owns.
pub const MANAGED_SELECTOR: &str = "kecs.io/managed=true";

/// Name of the Kubernetes field manager used for server-side apply.
pub const MANAGER_NAME: &str = "kecs-operator";

/// Lowercases and maps `_` to `-`: ECS names allow underscores and capitals,
/// Kubernetes object and namespace names do not.
pub fn dns_safe(name: &str) -> String {
    name.to_lowercase().replace('_', "-")
}

/// `<clusterName>-<region>`, the namespace convention for projected objects.
pub fn cluster_namespace(cluster_name: &str, region: &str) -> String {
    format!("{}-{region}", dns_safe(cluster_name))
}

pub fn base_labels(cluster_name: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(MANAGED.to_string(), "true".to_string());
    labels.insert(CLUSTER.to_string(), cluster_name.to_string());
    labels
}

/// Splits `family:revision` off a task-definition ARN for labelling.
pub fn family_revision(task_definition_arn: &str) -> Option<(String, String)> {
    let qualifier = task_definition_arn.rsplit('/').next()?;
    let (family, revision) = qualifier.split_once(':')?;
    Some((family.to_string(), revision.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_convention() {
        assert_eq!(cluster_namespace("default", "us-east-1"), "default-us-east-1");
        assert_eq!(cluster_namespace("My_Cluster", "us-east-1"), "my-cluster-us-east-1");
    }

    #[test]
    fn family_revision_split() {
        let arn = "arn:aws:ecs:us-east-1:000000000000:task-definition/nginx:3";
        assert_eq!(
            family_revision(arn),
            Some(("nginx".to_string(), "3".to_string()))
        );
        assert_eq!(family_revision("arn:aws:ecs:::cluster/x"), None);
    }
}
