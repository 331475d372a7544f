//! Row types persisted by the state store.
//!
//! JSON-typed fields (load balancers, registries, tags, container
//! definitions, ...) are carried as opaque `serde_json::Value` blobs; only
//! the domain layer and the projector decode them.

use serde_json::Value;

use kecs_types::{
    ClusterStatus, HealthStatus, LaunchType, SchedulingStrategy, ServiceStatus,
    TaskDefinitionStatus, TaskStatus,
};

pub fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn empty_array() -> Value {
    Value::Array(Vec::new())
}

#[derive(Debug, Clone)]
pub struct ClusterRow {
    pub arn: String,
    pub name: String,
    pub status: ClusterStatus,
    pub region: String,
    pub account_id: String,
    pub settings: Value,
    pub configuration: Option<Value>,
    pub tags: Value,
    pub capacity_providers: Value,
    pub default_capacity_provider_strategy: Value,
    pub registered_container_instances_count: i32,
    pub running_tasks_count: i32,
    pub pending_tasks_count: i32,
    pub active_services_count: i32,
    /// Handle of the local k3d cluster backing this ECS cluster, when known.
    pub k3d_cluster: Option<String>,
    /// Unix epoch timestamp in milliseconds.
    pub created_at: i64,
    /// Unix epoch timestamp in milliseconds.
    pub updated_at: i64,
}

impl ClusterRow {
    pub fn new(arn: String, name: String, region: String, account_id: String) -> Self {
        let now = now_ms();
        ClusterRow {
            arn,
            name,
            status: ClusterStatus::Active,
            region,
            account_id,
            settings: empty_array(),
            configuration: None,
            tags: empty_array(),
            capacity_providers: empty_array(),
            default_capacity_provider_strategy: empty_array(),
            registered_container_instances_count: 0,
            running_tasks_count: 0,
            pending_tasks_count: 0,
            active_services_count: 0,
            k3d_cluster: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskDefinitionRow {
    pub arn: String,
    pub family: String,
    pub revision: i64,
    pub status: TaskDefinitionStatus,
    pub region: String,
    pub account_id: String,
    pub container_definitions: Value,
    pub volumes: Value,
    pub network_mode: Option<String>,
    pub requires_compatibilities: Value,
    pub cpu: Option<String>,
    pub memory: Option<String>,
    pub task_role_arn: Option<String>,
    pub execution_role_arn: Option<String>,
    pub placement_constraints: Value,
    pub tags: Value,
    pub created_at: i64,
    pub deregistered_at: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct ServiceRow {
    pub arn: String,
    pub name: String,
    pub cluster_arn: String,
    pub task_definition_arn: String,
    pub desired_count: i32,
    pub running_count: i32,
    pub pending_count: i32,
    pub status: ServiceStatus,
    pub launch_type: LaunchType,
    pub scheduling_strategy: SchedulingStrategy,
    pub deployment_controller_type: kecs_types::DeploymentControllerType,
    pub load_balancers: Value,
    pub service_registries: Value,
    pub network_configuration: Option<Value>,
    pub deployment_configuration: Option<Value>,
    pub placement_constraints: Value,
    pub placement_strategy: Value,
    pub tags: Value,
    pub enable_ecs_managed_tags: bool,
    pub propagate_tags: Option<String>,
    pub enable_execute_command: bool,
    /// Id of the PRIMARY task set, for EXTERNAL deployment controllers.
    pub primary_task_set_id: Option<String>,
    /// Name of the backing Kubernetes Deployment/DaemonSet.
    pub deployment_name: String,
    /// Kubernetes namespace the service is projected into.
    pub namespace: String,
    pub region: String,
    pub account_id: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone)]
pub struct TaskRow {
    pub arn: String,
    /// The uuid portion of the ARN, used in `(cluster, id)` lookups.
    pub id: String,
    pub cluster_arn: String,
    pub task_definition_arn: String,
    pub container_instance_arn: Option<String>,
    pub overrides: Option<Value>,
    pub last_status: TaskStatus,
    pub desired_status: TaskStatus,
    pub cpu: Option<String>,
    pub memory: Option<String>,
    pub containers: Value,
    /// Optimistic concurrency token, bumped on every update.
    pub version: i64,
    pub stop_code: Option<String>,
    pub stopped_reason: Option<String>,
    pub started_by: Option<String>,
    pub group_name: Option<String>,
    pub launch_type: LaunchType,
    pub health_status: HealthStatus,
    pub attributes: Value,
    pub attachments: Value,
    pub capacity_provider_name: Option<String>,
    pub tags: Value,
    /// Name/namespace of the backing pod once projected.
    pub pod_name: Option<String>,
    pub pod_namespace: Option<String>,
    pub region: String,
    pub account_id: String,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub stopping_at: Option<i64>,
    pub stopped_at: Option<i64>,
    pub pull_started_at: Option<i64>,
    pub pull_stopped_at: Option<i64>,
    pub execution_stopped_at: Option<i64>,
    pub updated_at: i64,
}

#[derive(Debug, Clone)]
pub struct TaskSetRow {
    pub id: String,
    pub arn: String,
    pub service_arn: String,
    pub cluster_arn: String,
    /// PRIMARY, ACTIVE or DRAINING.
    pub status: String,
    pub task_definition_arn: String,
    pub external_id: Option<String>,
    pub launch_type: LaunchType,
    pub scale: Value,
    pub computed_desired_count: i32,
    pub pending_count: i32,
    pub running_count: i32,
    pub stability_status: String,
    pub tags: Value,
    pub region: String,
    pub account_id: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone)]
pub struct AttributeRow {
    pub cluster_arn: String,
    pub name: String,
    pub value: Option<String>,
    pub target_type: String,
    pub target_id: String,
    pub region: String,
    pub account_id: String,
}

#[derive(Debug, Clone)]
pub struct AccountSettingRow {
    pub principal_arn: String,
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct ServiceEventRow {
    pub id: String,
    pub service_arn: String,
    pub message: String,
    pub created_at: i64,
}
