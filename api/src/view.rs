//! Converts stored rows into the API shapes, decoding the JSON blob columns
//! the store keeps opaque.

use serde_json::Value;

use kecs_storage::{ClusterRow, ServiceEventRow, ServiceRow, TaskDefinitionRow, TaskRow, TaskSetRow};
use kecs_types::{self as ecs, epoch_seconds};

fn vec_of<T: serde::de::DeserializeOwned>(value: &Value) -> Vec<T> {
    serde_json::from_value(value.clone()).unwrap_or_default()
}

fn opt_of<T: serde::de::DeserializeOwned>(value: &Option<Value>) -> Option<T> {
    value
        .as_ref()
        .and_then(|v| serde_json::from_value(v.clone()).ok())
}

pub fn cluster(row: &ClusterRow) -> ecs::Cluster {
    ecs::Cluster {
        cluster_arn: Some(row.arn.clone()),
        cluster_name: Some(row.name.clone()),
        status: Some(row.status),
        registered_container_instances_count: row.registered_container_instances_count,
        running_tasks_count: row.running_tasks_count,
        pending_tasks_count: row.pending_tasks_count,
        active_services_count: row.active_services_count,
        settings: vec_of(&row.settings),
        configuration: row.configuration.clone(),
        capacity_providers: vec_of(&row.capacity_providers),
        default_capacity_provider_strategy: vec_of(&row.default_capacity_provider_strategy),
        tags: vec_of(&row.tags),
    }
}

pub fn task_definition(row: &TaskDefinitionRow) -> ecs::TaskDefinition {
    ecs::TaskDefinition {
        task_definition_arn: Some(row.arn.clone()),
        container_definitions: vec_of(&row.container_definitions),
        family: Some(row.family.clone()),
        revision: row.revision,
        status: Some(row.status),
        network_mode: row.network_mode.clone(),
        volumes: vec_of(&row.volumes),
        requires_compatibilities: vec_of(&row.requires_compatibilities),
        cpu: row.cpu.clone(),
        memory: row.memory.clone(),
        task_role_arn: row.task_role_arn.clone(),
        execution_role_arn: row.execution_role_arn.clone(),
        placement_constraints: vec_of(&row.placement_constraints),
        registered_at: Some(epoch_seconds(row.created_at)),
        deregistered_at: row.deregistered_at.map(epoch_seconds),
    }
}

pub fn service(row: &ServiceRow) -> ecs::Service {
    ecs::Service {
        service_arn: Some(row.arn.clone()),
        service_name: Some(row.name.clone()),
        cluster_arn: Some(row.cluster_arn.clone()),
        task_definition: (!row.task_definition_arn.is_empty())
            .then(|| row.task_definition_arn.clone()),
        desired_count: row.desired_count,
        running_count: row.running_count,
        pending_count: row.pending_count,
        launch_type: Some(row.launch_type),
        status: Some(row.status),
        load_balancers: vec_of(&row.load_balancers),
        service_registries: vec_of(&row.service_registries),
        network_configuration: opt_of(&row.network_configuration),
        deployment_configuration: opt_of(&row.deployment_configuration),
        deployment_controller: Some(ecs::DeploymentController {
            controller_type: row.deployment_controller_type,
        }),
        placement_constraints: vec_of(&row.placement_constraints),
        placement_strategy: vec_of(&row.placement_strategy),
        scheduling_strategy: Some(row.scheduling_strategy),
        tags: vec_of(&row.tags),
        enable_ecs_managed_tags: Some(row.enable_ecs_managed_tags),
        propagate_tags: row.propagate_tags.clone(),
        enable_execute_command: Some(row.enable_execute_command),
        created_at: Some(epoch_seconds(row.created_at)),
        events: Vec::new(),
        deployments: Vec::new(),
        task_sets: Vec::new(),
    }
}

/// The single synthetic PRIMARY deployment DescribeServices reports for
/// ECS-controller services.
pub fn primary_deployment(row: &ServiceRow) -> ecs::Deployment {
    let steady = row.running_count == row.desired_count && row.pending_count == 0;
    ecs::Deployment {
        id: Some(format!("ecs-svc/{}", row.name)),
        status: Some("PRIMARY".to_string()),
        task_definition: (!row.task_definition_arn.is_empty())
            .then(|| row.task_definition_arn.clone()),
        desired_count: row.desired_count,
        pending_count: row.pending_count,
        running_count: row.running_count,
        created_at: Some(epoch_seconds(row.created_at)),
        updated_at: Some(epoch_seconds(row.updated_at)),
        launch_type: Some(row.launch_type),
        rollout_state: Some(if steady { "COMPLETED" } else { "IN_PROGRESS" }.to_string()),
    }
}

pub fn service_event(row: &ServiceEventRow) -> ecs::ServiceEvent {
    ecs::ServiceEvent {
        id: Some(row.id.clone()),
        created_at: Some(epoch_seconds(row.created_at)),
        message: Some(row.message.clone()),
    }
}

pub fn task(row: &TaskRow) -> ecs::Task {
    ecs::Task {
        task_arn: Some(row.arn.clone()),
        cluster_arn: Some(row.cluster_arn.clone()),
        task_definition_arn: Some(row.task_definition_arn.clone()),
        container_instance_arn: row.container_instance_arn.clone(),
        overrides: opt_of(&row.overrides),
        last_status: Some(row.last_status),
        desired_status: Some(row.desired_status),
        cpu: row.cpu.clone(),
        memory: row.memory.clone(),
        containers: vec_of(&row.containers),
        version: row.version,
        stop_code: row.stop_code.as_deref().and_then(ecs::StopCode::parse),
        stopped_reason: row.stopped_reason.clone(),
        started_by: row.started_by.clone(),
        group: row.group_name.clone(),
        launch_type: Some(row.launch_type),
        attachments: vec_of(&row.attachments),
        health_status: Some(row.health_status),
        attributes: vec_of(&row.attributes),
        capacity_provider_name: row.capacity_provider_name.clone(),
        tags: vec_of(&row.tags),
        created_at: Some(epoch_seconds(row.created_at)),
        started_at: row.started_at.map(epoch_seconds),
        stopping_at: row.stopping_at.map(epoch_seconds),
        stopped_at: row.stopped_at.map(epoch_seconds),
        pull_started_at: row.pull_started_at.map(epoch_seconds),
        pull_stopped_at: row.pull_stopped_at.map(epoch_seconds),
        execution_stopped_at: row.execution_stopped_at.map(epoch_seconds),
    }
}

pub fn task_set(row: &TaskSetRow) -> ecs::TaskSet {
    ecs::TaskSet {
        id: Some(row.id.clone()),
        task_set_arn: Some(row.arn.clone()),
        service_arn: Some(row.service_arn.clone()),
        cluster_arn: Some(row.cluster_arn.clone()),
        status: Some(row.status.clone()),
        task_definition: Some(row.task_definition_arn.clone()),
        computed_desired_count: row.computed_desired_count,
        pending_count: row.pending_count,
        running_count: row.running_count,
        external_id: row.external_id.clone(),
        launch_type: Some(row.launch_type),
        scale: opt_of(&Some(row.scale.clone())),
        stability_status: Some(row.stability_status.clone()),
        created_at: Some(epoch_seconds(row.created_at)),
        updated_at: Some(epoch_seconds(row.updated_at)),
        tags: vec_of(&row.tags),
    }
}
