use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::AppState;
use crate::arn::short_name;
use crate::clusters::resolve_cluster;
use crate::error::{ApiError, Result};
use crate::services::resolve_service;
use crate::task_definitions;
use crate::view;
use kecs_operator::ProjectionIntent;
use kecs_storage::{ServiceRow, TaskSetRow, now_ms};
use kecs_types::{DeploymentControllerType, Failure, LaunchType, Scale, Tag, TaskSet};

fn require_external(service: &ServiceRow) -> Result<()> {
    if service.deployment_controller_type != DeploymentControllerType::External {
        return Err(ApiError::InvalidParameter(format!(
            "service {} does not use the EXTERNAL deployment controller",
            service.name
        )));
    }
    Ok(())
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskSetRequest {
    pub cluster: Option<String>,
    pub service: Option<String>,
    pub task_definition: Option<String>,
    pub external_id: Option<String>,
    pub launch_type: Option<String>,
    pub scale: Option<Scale>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSetResponse {
    pub task_set: TaskSet,
}

pub async fn create_task_set(state: AppState, req: CreateTaskSetRequest) -> Result<TaskSetResponse> {
    let cluster = resolve_cluster(&state, req.cluster.as_deref()).await?;
    let service_ref = req
        .service
        .as_deref()
        .ok_or_else(|| ApiError::InvalidParameter("service must not be empty".to_string()))?;
    let service = resolve_service(&state, &cluster.arn, service_ref).await?;
    require_external(&service)?;
    let taskdef_ref = req.task_definition.as_deref().ok_or_else(|| {
        ApiError::InvalidParameter("taskDefinition must not be empty".to_string())
    })?;
    let taskdef = task_definitions::resolve(&state, taskdef_ref).await?;
    let launch_type = match req.launch_type.as_deref() {
        None => LaunchType::External,
        Some(raw) => LaunchType::parse(raw).ok_or_else(|| {
            ApiError::InvalidParameter(format!("invalid launchType: {raw}"))
        })?,
    };

    let scale = req.scale.unwrap_or_default();
    let computed = scale.resolve(service.desired_count);
    let id = format!("ecs-svc-{}", Uuid::new_v4().simple());
    let now = now_ms();
    let row = TaskSetRow {
        arn: state.arns.task_set(&cluster.name, &service.name, &id),
        id,
        service_arn: service.arn.clone(),
        cluster_arn: cluster.arn.clone(),
        status: "ACTIVE".to_string(),
        task_definition_arn: taskdef.arn,
        external_id: req.external_id,
        launch_type,
        scale: json!(scale),
        computed_desired_count: computed,
        pending_count: 0,
        running_count: 0,
        stability_status: "STABILIZING".to_string(),
        tags: json!(req.tags),
        region: state.region().to_string(),
        account_id: state.account_id().to_string(),
        created_at: now,
        updated_at: now,
    };
    state.storage.task_sets.create(&row).await?;
    state.intents.send(ProjectionIntent::SyncTaskSet {
        service_arn: service.arn.clone(),
        task_set_id: row.id.clone(),
    });
    tracing::info!(service = %service.name, task_set = %row.id, "created task set");
    Ok(TaskSetResponse {
        task_set: view::task_set(&row),
    })
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskSetRequest {
    pub cluster: Option<String>,
    pub service: Option<String>,
    pub task_set: Option<String>,
    pub scale: Option<Scale>,
}

pub async fn update_task_set(state: AppState, req: UpdateTaskSetRequest) -> Result<TaskSetResponse> {
    let cluster = resolve_cluster(&state, req.cluster.as_deref()).await?;
    let service_ref = req
        .service
        .as_deref()
        .ok_or_else(|| ApiError::InvalidParameter("service must not be empty".to_string()))?;
    let service = resolve_service(&state, &cluster.arn, service_ref).await?;
    let reference = req
        .task_set
        .as_deref()
        .ok_or_else(|| ApiError::InvalidParameter("taskSet must not be empty".to_string()))?;
    let mut row = state
        .storage
        .task_sets
        .get(&service.arn, short_name(reference))
        .await?
        .ok_or_else(|| ApiError::Client(format!("task set {reference} was not found")))?;

    if let Some(scale) = req.scale {
        row.computed_desired_count = scale.resolve(service.desired_count);
        row.scale = json!(scale);
        row.stability_status = "STABILIZING".to_string();
    }
    state.storage.task_sets.update(&row).await?;
    state.intents.send(ProjectionIntent::SyncTaskSet {
        service_arn: service.arn.clone(),
        task_set_id: row.id.clone(),
    });
    Ok(TaskSetResponse {
        task_set: view::task_set(&row),
    })
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DeleteTaskSetRequest {
    pub cluster: Option<String>,
    pub service: Option<String>,
    pub task_set: Option<String>,
    #[serde(default)]
    pub force: bool,
}

pub async fn delete_task_set(state: AppState, req: DeleteTaskSetRequest) -> Result<TaskSetResponse> {
    let cluster = resolve_cluster(&state, req.cluster.as_deref()).await?;
    let service_ref = req
        .service
        .as_deref()
        .ok_or_else(|| ApiError::InvalidParameter("service must not be empty".to_string()))?;
    let mut service = resolve_service(&state, &cluster.arn, service_ref).await?;
    let reference = req
        .task_set
        .as_deref()
        .ok_or_else(|| ApiError::InvalidParameter("taskSet must not be empty".to_string()))?;
    let mut row = state
        .storage
        .task_sets
        .get(&service.arn, short_name(reference))
        .await?
        .ok_or_else(|| ApiError::Client(format!("task set {reference} was not found")))?;

    if row.status == "PRIMARY" && !req.force {
        return Err(ApiError::InvalidParameter(format!(
            "task set {} is PRIMARY; use force to delete it",
            row.id
        )));
    }

    state.intents.send(ProjectionIntent::DeleteTaskSet {
        service_arn: service.arn.clone(),
        task_set_id: row.id.clone(),
    });
    state.storage.task_sets.delete(&row.arn).await?;
    if service.primary_task_set_id.as_deref() == Some(row.id.as_str()) {
        service.primary_task_set_id = None;
        state.storage.services.update(&service).await?;
    }
    row.status = "DRAINING".to_string();
    Ok(TaskSetResponse {
        task_set: view::task_set(&row),
    })
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DescribeTaskSetsRequest {
    pub cluster: Option<String>,
    pub service: Option<String>,
    #[serde(default)]
    pub task_sets: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeTaskSetsResponse {
    pub task_sets: Vec<TaskSet>,
    pub failures: Vec<Failure>,
}

pub async fn describe_task_sets(
    state: AppState,
    req: DescribeTaskSetsRequest,
) -> Result<DescribeTaskSetsResponse> {
    let cluster = resolve_cluster(&state, req.cluster.as_deref()).await?;
    let service_ref = req
        .service
        .as_deref()
        .ok_or_else(|| ApiError::InvalidParameter("service must not be empty".to_string()))?;
    let service = resolve_service(&state, &cluster.arn, service_ref).await?;

    if req.task_sets.is_empty() {
        let rows = state.storage.task_sets.list(&service.arn).await?;
        return Ok(DescribeTaskSetsResponse {
            task_sets: rows.iter().map(view::task_set).collect(),
            failures: Vec::new(),
        });
    }

    let mut task_sets = Vec::new();
    let mut failures = Vec::new();
    for reference in &req.task_sets {
        match state
            .storage
            .task_sets
            .get(&service.arn, short_name(reference))
            .await?
        {
            Some(row) => task_sets.push(view::task_set(&row)),
            None => failures.push(Failure::missing(reference.clone())),
        }
    }
    Ok(DescribeTaskSetsResponse {
        task_sets,
        failures,
    })
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateServicePrimaryTaskSetRequest {
    pub cluster: Option<String>,
    pub service: Option<String>,
    pub primary_task_set: Option<String>,
}

/// Promotes one task set to PRIMARY and demotes the others back to ACTIVE.
/// In-flight scale changes on other task sets are left untouched.
pub async fn update_service_primary_task_set(
    state: AppState,
    req: UpdateServicePrimaryTaskSetRequest,
) -> Result<TaskSetResponse> {
    let cluster = resolve_cluster(&state, req.cluster.as_deref()).await?;
    let service_ref = req
        .service
        .as_deref()
        .ok_or_else(|| ApiError::InvalidParameter("service must not be empty".to_string()))?;
    let mut service = resolve_service(&state, &cluster.arn, service_ref).await?;
    require_external(&service)?;
    let reference = req.primary_task_set.as_deref().ok_or_else(|| {
        ApiError::InvalidParameter("primaryTaskSet must not be empty".to_string())
    })?;
    let mut target = state
        .storage
        .task_sets
        .get(&service.arn, short_name(reference))
        .await?
        .ok_or_else(|| ApiError::Client(format!("task set {reference} was not found")))?;

    for mut other in state.storage.task_sets.list(&service.arn).await? {
        if other.id != target.id && other.status == "PRIMARY" {
            other.status = "ACTIVE".to_string();
            state.storage.task_sets.update(&other).await?;
        }
    }
    target.status = "PRIMARY".to_string();
    state.storage.task_sets.update(&target).await?;

    service.primary_task_set_id = Some(target.id.clone());
    state.storage.services.update(&service).await?;
    state.intents.send(ProjectionIntent::SyncTaskSet {
        service_arn: service.arn.clone(),
        task_set_id: target.id.clone(),
    });
    tracing::info!(service = %service.name, task_set = %target.id, "promoted primary task set");
    Ok(TaskSetResponse {
        task_set: view::task_set(&target),
    })
}
