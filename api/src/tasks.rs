use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::AppState;
use crate::arn::short_name;
use crate::clusters::resolve_cluster;
use crate::error::{ApiError, Result};
use crate::pagination;
use crate::settings::merge_tags;
use crate::task_definitions;
use crate::view;
use kecs_operator::{ProjectionIntent, labels, retry};
use kecs_storage::{ClusterRow, TaskDefinitionRow, TaskFilter, TaskRow, now_ms};
use kecs_types::{
    Failure, HealthStatus, LaunchType, StopCode, Tag, Task, TaskOverride, TaskStatus,
};

const MAX_RUN_TASK_COUNT: i32 = 10;

fn parse_launch_type(input: &Option<String>) -> Result<LaunchType> {
    match input.as_deref() {
        None => Ok(LaunchType::Ec2),
        Some(raw) => LaunchType::parse(raw).ok_or_else(|| {
            ApiError::InvalidParameter(format!(
                "launchType must be one of EC2, FARGATE, EXTERNAL, got {raw}"
            ))
        }),
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RunTaskRequest {
    pub cluster: Option<String>,
    pub task_definition: Option<String>,
    pub count: Option<i32>,
    pub launch_type: Option<String>,
    pub overrides: Option<TaskOverride>,
    pub group: Option<String>,
    pub started_by: Option<String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    pub propagate_tags: Option<String>,
    pub capacity_provider_name: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunTaskResponse {
    pub tasks: Vec<Task>,
    pub failures: Vec<Failure>,
}

#[allow(clippy::too_many_arguments)]
fn new_task_row(
    state: &AppState,
    cluster: &ClusterRow,
    taskdef: &TaskDefinitionRow,
    launch_type: LaunchType,
    overrides: &Option<TaskOverride>,
    group: &Option<String>,
    started_by: &Option<String>,
    tags: &[Tag],
    container_instance_arn: Option<String>,
) -> TaskRow {
    let id = Uuid::new_v4().to_string();
    let now = now_ms();
    TaskRow {
        arn: state.arns.task(&cluster.name, &id),
        id,
        cluster_arn: cluster.arn.clone(),
        task_definition_arn: taskdef.arn.clone(),
        container_instance_arn,
        overrides: overrides.as_ref().map(|o| json!(o)),
        last_status: TaskStatus::Provisioning,
        desired_status: TaskStatus::Running,
        cpu: taskdef.cpu.clone(),
        memory: taskdef.memory.clone(),
        containers: json!([]),
        version: 1,
        stop_code: None,
        stopped_reason: None,
        started_by: started_by.clone(),
        group_name: Some(
            group
                .clone()
                .unwrap_or_else(|| format!("family:{}", taskdef.family)),
        ),
        launch_type,
        health_status: HealthStatus::Unknown,
        attributes: json!([]),
        attachments: json!([]),
        capacity_provider_name: None,
        tags: json!(tags),
        pod_name: None,
        pod_namespace: Some(labels::cluster_namespace(&cluster.name, state.region())),
        region: state.region().to_string(),
        account_id: state.account_id().to_string(),
        created_at: now,
        started_at: None,
        stopping_at: None,
        stopped_at: None,
        pull_started_at: None,
        pull_stopped_at: None,
        execution_stopped_at: None,
        updated_at: now,
    }
}

pub async fn run_task(state: AppState, req: RunTaskRequest) -> Result<RunTaskResponse> {
    let cluster = resolve_cluster(&state, req.cluster.as_deref()).await?;
    let reference = req.task_definition.as_deref().ok_or_else(|| {
        ApiError::InvalidParameter("taskDefinition must not be empty".to_string())
    })?;
    let count = req.count.unwrap_or(1);
    if !(1..=MAX_RUN_TASK_COUNT).contains(&count) {
        return Err(ApiError::InvalidParameter(format!(
            "count must be between 1 and {MAX_RUN_TASK_COUNT}, got {count}"
        )));
    }
    let launch_type = parse_launch_type(&req.launch_type)?;
    let taskdef = task_definitions::resolve(&state, reference).await?;

    let mut tags = req.tags.clone();
    if req.propagate_tags.as_deref() == Some("TASK_DEFINITION") {
        let inherited: Vec<Tag> = serde_json::from_value(taskdef.tags.clone()).unwrap_or_default();
        tags = merge_tags(tags, inherited);
    }

    let rows: Vec<TaskRow> = (0..count)
        .map(|_| {
            new_task_row(
                &state,
                &cluster,
                &taskdef,
                launch_type,
                &req.overrides,
                &req.group,
                &req.started_by,
                &tags,
                None,
            )
        })
        .collect();
    state.storage.tasks.create_batch(&rows).await?;
    for row in &rows {
        state.intents.send(ProjectionIntent::RunTask {
            task_arn: row.arn.clone(),
        });
    }
    tracing::info!(family = %taskdef.family, count, cluster = %cluster.name, "running tasks");
    Ok(RunTaskResponse {
        tasks: rows.iter().map(view::task).collect(),
        failures: Vec::new(),
    })
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StartTaskRequest {
    pub cluster: Option<String>,
    pub task_definition: Option<String>,
    #[serde(default)]
    pub container_instances: Vec<String>,
    pub overrides: Option<TaskOverride>,
    pub group: Option<String>,
    pub started_by: Option<String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

pub async fn start_task(state: AppState, req: StartTaskRequest) -> Result<RunTaskResponse> {
    let cluster = resolve_cluster(&state, req.cluster.as_deref()).await?;
    let reference = req.task_definition.as_deref().ok_or_else(|| {
        ApiError::InvalidParameter("taskDefinition must not be empty".to_string())
    })?;
    if req.container_instances.is_empty() {
        return Err(ApiError::InvalidParameter(
            "containerInstances must not be empty".to_string(),
        ));
    }
    if req.container_instances.len() > MAX_RUN_TASK_COUNT as usize {
        return Err(ApiError::LimitExceeded(format!(
            "at most {MAX_RUN_TASK_COUNT} container instances per StartTask"
        )));
    }
    let taskdef = task_definitions::resolve(&state, reference).await?;

    let rows: Vec<TaskRow> = req
        .container_instances
        .iter()
        .map(|instance| {
            new_task_row(
                &state,
                &cluster,
                &taskdef,
                LaunchType::Ec2,
                &req.overrides,
                &req.group,
                &req.started_by,
                &req.tags,
                Some(instance.clone()),
            )
        })
        .collect();
    state.storage.tasks.create_batch(&rows).await?;
    for row in &rows {
        state.intents.send(ProjectionIntent::RunTask {
            task_arn: row.arn.clone(),
        });
    }
    Ok(RunTaskResponse {
        tasks: rows.iter().map(view::task).collect(),
        failures: Vec::new(),
    })
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StopTaskRequest {
    pub cluster: Option<String>,
    pub task: Option<String>,
    pub reason: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopTaskResponse {
    pub task: Task,
}

pub async fn stop_task(state: AppState, req: StopTaskRequest) -> Result<StopTaskResponse> {
    let cluster = resolve_cluster(&state, req.cluster.as_deref()).await?;
    let reference = req
        .task
        .as_deref()
        .ok_or_else(|| ApiError::InvalidParameter("task must not be empty".to_string()))?;

    for attempt in 0..retry::MAX_ATTEMPTS {
        let mut row = state
            .storage
            .tasks
            .get(&cluster.arn, short_name(reference))
            .await?
            .ok_or_else(|| ApiError::Client(format!("task {reference} was not found")))?;
        if row.last_status == TaskStatus::Stopped {
            return Ok(StopTaskResponse {
                task: view::task(&row),
            });
        }

        row.desired_status = TaskStatus::Stopped;
        row.stop_code = Some(StopCode::UserInitiated.as_str().to_string());
        row.stopped_reason = req.reason.clone();
        if row.stopping_at.is_none() {
            row.stopping_at = Some(now_ms());
        }
        match state.storage.tasks.update_with_version(&row).await {
            Ok(()) => {
                state.intents.send(ProjectionIntent::StopTask {
                    task_arn: row.arn.clone(),
                });
                return Ok(StopTaskResponse {
                    task: view::task(&row),
                });
            }
            // The reconciler slipped a write in between; re-read and retry.
            Err(kecs_storage::StorageError::Conflict(_)) => {
                tokio::time::sleep(retry::backoff(attempt)).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(ApiError::Client(format!(
        "task {reference} is being updated concurrently, retry"
    )))
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DescribeTasksRequest {
    pub cluster: Option<String>,
    #[serde(default)]
    pub tasks: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeTasksResponse {
    pub tasks: Vec<Task>,
    pub failures: Vec<Failure>,
}

pub async fn describe_tasks(
    state: AppState,
    req: DescribeTasksRequest,
) -> Result<DescribeTasksResponse> {
    let cluster = resolve_cluster(&state, req.cluster.as_deref()).await?;
    if req.tasks.is_empty() {
        return Err(ApiError::InvalidParameter(
            "tasks must not be empty".to_string(),
        ));
    }
    let mut tasks = Vec::new();
    let mut failures = Vec::new();
    for reference in &req.tasks {
        let id = short_name(reference);
        match state.storage.tasks.get(&cluster.arn, id).await? {
            Some(row) => tasks.push(view::task(&row)),
            None => failures.push(Failure::missing(state.arns.task(&cluster.name, id))),
        }
    }
    Ok(DescribeTasksResponse { tasks, failures })
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListTasksRequest {
    pub cluster: Option<String>,
    pub service_name: Option<String>,
    pub family: Option<String>,
    pub started_by: Option<String>,
    pub desired_status: Option<String>,
    pub launch_type: Option<String>,
    pub max_results: Option<i64>,
    pub next_token: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTasksResponse {
    pub task_arns: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

pub async fn list_tasks(state: AppState, req: ListTasksRequest) -> Result<ListTasksResponse> {
    let cluster = resolve_cluster(&state, req.cluster.as_deref()).await?;
    let limit = pagination::page_size(req.max_results)?;
    let offset = pagination::offset(req.next_token.as_deref())?;

    let desired_status = match req.desired_status.as_deref() {
        None => None,
        Some(raw) => Some(
            TaskStatus::parse(raw)
                .ok_or_else(|| {
                    ApiError::InvalidParameter(format!("invalid desiredStatus: {raw}"))
                })?
                .as_str()
                .to_string(),
        ),
    };
    let launch_type = match req.launch_type.as_deref() {
        None => None,
        Some(raw) => Some(parse_launch_type(&Some(raw.to_string()))?.as_str().to_string()),
    };
    // serviceName narrows to tasks the service scheduler started.
    let started_by = match (&req.service_name, &req.started_by) {
        (Some(service), _) => Some(format!("ecs-svc/{}", short_name(service))),
        (None, Some(started_by)) => Some(started_by.clone()),
        (None, None) => None,
    };
    let filter = TaskFilter {
        desired_status,
        launch_type,
        started_by,
        group: None,
        family_arn_prefix: req
            .family
            .as_deref()
            .map(|f| state.arns.task_definition_family_prefix(f)),
    };
    let rows = state
        .storage
        .tasks
        .list(&cluster.arn, &filter, limit, offset)
        .await?;
    let next_token = pagination::next_token(offset, rows.len(), limit);
    Ok(ListTasksResponse {
        task_arns: rows.into_iter().map(|r| r.arn).collect(),
        next_token,
    })
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateContainerInstancesStateRequest {
    pub cluster: Option<String>,
    #[serde(default)]
    pub container_instances: Vec<String>,
    pub status: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateContainerInstancesStateResponse {
    pub container_instances: Vec<serde_json::Value>,
    pub failures: Vec<Failure>,
}

/// The k3d substrate has no real container instances to drain; the call is
/// validated and the referenced instances reported as missing.
pub async fn update_container_instances_state(
    state: AppState,
    req: UpdateContainerInstancesStateRequest,
) -> Result<UpdateContainerInstancesStateResponse> {
    resolve_cluster(&state, req.cluster.as_deref()).await?;
    match req.status.as_deref() {
        Some("ACTIVE") | Some("DRAINING") => {}
        Some(other) => {
            return Err(ApiError::InvalidParameter(format!(
                "status must be ACTIVE or DRAINING, got {other}"
            )));
        }
        None => {
            return Err(ApiError::InvalidParameter(
                "status must not be empty".to_string(),
            ));
        }
    }
    Ok(UpdateContainerInstancesStateResponse {
        container_instances: Vec::new(),
        failures: req
            .container_instances
            .iter()
            .map(|instance| Failure::missing(instance.clone()))
            .collect(),
    })
}
