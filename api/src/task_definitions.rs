use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::AppState;
use crate::arn::split_family_revision;
use crate::error::{ApiError, Result};
use crate::pagination;
use crate::view;
use kecs_storage::{TaskDefinitionFilter, TaskDefinitionRow, now_ms};
use kecs_types::{
    ContainerDefinition, PlacementConstraint, Tag, TaskDefinition, TaskDefinitionStatus, Volume,
};

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RegisterTaskDefinitionRequest {
    pub family: Option<String>,
    #[serde(default)]
    pub container_definitions: Vec<ContainerDefinition>,
    #[serde(default)]
    pub volumes: Vec<Volume>,
    pub network_mode: Option<String>,
    #[serde(default)]
    pub requires_compatibilities: Vec<String>,
    pub cpu: Option<String>,
    pub memory: Option<String>,
    pub task_role_arn: Option<String>,
    pub execution_role_arn: Option<String>,
    #[serde(default)]
    pub placement_constraints: Vec<PlacementConstraint>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinitionResponse {
    pub task_definition: TaskDefinition,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
}

fn validate_register(req: &RegisterTaskDefinitionRequest) -> Result<String> {
    let family = req
        .family
        .as_deref()
        .filter(|f| !f.is_empty())
        .ok_or_else(|| ApiError::InvalidParameter("family must not be empty".to_string()))?;
    if family.len() > 255
        || !family
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ApiError::InvalidParameter(format!(
            "family {family:?} is not a valid family name"
        )));
    }
    if req.container_definitions.is_empty() {
        return Err(ApiError::InvalidParameter(
            "containerDefinitions must not be empty".to_string(),
        ));
    }
    for def in &req.container_definitions {
        if def.name.is_empty() {
            return Err(ApiError::InvalidParameter(
                "container definition name must not be empty".to_string(),
            ));
        }
        if def.image.is_empty() {
            return Err(ApiError::InvalidParameter(format!(
                "container {} is missing an image",
                def.name
            )));
        }
        if def.memory.is_some_and(|m| m < 0) {
            return Err(ApiError::InvalidParameter(format!(
                "container {} memory must be >= 0",
                def.name
            )));
        }
        if def.cpu.is_some_and(|c| c < 0) {
            return Err(ApiError::InvalidParameter(format!(
                "container {} cpu must be >= 0",
                def.name
            )));
        }
    }
    for volume in &req.volumes {
        if volume.name.is_empty() {
            return Err(ApiError::InvalidParameter(
                "volume name must not be empty".to_string(),
            ));
        }
    }
    Ok(family.to_string())
}

pub async fn register_task_definition(
    state: AppState,
    mut req: RegisterTaskDefinitionRequest,
) -> Result<TaskDefinitionResponse> {
    let family = validate_register(&req)?;
    for def in &mut req.container_definitions {
        def.apply_defaults();
    }

    let row = TaskDefinitionRow {
        arn: String::new(), // allocated with the revision
        family,
        revision: 0,
        status: TaskDefinitionStatus::Active,
        region: state.region().to_string(),
        account_id: state.account_id().to_string(),
        container_definitions: json!(req.container_definitions),
        volumes: json!(req.volumes),
        network_mode: req.network_mode,
        requires_compatibilities: json!(req.requires_compatibilities),
        cpu: req.cpu,
        memory: req.memory,
        task_role_arn: req.task_role_arn,
        execution_role_arn: req.execution_role_arn,
        placement_constraints: json!(req.placement_constraints),
        tags: json!(req.tags),
        created_at: now_ms(),
        deregistered_at: None,
    };
    let stored = state.storage.task_definitions.register(row).await?;
    tracing::info!(family = %stored.family, revision = stored.revision, "registered task definition");
    Ok(TaskDefinitionResponse {
        tags: req.tags,
        task_definition: view::task_definition(&stored),
    })
}

/// Resolves `family`, `family:revision` or a full ARN to a stored revision.
/// A bare family resolves to the newest ACTIVE revision.
pub(crate) async fn resolve(state: &AppState, reference: &str) -> Result<TaskDefinitionRow> {
    let (family, revision) = split_family_revision(reference)?;
    let row = match revision {
        Some(revision) => state.storage.task_definitions.get(&family, revision).await?,
        None => {
            state
                .storage
                .task_definitions
                .latest_revision(&family, true)
                .await?
        }
    };
    row.ok_or(ApiError::TaskDefinitionNotFound)
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DescribeTaskDefinitionRequest {
    pub task_definition: Option<String>,
}

pub async fn describe_task_definition(
    state: AppState,
    req: DescribeTaskDefinitionRequest,
) -> Result<TaskDefinitionResponse> {
    let reference = req.task_definition.as_deref().ok_or_else(|| {
        ApiError::InvalidParameter("taskDefinition must not be empty".to_string())
    })?;
    let row = resolve(&state, reference).await?;
    Ok(TaskDefinitionResponse {
        tags: serde_json::from_value(row.tags.clone()).unwrap_or_default(),
        task_definition: view::task_definition(&row),
    })
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DeregisterTaskDefinitionRequest {
    pub task_definition: Option<String>,
}

pub async fn deregister_task_definition(
    state: AppState,
    req: DeregisterTaskDefinitionRequest,
) -> Result<TaskDefinitionResponse> {
    let reference = req.task_definition.as_deref().ok_or_else(|| {
        ApiError::InvalidParameter("taskDefinition must not be empty".to_string())
    })?;
    let (_, revision) = split_family_revision(reference)?;
    if revision.is_none() {
        return Err(ApiError::InvalidParameter(
            "taskDefinition must include a revision".to_string(),
        ));
    }
    let row = resolve(&state, reference).await?;
    let row = state
        .storage
        .task_definitions
        .deregister(&row.arn)
        .await?
        .ok_or(ApiError::TaskDefinitionNotFound)?;
    Ok(TaskDefinitionResponse {
        tags: Vec::new(),
        task_definition: view::task_definition(&row),
    })
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListTaskDefinitionsRequest {
    pub family_prefix: Option<String>,
    pub status: Option<String>,
    pub max_results: Option<i64>,
    pub next_token: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTaskDefinitionsResponse {
    pub task_definition_arns: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

fn status_filter(status: &Option<String>) -> Result<Option<String>> {
    match status.as_deref() {
        None => Ok(None),
        Some(s @ ("ACTIVE" | "INACTIVE" | "ALL")) => Ok(Some(s.to_string())),
        Some(other) => Err(ApiError::InvalidParameter(format!(
            "status must be ACTIVE, INACTIVE or ALL, got {other}"
        ))),
    }
}

pub async fn list_task_definitions(
    state: AppState,
    req: ListTaskDefinitionsRequest,
) -> Result<ListTaskDefinitionsResponse> {
    let limit = pagination::page_size(req.max_results)?;
    let offset = pagination::offset(req.next_token.as_deref())?;
    let filter = TaskDefinitionFilter {
        family_prefix: req.family_prefix,
        status: status_filter(&req.status)?,
    };
    let rows = state
        .storage
        .task_definitions
        .list(&filter, limit, offset)
        .await?;
    let next_token = pagination::next_token(offset, rows.len(), limit);
    Ok(ListTaskDefinitionsResponse {
        task_definition_arns: rows.into_iter().map(|r| r.arn).collect(),
        next_token,
    })
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListTaskDefinitionFamiliesRequest {
    pub family_prefix: Option<String>,
    pub status: Option<String>,
    pub max_results: Option<i64>,
    pub next_token: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTaskDefinitionFamiliesResponse {
    pub families: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

pub async fn list_task_definition_families(
    state: AppState,
    req: ListTaskDefinitionFamiliesRequest,
) -> Result<ListTaskDefinitionFamiliesResponse> {
    let limit = pagination::page_size(req.max_results)?;
    let offset = pagination::offset(req.next_token.as_deref())?;
    let filter = TaskDefinitionFilter {
        family_prefix: req.family_prefix,
        status: status_filter(&req.status)?,
    };
    let families = state
        .storage
        .task_definitions
        .list_families(&filter, limit, offset)
        .await?;
    let next_token = pagination::next_token(offset, families.len(), limit);
    Ok(ListTaskDefinitionFamiliesResponse {
        families,
        next_token,
    })
}
