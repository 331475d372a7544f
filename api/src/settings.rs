//! Tagging, attributes and account settings.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::AppState;
use crate::clusters::resolve_cluster;
use crate::error::{ApiError, Result};
use crate::pagination;
use kecs_storage::{AccountSettingRow, AttributeRow};
use kecs_types::{Attribute, Failure, Tag};

/// Merges `incoming` into `existing` by key; incoming wins.
pub(crate) fn merge_tags(existing: Vec<Tag>, incoming: Vec<Tag>) -> Vec<Tag> {
    let mut merged = existing;
    for tag in incoming {
        match merged.iter_mut().find(|t| t.key == tag.key) {
            Some(slot) => slot.value = tag.value,
            None => merged.push(tag),
        }
    }
    merged
}

fn tags_of(value: &Value) -> Vec<Tag> {
    serde_json::from_value(value.clone()).unwrap_or_default()
}

enum Taggable {
    Cluster(kecs_storage::ClusterRow),
    Service(kecs_storage::ServiceRow),
    TaskDefinition(kecs_storage::TaskDefinitionRow),
    Task(kecs_storage::TaskRow),
}

/// ECS tagging addresses entities purely by ARN; the resource type is
/// encoded in the ARN itself.
async fn resolve_taggable(state: &AppState, arn: &str) -> Result<Taggable> {
    if arn.contains(":cluster/") {
        return state
            .storage
            .clusters
            .get_by_arn(arn)
            .await?
            .map(Taggable::Cluster)
            .ok_or(ApiError::ClusterNotFound);
    }
    if arn.contains(":service/") {
        return state
            .storage
            .services
            .get_by_arn(arn)
            .await?
            .map(Taggable::Service)
            .ok_or(ApiError::ServiceNotFound);
    }
    if arn.contains(":task-definition/") {
        return state
            .storage
            .task_definitions
            .get_by_arn(arn)
            .await?
            .map(Taggable::TaskDefinition)
            .ok_or(ApiError::TaskDefinitionNotFound);
    }
    if arn.contains(":task/") {
        return state
            .storage
            .tasks
            .get_by_arn(arn)
            .await?
            .map(Taggable::Task)
            .ok_or_else(|| ApiError::Client(format!("task {arn} was not found")));
    }
    Err(ApiError::InvalidParameter(format!(
        "resourceArn {arn} is not a taggable resource"
    )))
}

async fn store_tags(state: &AppState, taggable: Taggable, tags: Vec<Tag>) -> Result<()> {
    match taggable {
        Taggable::Cluster(mut row) => {
            row.tags = json!(tags);
            state.storage.clusters.update(&row).await?;
        }
        Taggable::Service(mut row) => {
            row.tags = json!(tags);
            state.storage.services.update(&row).await?;
        }
        Taggable::TaskDefinition(row) => {
            state
                .storage
                .task_definitions
                .update_tags(&row.arn, &json!(tags))
                .await?;
        }
        Taggable::Task(mut row) => {
            row.tags = json!(tags);
            // Tag writes ride the optimistic version like any task update.
            state.storage.tasks.update_with_version(&row).await?;
        }
    }
    Ok(())
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TagResourceRequest {
    pub resource_arn: Option<String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

#[derive(Serialize)]
pub struct EmptyResponse {}

pub async fn tag_resource(state: AppState, req: TagResourceRequest) -> Result<EmptyResponse> {
    let arn = req
        .resource_arn
        .as_deref()
        .ok_or_else(|| ApiError::InvalidParameter("resourceArn must not be empty".to_string()))?;
    if req.tags.is_empty() {
        return Err(ApiError::InvalidParameter("tags must not be empty".to_string()));
    }
    let taggable = resolve_taggable(&state, arn).await?;
    let existing = match &taggable {
        Taggable::Cluster(row) => tags_of(&row.tags),
        Taggable::Service(row) => tags_of(&row.tags),
        Taggable::TaskDefinition(row) => tags_of(&row.tags),
        Taggable::Task(row) => tags_of(&row.tags),
    };
    store_tags(&state, taggable, merge_tags(existing, req.tags)).await?;
    Ok(EmptyResponse {})
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UntagResourceRequest {
    pub resource_arn: Option<String>,
    #[serde(default)]
    pub tag_keys: Vec<String>,
}

pub async fn untag_resource(state: AppState, req: UntagResourceRequest) -> Result<EmptyResponse> {
    let arn = req
        .resource_arn
        .as_deref()
        .ok_or_else(|| ApiError::InvalidParameter("resourceArn must not be empty".to_string()))?;
    let taggable = resolve_taggable(&state, arn).await?;
    let existing = match &taggable {
        Taggable::Cluster(row) => tags_of(&row.tags),
        Taggable::Service(row) => tags_of(&row.tags),
        Taggable::TaskDefinition(row) => tags_of(&row.tags),
        Taggable::Task(row) => tags_of(&row.tags),
    };
    let remaining: Vec<Tag> = existing
        .into_iter()
        .filter(|t| !req.tag_keys.contains(&t.key))
        .collect();
    store_tags(&state, taggable, remaining).await?;
    Ok(EmptyResponse {})
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListTagsForResourceRequest {
    pub resource_arn: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTagsForResourceResponse {
    pub tags: Vec<Tag>,
}

pub async fn list_tags_for_resource(
    state: AppState,
    req: ListTagsForResourceRequest,
) -> Result<ListTagsForResourceResponse> {
    let arn = req
        .resource_arn
        .as_deref()
        .ok_or_else(|| ApiError::InvalidParameter("resourceArn must not be empty".to_string()))?;
    let tags = match resolve_taggable(&state, arn).await? {
        Taggable::Cluster(row) => tags_of(&row.tags),
        Taggable::Service(row) => tags_of(&row.tags),
        Taggable::TaskDefinition(row) => tags_of(&row.tags),
        Taggable::Task(row) => tags_of(&row.tags),
    };
    Ok(ListTagsForResourceResponse { tags })
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PutAttributesRequest {
    pub cluster: Option<String>,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PutAttributesResponse {
    pub attributes: Vec<Attribute>,
}

fn attribute_rows(
    state: &AppState,
    cluster_arn: &str,
    attributes: &[Attribute],
) -> Result<Vec<AttributeRow>> {
    attributes
        .iter()
        .map(|attr| {
            if attr.name.is_empty() {
                return Err(ApiError::InvalidParameter(
                    "attribute name must not be empty".to_string(),
                ));
            }
            Ok(AttributeRow {
                cluster_arn: cluster_arn.to_string(),
                name: attr.name.clone(),
                value: attr.value.clone(),
                target_type: attr
                    .target_type
                    .clone()
                    .unwrap_or_else(|| "container-instance".to_string()),
                target_id: attr.target_id.clone().unwrap_or_default(),
                region: state.region().to_string(),
                account_id: state.account_id().to_string(),
            })
        })
        .collect()
}

pub async fn put_attributes(state: AppState, req: PutAttributesRequest) -> Result<PutAttributesResponse> {
    let cluster = resolve_cluster(&state, req.cluster.as_deref()).await?;
    if req.attributes.is_empty() {
        return Err(ApiError::InvalidParameter(
            "attributes must not be empty".to_string(),
        ));
    }
    let rows = attribute_rows(&state, &cluster.arn, &req.attributes)?;
    state.storage.attributes.put(&rows).await?;
    Ok(PutAttributesResponse {
        attributes: req.attributes,
    })
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DeleteAttributesRequest {
    pub cluster: Option<String>,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

pub async fn delete_attributes(
    state: AppState,
    req: DeleteAttributesRequest,
) -> Result<PutAttributesResponse> {
    let cluster = resolve_cluster(&state, req.cluster.as_deref()).await?;
    let rows = attribute_rows(&state, &cluster.arn, &req.attributes)?;
    state.storage.attributes.delete(&rows).await?;
    Ok(PutAttributesResponse {
        attributes: req.attributes,
    })
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListAttributesRequest {
    pub cluster: Option<String>,
    pub target_type: Option<String>,
    pub attribute_name: Option<String>,
    pub max_results: Option<i64>,
    pub next_token: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListAttributesResponse {
    pub attributes: Vec<Attribute>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

pub async fn list_attributes(state: AppState, req: ListAttributesRequest) -> Result<ListAttributesResponse> {
    let cluster = resolve_cluster(&state, req.cluster.as_deref()).await?;
    let limit = pagination::page_size(req.max_results)?;
    let offset = pagination::offset(req.next_token.as_deref())?;
    let rows = state
        .storage
        .attributes
        .list(
            &cluster.arn,
            req.target_type.as_deref(),
            req.attribute_name.as_deref(),
            limit,
            offset,
        )
        .await?;
    let next_token = pagination::next_token(offset, rows.len(), limit);
    Ok(ListAttributesResponse {
        attributes: rows
            .into_iter()
            .map(|row| Attribute {
                name: row.name,
                value: row.value,
                target_type: Some(row.target_type),
                target_id: Some(row.target_id),
            })
            .collect(),
        next_token,
    })
}

#[derive(Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct AccountSetting {
    pub name: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal_arn: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PutAccountSettingRequest {
    pub name: Option<String>,
    pub value: Option<String>,
    pub principal_arn: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PutAccountSettingResponse {
    pub setting: AccountSetting,
}

fn validate_setting(req: &PutAccountSettingRequest) -> Result<(String, String)> {
    let name = req
        .name
        .as_deref()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ApiError::InvalidParameter("name must not be empty".to_string()))?;
    let value = req
        .value
        .as_deref()
        .ok_or_else(|| ApiError::InvalidParameter("value must not be empty".to_string()))?;
    if !matches!(value, "enabled" | "disabled") {
        return Err(ApiError::InvalidParameter(format!(
            "value must be enabled or disabled, got {value}"
        )));
    }
    Ok((name.to_string(), value.to_string()))
}

pub async fn put_account_setting(
    state: AppState,
    req: PutAccountSettingRequest,
) -> Result<PutAccountSettingResponse> {
    let (name, value) = validate_setting(&req)?;
    let principal = req
        .principal_arn
        .clone()
        .unwrap_or_else(|| "default".to_string());
    state
        .storage
        .account_settings
        .put(&AccountSettingRow {
            principal_arn: principal.clone(),
            name: name.clone(),
            value: value.clone(),
        })
        .await?;
    Ok(PutAccountSettingResponse {
        setting: AccountSetting {
            name,
            value,
            principal_arn: Some(principal),
        },
    })
}

pub async fn put_account_setting_default(
    state: AppState,
    req: PutAccountSettingRequest,
) -> Result<PutAccountSettingResponse> {
    let (name, value) = validate_setting(&req)?;
    state
        .storage
        .account_settings
        .put(&AccountSettingRow {
            principal_arn: "default".to_string(),
            name: name.clone(),
            value: value.clone(),
        })
        .await?;
    Ok(PutAccountSettingResponse {
        setting: AccountSetting {
            name,
            value,
            principal_arn: Some("default".to_string()),
        },
    })
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListAccountSettingsRequest {
    pub name: Option<String>,
    pub principal_arn: Option<String>,
    pub max_results: Option<i64>,
    pub next_token: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListAccountSettingsResponse {
    pub settings: Vec<AccountSetting>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

pub async fn list_account_settings(
    state: AppState,
    req: ListAccountSettingsRequest,
) -> Result<ListAccountSettingsResponse> {
    let limit = pagination::page_size(req.max_results)?;
    let offset = pagination::offset(req.next_token.as_deref())?;
    let rows = state
        .storage
        .account_settings
        .list(
            req.principal_arn.as_deref(),
            req.name.as_deref(),
            limit,
            offset,
        )
        .await?;
    let next_token = pagination::next_token(offset, rows.len(), limit);
    Ok(ListAccountSettingsResponse {
        settings: rows
            .into_iter()
            .map(|row| AccountSetting {
                name: row.name,
                value: row.value,
                principal_arn: Some(row.principal_arn),
            })
            .collect(),
        next_token,
    })
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DeleteAccountSettingRequest {
    pub name: Option<String>,
    pub principal_arn: Option<String>,
}

pub async fn delete_account_setting(
    state: AppState,
    req: DeleteAccountSettingRequest,
) -> Result<PutAccountSettingResponse> {
    let name = req
        .name
        .as_deref()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ApiError::InvalidParameter("name must not be empty".to_string()))?;
    let principal = req
        .principal_arn
        .clone()
        .unwrap_or_else(|| "default".to_string());
    let existing = state
        .storage
        .account_settings
        .get(&principal, name)
        .await?
        .ok_or_else(|| ApiError::Client(format!("account setting {name} was not found")))?;
    state.storage.account_settings.delete(&principal, name).await?;
    Ok(PutAccountSettingResponse {
        setting: AccountSetting {
            name: existing.name,
            value: existing.value,
            principal_arn: Some(existing.principal_arn),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(key: &str, value: &str) -> Tag {
        Tag {
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    #[test]
    fn merge_tags_by_key() {
        let merged = merge_tags(
            vec![tag("env", "dev"), tag("team", "core")],
            vec![tag("env", "prod"), tag("owner", "ops")],
        );
        assert_eq!(merged.len(), 3);
        assert_eq!(
            merged.iter().find(|t| t.key == "env").unwrap().value,
            "prod"
        );
        assert!(merged.iter().any(|t| t.key == "owner"));
    }
}
