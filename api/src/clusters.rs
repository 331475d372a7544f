use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::AppState;
use crate::arn::{short_name, validate_name};
use crate::error::{ApiError, Result};
use crate::pagination;
use crate::view;
use kecs_operator::ProjectionIntent;
use kecs_storage::ClusterRow;
use kecs_types::{
    CapacityProviderStrategyItem, Cluster, ClusterSetting, ClusterStatus, Failure, Tag,
};

/// Resolves a name-or-ARN cluster reference, defaulting to `default`.
pub(crate) async fn resolve_cluster(
    state: &AppState,
    cluster: Option<&str>,
) -> Result<ClusterRow> {
    let name = short_name(cluster.unwrap_or("default"));
    state
        .storage
        .clusters
        .get_by_name(name)
        .await?
        .ok_or(ApiError::ClusterNotFound)
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateClusterRequest {
    pub cluster_name: Option<String>,
    #[serde(default)]
    pub settings: Vec<ClusterSetting>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub capacity_providers: Vec<String>,
    #[serde(default)]
    pub default_capacity_provider_strategy: Vec<CapacityProviderStrategyItem>,
    pub configuration: Option<serde_json::Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterResponse {
    pub cluster: Cluster,
}

pub async fn create_cluster(state: AppState, req: CreateClusterRequest) -> Result<ClusterResponse> {
    let name = req.cluster_name.as_deref().unwrap_or("default");
    validate_name("clusterName", name)?;

    // Repeated CreateCluster with the same name returns the existing
    // cluster instead of an error.
    if let Some(existing) = state.storage.clusters.get_by_name(name).await? {
        return Ok(ClusterResponse {
            cluster: view::cluster(&existing),
        });
    }

    let mut row = ClusterRow::new(
        state.arns.cluster(name),
        name.to_string(),
        state.region().to_string(),
        state.account_id().to_string(),
    );
    row.settings = json!(req.settings);
    row.tags = json!(req.tags);
    row.capacity_providers = json!(req.capacity_providers);
    row.default_capacity_provider_strategy = json!(req.default_capacity_provider_strategy);
    row.configuration = req.configuration;

    match state.storage.clusters.create(&row).await {
        Ok(()) => {}
        // Lost a race with a concurrent create of the same name.
        Err(kecs_storage::StorageError::AlreadyExists { .. }) => {
            if let Some(existing) = state.storage.clusters.get_by_name(name).await? {
                return Ok(ClusterResponse {
                    cluster: view::cluster(&existing),
                });
            }
        }
        Err(e) => return Err(e.into()),
    }
    tracing::info!(cluster = %name, "created cluster");
    Ok(ClusterResponse {
        cluster: view::cluster(&row),
    })
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DescribeClustersRequest {
    #[serde(default)]
    pub clusters: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeClustersResponse {
    pub clusters: Vec<Cluster>,
    pub failures: Vec<Failure>,
}

pub async fn describe_clusters(
    state: AppState,
    req: DescribeClustersRequest,
) -> Result<DescribeClustersResponse> {
    let refs = if req.clusters.is_empty() {
        vec!["default".to_string()]
    } else {
        req.clusters
    };
    let mut clusters = Vec::new();
    let mut failures = Vec::new();
    for reference in refs {
        let name = short_name(&reference);
        match state.storage.clusters.get_by_name(name).await? {
            Some(row) => clusters.push(view::cluster(&row)),
            None => failures.push(Failure::missing(state.arns.cluster(name))),
        }
    }
    Ok(DescribeClustersResponse { clusters, failures })
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListClustersRequest {
    pub max_results: Option<i64>,
    pub next_token: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListClustersResponse {
    pub cluster_arns: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

pub async fn list_clusters(
    state: AppState,
    req: ListClustersRequest,
) -> Result<ListClustersResponse> {
    let limit = pagination::page_size(req.max_results)?;
    let offset = pagination::offset(req.next_token.as_deref())?;
    let rows = state.storage.clusters.list(limit, offset).await?;
    let next_token = pagination::next_token(offset, rows.len(), limit);
    Ok(ListClustersResponse {
        cluster_arns: rows.into_iter().map(|r| r.arn).collect(),
        next_token,
    })
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DeleteClusterRequest {
    pub cluster: Option<String>,
}

pub async fn delete_cluster(state: AppState, req: DeleteClusterRequest) -> Result<ClusterResponse> {
    let mut row = resolve_cluster(&state, req.cluster.as_deref()).await?;

    let active_services = state
        .storage
        .services
        .count_active_by_cluster(&row.arn)
        .await?;
    if active_services > 0 {
        return Err(ApiError::ResourceInUse(format!(
            "cluster {} still has {active_services} active services",
            row.name
        )));
    }
    let unstopped = state.storage.tasks.list_unstopped(Some(&row.arn)).await?;
    if !unstopped.is_empty() {
        return Err(ApiError::ResourceInUse(format!(
            "cluster {} still has {} tasks that are not stopped",
            row.name,
            unstopped.len()
        )));
    }

    row.status = ClusterStatus::Inactive;
    state.storage.clusters.delete(&row.arn).await?;
    state.intents.send(ProjectionIntent::DeleteClusterNamespace {
        namespace: kecs_operator::labels::cluster_namespace(&row.name, &row.region),
    });
    tracing::info!(cluster = %row.name, "deleted cluster");
    Ok(ClusterResponse {
        cluster: view::cluster(&row),
    })
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateClusterRequest {
    pub cluster: Option<String>,
    pub settings: Option<Vec<ClusterSetting>>,
    pub configuration: Option<serde_json::Value>,
}

pub async fn update_cluster(state: AppState, req: UpdateClusterRequest) -> Result<ClusterResponse> {
    let mut row = resolve_cluster(&state, req.cluster.as_deref()).await?;
    if let Some(settings) = req.settings {
        row.settings = json!(settings);
    }
    if let Some(configuration) = req.configuration {
        row.configuration = Some(configuration);
    }
    state.storage.clusters.update(&row).await?;
    Ok(ClusterResponse {
        cluster: view::cluster(&row),
    })
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateClusterSettingsRequest {
    pub cluster: Option<String>,
    #[serde(default)]
    pub settings: Vec<ClusterSetting>,
}

pub async fn update_cluster_settings(
    state: AppState,
    req: UpdateClusterSettingsRequest,
) -> Result<ClusterResponse> {
    let mut row = resolve_cluster(&state, req.cluster.as_deref()).await?;
    row.settings = json!(req.settings);
    state.storage.clusters.update(&row).await?;
    Ok(ClusterResponse {
        cluster: view::cluster(&row),
    })
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PutClusterCapacityProvidersRequest {
    pub cluster: Option<String>,
    #[serde(default)]
    pub capacity_providers: Vec<String>,
    #[serde(default)]
    pub default_capacity_provider_strategy: Vec<CapacityProviderStrategyItem>,
}

pub async fn put_cluster_capacity_providers(
    state: AppState,
    req: PutClusterCapacityProvidersRequest,
) -> Result<ClusterResponse> {
    for item in &req.default_capacity_provider_strategy {
        if !req.capacity_providers.contains(&item.capacity_provider) {
            return Err(ApiError::InvalidParameter(format!(
                "defaultCapacityProviderStrategy references unknown capacity provider {}",
                item.capacity_provider
            )));
        }
    }
    let mut row = resolve_cluster(&state, req.cluster.as_deref()).await?;
    row.capacity_providers = json!(req.capacity_providers);
    row.default_capacity_provider_strategy = json!(req.default_capacity_provider_strategy);
    state.storage.clusters.update(&row).await?;
    Ok(ClusterResponse {
        cluster: view::cluster(&row),
    })
}
