//! AWS-JSON 1.1 front-end: a single `POST /` demultiplexed on the
//! `X-Amz-Target` header.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::AppState;
use crate::error::{ApiError, Result};
use crate::{clusters, services, settings, task_definitions, task_sets, tasks};

const TARGET_PREFIX: &str = "AmazonEC2ContainerServiceV20141113.";

/// Every action the dispatch table serves, used by tests and the admin
/// introspection endpoint.
pub const SUPPORTED_ACTIONS: &[&str] = &[
    "CreateCluster",
    "DescribeClusters",
    "ListClusters",
    "DeleteCluster",
    "UpdateCluster",
    "UpdateClusterSettings",
    "PutClusterCapacityProviders",
    "RegisterTaskDefinition",
    "DescribeTaskDefinition",
    "DeregisterTaskDefinition",
    "ListTaskDefinitions",
    "ListTaskDefinitionFamilies",
    "CreateService",
    "UpdateService",
    "DescribeServices",
    "DeleteService",
    "ListServices",
    "RunTask",
    "StartTask",
    "StopTask",
    "DescribeTasks",
    "ListTasks",
    "UpdateContainerInstancesState",
    "CreateTaskSet",
    "UpdateTaskSet",
    "DeleteTaskSet",
    "DescribeTaskSets",
    "UpdateServicePrimaryTaskSet",
    "TagResource",
    "UntagResource",
    "ListTagsForResource",
    "PutAttributes",
    "DeleteAttributes",
    "ListAttributes",
    "PutAccountSetting",
    "PutAccountSettingDefault",
    "ListAccountSettings",
    "DeleteAccountSetting",
];

pub fn router(state: AppState) -> Router {
    Router::new().route("/", post(handle)).with_state(state)
}

async fn handle(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let action = match headers
        .get("x-amz-target")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
    {
        Some(target) => match target.strip_prefix(TARGET_PREFIX) {
            Some(action) => action.to_string(),
            None => return ApiError::InvalidAction(target).into_response(),
        },
        None => return ApiError::MissingAction.into_response(),
    };

    metrics::counter!("kecs_api_requests_total", "action" => action.clone()).increment(1);
    match dispatch(&action, state, body).await {
        Ok(response) => response,
        Err(e) => {
            metrics::counter!("kecs_api_errors_total", "action" => action, "code" => e.code())
                .increment(1);
            e.into_response()
        }
    }
}

/// Decodes the request, runs the handler, encodes the response.
async fn run<Req, Fut, Resp>(
    state: AppState,
    body: Bytes,
    handler: impl FnOnce(AppState, Req) -> Fut,
) -> Result<Response>
where
    Req: DeserializeOwned + Default,
    Fut: Future<Output = Result<Resp>>,
    Resp: Serialize,
{
    let request: Req = if body.is_empty() {
        Req::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::Client(format!("invalid request payload: {e}")))?
    };
    let response = handler(state, request).await?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/x-amz-json-1.1")],
        Json(response),
    )
        .into_response())
}

async fn dispatch(action: &str, state: AppState, body: Bytes) -> Result<Response> {
    match action {
        "CreateCluster" => run(state, body, clusters::create_cluster).await,
        "DescribeClusters" => run(state, body, clusters::describe_clusters).await,
        "ListClusters" => run(state, body, clusters::list_clusters).await,
        "DeleteCluster" => run(state, body, clusters::delete_cluster).await,
        "UpdateCluster" => run(state, body, clusters::update_cluster).await,
        "UpdateClusterSettings" => run(state, body, clusters::update_cluster_settings).await,
        "PutClusterCapacityProviders" => {
            run(state, body, clusters::put_cluster_capacity_providers).await
        }
        "RegisterTaskDefinition" => {
            run(state, body, task_definitions::register_task_definition).await
        }
        "DescribeTaskDefinition" => {
            run(state, body, task_definitions::describe_task_definition).await
        }
        "DeregisterTaskDefinition" => {
            run(state, body, task_definitions::deregister_task_definition).await
        }
        "ListTaskDefinitions" => run(state, body, task_definitions::list_task_definitions).await,
        "ListTaskDefinitionFamilies" => {
            run(state, body, task_definitions::list_task_definition_families).await
        }
        "CreateService" => run(state, body, services::create_service).await,
        "UpdateService" => run(state, body, services::update_service).await,
        "DescribeServices" => run(state, body, services::describe_services).await,
        "DeleteService" => run(state, body, services::delete_service).await,
        "ListServices" => run(state, body, services::list_services).await,
        "RunTask" => run(state, body, tasks::run_task).await,
        "StartTask" => run(state, body, tasks::start_task).await,
        "StopTask" => run(state, body, tasks::stop_task).await,
        "DescribeTasks" => run(state, body, tasks::describe_tasks).await,
        "ListTasks" => run(state, body, tasks::list_tasks).await,
        "UpdateContainerInstancesState" => {
            run(state, body, tasks::update_container_instances_state).await
        }
        "CreateTaskSet" => run(state, body, task_sets::create_task_set).await,
        "UpdateTaskSet" => run(state, body, task_sets::update_task_set).await,
        "DeleteTaskSet" => run(state, body, task_sets::delete_task_set).await,
        "DescribeTaskSets" => run(state, body, task_sets::describe_task_sets).await,
        "UpdateServicePrimaryTaskSet" => {
            run(state, body, task_sets::update_service_primary_task_set).await
        }
        "TagResource" => run(state, body, settings::tag_resource).await,
        "UntagResource" => run(state, body, settings::untag_resource).await,
        "ListTagsForResource" => run(state, body, settings::list_tags_for_resource).await,
        "PutAttributes" => run(state, body, settings::put_attributes).await,
        "DeleteAttributes" => run(state, body, settings::delete_attributes).await,
        "ListAttributes" => run(state, body, settings::list_attributes).await,
        "PutAccountSetting" => run(state, body, settings::put_account_setting).await,
        "PutAccountSettingDefault" => {
            run(state, body, settings::put_account_setting_default).await
        }
        "ListAccountSettings" => run(state, body, settings::list_account_settings).await,
        "DeleteAccountSetting" => run(state, body, settings::delete_account_setting).await,
        other => Err(ApiError::InvalidAction(other.to_string())),
    }
}
