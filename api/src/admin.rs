//! Admin surface on the secondary port: health probes, metrics, and the
//! read-only introspection endpoints the TUI/dashboard consume.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};

use crate::AppState;
use crate::error::ApiError;
use crate::view;

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    Router::new()
        .route("/health", get(health))
        .route("/health/detailed", get(health_detailed))
        .route("/metrics", get(metrics))
        .route("/api/instances", get(list_instances))
        .route("/api/instances/{cluster}/services", get(list_instance_services))
        .route("/api/instances/{cluster}/tasks", get(list_instance_tasks))
        .layer(cors)
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    match state.storage.ping().await {
        Ok(()) => (StatusCode::OK, "OK"),
        Err(e) => {
            tracing::error!(error = %e, "health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "state store unreachable")
        }
    }
}

async fn health_detailed(State(state): State<AppState>) -> impl IntoResponse {
    let storage_ok = state.storage.ping().await.is_ok();
    let kubernetes = match &state.kube {
        Some(client) => match client.apiserver_version().await {
            Ok(version) => json!({
                "status": "ok",
                "version": format!("{}.{}", version.major, version.minor),
            }),
            Err(e) => json!({"status": "unreachable", "error": e.to_string()}),
        },
        None => json!({"status": "disabled"}),
    };
    // The reconciler is considered live if it ticked within two intervals.
    let reconciler_ok = state
        .operator_health
        .ticked_within(state.reconcile_interval * 2);

    let healthy = storage_ok && reconciler_ok;
    let body = json!({
        "status": if healthy { "ok" } else { "degraded" },
        "components": {
            "storage": {"status": if storage_ok { "ok" } else { "unreachable" }},
            "kubernetes": kubernetes,
            "reconciler": {
                "status": if reconciler_ok { "ok" } else { "stalled" },
                "lastTickMs": state.operator_health.last_tick_ms(),
            },
        },
    });
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body))
}

async fn metrics() -> impl IntoResponse {
    kecs_common::metrics::render()
}

async fn list_instances(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let clusters = state.storage.clusters.list(1000, 0).await?;
    Ok(Json(json!({
        "clusters": clusters.iter().map(view::cluster).collect::<Vec<_>>(),
    })))
}

async fn list_instance_services(
    State(state): State<AppState>,
    Path(cluster): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let cluster = crate::clusters::resolve_cluster(&state, Some(&cluster)).await?;
    let services = state
        .storage
        .services
        .list(&cluster.arn, &Default::default(), 1000, 0)
        .await?;
    Ok(Json(json!({
        "services": services.iter().map(view::service).collect::<Vec<_>>(),
    })))
}

async fn list_instance_tasks(
    State(state): State<AppState>,
    Path(cluster): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let cluster = crate::clusters::resolve_cluster(&state, Some(&cluster)).await?;
    let tasks = state
        .storage
        .tasks
        .list(&cluster.arn, &Default::default(), 1000, 0)
        .await?;
    Ok(Json(json!({
        "tasks": tasks.iter().map(view::task).collect::<Vec<_>>(),
    })))
}
