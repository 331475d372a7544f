use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use crate::{AppState, SUPPORTED_ACTIONS, router};
use kecs_operator::OperatorHealth;

async fn test_router() -> Router {
    let storage = kecs_storage::connect(":memory:").await.expect("open store");
    let (intents, _rx) = kecs_operator::channel(256);
    let state = AppState::new(
        storage,
        intents,
        None,
        OperatorHealth::new(),
        Duration::from_secs(5),
        "us-east-1",
        "000000000000",
    );
    router(state)
}

async fn call(app: &Router, action: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri("/")
        .header("content-type", "application/x-amz-json-1.1")
        .header(
            "x-amz-target",
            format!("AmazonEC2ContainerServiceV20141113.{action}"),
        )
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value: Value = if bytes.is_empty() {
        json!({})
    } else {
        serde_json::from_slice(&bytes).unwrap_or(json!({"raw": String::from_utf8_lossy(&bytes)}))
    };
    (status, value)
}

fn nginx_task_definition(image: &str) -> Value {
    json!({
        "family": "nginx",
        "containerDefinitions": [{
            "name": "nginx",
            "image": image,
            "memory": 256,
            "essential": true
        }],
        "requiresCompatibilities": ["EC2"]
    })
}

#[tokio::test]
async fn create_cluster_and_register_first_revision() {
    let app = test_router().await;

    let (status, body) = call(&app, "CreateCluster", json!({"clusterName": "c1"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cluster"]["clusterName"], "c1");
    assert_eq!(body["cluster"]["status"], "ACTIVE");
    assert_eq!(
        body["cluster"]["clusterArn"],
        "arn:aws:ecs:us-east-1:000000000000:cluster/c1"
    );

    let (status, body) = call(
        &app,
        "RegisterTaskDefinition",
        nginx_task_definition("nginx:alpine"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let def = &body["taskDefinition"];
    assert_eq!(def["family"], "nginx");
    assert_eq!(def["revision"], 1);
    assert_eq!(def["status"], "ACTIVE");
    assert_eq!(
        def["taskDefinitionArn"],
        "arn:aws:ecs:us-east-1:000000000000:task-definition/nginx:1"
    );
    // Registration-time defaulting.
    assert_eq!(def["containerDefinitions"][0]["cpu"], 0);
    assert_eq!(def["containerDefinitions"][0]["essential"], true);
}

#[tokio::test]
async fn register_validation_errors_name_the_field() {
    let app = test_router().await;

    let (status, body) = call(
        &app,
        "RegisterTaskDefinition",
        json!({"containerDefinitions": [{"name": "a", "image": "b"}]}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["__type"], "InvalidParameterException");
    assert!(body["message"].as_str().unwrap().contains("family"));

    let (status, body) = call(&app, "RegisterTaskDefinition", json!({"family": "web"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["__type"], "InvalidParameterException");
    assert!(
        body["message"]
            .as_str()
            .unwrap()
            .contains("containerDefinitions")
    );
}

#[tokio::test]
async fn revisions_are_monotonic_and_describable_by_qualifier() {
    let app = test_router().await;
    for image in ["nginx:1.21", "nginx:1.22", "nginx:1.23"] {
        let (status, _) = call(&app, "RegisterTaskDefinition", nginx_task_definition(image)).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = call(
        &app,
        "DescribeTaskDefinition",
        json!({"taskDefinition": "nginx:2"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["taskDefinition"]["revision"], 2);
    assert_eq!(
        body["taskDefinition"]["containerDefinitions"][0]["image"],
        "nginx:1.22"
    );

    // Bare family resolves to the newest ACTIVE revision.
    let (_, body) = call(
        &app,
        "DescribeTaskDefinition",
        json!({"taskDefinition": "nginx"}),
    )
    .await;
    assert_eq!(body["taskDefinition"]["revision"], 3);

    let (status, body) = call(
        &app,
        "DescribeTaskDefinition",
        json!({"taskDefinition": "nginx:9"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["__type"], "TaskDefinitionNotFoundException");
}

#[tokio::test]
async fn create_cluster_is_idempotent() {
    let app = test_router().await;
    let (_, first) = call(&app, "CreateCluster", json!({"clusterName": "c1"})).await;
    let (status, second) = call(&app, "CreateCluster", json!({"clusterName": "c1"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["cluster"]["clusterArn"], second["cluster"]["clusterArn"]);
}

#[tokio::test]
async fn describe_clusters_reports_missing_in_failures() {
    let app = test_router().await;
    call(&app, "CreateCluster", json!({"clusterName": "c1"})).await;

    let (status, body) = call(
        &app,
        "DescribeClusters",
        json!({"clusters": ["c1", "ghost"]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["clusters"].as_array().unwrap().len(), 1);
    let failures = body["failures"].as_array().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0]["reason"], "MISSING");
    assert!(failures[0]["arn"].as_str().unwrap().ends_with("cluster/ghost"));
}

#[tokio::test]
async fn service_lifecycle() {
    let app = test_router().await;
    call(&app, "CreateCluster", json!({"clusterName": "c1"})).await;
    call(&app, "RegisterTaskDefinition", nginx_task_definition("nginx:alpine")).await;

    let (status, body) = call(
        &app,
        "CreateService",
        json!({
            "cluster": "c1",
            "serviceName": "web",
            "taskDefinition": "nginx:1",
            "desiredCount": 2
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"]["serviceName"], "web");
    assert_eq!(body["service"]["desiredCount"], 2);
    assert_eq!(body["service"]["status"], "ACTIVE");

    // Duplicate creation is not idempotent.
    let (status, body) = call(
        &app,
        "CreateService",
        json!({
            "cluster": "c1",
            "serviceName": "web",
            "taskDefinition": "nginx:1"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["__type"], "InvalidParameterException");

    let (_, body) = call(
        &app,
        "DescribeServices",
        json!({"cluster": "c1", "services": ["web", "ghost"]}),
    )
    .await;
    assert_eq!(body["services"][0]["serviceName"], "web");
    assert_eq!(body["services"][0]["deployments"][0]["status"], "PRIMARY");
    assert_eq!(body["failures"][0]["reason"], "MISSING");

    // Deleting with a non-zero desired count requires force.
    let (status, body) = call(
        &app,
        "DeleteService",
        json!({"cluster": "c1", "service": "web"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["__type"], "InvalidParameterException");

    let (status, body) = call(
        &app,
        "UpdateService",
        json!({"cluster": "c1", "service": "web", "desiredCount": 0}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"]["desiredCount"], 0);

    let (status, body) = call(
        &app,
        "DeleteService",
        json!({"cluster": "c1", "service": "web"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"]["status"], "DRAINING");
}

#[tokio::test]
async fn update_service_requires_active_cluster_and_service() {
    let app = test_router().await;
    let (status, body) = call(
        &app,
        "UpdateService",
        json!({"cluster": "nope", "service": "web"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["__type"], "ClusterNotFoundException");

    call(&app, "CreateCluster", json!({"clusterName": "c1"})).await;
    let (status, body) = call(
        &app,
        "UpdateService",
        json!({"cluster": "c1", "service": "web"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["__type"], "ServiceNotFoundException");
}

#[tokio::test]
async fn run_and_stop_tasks() {
    let app = test_router().await;
    call(&app, "CreateCluster", json!({"clusterName": "c1"})).await;
    call(&app, "RegisterTaskDefinition", nginx_task_definition("nginx:alpine")).await;

    let (status, body) = call(
        &app,
        "RunTask",
        json!({"cluster": "c1", "taskDefinition": "nginx", "count": 2}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let tasks = body["tasks"].as_array().unwrap();
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0]["lastStatus"], "PROVISIONING");
    assert_eq!(tasks[0]["desiredStatus"], "RUNNING");
    let task_arn = tasks[0]["taskArn"].as_str().unwrap().to_string();

    let (_, body) = call(&app, "ListTasks", json!({"cluster": "c1"})).await;
    assert_eq!(body["taskArns"].as_array().unwrap().len(), 2);

    let (status, body) = call(
        &app,
        "StopTask",
        json!({"cluster": "c1", "task": task_arn, "reason": "testing"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["task"]["desiredStatus"], "STOPPED");
    assert_eq!(body["task"]["stopCode"], "UserInitiated");
    assert_eq!(body["task"]["stoppedReason"], "testing");

    let (status, body) = call(
        &app,
        "RunTask",
        json!({"cluster": "c1", "taskDefinition": "nginx", "count": 0}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("count"));
}

#[tokio::test]
async fn list_clusters_pagination() {
    let app = test_router().await;
    for name in ["a1", "a2", "a3"] {
        call(&app, "CreateCluster", json!({"clusterName": name})).await;
    }

    let (_, body) = call(&app, "ListClusters", json!({"maxResults": 2})).await;
    assert_eq!(body["clusterArns"].as_array().unwrap().len(), 2);
    let token = body["nextToken"].as_str().unwrap().to_string();

    let (_, body) = call(&app, "ListClusters", json!({"maxResults": 2, "nextToken": token})).await;
    assert_eq!(body["clusterArns"].as_array().unwrap().len(), 1);
    assert!(body.get("nextToken").is_none());

    let (status, body) = call(&app, "ListClusters", json!({"maxResults": 0})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["__type"], "InvalidParameterException");

    let (status, _) = call(&app, "ListClusters", json!({"nextToken": "bogus"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn task_set_flow_for_external_services() {
    let app = test_router().await;
    call(&app, "CreateCluster", json!({"clusterName": "c1"})).await;
    call(&app, "RegisterTaskDefinition", nginx_task_definition("nginx:alpine")).await;

    let (status, body) = call(
        &app,
        "CreateService",
        json!({
            "cluster": "c1",
            "serviceName": "blue-green",
            "deploymentController": {"type": "EXTERNAL"}
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"]["desiredCount"], 0);

    let (status, body) = call(
        &app,
        "CreateTaskSet",
        json!({
            "cluster": "c1",
            "service": "blue-green",
            "taskDefinition": "nginx:1",
            "scale": {"value": 2.0, "unit": "COUNT"}
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["taskSet"]["computedDesiredCount"], 2);
    assert_eq!(body["taskSet"]["status"], "ACTIVE");
    let ts_id = body["taskSet"]["id"].as_str().unwrap().to_string();

    let (status, body) = call(
        &app,
        "UpdateServicePrimaryTaskSet",
        json!({"cluster": "c1", "service": "blue-green", "primaryTaskSet": ts_id}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["taskSet"]["status"], "PRIMARY");
    let ts_id = body["taskSet"]["id"].as_str().unwrap().to_string();

    // A PRIMARY task set needs force.
    let (status, body) = call(
        &app,
        "DeleteTaskSet",
        json!({"cluster": "c1", "service": "blue-green", "taskSet": ts_id}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["__type"], "InvalidParameterException");

    let (status, body) = call(
        &app,
        "DeleteTaskSet",
        json!({"cluster": "c1", "service": "blue-green", "taskSet": ts_id, "force": true}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["taskSet"]["status"], "DRAINING");

    // Task sets are rejected for ECS-controller services.
    call(
        &app,
        "CreateService",
        json!({"cluster": "c1", "serviceName": "plain", "taskDefinition": "nginx:1"}),
    )
    .await;
    let (status, _) = call(
        &app,
        "CreateTaskSet",
        json!({"cluster": "c1", "service": "plain", "taskDefinition": "nginx:1"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn tagging_round_trip() {
    let app = test_router().await;
    let (_, body) = call(&app, "CreateCluster", json!({"clusterName": "c1"})).await;
    let arn = body["cluster"]["clusterArn"].as_str().unwrap().to_string();

    let (status, _) = call(
        &app,
        "TagResource",
        json!({"resourceArn": arn, "tags": [{"key": "env", "value": "dev"}]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    call(
        &app,
        "TagResource",
        json!({"resourceArn": arn, "tags": [
            {"key": "env", "value": "prod"},
            {"key": "team", "value": "core"}
        ]}),
    )
    .await;

    let (_, body) = call(&app, "ListTagsForResource", json!({"resourceArn": arn})).await;
    let tags = body["tags"].as_array().unwrap();
    assert_eq!(tags.len(), 2);
    assert!(tags.iter().any(|t| t["key"] == "env" && t["value"] == "prod"));

    call(
        &app,
        "UntagResource",
        json!({"resourceArn": arn, "tagKeys": ["env"]}),
    )
    .await;
    let (_, body) = call(&app, "ListTagsForResource", json!({"resourceArn": arn})).await;
    assert_eq!(body["tags"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn account_settings_round_trip() {
    let app = test_router().await;
    let (status, body) = call(
        &app,
        "PutAccountSetting",
        json!({"name": "containerInsights", "value": "enabled"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["setting"]["value"], "enabled");

    let (status, body) = call(
        &app,
        "PutAccountSetting",
        json!({"name": "containerInsights", "value": "sometimes"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["__type"], "InvalidParameterException");

    let (_, body) = call(&app, "ListAccountSettings", json!({})).await;
    assert_eq!(body["settings"].as_array().unwrap().len(), 1);

    let (status, _) = call(
        &app,
        "DeleteAccountSetting",
        json!({"name": "containerInsights"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = call(&app, "ListAccountSettings", json!({})).await;
    assert!(body["settings"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn delete_cluster_refuses_while_in_use() {
    let app = test_router().await;
    call(&app, "CreateCluster", json!({"clusterName": "c1"})).await;
    call(&app, "RegisterTaskDefinition", nginx_task_definition("nginx:alpine")).await;
    call(
        &app,
        "CreateService",
        json!({"cluster": "c1", "serviceName": "web", "taskDefinition": "nginx:1"}),
    )
    .await;

    let (status, body) = call(&app, "DeleteCluster", json!({"cluster": "c1"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["__type"], "ResourceInUseException");

    call(&app, "DeleteService", json!({"cluster": "c1", "service": "web"})).await;
    // The service row lives until the projector finishes draining; simulate
    // that completion not having happened yet: deletion still refused only
    // for ACTIVE services, and DRAINING does not count.
    let (status, body) = call(&app, "DeleteCluster", json!({"cluster": "c1"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cluster"]["status"], "INACTIVE");

    let (_, body) = call(&app, "DescribeClusters", json!({"clusters": ["c1"]})).await;
    assert_eq!(body["failures"][0]["reason"], "MISSING");
}

#[tokio::test]
async fn protocol_errors() {
    let app = test_router().await;

    let (status, body) = call(&app, "LaunchRocket", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["__type"], "InvalidAction");

    // Missing X-Amz-Target entirely.
    let request = Request::builder()
        .method("POST")
        .uri("/")
        .body(Body::from("{}"))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Malformed JSON body.
    let (status, body) = call(&app, "CreateCluster", json!({})).await;
    assert_eq!(status, StatusCode::OK); // empty body is fine (defaults)
    assert_eq!(body["cluster"]["clusterName"], "default");

    let request = Request::builder()
        .method("POST")
        .uri("/")
        .header(
            "x-amz-target",
            "AmazonEC2ContainerServiceV20141113.CreateCluster",
        )
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn dispatch_table_covers_every_supported_action() {
    let app = test_router().await;
    for action in SUPPORTED_ACTIONS {
        let (status, body) = call(&app, action, json!({})).await;
        // Each action must be routed: failures are allowed (missing
        // resources), but never InvalidAction.
        assert_ne!(
            body["__type"], "InvalidAction",
            "action {action} is missing from the dispatch table"
        );
        assert_ne!(status, StatusCode::INTERNAL_SERVER_ERROR, "action {action}");
    }
}
