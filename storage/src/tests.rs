use serde_json::json;

use super::*;
use kecs_types::{
    ClusterStatus, DeploymentControllerType, HealthStatus, LaunchType, SchedulingStrategy,
    ServiceStatus, TaskDefinitionStatus, TaskStatus,
};

async fn store() -> Storage {
    connect(":memory:").await.expect("open in-memory store")
}

fn cluster(name: &str) -> ClusterRow {
    ClusterRow::new(
        format!("arn:aws:ecs:us-east-1:000000000000:cluster/{name}"),
        name.to_string(),
        "us-east-1".to_string(),
        "000000000000".to_string(),
    )
}

fn task_definition(family: &str) -> TaskDefinitionRow {
    TaskDefinitionRow {
        arn: String::new(),
        family: family.to_string(),
        revision: 0,
        status: TaskDefinitionStatus::Active,
        region: "us-east-1".to_string(),
        account_id: "000000000000".to_string(),
        container_definitions: json!([{"name": "web", "image": "nginx:alpine"}]),
        volumes: json!([]),
        network_mode: None,
        requires_compatibilities: json!(["EC2"]),
        cpu: None,
        memory: None,
        task_role_arn: None,
        execution_role_arn: None,
        placement_constraints: json!([]),
        tags: json!([]),
        created_at: now_ms(),
        deregistered_at: None,
    }
}

fn service(cluster_arn: &str, name: &str) -> ServiceRow {
    let now = now_ms();
    ServiceRow {
        arn: format!("arn:aws:ecs:us-east-1:000000000000:service/default/{name}"),
        name: name.to_string(),
        cluster_arn: cluster_arn.to_string(),
        task_definition_arn: "arn:aws:ecs:us-east-1:000000000000:task-definition/web:1".into(),
        desired_count: 1,
        running_count: 0,
        pending_count: 0,
        status: ServiceStatus::Active,
        launch_type: LaunchType::Ec2,
        scheduling_strategy: SchedulingStrategy::Replica,
        deployment_controller_type: DeploymentControllerType::Ecs,
        load_balancers: json!([]),
        service_registries: json!([]),
        network_configuration: None,
        deployment_configuration: None,
        placement_constraints: json!([]),
        placement_strategy: json!([]),
        tags: json!([]),
        enable_ecs_managed_tags: false,
        propagate_tags: None,
        enable_execute_command: false,
        primary_task_set_id: None,
        deployment_name: name.to_string(),
        namespace: "default-us-east-1".to_string(),
        region: "us-east-1".to_string(),
        account_id: "000000000000".to_string(),
        created_at: now,
        updated_at: now,
    }
}

fn task(cluster_arn: &str, id: &str) -> TaskRow {
    let now = now_ms();
    TaskRow {
        arn: format!("arn:aws:ecs:us-east-1:000000000000:task/default/{id}"),
        id: id.to_string(),
        cluster_arn: cluster_arn.to_string(),
        task_definition_arn: "arn:aws:ecs:us-east-1:000000000000:task-definition/web:1".into(),
        container_instance_arn: None,
        overrides: None,
        last_status: TaskStatus::Provisioning,
        desired_status: TaskStatus::Running,
        cpu: None,
        memory: None,
        containers: json!([]),
        version: 1,
        stop_code: None,
        stopped_reason: None,
        started_by: None,
        group_name: None,
        launch_type: LaunchType::Ec2,
        health_status: HealthStatus::Unknown,
        attributes: json!([]),
        attachments: json!([]),
        capacity_provider_name: None,
        tags: json!([]),
        pod_name: None,
        pod_namespace: None,
        region: "us-east-1".to_string(),
        account_id: "000000000000".to_string(),
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

#[tokio::test]
async fn cluster_create_get_delete() {
    let s = store().await;
    s.clusters.create(&cluster("c1")).await.unwrap();

    let got = s.clusters.get_by_name("c1").await.unwrap().unwrap();
    assert_eq!(got.status, ClusterStatus::Active);
    assert_eq!(got.arn, "arn:aws:ecs:us-east-1:000000000000:cluster/c1");

    let by_arn = s.clusters.get_by_arn(&got.arn).await.unwrap();
    assert!(by_arn.is_some());

    assert!(s.clusters.delete(&got.arn).await.unwrap());
    assert!(s.clusters.get_by_name("c1").await.unwrap().is_none());
    assert!(!s.clusters.delete(&got.arn).await.unwrap());
}

#[tokio::test]
async fn duplicate_cluster_name_is_already_exists() {
    let s = store().await;
    s.clusters.create(&cluster("c1")).await.unwrap();
    let err = s.clusters.create(&cluster("c1")).await.unwrap_err();
    assert!(matches!(err, StorageError::AlreadyExists { kind: "cluster", .. }));
}

#[tokio::test]
async fn revisions_are_allocated_monotonically() {
    let s = store().await;
    let first = s.task_definitions.register(task_definition("web")).await.unwrap();
    let second = s.task_definitions.register(task_definition("web")).await.unwrap();
    let other = s.task_definitions.register(task_definition("api")).await.unwrap();

    assert_eq!(first.revision, 1);
    assert_eq!(second.revision, 2);
    assert_eq!(other.revision, 1);
    assert!(first.arn.ends_with("task-definition/web:1"));
    assert!(second.arn.ends_with("task-definition/web:2"));

    let latest = s
        .task_definitions
        .latest_revision("web", true)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.revision, 2);
}

#[tokio::test]
async fn deregistered_revisions_remain_describable() {
    let s = store().await;
    let def = s.task_definitions.register(task_definition("web")).await.unwrap();
    s.task_definitions.register(task_definition("web")).await.unwrap();

    let gone = s.task_definitions.deregister(&def.arn).await.unwrap().unwrap();
    assert_eq!(gone.status, TaskDefinitionStatus::Inactive);
    assert!(gone.deregistered_at.is_some());

    // Row is still there and the next registration does not reuse revision 1.
    let still = s.task_definitions.get("web", 1).await.unwrap().unwrap();
    assert_eq!(still.status, TaskDefinitionStatus::Inactive);
    let third = s.task_definitions.register(task_definition("web")).await.unwrap();
    assert_eq!(third.revision, 3);

    // ACTIVE-only latest skips the deregistered head revision.
    let latest = s
        .task_definitions
        .latest_revision("web", true)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.revision, 3);
}

#[tokio::test]
async fn family_listing_honors_status_filter() {
    let s = store().await;
    let a = s.task_definitions.register(task_definition("alpha")).await.unwrap();
    s.task_definitions.register(task_definition("beta")).await.unwrap();
    s.task_definitions.deregister(&a.arn).await.unwrap();

    let filter = TaskDefinitionFilter::default();
    let active = s.task_definitions.list_families(&filter, 100, 0).await.unwrap();
    assert_eq!(active, vec!["beta".to_string()]);

    let inactive = s
        .task_definitions
        .list_families(
            &TaskDefinitionFilter {
                status: Some("INACTIVE".into()),
                ..Default::default()
            },
            100,
            0,
        )
        .await
        .unwrap();
    assert_eq!(inactive, vec!["alpha".to_string()]);

    let all = s
        .task_definitions
        .list_families(
            &TaskDefinitionFilter {
                status: Some("ALL".into()),
                ..Default::default()
            },
            100,
            0,
        )
        .await
        .unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn service_name_unique_per_cluster() {
    let s = store().await;
    let c1 = cluster("c1");
    let c2 = cluster("c2");
    s.clusters.create(&c1).await.unwrap();
    s.clusters.create(&c2).await.unwrap();

    s.services.create(&service(&c1.arn, "web")).await.unwrap();
    let err = s.services.create(&service(&c1.arn, "web")).await.unwrap_err();
    assert!(matches!(err, StorageError::AlreadyExists { kind: "service", .. }));

    // Same name in a different cluster is fine.
    let mut other = service(&c2.arn, "web");
    other.arn = "arn:aws:ecs:us-east-1:000000000000:service/c2/web".into();
    s.services.create(&other).await.unwrap();

    assert_eq!(s.services.count_active_by_cluster(&c1.arn).await.unwrap(), 1);
}

#[tokio::test]
async fn task_version_conflict_detection() {
    let s = store().await;
    let c = cluster("c1");
    s.clusters.create(&c).await.unwrap();
    s.tasks.create_batch(&[task(&c.arn, "t-1")]).await.unwrap();

    let mut fresh = s.tasks.get(&c.arn, "t-1").await.unwrap().unwrap();
    let mut stale = fresh.clone();

    fresh.last_status = TaskStatus::Pending;
    s.tasks.update_with_version(&fresh).await.unwrap();

    stale.last_status = TaskStatus::Running;
    let err = s.tasks.update_with_version(&stale).await.unwrap_err();
    assert!(matches!(err, StorageError::Conflict(_)));

    // Reload and the write goes through with the bumped version.
    let mut reloaded = s.tasks.get(&c.arn, "t-1").await.unwrap().unwrap();
    assert_eq!(reloaded.version, 2);
    assert_eq!(reloaded.last_status, TaskStatus::Pending);
    reloaded.last_status = TaskStatus::Running;
    s.tasks.update_with_version(&reloaded).await.unwrap();
}

#[tokio::test]
async fn task_lookup_by_id_or_arn() {
    let s = store().await;
    let c = cluster("c1");
    s.clusters.create(&c).await.unwrap();
    let t = task(&c.arn, "abc-123");
    s.tasks.create_batch(&[t.clone()]).await.unwrap();

    assert!(s.tasks.get(&c.arn, "abc-123").await.unwrap().is_some());
    assert!(s.tasks.get(&c.arn, &t.arn).await.unwrap().is_some());
    assert!(s.tasks.get(&c.arn, "missing").await.unwrap().is_none());
}

#[tokio::test]
async fn task_list_filters_combine_with_and() {
    let s = store().await;
    let c = cluster("c1");
    s.clusters.create(&c).await.unwrap();

    let mut svc_task = task(&c.arn, "t-svc");
    svc_task.started_by = Some("ecs-svc/web".into());
    let mut other = task(&c.arn, "t-other");
    other.started_by = Some("ecs-svc/api".into());
    s.tasks.create_batch(&[svc_task, other]).await.unwrap();

    let filter = TaskFilter {
        started_by: Some("ecs-svc/web".into()),
        desired_status: Some("RUNNING".into()),
        ..Default::default()
    };
    let rows = s.tasks.list(&c.arn, &filter, 100, 0).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, "t-svc");
}

#[tokio::test]
async fn event_buffer_is_trimmed_to_capacity() {
    let s = store().await;
    let arn = "arn:aws:ecs:us-east-1:000000000000:service/default/web";
    for i in 0..120 {
        s.service_events
            .append(&ServiceEventRow {
                id: format!("evt-{i:04}"),
                service_arn: arn.to_string(),
                message: format!("event {i}"),
                created_at: i,
            })
            .await
            .unwrap();
    }
    let events = s.service_events.list(arn, 1000).await.unwrap();
    assert_eq!(events.len(), 100);
    // Newest first; the oldest 20 were trimmed.
    assert_eq!(events.first().unwrap().id, "evt-0119");
    assert_eq!(events.last().unwrap().id, "evt-0020");
}

#[tokio::test]
async fn account_setting_upsert() {
    let s = store().await;
    let row = AccountSettingRow {
        principal_arn: "default".into(),
        name: "containerInsights".into(),
        value: "disabled".into(),
    };
    s.account_settings.put(&row).await.unwrap();
    s.account_settings
        .put(&AccountSettingRow {
            value: "enabled".into(),
            ..row.clone()
        })
        .await
        .unwrap();

    let got = s
        .account_settings
        .get("default", "containerInsights")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(got.value, "enabled");

    assert!(s.account_settings.delete("default", "containerInsights").await.unwrap());
    assert!(!s.account_settings.delete("default", "containerInsights").await.unwrap());
}

#[tokio::test]
async fn attribute_put_is_upsert() {
    let s = store().await;
    let c = cluster("c1");
    s.clusters.create(&c).await.unwrap();
    let attr = AttributeRow {
        cluster_arn: c.arn.clone(),
        name: "stack".into(),
        value: Some("prod".into()),
        target_type: "container-instance".into(),
        target_id: "i-1".into(),
        region: "us-east-1".into(),
        account_id: "000000000000".into(),
    };
    s.attributes.put(std::slice::from_ref(&attr)).await.unwrap();
    s.attributes
        .put(&[AttributeRow {
            value: Some("dev".into()),
            ..attr.clone()
        }])
        .await
        .unwrap();

    let rows = s.attributes.list(&c.arn, None, None, 100, 0).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].value.as_deref(), Some("dev"));

    s.attributes.delete(&[attr]).await.unwrap();
    assert!(s.attributes.list(&c.arn, None, None, 100, 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn ping_succeeds() {
    let s = store().await;
    s.ping().await.unwrap();
}
