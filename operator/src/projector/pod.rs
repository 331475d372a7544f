//! Bare pods for RunTask / StartTask.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{EnvVar, Pod};
use kube::api::ObjectMeta;

use super::workload::pod_spec;
use crate::error::Result;
use crate::labels;
use kecs_storage::{TaskDefinitionRow, TaskRow};
use kecs_types as ecs;

pub fn pod_name_for_task(task: &TaskRow) -> String {
    format!("kecs-task-{}", task.id)
}

/// Builds the pod backing a task. `restartPolicy: Never` so a finished task
/// stays observable until the reconciler records its exit.
pub fn pod_for_task(
    task: &TaskRow,
    taskdef: &TaskDefinitionRow,
    cluster_name: &str,
) -> Result<Pod> {
    let mut spec = pod_spec(taskdef, "Never")?;
    apply_overrides(&mut spec, task)?;

    let mut pod_labels = labels::base_labels(cluster_name);
    pod_labels.insert(labels::TASK_ID.to_string(), task.id.clone());
    if let Some((family, revision)) = labels::family_revision(&task.task_definition_arn) {
        pod_labels.insert(labels::TASK_DEF_FAMILY.to_string(), family);
        pod_labels.insert(labels::TASK_DEF_REVISION.to_string(), revision);
    }

    let mut annotations = BTreeMap::new();
    annotations.insert(labels::ANN_TASK_ARN.to_string(), task.arn.clone());
    annotations.insert(labels::ANN_CLUSTER_ARN.to_string(), task.cluster_arn.clone());
    annotations.insert(
        labels::ANN_TASK_DEFINITION_ARN.to_string(),
        task.task_definition_arn.clone(),
    );

    Ok(Pod {
        metadata: ObjectMeta {
            name: Some(pod_name_for_task(task)),
            namespace: task.pod_namespace.clone(),
            labels: Some(pod_labels),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: Some(spec),
        status: None,
    })
}

/// Applies RunTask container overrides onto the projected pod spec:
/// command replaces args, environment entries merge by name.
fn apply_overrides(spec: &mut k8s_openapi::api::core::v1::PodSpec, task: &TaskRow) -> Result<()> {
    let Some(raw) = &task.overrides else {
        return Ok(());
    };
    let overrides: ecs::TaskOverride = serde_json::from_value(raw.clone())?;
    for co in &overrides.container_overrides {
        let Some(name) = &co.name else { continue };
        let Some(container) = spec.containers.iter_mut().find(|c| &c.name == name) else {
            continue;
        };
        if let Some(command) = &co.command {
            container.args = Some(command.clone());
        }
        if !co.environment.is_empty() {
            let mut env = container.env.take().unwrap_or_default();
            for kv in &co.environment {
                let Some(key) = &kv.name else { continue };
                match env.iter_mut().find(|e| &e.name == key) {
                    Some(existing) => existing.value = kv.value.clone(),
                    None => env.push(EnvVar {
                        name: key.clone(),
                        value: kv.value.clone(),
                        ..Default::default()
                    }),
                }
            }
            container.env = Some(env);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kecs_types::{HealthStatus, LaunchType, TaskDefinitionStatus, TaskStatus};
    use serde_json::json;

    fn taskdef() -> TaskDefinitionRow {
        TaskDefinitionRow {
            arn: "arn:aws:ecs:us-east-1:000000000000:task-definition/job:1".into(),
            family: "job".into(),
            revision: 1,
            status: TaskDefinitionStatus::Active,
            region: "us-east-1".into(),
            account_id: "000000000000".into(),
            container_definitions: json!([{
                "name": "runner",
                "image": "busybox:latest",
                "environment": [{"name": "LEVEL", "value": "info"}]
            }]),
            volumes: json!([]),
            network_mode: None,
            requires_compatibilities: json!([]),
            cpu: None,
            memory: None,
            task_role_arn: None,
            execution_role_arn: None,
            placement_constraints: json!([]),
            tags: json!([]),
            created_at: 0,
            deregistered_at: None,
        }
    }

    fn task(overrides: Option<serde_json::Value>) -> TaskRow {
        TaskRow {
            arn: "arn:aws:ecs:us-east-1:000000000000:task/c1/abc".into(),
            id: "abc".into(),
            cluster_arn: "arn:aws:ecs:us-east-1:000000000000:cluster/c1".into(),
            task_definition_arn: "arn:aws:ecs:us-east-1:000000000000:task-definition/job:1".into(),
            container_instance_arn: None,
            overrides,
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
            pod_namespace: Some("c1-us-east-1".into()),
            region: "us-east-1".into(),
            account_id: "000000000000".into(),
            created_at: 0,
            started_at: None,
            stopping_at: None,
            stopped_at: None,
            pull_started_at: None,
            pull_stopped_at: None,
            execution_stopped_at: None,
            updated_at: 0,
        }
    }

    #[test]
    fn pod_carries_backlink_metadata() {
        let pod = pod_for_task(&task(None), &taskdef(), "c1").unwrap();
        assert_eq!(pod.metadata.name.as_deref(), Some("kecs-task-abc"));
        let labels_map = pod.metadata.labels.unwrap();
        assert_eq!(labels_map.get(labels::TASK_ID).map(String::as_str), Some("abc"));
        let ann = pod.metadata.annotations.unwrap();
        assert_eq!(
            ann.get(labels::ANN_TASK_ARN).map(String::as_str),
            Some("arn:aws:ecs:us-east-1:000000000000:task/c1/abc")
        );
        assert_eq!(
            pod.spec.unwrap().restart_policy.as_deref(),
            Some("Never")
        );
    }

    #[test]
    fn overrides_replace_command_and_merge_env() {
        let overrides = json!({
            "containerOverrides": [{
                "name": "runner",
                "command": ["echo", "hi"],
                "environment": [
                    {"name": "LEVEL", "value": "debug"},
                    {"name": "EXTRA", "value": "1"}
                ]
            }]
        });
        let pod = pod_for_task(&task(Some(overrides)), &taskdef(), "c1").unwrap();
        let containers = pod.spec.unwrap().containers;
        let c = &containers[0];
        assert_eq!(c.args.as_ref().unwrap(), &vec!["echo".to_string(), "hi".to_string()]);
        let env = c.env.as_ref().unwrap();
        assert_eq!(env.len(), 2);
        assert_eq!(
            env.iter().find(|e| e.name == "LEVEL").unwrap().value.as_deref(),
            Some("debug")
        );
    }
}
