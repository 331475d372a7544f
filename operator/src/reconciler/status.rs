//! Pure mapping from observed Kubernetes state to ECS-visible status.

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{ContainerStatus, Pod};

use kecs_types::{Container, HealthStatus, TaskStatus};

/// Derives the task `lastStatus` from a live pod. `None` means the pod does
/// not yet tell us anything trustworthy (e.g. phase Unknown) and the row
/// should be left alone.
pub fn task_status(pod: &Pod) -> Option<TaskStatus> {
    if pod.metadata.deletion_timestamp.is_some() {
        return Some(TaskStatus::Stopping);
    }
    match pod.status.as_ref().and_then(|s| s.phase.as_deref()) {
        Some("Pending") => Some(TaskStatus::Pending),
        Some("Running") => {
            if all_containers_ready(pod) {
                Some(TaskStatus::Running)
            } else {
                Some(TaskStatus::Activating)
            }
        }
        Some("Succeeded") | Some("Failed") => Some(TaskStatus::Stopped),
        Some("Unknown") => None,
        Some(_) => None,
        None => Some(TaskStatus::Provisioning),
    }
}

fn all_containers_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .map(|statuses| !statuses.is_empty() && statuses.iter().all(|c| c.ready))
        .unwrap_or(false)
}

fn container_view(status: &ContainerStatus, task_arn: &str) -> Container {
    let state = status.state.as_ref();
    let (last_status, exit_code, reason) = match state {
        Some(s) if s.terminated.is_some() => {
            let t = s.terminated.as_ref().unwrap();
            (
                "STOPPED".to_string(),
                Some(t.exit_code),
                t.reason.clone(),
            )
        }
        Some(s) if s.running.is_some() => ("RUNNING".to_string(), None, None),
        Some(s) if s.waiting.is_some() => (
            "PENDING".to_string(),
            None,
            s.waiting.as_ref().and_then(|w| w.reason.clone()),
        ),
        _ => ("PENDING".to_string(), None, None),
    };
    let health = if status.ready {
        HealthStatus::Healthy
    } else if exit_code.is_some_and(|c| c != 0) {
        HealthStatus::Unhealthy
    } else {
        HealthStatus::Unknown
    };
    Container {
        task_arn: Some(task_arn.to_string()),
        name: Some(status.name.clone()),
        image: Some(status.image.clone()),
        last_status: Some(last_status),
        exit_code,
        reason,
        health_status: Some(health),
        ..Default::default()
    }
}

/// Per-container runtime views for the task row.
pub fn container_views(pod: &Pod, task_arn: &str) -> Vec<Container> {
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .map(|statuses| statuses.iter().map(|c| container_view(c, task_arn)).collect())
        .unwrap_or_default()
}

/// Aggregate health across the pod's containers.
pub fn task_health(pod: &Pod) -> HealthStatus {
    let Some(statuses) = pod.status.as_ref().and_then(|s| s.container_statuses.as_ref()) else {
        return HealthStatus::Unknown;
    };
    if statuses.is_empty() {
        return HealthStatus::Unknown;
    }
    let any_failed = statuses.iter().any(|c| {
        c.state
            .as_ref()
            .and_then(|s| s.terminated.as_ref())
            .is_some_and(|t| t.exit_code != 0)
    });
    if any_failed {
        return HealthStatus::Unhealthy;
    }
    if statuses.iter().all(|c| c.ready) {
        HealthStatus::Healthy
    } else {
        HealthStatus::Unknown
    }
}

/// Whether every container of a finished pod exited zero; used to pick the
/// stop code for unexpected exits.
pub fn exited_cleanly(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .map(|statuses| {
            statuses.iter().all(|c| {
                c.state
                    .as_ref()
                    .and_then(|s| s.terminated.as_ref())
                    .is_none_or(|t| t.exit_code == 0)
            })
        })
        .unwrap_or(true)
}

/// Deployment status to (runningCount, pendingCount).
pub fn deployment_counts(dep: &Deployment) -> (i32, i32) {
    let status = dep.status.as_ref();
    let ready = status.and_then(|s| s.ready_replicas).unwrap_or(0);
    let total = status
        .and_then(|s| s.replicas)
        .or_else(|| dep.spec.as_ref().and_then(|s| s.replicas))
        .unwrap_or(0);
    (ready, (total - ready).max(0))
}

/// DaemonSet status to (runningCount, pendingCount).
pub fn daemonset_counts(ds: &DaemonSet) -> (i32, i32) {
    let status = ds.status.as_ref();
    let ready = status.map(|s| s.number_ready).unwrap_or(0);
    let desired = status.map(|s| s.desired_number_scheduled).unwrap_or(0);
    (ready, (desired - ready).max(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::DeploymentStatus;
    use k8s_openapi::api::core::v1::{
        ContainerState, ContainerStateRunning, ContainerStateTerminated, ContainerStateWaiting,
        PodStatus,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use k8s_openapi::jiff::Timestamp;

    fn pod_with_phase(phase: &str) -> Pod {
        Pod {
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn running_container(name: &str, ready: bool) -> ContainerStatus {
        ContainerStatus {
            name: name.to_string(),
            image: "nginx:alpine".to_string(),
            ready,
            state: Some(ContainerState {
                running: Some(ContainerStateRunning::default()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn terminated_container(name: &str, exit_code: i32) -> ContainerStatus {
        ContainerStatus {
            name: name.to_string(),
            image: "nginx:alpine".to_string(),
            ready: false,
            state: Some(ContainerState {
                terminated: Some(ContainerStateTerminated {
                    exit_code,
                    reason: Some("Completed".to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn phase_mapping() {
        assert_eq!(task_status(&pod_with_phase("Pending")), Some(TaskStatus::Pending));
        assert_eq!(task_status(&pod_with_phase("Succeeded")), Some(TaskStatus::Stopped));
        assert_eq!(task_status(&pod_with_phase("Failed")), Some(TaskStatus::Stopped));
        assert_eq!(task_status(&pod_with_phase("Unknown")), None);
        assert_eq!(task_status(&Pod::default()), Some(TaskStatus::Provisioning));
    }

    #[test]
    fn running_requires_ready_containers() {
        let mut pod = pod_with_phase("Running");
        pod.status.as_mut().unwrap().container_statuses =
            Some(vec![running_container("a", true), running_container("b", false)]);
        assert_eq!(task_status(&pod), Some(TaskStatus::Activating));

        pod.status.as_mut().unwrap().container_statuses =
            Some(vec![running_container("a", true), running_container("b", true)]);
        assert_eq!(task_status(&pod), Some(TaskStatus::Running));
    }

    #[test]
    fn deleting_pod_is_stopping() {
        let mut pod = pod_with_phase("Running");
        pod.metadata.deletion_timestamp = Some(Time(Timestamp::UNIX_EPOCH));
        assert_eq!(task_status(&pod), Some(TaskStatus::Stopping));
    }

    #[test]
    fn container_views_carry_exit_codes() {
        let mut pod = pod_with_phase("Failed");
        pod.status.as_mut().unwrap().container_statuses = Some(vec![
            terminated_container("worker", 1),
            running_container("sidecar", true),
        ]);
        let views = container_views(&pod, "arn:task");
        assert_eq!(views.len(), 2);
        assert_eq!(views[0].last_status.as_deref(), Some("STOPPED"));
        assert_eq!(views[0].exit_code, Some(1));
        assert_eq!(views[0].health_status, Some(HealthStatus::Unhealthy));
        assert_eq!(views[1].last_status.as_deref(), Some("RUNNING"));

        assert_eq!(task_health(&pod), HealthStatus::Unhealthy);
        assert!(!exited_cleanly(&pod));
    }

    #[test]
    fn waiting_container_is_pending() {
        let status = ContainerStatus {
            name: "init".to_string(),
            image: "busybox".to_string(),
            ready: false,
            state: Some(ContainerState {
                waiting: Some(ContainerStateWaiting {
                    reason: Some("ContainerCreating".to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        let view = container_view(&status, "arn:task");
        assert_eq!(view.last_status.as_deref(), Some("PENDING"));
        assert_eq!(view.reason.as_deref(), Some("ContainerCreating"));
    }

    #[test]
    fn deployment_counts_split_ready_and_pending() {
        let dep = Deployment {
            status: Some(DeploymentStatus {
                replicas: Some(5),
                ready_replicas: Some(3),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(deployment_counts(&dep), (3, 2));
        assert_eq!(deployment_counts(&Deployment::default()), (0, 0));
    }
}
