use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterStatus {
    Provisioning,
    Active,
    Deprovisioning,
    Inactive,
}

impl ClusterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterStatus::Provisioning => "PROVISIONING",
            ClusterStatus::Active => "ACTIVE",
            ClusterStatus::Deprovisioning => "DEPROVISIONING",
            ClusterStatus::Inactive => "INACTIVE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PROVISIONING" => Some(ClusterStatus::Provisioning),
            "ACTIVE" => Some(ClusterStatus::Active),
            "DEPROVISIONING" => Some(ClusterStatus::Deprovisioning),
            "INACTIVE" => Some(ClusterStatus::Inactive),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskDefinitionStatus {
    Active,
    Inactive,
}

impl TaskDefinitionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskDefinitionStatus::Active => "ACTIVE",
            TaskDefinitionStatus::Inactive => "INACTIVE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(TaskDefinitionStatus::Active),
            "INACTIVE" => Some(TaskDefinitionStatus::Inactive),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceStatus {
    Active,
    Draining,
    Inactive,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Active => "ACTIVE",
            ServiceStatus::Draining => "DRAINING",
            ServiceStatus::Inactive => "INACTIVE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(ServiceStatus::Active),
            "DRAINING" => Some(ServiceStatus::Draining),
            "INACTIVE" => Some(ServiceStatus::Inactive),
            _ => None,
        }
    }
}

/// Task lifecycle states, ordered. A task walks this sequence forward and may
/// jump to `Stopped` from any state; it never moves backwards.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Provisioning,
    Pending,
    Activating,
    Running,
    Deactivating,
    Stopping,
    Deprovisioning,
    Stopped,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Provisioning => "PROVISIONING",
            TaskStatus::Pending => "PENDING",
            TaskStatus::Activating => "ACTIVATING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Deactivating => "DEACTIVATING",
            TaskStatus::Stopping => "STOPPING",
            TaskStatus::Deprovisioning => "DEPROVISIONING",
            TaskStatus::Stopped => "STOPPED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PROVISIONING" => Some(TaskStatus::Provisioning),
            "PENDING" => Some(TaskStatus::Pending),
            "ACTIVATING" => Some(TaskStatus::Activating),
            "RUNNING" => Some(TaskStatus::Running),
            "DEACTIVATING" => Some(TaskStatus::Deactivating),
            "STOPPING" => Some(TaskStatus::Stopping),
            "DEPROVISIONING" => Some(TaskStatus::Deprovisioning),
            "STOPPED" => Some(TaskStatus::Stopped),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            TaskStatus::Provisioning => 0,
            TaskStatus::Pending => 1,
            TaskStatus::Activating => 2,
            TaskStatus::Running => 3,
            TaskStatus::Deactivating => 4,
            TaskStatus::Stopping => 5,
            TaskStatus::Deprovisioning => 6,
            TaskStatus::Stopped => 7,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Stopped)
    }

    /// Whether moving from `self` to `next` is a legal walk of the lifecycle.
    /// Staying in place is legal (an observation may repeat), any forward move
    /// is legal (watch events can skip intermediate states), and `Stopped` is
    /// reachable from everywhere but absorbing once entered.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        if *self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        next.rank() > self.rank()
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "HEALTHY",
            HealthStatus::Unhealthy => "UNHEALTHY",
            HealthStatus::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "HEALTHY" => Some(HealthStatus::Healthy),
            "UNHEALTHY" => Some(HealthStatus::Unhealthy),
            "UNKNOWN" => Some(HealthStatus::Unknown),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LaunchType {
    Ec2,
    Fargate,
    External,
}

impl LaunchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LaunchType::Ec2 => "EC2",
            LaunchType::Fargate => "FARGATE",
            LaunchType::External => "EXTERNAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "EC2" => Some(LaunchType::Ec2),
            "FARGATE" => Some(LaunchType::Fargate),
            "EXTERNAL" => Some(LaunchType::External),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchedulingStrategy {
    Replica,
    Daemon,
}

impl SchedulingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulingStrategy::Replica => "REPLICA",
            SchedulingStrategy::Daemon => "DAEMON",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "REPLICA" => Some(SchedulingStrategy::Replica),
            "DAEMON" => Some(SchedulingStrategy::Daemon),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentControllerType {
    Ecs,
    CodeDeploy,
    External,
}

impl DeploymentControllerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentControllerType::Ecs => "ECS",
            DeploymentControllerType::CodeDeploy => "CODE_DEPLOY",
            DeploymentControllerType::External => "EXTERNAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ECS" => Some(DeploymentControllerType::Ecs),
            "CODE_DEPLOY" => Some(DeploymentControllerType::CodeDeploy),
            "EXTERNAL" => Some(DeploymentControllerType::External),
            _ => None,
        }
    }
}

// Unlike the lifecycle enums, stop codes keep AWS's PascalCase spelling on
// the wire, so no rename is applied.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopCode {
    TaskFailedToStart,
    EssentialContainerExited,
    UserInitiated,
    ServiceSchedulerInitiated,
    TerminationNotice,
}

impl StopCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopCode::TaskFailedToStart => "TaskFailedToStart",
            StopCode::EssentialContainerExited => "EssentialContainerExited",
            StopCode::UserInitiated => "UserInitiated",
            StopCode::ServiceSchedulerInitiated => "ServiceSchedulerInitiated",
            StopCode::TerminationNotice => "TerminationNotice",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "TaskFailedToStart" => Some(StopCode::TaskFailedToStart),
            "EssentialContainerExited" => Some(StopCode::EssentialContainerExited),
            "UserInitiated" => Some(StopCode::UserInitiated),
            "ServiceSchedulerInitiated" => Some(StopCode::ServiceSchedulerInitiated),
            "TerminationNotice" => Some(StopCode::TerminationNotice),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScaleUnit {
    Count,
    Percent,
}

impl ScaleUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScaleUnit::Count => "COUNT",
            ScaleUnit::Percent => "PERCENT",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopped_is_absorbing() {
        for next in [
            TaskStatus::Provisioning,
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Deprovisioning,
        ] {
            assert!(!TaskStatus::Stopped.can_transition_to(next));
        }
        assert!(TaskStatus::Stopped.can_transition_to(TaskStatus::Stopped));
    }

    #[test]
    fn any_state_may_stop() {
        for from in [
            TaskStatus::Provisioning,
            TaskStatus::Pending,
            TaskStatus::Activating,
            TaskStatus::Running,
            TaskStatus::Deactivating,
            TaskStatus::Stopping,
            TaskStatus::Deprovisioning,
        ] {
            assert!(from.can_transition_to(TaskStatus::Stopped));
        }
    }

    #[test]
    fn transitions_never_regress() {
        assert!(!TaskStatus::Running.can_transition_to(TaskStatus::Pending));
        assert!(!TaskStatus::Stopping.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Provisioning.can_transition_to(TaskStatus::Pending));
    }

    #[test]
    fn wire_spelling_is_screaming_snake() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::Provisioning).unwrap(),
            "\"PROVISIONING\""
        );
        assert_eq!(
            serde_json::to_string(&DeploymentControllerType::CodeDeploy).unwrap(),
            "\"CODE_DEPLOY\""
        );
        assert_eq!(serde_json::to_string(&LaunchType::Ec2).unwrap(), "\"EC2\"");
    }

    #[test]
    fn parse_round_trips() {
        assert_eq!(TaskStatus::parse("RUNNING"), Some(TaskStatus::Running));
        assert_eq!(TaskStatus::parse("running"), None);
        assert_eq!(
            ServiceStatus::parse(ServiceStatus::Draining.as_str()),
            Some(ServiceStatus::Draining)
        );
    }
}
