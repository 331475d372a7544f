use async_trait::async_trait;

use crate::error::Result;
use crate::model::*;

/// Filters applied by ListTaskDefinitions / ListTaskDefinitionFamilies.
#[derive(Debug, Clone, Default)]
pub struct TaskDefinitionFilter {
    pub family_prefix: Option<String>,
    pub status: Option<String>,
}

/// Filters applied by ListServices.
#[derive(Debug, Clone, Default)]
pub struct ServiceFilter {
    pub launch_type: Option<String>,
    pub scheduling_strategy: Option<String>,
}

/// Filters applied by ListTasks. All present filters combine with AND.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub desired_status: Option<String>,
    pub launch_type: Option<String>,
    pub started_by: Option<String>,
    pub group: Option<String>,
    pub family_arn_prefix: Option<String>,
}

#[async_trait]
pub trait ClusterRepository: Send + Sync {
    async fn create(&self, row: &ClusterRow) -> Result<()>;
    async fn get_by_name(&self, name: &str) -> Result<Option<ClusterRow>>;
    async fn get_by_arn(&self, arn: &str) -> Result<Option<ClusterRow>>;
    /// Ordered `created_at DESC, arn DESC` for stable cursor pagination.
    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<ClusterRow>>;
    async fn update(&self, row: &ClusterRow) -> Result<()>;
    /// Reconciler write-back of observed counters; bumps `updated_at`.
    async fn update_counters(&self, arn: &str, running: i32, pending: i32, active: i32)
    -> Result<()>;
    async fn delete(&self, arn: &str) -> Result<bool>;
}

#[async_trait]
pub trait TaskDefinitionRepository: Send + Sync {
    /// Allocates the next revision for `row.family` and inserts the row with
    /// it, transactionally. Returns the stored row (arn and revision filled
    /// in). Two concurrent registrations of the same family serialize on the
    /// `(family, revision)` unique constraint and retry.
    async fn register(&self, row: TaskDefinitionRow) -> Result<TaskDefinitionRow>;
    async fn get(&self, family: &str, revision: i64) -> Result<Option<TaskDefinitionRow>>;
    async fn get_by_arn(&self, arn: &str) -> Result<Option<TaskDefinitionRow>>;
    async fn latest_revision(&self, family: &str, active_only: bool)
    -> Result<Option<TaskDefinitionRow>>;
    /// Marks the revision INACTIVE; the row is retained.
    async fn deregister(&self, arn: &str) -> Result<Option<TaskDefinitionRow>>;
    /// Revisions are immutable apart from their tag set.
    async fn update_tags(&self, arn: &str, tags: &serde_json::Value) -> Result<()>;
    async fn list(
        &self,
        filter: &TaskDefinitionFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TaskDefinitionRow>>;
    async fn list_families(
        &self,
        filter: &TaskDefinitionFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<String>>;
}

#[async_trait]
pub trait ServiceRepository: Send + Sync {
    async fn create(&self, row: &ServiceRow) -> Result<()>;
    async fn get(&self, cluster_arn: &str, name: &str) -> Result<Option<ServiceRow>>;
    async fn get_by_arn(&self, arn: &str) -> Result<Option<ServiceRow>>;
    async fn list(
        &self,
        cluster_arn: &str,
        filter: &ServiceFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ServiceRow>>;
    /// Services across all clusters, used by the orphan sweep.
    async fn list_all(&self) -> Result<Vec<ServiceRow>>;
    async fn update(&self, row: &ServiceRow) -> Result<()>;
    /// Reconciler write-back of observed counters; bumps `updated_at`.
    async fn update_counters(&self, arn: &str, running: i32, pending: i32) -> Result<()>;
    async fn delete(&self, arn: &str) -> Result<bool>;
    async fn count_active_by_cluster(&self, cluster_arn: &str) -> Result<i64>;
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Inserts a batch of task rows atomically (one RunTask call may create
    /// several tasks).
    async fn create_batch(&self, rows: &[TaskRow]) -> Result<()>;
    async fn get_by_arn(&self, arn: &str) -> Result<Option<TaskRow>>;
    /// Accepts the bare uuid or the full ARN.
    async fn get(&self, cluster_arn: &str, id_or_arn: &str) -> Result<Option<TaskRow>>;
    async fn list(
        &self,
        cluster_arn: &str,
        filter: &TaskFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TaskRow>>;
    /// Tasks across all clusters that are not STOPPED, used by the orphan
    /// sweep and cluster deletion checks.
    async fn list_unstopped(&self, cluster_arn: Option<&str>) -> Result<Vec<TaskRow>>;
    /// Full-row update guarded by the optimistic `version` in `row`; the
    /// stored version is incremented. A stale version yields `Conflict`.
    async fn update_with_version(&self, row: &TaskRow) -> Result<()>;
    async fn delete(&self, arn: &str) -> Result<bool>;
}

#[async_trait]
pub trait TaskSetRepository: Send + Sync {
    async fn create(&self, row: &TaskSetRow) -> Result<()>;
    async fn get(&self, service_arn: &str, id_or_arn: &str) -> Result<Option<TaskSetRow>>;
    async fn list(&self, service_arn: &str) -> Result<Vec<TaskSetRow>>;
    async fn update(&self, row: &TaskSetRow) -> Result<()>;
    async fn delete(&self, arn: &str) -> Result<bool>;
}

#[async_trait]
pub trait AttributeRepository: Send + Sync {
    /// Upserts by `(cluster_arn, target_id, name)`.
    async fn put(&self, rows: &[AttributeRow]) -> Result<()>;
    async fn delete(&self, rows: &[AttributeRow]) -> Result<()>;
    async fn list(
        &self,
        cluster_arn: &str,
        target_type: Option<&str>,
        name: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AttributeRow>>;
}

#[async_trait]
pub trait AccountSettingRepository: Send + Sync {
    async fn put(&self, row: &AccountSettingRow) -> Result<()>;
    async fn get(&self, principal_arn: &str, name: &str) -> Result<Option<AccountSettingRow>>;
    async fn list(
        &self,
        principal_arn: Option<&str>,
        name: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AccountSettingRow>>;
    async fn delete(&self, principal_arn: &str, name: &str) -> Result<bool>;
}

#[async_trait]
pub trait ServiceEventRepository: Send + Sync {
    /// Appends an event, trimming the per-service buffer to 100 entries.
    async fn append(&self, row: &ServiceEventRow) -> Result<()>;
    /// Newest first.
    async fn list(&self, service_arn: &str, limit: i64) -> Result<Vec<ServiceEventRow>>;
    async fn delete_for_service(&self, service_arn: &str) -> Result<()>;
}

/// Liveness probe used by the health endpoints.
#[async_trait]
pub trait StorePing: Send + Sync {
    async fn ping(&self) -> Result<()>;
}
