use async_trait::async_trait;
use tokio_postgres::Row;
use tokio_postgres::types::ToSql;

use super::{PostgresStore, parse_enum};
use crate::error::{Result, StorageError};
use crate::model::{TaskRow, now_ms};
use crate::repository::{TaskFilter, TaskRepository};
use kecs_types::{HealthStatus, LaunchType, TaskStatus};

const COLS: &str = "arn, id, cluster_arn, task_definition_arn, container_instance_arn, overrides, \
     last_status, desired_status, cpu, memory, containers, version, stop_code, stopped_reason, \
     started_by, group_name, launch_type, health_status, attributes, attachments, \
     capacity_provider_name, tags, pod_name, pod_namespace, region, account_id, created_at, \
     started_at, stopping_at, stopped_at, pull_started_at, pull_stopped_at, \
     execution_stopped_at, updated_at";

fn from_row(row: &Row) -> Result<TaskRow> {
    let last: String = row.get("last_status");
    let desired: String = row.get("desired_status");
    let launch: String = row.get("launch_type");
    let health: String = row.get("health_status");
    Ok(TaskRow {
        arn: row.get("arn"),
        id: row.get("id"),
        cluster_arn: row.get("cluster_arn"),
        task_definition_arn: row.get("task_definition_arn"),
        container_instance_arn: row.get("container_instance_arn"),
        overrides: row.get("overrides"),
        last_status: parse_enum(&last, TaskStatus::parse, "task status")?,
        desired_status: parse_enum(&desired, TaskStatus::parse, "task status")?,
        cpu: row.get("cpu"),
        memory: row.get("memory"),
        containers: row.get("containers"),
        version: row.get("version"),
        stop_code: row.get("stop_code"),
        stopped_reason: row.get("stopped_reason"),
        started_by: row.get("started_by"),
        group_name: row.get("group_name"),
        launch_type: parse_enum(&launch, LaunchType::parse, "launch type")?,
        health_status: parse_enum(&health, HealthStatus::parse, "health status")?,
        attributes: row.get("attributes"),
        attachments: row.get("attachments"),
        capacity_provider_name: row.get("capacity_provider_name"),
        tags: row.get("tags"),
        pod_name: row.get("pod_name"),
        pod_namespace: row.get("pod_namespace"),
        region: row.get("region"),
        account_id: row.get("account_id"),
        created_at: row.get("created_at"),
        started_at: row.get("started_at"),
        stopping_at: row.get("stopping_at"),
        stopped_at: row.get("stopped_at"),
        pull_started_at: row.get("pull_started_at"),
        pull_stopped_at: row.get("pull_stopped_at"),
        execution_stopped_at: row.get("execution_stopped_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl TaskRepository for PostgresStore {
    async fn create_batch(&self, rows: &[TaskRow]) -> Result<()> {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;
        for row in rows {
            tx.execute(
                "INSERT INTO tasks (arn, id, cluster_arn, task_definition_arn, \
                 container_instance_arn, overrides, last_status, desired_status, cpu, memory, \
                 containers, version, stop_code, stopped_reason, started_by, group_name, \
                 launch_type, health_status, attributes, attachments, capacity_provider_name, \
                 tags, pod_name, pod_namespace, region, account_id, created_at, started_at, \
                 stopping_at, stopped_at, pull_started_at, pull_stopped_at, \
                 execution_stopped_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
                 $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29, $30, $31, $32, \
                 $33, $34)",
                &[
                    &row.arn,
                    &row.id,
                    &row.cluster_arn,
                    &row.task_definition_arn,
                    &row.container_instance_arn,
                    &row.overrides,
                    &row.last_status.as_str(),
                    &row.desired_status.as_str(),
                    &row.cpu,
                    &row.memory,
                    &row.containers,
                    &row.version,
                    &row.stop_code,
                    &row.stopped_reason,
                    &row.started_by,
                    &row.group_name,
                    &row.launch_type.as_str(),
                    &row.health_status.as_str(),
                    &row.attributes,
                    &row.attachments,
                    &row.capacity_provider_name,
                    &row.tags,
                    &row.pod_name,
                    &row.pod_namespace,
                    &row.region,
                    &row.account_id,
                    &row.created_at,
                    &row.started_at,
                    &row.stopping_at,
                    &row.stopped_at,
                    &row.pull_started_at,
                    &row.pull_stopped_at,
                    &row.execution_stopped_at,
                    &row.updated_at,
                ],
            )
            .await
            .map_err(|e| StorageError::from(e).constraint_as_exists("task", row.arn.clone()))?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_by_arn(&self, arn: &str) -> Result<Option<TaskRow>> {
        let client = self.client().await?;
        let row = client
            .query_opt(&format!("SELECT {COLS} FROM tasks WHERE arn = $1"), &[&arn])
            .await?;
        row.as_ref().map(from_row).transpose()
    }

    async fn get(&self, cluster_arn: &str, id_or_arn: &str) -> Result<Option<TaskRow>> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                &format!(
                    "SELECT {COLS} FROM tasks WHERE cluster_arn = $1 AND (arn = $2 OR id = $2)"
                ),
                &[&cluster_arn, &id_or_arn],
            )
            .await?;
        row.as_ref().map(from_row).transpose()
    }

    async fn list(
        &self,
        cluster_arn: &str,
        filter: &TaskFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TaskRow>> {
        let client = self.client().await?;
        let cluster_arn = cluster_arn.to_string();
        let mut sql = format!("SELECT {COLS} FROM tasks WHERE cluster_arn = $1");
        let mut params: Vec<&(dyn ToSql + Sync)> = vec![&cluster_arn];
        let family_like = filter.family_arn_prefix.as_ref().map(|p| format!("{p}%"));
        if let Some(status) = &filter.desired_status {
            params.push(status);
            sql.push_str(&format!(" AND desired_status = ${}", params.len()));
        }
        if let Some(lt) = &filter.launch_type {
            params.push(lt);
            sql.push_str(&format!(" AND launch_type = ${}", params.len()));
        }
        if let Some(started_by) = &filter.started_by {
            params.push(started_by);
            sql.push_str(&format!(" AND started_by = ${}", params.len()));
        }
        if let Some(group) = &filter.group {
            params.push(group);
            sql.push_str(&format!(" AND group_name = ${}", params.len()));
        }
        if let Some(like) = &family_like {
            params.push(like);
            sql.push_str(&format!(" AND task_definition_arn LIKE ${}", params.len()));
        }
        params.push(&limit);
        sql.push_str(&format!(
            " ORDER BY created_at DESC, id DESC LIMIT ${}",
            params.len()
        ));
        params.push(&offset);
        sql.push_str(&format!(" OFFSET ${}", params.len()));

        let rows = client.query(&sql, &params).await?;
        rows.iter().map(from_row).collect()
    }

    async fn list_unstopped(&self, cluster_arn: Option<&str>) -> Result<Vec<TaskRow>> {
        let client = self.client().await?;
        let rows = match cluster_arn {
            Some(arn) => {
                client
                    .query(
                        &format!(
                            "SELECT {COLS} FROM tasks \
                             WHERE cluster_arn = $1 AND last_status != 'STOPPED'"
                        ),
                        &[&arn],
                    )
                    .await?
            }
            None => {
                client
                    .query(
                        &format!("SELECT {COLS} FROM tasks WHERE last_status != 'STOPPED'"),
                        &[],
                    )
                    .await?
            }
        };
        rows.iter().map(from_row).collect()
    }

    async fn update_with_version(&self, row: &TaskRow) -> Result<()> {
        let client = self.client().await?;
        let n = client
            .execute(
                "UPDATE tasks SET last_status = $3, desired_status = $4, containers = $5, \
                 health_status = $6, stop_code = $7, stopped_reason = $8, pod_name = $9, \
                 pod_namespace = $10, started_at = $11, stopping_at = $12, stopped_at = $13, \
                 pull_started_at = $14, pull_stopped_at = $15, execution_stopped_at = $16, \
                 tags = $17, version = version + 1, updated_at = $18 \
                 WHERE arn = $1 AND version = $2",
                &[
                    &row.arn,
                    &row.version,
                    &row.last_status.as_str(),
                    &row.desired_status.as_str(),
                    &row.containers,
                    &row.health_status.as_str(),
                    &row.stop_code,
                    &row.stopped_reason,
                    &row.pod_name,
                    &row.pod_namespace,
                    &row.started_at,
                    &row.stopping_at,
                    &row.stopped_at,
                    &row.pull_started_at,
                    &row.pull_stopped_at,
                    &row.execution_stopped_at,
                    &row.tags,
                    &now_ms(),
                ],
            )
            .await?;
        if n == 0 {
            let exists: i64 = client
                .query_one("SELECT COUNT(*) FROM tasks WHERE arn = $1", &[&row.arn])
                .await?
                .get(0);
            if exists == 0 {
                return Err(StorageError::not_found("task", row.arn.clone()));
            }
            return Err(StorageError::Conflict(format!(
                "task {} version {} is stale",
                row.arn, row.version
            )));
        }
        Ok(())
    }

    async fn delete(&self, arn: &str) -> Result<bool> {
        let client = self.client().await?;
        let n = client
            .execute("DELETE FROM tasks WHERE arn = $1", &[&arn])
            .await?;
        Ok(n > 0)
    }
}
