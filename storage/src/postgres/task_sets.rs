use async_trait::async_trait;
use tokio_postgres::Row;

use super::{PostgresStore, parse_enum};
use crate::error::{Result, StorageError};
use crate::model::{TaskSetRow, now_ms};
use crate::repository::TaskSetRepository;
use kecs_types::LaunchType;

const COLS: &str = "arn, id, service_arn, cluster_arn, status, task_definition_arn, external_id, \
     launch_type, scale, computed_desired_count, pending_count, running_count, stability_status, \
     tags, region, account_id, created_at, updated_at";

fn from_row(row: &Row) -> Result<TaskSetRow> {
    let launch: String = row.get("launch_type");
    Ok(TaskSetRow {
        arn: row.get("arn"),
        id: row.get("id"),
        service_arn: row.get("service_arn"),
        cluster_arn: row.get("cluster_arn"),
        status: row.get("status"),
        task_definition_arn: row.get("task_definition_arn"),
        external_id: row.get("external_id"),
        launch_type: parse_enum(&launch, LaunchType::parse, "launch type")?,
        scale: row.get("scale"),
        computed_desired_count: row.get("computed_desired_count"),
        pending_count: row.get("pending_count"),
        running_count: row.get("running_count"),
        stability_status: row.get("stability_status"),
        tags: row.get("tags"),
        region: row.get("region"),
        account_id: row.get("account_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl TaskSetRepository for PostgresStore {
    async fn create(&self, row: &TaskSetRow) -> Result<()> {
        let client = self.client().await?;
        client
            .execute(
                "INSERT INTO task_sets (arn, id, service_arn, cluster_arn, status, \
                 task_definition_arn, external_id, launch_type, scale, computed_desired_count, \
                 pending_count, running_count, stability_status, tags, region, account_id, \
                 created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
                 $17, $18)",
                &[
                    &row.arn,
                    &row.id,
                    &row.service_arn,
                    &row.cluster_arn,
                    &row.status,
                    &row.task_definition_arn,
                    &row.external_id,
                    &row.launch_type.as_str(),
                    &row.scale,
                    &row.computed_desired_count,
                    &row.pending_count,
                    &row.running_count,
                    &row.stability_status,
                    &row.tags,
                    &row.region,
                    &row.account_id,
                    &row.created_at,
                    &row.updated_at,
                ],
            )
            .await
            .map_err(|e| StorageError::from(e).constraint_as_exists("task set", row.id.clone()))?;
        Ok(())
    }

    async fn get(&self, service_arn: &str, id_or_arn: &str) -> Result<Option<TaskSetRow>> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                &format!(
                    "SELECT {COLS} FROM task_sets WHERE service_arn = $1 AND (id = $2 OR arn = $2)"
                ),
                &[&service_arn, &id_or_arn],
            )
            .await?;
        row.as_ref().map(from_row).transpose()
    }

    async fn list(&self, service_arn: &str) -> Result<Vec<TaskSetRow>> {
        let client = self.client().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {COLS} FROM task_sets WHERE service_arn = $1 \
                     ORDER BY created_at DESC, id DESC"
                ),
                &[&service_arn],
            )
            .await?;
        rows.iter().map(from_row).collect()
    }

    async fn update(&self, row: &TaskSetRow) -> Result<()> {
        let client = self.client().await?;
        let n = client
            .execute(
                "UPDATE task_sets SET status = $2, scale = $3, computed_desired_count = $4, \
                 pending_count = $5, running_count = $6, stability_status = $7, updated_at = $8 \
                 WHERE arn = $1",
                &[
                    &row.arn,
                    &row.status,
                    &row.scale,
                    &row.computed_desired_count,
                    &row.pending_count,
                    &row.running_count,
                    &row.stability_status,
                    &now_ms(),
                ],
            )
            .await?;
        if n == 0 {
            return Err(StorageError::not_found("task set", row.arn.clone()));
        }
        Ok(())
    }

    async fn delete(&self, arn: &str) -> Result<bool> {
        let client = self.client().await?;
        let n = client
            .execute("DELETE FROM task_sets WHERE arn = $1", &[&arn])
            .await?;
        Ok(n > 0)
    }
}
