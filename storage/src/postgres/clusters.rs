use async_trait::async_trait;
use tokio_postgres::Row;

use super::{PostgresStore, parse_enum};
use crate::error::{Result, StorageError};
use crate::model::{ClusterRow, now_ms};
use crate::repository::ClusterRepository;
use kecs_types::ClusterStatus;

const COLS: &str = "arn, name, status, region, account_id, settings, configuration, tags, \
     capacity_providers, default_capacity_provider_strategy, \
     registered_container_instances_count, running_tasks_count, pending_tasks_count, \
     active_services_count, k3d_cluster, created_at, updated_at";

fn from_row(row: &Row) -> Result<ClusterRow> {
    let status: String = row.get("status");
    Ok(ClusterRow {
        arn: row.get("arn"),
        name: row.get("name"),
        status: parse_enum(&status, ClusterStatus::parse, "cluster status")?,
        region: row.get("region"),
        account_id: row.get("account_id"),
        settings: row.get("settings"),
        configuration: row.get("configuration"),
        tags: row.get("tags"),
        capacity_providers: row.get("capacity_providers"),
        default_capacity_provider_strategy: row.get("default_capacity_provider_strategy"),
        registered_container_instances_count: row.get("registered_container_instances_count"),
        running_tasks_count: row.get("running_tasks_count"),
        pending_tasks_count: row.get("pending_tasks_count"),
        active_services_count: row.get("active_services_count"),
        k3d_cluster: row.get("k3d_cluster"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl ClusterRepository for PostgresStore {
    async fn create(&self, row: &ClusterRow) -> Result<()> {
        let client = self.client().await?;
        client
            .execute(
                "INSERT INTO clusters (arn, name, status, region, account_id, settings, \
                 configuration, tags, capacity_providers, default_capacity_provider_strategy, \
                 registered_container_instances_count, running_tasks_count, pending_tasks_count, \
                 active_services_count, k3d_cluster, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
                &[
                    &row.arn,
                    &row.name,
                    &row.status.as_str(),
                    &row.region,
                    &row.account_id,
                    &row.settings,
                    &row.configuration,
                    &row.tags,
                    &row.capacity_providers,
                    &row.default_capacity_provider_strategy,
                    &row.registered_container_instances_count,
                    &row.running_tasks_count,
                    &row.pending_tasks_count,
                    &row.active_services_count,
                    &row.k3d_cluster,
                    &row.created_at,
                    &row.updated_at,
                ],
            )
            .await
            .map_err(|e| StorageError::from(e).constraint_as_exists("cluster", row.name.clone()))?;
        Ok(())
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<ClusterRow>> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                &format!("SELECT {COLS} FROM clusters WHERE name = $1"),
                &[&name],
            )
            .await?;
        row.as_ref().map(from_row).transpose()
    }

    async fn get_by_arn(&self, arn: &str) -> Result<Option<ClusterRow>> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                &format!("SELECT {COLS} FROM clusters WHERE arn = $1"),
                &[&arn],
            )
            .await?;
        row.as_ref().map(from_row).transpose()
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<ClusterRow>> {
        let client = self.client().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {COLS} FROM clusters ORDER BY created_at DESC, arn DESC \
                     LIMIT $1 OFFSET $2"
                ),
                &[&limit, &offset],
            )
            .await?;
        rows.iter().map(from_row).collect()
    }

    async fn update(&self, row: &ClusterRow) -> Result<()> {
        let client = self.client().await?;
        let n = client
            .execute(
                "UPDATE clusters SET status = $2, settings = $3, configuration = $4, tags = $5, \
                 capacity_providers = $6, default_capacity_provider_strategy = $7, \
                 registered_container_instances_count = $8, running_tasks_count = $9, \
                 pending_tasks_count = $10, active_services_count = $11, k3d_cluster = $12, \
                 updated_at = $13 WHERE arn = $1",
                &[
                    &row.arn,
                    &row.status.as_str(),
                    &row.settings,
                    &row.configuration,
                    &row.tags,
                    &row.capacity_providers,
                    &row.default_capacity_provider_strategy,
                    &row.registered_container_instances_count,
                    &row.running_tasks_count,
                    &row.pending_tasks_count,
                    &row.active_services_count,
                    &row.k3d_cluster,
                    &now_ms(),
                ],
            )
            .await?;
        if n == 0 {
            return Err(StorageError::not_found("cluster", row.arn.clone()));
        }
        Ok(())
    }

    async fn update_counters(
        &self,
        arn: &str,
        running: i32,
        pending: i32,
        active: i32,
    ) -> Result<()> {
        let client = self.client().await?;
        let n = client
            .execute(
                "UPDATE clusters SET running_tasks_count = $2, pending_tasks_count = $3, \
                 active_services_count = $4, updated_at = $5 WHERE arn = $1",
                &[&arn, &running, &pending, &active, &now_ms()],
            )
            .await?;
        if n == 0 {
            return Err(StorageError::not_found("cluster", arn));
        }
        Ok(())
    }

    async fn delete(&self, arn: &str) -> Result<bool> {
        let client = self.client().await?;
        let n = client
            .execute("DELETE FROM clusters WHERE arn = $1", &[&arn])
            .await?;
        Ok(n > 0)
    }
}
