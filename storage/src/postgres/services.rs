use async_trait::async_trait;
use tokio_postgres::Row;
use tokio_postgres::types::ToSql;

use super::{PostgresStore, parse_enum};
use crate::error::{Result, StorageError};
use crate::model::{ServiceRow, now_ms};
use crate::repository::{ServiceFilter, ServiceRepository};
use kecs_types::{DeploymentControllerType, LaunchType, SchedulingStrategy, ServiceStatus};

const COLS: &str = "arn, name, cluster_arn, task_definition_arn, desired_count, running_count, \
     pending_count, status, launch_type, scheduling_strategy, deployment_controller_type, \
     load_balancers, service_registries, network_configuration, deployment_configuration, \
     placement_constraints, placement_strategy, tags, enable_ecs_managed_tags, propagate_tags, \
     enable_execute_command, primary_task_set_id, deployment_name, namespace, region, \
     account_id, created_at, updated_at";

fn from_row(row: &Row) -> Result<ServiceRow> {
    let status: String = row.get("status");
    let launch: String = row.get("launch_type");
    let strategy: String = row.get("scheduling_strategy");
    let controller: String = row.get("deployment_controller_type");
    Ok(ServiceRow {
        arn: row.get("arn"),
        name: row.get("name"),
        cluster_arn: row.get("cluster_arn"),
        task_definition_arn: row.get("task_definition_arn"),
        desired_count: row.get("desired_count"),
        running_count: row.get("running_count"),
        pending_count: row.get("pending_count"),
        status: parse_enum(&status, ServiceStatus::parse, "service status")?,
        launch_type: parse_enum(&launch, LaunchType::parse, "launch type")?,
        scheduling_strategy: parse_enum(&strategy, SchedulingStrategy::parse, "scheduling strategy")?,
        deployment_controller_type: parse_enum(
            &controller,
            DeploymentControllerType::parse,
            "deployment controller",
        )?,
        load_balancers: row.get("load_balancers"),
        service_registries: row.get("service_registries"),
        network_configuration: row.get("network_configuration"),
        deployment_configuration: row.get("deployment_configuration"),
        placement_constraints: row.get("placement_constraints"),
        placement_strategy: row.get("placement_strategy"),
        tags: row.get("tags"),
        enable_ecs_managed_tags: row.get("enable_ecs_managed_tags"),
        propagate_tags: row.get("propagate_tags"),
        enable_execute_command: row.get("enable_execute_command"),
        primary_task_set_id: row.get("primary_task_set_id"),
        deployment_name: row.get("deployment_name"),
        namespace: row.get("namespace"),
        region: row.get("region"),
        account_id: row.get("account_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl ServiceRepository for PostgresStore {
    async fn create(&self, row: &ServiceRow) -> Result<()> {
        let client = self.client().await?;
        client
            .execute(
                "INSERT INTO services (arn, name, cluster_arn, task_definition_arn, desired_count, \
                 running_count, pending_count, status, launch_type, scheduling_strategy, \
                 deployment_controller_type, load_balancers, service_registries, \
                 network_configuration, deployment_configuration, placement_constraints, \
                 placement_strategy, tags, enable_ecs_managed_tags, propagate_tags, \
                 enable_execute_command, primary_task_set_id, deployment_name, namespace, region, \
                 account_id, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
                 $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28)",
                &[
                    &row.arn,
                    &row.name,
                    &row.cluster_arn,
                    &row.task_definition_arn,
                    &row.desired_count,
                    &row.running_count,
                    &row.pending_count,
                    &row.status.as_str(),
                    &row.launch_type.as_str(),
                    &row.scheduling_strategy.as_str(),
                    &row.deployment_controller_type.as_str(),
                    &row.load_balancers,
                    &row.service_registries,
                    &row.network_configuration,
                    &row.deployment_configuration,
                    &row.placement_constraints,
                    &row.placement_strategy,
                    &row.tags,
                    &row.enable_ecs_managed_tags,
                    &row.propagate_tags,
                    &row.enable_execute_command,
                    &row.primary_task_set_id,
                    &row.deployment_name,
                    &row.namespace,
                    &row.region,
                    &row.account_id,
                    &row.created_at,
                    &row.updated_at,
                ],
            )
            .await
            .map_err(|e| StorageError::from(e).constraint_as_exists("service", row.name.clone()))?;
        Ok(())
    }

    async fn get(&self, cluster_arn: &str, name: &str) -> Result<Option<ServiceRow>> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                &format!("SELECT {COLS} FROM services WHERE cluster_arn = $1 AND name = $2"),
                &[&cluster_arn, &name],
            )
            .await?;
        row.as_ref().map(from_row).transpose()
    }

    async fn get_by_arn(&self, arn: &str) -> Result<Option<ServiceRow>> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                &format!("SELECT {COLS} FROM services WHERE arn = $1"),
                &[&arn],
            )
            .await?;
        row.as_ref().map(from_row).transpose()
    }

    async fn list(
        &self,
        cluster_arn: &str,
        filter: &ServiceFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ServiceRow>> {
        let client = self.client().await?;
        let mut sql = format!("SELECT {COLS} FROM services WHERE cluster_arn = $1");
        let cluster_arn = cluster_arn.to_string();
        let mut params: Vec<&(dyn ToSql + Sync)> = vec![&cluster_arn];
        if let Some(lt) = &filter.launch_type {
            params.push(lt);
            sql.push_str(&format!(" AND launch_type = ${}", params.len()));
        }
        if let Some(st) = &filter.scheduling_strategy {
            params.push(st);
            sql.push_str(&format!(" AND scheduling_strategy = ${}", params.len()));
        }
        params.push(&limit);
        sql.push_str(&format!(
            " ORDER BY created_at DESC, arn DESC LIMIT ${}",
            params.len()
        ));
        params.push(&offset);
        sql.push_str(&format!(" OFFSET ${}", params.len()));

        let rows = client.query(&sql, &params).await?;
        rows.iter().map(from_row).collect()
    }

    async fn list_all(&self) -> Result<Vec<ServiceRow>> {
        let client = self.client().await?;
        let rows = client
            .query(
                &format!("SELECT {COLS} FROM services ORDER BY created_at DESC, arn DESC"),
                &[],
            )
            .await?;
        rows.iter().map(from_row).collect()
    }

    async fn update(&self, row: &ServiceRow) -> Result<()> {
        let client = self.client().await?;
        let n = client
            .execute(
                "UPDATE services SET task_definition_arn = $2, desired_count = $3, \
                 running_count = $4, pending_count = $5, status = $6, load_balancers = $7, \
                 service_registries = $8, network_configuration = $9, \
                 deployment_configuration = $10, placement_constraints = $11, \
                 placement_strategy = $12, tags = $13, propagate_tags = $14, \
                 primary_task_set_id = $15, updated_at = $16 WHERE arn = $1",
                &[
                    &row.arn,
                    &row.task_definition_arn,
                    &row.desired_count,
                    &row.running_count,
                    &row.pending_count,
                    &row.status.as_str(),
                    &row.load_balancers,
                    &row.service_registries,
                    &row.network_configuration,
                    &row.deployment_configuration,
                    &row.placement_constraints,
                    &row.placement_strategy,
                    &row.tags,
                    &row.propagate_tags,
                    &row.primary_task_set_id,
                    &now_ms(),
                ],
            )
            .await?;
        if n == 0 {
            return Err(StorageError::not_found("service", row.arn.clone()));
        }
        Ok(())
    }

    async fn update_counters(&self, arn: &str, running: i32, pending: i32) -> Result<()> {
        let client = self.client().await?;
        let n = client
            .execute(
                "UPDATE services SET running_count = $2, pending_count = $3, updated_at = $4 \
                 WHERE arn = $1",
                &[&arn, &running, &pending, &now_ms()],
            )
            .await?;
        if n == 0 {
            return Err(StorageError::not_found("service", arn));
        }
        Ok(())
    }

    async fn delete(&self, arn: &str) -> Result<bool> {
        let client = self.client().await?;
        let n = client
            .execute("DELETE FROM services WHERE arn = $1", &[&arn])
            .await?;
        Ok(n > 0)
    }

    async fn count_active_by_cluster(&self, cluster_arn: &str) -> Result<i64> {
        let client = self.client().await?;
        let row = client
            .query_one(
                "SELECT COUNT(*) FROM services WHERE cluster_arn = $1 AND status = 'ACTIVE'",
                &[&cluster_arn],
            )
            .await?;
        Ok(row.get(0))
    }
}
