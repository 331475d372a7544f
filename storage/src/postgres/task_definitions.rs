use async_trait::async_trait;
use tokio_postgres::Row;
use tokio_postgres::types::ToSql;

use super::{PostgresStore, parse_enum};
use crate::error::{Result, StorageError};
use crate::model::{TaskDefinitionRow, now_ms};
use crate::repository::{TaskDefinitionFilter, TaskDefinitionRepository};
use kecs_types::TaskDefinitionStatus;

const COLS: &str = "arn, family, revision, status, region, account_id, container_definitions, \
     volumes, network_mode, requires_compatibilities, cpu, memory, task_role_arn, \
     execution_role_arn, placement_constraints, tags, created_at, deregistered_at";

fn from_row(row: &Row) -> Result<TaskDefinitionRow> {
    let status: String = row.get("status");
    Ok(TaskDefinitionRow {
        arn: row.get("arn"),
        family: row.get("family"),
        revision: row.get("revision"),
        status: parse_enum(&status, TaskDefinitionStatus::parse, "task definition status")?,
        region: row.get("region"),
        account_id: row.get("account_id"),
        container_definitions: row.get("container_definitions"),
        volumes: row.get("volumes"),
        network_mode: row.get("network_mode"),
        requires_compatibilities: row.get("requires_compatibilities"),
        cpu: row.get("cpu"),
        memory: row.get("memory"),
        task_role_arn: row.get("task_role_arn"),
        execution_role_arn: row.get("execution_role_arn"),
        placement_constraints: row.get("placement_constraints"),
        tags: row.get("tags"),
        created_at: row.get("created_at"),
        deregistered_at: row.get("deregistered_at"),
    })
}

#[async_trait]
impl TaskDefinitionRepository for PostgresStore {
    async fn register(&self, row: TaskDefinitionRow) -> Result<TaskDefinitionRow> {
        // Concurrent registrations of one family race on MAX(revision); the
        // (family, revision) unique constraint catches the loser, which
        // retries with a fresh read.
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_register(row.clone()).await {
                Err(StorageError::Conflict(_)) if attempt < 3 => continue,
                other => return other,
            }
        }
    }

    async fn get(&self, family: &str, revision: i64) -> Result<Option<TaskDefinitionRow>> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                &format!("SELECT {COLS} FROM task_definitions WHERE family = $1 AND revision = $2"),
                &[&family, &revision],
            )
            .await?;
        row.as_ref().map(from_row).transpose()
    }

    async fn get_by_arn(&self, arn: &str) -> Result<Option<TaskDefinitionRow>> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                &format!("SELECT {COLS} FROM task_definitions WHERE arn = $1"),
                &[&arn],
            )
            .await?;
        row.as_ref().map(from_row).transpose()
    }

    async fn latest_revision(
        &self,
        family: &str,
        active_only: bool,
    ) -> Result<Option<TaskDefinitionRow>> {
        let client = self.client().await?;
        let sql = if active_only {
            format!(
                "SELECT {COLS} FROM task_definitions WHERE family = $1 AND status = 'ACTIVE' \
                 ORDER BY revision DESC LIMIT 1"
            )
        } else {
            format!(
                "SELECT {COLS} FROM task_definitions WHERE family = $1 \
                 ORDER BY revision DESC LIMIT 1"
            )
        };
        let row = client.query_opt(&sql, &[&family]).await?;
        row.as_ref().map(from_row).transpose()
    }

    async fn deregister(&self, arn: &str) -> Result<Option<TaskDefinitionRow>> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                &format!(
                    "UPDATE task_definitions SET status = 'INACTIVE', deregistered_at = $2 \
                     WHERE arn = $1 RETURNING {COLS}"
                ),
                &[&arn, &now_ms()],
            )
            .await?;
        row.as_ref().map(from_row).transpose()
    }

    async fn update_tags(&self, arn: &str, tags: &serde_json::Value) -> Result<()> {
        let client = self.client().await?;
        let n = client
            .execute(
                "UPDATE task_definitions SET tags = $2 WHERE arn = $1",
                &[&arn, tags],
            )
            .await?;
        if n == 0 {
            return Err(StorageError::not_found("task definition", arn));
        }
        Ok(())
    }

    async fn list(
        &self,
        filter: &TaskDefinitionFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TaskDefinitionRow>> {
        let client = self.client().await?;
        let mut sql = format!("SELECT {COLS} FROM task_definitions WHERE 1=1");
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();
        let prefix_like = filter.family_prefix.as_ref().map(|p| format!("{p}%"));
        if let Some(like) = &prefix_like {
            params.push(like);
            sql.push_str(&format!(" AND family LIKE ${}", params.len()));
        }
        match filter.status.as_deref() {
            Some("ALL") => {}
            Some(_) => {
                params.push(filter.status.as_ref().unwrap());
                sql.push_str(&format!(" AND status = ${}", params.len()));
            }
            None => sql.push_str(" AND status = 'ACTIVE'"),
        }
        params.push(&limit);
        sql.push_str(&format!(
            " ORDER BY family ASC, revision ASC LIMIT ${}",
            params.len()
        ));
        params.push(&offset);
        sql.push_str(&format!(" OFFSET ${}", params.len()));

        let rows = client.query(&sql, &params).await?;
        rows.iter().map(from_row).collect()
    }

    async fn list_families(
        &self,
        filter: &TaskDefinitionFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<String>> {
        let client = self.client().await?;
        let mut sql = String::from("SELECT family FROM task_definitions WHERE 1=1");
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();
        let prefix_like = filter.family_prefix.as_ref().map(|p| format!("{p}%"));
        if let Some(like) = &prefix_like {
            params.push(like);
            sql.push_str(&format!(" AND family LIKE ${}", params.len()));
        }
        sql.push_str(" GROUP BY family");
        match filter.status.as_deref() {
            Some("INACTIVE") => {
                sql.push_str(" HAVING COUNT(*) FILTER (WHERE status = 'ACTIVE') = 0")
            }
            Some("ALL") => {}
            _ => sql.push_str(" HAVING COUNT(*) FILTER (WHERE status = 'ACTIVE') > 0"),
        }
        params.push(&limit);
        sql.push_str(&format!(" ORDER BY family ASC LIMIT ${}", params.len()));
        params.push(&offset);
        sql.push_str(&format!(" OFFSET ${}", params.len()));

        let rows = client.query(&sql, &params).await?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }
}

impl PostgresStore {
    async fn try_register(&self, mut row: TaskDefinitionRow) -> Result<TaskDefinitionRow> {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;
        let next: i64 = tx
            .query_one(
                "SELECT COALESCE(MAX(revision), 0) + 1 FROM task_definitions WHERE family = $1",
                &[&row.family],
            )
            .await?
            .get(0);
        row.revision = next;
        row.arn = format!(
            "arn:aws:ecs:{}:{}:task-definition/{}:{}",
            row.region, row.account_id, row.family, next
        );
        tx.execute(
            "INSERT INTO task_definitions (arn, family, revision, status, region, account_id, \
             container_definitions, volumes, network_mode, requires_compatibilities, cpu, memory, \
             task_role_arn, execution_role_arn, placement_constraints, tags, created_at, \
             deregistered_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)",
            &[
                &row.arn,
                &row.family,
                &row.revision,
                &row.status.as_str(),
                &row.region,
                &row.account_id,
                &row.container_definitions,
                &row.volumes,
                &row.network_mode,
                &row.requires_compatibilities,
                &row.cpu,
                &row.memory,
                &row.task_role_arn,
                &row.execution_role_arn,
                &row.placement_constraints,
                &row.tags,
                &row.created_at,
                &row.deregistered_at,
            ],
        )
        .await?;
        tx.execute(
            "INSERT INTO task_definition_families (family, latest_revision, created_at, updated_at) \
             VALUES ($1, $2, $3, $3) \
             ON CONFLICT (family) DO UPDATE SET \
               latest_revision = EXCLUDED.latest_revision, updated_at = EXCLUDED.updated_at",
            &[&row.family, &next, &row.created_at],
        )
        .await?;
        tx.commit().await?;
        Ok(row)
    }
}
