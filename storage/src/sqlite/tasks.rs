use async_trait::async_trait;
use rusqlite::{Row, ToSql, params};

use super::{SqliteStore, json_text, opt_json_text, parse_enum, parse_json, parse_opt_json};
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

fn from_row(row: &Row<'_>) -> Result<TaskRow> {
    let last: String = row.get(6)?;
    let desired: String = row.get(7)?;
    let launch: String = row.get(16)?;
    let health: String = row.get(17)?;
    Ok(TaskRow {
        arn: row.get(0)?,
        id: row.get(1)?,
        cluster_arn: row.get(2)?,
        task_definition_arn: row.get(3)?,
        container_instance_arn: row.get(4)?,
        overrides: parse_opt_json(row.get(5)?)?,
        last_status: parse_enum(&last, TaskStatus::parse, "task status")?,
        desired_status: parse_enum(&desired, TaskStatus::parse, "task status")?,
        cpu: row.get(8)?,
        memory: row.get(9)?,
        containers: parse_json(row.get(10)?)?,
        version: row.get(11)?,
        stop_code: row.get(12)?,
        stopped_reason: row.get(13)?,
        started_by: row.get(14)?,
        group_name: row.get(15)?,
        launch_type: parse_enum(&launch, LaunchType::parse, "launch type")?,
        health_status: parse_enum(&health, HealthStatus::parse, "health status")?,
        attributes: parse_json(row.get(18)?)?,
        attachments: parse_json(row.get(19)?)?,
        capacity_provider_name: row.get(20)?,
        tags: parse_json(row.get(21)?)?,
        pod_name: row.get(22)?,
        pod_namespace: row.get(23)?,
        region: row.get(24)?,
        account_id: row.get(25)?,
        created_at: row.get(26)?,
        started_at: row.get(27)?,
        stopping_at: row.get(28)?,
        stopped_at: row.get(29)?,
        pull_started_at: row.get(30)?,
        pull_stopped_at: row.get(31)?,
        execution_stopped_at: row.get(32)?,
        updated_at: row.get(33)?,
    })
}

fn insert_row(tx: &rusqlite::Transaction<'_>, row: &TaskRow) -> Result<()> {
    tx.execute(
        "INSERT INTO tasks (arn, id, cluster_arn, task_definition_arn, container_instance_arn, \
         overrides, last_status, desired_status, cpu, memory, containers, version, stop_code, \
         stopped_reason, started_by, group_name, launch_type, health_status, attributes, \
         attachments, capacity_provider_name, tags, pod_name, pod_namespace, region, account_id, \
         created_at, started_at, stopping_at, stopped_at, pull_started_at, pull_stopped_at, \
         execution_stopped_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, \
         ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30, ?31, ?32, ?33, ?34)",
        params![
            row.arn,
            row.id,
            row.cluster_arn,
            row.task_definition_arn,
            row.container_instance_arn,
            opt_json_text(&row.overrides),
            row.last_status.as_str(),
            row.desired_status.as_str(),
            row.cpu,
            row.memory,
            json_text(&row.containers),
            row.version,
            row.stop_code,
            row.stopped_reason,
            row.started_by,
            row.group_name,
            row.launch_type.as_str(),
            row.health_status.as_str(),
            json_text(&row.attributes),
            json_text(&row.attachments),
            row.capacity_provider_name,
            json_text(&row.tags),
            row.pod_name,
            row.pod_namespace,
            row.region,
            row.account_id,
            row.created_at,
            row.started_at,
            row.stopping_at,
            row.stopped_at,
            row.pull_started_at,
            row.pull_stopped_at,
            row.execution_stopped_at,
            row.updated_at,
        ],
    )
    .map_err(|e| StorageError::from(e).constraint_as_exists("task", row.arn.clone()))?;
    Ok(())
}

fn query_one(
    conn: &rusqlite::Connection,
    sql: &str,
    args: &[&dyn ToSql],
) -> Result<Option<TaskRow>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(args)?;
    match rows.next()? {
        Some(row) => Ok(Some(from_row(row)?)),
        None => Ok(None),
    }
}

fn query_many(conn: &rusqlite::Connection, sql: &str, args: &[&dyn ToSql]) -> Result<Vec<TaskRow>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(args)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(from_row(row)?);
    }
    Ok(out)
}

#[async_trait]
impl TaskRepository for SqliteStore {
    async fn create_batch(&self, rows: &[TaskRow]) -> Result<()> {
        let rows = rows.to_vec();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            for row in &rows {
                insert_row(&tx, row)?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn get_by_arn(&self, arn: &str) -> Result<Option<TaskRow>> {
        let arn = arn.to_string();
        let sql = format!("SELECT {COLS} FROM tasks WHERE arn = ?1");
        self.call(move |conn| query_one(conn, &sql, &[&arn])).await
    }

    async fn get(&self, cluster_arn: &str, id_or_arn: &str) -> Result<Option<TaskRow>> {
        let cluster_arn = cluster_arn.to_string();
        let id_or_arn = id_or_arn.to_string();
        let sql = format!(
            "SELECT {COLS} FROM tasks WHERE cluster_arn = ?1 AND (arn = ?2 OR id = ?2)"
        );
        self.call(move |conn| query_one(conn, &sql, &[&cluster_arn, &id_or_arn]))
            .await
    }

    async fn list(
        &self,
        cluster_arn: &str,
        filter: &TaskFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TaskRow>> {
        let cluster_arn = cluster_arn.to_string();
        let filter = filter.clone();
        self.call(move |conn| {
            let mut sql = format!("SELECT {COLS} FROM tasks WHERE cluster_arn = ?1");
            let mut args: Vec<Box<dyn ToSql>> = vec![Box::new(cluster_arn)];
            if let Some(status) = &filter.desired_status {
                args.push(Box::new(status.clone()));
                sql.push_str(&format!(" AND desired_status = ?{}", args.len()));
            }
            if let Some(lt) = &filter.launch_type {
                args.push(Box::new(lt.clone()));
                sql.push_str(&format!(" AND launch_type = ?{}", args.len()));
            }
            if let Some(started_by) = &filter.started_by {
                args.push(Box::new(started_by.clone()));
                sql.push_str(&format!(" AND started_by = ?{}", args.len()));
            }
            if let Some(group) = &filter.group {
                args.push(Box::new(group.clone()));
                sql.push_str(&format!(" AND group_name = ?{}", args.len()));
            }
            if let Some(prefix) = &filter.family_arn_prefix {
                args.push(Box::new(format!("{prefix}%")));
                sql.push_str(&format!(" AND task_definition_arn LIKE ?{}", args.len()));
            }
            args.push(Box::new(limit));
            sql.push_str(&format!(
                " ORDER BY created_at DESC, id DESC LIMIT ?{}",
                args.len()
            ));
            args.push(Box::new(offset));
            sql.push_str(&format!(" OFFSET ?{}", args.len()));

            let params: Vec<&dyn ToSql> = args.iter().map(|b| b.as_ref()).collect();
            query_many(conn, &sql, params.as_slice())
        })
        .await
    }

    async fn list_unstopped(&self, cluster_arn: Option<&str>) -> Result<Vec<TaskRow>> {
        let cluster_arn = cluster_arn.map(|s| s.to_string());
        self.call(move |conn| {
            let sql;
            let args: Vec<&dyn ToSql>;
            let arn_holder;
            if let Some(arn) = cluster_arn {
                arn_holder = arn;
                sql = format!(
                    "SELECT {COLS} FROM tasks WHERE cluster_arn = ?1 AND last_status != 'STOPPED'"
                );
                args = vec![&arn_holder];
            } else {
                sql = format!("SELECT {COLS} FROM tasks WHERE last_status != 'STOPPED'");
                args = Vec::new();
            }
            query_many(conn, &sql, args.as_slice())
        })
        .await
    }

    async fn update_with_version(&self, row: &TaskRow) -> Result<()> {
        let row = row.clone();
        self.call(move |conn| {
            let n = conn.execute(
                "UPDATE tasks SET last_status = ?3, desired_status = ?4, containers = ?5, \
                 health_status = ?6, stop_code = ?7, stopped_reason = ?8, pod_name = ?9, \
                 pod_namespace = ?10, started_at = ?11, stopping_at = ?12, stopped_at = ?13, \
                 pull_started_at = ?14, pull_stopped_at = ?15, execution_stopped_at = ?16, \
                 tags = ?17, version = version + 1, updated_at = ?18 \
                 WHERE arn = ?1 AND version = ?2",
                params![
                    row.arn,
                    row.version,
                    row.last_status.as_str(),
                    row.desired_status.as_str(),
                    json_text(&row.containers),
                    row.health_status.as_str(),
                    row.stop_code,
                    row.stopped_reason,
                    row.pod_name,
                    row.pod_namespace,
                    row.started_at,
                    row.stopping_at,
                    row.stopped_at,
                    row.pull_started_at,
                    row.pull_stopped_at,
                    row.execution_stopped_at,
                    json_text(&row.tags),
                    now_ms(),
                ],
            )?;
            if n == 0 {
                let exists: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM tasks WHERE arn = ?1",
                    params![row.arn],
                    |r| r.get(0),
                )?;
                if exists == 0 {
                    return Err(StorageError::not_found("task", row.arn.clone()));
                }
                return Err(StorageError::Conflict(format!(
                    "task {} version {} is stale",
                    row.arn, row.version
                )));
            }
            Ok(())
        })
        .await
    }

    async fn delete(&self, arn: &str) -> Result<bool> {
        let arn = arn.to_string();
        self.call(move |conn| {
            let n = conn.execute("DELETE FROM tasks WHERE arn = ?1", params![arn])?;
            Ok(n > 0)
        })
        .await
    }
}
