use async_trait::async_trait;
use rusqlite::{Row, params};

use super::{SqliteStore, json_text, opt_json_text, parse_enum, parse_json, parse_opt_json};
use crate::error::{Result, StorageError};
use crate::model::{ClusterRow, now_ms};
use crate::repository::ClusterRepository;
use kecs_types::ClusterStatus;

const COLS: &str = "arn, name, status, region, account_id, settings, configuration, tags, \
     capacity_providers, default_capacity_provider_strategy, \
     registered_container_instances_count, running_tasks_count, pending_tasks_count, \
     active_services_count, k3d_cluster, created_at, updated_at";

fn from_row(row: &Row<'_>) -> Result<ClusterRow> {
    let status: String = row.get(2)?;
    Ok(ClusterRow {
        arn: row.get(0)?,
        name: row.get(1)?,
        status: parse_enum(&status, ClusterStatus::parse, "cluster status")?,
        region: row.get(3)?,
        account_id: row.get(4)?,
        settings: parse_json(row.get(5)?)?,
        configuration: parse_opt_json(row.get(6)?)?,
        tags: parse_json(row.get(7)?)?,
        capacity_providers: parse_json(row.get(8)?)?,
        default_capacity_provider_strategy: parse_json(row.get(9)?)?,
        registered_container_instances_count: row.get(10)?,
        running_tasks_count: row.get(11)?,
        pending_tasks_count: row.get(12)?,
        active_services_count: row.get(13)?,
        k3d_cluster: row.get(14)?,
        created_at: row.get(15)?,
        updated_at: row.get(16)?,
    })
}

fn get_one(conn: &rusqlite::Connection, sql: &str, key: &str) -> Result<Option<ClusterRow>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params![key])?;
    match rows.next()? {
        Some(row) => Ok(Some(from_row(row)?)),
        None => Ok(None),
    }
}

#[async_trait]
impl ClusterRepository for SqliteStore {
    async fn create(&self, row: &ClusterRow) -> Result<()> {
        let row = row.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO clusters (arn, name, status, region, account_id, settings, \
                 configuration, tags, capacity_providers, default_capacity_provider_strategy, \
                 registered_container_instances_count, running_tasks_count, pending_tasks_count, \
                 active_services_count, k3d_cluster, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                params![
                    row.arn,
                    row.name,
                    row.status.as_str(),
                    row.region,
                    row.account_id,
                    json_text(&row.settings),
                    opt_json_text(&row.configuration),
                    json_text(&row.tags),
                    json_text(&row.capacity_providers),
                    json_text(&row.default_capacity_provider_strategy),
                    row.registered_container_instances_count,
                    row.running_tasks_count,
                    row.pending_tasks_count,
                    row.active_services_count,
                    row.k3d_cluster,
                    row.created_at,
                    row.updated_at,
                ],
            )
            .map_err(|e| StorageError::from(e).constraint_as_exists("cluster", row.name.clone()))?;
            Ok(())
        })
        .await
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<ClusterRow>> {
        let name = name.to_string();
        let sql = format!("SELECT {COLS} FROM clusters WHERE name = ?1");
        self.call(move |conn| get_one(conn, &sql, &name)).await
    }

    async fn get_by_arn(&self, arn: &str) -> Result<Option<ClusterRow>> {
        let arn = arn.to_string();
        let sql = format!("SELECT {COLS} FROM clusters WHERE arn = ?1");
        self.call(move |conn| get_one(conn, &sql, &arn)).await
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<ClusterRow>> {
        let sql =
            format!("SELECT {COLS} FROM clusters ORDER BY created_at DESC, arn DESC LIMIT ?1 OFFSET ?2");
        self.call(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![limit, offset])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(from_row(row)?);
            }
            Ok(out)
        })
        .await
    }

    async fn update(&self, row: &ClusterRow) -> Result<()> {
        let row = row.clone();
        self.call(move |conn| {
            let n = conn.execute(
                "UPDATE clusters SET status = ?2, settings = ?3, configuration = ?4, tags = ?5, \
                 capacity_providers = ?6, default_capacity_provider_strategy = ?7, \
                 registered_container_instances_count = ?8, running_tasks_count = ?9, \
                 pending_tasks_count = ?10, active_services_count = ?11, k3d_cluster = ?12, \
                 updated_at = ?13 WHERE arn = ?1",
                params![
                    row.arn,
                    row.status.as_str(),
                    json_text(&row.settings),
                    opt_json_text(&row.configuration),
                    json_text(&row.tags),
                    json_text(&row.capacity_providers),
                    json_text(&row.default_capacity_provider_strategy),
                    row.registered_container_instances_count,
                    row.running_tasks_count,
                    row.pending_tasks_count,
                    row.active_services_count,
                    row.k3d_cluster,
                    now_ms(),
                ],
            )?;
            if n == 0 {
                return Err(StorageError::not_found("cluster", row.arn.clone()));
            }
            Ok(())
        })
        .await
    }

    async fn update_counters(
        &self,
        arn: &str,
        running: i32,
        pending: i32,
        active: i32,
    ) -> Result<()> {
        let arn = arn.to_string();
        self.call(move |conn| {
            let n = conn.execute(
                "UPDATE clusters SET running_tasks_count = ?2, pending_tasks_count = ?3, \
                 active_services_count = ?4, updated_at = ?5 WHERE arn = ?1",
                params![arn, running, pending, active, now_ms()],
            )?;
            if n == 0 {
                return Err(StorageError::not_found("cluster", arn));
            }
            Ok(())
        })
        .await
    }

    async fn delete(&self, arn: &str) -> Result<bool> {
        let arn = arn.to_string();
        self.call(move |conn| {
            let n = conn.execute("DELETE FROM clusters WHERE arn = ?1", params![arn])?;
            Ok(n > 0)
        })
        .await
    }
}
