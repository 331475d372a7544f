use async_trait::async_trait;
use rusqlite::{Row, ToSql, params};

use super::{SqliteStore, json_text, parse_enum, parse_json};
use crate::error::{Result, StorageError};
use crate::model::{TaskSetRow, now_ms};
use crate::repository::TaskSetRepository;
use kecs_types::LaunchType;

const COLS: &str = "arn, id, service_arn, cluster_arn, status, task_definition_arn, external_id, \
     launch_type, scale, computed_desired_count, pending_count, running_count, stability_status, \
     tags, region, account_id, created_at, updated_at";

fn from_row(row: &Row<'_>) -> Result<TaskSetRow> {
    let launch: String = row.get(7)?;
    Ok(TaskSetRow {
        arn: row.get(0)?,
        id: row.get(1)?,
        service_arn: row.get(2)?,
        cluster_arn: row.get(3)?,
        status: row.get(4)?,
        task_definition_arn: row.get(5)?,
        external_id: row.get(6)?,
        launch_type: parse_enum(&launch, LaunchType::parse, "launch type")?,
        scale: parse_json(row.get(8)?)?,
        computed_desired_count: row.get(9)?,
        pending_count: row.get(10)?,
        running_count: row.get(11)?,
        stability_status: row.get(12)?,
        tags: parse_json(row.get(13)?)?,
        region: row.get(14)?,
        account_id: row.get(15)?,
        created_at: row.get(16)?,
        updated_at: row.get(17)?,
    })
}

#[async_trait]
impl TaskSetRepository for SqliteStore {
    async fn create(&self, row: &TaskSetRow) -> Result<()> {
        let row = row.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO task_sets (arn, id, service_arn, cluster_arn, status, \
                 task_definition_arn, external_id, launch_type, scale, computed_desired_count, \
                 pending_count, running_count, stability_status, tags, region, account_id, \
                 created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
                params![
                    row.arn,
                    row.id,
                    row.service_arn,
                    row.cluster_arn,
                    row.status,
                    row.task_definition_arn,
                    row.external_id,
                    row.launch_type.as_str(),
                    json_text(&row.scale),
                    row.computed_desired_count,
                    row.pending_count,
                    row.running_count,
                    row.stability_status,
                    json_text(&row.tags),
                    row.region,
                    row.account_id,
                    row.created_at,
                    row.updated_at,
                ],
            )
            .map_err(|e| StorageError::from(e).constraint_as_exists("task set", row.id.clone()))?;
            Ok(())
        })
        .await
    }

    async fn get(&self, service_arn: &str, id_or_arn: &str) -> Result<Option<TaskSetRow>> {
        let service_arn = service_arn.to_string();
        let id_or_arn = id_or_arn.to_string();
        let sql = format!(
            "SELECT {COLS} FROM task_sets WHERE service_arn = ?1 AND (id = ?2 OR arn = ?2)"
        );
        self.call(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let args: &[&dyn ToSql] = &[&service_arn, &id_or_arn];
            let mut rows = stmt.query(args)?;
            match rows.next()? {
                Some(row) => Ok(Some(from_row(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn list(&self, service_arn: &str) -> Result<Vec<TaskSetRow>> {
        let service_arn = service_arn.to_string();
        let sql = format!(
            "SELECT {COLS} FROM task_sets WHERE service_arn = ?1 ORDER BY created_at DESC, id DESC"
        );
        self.call(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![service_arn])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(from_row(row)?);
            }
            Ok(out)
        })
        .await
    }

    async fn update(&self, row: &TaskSetRow) -> Result<()> {
        let row = row.clone();
        self.call(move |conn| {
            let n = conn.execute(
                "UPDATE task_sets SET status = ?2, scale = ?3, computed_desired_count = ?4, \
                 pending_count = ?5, running_count = ?6, stability_status = ?7, updated_at = ?8 \
                 WHERE arn = ?1",
                params![
                    row.arn,
                    row.status,
                    json_text(&row.scale),
                    row.computed_desired_count,
                    row.pending_count,
                    row.running_count,
                    row.stability_status,
                    now_ms(),
                ],
            )?;
            if n == 0 {
                return Err(StorageError::not_found("task set", row.arn.clone()));
            }
            Ok(())
        })
        .await
    }

    async fn delete(&self, arn: &str) -> Result<bool> {
        let arn = arn.to_string();
        self.call(move |conn| {
            let n = conn.execute("DELETE FROM task_sets WHERE arn = ?1", params![arn])?;
            Ok(n > 0)
        })
        .await
    }
}
