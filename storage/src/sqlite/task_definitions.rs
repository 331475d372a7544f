use async_trait::async_trait;
use rusqlite::{Row, ToSql, params};

use super::{SqliteStore, json_text, parse_enum, parse_json};
use crate::error::Result;
use crate::model::{TaskDefinitionRow, now_ms};
use crate::repository::{TaskDefinitionFilter, TaskDefinitionRepository};
use kecs_types::TaskDefinitionStatus;

const COLS: &str = "arn, family, revision, status, region, account_id, container_definitions, \
     volumes, network_mode, requires_compatibilities, cpu, memory, task_role_arn, \
     execution_role_arn, placement_constraints, tags, created_at, deregistered_at";

fn from_row(row: &Row<'_>) -> Result<TaskDefinitionRow> {
    let status: String = row.get(3)?;
    Ok(TaskDefinitionRow {
        arn: row.get(0)?,
        family: row.get(1)?,
        revision: row.get(2)?,
        status: parse_enum(&status, TaskDefinitionStatus::parse, "task definition status")?,
        region: row.get(4)?,
        account_id: row.get(5)?,
        container_definitions: parse_json(row.get(6)?)?,
        volumes: parse_json(row.get(7)?)?,
        network_mode: row.get(8)?,
        requires_compatibilities: parse_json(row.get(9)?)?,
        cpu: row.get(10)?,
        memory: row.get(11)?,
        task_role_arn: row.get(12)?,
        execution_role_arn: row.get(13)?,
        placement_constraints: parse_json(row.get(14)?)?,
        tags: parse_json(row.get(15)?)?,
        created_at: row.get(16)?,
        deregistered_at: row.get(17)?,
    })
}

fn query_one(
    conn: &rusqlite::Connection,
    sql: &str,
    args: &[&dyn ToSql],
) -> Result<Option<TaskDefinitionRow>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(args)?;
    match rows.next()? {
        Some(row) => Ok(Some(from_row(row)?)),
        None => Ok(None),
    }
}

#[async_trait]
impl TaskDefinitionRepository for SqliteStore {
    async fn register(&self, mut row: TaskDefinitionRow) -> Result<TaskDefinitionRow> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let next: i64 = tx.query_row(
                "SELECT COALESCE(MAX(revision), 0) + 1 FROM task_definitions WHERE family = ?1",
                params![row.family],
                |r| r.get(0),
            )?;
            row.revision = next;
            row.arn = format!(
                "arn:aws:ecs:{}:{}:task-definition/{}:{}",
                row.region, row.account_id, row.family, next
            );
            tx.execute(
                "INSERT INTO task_definitions (arn, family, revision, status, region, account_id, \
                 container_definitions, volumes, network_mode, requires_compatibilities, cpu, \
                 memory, task_role_arn, execution_role_arn, placement_constraints, tags, \
                 created_at, deregistered_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
                params![
                    row.arn,
                    row.family,
                    row.revision,
                    row.status.as_str(),
                    row.region,
                    row.account_id,
                    json_text(&row.container_definitions),
                    json_text(&row.volumes),
                    row.network_mode,
                    json_text(&row.requires_compatibilities),
                    row.cpu,
                    row.memory,
                    row.task_role_arn,
                    row.execution_role_arn,
                    json_text(&row.placement_constraints),
                    json_text(&row.tags),
                    row.created_at,
                    row.deregistered_at,
                ],
            )?;
            tx.execute(
                "INSERT INTO task_definition_families (family, latest_revision, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?3) \
                 ON CONFLICT(family) DO UPDATE SET \
                   latest_revision = excluded.latest_revision, updated_at = excluded.updated_at",
                params![row.family, next, row.created_at],
            )?;
            tx.commit()?;
            Ok(row)
        })
        .await
    }

    async fn get(&self, family: &str, revision: i64) -> Result<Option<TaskDefinitionRow>> {
        let family = family.to_string();
        let sql = format!("SELECT {COLS} FROM task_definitions WHERE family = ?1 AND revision = ?2");
        self.call(move |conn| query_one(conn, &sql, &[&family, &revision]))
            .await
    }

    async fn get_by_arn(&self, arn: &str) -> Result<Option<TaskDefinitionRow>> {
        let arn = arn.to_string();
        let sql = format!("SELECT {COLS} FROM task_definitions WHERE arn = ?1");
        self.call(move |conn| query_one(conn, &sql, &[&arn])).await
    }

    async fn latest_revision(
        &self,
        family: &str,
        active_only: bool,
    ) -> Result<Option<TaskDefinitionRow>> {
        let family = family.to_string();
        let sql = if active_only {
            format!(
                "SELECT {COLS} FROM task_definitions WHERE family = ?1 AND status = 'ACTIVE' \
                 ORDER BY revision DESC LIMIT 1"
            )
        } else {
            format!(
                "SELECT {COLS} FROM task_definitions WHERE family = ?1 ORDER BY revision DESC LIMIT 1"
            )
        };
        self.call(move |conn| query_one(conn, &sql, &[&family]))
            .await
    }

    async fn deregister(&self, arn: &str) -> Result<Option<TaskDefinitionRow>> {
        let arn = arn.to_string();
        let sql = format!("SELECT {COLS} FROM task_definitions WHERE arn = ?1");
        self.call(move |conn| {
            let n = conn.execute(
                "UPDATE task_definitions SET status = 'INACTIVE', deregistered_at = ?2 WHERE arn = ?1",
                params![arn, now_ms()],
            )?;
            if n == 0 {
                return Ok(None);
            }
            query_one(conn, &sql, &[&arn])
        })
        .await
    }

    async fn update_tags(&self, arn: &str, tags: &serde_json::Value) -> Result<()> {
        let arn = arn.to_string();
        let tags = tags.to_string();
        self.call(move |conn| {
            let n = conn.execute(
                "UPDATE task_definitions SET tags = ?2 WHERE arn = ?1",
                params![arn, tags],
            )?;
            if n == 0 {
                return Err(crate::error::StorageError::not_found("task definition", arn));
            }
            Ok(())
        })
        .await
    }

    async fn list(
        &self,
        filter: &TaskDefinitionFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TaskDefinitionRow>> {
        let filter = filter.clone();
        self.call(move |conn| {
            let mut sql = format!("SELECT {COLS} FROM task_definitions WHERE 1=1");
            let mut args: Vec<Box<dyn ToSql>> = Vec::new();
            if let Some(prefix) = &filter.family_prefix {
                args.push(Box::new(format!("{}%", like_escape(prefix))));
                sql.push_str(&format!(" AND family LIKE ?{} ESCAPE '\\'", args.len()));
            }
            if let Some(status) = &filter.status {
                if status != "ALL" {
                    args.push(Box::new(status.clone()));
                    sql.push_str(&format!(" AND status = ?{}", args.len()));
                }
            } else {
                sql.push_str(" AND status = 'ACTIVE'");
            }
            args.push(Box::new(limit));
            sql.push_str(&format!(" ORDER BY family ASC, revision ASC LIMIT ?{}", args.len()));
            args.push(Box::new(offset));
            sql.push_str(&format!(" OFFSET ?{}", args.len()));

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn ToSql> = args.iter().map(|b| b.as_ref()).collect();
            let mut rows = stmt.query(params.as_slice())?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(from_row(row)?);
            }
            Ok(out)
        })
        .await
    }

    async fn list_families(
        &self,
        filter: &TaskDefinitionFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<String>> {
        let filter = filter.clone();
        self.call(move |conn| {
            let mut sql = String::from("SELECT family FROM task_definitions WHERE 1=1");
            let mut args: Vec<Box<dyn ToSql>> = Vec::new();
            if let Some(prefix) = &filter.family_prefix {
                args.push(Box::new(format!("{}%", like_escape(prefix))));
                sql.push_str(&format!(" AND family LIKE ?{} ESCAPE '\\'", args.len()));
            }
            sql.push_str(" GROUP BY family");
            match filter.status.as_deref() {
                Some("INACTIVE") => sql.push_str(" HAVING SUM(status = 'ACTIVE') = 0"),
                Some("ALL") => {}
                // AWS defaults family listing to families with an ACTIVE revision.
                _ => sql.push_str(" HAVING SUM(status = 'ACTIVE') > 0"),
            }
            args.push(Box::new(limit));
            sql.push_str(&format!(" ORDER BY family ASC LIMIT ?{}", args.len()));
            args.push(Box::new(offset));
            sql.push_str(&format!(" OFFSET ?{}", args.len()));

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn ToSql> = args.iter().map(|b| b.as_ref()).collect();
            let mut rows = stmt.query(params.as_slice())?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row.get(0)?);
            }
            Ok(out)
        })
        .await
    }
}

fn like_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}
