//! Attributes, account settings and the per-service event ring buffer.

use async_trait::async_trait;
use rusqlite::{ToSql, params};

use super::SqliteStore;
use crate::error::Result;
use crate::model::{AccountSettingRow, AttributeRow, ServiceEventRow};
use crate::repository::{AccountSettingRepository, AttributeRepository, ServiceEventRepository};

/// Events kept per service; older entries are trimmed on append.
const EVENT_BUFFER: i64 = 100;

#[async_trait]
impl AttributeRepository for SqliteStore {
    async fn put(&self, rows: &[AttributeRow]) -> Result<()> {
        let rows = rows.to_vec();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            for row in &rows {
                tx.execute(
                    "INSERT INTO attributes (cluster_arn, name, value, target_type, target_id, \
                     region, account_id) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
                     ON CONFLICT(cluster_arn, target_id, name) DO UPDATE SET \
                       value = excluded.value, target_type = excluded.target_type",
                    params![
                        row.cluster_arn,
                        row.name,
                        row.value,
                        row.target_type,
                        row.target_id,
                        row.region,
                        row.account_id,
                    ],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, rows: &[AttributeRow]) -> Result<()> {
        let rows = rows.to_vec();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            for row in &rows {
                tx.execute(
                    "DELETE FROM attributes WHERE cluster_arn = ?1 AND target_id = ?2 AND name = ?3",
                    params![row.cluster_arn, row.target_id, row.name],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn list(
        &self,
        cluster_arn: &str,
        target_type: Option<&str>,
        name: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AttributeRow>> {
        let cluster_arn = cluster_arn.to_string();
        let target_type = target_type.map(|s| s.to_string());
        let name = name.map(|s| s.to_string());
        self.call(move |conn| {
            let mut sql = String::from(
                "SELECT cluster_arn, name, value, target_type, target_id, region, account_id \
                 FROM attributes WHERE cluster_arn = ?1",
            );
            let mut args: Vec<Box<dyn ToSql>> = vec![Box::new(cluster_arn)];
            if let Some(tt) = target_type {
                args.push(Box::new(tt));
                sql.push_str(&format!(" AND target_type = ?{}", args.len()));
            }
            if let Some(n) = name {
                args.push(Box::new(n));
                sql.push_str(&format!(" AND name = ?{}", args.len()));
            }
            args.push(Box::new(limit));
            sql.push_str(&format!(" ORDER BY target_id, name LIMIT ?{}", args.len()));
            args.push(Box::new(offset));
            sql.push_str(&format!(" OFFSET ?{}", args.len()));

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn ToSql> = args.iter().map(|b| b.as_ref()).collect();
            let mut rows = stmt.query(params.as_slice())?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(AttributeRow {
                    cluster_arn: row.get(0)?,
                    name: row.get(1)?,
                    value: row.get(2)?,
                    target_type: row.get(3)?,
                    target_id: row.get(4)?,
                    region: row.get(5)?,
                    account_id: row.get(6)?,
                });
            }
            Ok(out)
        })
        .await
    }
}

#[async_trait]
impl AccountSettingRepository for SqliteStore {
    async fn put(&self, row: &AccountSettingRow) -> Result<()> {
        let row = row.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO account_settings (principal_arn, name, value) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(principal_arn, name) DO UPDATE SET value = excluded.value",
                params![row.principal_arn, row.name, row.value],
            )?;
            Ok(())
        })
        .await
    }

    async fn get(&self, principal_arn: &str, name: &str) -> Result<Option<AccountSettingRow>> {
        let principal_arn = principal_arn.to_string();
        let name = name.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT principal_arn, name, value FROM account_settings \
                 WHERE principal_arn = ?1 AND name = ?2",
            )?;
            let mut rows = stmt.query(params![principal_arn, name])?;
            match rows.next()? {
                Some(row) => Ok(Some(AccountSettingRow {
                    principal_arn: row.get(0)?,
                    name: row.get(1)?,
                    value: row.get(2)?,
                })),
                None => Ok(None),
            }
        })
        .await
    }

    async fn list(
        &self,
        principal_arn: Option<&str>,
        name: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AccountSettingRow>> {
        let principal_arn = principal_arn.map(|s| s.to_string());
        let name = name.map(|s| s.to_string());
        self.call(move |conn| {
            let mut sql =
                String::from("SELECT principal_arn, name, value FROM account_settings WHERE 1=1");
            let mut args: Vec<Box<dyn ToSql>> = Vec::new();
            if let Some(p) = principal_arn {
                args.push(Box::new(p));
                sql.push_str(&format!(" AND principal_arn = ?{}", args.len()));
            }
            if let Some(n) = name {
                args.push(Box::new(n));
                sql.push_str(&format!(" AND name = ?{}", args.len()));
            }
            args.push(Box::new(limit));
            sql.push_str(&format!(
                " ORDER BY principal_arn, name LIMIT ?{}",
                args.len()
            ));
            args.push(Box::new(offset));
            sql.push_str(&format!(" OFFSET ?{}", args.len()));

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn ToSql> = args.iter().map(|b| b.as_ref()).collect();
            let mut rows = stmt.query(params.as_slice())?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(AccountSettingRow {
                    principal_arn: row.get(0)?,
                    name: row.get(1)?,
                    value: row.get(2)?,
                });
            }
            Ok(out)
        })
        .await
    }

    async fn delete(&self, principal_arn: &str, name: &str) -> Result<bool> {
        let principal_arn = principal_arn.to_string();
        let name = name.to_string();
        self.call(move |conn| {
            let n = conn.execute(
                "DELETE FROM account_settings WHERE principal_arn = ?1 AND name = ?2",
                params![principal_arn, name],
            )?;
            Ok(n > 0)
        })
        .await
    }
}

#[async_trait]
impl ServiceEventRepository for SqliteStore {
    async fn append(&self, row: &ServiceEventRow) -> Result<()> {
        let row = row.clone();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO service_events (id, service_arn, message, created_at) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![row.id, row.service_arn, row.message, row.created_at],
            )?;
            tx.execute(
                "DELETE FROM service_events WHERE service_arn = ?1 AND id NOT IN ( \
                   SELECT id FROM service_events WHERE service_arn = ?1 \
                   ORDER BY created_at DESC, id DESC LIMIT ?2)",
                params![row.service_arn, EVENT_BUFFER],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn list(&self, service_arn: &str, limit: i64) -> Result<Vec<ServiceEventRow>> {
        let service_arn = service_arn.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, service_arn, message, created_at FROM service_events \
                 WHERE service_arn = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2",
            )?;
            let mut rows = stmt.query(params![service_arn, limit])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(ServiceEventRow {
                    id: row.get(0)?,
                    service_arn: row.get(1)?,
                    message: row.get(2)?,
                    created_at: row.get(3)?,
                });
            }
            Ok(out)
        })
        .await
    }

    async fn delete_for_service(&self, service_arn: &str) -> Result<()> {
        let service_arn = service_arn.to_string();
        self.call(move |conn| {
            conn.execute(
                "DELETE FROM service_events WHERE service_arn = ?1",
                params![service_arn],
            )?;
            Ok(())
        })
        .await
    }
}
