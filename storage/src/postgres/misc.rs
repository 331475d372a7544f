//! Attributes, account settings and the per-service event ring buffer.

use async_trait::async_trait;
use tokio_postgres::types::ToSql;

use super::PostgresStore;
use crate::error::Result;
use crate::model::{AccountSettingRow, AttributeRow, ServiceEventRow};
use crate::repository::{AccountSettingRepository, AttributeRepository, ServiceEventRepository};

const EVENT_BUFFER: i64 = 100;

#[async_trait]
impl AttributeRepository for PostgresStore {
    async fn put(&self, rows: &[AttributeRow]) -> Result<()> {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;
        for row in rows {
            tx.execute(
                "INSERT INTO attributes (cluster_arn, name, value, target_type, target_id, \
                 region, account_id) VALUES ($1, $2, $3, $4, $5, $6, $7) \
                 ON CONFLICT (cluster_arn, target_id, name) DO UPDATE SET \
                   value = EXCLUDED.value, target_type = EXCLUDED.target_type",
                &[
                    &row.cluster_arn,
                    &row.name,
                    &row.value,
                    &row.target_type,
                    &row.target_id,
                    &row.region,
                    &row.account_id,
                ],
            )
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, rows: &[AttributeRow]) -> Result<()> {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;
        for row in rows {
            tx.execute(
                "DELETE FROM attributes WHERE cluster_arn = $1 AND target_id = $2 AND name = $3",
                &[&row.cluster_arn, &row.target_id, &row.name],
            )
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list(
        &self,
        cluster_arn: &str,
        target_type: Option<&str>,
        name: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AttributeRow>> {
        let client = self.client().await?;
        let cluster_arn = cluster_arn.to_string();
        let mut sql = String::from(
            "SELECT cluster_arn, name, value, target_type, target_id, region, account_id \
             FROM attributes WHERE cluster_arn = $1",
        );
        let target_type = target_type.map(|s| s.to_string());
        let name = name.map(|s| s.to_string());
        let mut params: Vec<&(dyn ToSql + Sync)> = vec![&cluster_arn];
        if let Some(tt) = &target_type {
            params.push(tt);
            sql.push_str(&format!(" AND target_type = ${}", params.len()));
        }
        if let Some(n) = &name {
            params.push(n);
            sql.push_str(&format!(" AND name = ${}", params.len()));
        }
        params.push(&limit);
        sql.push_str(&format!(" ORDER BY target_id, name LIMIT ${}", params.len()));
        params.push(&offset);
        sql.push_str(&format!(" OFFSET ${}", params.len()));

        let rows = client.query(&sql, &params).await?;
        Ok(rows
            .iter()
            .map(|row| AttributeRow {
                cluster_arn: row.get("cluster_arn"),
                name: row.get("name"),
                value: row.get("value"),
                target_type: row.get("target_type"),
                target_id: row.get("target_id"),
                region: row.get("region"),
                account_id: row.get("account_id"),
            })
            .collect())
    }
}

#[async_trait]
impl AccountSettingRepository for PostgresStore {
    async fn put(&self, row: &AccountSettingRow) -> Result<()> {
        let client = self.client().await?;
        client
            .execute(
                "INSERT INTO account_settings (principal_arn, name, value) VALUES ($1, $2, $3) \
                 ON CONFLICT (principal_arn, name) DO UPDATE SET value = EXCLUDED.value",
                &[&row.principal_arn, &row.name, &row.value],
            )
            .await?;
        Ok(())
    }

    async fn get(&self, principal_arn: &str, name: &str) -> Result<Option<AccountSettingRow>> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT principal_arn, name, value FROM account_settings \
                 WHERE principal_arn = $1 AND name = $2",
                &[&principal_arn, &name],
            )
            .await?;
        Ok(row.map(|r| AccountSettingRow {
            principal_arn: r.get("principal_arn"),
            name: r.get("name"),
            value: r.get("value"),
        }))
    }

    async fn list(
        &self,
        principal_arn: Option<&str>,
        name: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AccountSettingRow>> {
        let client = self.client().await?;
        let mut sql =
            String::from("SELECT principal_arn, name, value FROM account_settings WHERE 1=1");
        let principal_arn = principal_arn.map(|s| s.to_string());
        let name = name.map(|s| s.to_string());
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();
        if let Some(p) = &principal_arn {
            params.push(p);
            sql.push_str(&format!(" AND principal_arn = ${}", params.len()));
        }
        if let Some(n) = &name {
            params.push(n);
            sql.push_str(&format!(" AND name = ${}", params.len()));
        }
        params.push(&limit);
        sql.push_str(&format!(
            " ORDER BY principal_arn, name LIMIT ${}",
            params.len()
        ));
        params.push(&offset);
        sql.push_str(&format!(" OFFSET ${}", params.len()));

        let rows = client.query(&sql, &params).await?;
        Ok(rows
            .iter()
            .map(|r| AccountSettingRow {
                principal_arn: r.get("principal_arn"),
                name: r.get("name"),
                value: r.get("value"),
            })
            .collect())
    }

    async fn delete(&self, principal_arn: &str, name: &str) -> Result<bool> {
        let client = self.client().await?;
        let n = client
            .execute(
                "DELETE FROM account_settings WHERE principal_arn = $1 AND name = $2",
                &[&principal_arn, &name],
            )
            .await?;
        Ok(n > 0)
    }
}

#[async_trait]
impl ServiceEventRepository for PostgresStore {
    async fn append(&self, row: &ServiceEventRow) -> Result<()> {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;
        tx.execute(
            "INSERT INTO service_events (id, service_arn, message, created_at) \
             VALUES ($1, $2, $3, $4)",
            &[&row.id, &row.service_arn, &row.message, &row.created_at],
        )
        .await?;
        tx.execute(
            "DELETE FROM service_events WHERE service_arn = $1 AND id NOT IN ( \
               SELECT id FROM service_events WHERE service_arn = $1 \
               ORDER BY created_at DESC, id DESC LIMIT $2)",
            &[&row.service_arn, &EVENT_BUFFER],
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn list(&self, service_arn: &str, limit: i64) -> Result<Vec<ServiceEventRow>> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT id, service_arn, message, created_at FROM service_events \
                 WHERE service_arn = $1 ORDER BY created_at DESC, id DESC LIMIT $2",
                &[&service_arn, &limit],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|r| ServiceEventRow {
                id: r.get("id"),
                service_arn: r.get("service_arn"),
                message: r.get("message"),
                created_at: r.get("created_at"),
            })
            .collect())
    }

    async fn delete_for_service(&self, service_arn: &str) -> Result<()> {
        let client = self.client().await?;
        client
            .execute(
                "DELETE FROM service_events WHERE service_arn = $1",
                &[&service_arn],
            )
            .await?;
        Ok(())
    }
}
