//! Client/server driver backed by PostgreSQL.
//!
//! JSON-typed fields use JSONB columns and map straight to
//! `serde_json::Value`; timestamps stay BIGINT milliseconds so both drivers
//! agree on what the domain layer sees.

mod clusters;
mod misc;
mod schema;
mod services;
mod task_definitions;
mod task_sets;
mod tasks;

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::NoTls;

use crate::error::{Result, StorageError};
use crate::repository::StorePing;

pub struct PostgresStore {
    pool: Pool,
}

impl PostgresStore {
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pg_config: tokio_postgres::Config = dsn
            .parse()
            .map_err(|e| StorageError::Invalid(format!("bad postgres dsn: {e}")))?;
        let mgr = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = Pool::builder(mgr)
            .max_size(16)
            .build()
            .map_err(|e| StorageError::Database(format!("failed to build pool: {e}")))?;

        let store = PostgresStore { pool };
        schema::init(&store.pool).await?;
        Ok(store)
    }

    pub(crate) async fn client(&self) -> Result<deadpool_postgres::Object> {
        Ok(self.pool.get().await?)
    }
}

#[async_trait]
impl StorePing for PostgresStore {
    async fn ping(&self) -> Result<()> {
        let client = self.client().await?;
        client.query_one("SELECT 1", &[]).await?;
        Ok(())
    }
}

pub(crate) fn parse_enum<T>(
    raw: &str,
    parse: fn(&str) -> Option<T>,
    what: &'static str,
) -> Result<T> {
    parse(raw).ok_or_else(|| StorageError::Database(format!("corrupt {what} column: {raw:?}")))
}
