mod error;
mod model;
mod repository;

pub mod postgres;
pub mod sqlite;

use std::sync::Arc;

pub use error::{Result, StorageError};
pub use model::*;
pub use repository::*;

/// Handle to the state store: one repository per entity, plus a liveness
/// probe. Cheap to clone; injected into the API layer and the operator.
#[derive(Clone)]
pub struct Storage {
    pub clusters: Arc<dyn ClusterRepository>,
    pub task_definitions: Arc<dyn TaskDefinitionRepository>,
    pub services: Arc<dyn ServiceRepository>,
    pub tasks: Arc<dyn TaskRepository>,
    pub task_sets: Arc<dyn TaskSetRepository>,
    pub attributes: Arc<dyn AttributeRepository>,
    pub account_settings: Arc<dyn AccountSettingRepository>,
    pub service_events: Arc<dyn ServiceEventRepository>,
    ping: Arc<dyn StorePing>,
}

impl Storage {
    pub async fn ping(&self) -> Result<()> {
        self.ping.ping().await
    }
}

/// Opens the store described by `dsn` and creates the schema if absent.
///
/// A `postgres://` (or `postgresql://`) DSN selects the client/server
/// driver; anything else is treated as an embedded SQLite file path
/// (`:memory:` included).
pub async fn connect(dsn: &str) -> Result<Storage> {
    if dsn.starts_with("postgres://") || dsn.starts_with("postgresql://") {
        let store = Arc::new(postgres::PostgresStore::connect(dsn).await?);
        tracing::info!("state store ready (postgres)");
        Ok(assemble(store))
    } else {
        let store = Arc::new(sqlite::SqliteStore::open(dsn).await?);
        tracing::info!(path = %dsn, "state store ready (sqlite)");
        Ok(assemble(store))
    }
}

fn assemble<S>(store: Arc<S>) -> Storage
where
    S: ClusterRepository
        + TaskDefinitionRepository
        + ServiceRepository
        + TaskRepository
        + TaskSetRepository
        + AttributeRepository
        + AccountSettingRepository
        + ServiceEventRepository
        + StorePing
        + 'static,
{
    Storage {
        clusters: store.clone(),
        task_definitions: store.clone(),
        services: store.clone(),
        tasks: store.clone(),
        task_sets: store.clone(),
        attributes: store.clone(),
        account_settings: store.clone(),
        service_events: store.clone(),
        ping: store,
    }
}

#[cfg(test)]
mod tests;
