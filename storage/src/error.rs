/// Error taxonomy of the state store. Driver-specific failures are wrapped
/// into these variants so callers never see a rusqlite or tokio-postgres
/// error directly.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: &'static str, id: String },

    /// Concurrent-write detection: a unique-constraint violation or an
    /// optimistic version mismatch.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid argument: {0}")]
    Invalid(String),

    #[error("database error: {0}")]
    Database(String),
}

impl StorageError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        StorageError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn already_exists(kind: &'static str, id: impl Into<String>) -> Self {
        StorageError::AlreadyExists {
            kind,
            id: id.into(),
        }
    }

    /// Rewraps a driver-level constraint violation into a typed
    /// `AlreadyExists` for the entity the caller was inserting.
    pub fn constraint_as_exists(self, kind: &'static str, id: impl Into<String>) -> Self {
        match self {
            StorageError::Conflict(_) => StorageError::already_exists(kind, id),
            other => other,
        }
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(inner, msg)
                if inner.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StorageError::Conflict(msg.clone().unwrap_or_else(|| inner.to_string()))
            }
            _ => StorageError::Database(e.to_string()),
        }
    }
}

impl From<tokio_postgres::Error> for StorageError {
    fn from(e: tokio_postgres::Error) -> Self {
        if let Some(state) = e.code() {
            if *state == tokio_postgres::error::SqlState::UNIQUE_VIOLATION {
                return StorageError::Conflict(e.to_string());
            }
        }
        StorageError::Database(e.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for StorageError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        StorageError::Database(format!("failed to get db connection: {e}"))
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Database(format!("corrupt json column: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
