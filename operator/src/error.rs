#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Kubernetes reported error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },

    #[error("State store error: {source}")]
    Storage {
        #[from]
        source: kecs_storage::StorageError,
    },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Json error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
