use axum::Json;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};

use kecs_storage::StorageError;

/// Typed API errors, serialized on the wire as
/// `{"__type": "<Code>", "message": "..."}` with the AWS status mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidParameter(String),

    #[error("Cluster not found.")]
    ClusterNotFound,

    #[error("Service not found.")]
    ServiceNotFound,

    #[error("Service was not ACTIVE.")]
    ServiceNotActive,

    #[error("Unable to describe task definition.")]
    TaskDefinitionNotFound,

    #[error("{0}")]
    Client(String),

    #[error("{0}")]
    ResourceInUse(String),

    #[error("{0}")]
    LimitExceeded(String),

    #[error("{0}")]
    Server(String),

    #[error("Missing X-Amz-Target header.")]
    MissingAction,

    #[error("Unknown action: {0}")]
    InvalidAction(String),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidParameter(_) => "InvalidParameterException",
            ApiError::ClusterNotFound => "ClusterNotFoundException",
            ApiError::ServiceNotFound => "ServiceNotFoundException",
            ApiError::ServiceNotActive => "ServiceNotActiveException",
            ApiError::TaskDefinitionNotFound => "TaskDefinitionNotFoundException",
            ApiError::Client(_) => "ClientException",
            ApiError::ResourceInUse(_) => "ResourceInUseException",
            ApiError::LimitExceeded(_) => "LimitExceededException",
            ApiError::Server(_) => "ServerException",
            ApiError::MissingAction => "MissingAction",
            ApiError::InvalidAction(_) => "InvalidAction",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if matches!(self, ApiError::Server(_)) {
            tracing::error!(code = self.code(), error = %self, "request failed");
        } else {
            tracing::debug!(code = self.code(), error = %self, "request rejected");
        }
        let body = serde_json::json!({
            "__type": self.code(),
            "message": self.to_string(),
        });
        (
            self.status(),
            [(header::CONTENT_TYPE, "application/x-amz-json-1.1")],
            Json(body),
        )
            .into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        let message = e.to_string();
        match e {
            StorageError::NotFound { kind, .. } => match kind {
                "cluster" => ApiError::ClusterNotFound,
                "service" => ApiError::ServiceNotFound,
                "task definition" => ApiError::TaskDefinitionNotFound,
                _ => ApiError::Client(message),
            },
            StorageError::AlreadyExists { .. } => ApiError::ResourceInUse(message),
            StorageError::Conflict(msg) => ApiError::Client(msg),
            StorageError::Invalid(msg) => ApiError::InvalidParameter(msg),
            StorageError::Database(msg) => {
                // Operational detail goes to the log, not the caller.
                tracing::error!(error = %msg, "state store failure");
                ApiError::Server("internal error".to_string())
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
