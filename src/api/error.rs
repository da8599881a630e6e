//! API error handling -- stable machine tags plus human messages.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

use crate::detect::DetectError;
use crate::features::FeatureError;
use crate::model::ModelError;
use crate::normalize::NormalizeError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub tag: &'static str,
    pub message: String,
    /// Structured extras, e.g. per-log training errors.
    pub details: Option<Value>,
}

impl ApiError {
    pub fn bad_request(tag: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            tag,
            message: message.into(),
            details: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            tag: "not_found",
            message: message.into(),
            details: None,
        }
    }

    pub fn internal(tag: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            tag,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(tag = self.tag, "{}", self.message);
        }

        let mut body = json!({
            "error": self.message,
            "tag": self.tag,
            "status": self.status.as_u16(),
        });
        if let Some(details) = self.details {
            body["errors"] = details;
        }

        (self.status, Json(body)).into_response()
    }
}

impl From<NormalizeError> for ApiError {
    fn from(err: NormalizeError) -> Self {
        ApiError::bad_request("invalid_input", err.to_string())
    }
}

impl From<FeatureError> for ApiError {
    fn from(err: FeatureError) -> Self {
        ApiError::internal("feature_error", err.to_string())
    }
}

impl From<ModelError> for ApiError {
    fn from(err: ModelError) -> Self {
        match &err {
            ModelError::NotFound { .. } => ApiError::internal("model_missing", err.to_string()),
            ModelError::Io(_) => ApiError::internal("storage_error", err.to_string()),
            _ => ApiError::internal("model_invalid", err.to_string()),
        }
    }
}

impl From<DetectError> for ApiError {
    fn from(err: DetectError) -> Self {
        match err {
            DetectError::Model(inner) => inner.into(),
            DetectError::Feature(inner) => inner.into(),
            DetectError::ScorerUnreachable { .. } | DetectError::ScorerResponse(_) => {
                ApiError::internal("scorer_unreachable", err.to_string())
            }
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::internal("storage_error", format!("{err:#}"))
    }
}
