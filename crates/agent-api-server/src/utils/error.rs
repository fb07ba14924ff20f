use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::document::IngestError;
use crate::services::llm_service::is_retryable_error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("{message}")]
    Upstream {
        message: String,
        details: Option<String>,
        retryable: bool,
    },

    #[error("{message}")]
    Internal {
        message: String,
        details: Option<String>,
    },
}

/// Failure envelope shared by every route: `{success: false, error}`.
#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl ApiError {
    /// Classify an error coming out of a service call.
    ///
    /// Ingestion validation failures become 400s, model timeouts and throttling become
    /// retryable 503s, everything else is a 500. `expose_details` attaches the full error
    /// chain and is only set outside production.
    pub fn from_service(err: anyhow::Error, expose_details: bool) -> Self {
        if let Some(ingest) = err.downcast_ref::<IngestError>() {
            return match ingest {
                IngestError::TooLarge { .. } => ApiError::PayloadTooLarge(ingest.to_string()),
                IngestError::Parse(_) => ApiError::Internal {
                    message: ingest.to_string(),
                    details: expose_details.then(|| format!("{:?}", err)),
                },
                _ => ApiError::BadRequest(ingest.to_string()),
            };
        }

        let retryable = is_retryable_error(&err);

        ApiError::Upstream {
            message: format!("{:#}", err),
            details: expose_details.then(|| format!("{:?}", err)),
            retryable,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Upstream { retryable: true, .. } => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Upstream { .. } | ApiError::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = self.to_string();

        let details = match self {
            ApiError::BadRequest(_) | ApiError::NotFound(_) | ApiError::PayloadTooLarge(_) => {
                tracing::warn!("Rejected request ({}): {}", status, error);
                None
            }
            ApiError::Upstream { details, .. } => {
                tracing::error!("Upstream error ({}): {}", status, error);
                details
            }
            ApiError::Internal { details, .. } => {
                tracing::error!("Internal error: {}", error);
                details
            }
        };

        let body = Json(ErrorResponse {
            success: false,
            error,
            details,
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::llm_service::LlmError;

    #[test]
    fn unsupported_upload_maps_to_bad_request() {
        let err = anyhow::Error::new(IngestError::UnsupportedType {
            extension: ".exe".to_string(),
            allowed: ".pdf, .txt".to_string(),
        });
        let api = ApiError::from_service(err, false);
        assert_eq!(api.status(), StatusCode::BAD_REQUEST);
        assert!(api.to_string().contains(".exe"));
    }

    #[test]
    fn model_timeout_is_retryable() {
        let err = anyhow::Error::new(LlmError::Timeout).context("Agent run failed");
        let api = ApiError::from_service(err, true);
        assert_eq!(api.status(), StatusCode::SERVICE_UNAVAILABLE);
        match api {
            ApiError::Upstream { details, .. } => assert!(details.is_some()),
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn details_hidden_in_production() {
        let api = ApiError::from_service(anyhow::anyhow!("index unreachable"), false);
        assert_eq!(api.status(), StatusCode::INTERNAL_SERVER_ERROR);
        match api {
            ApiError::Upstream { details, .. } => assert!(details.is_none()),
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn message_keeps_root_cause() {
        let err = anyhow::anyhow!("Pinecone API error on /query (401): invalid api key")
            .context("general agent run failed");
        let api = ApiError::from_service(err, false);
        let message = api.to_string();
        assert!(message.starts_with("general agent run failed"));
        assert!(message.contains("invalid api key"));
    }
}
