//! Pipeline error types
//!
//! Every variant here aborts a run before its artifact is executed. Failures
//! of the generated script itself are not errors; they classify as FAIL.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("Generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("Failed to write test script: {0}")]
    Materialize(#[source] std::io::Error),

    #[error("Too many concurrent runs (limit {limit})")]
    Busy { limit: usize },
}

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("no model API key configured or supplied")]
    MissingCredential,

    #[error("model provider rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("model provider timed out")]
    Timeout,

    #[error("model provider unreachable: {0}")]
    Transport(String),

    #[error("model returned no code")]
    EmptyResponse,
}

impl From<reqwest::Error> for GenerationError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GenerationError::Timeout
        } else {
            GenerationError::Transport(e.to_string())
        }
    }
}

impl GenerationError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GenerationError::MissingCredential => StatusCode::BAD_REQUEST,
            GenerationError::Rejected { status: 401 | 403, .. } => StatusCode::UNAUTHORIZED,
            GenerationError::Rejected { .. } => StatusCode::BAD_GATEWAY,
            GenerationError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            GenerationError::Transport(_) => StatusCode::BAD_GATEWAY,
            GenerationError::EmptyResponse => StatusCode::BAD_GATEWAY,
        }
    }
}

impl PipelineError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            PipelineError::Validation(_) => StatusCode::BAD_REQUEST,
            PipelineError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            PipelineError::Generation(e) => e.status_code(),
            PipelineError::Materialize(_) => StatusCode::INTERNAL_SERVER_ERROR,
            PipelineError::Busy { .. } => StatusCode::TOO_MANY_REQUESTS,
        }
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        (
            self.status_code(),
            Json(serde_json::json!({"error": self.to_string()})),
        )
            .into_response()
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            PipelineError::Validation("url is required".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            PipelineError::Busy { limit: 2 }.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            PipelineError::from(GenerationError::MissingCredential).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            PipelineError::from(GenerationError::Rejected {
                status: 403,
                message: "denied".into()
            })
            .status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            PipelineError::from(GenerationError::Rejected {
                status: 400,
                message: "API key not valid".into()
            })
            .status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            PipelineError::from(GenerationError::Timeout).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }
}
