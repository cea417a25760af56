use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

/// One strategy's failure cause. Strategy errors never escape the extraction
/// chain on their own; the last one is folded into [`AppError::Extraction`]
/// once every strategy has been tried.
#[derive(Error, Debug)]
pub enum StrategyError {
    #[error("failed to launch {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with an error: {stderr}")]
    Failed { tool: String, stderr: String },

    #[error("strategy timed out after {0}s")]
    TimedOut(u64),

    #[error("tool exited successfully but produced no output file")]
    MissingOutput,

    #[error("output file is implausibly small ({size} bytes, floor {floor})")]
    TooSmall { size: u64, floor: u64 },

    #[error("stream URL resolution returned nothing")]
    NoStreamUrl,

    #[error("direct download failed: {0}")]
    Download(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Service-level error taxonomy. Each variant maps to exactly one HTTP status.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("invalid media identifier: {0}")]
    InvalidMediaId(String),

    #[error("rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("audio extraction failed after {attempts} strategies: {last_error}")]
    Extraction { attempts: usize, last_error: String },

    #[error("upstream probe failed: {0}")]
    UpstreamProbe(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidMediaId(_) => StatusCode::BAD_REQUEST,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Extraction { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::UpstreamProbe(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn status_mapping() {
        assert_eq!(
            AppError::InvalidMediaId("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::RateLimited {
                retry_after_secs: 1
            }
            .status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AppError::Extraction {
                attempts: 5,
                last_error: "boom".into()
            }
            .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn extraction_error_carries_last_message() {
        let err = AppError::Extraction {
            attempts: 3,
            last_error: "tool exited with an error: 403".into(),
        };
        assert!(err.to_string().contains("3 strategies"));
        assert!(err.to_string().contains("403"));
    }
}
