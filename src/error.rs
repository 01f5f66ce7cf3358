use std::fmt;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Failure reported by the extraction collaborator or the machinery that
/// runs it (worker pool, dispatcher).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    /// The extraction binary could not be started.
    ToolMissing(String),
    /// The extraction run finished with an error.
    Failed(String),
    /// The extraction run succeeded but its output could not be interpreted.
    InvalidOutput(String),
    TimedOut(u64),
    /// A pool job panicked or was torn down.
    Worker(String),
    /// The dispatcher stopped before the task was resolved.
    DispatcherStopped,
}

impl fmt::Display for ExtractError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ToolMissing(binary) => write!(
                f,
                "{binary} is not installed or not on PATH; install it and restart the service"
            ),
            Self::Failed(message) => f.write_str(message),
            Self::InvalidOutput(message) => {
                write!(f, "could not interpret extractor output: {message}")
            }
            Self::TimedOut(seconds) => {
                write!(f, "extraction exceeded the {seconds}s time limit")
            }
            Self::Worker(message) => write!(f, "worker failure: {message}"),
            Self::DispatcherStopped => {
                f.write_str("download queue is shutting down; request was not processed")
            }
        }
    }
}

impl std::error::Error for ExtractError {}

/// JSON body shared by every API response.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub status: u16,
    pub success: bool,
    pub result: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(result: T) -> Self {
        Self {
            status: StatusCode::OK.as_u16(),
            success: true,
            result: Some(result),
            message: None,
        }
    }
}

impl Envelope<()> {
    pub fn failure(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status: status.as_u16(),
            success: false,
            result: None,
            message: Some(message.into()),
        }
    }
}

pub fn success<T: Serialize>(result: T) -> Response {
    (StatusCode::OK, Json(Envelope::ok(result))).into_response()
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<ExtractError> for ApiError {
    fn from(error: ExtractError) -> Self {
        Self::internal(error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(Envelope::failure(self.status, self.message));
        (self.status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use serde_json::Value;

    #[tokio::test]
    async fn api_error_renders_failure_envelope() {
        let response = ApiError::not_found("File not found").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], 404);
        assert_eq!(body["success"], false);
        assert!(body["result"].is_null());
        assert_eq!(body["message"], "File not found");
    }

    #[test]
    fn extract_failures_map_to_internal_errors() {
        let error = ApiError::from(ExtractError::Failed("Unsupported URL".into()));
        assert_eq!(error.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error.message, "Unsupported URL");
    }

    #[test]
    fn success_envelope_omits_message() {
        let value = serde_json::to_value(Envelope::ok(serde_json::json!({"title": "x"}))).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["status"], 200);
        assert!(value.get("message").is_none());
    }
}
