use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use miette::Diagnostic;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::error;

/// Name of the remote service, used in user-facing messages
pub const REMOTE_SERVICE_NAME: &str = "Google Calendar API";

/// Failure reported by (or while talking to) a Google API endpoint
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    /// The service answered with a non-success status
    #[error("{message}")]
    Status {
        status: u16,
        status_text: String,
        message: String,
        body: String,
    },

    #[error("Request to Google API failed: {0}")]
    Transport(String),

    #[error("Failed to decode Google API response: {0}")]
    Decode(String),

    /// Credentials could not be resolved or exchanged for a token
    #[error("{0}")]
    Credentials(String),
}

impl RemoteError {
    /// HTTP status reported by the remote service, if it got that far
    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// Build an error from a non-success response, pulling Google's
    /// `{"error": {"message": ...}}` envelope out of the body when present
    pub async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status();
        let status_text = status.canonical_reason().unwrap_or("Unknown").to_string();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Could not read error response".to_string());

        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| google_error_message(&v))
            .unwrap_or_else(|| format!("Request failed with status code {}", status.as_u16()));

        RemoteError::Status {
            status: status.as_u16(),
            status_text,
            message,
            body,
        }
    }

    /// Log the diagnostic detail of a failed call
    pub fn log(&self, operation: &str) {
        error!("Google Calendar API error - {}: {}", operation, self);
        if let RemoteError::Status {
            status,
            status_text,
            body,
            ..
        } = self
        {
            error!("Status: {}, Message: {}", status, status_text);
            error!("Response data: {}", body);
        }
    }
}

/// Google error bodies are either `{"error": {"message": ..}}` (API errors)
/// or `{"error": "invalid_grant", "error_description": ..}` (OAuth errors)
fn google_error_message(body: &Value) -> Option<String> {
    let err = body.get("error")?;
    if let Some(message) = err.get("message").and_then(|m| m.as_str()) {
        return Some(message.to_string());
    }
    let code = err.as_str()?;
    match body.get("error_description").and_then(|d| d.as_str()) {
        Some(description) => Some(format!("{}: {}", code, description)),
        None => Some(code.to_string()),
    }
}

impl From<google_calendar3::Error> for RemoteError {
    fn from(err: google_calendar3::Error) -> Self {
        match err {
            // Non-success response with a JSON body
            google_calendar3::Error::BadRequest(body) => {
                let status = body
                    .pointer("/error/code")
                    .and_then(Value::as_u64)
                    .and_then(|code| u16::try_from(code).ok())
                    .unwrap_or(400);
                let message = google_error_message(&body)
                    .unwrap_or_else(|| format!("Request failed with status code {}", status));
                RemoteError::Status {
                    status,
                    status_text: status_text(status),
                    message,
                    body: body.to_string(),
                }
            }
            // Non-success response without a JSON body
            google_calendar3::Error::Failure(response) => {
                let status = response.status().as_u16();
                RemoteError::Status {
                    status,
                    status_text: status_text(status),
                    message: format!("Request failed with status code {}", status),
                    body: String::new(),
                }
            }
            google_calendar3::Error::MissingToken(e) => RemoteError::Credentials(e.to_string()),
            google_calendar3::Error::JsonDecodeError(_, e) => RemoteError::Decode(e.to_string()),
            other => RemoteError::Transport(other.to_string()),
        }
    }
}

fn status_text(status: u16) -> String {
    StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown")
        .to_string()
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            RemoteError::Decode(err.to_string())
        } else {
            RemoteError::Transport(err.to_string())
        }
    }
}

/// Main error type for the application
#[derive(Debug, Clone, Error, Diagnostic)]
pub enum Error {
    #[error("Calendar \"{0}\" not found in configuration")]
    #[diagnostic(code(brightcal::calendar_not_found))]
    CalendarNotFound(String),

    #[error("{0}")]
    #[diagnostic(code(brightcal::validation))]
    Validation(String),

    #[error("Event with ID {0} not found")]
    #[diagnostic(code(brightcal::event_not_found))]
    EventNotFound(String),

    #[error("Failed to initialize Google Calendar client: {0}")]
    #[diagnostic(code(brightcal::initialization))]
    Initialization(String),

    /// A calendar operation failed on the remote side
    #[error("{context}: {source}")]
    #[diagnostic(code(brightcal::calendar))]
    Calendar {
        context: &'static str,
        source: RemoteError,
    },

    /// Remote failure with no calendar operation context. Calendar
    /// operations wrap theirs in `Calendar` or `EventNotFound`, so this
    /// only exists for the translator's Google-specific 500 body.
    #[error("Google API error: {0}")]
    #[diagnostic(code(brightcal::google_api))]
    GoogleApi(RemoteError),

    #[error("Environment error: {0}")]
    #[diagnostic(code(brightcal::environment))]
    Environment(String),

    #[error("Configuration error: {0}")]
    #[diagnostic(code(brightcal::config))]
    Config(String),

    #[error(transparent)]
    #[diagnostic(code(brightcal::io))]
    Io(Arc<std::io::Error>),

    #[error("Other error: {0}")]
    #[diagnostic(code(brightcal::other))]
    Other(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl Error {
    /// HTTP status this error maps to
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::CalendarNotFound(_) | Error::EventNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Operational errors are expected failures whose message is safe to show
    pub fn is_operational(&self) -> bool {
        matches!(
            self,
            Error::CalendarNotFound(_)
                | Error::Validation(_)
                | Error::EventNotFound(_)
                | Error::Initialization(_)
                | Error::Calendar { .. }
        )
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if self.is_operational() {
            let body = json!({
                "status": status.as_u16(),
                "message": self.to_string(),
            });
            return (status, Json(body)).into_response();
        }

        error!("Unexpected error: {:?}", self);

        if let Error::GoogleApi(_) = &self {
            let body = json!({
                "status": 500,
                "message": format!("Error communicating with {}", REMOTE_SERVICE_NAME),
                "error": self.to_string(),
            });
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response();
        }

        let body = json!({
            "status": 500,
            "message": "Something went wrong",
        });
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

/// Type alias for Result with our Error type
pub type AppResult<T> = Result<T, Error>;

/// Helper to create environment errors
pub fn env_error(message: &str) -> Error {
    Error::Environment(message.to_string())
}

/// Helper to create configuration errors
pub fn config_error(message: &str) -> Error {
    Error::Config(message.to_string())
}

/// Helper to create validation errors
pub fn validation_error(message: &str) -> Error {
    Error::Validation(message.to_string())
}

/// Helper to create credential errors
pub fn credentials_error(message: &str) -> RemoteError {
    RemoteError::Credentials(message.to_string())
}
