use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProxyError>;

/// Proxy errors with appropriate HTTP status codes and wire envelope types.
///
/// Only the HTTP handlers convert these into wire errors; everything below
/// them returns `Result<T, ProxyError>` and stays off the network.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// No credential could be resolved for the configured provider.
    #[error("No API key found for provider '{provider}' (checked {checked})")]
    MissingApiKey { provider: String, checked: String },

    /// The downstream request body was malformed or missing required
    /// fields.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The selected model cannot honor tool definitions and
    /// `FORCE_TOOL_ERROR` is set.
    #[error("Tools were requested but '{model}' cannot use them")]
    ToolUnsupported { model: String },

    /// The upstream rejected our credentials.
    #[error("Upstream authentication failed ({status}) at {models_url}: {message}")]
    UpstreamAuth {
        status: u16,
        message: String,
        /// The models endpoint that was being addressed, for diagnostics.
        models_url: String,
        hint: Option<String>,
    },

    /// The upstream returned a non-success status.
    #[error("Upstream error ({status}): {message}")]
    Upstream { status: u16, message: String },

    /// The upstream could not be reached.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Internal proxy failure. `Some(message)` came from the upstream and
    /// can be shown; `None` must not leak detail to clients.
    #[error("Internal proxy error")]
    Internal(Option<String>),
}

impl ProxyError {
    /// HTTP status code for the downstream response.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingApiKey { .. } | Self::InvalidRequest(_) | Self::ToolUnsupported { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::UpstreamAuth { status, .. } | Self::Upstream { status, .. } => match *status {
                400 => StatusCode::BAD_REQUEST,
                401 => StatusCode::UNAUTHORIZED,
                403 => StatusCode::FORBIDDEN,
                404 => StatusCode::NOT_FOUND,
                429 => StatusCode::TOO_MANY_REQUESTS,
                _ => StatusCode::BAD_GATEWAY,
            },
            Self::Connection(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The `error.type` string for the wire envelope.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::MissingApiKey { .. } | Self::UpstreamAuth { .. } => "authentication_error",
            Self::InvalidRequest(_) => "invalid_request_error",
            Self::ToolUnsupported { .. } => "tool_unsupported",
            Self::Upstream { .. } | Self::Connection(_) => "upstream_error",
            Self::Internal(_) => "api_error",
        }
    }

    /// Message that is safe to expose to clients.
    pub fn client_message(&self) -> String {
        match self {
            Self::Internal(Some(upstream_message)) => upstream_message.clone(),
            Self::Internal(None) => "Internal proxy error".to_string(),
            other => other.to_string(),
        }
    }

    /// Optional remediation hint included in the envelope.
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::ToolUnsupported { model } => Some(format!("{model} does not support tool calling")),
            Self::UpstreamAuth { hint, .. } => hint.clone(),
            _ => None,
        }
    }
}

/// Wire envelope: `{"error": {"type": ..., "message": ..., "hint"?: ...}}`.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorDetails,
}

#[derive(Debug, Serialize)]
struct ErrorDetails {
    #[serde(rename = "type")]
    kind: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let body = ErrorResponse {
            error: ErrorDetails {
                kind: self.error_type(),
                message: self.client_message(),
                hint: self.hint(),
            },
        };

        (status, Json(body)).into_response()
    }
}
