//! Error types for the request pipeline.
//!
//! # Design
//! `ClientError` is the single error surfaced to callers. Non-2xx responses
//! land in `NetworkError::Status` with either the structured JSON body or the
//! raw text, so callers can still inspect what the server said. `Api` is only
//! produced when `ClientConfig::structured_api_errors` is enabled and the body
//! matches the `ApiError` shape.

use serde::{Deserialize, Serialize};

use crate::coding::CodingError;

/// Errors returned by the builder, executors and client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The URL could not be assembled from the environment and path.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// The transport returned something that is not an HTTP response.
    #[error("response was not an HTTP response")]
    InvalidResponse,

    /// The server returned a structured API error.
    #[error("API error {}: {} ({:?})", .0.status, .0.message, .0.code)]
    Api(ApiError),

    /// The response body could not be decoded into the expected type.
    #[error("decoding failed: {0}")]
    Decoding(#[source] CodingError),

    /// The request body could not be encoded.
    #[error("encoding failed: {0}")]
    Encoding(#[source] CodingError),

    /// Non-2xx status or a transport-level failure.
    #[error("network error: {0}")]
    Network(#[from] NetworkError),
}

impl ClientError {
    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api(api) => u16::try_from(api.status).ok(),
            ClientError::Network(NetworkError::Status { status, .. }) => Some(*status),
            _ => None,
        }
    }
}

/// Network-level failures.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// The server answered outside 200..=299.
    #[error("HTTP {status}: {payload}")]
    Status { status: u16, payload: ErrorPayload },

    /// The connection failed or the body could not be read.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The request did not complete within its timeout.
    #[error("request timed out")]
    Timeout,

    /// The WebSocket failed to connect, send or receive.
    #[error("websocket failure: {0}")]
    WebSocket(String),
}

/// Body of a failed response.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorPayload {
    /// The body parsed as a JSON object.
    Structured(serde_json::Map<String, serde_json::Value>),
    /// Anything else, as (lossy) UTF-8 text.
    Text(String),
}

impl ErrorPayload {
    /// Classify a raw error body.
    pub fn from_body(body: &[u8]) -> Self {
        match serde_json::from_slice::<serde_json::Value>(body) {
            Ok(serde_json::Value::Object(map)) => ErrorPayload::Structured(map),
            _ => ErrorPayload::Text(String::from_utf8_lossy(body).into_owned()),
        }
    }

    /// Try to read the payload as an `ApiError`.
    pub fn api_error(&self) -> Option<ApiError> {
        match self {
            ErrorPayload::Structured(map) => {
                serde_json::from_value(serde_json::Value::Object(map.clone())).ok()
            }
            ErrorPayload::Text(_) => None,
        }
    }
}

impl std::fmt::Display for ErrorPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorPayload::Structured(map) => {
                write!(f, "Status Error: {}", serde_json::Value::Object(map.clone()))
            }
            ErrorPayload::Text(text) if text.is_empty() => write!(f, "Unknown error"),
            ErrorPayload::Text(text) => write!(f, "{text}"),
        }
    }
}

/// A structured error returned by an API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub object: String,
    pub status: i64,
    pub code: ErrorCode,
    pub message: String,
}

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The request body could not be parsed as valid JSON.
    InvalidJson,
    InvalidRequestUrl,
    InvalidRequest,
    /// One or more fields failed server-side validation.
    ValidationError,
    MissingVersion,
    Unauthorized,
    RestrictedResource,
    ObjectNotFound,
    ConflictError,
    RateLimited,
    InternalServerError,
    ServiceUnavailable,
    DatabaseConnectionUnavailable,
    /// Any code this client does not know yet.
    #[serde(other)]
    Unknown,
}
