//! Static configuration shared by every request a client makes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::http::Headers;

/// URL scheme for HTTP requests. WebSocket URLs derive `ws`/`wss` from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Http,
    #[default]
    Https,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    pub fn websocket(self) -> &'static str {
        match self {
            Scheme::Http => "ws",
            Scheme::Https => "wss",
        }
    }
}

/// Where and how to reach an API.
///
/// Immutable once handed to a client; every request reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    /// Host, optionally with port and a base path (`api.example.com:8443/base`).
    pub host: String,
    #[serde(default)]
    pub scheme: Scheme,
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub headers: Headers,
    /// Sent as a bearer token unless `headers` already carries `Authorization`.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Sent as `X-Client-Version` when present.
    #[serde(default)]
    pub client_version: Option<String>,
}

impl Environment {
    pub fn new(scheme: Scheme, host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            scheme,
            api_version: None,
            headers: Headers::new(),
            api_key: None,
            client_version: None,
        }
    }

    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = Some(version.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Headers applied to every request before per-request overrides.
    pub fn default_headers(&self) -> Headers {
        let mut headers = self.headers.clone();
        if let Some(key) = &self.api_key {
            if !headers.contains("Authorization") {
                headers.insert("Authorization", format!("Bearer {key}"));
            }
        }
        if let Some(version) = &self.client_version {
            if !headers.contains("X-Client-Version") {
                headers.insert("X-Client-Version", version.clone());
            }
        }
        headers
    }
}

/// What the builder does with a body whose shape the declared
/// content type cannot carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnsupportedBodyPolicy {
    /// Fail with `ClientError::Encoding`.
    #[default]
    Reject,
    /// Log a warning and send the request without a body.
    Omit,
}

/// Client behaviour knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Timeout for requests whose options do not set one.
    pub default_timeout: Duration,
    pub unsupported_body: UnsupportedBodyPolicy,
    /// Turn `ApiError`-shaped failure bodies into `ClientError::Api`.
    pub structured_api_errors: bool,
    /// Capacity of the network event ring buffer.
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(300),
            unsupported_body: UnsupportedBodyPolicy::Reject,
            structured_api_errors: false,
            event_capacity: 2000,
        }
    }
}
