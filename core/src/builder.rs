//! Turns request descriptors into transport-ready requests.
//!
//! # Design
//! `RequestBuilder` holds only the environment, the body coder and the client
//! config; it carries no mutable state between calls. URLs are assembled as
//! `scheme://host/api_version/path` with doubled slashes collapsed, and query
//! items are sorted by name so logically identical requests produce
//! byte-identical URLs.
//!
//! Bodies are encoded according to the negotiated `Content-Type`:
//! - missing or JSON: encoded with the injected coder; the header defaults to
//!   `application/json`.
//! - `application/x-www-form-urlencoded`: a string, a string-keyed map of
//!   scalars, a list of `[name, value]` pairs, or raw bytes.
//! - anything else: a string or raw bytes.
//!
//! Raw bytes means a body that serializes as a byte buffer, such as
//! `bytes::Bytes`. A `Vec<u8>` serializes as a list of numbers and is not
//! treated as bytes.
//!
//! Shapes a content type cannot carry follow `UnsupportedBodyPolicy`.

use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;
use url::Url;

use crate::coding::{encode_with, CodingError, JsonCoding};
use crate::environment::{ClientConfig, Environment, UnsupportedBodyPolicy};
use crate::error::ClientError;
use crate::http::{Headers, HttpRequest};
use crate::raw_body::raw_bytes;
use crate::request::{QueryItem, Request};

pub const CONTENT_TYPE: &str = "Content-Type";
pub const APPLICATION_JSON: &str = "application/json";
pub const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// Stateless request builder bound to one environment.
#[derive(Clone)]
pub struct RequestBuilder {
    environment: Arc<Environment>,
    coder: Arc<dyn JsonCoding>,
    config: ClientConfig,
}

impl std::fmt::Debug for RequestBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestBuilder")
            .field("environment", &self.environment)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RequestBuilder {
    pub fn new(
        environment: Arc<Environment>,
        coder: Arc<dyn JsonCoding>,
        config: ClientConfig,
    ) -> Self {
        Self {
            environment,
            coder,
            config,
        }
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn coder(&self) -> &dyn JsonCoding {
        self.coder.as_ref()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Build the transport request for `request`.
    pub fn build<B: Serialize, R>(&self, request: &Request<B, R>) -> Result<HttpRequest, ClientError> {
        let options = request.options();
        let url = http_url(&self.environment, request.path(), &options.query_items)?;
        let mut headers = self.environment.default_headers().merged(&options.headers);

        let body = match request.body() {
            Some(body) => self.encode_body(body, &mut headers)?,
            None => None,
        };

        Ok(HttpRequest {
            method: request.method(),
            url,
            headers,
            body,
            timeout: options.timeout.unwrap_or(self.config.default_timeout),
        })
    }

    fn encode_body<B: Serialize>(
        &self,
        body: &B,
        headers: &mut Headers,
    ) -> Result<Option<Bytes>, ClientError> {
        let declared = headers.get(CONTENT_TYPE).map(mime_essence);
        if declared.as_deref().is_some_and(|essence| !is_json(essence)) {
            if let Some(bytes) = raw_bytes(body) {
                return Ok(Some(bytes));
            }
        }

        match declared.as_deref() {
            None => {
                let bytes = encode_with(self.coder.as_ref(), body).map_err(ClientError::Encoding)?;
                headers.insert(CONTENT_TYPE, APPLICATION_JSON);
                Ok(Some(Bytes::from(bytes)))
            }
            Some(essence) if is_json(essence) => {
                let bytes = encode_with(self.coder.as_ref(), body).map_err(ClientError::Encoding)?;
                Ok(Some(Bytes::from(bytes)))
            }
            Some(FORM_URLENCODED) => {
                let value = to_value(body)?;
                match form_body(&value) {
                    Some(bytes) => Ok(Some(bytes)),
                    None => self.unsupported(FORM_URLENCODED, &value),
                }
            }
            Some(other) => {
                let value = to_value(body)?;
                match text_body(&value) {
                    Some(bytes) => Ok(Some(bytes)),
                    None => self.unsupported(other, &value),
                }
            }
        }
    }

    fn unsupported(&self, content_type: &str, value: &Value) -> Result<Option<Bytes>, ClientError> {
        let shape = shape_name(value);
        match self.config.unsupported_body {
            UnsupportedBodyPolicy::Reject => Err(ClientError::Encoding(CodingError::new(format!(
                "{shape} body cannot be sent as {content_type}"
            )))),
            UnsupportedBodyPolicy::Omit => {
                warn!(content_type, shape, "Dropping request body with unsupported shape.");
                Ok(None)
            }
        }
    }
}

/// Assemble an `http`/`https` URL from the environment, a path and query items.
pub fn http_url(
    environment: &Environment,
    path: &str,
    query_items: &[QueryItem],
) -> Result<Url, ClientError> {
    assemble_url(environment.scheme.as_str(), environment, path, query_items)
}

/// Assemble a `ws`/`wss` URL, mirroring `http_url`.
pub fn websocket_url(
    environment: &Environment,
    path: &str,
    query_items: &[QueryItem],
) -> Result<Url, ClientError> {
    assemble_url(environment.scheme.websocket(), environment, path, query_items)
}

fn assemble_url(
    scheme: &str,
    environment: &Environment,
    path: &str,
    query_items: &[QueryItem],
) -> Result<Url, ClientError> {
    let host = environment.host.trim();
    if host.is_empty() {
        return Err(ClientError::InvalidUrl("environment host is empty".to_string()));
    }

    let joined = [Some(host), environment.api_version.as_deref(), Some(path)]
        .into_iter()
        .flatten()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("/");
    let assembled = format!("{scheme}://{}", collapse_slashes(&joined));

    let mut url =
        Url::parse(&assembled).map_err(|err| ClientError::InvalidUrl(format!("{assembled}: {err}")))?;

    let mut sorted = query_items.to_vec();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));
    if !sorted.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for item in &sorted {
            match &item.value {
                Some(value) => pairs.append_pair(&item.name, value),
                None => pairs.append_key_only(&item.name),
            };
        }
    }
    Ok(url)
}

fn collapse_slashes(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut prev_slash = false;
    for ch in raw.chars() {
        if ch == '/' && prev_slash {
            continue;
        }
        prev_slash = ch == '/';
        out.push(ch);
    }
    out
}

fn mime_essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn is_json(essence: &str) -> bool {
    essence == APPLICATION_JSON || essence.ends_with("+json")
}

fn to_value<B: Serialize>(body: &B) -> Result<Value, ClientError> {
    serde_json::to_value(body).map_err(|err| ClientError::Encoding(err.into()))
}

fn form_body(value: &Value) -> Option<Bytes> {
    match value {
        Value::String(text) => Some(Bytes::from(text.clone())),
        Value::Object(map) => {
            let mut form = url::form_urlencoded::Serializer::new(String::new());
            for (key, value) in map {
                match value {
                    Value::Null => {}
                    Value::String(text) => {
                        form.append_pair(key, text);
                    }
                    Value::Bool(_) | Value::Number(_) => {
                        form.append_pair(key, &value.to_string());
                    }
                    Value::Array(_) | Value::Object(_) => return None,
                }
            }
            Some(Bytes::from(form.finish()))
        }
        Value::Array(items) => {
            let mut form = url::form_urlencoded::Serializer::new(String::new());
            for item in items {
                match item.as_array().map(Vec::as_slice) {
                    Some([Value::String(name), Value::String(value)]) => {
                        form.append_pair(name, value);
                    }
                    Some([Value::String(name), Value::Null]) => {
                        form.append_key_only(name);
                    }
                    _ => return None,
                }
            }
            Some(Bytes::from(form.finish()))
        }
        _ => None,
    }
}

fn text_body(value: &Value) -> Option<Bytes> {
    match value {
        Value::String(text) => Some(Bytes::from(text.clone())),
        _ => None,
    }
}

fn shape_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
