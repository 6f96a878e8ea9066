//! Pluggable JSON encode/decode.
//!
//! Typed values cross the `JsonCoding` boundary as `serde_json::Value`, so
//! the trait stays object-safe and any back-end can be swapped in behind an
//! `Arc<dyn JsonCoding>` without touching the builder or executors.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Failure raised by a `JsonCoding` implementation.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct CodingError(Box<dyn std::error::Error + Send + Sync>);

impl CodingError {
    pub fn new(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self(err.into())
    }
}

impl From<serde_json::Error> for CodingError {
    fn from(err: serde_json::Error) -> Self {
        Self(Box::new(err))
    }
}

/// Encode/decode capability used for request and response bodies.
pub trait JsonCoding: Send + Sync {
    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodingError>;

    fn decode(&self, bytes: &[u8]) -> Result<Value, CodingError>;
}

/// Serialize `value` and encode it with `coder`.
pub fn encode_with<B: Serialize + ?Sized>(
    coder: &dyn JsonCoding,
    value: &B,
) -> Result<Vec<u8>, CodingError> {
    let value = serde_json::to_value(value)?;
    coder.encode(&value)
}

/// Decode `bytes` with `coder` into `T`.
pub fn decode_with<T: DeserializeOwned>(
    coder: &dyn JsonCoding,
    bytes: &[u8],
) -> Result<T, CodingError> {
    let value = coder.decode(bytes)?;
    Ok(serde_json::from_value(value)?)
}

/// Plain serde_json coding. Keys are passed through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCoder;

impl JsonCoding for JsonCoder {
    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodingError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, CodingError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Converts object keys to snake_case on the way out and to camelCase on the
/// way in, for APIs that speak snake_case to camelCase models.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnakeCaseCoder;

impl JsonCoding for SnakeCaseCoder {
    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodingError> {
        Ok(serde_json::to_vec(&rewrite_keys(value.clone(), &to_snake_case))?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, CodingError> {
        let value: Value = serde_json::from_slice(bytes)?;
        Ok(rewrite_keys(value, &to_camel_case))
    }
}

fn rewrite_keys(value: Value, rename: &dyn Fn(&str) -> String) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (rename(&key), rewrite_keys(value, rename)))
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.into_iter().map(|v| rewrite_keys(v, rename)).collect())
        }
        other => other,
    }
}

fn to_snake_case(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    let mut out = String::with_capacity(key.len() + 4);
    for (i, &ch) in chars.iter().enumerate() {
        if ch.is_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_lower = chars.get(i + 1).is_some_and(|c| c.is_lowercase());
            // `userID` -> `user_id`, `HTTPStatus` -> `http_status`
            if prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_lower) {
                out.push('_');
            }
        }
        out.extend(ch.to_lowercase());
    }
    out
}

fn to_camel_case(key: &str) -> String {
    let core = key.trim_matches('_');
    if core.is_empty() {
        return key.to_string();
    }
    let leading = key.len() - key.trim_start_matches('_').len();
    let trailing = key.len() - key.trim_end_matches('_').len();

    let mut out = String::with_capacity(key.len());
    out.push_str(&key[..leading]);
    let mut upper_next = false;
    for ch in core.chars() {
        if ch == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out.push_str(&key[key.len() - trailing..]);
    out
}
