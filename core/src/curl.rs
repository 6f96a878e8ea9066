//! Renders requests as shell-pasteable cURL commands for debug logs.
//!
//! Credentials are redacted: sensitive header values and query values are
//! replaced with `[REDACTED]`. Everything is single-quoted for POSIX shells.

use bytes::Bytes;

use crate::http::HttpRequest;

const REDACTED: &str = "[REDACTED]";

const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "x-api-key",
    "api-key",
    "x-auth-token",
    "cookie",
];

const SENSITIVE_QUERY_KEYS: &[&str] = &["access_token", "token", "api_key", "apikey", "key"];

pub fn command(request: &HttpRequest) -> String {
    let mut parts = vec![
        "curl".to_string(),
        "-X".to_string(),
        quote(request.method.as_str()),
    ];

    let mut headers: Vec<(&str, &str)> = request.headers.iter().collect();
    headers.sort_by_key(|(name, _)| name.to_ascii_lowercase());
    for (name, value) in headers {
        let value = if is_sensitive_header(name) { REDACTED } else { value };
        parts.push("-H".to_string());
        parts.push(quote(&format!("{name}: {value}")));
    }

    parts.push(quote(redacted_url(&request.url).as_str()));

    if let Some(body) = &request.body {
        parts.extend(body_args(body));
    }

    parts.join(" ")
}

fn body_args(body: &Bytes) -> [String; 2] {
    match std::str::from_utf8(body) {
        Ok(text) => ["-d".to_string(), quote(text)],
        Err(_) => [
            "--data-binary".to_string(),
            quote(&format!("<{} bytes binary body>", body.len())),
        ],
    }
}

fn is_sensitive_header(name: &str) -> bool {
    SENSITIVE_HEADERS
        .iter()
        .any(|sensitive| name.eq_ignore_ascii_case(sensitive))
}

fn redacted_url(url: &url::Url) -> url::Url {
    let needs_redaction = url
        .query_pairs()
        .any(|(key, _)| SENSITIVE_QUERY_KEYS.iter().any(|s| key.eq_ignore_ascii_case(s)));
    if !needs_redaction {
        return url.clone();
    }

    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(key, value)| {
            let value = if SENSITIVE_QUERY_KEYS.iter().any(|s| key.eq_ignore_ascii_case(s)) {
                REDACTED.to_string()
            } else {
                value.into_owned()
            };
            (key.into_owned(), value)
        })
        .collect();

    let mut redacted = url.clone();
    redacted.query_pairs_mut().clear().extend_pairs(pairs);
    redacted
}

/// Wrap `text` in single quotes, escaping embedded quotes as `'\''`.
fn quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', r"'\''"))
}
