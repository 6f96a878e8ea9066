//! Sends prepared requests and validates their status.
//!
//! # Design
//! `RequestExecutor` wraps a `Transport`. It logs a redacted cURL rendering
//! of every request, maps statuses outside 200..=299 to
//! `NetworkError::Status`, and records a `NetworkEvent` for every completed
//! call when an event sink is attached. Recording is synchronous and
//! infallible, so it can never fail the caller's request.
//!
//! With a `RateLimiter` attached, each send first waits on it and every
//! response, successful or not, refreshes it from its headers.

use std::sync::Arc;
use std::time::{Instant, SystemTime};

use bytes::Bytes;
use tracing::{debug, error};

use crate::curl;
use crate::error::{ClientError, ErrorPayload, NetworkError};
use crate::events::{EventSink, NetworkEvent};
use crate::http::{is_success, HttpRequest, HttpResponse, Response};
use crate::rate_limit::RateLimiter;
use crate::transport::Transport;

/// Longest slice of a failed response body included in logs.
const LOG_SNIPPET_LEN: usize = 512;

/// Runs `HttpRequest`s through a transport.
pub struct RequestExecutor<T: Transport> {
    transport: Arc<T>,
    events: Option<Arc<dyn EventSink>>,
    rate_limiter: Option<Arc<RateLimiter>>,
    structured_api_errors: bool,
}

impl<T: Transport> Clone for RequestExecutor<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            events: self.events.clone(),
            rate_limiter: self.rate_limiter.clone(),
            structured_api_errors: self.structured_api_errors,
        }
    }
}

impl<T: Transport> RequestExecutor<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            events: None,
            rate_limiter: None,
            structured_api_errors: false,
        }
    }

    /// Record a `NetworkEvent` for every completed call.
    pub fn with_events(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    /// Gate sends on `limiter` and feed it response headers.
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// Decode `ApiError`-shaped failure bodies into `ClientError::Api`.
    pub fn with_structured_api_errors(mut self, enabled: bool) -> Self {
        self.structured_api_errors = enabled;
        self
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Send `request`, returning the raw body and headers on a 2xx status.
    pub async fn send(&self, request: HttpRequest) -> Result<Response<Bytes>, ClientError> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.wait_if_needed().await;
        }
        debug!(command = %curl::command(&request), "Sending request.");

        let method = request.method;
        let url = request.url.clone();
        let request_bytes = request.body.as_ref().map(Bytes::len);
        let timestamp = SystemTime::now();
        let started = Instant::now();

        let result = self.transport.execute(request).await;

        if let Some(sink) = &self.events {
            let (status_code, response_bytes) = match &result {
                Ok(response) => (response.status, response.body.len()),
                Err(_) => (0, 0),
            };
            sink.append(NetworkEvent::new(
                timestamp,
                method,
                &url,
                status_code,
                started.elapsed(),
                request_bytes,
                response_bytes,
            ));
        }

        let response = result?;
        if let Some(limiter) = &self.rate_limiter {
            limiter.update(&response.headers).await;
        }
        debug!(status = response.status, bytes = response.body.len(), %url, "Received response.");
        self.validate(&url, response)
    }

    fn validate(&self, url: &url::Url, response: HttpResponse) -> Result<Response<Bytes>, ClientError> {
        if is_success(response.status) {
            return Ok(Response {
                value: response.body,
                headers: response.headers,
            });
        }

        error!(
            host = url.host_str().unwrap_or_default(),
            status = response.status,
            body = %snippet(&response.body),
            "HTTP error response."
        );
        let payload = ErrorPayload::from_body(&response.body);
        if self.structured_api_errors {
            if let Some(api) = payload.api_error() {
                return Err(ClientError::Api(api));
            }
        }
        Err(NetworkError::Status {
            status: response.status,
            payload,
        }
        .into())
    }
}

pub(crate) fn snippet(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    match text.char_indices().nth(LOG_SNIPPET_LEN) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::error::ErrorCode;
    use crate::events::NetworkEventStore;
    use crate::http::{Headers, HttpMethod, StreamingResponse};

    struct CannedTransport {
        status: u16,
        body: &'static str,
        seen: Mutex<Vec<String>>,
    }

    impl CannedTransport {
        fn new(status: u16, body: &'static str) -> Arc<Self> {
            Arc::new(Self {
                status,
                body,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl Transport for CannedTransport {
        async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ClientError> {
            self.seen.lock().unwrap().push(request.url.to_string());
            Ok(HttpResponse {
                status: self.status,
                headers: [("X-Ratelimit-Allowed", "10")].into_iter().collect(),
                body: Bytes::from_static(self.body.as_bytes()),
            })
        }

        async fn open(&self, _request: HttpRequest) -> Result<StreamingResponse, ClientError> {
            Err(ClientError::InvalidResponse)
        }
    }

    struct FailingTransport;

    impl Transport for FailingTransport {
        async fn execute(&self, _request: HttpRequest) -> Result<HttpResponse, ClientError> {
            Err(NetworkError::Transport("connection refused".to_string()).into())
        }

        async fn open(&self, _request: HttpRequest) -> Result<StreamingResponse, ClientError> {
            Err(NetworkError::Transport("connection refused".to_string()).into())
        }
    }

    fn request(body: Option<&'static str>) -> HttpRequest {
        HttpRequest {
            method: HttpMethod::Post,
            url: url::Url::parse("https://example.com/v1/users").unwrap(),
            headers: Headers::new(),
            body: body.map(|b| Bytes::from_static(b.as_bytes())),
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn success_returns_body_and_headers() {
        let transport = CannedTransport::new(200, r#"{"ok":true}"#);
        let executor = RequestExecutor::new(Arc::clone(&transport));
        let response = executor.send(request(None)).await.unwrap();
        assert_eq!(response.value, Bytes::from_static(br#"{"ok":true}"#));
        assert_eq!(response.headers.get("x-ratelimit-allowed"), Some("10"));
        assert_eq!(
            transport.seen.lock().unwrap().as_slice(),
            ["https://example.com/v1/users"]
        );
    }

    #[tokio::test]
    async fn json_error_body_is_structured_network_error() {
        let executor = RequestExecutor::new(CannedTransport::new(400, r#"{"message":"bad"}"#));
        let err = executor.send(request(None)).await.unwrap_err();
        match err {
            ClientError::Network(NetworkError::Status {
                status: 400,
                payload: ErrorPayload::Structured(map),
            }) => assert_eq!(map["message"], "bad"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn text_error_body_is_raw_network_error() {
        let executor = RequestExecutor::new(CannedTransport::new(502, "upstream down"));
        let err = executor.send(request(None)).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Network(NetworkError::Status { status: 502, payload: ErrorPayload::Text(ref t) }) if t == "upstream down"
        ));
    }

    #[tokio::test]
    async fn redirect_status_is_not_success() {
        let executor = RequestExecutor::new(CannedTransport::new(304, ""));
        let err = executor.send(request(None)).await.unwrap_err();
        assert_eq!(err.status(), Some(304));
    }

    #[tokio::test]
    async fn api_error_shape_is_decoded_when_enabled() {
        let body = r#"{"object":"error","status":429,"code":"rate_limited","message":"slow down"}"#;
        let executor =
            RequestExecutor::new(CannedTransport::new(429, body)).with_structured_api_errors(true);
        match executor.send(request(None)).await.unwrap_err() {
            ClientError::Api(api) => assert_eq!(api.code, ErrorCode::RateLimited),
            other => panic!("unexpected error: {other:?}"),
        }

        let executor = RequestExecutor::new(CannedTransport::new(429, body));
        assert!(matches!(
            executor.send(request(None)).await.unwrap_err(),
            ClientError::Network(_)
        ));
    }

    #[tokio::test]
    async fn events_are_recorded_for_success_and_failure() {
        let store = Arc::new(NetworkEventStore::new(10));
        let executor = RequestExecutor::new(CannedTransport::new(201, "created"))
            .with_events(Arc::clone(&store) as Arc<dyn EventSink>);
        executor.send(request(Some("hello"))).await.unwrap();

        let failing = RequestExecutor::new(Arc::new(FailingTransport))
            .with_events(Arc::clone(&store) as Arc<dyn EventSink>);
        assert!(failing.send(request(None)).await.is_err());

        let events = store.snapshot();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].status_code, 201);
        assert_eq!(events[0].method, "POST");
        assert_eq!(events[0].host.as_deref(), Some("example.com"));
        assert_eq!(events[0].request_bytes, Some(5));
        assert_eq!(events[0].response_bytes, 7);
        assert_eq!(events[1].status_code, 0);
        assert_eq!(events[1].request_bytes, None);
    }

    #[tokio::test]
    async fn failed_responses_still_update_rate_limiter() {
        let limiter = Arc::new(RateLimiter::new());
        let executor = RequestExecutor::new(CannedTransport::new(500, "boom"))
            .with_rate_limiter(Arc::clone(&limiter));
        assert!(executor.send(request(None)).await.is_err());
        assert_eq!(limiter.state().await.limit, Some(10));
    }

    #[test]
    fn snippet_truncates_long_bodies() {
        let long = "x".repeat(LOG_SNIPPET_LEN + 10);
        let cut = snippet(long.as_bytes());
        assert_eq!(cut.chars().count(), LOG_SNIPPET_LEN + 1);
        assert!(cut.ends_with('…'));
        assert_eq!(snippet(b"short"), "short");
    }
}
