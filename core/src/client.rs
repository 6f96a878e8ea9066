//! The client facade.
//!
//! # Design
//! `Client` wires one environment, one coder and one transport into the
//! builder, the executors, a shared rate limiter and an optional event store.
//! It holds no per-request state, so a single client can be shared across
//! tasks. Typed requests go through `send`/`send_response`, streaming
//! endpoints through `sse_stream` and `connect_websocket`.

use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::error;

use crate::builder::RequestBuilder;
use crate::coding::{decode_with, JsonCoder, JsonCoding};
use crate::environment::{ClientConfig, Environment};
use crate::error::ClientError;
use crate::events::{EventSink, NetworkEvent, NetworkEventStore};
use crate::executor::RequestExecutor;
use crate::http::{HttpRequest, Response};
use crate::rate_limit::RateLimiter;
use crate::request::Request;
use crate::stream::{JsonStream, SseExecutor, WebSocketExecutor, WebSocketFeed, WebSocketRoute};
use crate::transport::Transport;

/// Configures a `Client` before it is built.
pub struct ClientBuilder<T: Transport> {
    environment: Environment,
    transport: T,
    coder: Arc<dyn JsonCoding>,
    config: ClientConfig,
    record_events: bool,
    sink: Option<Arc<dyn EventSink>>,
}

impl<T: Transport> ClientBuilder<T> {
    /// Use `coder` for request and response bodies. Defaults to `JsonCoder`.
    pub fn coder(mut self, coder: impl JsonCoding + 'static) -> Self {
        self.coder = Arc::new(coder);
        self
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Keep the last `ClientConfig::event_capacity` network events in memory.
    pub fn record_events(mut self) -> Self {
        self.record_events = true;
        self
    }

    /// Send network events to `sink` instead of the in-memory store.
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn build(self) -> Client<T> {
        let environment = Arc::new(self.environment);
        let default_timeout = self.config.default_timeout;
        let transport = Arc::new(self.transport);
        let rate_limiter = Arc::new(RateLimiter::new());

        let store = (self.record_events && self.sink.is_none())
            .then(|| Arc::new(NetworkEventStore::new(self.config.event_capacity)));
        let sink = match (&store, self.sink) {
            (Some(store), _) => Some(Arc::clone(store) as Arc<dyn EventSink>),
            (None, sink) => sink,
        };

        let mut executor = RequestExecutor::new(Arc::clone(&transport))
            .with_rate_limiter(Arc::clone(&rate_limiter))
            .with_structured_api_errors(self.config.structured_api_errors);
        if let Some(sink) = sink {
            executor = executor.with_events(sink);
        }

        Client {
            builder: RequestBuilder::new(
                Arc::clone(&environment),
                Arc::clone(&self.coder),
                self.config,
            ),
            executor,
            sse: SseExecutor::new(transport, Arc::clone(&self.coder)),
            websocket: WebSocketExecutor::new(environment, self.coder)
                .with_default_timeout(default_timeout),
            rate_limiter,
            events: store,
        }
    }
}

/// Typed API client over a `Transport`.
pub struct Client<T: Transport> {
    builder: RequestBuilder,
    executor: RequestExecutor<T>,
    sse: SseExecutor<T>,
    websocket: WebSocketExecutor,
    rate_limiter: Arc<RateLimiter>,
    events: Option<Arc<NetworkEventStore>>,
}

impl<T: Transport> Client<T> {
    /// A client with default coding and configuration.
    pub fn new(environment: Environment, transport: T) -> Self {
        Self::builder(environment, transport).build()
    }

    pub fn builder(environment: Environment, transport: T) -> ClientBuilder<T> {
        ClientBuilder {
            environment,
            transport,
            coder: Arc::new(JsonCoder),
            config: ClientConfig::default(),
            record_events: false,
            sink: None,
        }
    }

    pub fn environment(&self) -> &Environment {
        self.builder.environment()
    }

    pub fn config(&self) -> &ClientConfig {
        self.builder.config()
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// Recorded network events, oldest first. Empty unless the client was
    /// built with `record_events`.
    pub fn events(&self) -> Vec<NetworkEvent> {
        self.events
            .as_ref()
            .map(|store| store.snapshot())
            .unwrap_or_default()
    }

    /// The transport request `request` would send.
    pub fn prepare<B: Serialize, R>(&self, request: &Request<B, R>) -> Result<HttpRequest, ClientError> {
        self.builder.build(request)
    }

    /// Send `request` and decode its response body.
    pub async fn send<B, R>(&self, request: &Request<B, R>) -> Result<R, ClientError>
    where
        B: Serialize,
        R: DeserializeOwned,
    {
        Ok(self.send_response(request).await?.value)
    }

    /// Send `request` and decode its response body, keeping the headers.
    pub async fn send_response<B, R>(&self, request: &Request<B, R>) -> Result<Response<R>, ClientError>
    where
        B: Serialize,
        R: DeserializeOwned,
    {
        let raw = self.send_raw(request).await?;
        let value = self.decode(&raw.value)?;
        Ok(Response {
            value,
            headers: raw.headers,
        })
    }

    /// Send `request` and return the undecoded body.
    pub async fn send_raw<B: Serialize, R>(
        &self,
        request: &Request<B, R>,
    ) -> Result<Response<Bytes>, ClientError> {
        let http = self.builder.build(request)?;
        self.executor.send(http).await
    }

    /// Stream decoded events from a Server-Sent-Events endpoint.
    pub fn sse_stream<V, B, R>(&self, request: &Request<B, R>) -> Result<JsonStream<V>, ClientError>
    where
        V: DeserializeOwned + Send + 'static,
        B: Serialize,
    {
        let http = self.builder.build(request)?;
        Ok(self.sse.json_stream(http))
    }

    /// Open a WebSocket route and decode incoming messages as `In`.
    pub async fn connect_websocket<In, Out>(
        &self,
        route: &WebSocketRoute<Out>,
    ) -> Result<WebSocketFeed<In>, ClientError>
    where
        In: DeserializeOwned + Send + 'static,
        Out: Serialize,
    {
        self.websocket.connect_json(route).await
    }

    fn decode<R: DeserializeOwned>(&self, body: &[u8]) -> Result<R, ClientError> {
        // Empty bodies (204 and friends) decode as JSON null.
        let body = if body.is_empty() { b"null".as_slice() } else { body };
        decode_with(self.builder.coder(), body).map_err(|err| {
            error!(
                error = %err,
                body = %crate::executor::snippet(body),
                "Failed to decode response."
            );
            ClientError::Decoding(err)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde::Deserialize;

    use super::*;
    use crate::coding::SnakeCaseCoder;
    use crate::environment::Scheme;
    use crate::http::{HttpResponse, StreamingResponse};

    struct RecordingTransport {
        status: u16,
        body: &'static str,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl RecordingTransport {
        fn new(status: u16, body: &'static str) -> Self {
            Self {
                status,
                body,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    impl Transport for RecordingTransport {
        async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ClientError> {
            self.requests.lock().unwrap().push(request);
            Ok(HttpResponse {
                status: self.status,
                headers: [("X-Ratelimit-Allowed", "5"), ("X-Ratelimit-Used", "1")]
                    .into_iter()
                    .collect(),
                body: Bytes::from_static(self.body.as_bytes()),
            })
        }

        async fn open(&self, _request: HttpRequest) -> Result<StreamingResponse, ClientError> {
            Err(ClientError::InvalidResponse)
        }
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct User {
        id: u32,
        name: String,
    }

    fn environment() -> Environment {
        Environment::new(Scheme::Https, "api.example.com").with_api_version("v1")
    }

    #[tokio::test]
    async fn send_decodes_typed_response() {
        let client = Client::new(
            environment(),
            RecordingTransport::new(200, r#"{"id":7,"name":"Ada"}"#),
        );
        let user = client.send(&Request::<_, User>::get("users/7")).await.unwrap();
        assert_eq!(
            user,
            User {
                id: 7,
                name: "Ada".to_string()
            }
        );
    }

    #[tokio::test]
    async fn send_response_updates_rate_limiter() {
        let client = Client::new(environment(), RecordingTransport::new(200, "{}"));
        let response = client
            .send_response(&Request::<_, serde_json::Value>::get("ping"))
            .await
            .unwrap();
        assert_eq!(response.headers.get("x-ratelimit-allowed"), Some("5"));
        let state = client.rate_limiter().state().await;
        assert_eq!(state.limit, Some(5));
        assert_eq!(state.remaining, Some(4));
    }

    #[tokio::test]
    async fn empty_body_decodes_as_unit() {
        let client = Client::new(environment(), RecordingTransport::new(204, ""));
        client
            .send(&Request::<_, ()>::delete("users/7"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn decode_failure_is_reported() {
        let client = Client::new(environment(), RecordingTransport::new(200, "not json"));
        let err = client
            .send(&Request::<_, User>::get("users/7"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Decoding(_)));
    }

    #[tokio::test]
    async fn snake_case_coder_rewrites_both_directions() {
        #[derive(Debug, Serialize, Deserialize, PartialEq)]
        struct Profile {
            #[serde(rename = "displayName")]
            display_name: String,
        }

        let client = Client::builder(
            environment(),
            RecordingTransport::new(200, r#"{"display_name":"Ada"}"#),
        )
        .coder(SnakeCaseCoder)
        .build();
        let request = Request::<_, Profile>::put("profile").with_body(Profile {
            display_name: "Grace".to_string(),
        });
        let profile = client.send(&request).await.unwrap();
        assert_eq!(profile.display_name, "Ada");

        let sent = client.prepare(&request).unwrap();
        assert_eq!(
            sent.body.as_deref(),
            Some(br#"{"display_name":"Grace"}"#.as_slice())
        );
    }

    #[tokio::test]
    async fn recorded_events_follow_configured_capacity() {
        let config = ClientConfig {
            event_capacity: 2,
            ..ClientConfig::default()
        };
        let client = Client::builder(environment(), RecordingTransport::new(200, "{}"))
            .config(config)
            .record_events()
            .build();
        for path in ["a", "b", "c"] {
            client
                .send_raw(&Request::<_, ()>::get(path))
                .await
                .unwrap();
        }
        let urls: Vec<String> = client.events().into_iter().map(|e| e.url).collect();
        assert_eq!(
            urls,
            [
                "https://api.example.com/v1/b",
                "https://api.example.com/v1/c"
            ]
        );
    }

    #[tokio::test]
    async fn events_are_off_by_default() {
        let client = Client::new(environment(), RecordingTransport::new(200, "{}"));
        client
            .send_raw(&Request::<_, ()>::get("a"))
            .await
            .unwrap();
        assert!(client.events().is_empty());
    }
}
