//! WebSocket feeds.
//!
//! # Design
//! `WebSocket` is the minimal socket surface the client needs. The JSON
//! adapter only sees `receive()`, so tests drive it with canned messages.
//! `TungsteniteSocket` splits the connection: the write half sits behind an
//! async mutex for `send`/`ping`/`close`, the read half is handed out once by
//! `receive()`.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{self, BoxStream, SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

use super::JsonStream;
use crate::builder::websocket_url;
use crate::coding::{decode_with, encode_with, CodingError, JsonCoding};
use crate::environment::{ClientConfig, Environment};
use crate::error::{ClientError, NetworkError};
use crate::http::Headers;
use crate::request::{NoBody, QueryItem, RequestOptions};

/// One WebSocket data frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebSocketMessage {
    Text(String),
    Binary(Bytes),
}

/// An open WebSocket connection.
pub trait WebSocket: Send + Sync + 'static {
    fn send(
        &self,
        message: WebSocketMessage,
    ) -> impl Future<Output = Result<(), ClientError>> + Send;

    fn ping(&self) -> impl Future<Output = Result<(), ClientError>> + Send;

    /// Incoming data frames, in arrival order. Control frames are not
    /// surfaced; a close frame ends the stream.
    fn receive(&self) -> BoxStream<'static, Result<WebSocketMessage, ClientError>>;

    fn close(&self) -> impl Future<Output = Result<(), ClientError>> + Send;
}

type Connection = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// `WebSocket` over `tokio-tungstenite`.
pub struct TungsteniteSocket {
    sink: tokio::sync::Mutex<SplitSink<Connection, Message>>,
    source: Mutex<Option<SplitStream<Connection>>>,
}

impl TungsteniteSocket {
    /// Connect to `url`, sending `headers` with the upgrade request.
    pub async fn connect(url: &Url, headers: &Headers) -> Result<Self, ClientError> {
        let mut request = url.as_str().into_client_request().map_err(socket_error)?;
        for (name, value) in headers.iter() {
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|err| {
                NetworkError::WebSocket(format!("invalid header name {name}: {err}"))
            })?;
            let header_value = HeaderValue::from_str(value).map_err(|err| {
                NetworkError::WebSocket(format!("invalid value for header {name}: {err}"))
            })?;
            request.headers_mut().insert(header_name, header_value);
        }

        debug!(%url, "Connecting WebSocket.");
        let (connection, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(socket_error)?;
        let (sink, source) = connection.split();
        Ok(Self {
            sink: tokio::sync::Mutex::new(sink),
            source: Mutex::new(Some(source)),
        })
    }

    async fn send_frame(&self, message: Message) -> Result<(), ClientError> {
        self.sink.lock().await.send(message).await.map_err(socket_error)
    }
}

impl WebSocket for TungsteniteSocket {
    async fn send(&self, message: WebSocketMessage) -> Result<(), ClientError> {
        let frame = match message {
            WebSocketMessage::Text(text) => Message::text(text),
            WebSocketMessage::Binary(bytes) => Message::binary(bytes),
        };
        self.send_frame(frame).await
    }

    async fn ping(&self) -> Result<(), ClientError> {
        self.send_frame(Message::Ping(Bytes::new())).await
    }

    fn receive(&self) -> BoxStream<'static, Result<WebSocketMessage, ClientError>> {
        let source = self
            .source
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(source) = source else {
            let err = NetworkError::WebSocket("receive stream already taken".to_string());
            return stream::once(async move { Err(err.into()) }).boxed();
        };

        stream::unfold(source, |mut source| async move {
            loop {
                match source.next().await? {
                    Ok(Message::Text(text)) => {
                        return Some((Ok(WebSocketMessage::Text(text.as_str().to_owned())), source))
                    }
                    Ok(Message::Binary(bytes)) => {
                        return Some((Ok(WebSocketMessage::Binary(bytes)), source))
                    }
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "WebSocket closed by peer.");
                        return None;
                    }
                    Ok(_) => continue,
                    Err(err) => {
                        warn!(error = %err, "WebSocket read failed.");
                        return Some((Err(socket_error(err)), source));
                    }
                }
            }
        })
        .boxed()
    }

    async fn close(&self) -> Result<(), ClientError> {
        self.sink.lock().await.close().await.map_err(socket_error)
    }
}

fn socket_error(err: tungstenite::Error) -> ClientError {
    NetworkError::WebSocket(err.to_string()).into()
}

/// Decode every message of `messages` as JSON.
///
/// Text frames are decoded as UTF-8 JSON, binary frames directly. The first
/// receive or decode error ends the stream.
pub fn json_stream<V>(
    messages: BoxStream<'static, Result<WebSocketMessage, ClientError>>,
    coder: Arc<dyn JsonCoding>,
) -> JsonStream<V>
where
    V: DeserializeOwned + Send + 'static,
{
    stream::unfold(Some(messages), move |messages| {
        let coder = Arc::clone(&coder);
        async move {
            let mut messages = messages?;
            let decoded = match messages.next().await? {
                Ok(WebSocketMessage::Text(text)) => decode_with(coder.as_ref(), text.as_bytes()),
                Ok(WebSocketMessage::Binary(bytes)) => decode_with(coder.as_ref(), &bytes),
                Err(err) => return Some((Err(err), None)),
            };
            match decoded {
                Ok(value) => Some((Ok(value), Some(messages))),
                Err(err) => {
                    warn!(error = %err, "Failed to decode WebSocket message.");
                    Some((Err(ClientError::Decoding(err)), None))
                }
            }
        }
    })
    .boxed()
}

/// A WebSocket endpoint: path, options and an optional first message.
#[derive(Debug, Clone)]
pub struct WebSocketRoute<Out = NoBody> {
    path: String,
    options: RequestOptions,
    initial_message: Option<Out>,
}

impl WebSocketRoute<NoBody> {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            options: RequestOptions::default(),
            initial_message: None,
        }
    }
}

impl<Out> WebSocketRoute<Out> {
    /// Send `message` as a JSON text frame as soon as the socket opens.
    pub fn with_initial_message<O: Serialize>(self, message: O) -> WebSocketRoute<O> {
        WebSocketRoute {
            path: self.path,
            options: self.options,
            initial_message: Some(message),
        }
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.query_items.push(QueryItem::new(name, value));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.headers.insert(name, value);
        self
    }

    /// Bound on the opening handshake.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn options(&self) -> &RequestOptions {
        &self.options
    }

    pub fn initial_message(&self) -> Option<&Out> {
        self.initial_message.as_ref()
    }
}

/// An open socket together with its decoded incoming values.
pub struct WebSocketFeed<In, S = TungsteniteSocket> {
    pub socket: Arc<S>,
    pub values: JsonStream<In>,
}

/// Opens WebSocket routes against an environment.
#[derive(Clone)]
pub struct WebSocketExecutor {
    environment: Arc<Environment>,
    coder: Arc<dyn JsonCoding>,
    default_timeout: Duration,
}

impl WebSocketExecutor {
    pub fn new(environment: Arc<Environment>, coder: Arc<dyn JsonCoding>) -> Self {
        Self {
            environment,
            coder,
            default_timeout: ClientConfig::default().default_timeout,
        }
    }

    /// Handshake bound for routes that set no timeout of their own.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// The `ws`/`wss` URL for `route`.
    pub fn url<Out>(&self, route: &WebSocketRoute<Out>) -> Result<Url, ClientError> {
        websocket_url(&self.environment, route.path(), &route.options().query_items)
    }

    /// Environment headers overlaid with the route's headers.
    pub fn headers<Out>(&self, route: &WebSocketRoute<Out>) -> Headers {
        self.environment
            .default_headers()
            .merged(&route.options().headers)
    }

    /// Connect to `route` and send its initial message, if any.
    pub async fn connect<Out: Serialize>(
        &self,
        route: &WebSocketRoute<Out>,
    ) -> Result<TungsteniteSocket, ClientError> {
        let url = self.url(route)?;
        let timeout = route.options().timeout.unwrap_or(self.default_timeout);
        let headers = self.headers(route);
        let socket = tokio::time::timeout(timeout, TungsteniteSocket::connect(&url, &headers))
            .await
            .map_err(|_| {
                warn!(%url, ?timeout, "WebSocket handshake timed out.");
                NetworkError::Timeout
            })??;
        if let Some(message) = route.initial_message() {
            socket.send(self.text_frame(message)?).await?;
        }
        Ok(socket)
    }

    /// Connect to `route` and decode every incoming message as `In`.
    pub async fn connect_json<In, Out>(
        &self,
        route: &WebSocketRoute<Out>,
    ) -> Result<WebSocketFeed<In>, ClientError>
    where
        In: DeserializeOwned + Send + 'static,
        Out: Serialize,
    {
        let socket = self.connect(route).await?;
        let values = json_stream(socket.receive(), Arc::clone(&self.coder));
        Ok(WebSocketFeed {
            socket: Arc::new(socket),
            values,
        })
    }

    fn text_frame<Out: Serialize>(&self, message: &Out) -> Result<WebSocketMessage, ClientError> {
        let bytes = encode_with(self.coder.as_ref(), message).map_err(ClientError::Encoding)?;
        let text = String::from_utf8(bytes)
            .map_err(|err| ClientError::Encoding(CodingError::new(err)))?;
        Ok(WebSocketMessage::Text(text))
    }
}
