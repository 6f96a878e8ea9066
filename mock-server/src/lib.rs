use std::collections::{BTreeMap, BTreeSet};
use std::convert::Infallible;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Form, Query, RawQuery,
    },
    http::{header, HeaderMap, Method, StatusCode},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    routing::{any, get, post},
    Json, Router,
};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Reset window advertised by `/v1/rate-limited`.
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_millis(200);

/// Interval between events on `/v1/events/ticking`.
pub const TICK: Duration = Duration::from_millis(20);

/// Ids of `/v1/events/ticking` streams the server is still writing to.
static LIVE_STREAMS: Mutex<BTreeSet<String>> = Mutex::new(BTreeSet::new());

/// Whether the ticking stream opened with `?id=<id>` is still being served.
pub fn stream_is_live(id: &str) -> bool {
    LIVE_STREAMS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .contains(id)
}

/// Marks a ticking stream live until the response body is dropped.
struct LiveStream(String);

impl LiveStream {
    fn register(id: String) -> Self {
        LIVE_STREAMS
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone());
        Self(id)
    }
}

impl Drop for LiveStream {
    fn drop(&mut self) {
        debug!(id = %self.0, "Ticking stream closed.");
        LIVE_STREAMS
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.0);
    }
}

#[derive(Deserialize)]
struct Ticket {
    id: String,
}

/// What `/v1/echo` saw.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Echo {
    pub method: String,
    /// Raw query string as received, without the leading `?`.
    pub query: Option<String>,
    /// Header names lowercased.
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

/// Payload of every streamed fixture.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub name: String,
}

impl Item {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

pub fn app() -> Router {
    Router::new()
        .route("/v1/echo", any(echo))
        .route("/v1/form", post(form))
        .route("/v1/rate-limited", get(rate_limited))
        .route("/v1/errors/api", get(api_error))
        .route("/v1/errors/text", get(text_error))
        .route("/v1/events", get(events))
        .route("/v1/events/malformed", get(malformed_events))
        .route("/v1/events/array", get(array_events))
        .route("/v1/events/unavailable", get(unavailable_events))
        .route("/v1/events/ticking", get(ticking_events))
        .route("/v1/feed", get(feed))
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "Mock server listening.");
    }
    axum::serve(listener, app()).await
}

async fn echo(method: Method, RawQuery(query): RawQuery, headers: HeaderMap, body: Bytes) -> Json<Echo> {
    let headers = headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();
    Json(Echo {
        method: method.to_string(),
        query,
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

async fn form(Form(fields): Form<BTreeMap<String, String>>) -> Json<BTreeMap<String, String>> {
    Json(fields)
}

async fn rate_limited() -> impl IntoResponse {
    let expiry = SystemTime::now() + RATE_LIMIT_WINDOW;
    let expiry_ms = expiry
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    (
        [
            ("X-Ratelimit-Allowed", "1".to_string()),
            ("X-Ratelimit-Available", "0".to_string()),
            ("X-Ratelimit-Expiry", expiry_ms.to_string()),
        ],
        Json(serde_json::json!({ "ok": true })),
    )
}

async fn api_error() -> impl IntoResponse {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({
            "object": "error",
            "status": 400,
            "code": "validation_error",
            "message": "name is required",
        })),
    )
}

async fn text_error() -> impl IntoResponse {
    (StatusCode::INTERNAL_SERVER_ERROR, "internal failure")
}

fn sse_from(
    payloads: Vec<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    Sse::new(stream::iter(
        payloads.into_iter().map(|data| Ok(Event::default().data(data))),
    ))
}

fn item_json(name: &str) -> String {
    serde_json::to_string(&Item::new(name)).unwrap_or_default()
}

async fn events() -> impl IntoResponse {
    sse_from(vec![item_json("A"), item_json("B")])
}

async fn malformed_events() -> impl IntoResponse {
    sse_from(vec![
        item_json("A"),
        "{\"name\":".to_string(),
        item_json("C"),
    ])
}

async fn array_events() -> impl IntoResponse {
    Json(vec![Item::new("A"), Item::new("B")])
}

async fn unavailable_events() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        [(header::CONTENT_TYPE, "text/plain")],
        "maintenance",
    )
        .into_response()
}

/// Emits `tick` every [`TICK`] until the client goes away.
async fn ticking_events(Query(ticket): Query<Ticket>) -> impl IntoResponse {
    let guard = LiveStream::register(ticket.id);
    let ticks = stream::unfold(guard, |guard| async move {
        tokio::time::sleep(TICK).await;
        Some((Ok::<_, Infallible>(Event::default().data(item_json("tick"))), guard))
    });
    Sse::new(ticks)
}

async fn feed(upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(serve_feed)
}

/// Sends `A` as text and `B` as binary, then echoes text frames.
async fn serve_feed(mut socket: WebSocket) {
    let greeting = [
        Message::Text(item_json("A").into()),
        Message::Binary(item_json("B").into_bytes().into()),
    ];
    for message in greeting {
        if socket.send(message).await.is_err() {
            return;
        }
    }

    while let Some(Ok(message)) = socket.recv().await {
        match message {
            Message::Text(text) => {
                debug!(text = text.as_str(), "Echoing WebSocket frame.");
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}
