//! Typed HTTP client core.
//!
//! # Overview
//! Describes API calls as typed `Request` values, turns them into canonical
//! transport requests, sends them through a pluggable `Transport`, and
//! decodes the results. Long-lived endpoints are consumed as streams of
//! decoded values over Server-Sent Events or WebSockets.
//!
//! # Design
//! - `RequestBuilder` is pure: URL assembly, header merging and body
//!   encoding never touch the network, so they are tested without I/O.
//! - `Transport` is the only I/O seam. `ReqwestTransport` is the default
//!   backend; `UreqTransport` runs blocking `ureq` on tokio's blocking pool.
//! - `RateLimiter` and `NetworkEventStore` own their state and serialize
//!   access internally; callers never lock anything themselves.
//! - Body coding goes through a `JsonCoding` trait object so alternate JSON
//!   conventions plug in without touching the builder or executors.
//! - The library only emits `tracing` events; installing a subscriber is up
//!   to the application.

pub mod builder;
pub mod client;
pub mod coding;
pub mod curl;
pub mod environment;
pub mod error;
pub mod events;
pub mod executor;
pub mod http;
mod raw_body;
pub mod rate_limit;
pub mod request;
pub mod stream;
pub mod transport;

pub use builder::{http_url, websocket_url, RequestBuilder};
pub use client::{Client, ClientBuilder};
pub use coding::{CodingError, JsonCoder, JsonCoding, SnakeCaseCoder};
pub use environment::{ClientConfig, Environment, Scheme, UnsupportedBodyPolicy};
pub use error::{ApiError, ClientError, ErrorCode, ErrorPayload, NetworkError};
pub use events::{EventSink, NetworkEvent, NetworkEventStore};
pub use executor::RequestExecutor;
pub use http::{is_success, Headers, HttpMethod, HttpRequest, HttpResponse, Response, StreamingResponse};
pub use rate_limit::RateLimiter;
pub use request::{NoBody, QueryItem, QueryItems, Request, RequestOptions};
pub use stream::{
    JsonStream, SseExecutor, TungsteniteSocket, WebSocket, WebSocketExecutor, WebSocketFeed,
    WebSocketMessage, WebSocketRoute,
};
#[cfg(feature = "reqwest-transport")]
pub use transport::ReqwestTransport;
pub use transport::Transport;
#[cfg(feature = "ureq-transport")]
pub use transport::UreqTransport;
