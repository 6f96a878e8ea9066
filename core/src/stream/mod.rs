//! Long-lived response consumption.
//!
//! # Design
//! Both executors hand back a `JsonStream<V>`: a boxed stream of decoded
//! values that ends exactly once, either cleanly (`None`) or after yielding
//! one `Err`. Dropping the stream closes the underlying connection.

use futures::stream::BoxStream;

use crate::error::ClientError;

mod lines;
pub mod sse;
pub mod websocket;

pub use lines::LineReader;
pub use sse::SseExecutor;
pub use websocket::{
    TungsteniteSocket, WebSocket, WebSocketExecutor, WebSocketFeed, WebSocketMessage,
    WebSocketRoute,
};

/// Decoded values from a streaming endpoint, in arrival order.
pub type JsonStream<V> = BoxStream<'static, Result<V, ClientError>>;
