//! Transport abstraction for pluggable HTTP back-ends.
//!
//! A `Transport` sends one prepared `HttpRequest`. `execute` buffers the whole
//! body; `open` hands back the status and headers as soon as they arrive and
//! streams the body, which is what the SSE executor consumes. Tests swap in
//! canned implementations without touching the executors.

use std::future::Future;

use crate::error::ClientError;
use crate::http::{HttpRequest, HttpResponse, StreamingResponse};

#[cfg(feature = "reqwest-transport")]
mod reqwest_transport;
#[cfg(feature = "reqwest-transport")]
pub use reqwest_transport::ReqwestTransport;

#[cfg(feature = "ureq-transport")]
mod ureq_transport;
#[cfg(feature = "ureq-transport")]
pub use ureq_transport::UreqTransport;

/// Sends prepared requests.
pub trait Transport: Send + Sync + 'static {
    /// Send `request` and buffer the full response body.
    fn execute(
        &self,
        request: HttpRequest,
    ) -> impl Future<Output = Result<HttpResponse, ClientError>> + Send;

    /// Send `request` and stream the response body.
    fn open(
        &self,
        request: HttpRequest,
    ) -> impl Future<Output = Result<StreamingResponse, ClientError>> + Send;
}
