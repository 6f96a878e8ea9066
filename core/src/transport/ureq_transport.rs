//! Ureq-based transport.
//!
//! ureq is blocking, so every call runs on tokio's blocking pool. Streaming
//! bodies are read in fixed-size chunks on that thread and forwarded over a
//! bounded channel.
//!
//! The request timeout is handed to ureq itself so an abandoned call cannot
//! hold a blocking thread past it. `execute` uses it as a global deadline.
//! `open` applies it to connecting, to the response head and to the whole
//! body, so a ureq stream ends with [`NetworkError::Timeout`] once `timeout`
//! has elapsed. Dropping a stream closes the connection after the read that
//! is in flight returns, which is at the latest that same deadline.

use std::io::Read as _;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt as _;
use tokio::sync::{mpsc, oneshot};

use crate::error::{ClientError, NetworkError};
use crate::http::{Headers, HttpRequest, HttpResponse, StreamingResponse};
use crate::transport::Transport;

const CHUNK_SIZE: usize = 8 * 1024;
const CHANNEL_DEPTH: usize = 16;

/// A [`Transport`] backed by [`ureq`].
#[derive(Debug, Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new() -> Self {
        let agent = ureq::Agent::config_builder()
            // Status interpretation belongs to the executor.
            .http_status_as_error(false)
            .build()
            .new_agent();
        Self { agent }
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for UreqTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ClientError> {
        let agent = self.agent.clone();
        let timeout = request.timeout;
        let call = tokio::task::spawn_blocking(move || {
            let response = run(&agent, request, Deadline::Exchange)?;
            let (parts, body) = response.into_parts();
            let mut body_bytes = Vec::new();
            body.into_reader()
                .read_to_end(&mut body_bytes)
                .map_err(map_read_error)?;
            Ok::<_, ClientError>(HttpResponse {
                status: parts.status.as_u16(),
                headers: convert_headers(&parts.headers),
                body: Bytes::from(body_bytes),
            })
        });
        await_blocking(call, timeout).await
    }

    async fn open(&self, request: HttpRequest) -> Result<StreamingResponse, ClientError> {
        let agent = self.agent.clone();
        let timeout = request.timeout;
        let (head_tx, head_rx) = oneshot::channel();
        let (chunk_tx, chunk_rx) = mpsc::channel::<Result<Bytes, ClientError>>(CHANNEL_DEPTH);

        tokio::task::spawn_blocking(move || {
            let response = match run(&agent, request, Deadline::Stream) {
                Ok(response) => response,
                Err(err) => {
                    let _ = head_tx.send(Err(err));
                    return;
                }
            };
            let (parts, body) = response.into_parts();
            let head = (parts.status.as_u16(), convert_headers(&parts.headers));
            if head_tx.send(Ok(head)).is_err() {
                return;
            }

            let mut reader = body.into_reader();
            let mut buf = vec![0u8; CHUNK_SIZE];
            while !chunk_tx.is_closed() {
                let item = match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => Ok(Bytes::copy_from_slice(&buf[..n])),
                    Err(e) => Err(map_read_error(e)),
                };
                let failed = item.is_err();
                if chunk_tx.blocking_send(item).is_err() || failed {
                    break;
                }
            }
        });

        let (status, headers) = tokio::time::timeout(timeout, head_rx)
            .await
            .map_err(|_| NetworkError::Timeout)?
            .map_err(|_| NetworkError::Transport("reader thread exited".to_string()))??;

        let body = futures::stream::unfold(chunk_rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed();

        Ok(StreamingResponse {
            status,
            headers,
            body,
        })
    }
}

/// How the request timeout is applied inside ureq.
#[derive(Debug, Clone, Copy)]
enum Deadline {
    /// One deadline for the whole exchange, body included.
    Exchange,
    /// Separate bounds on connecting, the response head and the body.
    Stream,
}

fn run(
    agent: &ureq::Agent,
    request: HttpRequest,
    deadline: Deadline,
) -> Result<ureq::http::Response<ureq::Body>, ClientError> {
    let timeout = request.timeout;
    let mut builder = ureq::http::Request::builder()
        .method(request.method.as_str())
        .uri(request.url.as_str());
    for (name, value) in request.headers.iter() {
        builder = builder.header(name, value);
    }

    let result = match request.body {
        Some(body) => {
            let req = builder
                .body(body.to_vec())
                .map_err(|e| NetworkError::Transport(e.to_string()))?;
            send(agent, req, deadline, timeout)
        }
        None => {
            let req = builder
                .body(())
                .map_err(|e| NetworkError::Transport(e.to_string()))?;
            send(agent, req, deadline, timeout)
        }
    };

    result.map_err(map_ureq_error)
}

fn send<S: ureq::AsSendBody>(
    agent: &ureq::Agent,
    request: ureq::http::Request<S>,
    deadline: Deadline,
    timeout: Duration,
) -> Result<ureq::http::Response<ureq::Body>, ureq::Error> {
    let configured = agent.configure_request(request);
    let request = match deadline {
        Deadline::Exchange => configured.timeout_global(Some(timeout)).build(),
        Deadline::Stream => configured
            .timeout_connect(Some(timeout))
            .timeout_recv_response(Some(timeout))
            .timeout_recv_body(Some(timeout))
            .build(),
    };
    agent.run(request)
}

async fn await_blocking<T>(
    call: tokio::task::JoinHandle<Result<T, ClientError>>,
    timeout: Duration,
) -> Result<T, ClientError> {
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(NetworkError::Transport(join.to_string()).into()),
        Err(_) => Err(NetworkError::Timeout.into()),
    }
}

fn convert_headers(map: &ureq::http::HeaderMap) -> Headers {
    map.iter()
        .map(|(name, value)| {
            (
                name.as_str().to_owned(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

/// Body reads surface ureq failures wrapped in `io::Error`.
fn map_read_error(err: std::io::Error) -> ClientError {
    if err.kind() == std::io::ErrorKind::TimedOut {
        return NetworkError::Timeout.into();
    }
    match err.get_ref().and_then(|inner| inner.downcast_ref::<ureq::Error>()) {
        Some(ureq::Error::Timeout(_)) => NetworkError::Timeout.into(),
        _ => NetworkError::Transport(err.to_string()).into(),
    }
}

fn map_ureq_error(err: ureq::Error) -> ClientError {
    match err {
        ureq::Error::Timeout(_) => NetworkError::Timeout.into(),
        ureq::Error::HostNotFound => NetworkError::Transport("host not found".to_owned()).into(),
        ureq::Error::Io(e) => NetworkError::Transport(e.to_string()).into(),
        other => NetworkError::Transport(other.to_string()).into(),
    }
}
