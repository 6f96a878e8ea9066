//! Server-Sent Events consumption.
//!
//! The first non-blank line picks the framing. A `data:` prefix means SSE:
//! every `data:` line carries one JSON value and other lines are ignored.
//! Anything else means the body is one JSON array, decoded once the source
//! closes and yielded element by element.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::BytesMut;
use futures::{stream, StreamExt};
use serde::de::DeserializeOwned;
use tracing::{debug, error, warn};

use super::{JsonStream, LineReader};
use crate::coding::{decode_with, JsonCoding};
use crate::error::{ClientError, ErrorPayload, NetworkError};
use crate::http::{is_success, HttpRequest, StreamingResponse};
use crate::transport::Transport;

const DATA_PREFIX: &str = "data:";

/// Opens streaming requests and decodes their events.
pub struct SseExecutor<T: Transport> {
    transport: Arc<T>,
    coder: Arc<dyn JsonCoding>,
}

impl<T: Transport> Clone for SseExecutor<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            coder: Arc::clone(&self.coder),
        }
    }
}

impl<T: Transport> SseExecutor<T> {
    pub fn new(transport: Arc<T>, coder: Arc<dyn JsonCoding>) -> Self {
        Self { transport, coder }
    }

    /// Stream decoded values from `request`.
    ///
    /// The connection is opened when the stream is first polled. Status and
    /// decode failures end the stream with that error.
    pub fn json_stream<V>(&self, request: HttpRequest) -> JsonStream<V>
    where
        V: DeserializeOwned + Send + 'static,
    {
        let machine = Machine {
            coder: Arc::clone(&self.coder),
            phase: Phase::Connecting {
                transport: Arc::clone(&self.transport),
                request,
            },
        };
        stream::unfold(machine, |mut machine| async move {
            let item = machine.advance().await?;
            Some((item, machine))
        })
        .boxed()
    }
}

enum Phase<T, V> {
    Connecting { transport: Arc<T>, request: HttpRequest },
    AwaitingFirstLine(LineReader),
    Array(VecDeque<V>),
    Events(LineReader),
    Done,
}

struct Machine<T, V> {
    coder: Arc<dyn JsonCoding>,
    phase: Phase<T, V>,
}

impl<T: Transport, V: DeserializeOwned> Machine<T, V> {
    async fn advance(&mut self) -> Option<Result<V, ClientError>> {
        loop {
            self.phase = match std::mem::replace(&mut self.phase, Phase::Done) {
                Phase::Connecting { transport, request } => {
                    match connect(transport.as_ref(), request).await {
                        Ok(reader) => Phase::AwaitingFirstLine(reader),
                        Err(err) => return Some(Err(err)),
                    }
                }
                Phase::AwaitingFirstLine(reader) => {
                    match first_line(self.coder.as_ref(), reader).await {
                        Ok(Some((value, next))) => {
                            self.phase = next;
                            return Some(Ok(value));
                        }
                        Ok(None) => return None,
                        Err(err) => return Some(Err(err)),
                    }
                }
                Phase::Array(mut values) => {
                    let value = values.pop_front()?;
                    self.phase = Phase::Array(values);
                    return Some(Ok(value));
                }
                Phase::Events(mut reader) => match reader.next_line().await {
                    Ok(Some(line)) => match line.strip_prefix(DATA_PREFIX) {
                        Some(payload) => {
                            let value = decode::<V>(self.coder.as_ref(), payload.as_bytes());
                            if value.is_ok() {
                                self.phase = Phase::Events(reader);
                            }
                            return Some(value);
                        }
                        None => Phase::Events(reader),
                    },
                    Ok(None) => {
                        debug!("Event stream closed.");
                        return None;
                    }
                    Err(err) => {
                        warn!(error = %err, "Event stream interrupted.");
                        return Some(Err(err));
                    }
                },
                Phase::Done => return None,
            };
        }
    }
}

/// Read the first non-blank line and pick the framing from it.
async fn first_line<T, V: DeserializeOwned>(
    coder: &dyn JsonCoding,
    mut reader: LineReader,
) -> Result<Option<(V, Phase<T, V>)>, ClientError> {
    let first = loop {
        match reader.next_line().await? {
            Some(line) if line.trim().is_empty() => continue,
            Some(line) => break line,
            None => return Ok(None),
        }
    };

    if let Some(payload) = first.strip_prefix(DATA_PREFIX) {
        let value = decode::<V>(coder, payload.as_bytes())?;
        return Ok(Some((value, Phase::Events(reader))));
    }

    debug!("Event stream has no data prefix, reading as a JSON array.");
    let mut body = first;
    while let Some(line) = reader.next_line().await? {
        body.push('\n');
        body.push_str(&line);
    }
    let mut values: VecDeque<V> = decode::<Vec<V>>(coder, body.as_bytes())?.into();
    match values.pop_front() {
        Some(value) => Ok(Some((value, Phase::Array(values)))),
        None => Ok(None),
    }
}

fn decode<D: DeserializeOwned>(coder: &dyn JsonCoding, bytes: &[u8]) -> Result<D, ClientError> {
    decode_with(coder, bytes).map_err(|err| {
        error!(error = %err, "Failed to decode stream event.");
        ClientError::Decoding(err)
    })
}

async fn connect<T: Transport>(
    transport: &T,
    request: HttpRequest,
) -> Result<LineReader, ClientError> {
    let url = request.url.clone();
    debug!(%url, "Opening event stream.");
    let response = transport.open(request).await?;
    if is_success(response.status) {
        return Ok(LineReader::from_response(response));
    }

    let status = response.status;
    let body = read_all(response).await?;
    error!(
        %url,
        status,
        body = %crate::executor::snippet(&body),
        "Event stream rejected."
    );
    let payload = if body.iter().all(u8::is_ascii_whitespace) {
        ErrorPayload::Text(format!("HTTP {status}"))
    } else {
        ErrorPayload::from_body(&body)
    };
    Err(NetworkError::Status { status, payload }.into())
}

async fn read_all(mut response: StreamingResponse) -> Result<BytesMut, ClientError> {
    let mut body = BytesMut::new();
    while let Some(chunk) = response.body.next().await {
        body.extend_from_slice(&chunk?);
    }
    Ok(body)
}
