//! Reqwest-based transport.

use futures::{StreamExt as _, TryStreamExt as _};

use crate::error::{ClientError, NetworkError};
use crate::http::{Headers, HttpMethod, HttpRequest, HttpResponse, StreamingResponse};
use crate::transport::Transport;

/// A [`Transport`] backed by [`reqwest`].
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing, preconfigured [`reqwest::Client`].
    #[must_use]
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn request_builder(&self, request: HttpRequest) -> reqwest::RequestBuilder {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };
        let mut builder = self.client.request(method, request.url);
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        builder
    }
}

impl Transport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ClientError> {
        let timeout = request.timeout;
        let response = self
            .request_builder(request)
            .timeout(timeout)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status().as_u16();
        let headers = convert_headers(response.headers());
        let body = response.bytes().await.map_err(map_reqwest_error)?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    async fn open(&self, request: HttpRequest) -> Result<StreamingResponse, ClientError> {
        // Only the wait for response headers is bounded; the body may stay
        // open for as long as the server keeps streaming.
        let timeout = request.timeout;
        let pending = self.request_builder(request).send();
        let response = tokio::time::timeout(timeout, pending)
            .await
            .map_err(|_| NetworkError::Timeout)?
            .map_err(map_reqwest_error)?;

        let status = response.status().as_u16();
        let headers = convert_headers(response.headers());
        let body = response.bytes_stream().map_err(map_reqwest_error).boxed();

        Ok(StreamingResponse {
            status,
            headers,
            body,
        })
    }
}

fn convert_headers(map: &reqwest::header::HeaderMap) -> Headers {
    map.iter()
        .map(|(name, value)| {
            (
                name.as_str().to_owned(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

/// Map a reqwest error to our [`ClientError`].
fn map_reqwest_error(err: reqwest::Error) -> ClientError {
    if err.is_timeout() {
        NetworkError::Timeout.into()
    } else {
        NetworkError::Transport(err.to_string()).into()
    }
}
