use std::io;
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use http::header::{CONTENT_LENGTH, HeaderValue, USER_AGENT};

use crate::body::WireBody;
use crate::transport::{Transport, TransportError};
use crate::version::user_agent;

#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Base URL; the request path is appended to it.
    pub url: String,
    pub timeout: Duration,
}

impl HttpTransportConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Sends exchanges over HTTP. Request tails are streamed; response bodies are
/// handed back unbuffered.
#[derive(Clone)]
pub struct HttpTransport {
    base: String,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Result<Self, TransportError> {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&user_agent()) {
            headers.insert(USER_AGENT, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            base: config.url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url_for(&self, uri: &http::Uri) -> String {
        let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
        format!("{}{}", self.base, path)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        request: http::Request<WireBody>,
    ) -> Result<http::Response<WireBody>, TransportError> {
        let (mut parts, body) = request.into_parts();
        let url = self.url_for(&parts.uri);
        // reqwest derives the length from the body itself.
        parts.headers.remove(CONTENT_LENGTH);

        let body = match body {
            WireBody::Full(bytes) => reqwest::Body::from(bytes),
            WireBody::Streaming(stream) => reqwest::Body::wrap_stream(stream),
        };

        tracing::trace!(%url, method = %parts.method, "Sending HTTP exchange");
        let response = self
            .client
            .request(parts.method, url)
            .headers(parts.headers)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers().clone();
        let stream = response.bytes_stream().map_err(io::Error::other);

        let mut out = http::Response::new(WireBody::Streaming(Box::pin(stream)));
        *out.status_mut() = status;
        *out.headers_mut() = headers;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timeout_is_thirty_seconds() {
        let config = HttpTransportConfig::new("http://localhost:8787");
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[test]
    fn url_joins_base_and_path() {
        let transport = HttpTransport::new(HttpTransportConfig::new("http://localhost:8787/")).unwrap();
        let uri: http::Uri = "/rpc/v1?x=1".parse().unwrap();
        assert_eq!(transport.url_for(&uri), "http://localhost:8787/rpc/v1?x=1");

        let root: http::Uri = "/".parse().unwrap();
        assert_eq!(transport.url_for(&root), "http://localhost:8787/");
    }
}
