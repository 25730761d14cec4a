//! Transports carry one request/response exchange per resolved chain.
//!
//! [`LocalTransport`] hands requests straight to an in-process server;
//! [`http`] sends them over the network and hosts servers behind axum.

pub mod http;
mod local;

pub use local::LocalTransport;

use async_trait::async_trait;

use crate::body::WireBody;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("invalid message: {0}")]
    Http(#[from] ::http::Error),

    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

/// Sends one request and returns its response. Status codes are not
/// interpreted; the envelope carries the outcome.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: ::http::Request<WireBody>,
    ) -> Result<::http::Response<WireBody>, TransportError>;
}
