//! Calling side: builds chains and resolves each in one exchange.

use std::sync::Arc;

use tracing::{debug, info};

use crate::chain::ChainHandle;
use crate::envelope::{self, EnvelopeError};
use crate::heap::StubFactory;
use crate::platform::Platform;
use crate::protocol::{CallResult, CapabilityId, ProtocolError, Submission};
use crate::transport::{Transport, TransportError};
use crate::value::{Composite, Value};

const DEFAULT_LARGE_PREFIX_BYTES: usize = 100_000;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Request path submissions are posted to.
    pub target: String,
    /// Send the first stream in a submission as the body tail instead of
    /// buffering it into the prefix.
    pub allow_tail: bool,
    /// Prefixes above this size are logged at info.
    pub large_prefix_bytes: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            target: "/".to_string(),
            allow_tail: true,
            large_prefix_bytes: std::env::var("WIRECHAIN_LARGE_PREFIX_BYTES")
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .unwrap_or(DEFAULT_LARGE_PREFIX_BYTES),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("failed to encode submission: {0}")]
    Encode(#[source] EnvelopeError),

    #[error("failed to decode result: {0}")]
    Decode(#[source] EnvelopeError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("invalid request: {0}")]
    Request(#[from] http::Error),

    #[error("remote error: {}", describe(.0))]
    Remote(Value),
}

impl RpcError {
    /// The value the remote side rejected with.
    pub fn remote_value(&self) -> Option<&Value> {
        match self {
            Self::Remote(value) => Some(value),
            _ => None,
        }
    }
}

/// Human-readable summary of a rejection value.
pub fn describe(value: &Value) -> String {
    if let Some(node) = value.as_node()
        && let Composite::Error(error) = &*node.read()
    {
        return error.to_string();
    }
    match value {
        Value::String(s) => s.clone(),
        other => other.type_name().to_string(),
    }
}

struct ClientInner {
    transport: Arc<dyn Transport>,
    config: ClientConfig,
}

/// Cheap to clone; every handle built from a client shares its transport.
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<ClientInner>,
}

impl RpcClient {
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self::with_config(transport, ClientConfig::default())
    }

    pub fn with_config(transport: impl Transport + 'static, config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                transport: Arc::new(transport),
                config,
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Handle on the remote root object.
    pub fn root(&self) -> ChainHandle {
        ChainHandle::new(self.clone(), None)
    }

    /// Handle on a capability the remote side handed out earlier.
    pub fn stub_for(&self, id: CapabilityId) -> ChainHandle {
        ChainHandle::new(self.clone(), Some(id))
    }

    pub(crate) async fn submit(&self, submission: Submission) -> Result<Value, RpcError> {
        let platform = Platform::calling(Arc::new(self.clone()));
        let config = &self.inner.config;

        let packed = envelope::pack(&submission.to_value(), &platform.reducers(), config.allow_tail)
            .await
            .map_err(RpcError::Encode)?;

        let prefix_bytes = packed.prefix_len();
        if prefix_bytes > config.large_prefix_bytes {
            info!(prefix_bytes, "Large submission prefix");
        }
        debug!(
            links = submission.chain.len(),
            target = ?submission.target,
            prefix_bytes,
            streaming = packed.tail.is_some(),
            "Sending submission"
        );

        let request = packed.into_request(http::Request::post(config.target.as_str()))?;
        let response = self.inner.transport.send(request).await?;

        let (parts, body) = response.into_parts();
        let root = envelope::unpack(&parts.headers, body, &platform.revivers())
            .await
            .map_err(RpcError::Decode)?;
        debug!(status = %parts.status, "Received call result");

        CallResult::from_value(&root)?
            .into_result()
            .map_err(RpcError::Remote)
    }
}

impl StubFactory for RpcClient {
    fn stub(&self, id: CapabilityId) -> Value {
        Value::from(self.stub_for(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ErrorKind;

    #[test]
    fn default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.target, "/");
        assert!(config.allow_tail);
        assert!(config.large_prefix_bytes > 0);
    }

    #[test]
    fn remote_errors_describe_their_value() {
        let err = RpcError::Remote(Value::error(ErrorKind::TypeError, "boom"));
        assert_eq!(err.to_string(), "remote error: TypeError: boom");

        let err = RpcError::Remote(Value::from("plain"));
        assert_eq!(err.to_string(), "remote error: plain");
        assert_eq!(err.remote_value().and_then(Value::as_str), Some("plain"));

        let err = RpcError::Remote(Value::from(3));
        assert_eq!(err.to_string(), "remote error: number");
    }
}
