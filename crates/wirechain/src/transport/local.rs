use std::sync::Arc;

use async_trait::async_trait;

use super::{Transport, TransportError};
use crate::body::WireBody;
use crate::server::RpcServer;

/// Delivers requests to a server in the same process. Bodies are handed
/// over as-is, so tails stay streaming end to end.
#[derive(Clone)]
pub struct LocalTransport {
    server: Arc<RpcServer>,
}

impl LocalTransport {
    pub fn new(server: Arc<RpcServer>) -> Self {
        Self { server }
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn send(
        &self,
        request: http::Request<WireBody>,
    ) -> Result<http::Response<WireBody>, TransportError> {
        Ok(self.server.handle(request).await)
    }
}
