//! HTTP server implementation.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::server::RpcServer;

use super::routes::routes;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8787,
        }
    }
}

/// Bind and serve until SIGINT or SIGTERM.
pub async fn serve(config: ServerConfig, server: Arc<RpcServer>) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    serve_on(listener, server, shutdown_signal()).await
}

/// Serve on an already bound listener until `shutdown` completes.
pub async fn serve_on<F>(listener: TcpListener, server: Arc<RpcServer>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let actual_addr = listener.local_addr()?;
    info!("Starting wirechain server on {}", actual_addr);

    axum::serve(listener, routes(server))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on SIGINT, or SIGTERM on unix. A handler that cannot be installed
/// is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    use crate::body::BodyStream;
    use crate::chain::ChainHandle;
    use crate::client::RpcClient;
    use crate::heap::CapabilityHeap;
    use crate::transport::http::{HttpTransport, HttpTransportConfig};
    use crate::value::{Composite, ErrorKind, Function, Value};

    #[test]
    fn server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8787);
    }

    fn demo_root() -> Value {
        let counter = Value::object([("value", Value::from(41))]);
        Value::object([
            ("counter", Value::stub(counter)),
            (
                "upper",
                Value::function(Function::new("upper", |_, args| async move {
                    let stream = args.first().and_then(|arg| match &*arg.as_node()?.read() {
                        Composite::Stream(stream) => Some(stream.clone()),
                        _ => None,
                    });
                    let Some(stream) = stream else {
                        return Err(Value::error(ErrorKind::TypeError, "expected a stream"));
                    };
                    let bytes = stream
                        .read_all()
                        .await
                        .map_err(|e| Value::error(ErrorKind::Error, e.to_string()))?;
                    Ok(Value::from(String::from_utf8_lossy(&bytes).to_uppercase()))
                })),
            ),
        ])
    }

    #[tokio::test]
    async fn client_and_server_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(RpcServer::with_heap(demo_root(), CapabilityHeap::new()));
        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(serve_on(listener, server, async move {
            let _ = stopped.await;
        }));

        let transport = HttpTransport::new(HttpTransportConfig::new(format!("http://{addr}"))).unwrap();
        let client = RpcClient::new(transport);

        let body = BodyStream::from_bytes(Bytes::from_static(b"streamed"));
        let upper = client.root().call("upper", [Value::stream(body)]).await.unwrap();
        assert_eq!(upper.as_str(), Some("STREAMED"));

        let returned = client.root().get("counter").await.unwrap();
        let counter = ChainHandle::from_value(&returned).unwrap();
        let value = counter.get("value").await.unwrap();
        assert_eq!(value.as_f64(), Some(41.0));

        // Pooled keep-alive connections would hold up graceful shutdown.
        drop((returned, counter, client));
        stop.send(()).unwrap();
        task.await.unwrap().unwrap();
    }
}
