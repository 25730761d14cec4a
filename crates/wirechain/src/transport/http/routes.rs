//! HTTP route handlers.

use std::io;
use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::{Request, State},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use futures::TryStreamExt;

use crate::body::WireBody;
use crate::server::RpcServer;
use crate::version::VersionInfo;

async fn version() -> Json<VersionInfo> {
    Json(VersionInfo::new())
}

/// Every POST, whatever its path, is one exchange.
async fn exchange(State(server): State<Arc<RpcServer>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let stream = body.into_data_stream().map_err(io::Error::other);
    let request = http::Request::from_parts(parts, WireBody::Streaming(Box::pin(stream)));

    let (parts, body) = server.handle(request).await.into_parts();
    let body = match body {
        WireBody::Full(bytes) => Body::from(bytes),
        WireBody::Streaming(stream) => Body::from_stream(stream),
    };
    Response::from_parts(parts, body).into_response()
}

pub fn routes(server: Arc<RpcServer>) -> Router {
    Router::new()
        .route("/version", get(version))
        .route("/", post(exchange))
        .route("/{*path}", post(exchange))
        .with_state(server)
}
