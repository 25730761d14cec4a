//! HTTP transport: a reqwest client and an axum host for [`RpcServer`].
//!
//! [`RpcServer`]: crate::server::RpcServer

mod client;
mod routes;
mod server;

pub use client::{HttpTransport, HttpTransportConfig};
pub use routes::routes;
pub use server::{ServerConfig, serve, serve_on};
