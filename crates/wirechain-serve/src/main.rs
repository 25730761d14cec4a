//! Serves a small demo object over HTTP.
//!
//! ```text
//! wirechain-serve --port 8787
//! ```
//!
//! The root exposes `echo(value)`, `upper(stream)` and `counter(start)`, the
//! last returning a capability with `increment()` and `value()`.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use wirechain::transport::http::{ServerConfig, serve};
use wirechain::{Composite, ErrorKind, Function, RpcServer, Value, WIRECHAIN_VERSION};

#[derive(Parser, Debug)]
#[command(name = "wirechain-serve")]
#[command(about = "Serve a demo wirechain capability over HTTP")]
struct Args {
    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = 8787)]
    port: u16,
}

/// Initialize tracing with WIRECHAIN_LOG and LOG_FORMAT support.
fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match std::env::var("WIRECHAIN_LOG").as_deref() {
            Ok("debug") => "debug",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("wirechain={level},wirechain_serve={level}"))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

fn counter(start: i64) -> Value {
    let count = Arc::new(AtomicI64::new(start));
    let incremented = Arc::clone(&count);
    let read = count;
    Value::object([
        (
            "increment",
            Value::function(Function::new("increment", move |_, _| {
                let next = incremented.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Ok(Value::from(next as f64)) }
            })),
        ),
        (
            "value",
            Value::function(Function::new("value", move |_, _| {
                let current = read.load(Ordering::SeqCst);
                async move { Ok(Value::from(current as f64)) }
            })),
        ),
    ])
}

fn demo_root() -> Value {
    Value::object([
        ("version", Value::from(WIRECHAIN_VERSION)),
        (
            "echo",
            Value::function(Function::new("echo", |_, args| async move {
                Ok(args.into_iter().next().unwrap_or_default())
            })),
        ),
        (
            "upper",
            Value::function(Function::new("upper", |_, args| async move {
                let stream = args.first().and_then(|arg| match &*arg.as_node()?.read() {
                    Composite::Stream(stream) => Some(stream.clone()),
                    _ => None,
                });
                let Some(stream) = stream else {
                    return Err(Value::error(ErrorKind::TypeError, "upper expects a stream"));
                };
                let bytes = stream
                    .read_all()
                    .await
                    .map_err(|e| Value::error(ErrorKind::Error, e.to_string()))?;
                Ok(Value::from(String::from_utf8_lossy(&bytes).to_uppercase()))
            })),
        ),
        (
            "counter",
            Value::function(Function::new("counter", |_, args| async move {
                let start = args.first().and_then(Value::as_f64).unwrap_or_default();
                Ok(Value::stub(counter(start as i64)))
            })),
        ),
    ])
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    info!(version = WIRECHAIN_VERSION, "Starting wirechain-serve");

    let config = ServerConfig {
        host: args.host,
        port: args.port,
    };
    serve(config, Arc::new(RpcServer::new(demo_root()))).await
}
