//! Evaluates submitted chains against a root object and the capability heap.
//!
//! A submission starts at the root, or at `heap[targetHeapId]` when one is
//! given, and walks its links in order. `get` reads a property and remembers
//! the object it came from as the receiver for a following `apply`. `apply`
//! first evaluates any marker arguments against their own targets, then calls.

use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use http::StatusCode;
use tracing::{debug, error, warn};

use crate::body::WireBody;
use crate::envelope;
use crate::heap::CapabilityHeap;
use crate::platform::Platform;
use crate::protocol::{CallResult, CapabilityId, ChainMarker, Link, Submission};
use crate::value::{Composite, ErrorKind, Function, SyncMethod, Value};

pub struct RpcServer {
    root: Value,
    heap: Arc<CapabilityHeap>,
}

impl RpcServer {
    /// Serve `root` using the process-wide heap.
    pub fn new(root: Value) -> Self {
        Self::with_heap(root, CapabilityHeap::global())
    }

    pub fn with_heap(root: Value, heap: Arc<CapabilityHeap>) -> Self {
        Self { root, heap }
    }

    pub fn heap(&self) -> &Arc<CapabilityHeap> {
        &self.heap
    }

    /// Answer one exchange. Decode failures are reported in the error slot
    /// with a 400 status so the caller still receives an envelope.
    pub async fn handle(&self, request: http::Request<WireBody>) -> http::Response<WireBody> {
        let platform = Platform::serving(Arc::clone(&self.heap));
        let (parts, body) = request.into_parts();

        let (status, result) = match envelope::unpack(&parts.headers, body, &platform.revivers()).await {
            Ok(root) => match Submission::from_value(&root) {
                Ok(submission) => (StatusCode::OK, self.execute(submission).await),
                Err(e) => {
                    warn!(error = %e, "Rejected malformed submission");
                    (StatusCode::BAD_REQUEST, failure(ErrorKind::TypeError, e.to_string()))
                }
            },
            Err(e) => {
                warn!(error = %e, path = %parts.uri.path(), "Failed to decode submission");
                (StatusCode::BAD_REQUEST, failure(ErrorKind::SyntaxError, e.to_string()))
            }
        };

        self.respond(&platform, status, result).await
    }

    /// Run a decoded submission to its outcome.
    pub async fn execute(&self, submission: Submission) -> CallResult {
        debug!(
            links = submission.chain.len(),
            target = ?submission.target,
            "Evaluating chain"
        );
        match self.evaluate(&submission.chain, submission.target).await {
            Ok(value) => CallResult::Data(self.export(value)),
            Err(error) => CallResult::Error(error),
        }
    }

    async fn respond(
        &self,
        platform: &Platform,
        status: StatusCode,
        result: CallResult,
    ) -> http::Response<WireBody> {
        match envelope::pack(&result.to_value(), &platform.reducers(), true).await {
            Ok(packed) => packed.into_response(status),
            Err(e) => {
                error!(error = %e, "Failed to encode call result");
                let fallback = failure(ErrorKind::Error, e.to_string());
                match envelope::pack(&fallback.to_value(), &platform.reducers(), false).await {
                    Ok(packed) => packed.into_response(StatusCode::INTERNAL_SERVER_ERROR),
                    Err(_) => {
                        let mut response = http::Response::new(WireBody::empty());
                        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                        response
                    }
                }
            }
        }
    }

    /// A live object at the top of a result goes back as a capability.
    fn export(&self, value: Value) -> Value {
        let target = match value.as_node().map(|n| n.read()) {
            Some(guard) => match &*guard {
                Composite::Stub(target) => Some(target.clone()),
                _ => None,
            },
            None => None,
        };
        match target {
            Some(target) => {
                let id = self.heap.mint(target);
                Value::node(Composite::Marker(ChainMarker::capability(id)))
            }
            None => value,
        }
    }

    fn evaluate<'a>(
        &'a self,
        chain: &'a [Link],
        target: Option<CapabilityId>,
    ) -> BoxFuture<'a, Result<Value, Value>> {
        async move {
            let mut current = match target {
                Some(id) => self
                    .heap
                    .resolve(&id)
                    .map_err(|e| Value::error(ErrorKind::ReferenceError, e.to_string()))?,
                None => self.root.clone(),
            };
            let mut this = Value::Undefined;

            for link in chain {
                match link {
                    Link::Get { property } => {
                        let base = unwrap_stub(current);
                        current = read_property(&base, property)?;
                        this = base;
                    }
                    Link::Apply { arguments } => {
                        let arguments = self.resolve_arguments(arguments).await?;
                        current = invoke(&current, std::mem::take(&mut this), arguments).await?;
                    }
                }
            }
            Ok(current)
        }
        .boxed()
    }

    /// Markers are evaluated in argument order before the call they feed.
    async fn resolve_arguments(&self, arguments: &[Value]) -> Result<Vec<Value>, Value> {
        let mut resolved = Vec::with_capacity(arguments.len());
        for argument in arguments {
            match marker_of(argument) {
                Some(marker) => {
                    let value = self.evaluate(&marker.chain, marker.target).await?;
                    resolved.push(value);
                }
                None => resolved.push(argument.clone()),
            }
        }
        Ok(resolved)
    }
}

fn failure(kind: ErrorKind, message: String) -> CallResult {
    CallResult::Error(Value::error(kind, message))
}

fn marker_of(value: &Value) -> Option<ChainMarker> {
    match &*value.as_node()?.read() {
        Composite::Marker(marker) => Some(marker.clone()),
        _ => None,
    }
}

fn unwrap_stub(value: Value) -> Value {
    let inner = match value.as_node().map(|n| n.read()) {
        Some(guard) => match &*guard {
            Composite::Stub(target) => Some(target.clone()),
            _ => None,
        },
        None => None,
    };
    inner.unwrap_or(value)
}

fn read_property(base: &Value, property: &str) -> Result<Value, Value> {
    if base.is_nullish() {
        let what = if base.is_null() { "null" } else { "undefined" };
        return Err(Value::error(
            ErrorKind::TypeError,
            format!("Cannot read properties of {what} (reading '{property}')"),
        ));
    }
    Ok(base.get(property))
}

enum Callable {
    Function(Function),
    Method(SyncMethod),
}

fn callable(value: &Value) -> Option<Callable> {
    match &*value.as_node()?.read() {
        Composite::Function(function) => Some(Callable::Function(function.clone())),
        Composite::SyncMethod(method) => Some(Callable::Method(method.clone())),
        _ => None,
    }
}

async fn invoke(callee: &Value, this: Value, arguments: Vec<Value>) -> Result<Value, Value> {
    match callable(callee) {
        Some(Callable::Function(function)) => function.call(this, arguments).await,
        Some(Callable::Method(method)) => Ok(method.call()),
        None => Err(Value::error(
            ErrorKind::TypeError,
            format!("{} is not a function", callee.type_name()),
        )),
    }
}
