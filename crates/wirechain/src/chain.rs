//! Remote call chains.
//!
//! A [`ChainHandle`] records property reads and calls without touching the
//! network. Every step returns a new handle, so a handle can be shared and
//! extended in several directions. Awaiting a handle (or calling
//! [`ChainHandle::resolve`]) turns it into a [`PendingCall`], which sends the
//! whole chain in one exchange.
//!
//! Handles passed as call arguments are not resolved locally. They travel as
//! markers and the remote side evaluates them first, so dependent calls cost
//! one round trip:
//!
//! ```ignore
//! let user = client.root().call("lookup", [Value::from("u-7")]);
//! let page = client.root().call("render", [Value::from(user)]).await?;
//! ```

use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::task::JoinHandle;

use crate::client::{RpcClient, RpcError};
use crate::protocol::{CapabilityId, ChainMarker, Link, Submission};
use crate::value::{Composite, Value};

/// A chain still being built.
#[derive(Clone)]
pub struct ChainHandle {
    client: RpcClient,
    links: Vec<Link>,
    target: Option<CapabilityId>,
}

impl ChainHandle {
    pub(crate) fn new(client: RpcClient, target: Option<CapabilityId>) -> Self {
        Self {
            client,
            links: Vec::new(),
            target,
        }
    }

    /// The handle inside `value`, if it holds one.
    pub fn from_value(value: &Value) -> Option<Self> {
        match &*value.as_node()?.read() {
            Composite::Chain(handle) => Some(handle.clone()),
            _ => None,
        }
    }

    pub fn get(&self, property: impl Into<String>) -> Self {
        self.extend(Link::get(property))
    }

    /// Record a call. Handle arguments are captured as markers here, so later
    /// extensions of those handles do not leak into this chain.
    pub fn apply<I>(&self, arguments: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        let arguments = arguments.into_iter().map(capture).collect();
        self.extend(Link::apply(arguments))
    }

    /// `get(method)` followed by `apply(arguments)`.
    pub fn call<I>(&self, method: impl Into<String>, arguments: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        self.get(method).apply(arguments)
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn target(&self) -> Option<CapabilityId> {
        self.target
    }

    pub fn marker(&self) -> ChainMarker {
        ChainMarker {
            chain: self.links.clone(),
            target: self.target,
        }
    }

    /// Stop building and start the exchange.
    pub fn resolve(self) -> PendingCall {
        PendingCall::new(self)
    }

    /// Callback form of resolution. Exactly one of the callbacks runs, on a
    /// spawned task.
    pub fn then<T, F, R>(self, on_fulfilled: F, on_rejected: R) -> JoinHandle<T>
    where
        F: FnOnce(Value) -> T + Send + 'static,
        R: FnOnce(RpcError) -> T + Send + 'static,
        T: Send + 'static,
    {
        let pending = self.resolve();
        tokio::spawn(async move {
            match pending.await {
                Ok(value) => on_fulfilled(value),
                Err(error) => on_rejected(error),
            }
        })
    }

    fn extend(&self, link: Link) -> Self {
        let mut links = Vec::with_capacity(self.links.len() + 1);
        links.extend_from_slice(&self.links);
        links.push(link);
        Self {
            client: self.client.clone(),
            links,
            target: self.target,
        }
    }
}

fn capture(argument: Value) -> Value {
    match ChainHandle::from_value(&argument) {
        Some(handle) => Value::node(Composite::Marker(handle.marker())),
        None => argument,
    }
}

impl std::fmt::Debug for ChainHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainHandle")
            .field("links", &self.links.len())
            .field("target", &self.target)
            .finish()
    }
}

impl From<ChainHandle> for Value {
    fn from(handle: ChainHandle) -> Self {
        Value::node(Composite::Chain(handle))
    }
}

impl IntoFuture for ChainHandle {
    type Output = Result<Value, RpcError>;
    type IntoFuture = PendingCall;

    fn into_future(self) -> PendingCall {
        self.resolve()
    }
}

/// A chain whose exchange is in flight. Settles exactly once.
#[must_use = "a pending call does nothing unless awaited"]
pub struct PendingCall {
    inner: BoxFuture<'static, Result<Value, RpcError>>,
}

impl PendingCall {
    fn new(handle: ChainHandle) -> Self {
        let ChainHandle {
            client,
            links,
            target,
        } = handle;
        let submission = Submission {
            chain: links,
            target,
        };
        Self {
            inner: async move { client.submit(submission).await }.boxed(),
        }
    }
}

impl Future for PendingCall {
    type Output = Result<Value, RpcError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}
