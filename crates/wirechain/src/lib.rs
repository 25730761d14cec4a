//! wirechain: pipelined capability RPC over a cycle-preserving value codec.
//!
//! Values are flattened into an indexed record array that keeps sharing and
//! cycles ([`codec`]), extended with platform types ([`platform`]) and
//! carried in a length-prefixed envelope whose tail may be a raw stream
//! ([`envelope`]). On top of that, [`ChainHandle`]s record property reads and
//! calls against a remote object and send each chain in a single exchange,
//! with live objects passed back as capabilities held in a [`CapabilityHeap`].

pub mod base64;
pub mod body;
mod chain;
mod client;
pub mod codec;
pub mod envelope;
pub mod heap;
pub mod platform;
pub mod protocol;
mod server;
pub mod transport;
pub mod value;
mod version;

pub use body::{BodyStream, WireBody};
pub use chain::{ChainHandle, PendingCall};
pub use client::{ClientConfig, RpcClient, RpcError, describe};
pub use codec::{CodecError, Reduced, Reducer, Reviver, parse, stringify};
pub use envelope::{EnvelopeError, Packed, pack, unpack};
pub use heap::{CapabilityHeap, HeapError, StubFactory};
pub use platform::Platform;
pub use protocol::{CallResult, CapabilityId, ChainMarker, Link, ProtocolError, Submission};
pub use server::RpcServer;
pub use transport::{LocalTransport, Transport, TransportError};
pub use value::{Composite, ErrorKind, Function, Node, Value};
pub use version::{PROTOCOL_VERSION, VersionInfo, WIRECHAIN_VERSION, user_agent};
