//! Payload types for the composite kinds.

use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use indexmap::IndexMap;

use super::{Composite, Node, Value};
use crate::body::BodyStream;

/// Plain object. Symbol-keyed properties are kept apart because the codec
/// refuses them.
#[derive(Clone, Debug, Default)]
pub struct ObjectValue {
    pub properties: IndexMap<String, Value>,
    pub symbol_properties: Vec<(String, Value)>,
}

impl ObjectValue {
    pub fn get(&self, key: &str) -> Value {
        self.properties.get(key).cloned().unwrap_or_default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.properties.insert(key.into(), value);
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegExp {
    pub source: String,
    pub flags: String,
}

/// Element type of an `ArrayBufferView`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewKind {
    DataView,
    Int8,
    Uint8,
    Uint8Clamped,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float32,
    Float64,
    BigInt64,
    BigUint64,
}

impl ViewKind {
    pub const ALL: [ViewKind; 12] = [
        Self::DataView,
        Self::Int8,
        Self::Uint8,
        Self::Uint8Clamped,
        Self::Int16,
        Self::Uint16,
        Self::Int32,
        Self::Uint32,
        Self::Float32,
        Self::Float64,
        Self::BigInt64,
        Self::BigUint64,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::DataView => "DataView",
            Self::Int8 => "Int8Array",
            Self::Uint8 => "Uint8Array",
            Self::Uint8Clamped => "Uint8ClampedArray",
            Self::Int16 => "Int16Array",
            Self::Uint16 => "Uint16Array",
            Self::Int32 => "Int32Array",
            Self::Uint32 => "Uint32Array",
            Self::Float32 => "Float32Array",
            Self::Float64 => "Float64Array",
            Self::BigInt64 => "BigInt64Array",
            Self::BigUint64 => "BigUint64Array",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    pub fn bytes_per_element(&self) -> usize {
        match self {
            Self::DataView | Self::Int8 | Self::Uint8 | Self::Uint8Clamped => 1,
            Self::Int16 | Self::Uint16 => 2,
            Self::Int32 | Self::Uint32 | Self::Float32 => 4,
            Self::Float64 | Self::BigInt64 | Self::BigUint64 => 8,
        }
    }

    /// Typed arrays have a built-in record form; `DataView` does not.
    pub fn is_typed_array(&self) -> bool {
        !matches!(self, Self::DataView)
    }
}

/// Window onto an `ArrayBuffer` node.
#[derive(Clone, Debug)]
pub struct BufferView {
    pub kind: ViewKind,
    pub buffer: Node,
    pub byte_offset: usize,
    pub byte_length: usize,
}

impl BufferView {
    /// Copy of the viewed bytes; empty if the window falls outside the buffer.
    pub fn bytes(&self) -> Vec<u8> {
        match &*self.buffer.read() {
            Composite::ArrayBuffer(bytes) => self
                .byte_offset
                .checked_add(self.byte_length)
                .and_then(|end| bytes.get(self.byte_offset..end))
                .map(<[u8]>::to_vec)
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }
}

/// Error subtypes that may cross the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    EvalError,
    RangeError,
    ReferenceError,
    SyntaxError,
    TypeError,
    UriError,
    Error,
}

impl ErrorKind {
    /// Allow-list, most specific first.
    pub const ALL: [ErrorKind; 7] = [
        Self::EvalError,
        Self::RangeError,
        Self::ReferenceError,
        Self::SyntaxError,
        Self::TypeError,
        Self::UriError,
        Self::Error,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::EvalError => "EvalError",
            Self::RangeError => "RangeError",
            Self::ReferenceError => "ReferenceError",
            Self::SyntaxError => "SyntaxError",
            Self::TypeError => "TypeError",
            Self::UriError => "URIError",
            Self::Error => "Error",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

#[derive(Clone, Debug)]
pub struct ErrorValue {
    pub kind: ErrorKind,
    pub message: String,
    pub stack: Option<String>,
    pub cause: Value,
}

impl ErrorValue {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            stack: Some(format!("{}: {}", kind.name(), message)),
            kind,
            message,
            cause: Value::Undefined,
        }
    }

    pub fn with_cause(mut self, cause: Value) -> Self {
        self.cause = cause;
        self
    }
}

impl std::fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.name(), self.message)
    }
}

/// Header collection with case-insensitive names, in insertion order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeaderList {
    entries: IndexMap<String, String>,
}

impl HeaderList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.entries.insert(name.to_ascii_lowercase(), value.into());
    }

    /// Repeated names combine into one comma-separated value.
    pub fn append(&mut self, name: &str, value: &str) {
        self.entries
            .entry(name.to_ascii_lowercase())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: AsRef<str>, V: AsRef<str>> FromIterator<(K, V)> for HeaderList {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut headers = HeaderList::new();
        for (name, value) in iter {
            headers.append(name.as_ref(), value.as_ref());
        }
        headers
    }
}

#[derive(Clone, Debug)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: HeaderList,
    /// Side metadata travelling with the request.
    pub cf: Value,
    pub body: Option<BodyStream>,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: HeaderList::new(),
            cf: Value::Undefined,
            body: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: HeaderList,
    pub cf: Value,
    pub body: Option<BodyStream>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            status_text: String::new(),
            headers: HeaderList::new(),
            cf: Value::Undefined,
            body: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FileMeta {
    pub name: String,
    pub last_modified: f64,
}

/// In-memory blob; a `File` when `file` is set.
#[derive(Clone, Debug)]
pub struct Blob {
    pub data: Bytes,
    pub content_type: String,
    pub file: Option<FileMeta>,
}

pub type CallFuture = BoxFuture<'static, Result<Value, Value>>;

type Body = dyn Fn(Value, Vec<Value>) -> CallFuture + Send + Sync;

/// Native callable. Receives the bound receiver and the argument list; a
/// rejection carries any value, conventionally an error.
#[derive(Clone)]
pub struct Function {
    name: String,
    body: Arc<Body>,
}

impl Function {
    pub fn new<F, Fut>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(Value, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            body: Arc::new(move |this, args| Box::pin(body(this, args))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, this: Value, args: Vec<Value>) -> CallFuture {
        (self.body)(this, args)
    }

    pub fn ptr_eq(&self, other: &Function) -> bool {
        Arc::ptr_eq(&self.body, &other.body)
    }
}

impl std::fmt::Debug for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Function({})", self.name)
    }
}

/// Platform object exposing data properties, captured method results and an
/// optional body.
#[derive(Clone, Debug)]
pub struct InternalObject {
    pub class_name: String,
    pub properties: IndexMap<String, Value>,
    pub body: Option<BodyStream>,
}

impl InternalObject {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            properties: IndexMap::new(),
            body: None,
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Attach a captured method result under its short name.
    pub fn with_method(mut self, method: &str, result: Value) -> Self {
        let qualified = format!("{}::{}", self.class_name, method);
        self.properties.insert(
            method.to_string(),
            Value::node(Composite::SyncMethod(SyncMethod {
                name: qualified,
                result,
            })),
        );
        self
    }

    pub fn with_body(mut self, body: BodyStream) -> Self {
        self.body = Some(body);
        self
    }

    pub fn property(&self, key: &str) -> Value {
        self.properties.get(key).cloned().unwrap_or_default()
    }

    /// Captured result of a synchronous method, if present.
    pub fn method(&self, key: &str) -> Option<SyncMethod> {
        match &*self.properties.get(key)?.as_node()?.read() {
            Composite::SyncMethod(method) => Some(method.clone()),
            _ => None,
        }
    }

    pub async fn bytes(&self) -> std::io::Result<Bytes> {
        match &self.body {
            Some(body) => body.read_all().await,
            None => Ok(Bytes::new()),
        }
    }

    pub async fn text(&self) -> std::io::Result<String> {
        let bytes = self.bytes().await?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

/// Result of a synchronous platform method, captured where it ran.
#[derive(Clone, Debug)]
pub struct SyncMethod {
    /// `Class::method`.
    pub name: String,
    pub result: Value,
}

impl SyncMethod {
    pub fn call(&self) -> Value {
        self.result.clone()
    }

    /// Replays a `writeHttpMetadata`-style method into `headers`.
    pub fn write_http_metadata(&self, headers: &mut HeaderList) {
        let Some(node) = self.result.as_node() else {
            return;
        };
        if let Composite::Headers(captured) = &*node.read() {
            for (name, value) in captured.iter() {
                headers.set(name, value);
            }
        }
    }
}
