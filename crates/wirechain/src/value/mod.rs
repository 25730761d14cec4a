//! In-memory value graph.
//!
//! Primitives are plain data and compare by value. Everything else lives
//! behind a [`Node`], a shared and interiorly mutable cell, so a graph can
//! contain sharing and cycles. Node identity (pointer equality) is what the
//! codec preserves.

mod compare;
mod kinds;

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;

use crate::body::BodyStream;
use crate::chain::ChainHandle;
use crate::protocol::ChainMarker;

pub use kinds::{
    Blob, BufferView, CallFuture, ErrorKind, ErrorValue, FileMeta, Function, HeaderList,
    HttpRequest, HttpResponse, InternalObject, ObjectValue, RegExp, SyncMethod, ViewKind,
};

/// A value in a graph.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    BigInt(i128),
    Node(Node),
}

/// Shared handle to a composite value.
#[derive(Clone)]
pub struct Node(Arc<RwLock<Composite>>);

/// Everything that has identity.
pub enum Composite {
    /// `None` entries are holes.
    Array(Vec<Option<Value>>),
    Object(ObjectValue),
    /// A primitive wrapped in an object (`new Number(1)`).
    Boxed(Value),
    /// `None` is an invalid date.
    Date(Option<DateTime<Utc>>),
    RegExp(RegExp),
    Set(Vec<Value>),
    Map(Vec<(Value, Value)>),
    ArrayBuffer(Vec<u8>),
    View(BufferView),
    Error(ErrorValue),
    Headers(HeaderList),
    Request(HttpRequest),
    Response(HttpResponse),
    Stream(BodyStream),
    Blob(Blob),
    Function(Function),
    /// A live local object passed by reference rather than by value.
    Stub(Value),
    /// A remote handle that is still building its chain.
    Chain(ChainHandle),
    /// An unresolved chain captured as a call argument.
    Marker(ChainMarker),
    Internal(InternalObject),
    SyncMethod(SyncMethod),
}

impl Composite {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Array(_) => "Array",
            Self::Object(_) => "Object",
            Self::Boxed(_) => "Boxed",
            Self::Date(_) => "Date",
            Self::RegExp(_) => "RegExp",
            Self::Set(_) => "Set",
            Self::Map(_) => "Map",
            Self::ArrayBuffer(_) => "ArrayBuffer",
            Self::View(view) => view.kind.name(),
            Self::Error(_) => "Error",
            Self::Headers(_) => "Headers",
            Self::Request(_) => "Request",
            Self::Response(_) => "Response",
            Self::Stream(_) => "ReadableStream",
            Self::Blob(blob) if blob.file.is_some() => "File",
            Self::Blob(_) => "Blob",
            Self::Function(_) => "Function",
            Self::Stub(_) => "RpcStub",
            Self::Chain(_) => "ChainHandle",
            Self::Marker(_) => "UnresolvedChain",
            Self::Internal(_) => "InternalClass",
            Self::SyncMethod(_) => "SynchronousMethod",
        }
    }
}

impl Node {
    pub fn new(composite: Composite) -> Self {
        Self(Arc::new(RwLock::new(composite)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Composite> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Composite> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn ptr_eq(&self, other: &Node) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Stable address for identity maps. Only meaningful while the node is alive.
    pub(crate) fn address(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    pub fn type_name(&self) -> &'static str {
        self.read().type_name()
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{:#x}", self.type_name(), self.address())
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Undefined => f.write_str("undefined"),
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) if *n == 0.0 && n.is_sign_negative() => f.write_str("-0"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::BigInt(n) => write!(f, "{n}n"),
            Self::Node(node) => write!(f, "{node:?}"),
        }
    }
}

impl Value {
    pub fn node(composite: Composite) -> Self {
        Self::Node(Node::new(composite))
    }

    pub fn array<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        Self::node(Composite::Array(items.into_iter().map(Some).collect()))
    }

    /// Array where `None` marks a hole.
    pub fn sparse_array(items: Vec<Option<Value>>) -> Self {
        Self::node(Composite::Array(items))
    }

    pub fn object<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let properties = entries.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self::node(Composite::Object(ObjectValue {
            properties,
            symbol_properties: Vec::new(),
        }))
    }

    pub fn empty_object() -> Self {
        Self::node(Composite::Object(ObjectValue::default()))
    }

    pub fn boxed(primitive: Value) -> Self {
        Self::node(Composite::Boxed(primitive))
    }

    pub fn date(at: DateTime<Utc>) -> Self {
        Self::node(Composite::Date(Some(at)))
    }

    pub fn set<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        Self::node(Composite::Set(items.into_iter().collect()))
    }

    pub fn map<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (Value, Value)>,
    {
        Self::node(Composite::Map(entries.into_iter().collect()))
    }

    pub fn array_buffer(bytes: impl Into<Vec<u8>>) -> Self {
        Self::node(Composite::ArrayBuffer(bytes.into()))
    }

    /// A view of `kind` covering a fresh buffer holding `bytes`.
    pub fn typed_array(kind: ViewKind, bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        let byte_length = bytes.len();
        let buffer = Node::new(Composite::ArrayBuffer(bytes));
        Self::node(Composite::View(BufferView {
            kind,
            buffer,
            byte_offset: 0,
            byte_length,
        }))
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::node(Composite::Error(ErrorValue::new(kind, message)))
    }

    pub fn stream(stream: BodyStream) -> Self {
        Self::node(Composite::Stream(stream))
    }

    pub fn blob(data: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self::node(Composite::Blob(Blob {
            data: data.into(),
            content_type: content_type.into(),
            file: None,
        }))
    }

    pub fn function(function: Function) -> Self {
        Self::node(Composite::Function(function))
    }

    /// Mark `target` as passed by reference.
    pub fn stub(target: Value) -> Self {
        Self::node(Composite::Stub(target))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Self::Node(node) => Some(node),
            _ => None,
        }
    }

    /// Node type name, or the primitive's kind.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::BigInt(_) => "bigint",
            Self::Node(node) => node.type_name(),
        }
    }

    /// Property read with JS-like leniency: anything missing is `undefined`.
    pub fn get(&self, key: &str) -> Value {
        let Some(node) = self.as_node() else {
            return Value::Undefined;
        };
        let guard = node.read();
        match &*guard {
            Composite::Object(object) => object.get(key),
            Composite::Internal(internal) => internal.property(key),
            Composite::Array(items) if key == "length" => Value::from(items.len()),
            Composite::Array(items) => key
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i).cloned().flatten())
                .unwrap_or_default(),
            _ => Value::Undefined,
        }
    }

    /// Array element; holes and out-of-range indices read as `undefined`.
    pub fn index(&self, i: usize) -> Value {
        match self.as_node().map(|n| n.read()) {
            Some(guard) => match &*guard {
                Composite::Array(items) => items.get(i).cloned().flatten().unwrap_or_default(),
                _ => Value::Undefined,
            },
            None => Value::Undefined,
        }
    }

    /// Array length, if this is an array.
    pub fn array_len(&self) -> Option<usize> {
        match &*self.as_node()?.read() {
            Composite::Array(items) => Some(items.len()),
            _ => None,
        }
    }

    /// Raw bytes of an `ArrayBuffer` or the window of a view.
    pub fn bytes(&self) -> Option<Vec<u8>> {
        match &*self.as_node()?.read() {
            Composite::ArrayBuffer(bytes) => Some(bytes.clone()),
            Composite::View(view) => Some(view.bytes()),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(n.into())
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Self::Number(n.into())
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Self::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Node> for Value {
    fn from(node: Node) -> Self {
        Self::Node(node)
    }
}

impl From<Composite> for Value {
    fn from(composite: Composite) -> Self {
        Self::node(composite)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Undefined)
    }
}

/// Plain JSON maps onto the matching primitives, arrays and objects.
impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => Value::array(items.into_iter().map(Value::from)),
            serde_json::Value::Object(map) => {
                Value::object(map.into_iter().map(|(k, v)| (k, Value::from(v))))
            }
        }
    }
}

pub(crate) fn object_properties(entries: IndexMap<String, Value>) -> Value {
    Value::node(Composite::Object(ObjectValue {
        properties: entries,
        symbol_properties: Vec::new(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nodes_compare_by_identity() {
        let a = Value::array([Value::from(1)]);
        let b = a.clone();
        let c = Value::array([Value::from(1)]);

        assert!(a.as_node().unwrap().ptr_eq(b.as_node().unwrap()));
        assert!(!a.as_node().unwrap().ptr_eq(c.as_node().unwrap()));
    }

    #[test]
    fn get_is_lenient() {
        let v = Value::object([("a", Value::from("x"))]);
        assert_eq!(v.get("a").as_str(), Some("x"));
        assert!(v.get("missing").is_undefined());
        assert!(Value::from(3).get("a").is_undefined());
    }

    #[test]
    fn array_holes_read_as_undefined() {
        let v = Value::sparse_array(vec![Some(Value::from(1)), None]);
        assert_eq!(v.array_len(), Some(2));
        assert!(v.index(1).is_undefined());
        assert_eq!(v.get("length").as_f64(), Some(2.0));
        assert_eq!(v.get("0").as_f64(), Some(1.0));
    }

    #[test]
    fn typed_array_views_whole_buffer() {
        let v = Value::typed_array(ViewKind::Uint8, vec![1, 2, 3]);
        assert_eq!(v.bytes(), Some(vec![1, 2, 3]));
        assert_eq!(v.type_name(), "Uint8Array");
    }

    #[test]
    fn debug_does_not_recurse_into_cycles() {
        let v = Value::array([]);
        if let Composite::Array(items) = &mut *v.as_node().unwrap().write() {
            items.push(Some(v.clone()));
        }
        assert!(format!("{v:?}").starts_with("Array@"));
    }

    #[test]
    fn json_maps_to_plain_values() {
        let v = Value::from(serde_json::json!({"a": [1, "two", null]}));
        assert_eq!(v.get("a").index(1).as_str(), Some("two"));
        assert!(v.get("a").index(2).is_null());
    }
}
