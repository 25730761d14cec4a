//! Value graph codec.
//!
//! A graph flattens to a JSON array of records where record 0 is the root and
//! every reference is an index into the array. Values JSON cannot carry
//! (`undefined`, holes, NaN, the infinities, `-0`) are negative sentinel
//! indices instead of records; a graph that *is* one of them encodes as the
//! bare integer.
//!
//! Record shapes:
//! - primitives are themselves: `null`, `true`, `1.5`, `"s"`
//! - arrays are index lists: `[1, -2, 3]`
//! - objects map keys to indices: `{"a": 1}`
//! - everything else is tagged: `["Date", "..."]`, `["Map", k, v]`, or
//!   `["Tag", payload]` for values handled by a [`Reducer`]
//!
//! Primitives are deduplicated by value and composites by identity, so a
//! shared node is written once and cycles refer back to their own index.

mod decode;
mod encode;
mod error;

pub use error::CodecError;

use crate::value::{Node, Value};

/// Deepest chain of composites either direction will walk. Shared and cyclic
/// references do not count, only first visits.
pub const MAX_DEPTH: usize = 256;

/// Extension hook turning one kind of node into a tagged payload.
pub trait Reducer: Send + Sync {
    /// `Ok(None)` passes the node on to the next reducer.
    fn reduce(&self, node: &Node) -> Result<Option<Reduced>, CodecError>;
}

/// Inverse of a [`Reducer`], selected by tag. Revivers take precedence over
/// the built-in tags.
pub trait Reviver: Send + Sync {
    fn handles(&self, tag: &str) -> bool;

    /// Only called for tags this reviver [handles](Reviver::handles).
    fn revive(&self, tag: &str, payload: Value) -> Result<Value, CodecError>;
}

/// Tagged payload produced by a reducer. The payload is itself encoded as part
/// of the graph, so it may share nodes with the rest of it.
#[derive(Debug)]
pub struct Reduced {
    pub tag: &'static str,
    pub payload: Value,
}

impl Reduced {
    pub fn new(tag: &'static str, payload: Value) -> Self {
        Self { tag, payload }
    }
}

/// Values that travel as negative indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentinel {
    Undefined,
    Hole,
    NaN,
    PositiveInfinity,
    NegativeInfinity,
    NegativeZero,
}

impl Sentinel {
    pub fn code(self) -> i64 {
        match self {
            Self::Undefined => -1,
            Self::Hole => -2,
            Self::NaN => -3,
            Self::PositiveInfinity => -4,
            Self::NegativeInfinity => -5,
            Self::NegativeZero => -6,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            -1 => Some(Self::Undefined),
            -2 => Some(Self::Hole),
            -3 => Some(Self::NaN),
            -4 => Some(Self::PositiveInfinity),
            -5 => Some(Self::NegativeInfinity),
            -6 => Some(Self::NegativeZero),
            _ => None,
        }
    }

    /// Sentinel standing in for `value`, if any.
    pub fn for_value(value: &Value) -> Option<Self> {
        match value {
            Value::Undefined => Some(Self::Undefined),
            Value::Number(n) if n.is_nan() => Some(Self::NaN),
            Value::Number(n) if *n == f64::INFINITY => Some(Self::PositiveInfinity),
            Value::Number(n) if *n == f64::NEG_INFINITY => Some(Self::NegativeInfinity),
            Value::Number(n) if *n == 0.0 && n.is_sign_negative() => Some(Self::NegativeZero),
            _ => None,
        }
    }

    /// The value a sentinel decodes to. A hole outside an array reads as
    /// `undefined`.
    pub fn value(self) -> Value {
        match self {
            Self::Undefined | Self::Hole => Value::Undefined,
            Self::NaN => Value::Number(f64::NAN),
            Self::PositiveInfinity => Value::Number(f64::INFINITY),
            Self::NegativeInfinity => Value::Number(f64::NEG_INFINITY),
            Self::NegativeZero => Value::Number(-0.0),
        }
    }
}

/// Encoded graph before it becomes text.
#[derive(Debug, Clone, PartialEq)]
pub enum Flattened {
    Sentinel(Sentinel),
    Records(Vec<serde_json::Value>),
}

impl Flattened {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Sentinel(sentinel) => serde_json::Value::from(sentinel.code()),
            Self::Records(records) => serde_json::Value::Array(records.clone()),
        }
    }

    pub fn from_json(json: serde_json::Value) -> Result<Self, CodecError> {
        match json {
            serde_json::Value::Array(records) if !records.is_empty() => Ok(Self::Records(records)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .and_then(Sentinel::from_code)
                .map(Self::Sentinel)
                .ok_or_else(|| CodecError::malformed(0, format!("invalid root sentinel {n}"))),
            other => Err(CodecError::malformed(
                0,
                format!("expected a record array, got {other}"),
            )),
        }
    }
}

/// Flatten `value`, consulting `reducers` in order before the built-ins.
pub fn encode(value: &Value, reducers: &[&dyn Reducer]) -> Result<Flattened, CodecError> {
    encode::Encoder::new(reducers).run(value)
}

/// [`encode`] straight to JSON text.
pub fn stringify(value: &Value, reducers: &[&dyn Reducer]) -> Result<String, CodecError> {
    let json = encode(value, reducers)?.to_json();
    Ok(serde_json::to_string(&json)?)
}

/// Rebuild a graph, dispatching tagged records to `revivers` in order.
pub fn decode(flattened: &Flattened, revivers: &[&dyn Reviver]) -> Result<Value, CodecError> {
    match flattened {
        Flattened::Sentinel(sentinel) => Ok(sentinel.value()),
        Flattened::Records(records) => decode::Decoder::new(records, revivers).run(),
    }
}

/// [`decode`] from JSON text.
pub fn parse(text: &str, revivers: &[&dyn Reviver]) -> Result<Value, CodecError> {
    let json: serde_json::Value = serde_json::from_str(text)?;
    decode(&Flattened::from_json(json)?, revivers)
}
