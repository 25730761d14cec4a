use std::collections::HashMap;

use chrono::SecondsFormat;
use indexmap::IndexMap;
use serde_json::{Value as Json, json};

use super::{CodecError, Flattened, MAX_DEPTH, Reducer, Sentinel};
use crate::base64;
use crate::value::{Composite, Node, Value};

/// Largest integer an f64 holds exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

#[derive(PartialEq, Eq, Hash)]
enum PrimitiveKey {
    Null,
    Bool(bool),
    Number(u64),
    String(String),
    BigInt(i128),
}

/// What to write for a node, captured so no lock is held while children are
/// visited.
enum Shape {
    Done(Json),
    Array(Vec<Option<Value>>),
    Object(IndexMap<String, Value>),
    Set(Vec<Value>),
    Map(Vec<(Value, Value)>),
}

pub(super) struct Encoder<'r> {
    reducers: &'r [&'r dyn Reducer],
    records: Vec<Json>,
    nodes: HashMap<usize, usize>,
    primitives: HashMap<PrimitiveKey, usize>,
    // Held so a freed node's address can't be reused mid-encode.
    pinned: Vec<Node>,
    path: Vec<String>,
    depth: usize,
}

impl<'r> Encoder<'r> {
    pub(super) fn new(reducers: &'r [&'r dyn Reducer]) -> Self {
        Self {
            reducers,
            records: Vec::new(),
            nodes: HashMap::new(),
            primitives: HashMap::new(),
            pinned: Vec::new(),
            path: Vec::new(),
            depth: 0,
        }
    }

    pub(super) fn run(mut self, root: &Value) -> Result<Flattened, CodecError> {
        if let Some(sentinel) = Sentinel::for_value(root) {
            return Ok(Flattened::Sentinel(sentinel));
        }
        self.flatten(root)?;
        tracing::trace!(
            records = self.records.len(),
            nodes = self.pinned.len(),
            "Flattened value graph"
        );
        Ok(Flattened::Records(self.records))
    }

    fn flatten(&mut self, value: &Value) -> Result<i64, CodecError> {
        if let Some(sentinel) = Sentinel::for_value(value) {
            return Ok(sentinel.code());
        }
        let (key, record) = match value {
            Value::Node(node) => return self.flatten_node(node),
            Value::Undefined => return Ok(Sentinel::Undefined.code()),
            Value::Null => (PrimitiveKey::Null, Json::Null),
            Value::Bool(b) => (PrimitiveKey::Bool(*b), Json::Bool(*b)),
            Value::Number(n) => (PrimitiveKey::Number(n.to_bits()), number(*n)),
            Value::String(s) => (PrimitiveKey::String(s.clone()), Json::String(s.clone())),
            Value::BigInt(n) => (PrimitiveKey::BigInt(*n), json!(["BigInt", n.to_string()])),
        };
        if let Some(&index) = self.primitives.get(&key) {
            return Ok(index as i64);
        }
        let index = self.records.len();
        self.records.push(record);
        self.primitives.insert(key, index);
        Ok(index as i64)
    }

    fn flatten_node(&mut self, node: &Node) -> Result<i64, CodecError> {
        if let Some(&index) = self.nodes.get(&node.address()) {
            return Ok(index as i64);
        }
        if self.depth >= MAX_DEPTH {
            return Err(CodecError::TooDeep {
                limit: MAX_DEPTH,
                location: self.path(),
            });
        }
        self.depth += 1;
        let index = self.flatten_new_node(node);
        self.depth -= 1;
        index
    }

    fn flatten_new_node(&mut self, node: &Node) -> Result<i64, CodecError> {
        let index = self.records.len();
        self.records.push(Json::Null);
        self.nodes.insert(node.address(), index);
        self.pinned.push(node.clone());

        let reducers = self.reducers;
        for reducer in reducers {
            if let Some(reduced) = reducer.reduce(node)? {
                let payload = self.flatten(&reduced.payload)?;
                self.records[index] = json!([reduced.tag, payload]);
                return Ok(index as i64);
            }
        }

        let shape = self.shape(node)?;
        let record = match shape {
            Shape::Done(record) => record,
            Shape::Array(items) => {
                let mut indices = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    indices.push(match item {
                        None => Sentinel::Hole.code(),
                        Some(item) => self.with_segment(format!("[{i}]"), |e| e.flatten(item))?,
                    });
                }
                json!(indices)
            }
            Shape::Object(properties) => {
                let mut record = serde_json::Map::with_capacity(properties.len());
                for (key, value) in &properties {
                    let child = self.with_segment(key_segment(key), |e| e.flatten(value))?;
                    record.insert(key.clone(), json!(child));
                }
                Json::Object(record)
            }
            Shape::Set(items) => {
                let mut record = vec![json!("Set")];
                for item in &items {
                    let i = self.with_segment(".add(..)".to_string(), |e| e.flatten(item))?;
                    record.push(json!(i));
                }
                Json::Array(record)
            }
            Shape::Map(entries) => {
                let mut record = vec![json!("Map")];
                for (key, value) in &entries {
                    let k = self.with_segment(".keys()".to_string(), |e| e.flatten(key))?;
                    let segment = format!(".get({})", describe_key(key));
                    let v = self.with_segment(segment, |e| e.flatten(value))?;
                    record.push(json!(k));
                    record.push(json!(v));
                }
                Json::Array(record)
            }
        };
        self.records[index] = record;
        Ok(index as i64)
    }

    /// Built-in record for `node`, or its children for the structural forms.
    fn shape(&self, node: &Node) -> Result<Shape, CodecError> {
        let guard = node.read();
        let shape = match &*guard {
            Composite::Array(items) => Shape::Array(items.clone()),
            Composite::Object(object) => {
                if !object.symbol_properties.is_empty() {
                    return Err(CodecError::SymbolKey { path: self.path() });
                }
                Shape::Object(object.properties.clone())
            }
            Composite::Boxed(inner) => Shape::Done(json!(["Object", self.boxed_literal(inner)?])),
            Composite::Date(at) => {
                let iso = at
                    .map(|at| at.to_rfc3339_opts(SecondsFormat::Millis, true))
                    .unwrap_or_default();
                Shape::Done(json!(["Date", iso]))
            }
            Composite::RegExp(regexp) if regexp.flags.is_empty() => {
                Shape::Done(json!(["RegExp", regexp.source]))
            }
            Composite::RegExp(regexp) => {
                Shape::Done(json!(["RegExp", regexp.source, regexp.flags]))
            }
            Composite::Set(items) => Shape::Set(items.clone()),
            Composite::Map(entries) => Shape::Map(entries.clone()),
            Composite::ArrayBuffer(bytes) => {
                Shape::Done(json!(["ArrayBuffer", base64::encode(bytes)]))
            }
            Composite::View(view) if view.kind.is_typed_array() => {
                Shape::Done(json!([view.kind.name(), base64::encode(&view.bytes())]))
            }
            other => {
                return Err(CodecError::Unserializable {
                    type_name: other.type_name(),
                    path: self.path(),
                });
            }
        };
        Ok(shape)
    }

    fn boxed_literal(&self, inner: &Value) -> Result<Json, CodecError> {
        match inner {
            Value::Bool(b) => Ok(Json::Bool(*b)),
            Value::String(s) => Ok(Json::String(s.clone())),
            Value::Number(n) if n.is_finite() && !(*n == 0.0 && n.is_sign_negative()) => {
                Ok(number(*n))
            }
            other => Err(CodecError::Unboxable {
                kind: other.type_name(),
                path: self.path(),
            }),
        }
    }

    fn with_segment<T>(
        &mut self,
        segment: String,
        f: impl FnOnce(&mut Self) -> Result<T, CodecError>,
    ) -> Result<T, CodecError> {
        self.path.push(segment);
        let out = f(self);
        self.path.pop();
        out
    }

    fn path(&self) -> String {
        if self.path.is_empty() {
            return "(root)".to_string();
        }
        self.path.concat()
    }
}

/// Integral numbers are written without a fraction.
fn number(n: f64) -> Json {
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        Json::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map_or(Json::Null, Json::Number)
    }
}

fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn key_segment(key: &str) -> String {
    if is_identifier(key) {
        format!(".{key}")
    } else {
        format!("[{}]", Json::String(key.to_string()))
    }
}

fn describe_key(key: &Value) -> String {
    match key {
        Value::String(s) => Json::String(s.clone()).to_string(),
        Value::Node(node) => node.type_name().to_string(),
        other => format!("{other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integral_numbers_have_no_fraction() {
        assert_eq!(number(3.0).to_string(), "3");
        assert_eq!(number(1.5).to_string(), "1.5");
        assert_eq!(number(1e300).to_string(), "1e300");
    }

    #[test]
    fn key_segments() {
        assert_eq!(key_segment("abc_1"), ".abc_1");
        assert_eq!(key_segment("1abc"), "[\"1abc\"]");
        assert_eq!(key_segment("a b"), "[\"a b\"]");
    }
}
