use chrono::{DateTime, Utc};
use serde_json::Value as Json;

use super::{CodecError, MAX_DEPTH, Reviver, Sentinel};
use crate::base64;
use crate::value::{Composite, Node, ObjectValue, RegExp, Value, ViewKind};

enum Slot {
    Empty,
    /// A reviver's payload is being hydrated.
    InProgress(String),
    Done(Value),
}

pub(super) struct Decoder<'a> {
    records: &'a [Json],
    revivers: &'a [&'a dyn Reviver],
    slots: Vec<Slot>,
    depth: usize,
}

impl<'a> Decoder<'a> {
    pub(super) fn new(records: &'a [Json], revivers: &'a [&'a dyn Reviver]) -> Self {
        Self {
            records,
            revivers,
            slots: std::iter::repeat_with(|| Slot::Empty)
                .take(records.len())
                .collect(),
            depth: 0,
        }
    }

    pub(super) fn run(mut self) -> Result<Value, CodecError> {
        self.hydrate(0)
    }

    fn hydrate(&mut self, index: i64) -> Result<Value, CodecError> {
        if index < 0 {
            return Sentinel::from_code(index)
                .map(Sentinel::value)
                .ok_or(CodecError::InvalidIndex(index));
        }
        let i = usize::try_from(index).map_err(|_| CodecError::InvalidIndex(index))?;
        let records = self.records;
        let record = records.get(i).ok_or(CodecError::InvalidIndex(index))?;
        match &self.slots[i] {
            Slot::Done(value) => return Ok(value.clone()),
            Slot::InProgress(tag) => {
                return Err(CodecError::ReviverCycle {
                    tag: tag.clone(),
                    index: i,
                });
            }
            Slot::Empty => {}
        }

        if self.depth >= MAX_DEPTH && nests(record) {
            return Err(CodecError::TooDeep {
                limit: MAX_DEPTH,
                location: format!("record {i}"),
            });
        }
        self.depth += 1;
        let value = self.record(i, record);
        self.depth -= 1;
        value
    }

    fn record(&mut self, i: usize, record: &Json) -> Result<Value, CodecError> {
        match record {
            Json::Null => self.finish(i, Value::Null),
            Json::Bool(b) => self.finish(i, Value::Bool(*b)),
            Json::Number(n) => {
                let n = n
                    .as_f64()
                    .ok_or_else(|| CodecError::malformed(i, format!("unrepresentable number {n}")))?;
                self.finish(i, Value::Number(n))
            }
            Json::String(s) => self.finish(i, Value::String(s.clone())),
            Json::Object(entries) => {
                let object = self.place(i, Composite::Object(ObjectValue::default()));
                for (key, child) in entries {
                    let child = self.child(i, child)?;
                    if let Composite::Object(o) = &mut *object.write() {
                        o.insert(key.clone(), child);
                    }
                }
                Ok(object.into())
            }
            Json::Array(items) => match items.first() {
                Some(Json::String(tag)) => self.tagged(i, tag, &items[1..]),
                _ => {
                    let array = self.place(i, Composite::Array(Vec::with_capacity(items.len())));
                    for item in items {
                        let index = index_of(i, item)?;
                        let element = if index == Sentinel::Hole.code() {
                            None
                        } else {
                            Some(self.hydrate(index)?)
                        };
                        if let Composite::Array(elements) = &mut *array.write() {
                            elements.push(element);
                        }
                    }
                    Ok(array.into())
                }
            },
        }
    }

    fn tagged(&mut self, i: usize, tag: &str, args: &[Json]) -> Result<Value, CodecError> {
        let revivers = self.revivers;
        if let Some(reviver) = revivers.iter().find(|r| r.handles(tag)) {
            let payload = args
                .first()
                .ok_or_else(|| CodecError::malformed(i, format!("{tag} record without payload")))?;
            self.slots[i] = Slot::InProgress(tag.to_string());
            let payload = self.child(i, payload)?;
            let value = reviver.revive(tag, payload)?;
            return self.finish(i, value);
        }

        match tag {
            "Object" => {
                let literal = match args.first() {
                    Some(Json::String(s)) => Value::String(s.clone()),
                    Some(Json::Bool(b)) => Value::Bool(*b),
                    Some(Json::Number(n)) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
                    _ => return Err(CodecError::malformed(i, "boxed value must be a literal")),
                };
                self.finish(i, Value::boxed(literal))
            }
            "Date" => {
                let at = string_arg(i, args, 0)?;
                let parsed = DateTime::parse_from_rfc3339(at)
                    .ok()
                    .map(|at| at.with_timezone(&Utc));
                self.finish(i, Value::node(Composite::Date(parsed)))
            }
            "RegExp" => {
                let source = string_arg(i, args, 0)?.to_string();
                let flags = match args.get(1) {
                    Some(Json::String(flags)) => flags.clone(),
                    _ => String::new(),
                };
                self.finish(i, Value::node(Composite::RegExp(RegExp { source, flags })))
            }
            "BigInt" => {
                let digits = string_arg(i, args, 0)?;
                let n = digits
                    .parse::<i128>()
                    .map_err(|e| CodecError::malformed(i, format!("bad BigInt {digits:?}: {e}")))?;
                self.finish(i, Value::BigInt(n))
            }
            "Set" => {
                let set = self.place(i, Composite::Set(Vec::with_capacity(args.len())));
                for item in args {
                    let item = self.child(i, item)?;
                    if let Composite::Set(items) = &mut *set.write() {
                        items.push(item);
                    }
                }
                Ok(set.into())
            }
            "Map" => {
                let map = self.place(i, Composite::Map(Vec::with_capacity(args.len() / 2)));
                for pair in args.chunks(2) {
                    let [key, value] = pair else {
                        return Err(CodecError::malformed(i, "Map record with odd length"));
                    };
                    let key = self.child(i, key)?;
                    let value = self.child(i, value)?;
                    if let Composite::Map(entries) = &mut *map.write() {
                        entries.push((key, value));
                    }
                }
                Ok(map.into())
            }
            "null" => {
                let object = self.place(i, Composite::Object(ObjectValue::default()));
                for pair in args.chunks(2) {
                    let [Json::String(key), value] = pair else {
                        return Err(CodecError::malformed(i, "null-prototype record needs key/value pairs"));
                    };
                    let value = self.child(i, value)?;
                    if let Composite::Object(o) = &mut *object.write() {
                        o.insert(key.clone(), value);
                    }
                }
                Ok(object.into())
            }
            "ArrayBuffer" => {
                let bytes = base64::decode(string_arg(i, args, 0)?)?;
                self.finish(i, Value::array_buffer(bytes))
            }
            name => match ViewKind::from_name(name).filter(ViewKind::is_typed_array) {
                Some(kind) => {
                    let bytes = base64::decode(string_arg(i, args, 0)?)?;
                    if bytes.len() % kind.bytes_per_element() != 0 {
                        return Err(CodecError::malformed(
                            i,
                            format!("{} bytes do not fill a whole {name}", bytes.len()),
                        ));
                    }
                    self.finish(i, Value::typed_array(kind, bytes))
                }
                None => Err(CodecError::UnknownTag(name.to_string())),
            },
        }
    }

    fn child(&mut self, parent: usize, index: &Json) -> Result<Value, CodecError> {
        let index = index_of(parent, index)?;
        self.hydrate(index)
    }

    /// Fill the slot before any child is visited so back-references find it.
    fn place(&mut self, i: usize, composite: Composite) -> Node {
        let node = Node::new(composite);
        self.slots[i] = Slot::Done(node.clone().into());
        node
    }

    fn finish(&mut self, i: usize, value: Value) -> Result<Value, CodecError> {
        self.slots[i] = Slot::Done(value.clone());
        Ok(value)
    }
}

/// Whether `record` can refer to further records. Primitives and BigInts are
/// leaves.
fn nests(record: &Json) -> bool {
    match record {
        Json::Object(_) => true,
        Json::Array(items) => !matches!(items.first(), Some(Json::String(tag)) if tag == "BigInt"),
        _ => false,
    }
}

fn index_of(parent: usize, json: &Json) -> Result<i64, CodecError> {
    json.as_i64()
        .ok_or_else(|| CodecError::malformed(parent, format!("expected an index, got {json}")))
}

fn string_arg(i: usize, args: &[Json], n: usize) -> Result<&str, CodecError> {
    args.get(n)
        .and_then(Json::as_str)
        .ok_or_else(|| CodecError::malformed(i, format!("argument {n} must be a string")))
}
