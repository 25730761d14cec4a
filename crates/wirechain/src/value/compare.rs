//! Equality over value graphs.

use std::collections::HashSet;

use super::{Composite, Node, Value};

impl Value {
    /// `Object.is` semantics: NaN equals NaN, `+0` and `-0` differ, nodes
    /// compare by identity.
    pub fn same_value(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => {
                (a.is_nan() && b.is_nan()) || (a == b && a.is_sign_negative() == b.is_sign_negative())
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::BigInt(a), Value::BigInt(b)) => a == b,
            (Value::Node(a), Value::Node(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Structural equality that terminates on cyclic graphs. Primitives use
    /// [`Value::same_value`]; streams and functions compare by identity.
    pub fn deep_eq(&self, other: &Value) -> bool {
        DeepEq::default().values(self, other)
    }
}

#[derive(Default)]
struct DeepEq {
    assumed: HashSet<(usize, usize)>,
    // Keeps every compared node alive so addresses stay unique.
    pinned: Vec<Node>,
}

impl DeepEq {
    fn values(&mut self, a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Node(x), Value::Node(y)) => self.nodes(x, y),
            _ => a.same_value(b),
        }
    }

    fn nodes(&mut self, x: &Node, y: &Node) -> bool {
        if x.ptr_eq(y) {
            return true;
        }
        if !self.assumed.insert((x.address(), y.address())) {
            return true;
        }
        self.pinned.push(x.clone());
        self.pinned.push(y.clone());

        let pairs = {
            let a = x.read();
            let b = y.read();
            match children(&a, &b) {
                Some(pairs) => pairs,
                None => return false,
            }
        };
        pairs.iter().all(|(l, r)| self.values(l, r))
    }
}

/// Compare the scalar parts of two composites and return the child pairs that
/// still need comparing, or `None` on a mismatch.
fn children(a: &Composite, b: &Composite) -> Option<Vec<(Value, Value)>> {
    use Composite::*;

    let pairs = match (a, b) {
        (Array(xs), Array(ys)) => {
            if xs.len() != ys.len() {
                return None;
            }
            let mut pairs = Vec::with_capacity(xs.len());
            for (x, y) in xs.iter().zip(ys) {
                match (x, y) {
                    (None, None) => {}
                    (Some(x), Some(y)) => pairs.push((x.clone(), y.clone())),
                    _ => return None,
                }
            }
            pairs
        }
        (Object(x), Object(y)) => {
            if x.properties.len() != y.properties.len()
                || x.symbol_properties.len() != y.symbol_properties.len()
            {
                return None;
            }
            let mut pairs = Vec::with_capacity(x.properties.len());
            for (key, value) in &x.properties {
                pairs.push((value.clone(), y.properties.get(key)?.clone()));
            }
            pairs
        }
        (Boxed(x), Boxed(y)) => vec![(x.clone(), y.clone())],
        (Date(x), Date(y)) => (x == y).then(Vec::new)?,
        (RegExp(x), RegExp(y)) => (x == y).then(Vec::new)?,
        (Set(xs), Set(ys)) => zip_same_len(xs, ys)?,
        (Map(xs), Map(ys)) => {
            if xs.len() != ys.len() {
                return None;
            }
            xs.iter()
                .zip(ys)
                .flat_map(|((xk, xv), (yk, yv))| {
                    [(xk.clone(), yk.clone()), (xv.clone(), yv.clone())]
                })
                .collect()
        }
        (ArrayBuffer(x), ArrayBuffer(y)) => (x == y).then(Vec::new)?,
        (View(x), View(y)) => {
            let same = x.kind == y.kind
                && x.byte_offset == y.byte_offset
                && x.byte_length == y.byte_length;
            same.then(|| vec![(x.buffer.clone().into(), y.buffer.clone().into())])?
        }
        (Error(x), Error(y)) => {
            let same = x.kind == y.kind && x.message == y.message && x.stack == y.stack;
            same.then(|| vec![(x.cause.clone(), y.cause.clone())])?
        }
        (Headers(x), Headers(y)) => (x == y).then(Vec::new)?,
        (Request(x), Request(y)) => {
            let same = x.method == y.method
                && x.url == y.url
                && x.headers == y.headers
                && x.body.is_some() == y.body.is_some();
            same.then(|| vec![(x.cf.clone(), y.cf.clone())])?
        }
        (Response(x), Response(y)) => {
            let same = x.status == y.status
                && x.status_text == y.status_text
                && x.headers == y.headers
                && x.body.is_some() == y.body.is_some();
            same.then(|| vec![(x.cf.clone(), y.cf.clone())])?
        }
        (Stream(x), Stream(y)) => x.ptr_eq(y).then(Vec::new)?,
        (Blob(x), Blob(y)) => {
            let same = x.data == y.data && x.content_type == y.content_type && x.file == y.file;
            same.then(Vec::new)?
        }
        (Function(x), Function(y)) => x.ptr_eq(y).then(Vec::new)?,
        (Stub(x), Stub(y)) => vec![(x.clone(), y.clone())],
        (Chain(x), Chain(y)) => {
            let (x, y) = (x.marker(), y.marker());
            (x.target == y.target).then_some(())?;
            links(&x.chain, &y.chain)?
        }
        (Marker(x), Marker(y)) => {
            (x.target == y.target).then_some(())?;
            links(&x.chain, &y.chain)?
        }
        (Internal(x), Internal(y)) => {
            let same = x.class_name == y.class_name
                && x.properties.len() == y.properties.len()
                && x.body.is_some() == y.body.is_some();
            if !same {
                return None;
            }
            let mut pairs = Vec::with_capacity(x.properties.len());
            for (key, value) in &x.properties {
                pairs.push((value.clone(), y.properties.get(key)?.clone()));
            }
            pairs
        }
        (SyncMethod(x), SyncMethod(y)) => {
            (x.name == y.name).then(|| vec![(x.result.clone(), y.result.clone())])?
        }
        _ => return None,
    };
    Some(pairs)
}

fn zip_same_len(xs: &[Value], ys: &[Value]) -> Option<Vec<(Value, Value)>> {
    (xs.len() == ys.len()).then(|| xs.iter().cloned().zip(ys.iter().cloned()).collect())
}

fn links(
    xs: &[crate::protocol::Link],
    ys: &[crate::protocol::Link],
) -> Option<Vec<(Value, Value)>> {
    use crate::protocol::Link;

    if xs.len() != ys.len() {
        return None;
    }
    let mut pairs = Vec::new();
    for (x, y) in xs.iter().zip(ys) {
        match (x, y) {
            (Link::Get { property: a }, Link::Get { property: b }) if a == b => {}
            (Link::Apply { arguments: a }, Link::Apply { arguments: b }) => {
                pairs.extend(zip_same_len(a, b)?);
            }
            _ => return None,
        }
    }
    Some(pairs)
}
