//! Structured-clone style built-ins: buffers, views and errors.

use crate::base64;
use crate::codec::{CodecError, Reduced, Reducer, Reviver};
use crate::value::{BufferView, Composite, ErrorKind, ErrorValue, Node, Value, ViewKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClonableTag {
    ArrayBuffer,
    ArrayBufferView,
    Error,
}

impl ClonableTag {
    pub fn name(self) -> &'static str {
        match self {
            Self::ArrayBuffer => "ArrayBuffer",
            Self::ArrayBufferView => "ArrayBufferView",
            Self::Error => "Error",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ArrayBuffer" => Some(Self::ArrayBuffer),
            "ArrayBufferView" => Some(Self::ArrayBufferView),
            "Error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Reducer and reviver for the clonable layer.
#[derive(Debug, Default, Clone, Copy)]
pub struct Clonable;

impl Reducer for Clonable {
    fn reduce(&self, node: &Node) -> Result<Option<Reduced>, CodecError> {
        let reduced = match &*node.read() {
            Composite::ArrayBuffer(bytes) => Reduced::new(
                ClonableTag::ArrayBuffer.name(),
                Value::String(base64::encode(bytes)),
            ),
            Composite::View(view) => Reduced::new(
                ClonableTag::ArrayBufferView.name(),
                Value::array([
                    Value::from(view.kind.name()),
                    Value::Node(view.buffer.clone()),
                    Value::from(view.byte_offset),
                    Value::from(view.byte_length),
                ]),
            ),
            Composite::Error(error) => Reduced::new(
                ClonableTag::Error.name(),
                Value::array([
                    Value::from(error.kind.name()),
                    Value::from(error.message.as_str()),
                    error.stack.clone().into(),
                    error.cause.clone(),
                ]),
            ),
            _ => return Ok(None),
        };
        Ok(Some(reduced))
    }
}

impl Reviver for Clonable {
    fn handles(&self, tag: &str) -> bool {
        ClonableTag::from_name(tag).is_some()
    }

    fn revive(&self, tag: &str, payload: Value) -> Result<Value, CodecError> {
        match ClonableTag::from_name(tag) {
            Some(ClonableTag::ArrayBuffer) => {
                let encoded = payload
                    .as_str()
                    .ok_or_else(|| CodecError::handler("ArrayBuffer", "payload must be base64 text"))?;
                Ok(Value::array_buffer(base64::decode(encoded)?))
            }
            Some(ClonableTag::ArrayBufferView) => revive_view(&payload),
            Some(ClonableTag::Error) => revive_error(&payload),
            None => Err(CodecError::UnknownTag(tag.to_string())),
        }
    }
}

fn revive_view(payload: &Value) -> Result<Value, CodecError> {
    let name = payload.index(0);
    let kind = name
        .as_str()
        .and_then(ViewKind::from_name)
        .ok_or_else(|| CodecError::handler("ArrayBufferView", format!("unknown view type {name:?}")))?;
    let buffer = payload.index(1);
    let (buffer, buffer_len) = match buffer.as_node() {
        Some(node) => match &*node.read() {
            Composite::ArrayBuffer(bytes) => (node.clone(), bytes.len()),
            _ => return Err(not_a_buffer(&buffer)),
        },
        None => return Err(not_a_buffer(&buffer)),
    };
    let byte_offset = non_negative(&payload.index(2), "byteOffset")?;
    let byte_length = non_negative(&payload.index(3), "byteLength")?;

    let end = byte_offset.checked_add(byte_length).filter(|end| *end <= buffer_len);
    if end.is_none() {
        return Err(CodecError::handler(
            "ArrayBufferView",
            format!("{byte_length} bytes at offset {byte_offset} exceed a {buffer_len} byte buffer"),
        ));
    }
    let element = kind.bytes_per_element();
    if byte_offset % element != 0 || byte_length % element != 0 {
        return Err(CodecError::handler(
            "ArrayBufferView",
            format!(
                "{} needs offset and length in multiples of {element}, got {byte_offset} and {byte_length}",
                kind.name()
            ),
        ));
    }

    Ok(Value::node(Composite::View(BufferView {
        kind,
        buffer,
        byte_offset,
        byte_length,
    })))
}

fn not_a_buffer(value: &Value) -> CodecError {
    CodecError::handler(
        "ArrayBufferView",
        format!("expected an ArrayBuffer, got {}", value.type_name()),
    )
}

fn non_negative(value: &Value, what: &str) -> Result<usize, CodecError> {
    match value.as_f64() {
        Some(n) if n >= 0.0 && n.fract() == 0.0 => Ok(n as usize),
        _ => Err(CodecError::handler(
            "ArrayBufferView",
            format!("{what} must be a non-negative integer, got {value:?}"),
        )),
    }
}

fn revive_error(payload: &Value) -> Result<Value, CodecError> {
    let name = payload.index(0);
    let kind = name
        .as_str()
        .and_then(ErrorKind::from_name)
        .ok_or_else(|| CodecError::handler("Error", format!("unsupported error type {name:?}")))?;
    let message = payload.index(1).as_str().unwrap_or_default().to_string();
    let stack = payload.index(2).as_str().map(str::to_string);
    Ok(Value::node(Composite::Error(ErrorValue {
        kind,
        message,
        stack,
        cause: payload.index(3),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{parse, stringify};

    fn roundtrip(value: &Value) -> Value {
        let text = stringify(value, &[&Clonable]).unwrap();
        parse(&text, &[&Clonable]).unwrap()
    }

    #[test]
    fn array_buffer_record() {
        let text = stringify(&Value::array_buffer(vec![1, 2, 3]), &[&Clonable]).unwrap();
        insta::assert_snapshot!(text, @r#"[["ArrayBuffer",1],"AQID"]"#);
    }

    #[test]
    fn views_share_their_buffer() {
        let buffer = Node::new(Composite::ArrayBuffer(vec![0, 1, 2, 3, 4, 5, 6, 7]));
        let view = |kind, byte_offset, byte_length| {
            Value::node(Composite::View(BufferView {
                kind,
                buffer: buffer.clone(),
                byte_offset,
                byte_length,
            }))
        };
        let root = Value::array([view(ViewKind::Uint16, 2, 4), view(ViewKind::DataView, 0, 8)]);

        let decoded = roundtrip(&root);
        assert!(decoded.deep_eq(&root));
        assert_eq!(decoded.index(0).bytes(), Some(vec![2, 3, 4, 5]));

        let buffer_of = |v: Value| match &*v.as_node().unwrap().read() {
            Composite::View(view) => view.buffer.clone(),
            _ => panic!("not a view"),
        };
        assert!(buffer_of(decoded.index(0)).ptr_eq(&buffer_of(decoded.index(1))));
    }

    #[test]
    fn errors_keep_kind_stack_and_cause() {
        let cause = Value::error(ErrorKind::RangeError, "inner");
        let error = ErrorValue::new(ErrorKind::TypeError, "outer").with_cause(cause);
        let root = Value::node(Composite::Error(error));

        let decoded = roundtrip(&root);
        assert!(decoded.deep_eq(&root));
        let Composite::Error(e) = &*decoded.as_node().unwrap().read() else {
            panic!("not an error");
        };
        assert_eq!(e.kind, ErrorKind::TypeError);
        assert_eq!(e.stack.as_deref(), Some("TypeError: outer"));
    }

    #[test]
    fn unknown_error_names_are_rejected() {
        let text = r#"[["Error",1],[2,3,-1,-1],"AggregateError","boom"]"#;
        let err = parse(text, &[&Clonable]).unwrap_err();
        assert!(matches!(err, CodecError::Handler { tag: "Error", .. }));
        assert!(err.to_string().contains("AggregateError"), "{err}");
    }

    /// A view over the eight bytes `0..8`.
    fn view_text(kind: &str, byte_offset: &str, byte_length: &str) -> String {
        format!(
            r#"[["ArrayBufferView",1],[2,3,5,6],"{kind}",["ArrayBuffer",4],"AAECAwQFBgc=",{byte_offset},{byte_length}]"#
        )
    }

    #[test]
    fn handwritten_views_decode() {
        let decoded = parse(&view_text("Uint32Array", "4", "4"), &[&Clonable]).unwrap();
        assert_eq!(decoded.bytes(), Some(vec![4, 5, 6, 7]));
    }

    #[test]
    fn views_past_the_buffer_are_rejected() {
        let err = parse(&view_text("Uint8Array", "4", "8"), &[&Clonable]).unwrap_err();
        assert!(matches!(err, CodecError::Handler { tag: "ArrayBufferView", .. }));
    }

    #[test]
    fn huge_view_offsets_are_rejected() {
        let err = parse(&view_text("Uint8Array", "1e300", "8"), &[&Clonable]).unwrap_err();
        assert!(matches!(err, CodecError::Handler { tag: "ArrayBufferView", .. }));
    }

    #[test]
    fn misaligned_views_are_rejected() {
        for (offset, length) in [("1", "4"), ("0", "3")] {
            let err = parse(&view_text("Uint32Array", offset, length), &[&Clonable]).unwrap_err();
            assert!(
                matches!(err, CodecError::Handler { tag: "ArrayBufferView", .. }),
                "{offset}/{length}: {err}"
            );
        }
    }

    #[test]
    fn views_outside_their_buffer_read_as_empty() {
        let view = BufferView {
            kind: ViewKind::Uint8,
            buffer: Node::new(Composite::ArrayBuffer(vec![1, 2, 3])),
            byte_offset: usize::MAX,
            byte_length: 2,
        };
        assert!(view.bytes().is_empty());
    }
}
