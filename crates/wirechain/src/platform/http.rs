//! HTTP-shaped values: headers, requests and responses.
//!
//! Bodies are emitted as stream nodes, so whichever stream reducer runs first
//! (see [`crate::envelope`]) decides whether they travel inline or as the tail.

use bytes::Bytes;

use crate::body::BodyStream;
use crate::codec::{CodecError, Reduced, Reducer, Reviver};
use crate::value::{Composite, HeaderList, HttpRequest, HttpResponse, Node, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpTag {
    Headers,
    Request,
    Response,
}

impl HttpTag {
    pub fn name(self) -> &'static str {
        match self {
            Self::Headers => "Headers",
            Self::Request => "Request",
            Self::Response => "Response",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Headers" => Some(Self::Headers),
            "Request" => Some(Self::Request),
            "Response" => Some(Self::Response),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Http;

impl Reducer for Http {
    fn reduce(&self, node: &Node) -> Result<Option<Reduced>, CodecError> {
        let reduced = match &*node.read() {
            Composite::Headers(headers) => Reduced::new(
                HttpTag::Headers.name(),
                Value::object(headers.iter().map(|(k, v)| (k, Value::from(v)))),
            ),
            Composite::Request(request) => Reduced::new(
                HttpTag::Request.name(),
                Value::array([
                    Value::from(request.method.as_str()),
                    Value::from(request.url.as_str()),
                    headers_node(&request.headers),
                    request.cf.clone(),
                    body_value(&request.body),
                ]),
            ),
            Composite::Response(response) => Reduced::new(
                HttpTag::Response.name(),
                Value::array([
                    Value::from(u32::from(response.status)),
                    Value::from(response.status_text.as_str()),
                    headers_node(&response.headers),
                    response.cf.clone(),
                    body_value(&response.body),
                ]),
            ),
            _ => return Ok(None),
        };
        Ok(Some(reduced))
    }
}

impl Reviver for Http {
    fn handles(&self, tag: &str) -> bool {
        HttpTag::from_name(tag).is_some()
    }

    fn revive(&self, tag: &str, payload: Value) -> Result<Value, CodecError> {
        match HttpTag::from_name(tag) {
            Some(HttpTag::Headers) => Ok(Value::node(Composite::Headers(header_list(&payload)))),
            Some(HttpTag::Request) => {
                let request = HttpRequest {
                    method: string_field(&payload, 0, "Request", "method")?,
                    url: string_field(&payload, 1, "Request", "url")?,
                    headers: headers_of(&payload.index(2)),
                    cf: payload.index(3),
                    body: body_of(&payload.index(4)),
                };
                Ok(Value::node(Composite::Request(request)))
            }
            Some(HttpTag::Response) => {
                let status = payload
                    .index(0)
                    .as_f64()
                    .filter(|s| (0.0..=999.0).contains(s))
                    .ok_or_else(|| CodecError::handler("Response", "status must be a number"))?;
                let response = HttpResponse {
                    status: status as u16,
                    status_text: payload.index(1).as_str().unwrap_or_default().to_string(),
                    headers: headers_of(&payload.index(2)),
                    cf: payload.index(3),
                    body: body_of(&payload.index(4)),
                };
                Ok(Value::node(Composite::Response(response)))
            }
            None => Err(CodecError::UnknownTag(tag.to_string())),
        }
    }
}

fn headers_node(headers: &HeaderList) -> Value {
    Value::node(Composite::Headers(headers.clone()))
}

fn body_value(body: &Option<BodyStream>) -> Value {
    match body {
        Some(stream) => Value::stream(stream.clone()),
        None => Value::Null,
    }
}

/// Header pairs from a plain object.
fn header_list(object: &Value) -> HeaderList {
    let Some(node) = object.as_node() else {
        return HeaderList::new();
    };
    match &*node.read() {
        Composite::Object(object) => object
            .properties
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
            .collect(),
        _ => HeaderList::new(),
    }
}

/// Headers from an already revived `Headers` node.
fn headers_of(value: &Value) -> HeaderList {
    match value.as_node().map(|n| n.read()) {
        Some(guard) => match &*guard {
            Composite::Headers(headers) => headers.clone(),
            _ => HeaderList::new(),
        },
        None => HeaderList::new(),
    }
}

/// A body arrives as a stream, or as a buffer when it was embedded inline.
fn body_of(value: &Value) -> Option<BodyStream> {
    let node = value.as_node()?;
    match &*node.read() {
        Composite::Stream(stream) => Some(stream.clone()),
        Composite::ArrayBuffer(bytes) => Some(BodyStream::from_bytes(Bytes::from(bytes.clone()))),
        _ => None,
    }
}

fn string_field(
    payload: &Value,
    i: usize,
    tag: &'static str,
    what: &str,
) -> Result<String, CodecError> {
    match payload.index(i) {
        Value::String(s) => Ok(s),
        other => Err(CodecError::handler(
            tag,
            format!("{what} must be a string, got {}", other.type_name()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{parse, stringify};

    #[test]
    fn headers_are_plain_objects() {
        let headers: HeaderList = [("Content-Type", "text/plain"), ("X-Id", "7")]
            .into_iter()
            .collect();
        let text = stringify(&Value::node(Composite::Headers(headers)), &[&Http]).unwrap();
        insta::assert_snapshot!(
            text,
            @r#"[["Headers",1],{"content-type":2,"x-id":3},"text/plain","7"]"#
        );

        let decoded = parse(&text, &[&Http]).unwrap();
        let Composite::Headers(headers) = &*decoded.as_node().unwrap().read() else {
            panic!("not headers");
        };
        assert_eq!(headers.get("content-type"), Some("text/plain"));
    }

    #[test]
    fn bodyless_request_roundtrips() {
        let mut request = HttpRequest::new("POST", "https://example.com/a");
        request.headers.set("accept", "*/*");
        request.cf = Value::object([("colo", Value::from("LHR"))]);
        let root = Value::node(Composite::Request(request));

        let text = stringify(&root, &[&Http]).unwrap();
        let decoded = parse(&text, &[&Http]).unwrap();
        assert!(decoded.deep_eq(&root));
    }

    #[test]
    fn response_with_body_needs_a_stream_reducer() {
        let mut response = HttpResponse::new(200);
        response.body = Some(BodyStream::from_bytes(Bytes::from_static(b"hi")));
        let err = stringify(&Value::node(Composite::Response(response)), &[&Http]).unwrap_err();
        assert!(matches!(
            err,
            CodecError::Unserializable {
                type_name: "ReadableStream",
                ..
            }
        ));
    }

    #[test]
    fn response_status_and_text() {
        let mut response = HttpResponse::new(404);
        response.status_text = "Not Found".into();
        let root = Value::node(Composite::Response(response));

        let decoded = parse(&stringify(&root, &[&Http]).unwrap(), &[&Http]).unwrap();
        let Composite::Response(r) = &*decoded.as_node().unwrap().read() else {
            panic!("not a response");
        };
        assert_eq!(r.status, 404);
        assert_eq!(r.status_text, "Not Found");
        assert!(r.body.is_none());
    }
}
