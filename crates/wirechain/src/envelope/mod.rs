//! Streaming envelope: encoded text plus at most one raw tail per message.
//!
//! Body layout is `[prefix][tail?]`. `X-Buffer-Size` carries the prefix byte
//! length. When it equals `Content-Length` (or is missing) there is no tail
//! and the whole body is text. Otherwise the receiver reads exactly that many
//! bytes as text and hands the remainder, still streaming, to whichever value
//! held the tail placeholder.

mod frame;
mod streams;

use std::collections::HashMap;
use std::io;

use bytes::Bytes;
use http::HeaderMap;
use http::header::{CONTENT_LENGTH, HeaderValue};

pub use frame::{PrefixCodec, read_prefix};
pub use streams::{BLOB_TAG, READABLE_STREAM_TAG};

use crate::body::{self, BodyStream, WireBody};
use crate::codec::{self, CodecError, Flattened, Reducer, Reviver};
use crate::value::Value;
use streams::{StreamReducer, StreamReviver};

/// Header naming the byte length of the encoded prefix.
pub const BUFFER_SIZE_HEADER: &str = "x-buffer-size";

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("Expected {expected} byte prefix, but received {received} byte stream")]
    TruncatedPrefix { expected: usize, received: usize },

    #[error("invalid length header {0}")]
    InvalidBufferSize(String),

    #[error("prefix is not UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("body I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// A value ready to be written: its text and the stream to send after it.
#[derive(Debug)]
pub struct Packed {
    pub text: String,
    pub tail: Option<BodyStream>,
}

impl Packed {
    pub fn prefix_len(&self) -> usize {
        self.text.len()
    }

    /// Set `X-Buffer-Size`, plus `Content-Length` when the text is the
    /// whole body.
    pub fn write_headers(&self, headers: &mut HeaderMap) {
        let size = HeaderValue::from(self.prefix_len());
        if self.tail.is_none() {
            headers.insert(CONTENT_LENGTH, size.clone());
        }
        headers.insert(BUFFER_SIZE_HEADER, size);
    }

    pub fn into_body(self) -> WireBody {
        let text = Bytes::from(self.text);
        match self.tail.and_then(|tail| tail.take()) {
            Some(tail) => WireBody::Streaming(body::prepend(text, tail)),
            None => WireBody::Full(text),
        }
    }

    pub fn into_request(
        self,
        mut builder: http::request::Builder,
    ) -> Result<http::Request<WireBody>, http::Error> {
        if let Some(headers) = builder.headers_mut() {
            self.write_headers(headers);
        }
        builder.body(self.into_body())
    }

    pub fn into_response(self, status: http::StatusCode) -> http::Response<WireBody> {
        let mut response = http::Response::new(WireBody::empty());
        *response.status_mut() = status;
        self.write_headers(response.headers_mut());
        *response.body_mut() = self.into_body();
        response
    }
}

/// Encode `value` for the wire.
///
/// Stream handling runs before `reducers`. With `allow_tail`, the first stream
/// reached becomes the tail; every other stream is read to the end and
/// embedded.
pub async fn pack(
    value: &Value,
    reducers: &[&dyn Reducer],
    allow_tail: bool,
) -> Result<Packed, EnvelopeError> {
    let discovery = StreamReducer::discover(allow_tail);
    let flattened = encode_with(&discovery, value, reducers)?;
    let (tail, pending) = discovery.into_discovery();

    let flattened = if pending.is_empty() {
        flattened
    } else {
        let mut buffers = HashMap::with_capacity(pending.len());
        for stream in &pending {
            buffers.insert(stream.address(), stream.read_all().await?);
        }
        tracing::debug!(buffered = pending.len(), "Embedding streams inline");
        let substitute = StreamReducer::substitute(tail.clone(), buffers);
        encode_with(&substitute, value, reducers)?
    };

    let text = serde_json::to_string(&flattened.to_json()).map_err(CodecError::from)?;
    tracing::trace!(
        prefix_bytes = text.len(),
        has_tail = tail.is_some(),
        "Packed envelope"
    );
    Ok(Packed { text, tail })
}

fn encode_with(
    streams: &StreamReducer,
    value: &Value,
    reducers: &[&dyn Reducer],
) -> Result<Flattened, CodecError> {
    let mut table: Vec<&dyn Reducer> = Vec::with_capacity(reducers.len() + 1);
    table.push(streams);
    table.extend_from_slice(reducers);
    codec::encode(value, &table)
}

/// Decode text with an optional tail already split off.
pub fn unpack_text(
    text: &str,
    tail: Option<BodyStream>,
    revivers: &[&dyn Reviver],
) -> Result<Value, CodecError> {
    let streams = StreamReviver::new(tail);
    let mut table: Vec<&dyn Reviver> = Vec::with_capacity(revivers.len() + 1);
    table.push(&streams);
    table.extend_from_slice(revivers);
    codec::parse(text, &table)
}

/// Prefix length declared by `headers`, or `None` when the body has no tail.
pub fn declared_prefix(headers: &HeaderMap) -> Result<Option<usize>, EnvelopeError> {
    let Some(size) = header_usize(headers, BUFFER_SIZE_HEADER)? else {
        return Ok(None);
    };
    match header_usize(headers, CONTENT_LENGTH.as_str())? {
        Some(length) if length == size => Ok(None),
        _ => Ok(Some(size)),
    }
}

fn header_usize(headers: &HeaderMap, name: &str) -> Result<Option<usize>, EnvelopeError> {
    headers
        .get(name)
        .map(|value| {
            value
                .to_str()
                .ok()
                .and_then(|s| s.trim().parse::<usize>().ok())
                .ok_or_else(|| EnvelopeError::InvalidBufferSize(format!("{name}: {value:?}")))
        })
        .transpose()
}

/// Decode a received body.
pub async fn unpack(
    headers: &HeaderMap,
    body: WireBody,
    revivers: &[&dyn Reviver],
) -> Result<Value, EnvelopeError> {
    let (prefix, tail) = match declared_prefix(headers)? {
        None => (body.collect().await?, None),
        Some(len) => {
            let (prefix, rest) = read_prefix(body.into_stream(), len).await?;
            (prefix, Some(BodyStream::new(rest)))
        }
    };
    let text = std::str::from_utf8(&prefix)?;
    Ok(unpack_text(text, tail, revivers)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Platform;
    use crate::value::{Composite, FileMeta, HttpRequest, HttpResponse};

    fn platform() -> Platform {
        Platform::detached()
    }

    fn stream_of(value: &Value) -> BodyStream {
        match &*value.as_node().unwrap().read() {
            Composite::Stream(stream) => stream.clone(),
            Composite::Request(request) => request.body.clone().unwrap(),
            Composite::Response(response) => response.body.clone().unwrap(),
            other => panic!("no stream in {}", other.type_name()),
        }
    }

    async fn through_wire(packed: Packed) -> Value {
        let mut headers = HeaderMap::new();
        packed.write_headers(&mut headers);
        let body = packed.into_body();
        let platform = platform();
        unpack(&headers, body, &platform.revivers()).await.unwrap()
    }

    #[tokio::test]
    async fn buffer_without_tail_is_base64_text() {
        let platform = platform();
        let value = Value::array_buffer(vec![7u8; 10]);
        let packed = pack(&value, &platform.reducers(), false).await.unwrap();

        assert!(packed.tail.is_none());
        let json: serde_json::Value = serde_json::from_str(&packed.text).unwrap();
        let encoded = json[1].as_str().unwrap();
        assert_eq!(encoded.len(), 10usize.div_ceil(3) * 4);

        let mut headers = HeaderMap::new();
        packed.write_headers(&mut headers);
        assert_eq!(headers[CONTENT_LENGTH], packed.text.len().to_string());
        assert_eq!(headers[BUFFER_SIZE_HEADER], packed.text.len().to_string());
    }

    #[tokio::test]
    async fn first_stream_becomes_the_tail() {
        let platform = platform();
        let mut response = HttpResponse::new(200);
        response.body = Some(BodyStream::from_bytes(Bytes::from_static(b"streamed body")));
        let value = Value::node(Composite::Response(response));

        let packed = pack(&value, &platform.reducers(), true).await.unwrap();
        assert!(packed.tail.is_some());
        assert!(packed.text.contains(r#"["ReadableStream","#));

        let decoded = through_wire(packed).await;
        let body = stream_of(&decoded).read_all().await.unwrap();
        assert_eq!(&body[..], b"streamed body");
    }

    #[tokio::test]
    async fn other_streams_are_embedded() {
        let platform = platform();
        let first = BodyStream::from_bytes(Bytes::from_static(b"one"));
        let second = Value::stream(BodyStream::from_bytes(Bytes::from_static(b"two")));
        let value = Value::array([Value::stream(first), second.clone(), second]);

        let packed = pack(&value, &platform.reducers(), true).await.unwrap();
        assert!(packed.text.contains(r#""dHdv""#));

        let decoded = through_wire(packed).await;
        assert!(decoded.index(1).same_value(&decoded.index(2)));
        let first = stream_of(&decoded.index(0)).read_all().await.unwrap();
        let second = stream_of(&decoded.index(1)).read_all().await.unwrap();
        assert_eq!(&first[..], b"one");
        assert_eq!(&second[..], b"two");
    }

    #[tokio::test]
    async fn tails_disallowed_buffers_everything() {
        let platform = platform();
        let mut request = HttpRequest::new("PUT", "https://example.com/upload");
        request.body = Some(BodyStream::from_bytes(Bytes::from_static(b"payload")));
        let value = Value::node(Composite::Request(request));

        let packed = pack(&value, &platform.reducers(), false).await.unwrap();
        assert!(packed.tail.is_none());

        let decoded = through_wire(packed).await;
        let body = stream_of(&decoded).read_all().await.unwrap();
        assert_eq!(&body[..], b"payload");
    }

    #[tokio::test]
    async fn blobs_and_files_are_inline() {
        let platform = platform();
        let file = Value::node(Composite::Blob(crate::value::Blob {
            data: Bytes::from_static(b"<svg/>"),
            content_type: "image/svg+xml".into(),
            file: Some(FileMeta {
                name: "logo.svg".into(),
                last_modified: 1_700_000_000_000.0,
            }),
        }));
        let value = Value::array([Value::blob(Bytes::from_static(b"abc"), "text/plain"), file]);

        let packed = pack(&value, &platform.reducers(), true).await.unwrap();
        assert!(packed.tail.is_none());
        let decoded = through_wire(packed).await;
        assert!(decoded.deep_eq(&value));
        assert_eq!(decoded.index(1).type_name(), "File");
    }

    #[tokio::test]
    async fn tail_survives_arbitrary_chunking() {
        let platform = platform();
        let value = Value::object([(
            "body",
            Value::stream(BodyStream::new(body::chunks(vec![
                Bytes::from_static(b"ta"),
                Bytes::from_static(b"il"),
            ]))),
        )]);
        let packed = pack(&value, &platform.reducers(), true).await.unwrap();
        let mut headers = HeaderMap::new();
        packed.write_headers(&mut headers);
        let whole = packed.into_body().collect().await.unwrap();

        for offset in 0..=whole.len() {
            let (a, b) = whole.split_at(offset);
            let body = WireBody::Streaming(body::chunks(vec![
                Bytes::copy_from_slice(a),
                Bytes::copy_from_slice(b),
            ]));
            let decoded = unpack(&headers, body, &platform.revivers()).await.unwrap();
            let tail = stream_of(&decoded.get("body")).read_all().await.unwrap();
            assert_eq!(&tail[..], b"tail", "offset {offset}");
        }
    }

    #[tokio::test]
    async fn truncated_body_fails() {
        let mut headers = HeaderMap::new();
        headers.insert(BUFFER_SIZE_HEADER, HeaderValue::from(50usize));
        let body = WireBody::Full(Bytes::from_static(b"[1]"));
        let err = unpack(&headers, body, &[]).await.unwrap_err();
        assert!(matches!(
            err,
            EnvelopeError::TruncatedPrefix {
                expected: 50,
                received: 3
            }
        ));
    }

    #[tokio::test]
    async fn huge_declared_size_fails_without_allocating() {
        let mut headers = HeaderMap::new();
        headers.insert(BUFFER_SIZE_HEADER, HeaderValue::from_static("100000000000000000"));
        let body = WireBody::Full(Bytes::from_static(b"[1]"));
        let err = unpack(&headers, body, &[]).await.unwrap_err();
        assert!(matches!(
            err,
            EnvelopeError::TruncatedPrefix {
                expected: 100_000_000_000_000_000,
                received: 3
            }
        ));
    }

    #[tokio::test]
    async fn missing_size_means_whole_body_is_text() {
        let body = WireBody::Full(Bytes::from_static(br#"[{"a":1},2]"#));
        let decoded = unpack(&HeaderMap::new(), body, &[]).await.unwrap();
        assert_eq!(decoded.get("a").as_f64(), Some(2.0));
    }
}
