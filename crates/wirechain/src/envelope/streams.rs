//! Reducers and revivers for stream-backed values.
//!
//! Streams are tagged `ReadableStream`. The one chosen as the envelope tail is
//! written as the placeholder `true`; any other stream is written as the
//! buffer holding its bytes. Blobs are always inline as
//! `[buffer, type]` or, for files, `[buffer, type, name, lastModified]`.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use bytes::Bytes;

use crate::body::BodyStream;
use crate::codec::{CodecError, Reduced, Reducer, Reviver};
use crate::value::{Blob, Composite, FileMeta, Node, Value};

pub const READABLE_STREAM_TAG: &str = "ReadableStream";
pub const BLOB_TAG: &str = "Blob";

#[derive(Default)]
struct Discovery {
    tail: Option<BodyStream>,
    pending: Vec<BodyStream>,
}

enum Mode {
    /// First pass: pick the tail and collect streams that need buffering.
    Discover { allow_tail: bool, found: Mutex<Discovery> },
    /// Second pass: substitute buffered bytes for every non-tail stream.
    Substitute {
        tail: Option<BodyStream>,
        buffers: HashMap<usize, Bytes>,
    },
}

pub(super) struct StreamReducer {
    mode: Mode,
}

impl StreamReducer {
    pub(super) fn discover(allow_tail: bool) -> Self {
        Self {
            mode: Mode::Discover {
                allow_tail,
                found: Mutex::new(Discovery::default()),
            },
        }
    }

    /// `buffers` is keyed by stream address; the streams themselves stay
    /// alive in the caller for the duration of the pass.
    pub(super) fn substitute(tail: Option<BodyStream>, buffers: HashMap<usize, Bytes>) -> Self {
        Self {
            mode: Mode::Substitute { tail, buffers },
        }
    }

    /// The tail and the streams still to be buffered, in encounter order.
    pub(super) fn into_discovery(self) -> (Option<BodyStream>, Vec<BodyStream>) {
        match self.mode {
            Mode::Discover { found, .. } => {
                let found = found.into_inner().unwrap_or_else(PoisonError::into_inner);
                (found.tail, found.pending)
            }
            Mode::Substitute { tail, .. } => (tail, Vec::new()),
        }
    }

    fn reduce_stream(&self, stream: &BodyStream) -> Result<Value, CodecError> {
        match &self.mode {
            Mode::Discover { allow_tail, found } => {
                let mut found = found.lock().unwrap_or_else(PoisonError::into_inner);
                let is_tail = found.tail.as_ref().is_some_and(|t| t.ptr_eq(stream));
                if !is_tail {
                    if *allow_tail && found.tail.is_none() {
                        found.tail = Some(stream.clone());
                    } else if !found.pending.iter().any(|p| p.ptr_eq(stream)) {
                        found.pending.push(stream.clone());
                    }
                }
                Ok(Value::Bool(true))
            }
            Mode::Substitute { tail, buffers } => {
                if tail.as_ref().is_some_and(|t| t.ptr_eq(stream)) {
                    return Ok(Value::Bool(true));
                }
                buffers
                    .get(&stream.address())
                    .map(|bytes| Value::array_buffer(bytes.to_vec()))
                    .ok_or_else(|| CodecError::handler(READABLE_STREAM_TAG, "stream was not buffered"))
            }
        }
    }
}

impl Reducer for StreamReducer {
    fn reduce(&self, node: &Node) -> Result<Option<Reduced>, CodecError> {
        let stream = match &*node.read() {
            Composite::Stream(stream) => stream.clone(),
            Composite::Blob(blob) => return Ok(Some(reduce_blob(blob))),
            _ => return Ok(None),
        };
        let payload = self.reduce_stream(&stream)?;
        Ok(Some(Reduced::new(READABLE_STREAM_TAG, payload)))
    }
}

fn reduce_blob(blob: &Blob) -> Reduced {
    let mut payload = vec![
        Value::array_buffer(blob.data.to_vec()),
        Value::from(blob.content_type.as_str()),
    ];
    if let Some(file) = &blob.file {
        payload.push(Value::from(file.name.as_str()));
        payload.push(Value::from(file.last_modified));
    }
    Reduced::new(BLOB_TAG, Value::array(payload))
}

/// Revives stream placeholders against the received tail.
pub(super) struct StreamReviver {
    tail: Option<BodyStream>,
}

impl StreamReviver {
    pub(super) fn new(tail: Option<BodyStream>) -> Self {
        Self { tail }
    }
}

impl Reviver for StreamReviver {
    fn handles(&self, tag: &str) -> bool {
        tag == READABLE_STREAM_TAG || tag == BLOB_TAG
    }

    fn revive(&self, tag: &str, payload: Value) -> Result<Value, CodecError> {
        if tag == BLOB_TAG {
            return revive_blob(&payload);
        }
        if payload.as_bool() == Some(true) {
            return self
                .tail
                .clone()
                .map(Value::stream)
                .ok_or_else(|| CodecError::handler(READABLE_STREAM_TAG, "placeholder without a tail"));
        }
        let bytes = payload
            .bytes()
            .ok_or_else(|| CodecError::handler(READABLE_STREAM_TAG, "expected a buffer"))?;
        Ok(Value::stream(BodyStream::from_bytes(bytes)))
    }
}

fn revive_blob(payload: &Value) -> Result<Value, CodecError> {
    let data = payload
        .index(0)
        .bytes()
        .ok_or_else(|| CodecError::handler(BLOB_TAG, "expected a buffer"))?;
    let content_type = payload.index(1).as_str().unwrap_or_default().to_string();
    let file = match payload.index(2) {
        Value::String(name) => Some(FileMeta {
            name,
            last_modified: payload.index(3).as_f64().unwrap_or_default(),
        }),
        _ => None,
    };
    Ok(Value::node(Composite::Blob(Blob {
        data: Bytes::from(data),
        content_type,
        file,
    })))
}
