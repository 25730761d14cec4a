//! Byte bodies: the streams carried inside values and the bodies of wire messages.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt, TryStreamExt};

/// Unbuffered byte source. Backpressure is whatever the producer implements.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Stream yielding `bytes` as a single chunk.
pub fn once(bytes: Bytes) -> ByteStream {
    Box::pin(futures::stream::once(async move { Ok(bytes) }))
}

/// Stream yielding each chunk in order.
pub fn chunks<I>(chunks: I) -> ByteStream
where
    I: IntoIterator<Item = Bytes>,
    I::IntoIter: Send + 'static,
{
    Box::pin(futures::stream::iter(chunks.into_iter().map(Ok)))
}

/// Drain a stream into one contiguous buffer.
pub async fn collect(stream: ByteStream) -> io::Result<Bytes> {
    let buf = stream
        .try_fold(BytesMut::new(), |mut acc, chunk| async move {
            acc.extend_from_slice(&chunk);
            Ok(acc)
        })
        .await?;
    Ok(buf.freeze())
}

/// Body of one request or response on the wire.
pub enum WireBody {
    Full(Bytes),
    Streaming(ByteStream),
}

impl WireBody {
    pub fn empty() -> Self {
        Self::Full(Bytes::new())
    }

    pub fn into_stream(self) -> ByteStream {
        match self {
            Self::Full(bytes) if bytes.is_empty() => Box::pin(futures::stream::empty()),
            Self::Full(bytes) => once(bytes),
            Self::Streaming(stream) => stream,
        }
    }

    pub async fn collect(self) -> io::Result<Bytes> {
        match self {
            Self::Full(bytes) => Ok(bytes),
            Self::Streaming(stream) => collect(stream).await,
        }
    }
}

impl std::fmt::Debug for WireBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
            Self::Streaming(_) => f.write_str("Streaming"),
        }
    }
}

impl From<Bytes> for WireBody {
    fn from(bytes: Bytes) -> Self {
        Self::Full(bytes)
    }
}

impl From<String> for WireBody {
    fn from(text: String) -> Self {
        Self::Full(Bytes::from(text))
    }
}

/// A readable stream held inside a value graph.
///
/// Streams are single-use: whoever takes the inner stream owns it, and every
/// clone of the handle observes the stream as consumed afterwards.
#[derive(Clone)]
pub struct BodyStream {
    inner: Arc<Mutex<Option<ByteStream>>>,
}

impl BodyStream {
    pub fn new(stream: ByteStream) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(stream))),
        }
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self::new(once(bytes.into()))
    }

    /// Take the stream out, leaving this handle consumed.
    pub fn take(&self) -> Option<ByteStream> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn ptr_eq(&self, other: &BodyStream) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Identity for maps keyed by stream; valid while a clone is alive.
    pub(crate) fn address(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }

    pub fn is_consumed(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Buffer the remaining bytes, consuming the stream.
    pub async fn read_all(&self) -> io::Result<Bytes> {
        match self.take() {
            Some(stream) => collect(stream).await,
            None => Err(io::Error::other("stream already consumed")),
        }
    }
}

impl std::fmt::Debug for BodyStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BodyStream")
            .field("consumed", &self.is_consumed())
            .finish()
    }
}

/// Concatenate a stream behind a leading chunk.
pub fn prepend(head: Bytes, rest: ByteStream) -> ByteStream {
    if head.is_empty() {
        return rest;
    }
    Box::pin(once(head).chain(rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn collect_joins_chunks() {
        let stream = chunks(vec![Bytes::from_static(b"ab"), Bytes::from_static(b"cd")]);
        assert_eq!(collect(stream).await.unwrap(), Bytes::from_static(b"abcd"));
    }

    #[tokio::test]
    async fn body_stream_is_single_use() {
        let body = BodyStream::from_bytes(Bytes::from_static(b"payload"));
        let clone = body.clone();

        assert!(!clone.is_consumed());
        assert_eq!(body.read_all().await.unwrap(), Bytes::from_static(b"payload"));
        assert!(clone.is_consumed());
        assert!(clone.read_all().await.is_err());
    }

    #[tokio::test]
    async fn prepend_keeps_order() {
        let rest = chunks(vec![Bytes::from_static(b"3"), Bytes::from_static(b"4")]);
        let joined = prepend(Bytes::from_static(b"12"), rest);
        assert_eq!(collect(joined).await.unwrap(), Bytes::from_static(b"1234"));
    }

    #[tokio::test]
    async fn empty_full_body_yields_nothing() {
        let stream = WireBody::empty().into_stream();
        assert!(collect(stream).await.unwrap().is_empty());
    }
}
