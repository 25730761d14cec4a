//! Splitting a body into its declared-length prefix and the rest.

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tokio_util::codec::{Decoder, FramedParts, FramedRead};
use tokio_util::io::StreamReader;

use super::EnvelopeError;
use crate::body::{self, ByteStream};

/// Most the decoder reserves ahead of the bytes actually received. The
/// declared length comes from the peer.
const MAX_RESERVE: usize = 8 * 1024;

/// Decoder yielding exactly one frame: the first `len` bytes.
pub struct PrefixCodec {
    len: usize,
}

impl PrefixCodec {
    pub fn new(len: usize) -> Self {
        Self { len }
    }
}

impl Decoder for PrefixCodec {
    type Item = Bytes;
    type Error = EnvelopeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < self.len {
            src.reserve((self.len - src.len()).min(MAX_RESERVE));
            return Ok(None);
        }
        Ok(Some(src.split_to(self.len).freeze()))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(prefix) => Ok(Some(prefix)),
            None => Err(EnvelopeError::TruncatedPrefix {
                expected: self.len,
                received: src.len(),
            }),
        }
    }
}

/// Read exactly `len` bytes off `stream`. Whatever was read past the prefix
/// is put back in front of the returned remainder, so the split is the same
/// however the source was chunked.
pub async fn read_prefix(stream: ByteStream, len: usize) -> Result<(Bytes, ByteStream), EnvelopeError> {
    if len == 0 {
        return Ok((Bytes::new(), stream));
    }

    let mut framed = FramedRead::new(StreamReader::new(stream), PrefixCodec::new(len));
    let prefix = match framed.next().await {
        Some(prefix) => prefix?,
        None => {
            return Err(EnvelopeError::TruncatedPrefix {
                expected: len,
                received: 0,
            });
        }
    };

    let FramedParts { io, read_buf, .. } = framed.into_parts();
    let (stream, chunk) = io.into_inner_with_chunk();
    let rest = body::prepend(chunk.unwrap_or_default(), stream);
    let rest = body::prepend(read_buf.freeze(), rest);

    tracing::trace!(prefix_bytes = len, "Read envelope prefix");
    Ok((prefix, rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &[u8] = b"[\"prefix\"]tail-bytes";
    const PREFIX_LEN: usize = 10;

    fn split_at(offset: usize) -> ByteStream {
        let (a, b) = BODY.split_at(offset);
        body::chunks(vec![Bytes::from_static(a), Bytes::from_static(b)])
    }

    #[tokio::test]
    async fn split_is_independent_of_chunking() {
        for offset in 0..=BODY.len() {
            let (prefix, rest) = read_prefix(split_at(offset), PREFIX_LEN).await.unwrap();
            assert_eq!(&prefix[..], &BODY[..PREFIX_LEN], "offset {offset}");
            let rest = body::collect(rest).await.unwrap();
            assert_eq!(&rest[..], &BODY[PREFIX_LEN..], "offset {offset}");
        }
    }

    #[tokio::test]
    async fn byte_at_a_time() {
        let stream = body::chunks(BODY.iter().map(|b| Bytes::copy_from_slice(&[*b])).collect::<Vec<_>>());
        let (prefix, rest) = read_prefix(stream, PREFIX_LEN).await.unwrap();
        assert_eq!(&prefix[..], &BODY[..PREFIX_LEN]);
        assert_eq!(&body::collect(rest).await.unwrap()[..], &BODY[PREFIX_LEN..]);
    }

    #[tokio::test]
    async fn truncated_prefix_is_an_error() {
        let stream = body::once(Bytes::from_static(b"short"));
        let err = read_prefix(stream, 8).await.err().unwrap();
        assert_eq!(err.to_string(), "Expected 8 byte prefix, but received 5 byte stream");
    }

    #[tokio::test]
    async fn empty_source_is_truncated() {
        let stream = body::chunks(Vec::new());
        let err = read_prefix(stream, 3).await.err().unwrap();
        assert_eq!(err.to_string(), "Expected 3 byte prefix, but received 0 byte stream");
    }

    #[tokio::test]
    async fn huge_declared_length_is_truncated_not_allocated() {
        let stream = body::once(Bytes::from_static(b"[1]"));
        let err = read_prefix(stream, 100_000_000_000_000_000).await.err().unwrap();
        assert!(matches!(
            err,
            EnvelopeError::TruncatedPrefix {
                expected: 100_000_000_000_000_000,
                received: 3
            }
        ));
    }

    #[test]
    fn reserve_is_bounded() {
        let mut codec = PrefixCodec::new(usize::MAX);
        let mut src = BytesMut::from(&b"abc"[..]);
        assert!(codec.decode(&mut src).unwrap().is_none());
        assert!(src.capacity() <= 3 + MAX_RESERVE + 64);
    }

    #[tokio::test]
    async fn prefix_without_tail() {
        let (prefix, rest) = read_prefix(body::once(Bytes::from_static(b"abc")), 3).await.unwrap();
        assert_eq!(&prefix[..], b"abc");
        assert!(body::collect(rest).await.unwrap().is_empty());
    }
}
