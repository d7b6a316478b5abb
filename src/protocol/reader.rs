//! Incremental exact-byte reader.
//!
//! [`BinaryReader`] accumulates fragments from an `AsyncRead` until a caller
//! asks for at least `n` bytes, distinguishing "not enough data yet" (keep
//! reading) from "source ended" ([`HandshakeError::TruncatedInput`]).

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::protocol::error::HandshakeError;

/// Initial capacity for the internal buffer; large enough for most headers.
const INITIAL_CAPACITY: usize = 256;

/// Buffers bytes from an async source on demand.
///
/// Reads are limited to exactly the number of bytes still missing, so the
/// reader never pulls more from the source than the largest `read_at_least`
/// request made so far.
pub struct BinaryReader<R> {
    inner: R,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> BinaryReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_CAPACITY),
        }
    }

    /// Pull from the source until at least `n` bytes are buffered.
    ///
    /// Returns the whole buffer (which may exceed `n` if an earlier request
    /// was larger). Tolerates arbitrarily small fragments.
    pub async fn read_at_least(&mut self, n: usize) -> Result<&[u8], HandshakeError> {
        while self.buf.len() < n {
            let missing = (n - self.buf.len()) as u64;
            let read = (&mut self.inner)
                .take(missing)
                .read_buf(&mut self.buf)
                .await
                .map_err(|e| HandshakeError::Io(e.to_string()))?;
            if read == 0 {
                return Err(HandshakeError::TruncatedInput {
                    got: self.buf.len(),
                    need: n,
                });
            }
        }
        Ok(&self.buf[..])
    }

    /// Bytes pulled from the source so far.
    pub fn buffered(&self) -> &[u8] {
        &self.buf[..]
    }

    /// Number of bytes consumed from the source.
    pub fn consumed(&self) -> usize {
        self.buf.len()
    }

    /// Returns the buffer and the inner reader.
    pub fn into_parts(self) -> (Bytes, R) {
        (self.buf.freeze(), self.inner)
    }
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use tokio::io::ReadBuf;

    use super::*;

    /// Yields one byte per poll, alternating with `Pending`.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        ready: bool,
    }

    impl Trickle {
        fn new(data: &[u8]) -> Self {
            Self { data: data.to_vec(), pos: 0, ready: false }
        }
    }

    impl AsyncRead for Trickle {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            out: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            if !self.ready {
                self.ready = true;
                cx.waker().wake_by_ref();
                return Poll::Pending;
            }
            self.ready = false;
            if self.pos < self.data.len() && out.remaining() > 0 {
                let byte = self.data[self.pos];
                out.put_slice(&[byte]);
                self.pos += 1;
            }
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn accumulates_small_fragments() {
        let mut reader = BinaryReader::new(Trickle::new(b"abcdefgh"));
        let got = reader.read_at_least(5).await.unwrap();
        assert_eq!(got, b"abcde");

        let got = reader.read_at_least(8).await.unwrap();
        assert_eq!(got, b"abcdefgh");
    }

    #[tokio::test]
    async fn never_reads_past_request() {
        let data: &[u8] = b"0123456789";
        let mut reader = BinaryReader::new(data);
        reader.read_at_least(4).await.unwrap();
        assert_eq!(reader.consumed(), 4);

        let (buf, rest) = reader.into_parts();
        assert_eq!(&buf[..], b"0123");
        assert_eq!(rest, b"456789");
    }

    #[tokio::test]
    async fn smaller_request_returns_existing_buffer() {
        let data: &[u8] = b"0123456789";
        let mut reader = BinaryReader::new(data);
        reader.read_at_least(6).await.unwrap();
        let got = reader.read_at_least(2).await.unwrap();
        assert_eq!(got, b"012345");
    }

    #[tokio::test]
    async fn truncated_reports_progress() {
        let mut reader = BinaryReader::new(Trickle::new(b"abc"));
        let err = reader.read_at_least(10).await.unwrap_err();
        assert_eq!(err, HandshakeError::TruncatedInput { got: 3, need: 10 });
    }

    #[tokio::test]
    async fn empty_source_is_truncated() {
        let data: &[u8] = b"";
        let mut reader = BinaryReader::new(data);
        let err = reader.read_at_least(1).await.unwrap_err();
        assert_eq!(err, HandshakeError::TruncatedInput { got: 0, need: 1 });
    }
}
