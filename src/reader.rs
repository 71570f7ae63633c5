use std::{
    fmt, io,
    pin::Pin,
    task::{ready, Context, Poll},
};

use tokio::io::{AsyncRead, ReadBuf};
use tracing::trace;

/// The boxed reader type every stage reads from.
pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;

/// A reader that closes (drops) its underlying resource as soon as it reports end-of-stream.
///
/// An unset reader behaves as an empty stream. Closing is idempotent: once the inner reader is gone,
/// reads keep returning end-of-stream and nothing is dropped twice.
#[derive(Default)]
pub struct ManagedReader {
    inner: Option<BoxReader>,
}

impl ManagedReader {
    pub fn new(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            inner: Some(Box::new(reader)),
        }
    }

    /// A reader that is already at end-of-stream
    pub fn empty() -> Self {
        Self::default()
    }

    /// Drops the underlying resource. Does nothing if it is already closed or was never set.
    pub fn close(&mut self) {
        if self.inner.take().is_some() {
            trace!("managed reader closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }
}

impl From<BoxReader> for ManagedReader {
    fn from(reader: BoxReader) -> Self {
        Self {
            inner: Some(reader),
        }
    }
}

impl fmt::Debug for ManagedReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedReader")
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl AsyncRead for ManagedReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(Ok(()));
        };

        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        let before = buf.filled().len();
        ready!(Pin::new(inner).poll_read(cx, buf))?;

        if buf.filled().len() == before {
            this.close();
        }

        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use tokio::io::AsyncReadExt;

    use super::*;
    use crate::test_utils::DropCounter;

    #[tokio::test]
    async fn closes_once_at_end_of_stream() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut reader = ManagedReader::new(DropCounter::new(&b"hello"[..], drops.clone()));

        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();

        assert_eq!(out, "hello");
        assert!(reader.is_closed());
        assert_eq!(drops.load(Ordering::SeqCst), 1);

        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).await.unwrap(), 0);
        reader.close();
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stays_open_until_fully_consumed() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut reader = ManagedReader::new(DropCounter::new(&b"hello"[..], drops.clone()));

        let mut buf = [0u8; 2];
        reader.read_exact(&mut buf).await.unwrap();

        assert_eq!(&buf, b"he");
        assert!(!reader.is_closed());
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        reader.close();
        reader.close();
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unset_reader_is_empty() {
        let mut reader = ManagedReader::empty();
        let mut out = Vec::new();

        assert_eq!(reader.read_to_end(&mut out).await.unwrap(), 0);
        assert!(out.is_empty());
        reader.close();
        assert!(reader.is_closed());
    }
}
