use std::{
    io,
    pin::Pin,
    task::{ready, Context, Poll},
};

use bytes::Bytes;
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    sync::mpsc::{self, Receiver, Sender},
};
use tokio_util::sync::PollSender;

/// Opens the hand-off between a stage task and the reader of the next stage.
///
/// The channel holds a single chunk: a writer can never run more than one write ahead of its reader.
pub(crate) fn hand_off() -> (Sender<Bytes>, StageReader) {
    let (sender, receiver) = mpsc::channel(1);

    (
        sender,
        StageReader {
            receiver,
            chunk: Bytes::new(),
        },
    )
}

/// The writing half a stage produces its output into.
///
/// Writes wait until the consumer has taken the previous chunk. Once the consumer is gone every write
/// fails with [`io::ErrorKind::BrokenPipe`].
pub struct StageWriter {
    sender: PollSender<Bytes>,
}

impl StageWriter {
    pub(crate) fn new(sender: Sender<Bytes>) -> Self {
        Self {
            sender: PollSender::new(sender),
        }
    }
}

fn consumer_gone() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "stage output reader was dropped")
}

impl AsyncWrite for StageWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let this = self.get_mut();
        ready!(this.sender.poll_reserve(cx)).map_err(|_| consumer_gone())?;
        this.sender
            .send_item(Bytes::copy_from_slice(buf))
            .map_err(|_| consumer_gone())?;

        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().sender.close();
        Poll::Ready(Ok(()))
    }
}

/// The reading half of a stage's output. Reaches end-of-stream once every sender is dropped.
pub(crate) struct StageReader {
    receiver: Receiver<Bytes>,
    chunk: Bytes,
}

impl AsyncRead for StageReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        loop {
            if !this.chunk.is_empty() {
                let n = this.chunk.len().min(buf.remaining());
                buf.put_slice(&this.chunk.split_to(n));
                return Poll::Ready(Ok(()));
            }

            match ready!(this.receiver.poll_recv(cx)) {
                Some(chunk) => this.chunk = chunk,
                None => return Poll::Ready(Ok(())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[tokio::test]
    async fn hand_off_works() {
        let (sender, mut reader) = hand_off();
        let mut writer = StageWriter::new(sender);

        let h = tokio::spawn(async move {
            writer.write_all(b"hello ").await.unwrap();
            writer.write_all(b"world").await.unwrap();
        });

        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        h.await.unwrap();

        assert_eq!(out, "hello world");
    }

    #[tokio::test]
    async fn writer_holds_at_most_one_chunk() {
        let (sender, mut reader) = hand_off();
        let mut writer = StageWriter::new(sender);

        writer.write_all(b"one").await.unwrap();

        let second = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            writer.write_all(b"two"),
        )
        .await;
        assert!(second.is_err());

        let mut buf = [0u8; 3];
        reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"one");
    }

    #[tokio::test]
    async fn small_reads_split_chunks() {
        let (sender, mut reader) = hand_off();
        let mut writer = StageWriter::new(sender);
        writer.write_all(b"abcdef").await.unwrap();
        drop(writer);

        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).await.unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(reader.read(&mut buf).await.unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
        assert_eq!(reader.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn write_fails_once_reader_is_dropped() {
        let (sender, reader) = hand_off();
        let mut writer = StageWriter::new(sender);
        drop(reader);

        let err = writer.write_all(b"lost").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
