use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

pub(crate) mod concat;
pub(crate) mod exec;
pub(crate) mod first;
pub(crate) mod freq;
pub(crate) mod join;
pub(crate) mod last;
pub(crate) mod lines;
pub(crate) mod query;

/// How far a [`LineReader`] reads ahead of the line it returns. A stage that stops early leaves
/// everything past this in its source.
pub(crate) const READ_AHEAD: usize = 4096;

/// Splits a reader into lines.
///
/// Lines end with `\n` or `\r\n`; the terminator is not part of the returned line. A final line
/// without terminator is still returned. Invalid UTF-8 is replaced, not rejected.
pub(crate) struct LineReader<R> {
    inner: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub(crate) fn new(reader: R) -> Self {
        Self {
            inner: BufReader::with_capacity(READ_AHEAD, reader),
            buf: Vec::new(),
        }
    }

    pub(crate) async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        self.buf.clear();
        if self.inner.read_until(b'\n', &mut self.buf).await? == 0 {
            return Ok(None);
        }

        if self.buf.ends_with(b"\n") {
            self.buf.pop();
            if self.buf.ends_with(b"\r") {
                self.buf.pop();
            }
        }

        Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(input: &'static [u8]) -> Vec<String> {
        let mut lines = LineReader::new(input);
        let mut out = Vec::new();
        while let Some(line) = lines.next_line().await.unwrap() {
            out.push(line);
        }
        out
    }

    #[tokio::test]
    async fn splits_on_both_terminators() {
        assert_eq!(collect(b"a\r\nb\nc").await, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn keeps_empty_lines() {
        assert_eq!(collect(b"\n\nx\n").await, vec!["", "", "x"]);
        assert!(collect(b"").await.is_empty());
    }

    #[tokio::test]
    async fn invalid_utf8_is_replaced() {
        assert_eq!(collect(b"a\xffb\n").await, vec!["a\u{fffd}b"]);
    }
}
