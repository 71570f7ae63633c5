use std::collections::VecDeque;

use futures::{future::BoxFuture, FutureExt};
use tokio::io::AsyncWriteExt;

use crate::{error::Result, reader::ManagedReader, stage::Stage, stages::LineReader, StageWriter};

/// Keeps the most recent `n` lines in a ring, writes them once the input ends
pub(crate) struct LastStage {
    pub(crate) n: usize,
}

impl Stage for LastStage {
    fn name(&self) -> &'static str {
        "last"
    }

    fn run(self, input: ManagedReader, mut output: StageWriter) -> BoxFuture<'static, Result<()>> {
        async move {
            let mut lines = LineReader::new(input);
            let mut ring = VecDeque::with_capacity(self.n);

            while let Some(line) = lines.next_line().await? {
                if ring.len() == self.n {
                    ring.pop_front();
                }
                ring.push_back(line);
            }

            for line in ring {
                output.write_all(line.as_bytes()).await?;
                output.write_all(b"\n").await?;
            }

            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use crate::Pipe;

    #[tokio::test]
    async fn last_works() {
        let mut pipe = Pipe::new().echo("a\nb\nc\n").last(2);
        assert_eq!(pipe.string().await.unwrap(), "b\nc\n");
    }

    #[tokio::test]
    async fn last_is_identity_for_short_input() {
        let mut pipe = Pipe::new().echo("a\nb\nc\n").last(3);
        assert_eq!(pipe.string().await.unwrap(), "a\nb\nc\n");

        let mut pipe = Pipe::new().echo("a\nb\nc\n").last(100);
        assert_eq!(pipe.string().await.unwrap(), "a\nb\nc\n");
    }

    #[tokio::test]
    async fn last_zero_is_empty() {
        let mut pipe = Pipe::new().echo("a\nb\nc\n").last(0);
        assert_eq!(pipe.string().await.unwrap(), "");
    }
}
