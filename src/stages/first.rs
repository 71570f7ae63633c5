use futures::{future::BoxFuture, FutureExt};
use tokio::io::AsyncWriteExt;

use crate::{error::Result, reader::ManagedReader, stage::Stage, stages::LineReader, StageWriter};

pub(crate) struct FirstStage {
    pub(crate) n: usize,
}

impl Stage for FirstStage {
    fn name(&self) -> &'static str {
        "first"
    }

    fn run(self, input: ManagedReader, mut output: StageWriter) -> BoxFuture<'static, Result<()>> {
        async move {
            let mut lines = LineReader::new(input);

            for _ in 0..self.n {
                let Some(line) = lines.next_line().await? else {
                    break;
                };
                output.write_all(line.as_bytes()).await?;
                output.write_all(b"\n").await?;
            }

            // the rest of the input is dropped unread
            Ok(())
        }
        .boxed()
    }
}
