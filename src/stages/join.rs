use futures::{future::BoxFuture, FutureExt};
use tokio::io::AsyncWriteExt;

use crate::{error::Result, reader::ManagedReader, stage::Stage, stages::LineReader, StageWriter};

pub(crate) struct JoinStage;

impl Stage for JoinStage {
    fn name(&self) -> &'static str {
        "join"
    }

    fn run(self, input: ManagedReader, mut output: StageWriter) -> BoxFuture<'static, Result<()>> {
        async move {
            let mut lines = LineReader::new(input);
            let mut first = true;

            while let Some(line) = lines.next_line().await? {
                if !first {
                    output.write_all(b" ").await?;
                }
                output.write_all(line.as_bytes()).await?;
                first = false;
            }

            output.write_all(b"\n").await?;
            Ok(())
        }
        .boxed()
    }
}
