use futures::{future::BoxFuture, FutureExt};
use tokio::io::AsyncWriteExt;

use crate::{error::Result, reader::ManagedReader, stage::Stage, stages::LineReader, StageWriter};

pub(crate) struct ScanStage<F> {
    pub(crate) scan: F,
}

impl<F> Stage for ScanStage<F>
where
    F: FnMut(&str, &mut String) + Send + 'static,
{
    fn name(&self) -> &'static str {
        "filter_scan"
    }

    fn run(
        mut self,
        input: ManagedReader,
        mut output: StageWriter,
    ) -> BoxFuture<'static, Result<()>> {
        async move {
            let mut lines = LineReader::new(input);
            let mut out = String::new();

            while let Some(line) = lines.next_line().await? {
                out.clear();
                (self.scan)(&line, &mut out);
                if !out.is_empty() {
                    output.write_all(out.as_bytes()).await?;
                }
            }

            Ok(())
        }
        .boxed()
    }
}
