use std::collections::HashMap;

use futures::{future::BoxFuture, FutureExt};
use tokio::io::AsyncWriteExt;

use crate::{error::Result, reader::ManagedReader, stage::Stage, stages::LineReader, StageWriter};

pub(crate) struct FreqStage;

impl Stage for FreqStage {
    fn name(&self) -> &'static str {
        "freq"
    }

    fn run(self, input: ManagedReader, mut output: StageWriter) -> BoxFuture<'static, Result<()>> {
        async move {
            let mut lines = LineReader::new(input);
            let mut counts: HashMap<String, usize> = HashMap::new();

            while let Some(line) = lines.next_line().await? {
                *counts.entry(line).or_default() += 1;
            }

            let mut table: Vec<(String, usize)> = counts.into_iter().collect();
            table.sort_by(|(a_line, a_count), (b_line, b_count)| {
                b_count.cmp(a_count).then_with(|| a_line.cmp(b_line))
            });

            let width = table
                .first()
                .map(|(_, count)| count.to_string().len())
                .unwrap_or_default();

            for (line, count) in table {
                output
                    .write_all(format!("{count:>width$} {line}\n").as_bytes())
                    .await?;
            }

            Ok(())
        }
        .boxed()
    }
}
