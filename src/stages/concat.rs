use futures::{future::BoxFuture, FutureExt};
use tokio::fs::File;
use tracing::debug;

use crate::{error::Result, reader::ManagedReader, stage::Stage, stages::LineReader, StageWriter};

pub(crate) struct ConcatStage;

impl Stage for ConcatStage {
    fn name(&self) -> &'static str {
        "concat"
    }

    fn run(self, input: ManagedReader, mut output: StageWriter) -> BoxFuture<'static, Result<()>> {
        async move {
            let mut lines = LineReader::new(input);

            while let Some(path) = lines.next_line().await? {
                let mut file = match File::open(&path).await {
                    Ok(file) => file,
                    Err(err) => {
                        debug!(path = %path, error = %err, "skipping unreadable file");
                        continue;
                    }
                };

                tokio::io::copy(&mut file, &mut output).await?;
            }

            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use crate::Pipe;

    #[tokio::test]
    async fn concat_skips_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        fs::write(&a, "first\n").unwrap();
        fs::write(&b, "second\n").unwrap();

        let paths = format!(
            "{}\n{}\n{}\n",
            a.display(),
            dir.path().join("missing.txt").display(),
            b.display()
        );

        let mut pipe = Pipe::new().echo(paths).concat();
        assert_eq!(pipe.string().await.unwrap(), "first\nsecond\n");
        assert!(pipe.error().is_none());
    }
}
