//! Sinks drain a [`Pipe`] into a concrete value.
//!
//! Every sink returns the pipe's error if one is already recorded, without reading anything. Otherwise it
//! reads the output to the end and then returns the pipe's error if a stage recorded one meanwhile.
//! [`Pipe::output`] is the exception: it always reads what is left and hands back the error alongside.
use std::path::Path;

use tokio::{
    fs::{File, OpenOptions},
    io::{AsyncReadExt, AsyncWriteExt},
};

use crate::{
    error::{Error, Result},
    stages::LineReader,
    Pipe,
};

impl Pipe {
    fn check(&self) -> Result<()> {
        match self.error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn finish<T>(&mut self, res: Result<T>) -> Result<T> {
        self.reader.close();

        match res {
            Ok(value) => self.check().map(|_| value),
            Err(err) => Err(self.errors.record(err)),
        }
    }

    /// Reads the whole output
    pub async fn bytes(&mut self) -> Result<Vec<u8>> {
        self.check()?;

        let mut buf = Vec::new();
        let res = self.reader.read_to_end(&mut buf).await;
        self.finish(res.map(|_| buf).map_err(Error::from))
    }

    /// Reads the whole output as text. Invalid UTF-8 is replaced.
    pub async fn string(&mut self) -> Result<String> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Reads what is left of the output, even if the pipe holds an error, and returns it together
    /// with the error.
    ///
    /// Useful for the diagnostics of a failed command:
    /// ```rust,no_run
    /// # tokio::runtime::Runtime::new().unwrap().block_on(async {
    /// let (out, err) = pipewright::exec("make test").output().await;
    /// if let Some(err) = err {
    ///     eprintln!("{err}:\n{out}");
    /// }
    /// # });
    /// ```
    pub async fn output(&mut self) -> (String, Option<Error>) {
        let mut buf = Vec::new();
        if let Err(err) = self.reader.read_to_end(&mut buf).await {
            self.errors.record(err.into());
        }
        self.reader.close();

        (String::from_utf8_lossy(&buf).into_owned(), self.error())
    }

    /// Counts the lines of the output. A last line without terminator counts too.
    pub async fn count_lines(&mut self) -> Result<usize> {
        self.check()?;

        let mut lines = LineReader::new(&mut self.reader);
        let mut count = 0;
        let res = loop {
            match lines.next_line().await {
                Ok(Some(_)) => count += 1,
                Ok(None) => break Ok(count),
                Err(err) => break Err(Error::from(err)),
            }
        };

        self.finish(res)
    }

    /// Every line of the output, without terminators
    pub async fn slice(&mut self) -> Result<Vec<String>> {
        self.check()?;

        let mut lines = LineReader::new(&mut self.reader);
        let mut out = Vec::new();
        let res = loop {
            match lines.next_line().await {
                Ok(Some(line)) => out.push(line),
                Ok(None) => break Ok(out),
                Err(err) => break Err(Error::from(err)),
            }
        };

        self.finish(res)
    }

    /// Copies the output to the pipe's standard output (see [`Pipe::with_stdout`]). Returns the number
    /// of bytes written.
    pub async fn stdout(&mut self) -> Result<u64> {
        self.check()?;

        let res = async {
            let written = tokio::io::copy(&mut self.reader, &mut self.stdout).await?;
            self.stdout.flush().await?;
            Ok::<_, Error>(written)
        }
        .await;

        self.finish(res)
    }

    /// Writes the output to `path`, replacing its contents. Returns the number of bytes written.
    pub async fn write_file(&mut self, path: impl AsRef<Path>) -> Result<u64> {
        self.check()?;

        let path = path.as_ref();
        let res = match File::create(path).await {
            Ok(file) => self.copy_into(file).await,
            Err(err) => Err(Error::open(path, err)),
        };

        self.finish(res)
    }

    /// Appends the output to `path`, creating it if needed. Returns the number of bytes written.
    pub async fn append_file(&mut self, path: impl AsRef<Path>) -> Result<u64> {
        self.check()?;

        let path = path.as_ref();
        let opened = OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .await;
        let res = match opened {
            Ok(file) => self.copy_into(file).await,
            Err(err) => Err(Error::open(path, err)),
        };

        self.finish(res)
    }

    async fn copy_into(&mut self, mut file: File) -> Result<u64> {
        let written = tokio::io::copy(&mut self.reader, &mut file).await?;
        file.flush().await?;
        Ok(written)
    }

    /// Reads the output to the end, discarding it, and returns the pipe's error
    pub async fn wait(&mut self) -> Result<()> {
        self.check()?;

        let res = tokio::io::copy(&mut self.reader, &mut tokio::io::sink()).await;
        self.finish(res.map(|_| ()).map_err(Error::from))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[tokio::test]
    async fn count_lines_works() {
        assert_eq!(Pipe::new().echo("").count_lines().await.unwrap(), 0);
        assert_eq!(Pipe::new().echo("a\nb\nc\n").count_lines().await.unwrap(), 3);
        assert_eq!(Pipe::new().echo("a\nb").count_lines().await.unwrap(), 2);
        assert_eq!(Pipe::new().echo("\n").count_lines().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn slice_edge_cases() {
        assert!(Pipe::new().echo("").slice().await.unwrap().is_empty());
        assert_eq!(Pipe::new().echo("\n").slice().await.unwrap(), vec![""]);
        assert_eq!(
            Pipe::new().echo("a\r\nb\n").slice().await.unwrap(),
            vec!["a", "b"]
        );
    }

    #[tokio::test]
    async fn sinks_consume_the_output() {
        let mut pipe = Pipe::new().echo("once\n");

        assert_eq!(pipe.string().await.unwrap(), "once\n");
        assert_eq!(pipe.string().await.unwrap(), "");
        assert!(pipe.reader.is_closed());
    }

    #[tokio::test]
    async fn stage_error_surfaces_after_output() {
        let mut pipe = Pipe::new().echo("x").filter(|_input, _output| async move {
            Err(Error::msg("late failure"))
        });

        assert_eq!(
            pipe.count_lines().await.unwrap_err().to_string(),
            "late failure"
        );
        assert_eq!(
            pipe.slice().await.unwrap_err().to_string(),
            "late failure"
        );
    }

    #[tokio::test]
    async fn output_returns_data_and_error() {
        let mut pipe = Pipe::new().echo("kept").with_error(Error::msg("failed"));

        let (out, err) = pipe.output().await;
        assert_eq!(out, "kept");
        assert_eq!(err.unwrap().to_string(), "failed");
    }

    #[tokio::test]
    async fn stdout_writes_to_configured_writer() {
        let (writer, mut reader) = tokio::io::duplex(1024);
        let mut pipe = Pipe::new().with_stdout(writer).echo("to stdout\n");

        assert_eq!(pipe.stdout().await.unwrap(), 10);
        drop(pipe);

        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "to stdout\n");
    }

    #[tokio::test]
    async fn write_and_append_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");

        assert_eq!(Pipe::new().echo("one\n").write_file(&path).await.unwrap(), 4);
        assert_eq!(Pipe::new().echo("two\n").append_file(&path).await.unwrap(), 4);
        assert_eq!(fs::read_to_string(&path).unwrap(), "one\ntwo\n");

        Pipe::new().echo("new\n").write_file(&path).await.unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "new\n");
    }

    #[tokio::test]
    async fn write_file_reports_unopenable_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("out.txt");

        let err = Pipe::new().echo("x").write_file(&path).await.unwrap_err();
        assert!(matches!(err, Error::Open { .. }));
    }

    #[tokio::test]
    async fn errored_pipe_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");

        let res = Pipe::new()
            .echo("x")
            .with_error(Error::msg("nope"))
            .write_file(&path)
            .await;

        assert!(res.is_err());
        assert!(!path.exists());
    }
}
