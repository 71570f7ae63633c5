use std::{
    fmt,
    future::Future,
    io::{self, Cursor},
    mem,
    path::PathBuf,
    pin::Pin,
    sync::{Arc, OnceLock},
    task::{Context, Poll},
};

use regex::Regex;
use reqwest::{
    header::{HeaderName, HeaderValue},
    Body, Method, Request, Url,
};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_util::io::ReaderStream;
use tracing::warn;

use crate::{
    error::{Error, ErrorCell, Result},
    http::{default_client, HttpBody, HttpClient, HttpExecutor, SyncBody},
    reader::ManagedReader,
    stage::{self, FnStage, Stage},
    stages::{
        concat::ConcatStage,
        exec::{split_command, CommandSettings, ExecForEachStage, ExecStage},
        first::FirstStage,
        freq::FreqStage,
        join::JoinStage,
        last::LastStage,
        lines::ScanStage,
        query::{JsonPointer, QueryStage},
    },
    StageWriter,
};

/// A `Pipe` is a stream of bytes plus a sticky error.
///
/// A pipe is created by a source (see [`echo`](crate::echo), [`file`](crate::file), [`exec`](crate::exec), ...),
/// transformed by filters, and drained by a sink. Filters consume the pipe and return it with a new reader;
/// most of them run as a concurrent [`Stage`] that produces output only as fast as it is read.
///
/// Errors are deferred: once any step fails, the error is recorded on the pipe, every later filter is a no-op,
/// and every sink returns the same error.
///
/// # Example
/// ```rust
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let top = pipewright::echo("b\na\nb\nc\nb\na\n")
///     .freq()
///     .first(2)
///     .string()
///     .await
///     .unwrap();
///
/// assert_eq!(top, "3 b\n2 a\n");
/// # });
/// ```
///
/// ## Runtime
/// Stages are spawned on the ambient tokio runtime. Building a stage outside of a runtime records an
/// [`Error::Runtime`] on the pipe instead of panicking.
///
/// ## Abandoned pipes
/// Dropping a pipe drops its reader, and the stage feeding it stops at its next write. A pipe that is kept
/// alive but never read leaves that stage parked until the pipe is dropped.
pub struct Pipe {
    pub(crate) reader: ManagedReader,
    pub(crate) errors: ErrorCell,
    pub(crate) stdout: Box<dyn AsyncWrite + Send + Unpin>,
    http_client: Option<Arc<dyn HttpClient>>,
    pending_request: Option<Arc<HttpExecutor>>,
    command: CommandSettings,
}

impl Default for Pipe {
    fn default() -> Self {
        Self {
            reader: ManagedReader::empty(),
            errors: ErrorCell::default(),
            stdout: Box::new(tokio::io::stdout()),
            http_client: None,
            pending_request: None,
            command: CommandSettings::default(),
        }
    }
}

impl fmt::Debug for Pipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipe")
            .field("reader", &self.reader)
            .field("error", &self.errors.get())
            .field("command", &self.command)
            .finish_non_exhaustive()
    }
}

impl Pipe {
    /// An empty pipe with no error
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the pipe's reader. The previous reader is dropped without being drained.
    pub fn with_reader(self, reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        self.with_managed_reader(ManagedReader::new(reader))
    }

    pub(crate) fn with_managed_reader(mut self, reader: ManagedReader) -> Self {
        self.reader = reader;
        self.pending_request = None;
        self
    }

    /// Sets where [`Pipe::stdout`] writes to. Defaults to the process standard output.
    pub fn with_stdout(mut self, stdout: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        self.stdout = Box::new(stdout);
        self
    }

    /// Sets the client HTTP stages send their requests with. Defaults to a shared [`reqwest::Client`].
    pub fn with_http_client(mut self, client: impl HttpClient + 'static) -> Self {
        self.http_client = Some(Arc::new(client));
        self
    }

    /// Runs subsequent commands with exactly these environment variables
    pub fn with_env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.command.env = Some(
            vars.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// Runs subsequent commands in the given working directory
    pub fn at(mut self, dir: impl Into<PathBuf>) -> Self {
        self.command.dir = Some(dir.into());
        self
    }

    /// Records `err` on the pipe, replacing any previous error
    pub fn with_error(self, err: Error) -> Self {
        self.errors.set(Some(err));
        self
    }

    /// Replaces the pipe's error. `None` clears it, making the remaining output readable again.
    pub fn set_error(&self, err: Option<Error>) {
        self.errors.set(err);
    }

    /// The error currently recorded on the pipe.
    ///
    /// Stages record their errors when they finish, so this is only final once the output has been drained.
    ///
    /// This call never sends a pending HTTP request, so right after [`Pipe::get`] and friends it returns
    /// `None` even for a URL that will fail. Use [`Pipe::resolve`] to send the request and get its error
    /// without reading the body.
    pub fn error(&self) -> Option<Error> {
        self.errors.get()
    }

    /// Executes a pending HTTP request, if any, and returns the pipe's error.
    ///
    /// The request is sent at most once no matter how often the pipe is resolved or read.
    pub async fn resolve(&self) -> Result<()> {
        if let Some(executor) = &self.pending_request {
            executor.execute().await?;
        }

        match self.error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// The exit code parsed from the first `exit status <code>` found in the error text, wherever it
    /// appears.
    ///
    /// Returns 0 both when there is no error and when the error mentions no exit status.
    pub fn exit_status(&self) -> i32 {
        static EXIT_STATUS: OnceLock<Option<Regex>> = OnceLock::new();

        let Some(err) = self.error() else {
            return 0;
        };
        let Some(re) = EXIT_STATUS
            .get_or_init(|| Regex::new(r"exit status (\d+)").ok())
            .as_ref()
        else {
            return 0;
        };

        let text = err.to_string();
        re.captures(&text)
            .and_then(|caps| caps[1].parse().ok())
            .unwrap_or(0)
    }

    /// Closes the pipe's reader without draining it
    pub fn close(&mut self) {
        self.reader.close();
    }

    /// Attaches a [`Stage`] to the pipe. The stage reads the current output and its own output becomes
    /// the pipe's output.
    ///
    /// Does nothing if the pipe already holds an error.
    pub fn stage<S: Stage>(mut self, stage: S) -> Self {
        if self.error().is_some() {
            return self;
        }

        let input = mem::take(&mut self.reader);
        match stage::spawn(stage, input, self.errors.clone()) {
            Ok(reader) => self.with_managed_reader(reader),
            Err(err) => self.with_error(err),
        }
    }

    /// Runs `transform` concurrently over the pipe's output.
    ///
    /// The transform receives the current reader and a writer; whatever it writes becomes the new output.
    /// Returning an error records it on the pipe.
    ///
    /// # Example
    /// ```rust
    /// use tokio::io::AsyncReadExt;
    /// use tokio::io::AsyncWriteExt;
    ///
    /// # tokio::runtime::Runtime::new().unwrap().block_on(async {
    /// let out = pipewright::echo("hello")
    ///     .filter(|mut input, mut output| async move {
    ///         let mut text = String::new();
    ///         input.read_to_string(&mut text).await?;
    ///         output.write_all(text.chars().rev().collect::<String>().as_bytes()).await?;
    ///         Ok::<(), pipewright::Error>(())
    ///     })
    ///     .string()
    ///     .await
    ///     .unwrap();
    ///
    /// assert_eq!(out, "olleh");
    /// # });
    /// ```
    pub fn filter<F, Fut>(self, transform: F) -> Self
    where
        F: FnOnce(ManagedReader, StageWriter) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.stage(FnStage(transform))
    }

    /// Calls `scan` with every line of the output (without its terminator). Whatever `scan` appends to
    /// the buffer is written out.
    ///
    /// # Example
    /// ```rust
    /// # tokio::runtime::Runtime::new().unwrap().block_on(async {
    /// let out = pipewright::echo("a\nb\n")
    ///     .filter_scan(|line, out| {
    ///         out.push_str(line);
    ///         out.push_str(line);
    ///         out.push('\n');
    ///     })
    ///     .string()
    ///     .await
    ///     .unwrap();
    ///
    /// assert_eq!(out, "aa\nbb\n");
    /// # });
    /// ```
    pub fn filter_scan<F>(self, scan: F) -> Self
    where
        F: FnMut(&str, &mut String) + Send + 'static,
    {
        self.stage(ScanStage { scan })
    }

    /// Replaces every line with the result of `map_fn`
    pub fn filter_line<F>(self, mut map_fn: F) -> Self
    where
        F: FnMut(&str) -> String + Send + 'static,
    {
        self.filter_scan(move |line, out| {
            out.push_str(&map_fn(line));
            out.push('\n');
        })
    }

    /// Keeps only the lines for which `predicate` holds
    pub fn retain_lines<F>(self, mut predicate: F) -> Self
    where
        F: FnMut(&str) -> bool + Send + 'static,
    {
        self.filter_scan(move |line, out| {
            if predicate(line) {
                out.push_str(line);
                out.push('\n');
            }
        })
    }

    /// Keeps only the lines containing `needle`
    pub fn match_text(self, needle: impl Into<String>) -> Self {
        let needle = needle.into();
        self.retain_lines(move |line| line.contains(needle.as_str()))
    }

    /// Drops the lines containing `needle`
    pub fn reject_text(self, needle: impl Into<String>) -> Self {
        let needle = needle.into();
        self.retain_lines(move |line| !line.contains(needle.as_str()))
    }

    /// Keeps only the lines matching `re`
    pub fn match_regex(self, re: Regex) -> Self {
        self.retain_lines(move |line| re.is_match(line))
    }

    /// Drops the lines matching `re`
    pub fn reject_regex(self, re: Regex) -> Self {
        self.retain_lines(move |line| !re.is_match(line))
    }

    /// Keeps the first `n` lines. Reading stops after them, so the input is never read further than needed.
    pub fn first(self, n: usize) -> Self {
        if self.error().is_some() {
            return self;
        }

        if n == 0 {
            return self.with_managed_reader(ManagedReader::empty());
        }

        self.stage(FirstStage { n })
    }

    /// Keeps the last `n` lines
    pub fn last(self, n: usize) -> Self {
        if self.error().is_some() {
            return self;
        }

        if n == 0 {
            return self.with_managed_reader(ManagedReader::empty());
        }

        self.stage(LastStage { n })
    }

    /// Counts identical lines. The output has one line per distinct input line, most frequent first,
    /// ties in lexical order, each prefixed with its right-aligned count.
    pub fn freq(self) -> Self {
        self.stage(FreqStage)
    }

    /// Joins all lines with single spaces into one newline-terminated line
    pub fn join(self) -> Self {
        self.stage(JoinStage)
    }

    /// Treats every line as a file path and outputs the concatenated contents of the files.
    /// Files that cannot be read are skipped.
    pub fn concat(self) -> Self {
        self.stage(ConcatStage)
    }

    /// Replaces the output with `text`
    pub fn echo(self, text: impl Into<String>) -> Self {
        if self.error().is_some() {
            return self;
        }

        self.with_reader(Cursor::new(text.into().into_bytes()))
    }

    /// Applies a path to each JSON value of the output, writing one compact JSON result per line.
    ///
    /// The path is a JSON Pointer (`/a/0/b`) or its jq-style spelling (`.a[0].b`). A missing path yields
    /// `null`; `""` or `"."` selects the whole value. Filters beyond plain paths are not supported.
    pub fn query(self, query: &str) -> Self {
        if self.error().is_some() {
            return self;
        }

        match JsonPointer::parse(query) {
            Ok(pointer) => self.stage(QueryStage { pointer }),
            Err(err) => self.with_error(err),
        }
    }

    /// Runs `command_line` with the output as its standard input. Its combined stdout and stderr become
    /// the new output.
    ///
    /// A non-zero exit records an `exit status <code>` error, see [`Pipe::exit_status`].
    pub fn exec(self, command_line: &str) -> Self {
        if self.error().is_some() {
            return self;
        }

        match split_command(command_line) {
            Ok(args) => {
                let settings = self.command.clone();
                self.stage(ExecStage { args, settings })
            }
            Err(err) => self.with_error(err),
        }
    }

    /// Runs a command for every line of the output. `template` is rendered with the line bound to `line`,
    /// e.g. `echo {{ line }}`.
    ///
    /// A failing line appends its error text to the output and processing continues; the first failure
    /// is recorded on the pipe once all lines are done.
    pub fn exec_for_each(self, template: &str) -> Self {
        if self.error().is_some() {
            return self;
        }

        match ExecForEachStage::new(template, self.command.clone()) {
            Ok(stage) => self.stage(stage),
            Err(err) => self.with_error(err),
        }
    }

    /// Sends a GET request to `url`. The request is sent lazily, on first read or [`Pipe::resolve`].
    pub fn get(self, url: &str) -> Self {
        self.http(Method::GET, url)
    }

    /// Sends a POST request to `url` with the pipe's output as the body
    pub fn post(self, url: &str) -> Self {
        self.http(Method::POST, url)
    }

    /// Sends a `method` request to `url`. For methods other than GET and HEAD the pipe's output is sent
    /// as the request body.
    pub fn http(self, method: Method, url: &str) -> Self {
        if self.error().is_some() {
            return self;
        }

        match Url::parse(url) {
            Ok(parsed) => self.send(Request::new(method, parsed)),
            Err(e) => self.with_error(Error::InvalidUrl {
                url: url.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// Sends a prebuilt request. If it has no body and is not a GET or HEAD, the pipe's output is
    /// streamed as its body. The response body becomes the new output.
    pub fn send(mut self, mut request: Request) -> Self {
        if self.error().is_some() {
            return self;
        }

        let input = mem::take(&mut self.reader);
        let method = request.method().clone();
        if method != Method::GET && method != Method::HEAD && request.body().is_none() {
            let body = SyncBody::new(ReaderStream::new(input));
            *request.body_mut() = Some(Body::wrap_stream(body));
        }

        let client = self.http_client.clone().unwrap_or_else(default_client);
        let executor = Arc::new(HttpExecutor::new(request, client, self.errors.clone()));

        let mut pipe = self.with_managed_reader(ManagedReader::new(HttpBody::new(executor.clone())));
        pipe.pending_request = Some(executor);
        pipe
    }

    /// Adds a header to the pending HTTP request.
    ///
    /// Does nothing if the pipe already holds an error.
    pub fn with_header(self, name: &str, value: &str) -> Self {
        if self.error().is_some() {
            return self;
        }

        let parsed = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| e.to_string())
            .and_then(|name| {
                HeaderValue::from_str(value)
                    .map(|value| (name, value))
                    .map_err(|e| e.to_string())
            });

        match parsed {
            Ok((name, value)) => self.configure_request("with_header", |request| {
                request.headers_mut().insert(name, value);
            }),
            Err(reason) => self.with_error(Error::Header(reason)),
        }
    }

    /// Changes the method of the pending HTTP request
    pub fn with_method(self, method: Method) -> Self {
        self.configure_request("with_method", |request| {
            *request.method_mut() = method;
        })
    }

    fn configure_request(self, operation: &'static str, f: impl FnOnce(&mut Request)) -> Self {
        let configured = self
            .pending_request
            .as_ref()
            .is_some_and(|executor| executor.configure(f));

        if !configured {
            warn!(operation, "no pending HTTP request to configure");
        }

        self
    }
}

impl AsyncRead for Pipe {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if let Some(err) = this.errors.get() {
            return Poll::Ready(Err(err.into()));
        }

        Pin::new(&mut this.reader).poll_read(cx, buf)
    }
}
