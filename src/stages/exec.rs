use std::{path::PathBuf, process::Stdio};

use futures::{future::BoxFuture, stream, FutureExt, StreamExt};
use minijinja::{context, Environment};
use tokio::{
    io::AsyncWriteExt,
    process::{Child, Command},
};
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::{
    error::{Error, Result},
    reader::ManagedReader,
    stage::Stage,
    stages::LineReader,
    StageWriter,
};

/// Environment and working directory commands of a pipe run with
#[derive(Debug, Clone, Default)]
pub(crate) struct CommandSettings {
    /// When set, the command sees exactly these variables
    pub(crate) env: Option<Vec<(String, String)>>,
    pub(crate) dir: Option<PathBuf>,
}

impl CommandSettings {
    fn spawn(&self, args: &[String], stdin: Stdio) -> Result<Child> {
        let (program, rest) = args.split_first().ok_or(Error::EmptyCommand)?;

        let mut command = Command::new(program);
        command
            .args(rest)
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(env) = &self.env {
            command.env_clear().envs(env.iter().map(|(k, v)| (k, v)));
        }

        if let Some(dir) = &self.dir {
            command.current_dir(dir);
        }

        let child = command.spawn()?;
        debug!(program = %program, args = ?rest, "command spawned");

        Ok(child)
    }
}

/// Splits a command line with shell quoting rules
pub(crate) fn split_command(command_line: &str) -> Result<Vec<String>> {
    let args = shell_words::split(command_line).map_err(|_| Error::UnbalancedQuotes {
        command: command_line.to_string(),
    })?;

    if args.is_empty() {
        return Err(Error::EmptyCommand);
    }

    Ok(args)
}

/// Feeds `input` (if any) to the child's stdin and copies its stdout and stderr, interleaved, into
/// `output`. Resolves once the child has exited.
async fn drive(
    mut child: Child,
    input: Option<ManagedReader>,
    output: &mut StageWriter,
) -> Result<()> {
    if let (Some(mut stdin), Some(mut input)) = (child.stdin.take(), input) {
        // the child may exit without reading all of its input, so copy errors are not interesting
        tokio::spawn(async move {
            let _ = tokio::io::copy(&mut input, &mut stdin).await;
        });
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::msg("child stdout was not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::msg("child stderr was not captured"))?;

    let mut merged = stream::select(ReaderStream::new(stdout), ReaderStream::new(stderr));
    while let Some(chunk) = merged.next().await {
        output.write_all(&chunk?).await?;
    }

    let status = child.wait().await?;
    debug!(status = %status, "command exited");

    if status.success() {
        return Ok(());
    }

    match status.code() {
        Some(code) => Err(Error::ExitStatus(code)),
        None => Err(Error::Terminated(status.to_string())),
    }
}

pub(crate) struct ExecStage {
    pub(crate) args: Vec<String>,
    pub(crate) settings: CommandSettings,
}

impl Stage for ExecStage {
    fn name(&self) -> &'static str {
        "exec"
    }

    fn run(self, input: ManagedReader, mut output: StageWriter) -> BoxFuture<'static, Result<()>> {
        async move {
            let child = match self.settings.spawn(&self.args, Stdio::piped()) {
                Ok(child) => child,
                Err(err) => {
                    let _ = output.write_all(format!("{err}\n").as_bytes()).await;
                    return Err(err);
                }
            };

            drive(child, Some(input), &mut output).await
        }
        .boxed()
    }
}

/// Runs one command per input line, rendered from a template
pub(crate) struct ExecForEachStage {
    env: Environment<'static>,
    template: String,
    settings: CommandSettings,
}

impl ExecForEachStage {
    /// Fails if `template` does not parse
    pub(crate) fn new(template: &str, settings: CommandSettings) -> Result<Self> {
        Environment::new()
            .template_from_str(template)
            .map_err(|e| Error::Template(e.to_string()))?;

        Ok(Self {
            env: Environment::new(),
            template: template.to_string(),
            settings,
        })
    }

    fn command_for(&self, line: &str) -> Result<Vec<String>> {
        let rendered = self
            .env
            .render_str(&self.template, context! { line => line })
            .map_err(|e| Error::Template(e.to_string()))?;

        split_command(&rendered)
    }
}

impl Stage for ExecForEachStage {
    fn name(&self) -> &'static str {
        "exec_for_each"
    }

    fn run(self, input: ManagedReader, mut output: StageWriter) -> BoxFuture<'static, Result<()>> {
        async move {
            let mut lines = LineReader::new(input);
            let mut first_failure = None;

            while let Some(line) = lines.next_line().await? {
                let spawned = self
                    .command_for(&line)
                    .and_then(|args| self.settings.spawn(&args, Stdio::null()));

                let outcome = match spawned {
                    Ok(child) => drive(child, None, &mut output).await,
                    Err(err) => Err(err),
                };

                if let Err(err) = outcome {
                    debug!(line = %line, error = %err, "command failed");
                    output.write_all(format!("{err}\n").as_bytes()).await?;
                    first_failure.get_or_insert(err);
                }
            }

            match first_failure {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
        .boxed()
    }
}
