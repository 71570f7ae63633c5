use std::{future::Future, panic::AssertUnwindSafe};

use futures::{future::BoxFuture, FutureExt};
use tokio::runtime::Handle;
use tracing::debug;

use crate::{
    channel::{hand_off, StageWriter},
    error::{Error, ErrorCell, Result},
    reader::ManagedReader,
};

/// A `Stage` is a transform that bytes flow through: it reads its input to whatever extent it needs
/// and writes its output into a [`StageWriter`].
///
/// Each stage runs in its own task. Returning an error records it on the pipe.
///
/// ```rust
/// use futures::{future::BoxFuture, FutureExt};
/// use pipewright::{ManagedReader, Stage, StageWriter};
///
/// pub struct Upper;
///
/// impl Stage for Upper {
///     fn run(self, mut input: ManagedReader, mut output: StageWriter) -> BoxFuture<'static, pipewright::Result<()>> {
///         use tokio::io::{AsyncReadExt, AsyncWriteExt};
///
///         async move {
///             let mut text = String::new();
///             input.read_to_string(&mut text).await?;
///             output.write_all(text.to_uppercase().as_bytes()).await?;
///             Ok(())
///         }
///         .boxed()
///     }
/// }
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let out = pipewright::echo("shout").stage(Upper).string().await.unwrap();
/// assert_eq!(out, "SHOUT");
/// # });
/// ```
pub trait Stage: Send + 'static {
    /// Used in log events
    fn name(&self) -> &'static str {
        "filter"
    }

    fn run(self, input: ManagedReader, output: StageWriter) -> BoxFuture<'static, Result<()>>;
}

/// Adapts a closure into a [`Stage`]
pub(crate) struct FnStage<F>(pub(crate) F);

impl<F, Fut> Stage for FnStage<F>
where
    F: FnOnce(ManagedReader, StageWriter) -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn run(self, input: ManagedReader, output: StageWriter) -> BoxFuture<'static, Result<()>> {
        (self.0)(input, output).boxed()
    }
}

/// Spawns `stage` over `input` and returns the reader of its output.
///
/// The task keeps its own sender alive until the stage outcome is recorded, so a consumer can only
/// observe end-of-stream after the error (if any) is visible on `errors`.
pub(crate) fn spawn<S: Stage>(
    stage: S,
    input: ManagedReader,
    errors: ErrorCell,
) -> Result<ManagedReader> {
    let runtime = Handle::try_current().map_err(|e| Error::Runtime(e.to_string()))?;

    let (sender, reader) = hand_off();
    let guard = sender.clone();
    let name = stage.name();

    debug!(stage = name, "spawning stage");

    runtime.spawn(async move {
        let outcome = AssertUnwindSafe(stage.run(input, StageWriter::new(sender)))
            .catch_unwind()
            .await
            .unwrap_or(Err(Error::Panicked(name)));

        if let Err(err) = outcome {
            if guard.is_closed() {
                debug!(stage = name, error = %err, "output reader dropped, discarding stage error");
            } else {
                debug!(stage = name, error = %err, "stage failed");
                errors.record(err);
            }
        }

        drop(guard);
    });

    Ok(ManagedReader::new(reader))
}
