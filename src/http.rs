use std::{
    io,
    pin::Pin,
    sync::{Arc, OnceLock},
    task::{ready, Context, Poll},
};

use futures::{future::BoxFuture, FutureExt, Stream, TryStreamExt};
use parking_lot::Mutex;
use reqwest::{Client, Request, Response};
use tokio::{
    io::{AsyncRead, ReadBuf},
    sync::OnceCell,
};
use tokio_util::io::StreamReader;
use tracing::debug;

use crate::{
    error::{Error, ErrorCell, Result},
    reader::BoxReader,
};

/// Anything that can execute an HTTP request.
///
/// Implemented for [`reqwest::Client`]; implement it to intercept or stub out requests.
pub trait HttpClient: Send + Sync {
    fn execute(
        &self,
        request: Request,
    ) -> BoxFuture<'_, std::result::Result<Response, reqwest::Error>>;
}

impl HttpClient for Client {
    fn execute(
        &self,
        request: Request,
    ) -> BoxFuture<'_, std::result::Result<Response, reqwest::Error>> {
        Client::execute(self, request).boxed()
    }
}

pub(crate) fn default_client() -> Arc<dyn HttpClient> {
    static CLIENT: OnceLock<Arc<dyn HttpClient>> = OnceLock::new();

    CLIENT.get_or_init(|| Arc::new(Client::new())).clone()
}

/// Sends one request, once.
///
/// The request stays configurable until the first call to [`HttpExecutor::execute`]. The outcome is memoized,
/// concurrent first callers wait for the same execution.
pub(crate) struct HttpExecutor {
    request: Mutex<Option<Request>>,
    client: Arc<dyn HttpClient>,
    errors: ErrorCell,
    outcome: OnceCell<Result<()>>,
    body: Mutex<Option<BoxReader>>,
}

impl HttpExecutor {
    pub(crate) fn new(request: Request, client: Arc<dyn HttpClient>, errors: ErrorCell) -> Self {
        Self {
            request: Mutex::new(Some(request)),
            client,
            errors,
            outcome: OnceCell::new(),
            body: Mutex::new(None),
        }
    }

    /// Applies `f` to the request if it has not been sent yet
    pub(crate) fn configure(&self, f: impl FnOnce(&mut Request)) -> bool {
        match self.request.lock().as_mut() {
            Some(request) => {
                f(request);
                true
            }
            None => false,
        }
    }

    pub(crate) async fn execute(&self) -> Result<()> {
        self.outcome
            .get_or_init(|| async {
                let res = self.send().await;
                if let Err(err) = &res {
                    self.errors.record(err.clone());
                }
                res
            })
            .await
            .clone()
    }

    async fn send(&self) -> Result<()> {
        let request = self
            .request
            .lock()
            .take()
            .ok_or_else(|| Error::msg("HTTP request already sent"))?;

        let url = request.url().to_string();
        debug!(method = %request.method(), url = %url, "executing HTTP request");

        let response = self.client.execute(request).await?;
        let status = response.status();
        debug!(url = %url, status = %status, "HTTP response received");

        if !status.is_success() {
            return Err(Error::HttpStatus { status, url });
        }

        let stream = response.bytes_stream().map_err(io::Error::other);
        *self.body.lock() = Some(Box::new(StreamReader::new(Box::pin(stream))));

        Ok(())
    }

    fn take_body(&self) -> Option<BoxReader> {
        self.body.lock().take()
    }
}

enum BodyState {
    Idle,
    Executing(BoxFuture<'static, Result<Option<BoxReader>>>),
    Reading(BoxReader),
    Done,
}

/// The reader of an HTTP stage. Executes the request on first read, then streams the response body.
pub(crate) struct HttpBody {
    executor: Arc<HttpExecutor>,
    state: BodyState,
}

impl HttpBody {
    pub(crate) fn new(executor: Arc<HttpExecutor>) -> Self {
        Self {
            executor,
            state: BodyState::Idle,
        }
    }
}

impl AsyncRead for HttpBody {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        loop {
            match &mut this.state {
                BodyState::Idle => {
                    let executor = this.executor.clone();
                    this.state = BodyState::Executing(
                        async move {
                            executor.execute().await?;
                            Ok(executor.take_body())
                        }
                        .boxed(),
                    );
                }
                BodyState::Executing(fut) => match ready!(fut.poll_unpin(cx)) {
                    Ok(Some(body)) => this.state = BodyState::Reading(body),
                    Ok(None) => this.state = BodyState::Done,
                    Err(err) => {
                        this.state = BodyState::Done;
                        return Poll::Ready(Err(err.into()));
                    }
                },
                BodyState::Reading(body) => return Pin::new(body).poll_read(cx, buf),
                BodyState::Done => return Poll::Ready(Ok(())),
            }
        }
    }
}

/// Lets a request body stream be shared with the client. The lock is never taken: the stream is only
/// polled through `&mut`.
pub(crate) struct SyncBody<S>(Mutex<S>);

impl<S> SyncBody<S> {
    pub(crate) fn new(stream: S) -> Self {
        Self(Mutex::new(stream))
    }
}

impl<S: Stream + Unpin> Stream for SyncBody<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(self.get_mut().0.get_mut()).poll_next(cx)
    }
}
