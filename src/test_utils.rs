use std::{
    io::{self, Cursor},
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    task::{Context, Poll},
};

use futures::{future::BoxFuture, FutureExt};
use parking_lot::Mutex;
use reqwest::{Method, Request, Response, StatusCode};
use tokio::io::{AsyncRead, ReadBuf};

use crate::http::HttpClient;

/// Wraps a reader and counts how many times it gets dropped
pub struct DropCounter<R> {
    inner: R,
    drops: Arc<AtomicUsize>,
}

impl<R> DropCounter<R> {
    pub fn new(inner: R, drops: Arc<AtomicUsize>) -> Self {
        Self { inner, drops }
    }
}

impl<R> Drop for DropCounter<R> {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for DropCounter<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

/// Yields the same line forever
pub struct Endless(pub &'static [u8]);

impl AsyncRead for Endless {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let n = self.0.len().min(buf.remaining());
        buf.put_slice(&self.0[..n]);
        Poll::Ready(Ok(()))
    }
}

/// An in-memory source that several readers consume from the same position
#[derive(Clone)]
pub struct SharedCursor(Arc<Mutex<Cursor<Vec<u8>>>>);

impl SharedCursor {
    pub fn new(data: Vec<u8>) -> Self {
        Self(Arc::new(Mutex::new(Cursor::new(data))))
    }

    /// Bytes no reader has consumed yet
    pub fn remaining(&self) -> usize {
        let cursor = self.0.lock();
        cursor.get_ref().len() - cursor.position() as usize
    }
}

impl AsyncRead for SharedCursor {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut cursor = self.0.lock();
        Pin::new(&mut *cursor).poll_read(cx, buf)
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub has_body: bool,
}

/// An [`HttpClient`] answering every request with a canned status and body
#[derive(Clone)]
pub struct StubClient {
    status: StatusCode,
    body: &'static str,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl StubClient {
    pub fn new(status: u16, body: &'static str) -> Self {
        Self {
            status: StatusCode::from_u16(status).unwrap(),
            body,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn last_request(&self) -> Option<RecordedRequest> {
        self.requests.lock().last().cloned()
    }
}

impl HttpClient for StubClient {
    fn execute(
        &self,
        request: Request,
    ) -> BoxFuture<'_, Result<Response, reqwest::Error>> {
        self.requests.lock().push(RecordedRequest {
            method: request.method().clone(),
            url: request.url().to_string(),
            headers: request
                .headers()
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
                .collect(),
            has_body: request.body().is_some(),
        });

        let response = http::Response::builder()
            .status(self.status)
            .body(self.body)
            .unwrap();

        async move { Ok(Response::from(response)) }.boxed()
    }
}
