use std::{io, path::PathBuf, sync::Arc};

use parking_lot::Mutex;
use reqwest::StatusCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Every failure a [`Pipe`](crate::Pipe) can record.
///
/// Errors are sticky: once a pipe holds one, every later sink returns a clone of it.
/// Sources that cannot be cloned are kept behind an [`Arc`].
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("{0}")]
    Io(Arc<io::Error>),

    #[error("open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("invalid glob pattern {pattern:?}: {reason}")]
    Pattern { pattern: String, reason: String },

    #[error("empty command line")]
    EmptyCommand,

    #[error("unbalanced quotes in command line {command:?}")]
    UnbalancedQuotes { command: String },

    /// The exact text `exit status <code>` is relied upon by [`Pipe::exit_status`](crate::Pipe::exit_status).
    #[error("exit status {0}")]
    ExitStatus(i32),

    #[error("{0}")]
    Terminated(String),

    #[error("invalid URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid header: {0}")]
    Header(String),

    #[error("{0}")]
    Network(Arc<reqwest::Error>),

    #[error("unexpected HTTP response status: {status}")]
    HttpStatus { status: StatusCode, url: String },

    #[error("invalid query {query:?}: {reason}")]
    Query { query: String, reason: String },

    #[error("invalid JSON input: {0}")]
    Decode(Arc<serde_json::Error>),

    #[error("template error: {0}")]
    Template(String),

    #[error("no tokio runtime available: {0}")]
    Runtime(String),

    #[error("stage {0} panicked")]
    Panicked(&'static str),

    #[error("{0}")]
    Message(String),
}

impl Error {
    /// An error carrying only the given text.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    pub(crate) fn open(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Open {
            path: path.into(),
            source: Arc::new(source),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        // reading an errored pipe wraps its error in an io::Error; unwrap it again
        if let Some(inner) = err.get_ref().and_then(|e| e.downcast_ref::<Error>()) {
            return inner.clone();
        }

        Self::Io(Arc::new(err))
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(inner) => io::Error::new(inner.kind(), Error::Io(inner)),
            other => io::Error::other(other),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(Arc::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(Arc::new(err))
    }
}

/// The error slot shared by a pipe and every stage task spawned from it.
#[derive(Debug, Clone, Default)]
pub(crate) struct ErrorCell(Arc<Mutex<Option<Error>>>);

impl ErrorCell {
    pub(crate) fn get(&self) -> Option<Error> {
        self.0.lock().clone()
    }

    /// Overwrites the current value, `None` clears it.
    pub(crate) fn set(&self, err: Option<Error>) {
        *self.0.lock() = err;
    }

    /// Stores `err` unless an error is already present. Returns the error the cell now holds.
    pub(crate) fn record(&self, err: Error) -> Error {
        self.0.lock().get_or_insert(err).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_roundtrip_keeps_pipe_error() {
        let io_err: io::Error = Error::ExitStatus(3).into();
        let err = Error::from(io_err);

        assert!(matches!(err, Error::ExitStatus(3)));
        assert_eq!(err.to_string(), "exit status 3");
    }

    #[test]
    fn plain_io_error_keeps_kind() {
        let err = Error::from(io::Error::new(io::ErrorKind::NotFound, "gone"));
        let back: io::Error = err.into();

        assert_eq!(back.kind(), io::ErrorKind::NotFound);
        assert_eq!(back.to_string(), "gone");
    }

    #[test]
    fn record_keeps_first_error() {
        let cell = ErrorCell::default();

        assert_eq!(cell.record(Error::msg("first")).to_string(), "first");
        assert_eq!(cell.record(Error::msg("second")).to_string(), "first");

        cell.set(None);
        assert!(cell.get().is_none());

        cell.set(Some(Error::msg("third")));
        assert_eq!(cell.get().map(|e| e.to_string()), Some("third".to_string()));
    }

    #[test]
    fn open_error_names_path() {
        let err = Error::open(
            "/no/such/file",
            io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
        );

        assert_eq!(
            err.to_string(),
            "open /no/such/file: No such file or directory"
        );
    }
}
