//! Shell-style pipelines for Rust. Chain sources, filters and sinks over byte streams and check for errors once, at the end.
//!
//! Main features:
//!
//! - Each filter runs in its own tokio task and produces output only as fast as it is read
//! - Deferred error handling - the first error sticks to the pipe and turns everything after it into a no-op
//! - Files, subprocesses and HTTP response bodies are closed as soon as they are fully read
//! - Commands and HTTP requests are regular stages of the same pipe
//!
//! Example:
//!
//! ```rust,no_run
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let errors = pipewright::file("/var/log/app.log")
//!     .match_text("ERROR")
//!     .freq()
//!     .first(10)
//!     .string()
//!     .await;
//!
//! match errors {
//!     Ok(top) => print!("{top}"),
//!     Err(err) => eprintln!("could not read log: {err}"),
//! }
//! # });
//! ```
//!
//! ## Pipes
//!
//! A [`Pipe`] is a reader plus a sticky error. It is built in three steps:
//!
//! - a source creates it: [`echo`], [`slice`], [`file`], [`stdin`], [`args`], [`list_files`], [`find_files`],
//!   [`if_exists`], [`exec`], [`get`], [`post`], [`send`]
//! - filters transform it: each takes the pipe by value and returns it with a new reader
//! - a sink drains it: [`Pipe::string`], [`Pipe::count_lines`], [`Pipe::slice`], [`Pipe::stdout`], ...
//!
//! ```rust
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let lines = pipewright::echo("a\nb\nc\n").last(2).slice().await.unwrap();
//! assert_eq!(lines, vec!["b", "c"]);
//! # });
//! ```
//!
//! ### Errors
//!
//! Once a pipe holds an error, filters on it do nothing and every sink returns a clone of that error. Stages
//! record their errors when they finish, so a sink only reports them after it has read the whole output.
//!
//! ```rust
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let mut pipe = pipewright::file("no-such-file.txt").match_text("x").first(1);
//!
//! assert!(pipe.count_lines().await.is_err());
//! assert!(pipe.string().await.is_err());
//! # });
//! ```
//!
//! ### Commands
//!
//! [`Pipe::exec`] feeds the output into a command and reads back its stdout and stderr. A non-zero exit is
//! recorded as an `exit status <code>` error and [`Pipe::exit_status`] gives back the code.
//!
//! ```rust,no_run
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let mut pipe = pipewright::exec("sh -c 'echo failing >&2; exit 3'");
//!
//! let (out, err) = pipe.output().await;
//! assert_eq!(out, "failing\n");
//! assert_eq!(err.unwrap().to_string(), "exit status 3");
//! assert_eq!(pipe.exit_status(), 3);
//! # });
//! ```
//!
//! ### HTTP
//!
//! [`Pipe::get`], [`Pipe::post`] and friends send their request lazily, on the first read of the pipe or on
//! [`Pipe::resolve`], and at most once. A status outside `200..=299` is an error.
//!
//! ```rust,no_run
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let names = pipewright::get("https://api.example.com/users")
//!     .with_header("accept", "application/json")
//!     .query("/0/name")
//!     .string()
//!     .await
//!     .unwrap();
//! # });
//! ```
//!
//! ### Custom stages
//! Anything implementing [`Stage`] can be attached with [`Pipe::stage`]; for one-off transforms [`Pipe::filter`]
//! takes a closure instead.
//!
//! ### Logging
//! The crate emits [`tracing`] events (stages spawned and failed, commands spawned and exited, HTTP requests)
//! and never installs a subscriber.
mod channel;
mod error;
mod http;
mod pipe;
mod reader;
mod sinks;
mod sources;
mod stage;
mod stages;

#[cfg(test)]
mod test_utils;

pub use channel::StageWriter;
pub use error::{Error, Result};
pub use http::HttpClient;
pub use pipe::Pipe;
pub use reader::{BoxReader, ManagedReader};
pub use sources::{
    args, echo, exec, file, find_files, get, if_exists, list_files, post, send, slice, stdin,
};
pub use stage::Stage;

/// Re-exported so callers can build requests for [`Pipe::send`] and [`Pipe::http`]
pub use reqwest::{Method, Request};
