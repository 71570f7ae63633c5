//! Functions that start a [`Pipe`].
use std::{fs, io, path::Path};

use reqwest::Request;
use tracing::debug;
use walkdir::WalkDir;

use crate::{error::Error, Pipe};

/// A pipe whose output is `text`
pub fn echo(text: impl Into<String>) -> Pipe {
    Pipe::new().echo(text)
}

/// A pipe with one line per item
pub fn slice<I, S>(lines: I) -> Pipe
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut text = String::new();
    for line in lines {
        text.push_str(line.as_ref());
        text.push('\n');
    }

    echo(text)
}

/// A pipe reading the file at `path`. A file that cannot be opened is recorded as the pipe's error.
pub fn file(path: impl AsRef<Path>) -> Pipe {
    let path = path.as_ref();

    match fs::File::open(path) {
        Ok(file) => Pipe::new().with_reader(tokio::fs::File::from_std(file)),
        Err(err) => Pipe::new().with_error(Error::open(path, err)),
    }
}

/// A pipe reading the process standard input
pub fn stdin() -> Pipe {
    Pipe::new().with_reader(tokio::io::stdin())
}

/// The process arguments, program name excluded, one per line
pub fn args() -> Pipe {
    slice(std::env::args().skip(1))
}

/// Lists `path`: the entries of a directory in sorted order, the path itself if it is a file, or the
/// matches of a glob pattern if `path` contains any of `*?[`.
pub fn list_files(path: impl AsRef<Path>) -> Pipe {
    let path = path.as_ref();
    let pattern = path.to_string_lossy();

    if pattern.contains(['*', '?', '[']) {
        return match glob::glob(&pattern) {
            Ok(paths) => slice(
                paths
                    .filter_map(|entry| entry.ok())
                    .map(|p| p.display().to_string()),
            ),
            Err(e) => Pipe::new().with_error(Error::Pattern {
                pattern: pattern.into_owned(),
                reason: e.to_string(),
            }),
        };
    }

    match directory_entries(path) {
        Ok(entries) => slice(entries),
        Err(err) => Pipe::new().with_error(Error::open(path, err)),
    }
}

fn directory_entries(path: &Path) -> io::Result<Vec<String>> {
    if !fs::metadata(path)?.is_dir() {
        return Ok(vec![path.display().to_string()]);
    }

    let mut entries = fs::read_dir(path)?
        .map(|entry| entry.map(|e| path.join(e.file_name()).display().to_string()))
        .collect::<io::Result<Vec<_>>>()?;
    entries.sort();

    Ok(entries)
}

/// Every file under `dir`, recursively, in file name order. Entries that cannot be read are skipped.
pub fn find_files(dir: impl AsRef<Path>) -> Pipe {
    let dir = dir.as_ref();

    if let Err(err) = fs::metadata(dir) {
        return Pipe::new().with_error(Error::open(dir, err));
    }

    let files = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                debug!(error = %err, "skipping unreadable entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.path().display().to_string());

    slice(files)
}

/// An empty pipe if `path` exists, otherwise a pipe holding the error
pub fn if_exists(path: impl AsRef<Path>) -> Pipe {
    let path = path.as_ref();

    match fs::metadata(path) {
        Ok(_) => Pipe::new(),
        Err(err) => Pipe::new().with_error(Error::open(path, err)),
    }
}

/// Runs `command_line` with empty input, see [`Pipe::exec`]
pub fn exec(command_line: &str) -> Pipe {
    Pipe::new().exec(command_line)
}

/// See [`Pipe::get`]
pub fn get(url: &str) -> Pipe {
    Pipe::new().get(url)
}

/// See [`Pipe::post`]. The body is empty.
pub fn post(url: &str) -> Pipe {
    Pipe::new().post(url)
}

/// See [`Pipe::send`]
pub fn send(request: Request) -> Pipe {
    Pipe::new().send(request)
}
