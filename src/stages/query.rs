use futures::{future::BoxFuture, FutureExt};
use serde_json::{Deserializer, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::{
    error::{Error, Result},
    reader::ManagedReader,
    stage::Stage,
    StageWriter,
};

/// A validated JSON Pointer (RFC 6901). `""` and `"."` point at the whole value.
///
/// jq-style paths (`.a.b`, `.[0]`, `.a[0]`, `.["key"]`) are accepted too and translated to the
/// equivalent pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct JsonPointer(String);

impl JsonPointer {
    pub(crate) fn parse(query: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::Query {
            query: query.to_string(),
            reason: reason.to_string(),
        };

        if query.is_empty() || query == "." {
            return Ok(Self(String::new()));
        }

        if query.starts_with('.') {
            return from_path(query)
                .map(Self)
                .ok_or_else(|| invalid("expected a path like .a.b or .[0]"));
        }

        if !query.starts_with('/') {
            return Err(invalid("a query must start with '/' or '.'"));
        }

        let mut chars = query.chars();
        while let Some(c) = chars.next() {
            if c == '~' && !matches!(chars.next(), Some('0' | '1')) {
                return Err(invalid("'~' must be followed by '0' or '1'"));
            }
        }

        Ok(Self(query.to_string()))
    }

    fn select<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        value.pointer(&self.0)
    }
}

/// Translates a jq-style path into a pointer. `None` if it is anything but a plain path.
fn from_path(path: &str) -> Option<String> {
    let mut pointer = String::new();
    let mut push = |token: &str| {
        pointer.push('/');
        pointer.push_str(&token.replace('~', "~0").replace('/', "~1"));
    };

    let mut rest = path;
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix('[') {
            let (token, after) = match quoted(after) {
                Some((key, after)) => (key, after),
                None => {
                    let end = after.find(']')?;
                    let index = after[..end].trim().parse::<usize>().ok()?;
                    (index.to_string(), &after[end..])
                }
            };
            push(&token);
            rest = after.trim_start().strip_prefix(']')?;
        } else if let Some(after) = rest.strip_prefix('.') {
            if after.starts_with('[') {
                rest = after;
            } else if let Some((key, after)) = quoted(after) {
                push(&key);
                rest = after;
            } else {
                let end = after
                    .find(|c: char| !(c.is_alphanumeric() || c == '_'))
                    .unwrap_or(after.len());
                let key = &after[..end];
                if key.is_empty() || key.starts_with(|c: char| c.is_ascii_digit()) {
                    return None;
                }
                push(key);
                rest = &after[end..];
            }
        } else {
            return None;
        }
    }

    Some(pointer)
}

/// A JSON string literal at the start of `text` and what follows it
fn quoted(text: &str) -> Option<(String, &str)> {
    let text = text.trim_start();
    if !text.starts_with('"') {
        return None;
    }

    let mut values = Deserializer::from_str(text).into_iter::<String>();
    let key = values.next()?.ok()?;
    Some((key, &text[values.byte_offset()..]))
}

pub(crate) struct QueryStage {
    pub(crate) pointer: JsonPointer,
}

impl Stage for QueryStage {
    fn name(&self) -> &'static str {
        "query"
    }

    fn run(
        self,
        mut input: ManagedReader,
        mut output: StageWriter,
    ) -> BoxFuture<'static, Result<()>> {
        async move {
            let mut data = Vec::new();
            input.read_to_end(&mut data).await?;

            for value in Deserializer::from_slice(&data).into_iter::<Value>() {
                let value = value?;
                let selected = self.pointer.select(&value).cloned().unwrap_or(Value::Null);

                let mut line = serde_json::to_vec(&selected)?;
                line.push(b'\n');
                output.write_all(&line).await?;
            }

            Ok(())
        }
        .boxed()
    }
}
