use pimd_core::RequestTag;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::WireError;
use crate::greeting::Hello;
use crate::literal::LiteralReader;
use crate::verb::Verb;

/// One parsed command line: `<tag> <VERB> <json-args>`.
///
/// If `args` contains a top-level `"literal"` field with an integer value,
/// the caller must consume exactly that many bytes via
/// [`FrameReader::literal_reader`] before reading the next command.
#[derive(Debug, Clone)]
pub struct CommandLine {
    pub tag: RequestTag,
    pub verb: Verb,
    pub args: Value,
}

impl CommandLine {
    pub fn literal_len(&self) -> Option<u64> {
        self.args.get("literal")?.as_u64()
    }
}

/// Reads tagged command lines off any `AsyncBufRead` (a `UnixStream` in
/// production, an in-memory cursor in tests).
pub struct FrameReader<R> {
    inner: R,
}

impl<R: AsyncBufRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Reads one full line and parses it into a [`CommandLine`]. Blocks
    /// until a newline or EOF arrives — callers must not call this
    /// recursively from within an active literal read (§5).
    pub async fn read_command_line(&mut self) -> Result<CommandLine, WireError> {
        let mut line = String::new();
        let read = self.inner.read_line(&mut line).await?;
        if read == 0 {
            return Err(WireError::Eof);
        }
        parse_command_line(line.trim_end_matches(['\r', '\n']))
    }

    /// Borrows the reader to stream a literal's bytes in bounded chunks.
    pub fn literal_reader(&mut self, declared_size: u64) -> LiteralReader<'_, R> {
        LiteralReader::new(&mut self.inner, declared_size)
    }
}

fn parse_command_line(line: &str) -> Result<CommandLine, WireError> {
    let mut parts = line.splitn(3, ' ');
    let tag_str = parts
        .next()
        .ok_or_else(|| WireError::Malformed("missing tag".into()))?;
    let verb_str = parts
        .next()
        .ok_or_else(|| WireError::Malformed("missing verb".into()))?;
    let rest = parts.next().unwrap_or("{}").trim();

    let tag = tag_str
        .parse::<i64>()
        .map(RequestTag::new)
        .map_err(|_| WireError::Malformed(format!("tag {tag_str:?} is not an integer")))?;
    let verb = verb_str
        .parse::<Verb>()
        .map_err(|_| WireError::UnknownVerb(verb_str.to_string()))?;
    let args: Value = if rest.is_empty() {
        Value::Object(Default::default())
    } else {
        serde_json::from_str(rest)
            .map_err(|err| WireError::Malformed(format!("bad json args: {err}")))?
    };

    Ok(CommandLine { tag, verb, args })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    Ok,
    No,
    Bad,
}

impl ResponseStatus {
    fn as_str(self) -> &'static str {
        match self {
            ResponseStatus::Ok => "OK",
            ResponseStatus::No => "NO",
            ResponseStatus::Bad => "BAD",
        }
    }
}

/// A tagged (`<tag> OK ...`) or untagged (`* ...`) response line (§6.1,
/// §6.4). Untagged responses are server-initiated notifications.
#[derive(Debug, Clone)]
pub struct ResponseLine {
    pub tag: Option<RequestTag>,
    pub status: ResponseStatus,
    pub text: String,
}

impl ResponseLine {
    pub fn tagged(tag: RequestTag, status: ResponseStatus, text: impl Into<String>) -> Self {
        Self {
            tag: Some(tag),
            status,
            text: text.into(),
        }
    }

    pub fn untagged(text: impl Into<String>) -> Self {
        Self {
            tag: None,
            status: ResponseStatus::Ok,
            text: text.into(),
        }
    }

    fn render(&self) -> String {
        match self.tag {
            Some(tag) => format!("{} {} {}\n", tag, self.status.as_str(), self.text),
            None => format!("* {}\n", self.text),
        }
    }
}

pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    pub async fn write_hello(&mut self, hello: &Hello) -> Result<(), WireError> {
        let json = serde_json::to_string(hello)
            .map_err(|err| WireError::Malformed(format!("hello serialization: {err}")))?;
        self.write_raw(&format!("* HELLO {json}\n")).await
    }

    pub async fn write_response(&mut self, response: &ResponseLine) -> Result<(), WireError> {
        self.write_raw(&response.render()).await
    }

    pub async fn write_event<T: Serialize>(
        &mut self,
        verb: &str,
        payload: &T,
    ) -> Result<(), WireError> {
        let json = serde_json::to_string(payload)
            .map_err(|err| WireError::Malformed(format!("event serialization: {err}")))?;
        self.write_raw(&format!("* {verb} {json}\n")).await
    }

    pub async fn write_literal(&mut self, bytes: &[u8]) -> Result<(), WireError> {
        self.inner.write_all(bytes).await?;
        Ok(())
    }

    async fn write_raw(&mut self, line: &str) -> Result<(), WireError> {
        self.inner.write_all(line.as_bytes()).await?;
        self.inner.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn parses_simple_command_line() {
        let input = b"7 ITEMFETCH {\"collection\":1}\n".to_vec();
        let mut reader = FrameReader::new(BufReader::new(&input[..]));
        let cmd = reader.read_command_line().await.unwrap();
        assert_eq!(cmd.tag.get(), 7);
        assert_eq!(cmd.verb, Verb::ItemFetch);
        assert_eq!(cmd.args["collection"], 1);
    }

    #[tokio::test]
    async fn missing_args_default_to_empty_object() {
        let input = b"1 BEGIN\n".to_vec();
        let mut reader = FrameReader::new(BufReader::new(&input[..]));
        let cmd = reader.read_command_line().await.unwrap();
        assert_eq!(cmd.verb, Verb::TransactionBegin);
        assert!(cmd.args.is_object());
    }

    #[tokio::test]
    async fn unknown_verb_is_rejected() {
        let input = b"1 FROBNICATE {}\n".to_vec();
        let mut reader = FrameReader::new(BufReader::new(&input[..]));
        let err = reader.read_command_line().await.unwrap_err();
        assert!(matches!(err, WireError::UnknownVerb(_)));
    }

    #[tokio::test]
    async fn eof_before_any_line_is_reported() {
        let input: Vec<u8> = Vec::new();
        let mut reader = FrameReader::new(BufReader::new(&input[..]));
        let err = reader.read_command_line().await.unwrap_err();
        assert!(matches!(err, WireError::Eof));
    }

    #[tokio::test]
    async fn command_carrying_a_literal_exposes_its_length() {
        let input = b"2 ITEMCREATE {\"literal\":5}\nhello".to_vec();
        let mut reader = FrameReader::new(BufReader::new(&input[..]));
        let cmd = reader.read_command_line().await.unwrap();
        assert_eq!(cmd.literal_len(), Some(5));
        let bytes = reader.literal_reader(5).read_to_vec().await.unwrap();
        assert_eq!(bytes, b"hello");
    }
}
