//! Pull-based decoder for one huge top-level JSON object.
//!
//! The market snapshot is a single object keyed by deal id that can be many
//! gigabytes once decompressed. [`EntryStream`] walks it one `key: value`
//! pair at a time and only ever buffers the raw bytes of the current value.
//! The sequence is finite and cannot be restarted: a new pass opens a new
//! reader.

use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::domain::ErrorKind;

/// Values larger than this are treated as corrupt input.
pub const DEFAULT_MAX_VALUE_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("read failed at byte {position}")]
    Io {
        position: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("stream ended prematurely at byte {position}")]
    UnexpectedEof { position: u64 },

    #[error("malformed input at byte {position}: {reason}")]
    Syntax { position: u64, reason: String },

    #[error("entry '{key}' ending at byte {position} does not decode")]
    Entry {
        key: String,
        position: u64,
        #[source]
        source: serde_json::Error,
    },
}

impl DecodeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DecodeError::Io { .. } | DecodeError::UnexpectedEof { .. } => ErrorKind::Transient,
            DecodeError::Syntax { .. } | DecodeError::Entry { .. } => ErrorKind::Malformed,
        }
    }

    pub fn position(&self) -> u64 {
        match self {
            DecodeError::Io { position, .. }
            | DecodeError::UnexpectedEof { position }
            | DecodeError::Syntax { position, .. }
            | DecodeError::Entry { position, .. } => *position,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Before the opening brace.
    Start,
    /// After the opening brace, before any entry.
    First,
    /// After an entry: expect `,` or `}`.
    Next,
    Done,
}

/// Tracks where a raw JSON value ends while its bytes stream past.
enum Scan {
    Container {
        depth: usize,
        in_string: bool,
        escaped: bool,
    },
    Str {
        escaped: bool,
    },
    Scalar,
}

impl Scan {
    fn start(first: u8) -> Self {
        match first {
            b'{' | b'[' => Scan::Container {
                depth: 1,
                in_string: false,
                escaped: false,
            },
            b'"' => Scan::Str { escaped: false },
            _ => Scan::Scalar,
        }
    }

    /// Number of leading bytes of `chunk` that still belong to the value,
    /// if the value ends inside `chunk`.
    fn feed(&mut self, chunk: &[u8]) -> Option<usize> {
        match self {
            Scan::Container {
                depth,
                in_string,
                escaped,
            } => {
                for (i, &b) in chunk.iter().enumerate() {
                    if *in_string {
                        if *escaped {
                            *escaped = false;
                        } else if b == b'\\' {
                            *escaped = true;
                        } else if b == b'"' {
                            *in_string = false;
                        }
                        continue;
                    }
                    match b {
                        b'"' => *in_string = true,
                        b'{' | b'[' => *depth += 1,
                        b'}' | b']' => {
                            *depth -= 1;
                            if *depth == 0 {
                                return Some(i + 1);
                            }
                        }
                        _ => {}
                    }
                }
                None
            }
            Scan::Str { escaped } => {
                for (i, &b) in chunk.iter().enumerate() {
                    if *escaped {
                        *escaped = false;
                    } else if b == b'\\' {
                        *escaped = true;
                    } else if b == b'"' {
                        return Some(i + 1);
                    }
                }
                None
            }
            Scan::Scalar => chunk
                .iter()
                .position(|&b| matches!(b, b',' | b'}' | b']') || b.is_ascii_whitespace()),
        }
    }
}

pub struct EntryStream<R> {
    reader: R,
    phase: Phase,
    /// Byte offset into the (decompressed) input.
    position: u64,
    value: Vec<u8>,
    max_value_len: usize,
}

impl<R: AsyncBufRead + Unpin> EntryStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            phase: Phase::Start,
            position: 0,
            value: Vec::new(),
            max_value_len: DEFAULT_MAX_VALUE_LEN,
        }
    }

    pub fn with_max_value_len(mut self, max: usize) -> Self {
        self.max_value_len = max;
        self
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Next `(key, value)` pair, or `None` once the closing brace is read.
    pub async fn next_entry<T: DeserializeOwned>(
        &mut self,
    ) -> Result<Option<(String, T)>, DecodeError> {
        if self.phase == Phase::Start {
            match self.skip_ws().await? {
                Some(b'{') => self.bump(1),
                Some(b) => return Err(self.syntax(format!("expected '{{', found '{}'", b as char))),
                None => return Err(DecodeError::UnexpectedEof { position: self.position }),
            }
            self.phase = Phase::First;
        }

        match self.phase {
            Phase::Done => return Ok(None),
            Phase::Start => unreachable!("handled above"),
            Phase::First => match self.skip_ws().await? {
                Some(b'}') => return self.finish(),
                Some(_) => {}
                None => return Err(DecodeError::UnexpectedEof { position: self.position }),
            },
            Phase::Next => match self.skip_ws().await? {
                Some(b'}') => return self.finish(),
                Some(b',') => self.bump(1),
                Some(b) => return Err(self.syntax(format!("expected ',' or '}}', found '{}'", b as char))),
                None => return Err(DecodeError::UnexpectedEof { position: self.position }),
            },
        }

        let key = self.read_key().await?;
        match self.skip_ws().await? {
            Some(b':') => self.bump(1),
            Some(b) => return Err(self.syntax(format!("expected ':', found '{}'", b as char))),
            None => return Err(DecodeError::UnexpectedEof { position: self.position }),
        }
        self.read_value().await?;
        self.phase = Phase::Next;

        let value = serde_json::from_slice(&self.value).map_err(|source| DecodeError::Entry {
            key: key.clone(),
            position: self.position,
            source,
        })?;
        Ok(Some((key, value)))
    }

    fn finish<T>(&mut self) -> Result<Option<T>, DecodeError> {
        self.bump(1);
        self.phase = Phase::Done;
        self.value = Vec::new();
        Ok(None)
    }

    fn syntax(&self, reason: String) -> DecodeError {
        DecodeError::Syntax {
            position: self.position,
            reason,
        }
    }

    fn bump(&mut self, n: usize) {
        self.reader.consume(n);
        self.position += n as u64;
    }

    /// Skip whitespace and peek the next byte without consuming it.
    async fn skip_ws(&mut self) -> Result<Option<u8>, DecodeError> {
        loop {
            let position = self.position;
            let buf = self
                .reader
                .fill_buf()
                .await
                .map_err(|source| DecodeError::Io { position, source })?;
            if buf.is_empty() {
                return Ok(None);
            }
            match buf.iter().position(|b| !b.is_ascii_whitespace()) {
                Some(n) => {
                    let b = buf[n];
                    self.bump(n);
                    return Ok(Some(b));
                }
                None => {
                    let n = buf.len();
                    self.bump(n);
                }
            }
        }
    }

    async fn read_key(&mut self) -> Result<String, DecodeError> {
        match self.skip_ws().await? {
            Some(b'"') => {}
            Some(b) => return Err(self.syntax(format!("expected string key, found '{}'", b as char))),
            None => return Err(DecodeError::UnexpectedEof { position: self.position }),
        }
        self.read_value().await?;
        serde_json::from_slice::<String>(&self.value)
            .map_err(|e| self.syntax(format!("invalid key: {e}")))
    }

    /// Copy the raw bytes of the next JSON value into `self.value`.
    async fn read_value(&mut self) -> Result<(), DecodeError> {
        self.value.clear();
        let first = match self.skip_ws().await? {
            Some(b @ (b',' | b':' | b'}' | b']')) => {
                return Err(self.syntax(format!("expected a value, found '{}'", b as char)));
            }
            Some(b) => b,
            None => return Err(DecodeError::UnexpectedEof { position: self.position }),
        };
        self.value.push(first);
        self.bump(1);

        let mut scan = Scan::start(first);
        loop {
            let position = self.position;
            let buf = self
                .reader
                .fill_buf()
                .await
                .map_err(|source| DecodeError::Io { position, source })?;
            // even a scalar cannot end at EOF: the enclosing object is open
            if buf.is_empty() {
                return Err(DecodeError::UnexpectedEof { position });
            }
            let (n, done) = match scan.feed(buf) {
                Some(n) => (n, true),
                None => (buf.len(), false),
            };
            self.value.extend_from_slice(&buf[..n]);
            self.bump(n);
            if done {
                return Ok(());
            }
            if self.value.len() > self.max_value_len {
                return Err(self.syntax(format!(
                    "value exceeds {} bytes",
                    self.max_value_len
                )));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tokio::io::BufReader;

    #[derive(Debug, Deserialize, PartialEq)]
    struct V {
        a: i64,
        #[serde(default)]
        s: String,
    }

    /// A reader that hands out at most `chunk` bytes per fill.
    fn reader(input: &'static str, chunk: usize) -> BufReader<&'static [u8]> {
        BufReader::with_capacity(chunk, input.as_bytes())
    }

    async fn collect(input: &'static str, chunk: usize) -> Result<Vec<(String, V)>, DecodeError> {
        let mut stream = EntryStream::new(reader(input, chunk));
        let mut out = Vec::new();
        while let Some(entry) = stream.next_entry::<V>().await? {
            out.push(entry);
        }
        Ok(out)
    }

    #[tokio::test]
    async fn decodes_entries_in_order_across_chunk_boundaries() {
        let input = r#" { "1": {"a": 1, "s": "x}y"}, "2" : {"a":2,"s":"q\"{"} ,"30":{"a":3,"n":{"deep":[1,{"k":"]"}]}} } "#;
        for chunk in [1, 2, 3, 7, 64, 4096] {
            let entries = collect(input, chunk).await.unwrap();
            let keys: Vec<_> = entries.iter().map(|(k, _)| k.as_str()).collect();
            assert_eq!(keys, vec!["1", "2", "30"], "chunk={chunk}");
            assert_eq!(entries[0].1.s, "x}y");
            assert_eq!(entries[1].1.s, "q\"{");
            assert_eq!(entries[2].1.a, 3);
        }
    }

    #[tokio::test]
    async fn empty_object_yields_nothing() {
        assert!(collect("{}", 8).await.unwrap().is_empty());
        assert!(collect("  {  }  ", 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stream_is_not_restartable() {
        let mut stream = EntryStream::new(reader(r#"{"1":{"a":1}}"#, 4));
        assert!(stream.next_entry::<V>().await.unwrap().is_some());
        assert!(stream.next_entry::<V>().await.unwrap().is_none());
        assert!(stream.next_entry::<V>().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn truncated_input_is_unexpected_eof() {
        let mut stream = EntryStream::new(reader(r#"{"1":{"a":1},"2":{"a":"#, 5));
        assert!(stream.next_entry::<V>().await.unwrap().is_some());
        let err = stream.next_entry::<V>().await.unwrap_err();
        assert!(matches!(err, DecodeError::UnexpectedEof { .. }), "{err:?}");
        assert_eq!(err.kind(), ErrorKind::Transient);
    }

    #[tokio::test]
    async fn missing_separator_is_malformed() {
        let err = collect(r#"{"1":{"a":1} "2":{"a":2}}"#, 16).await.unwrap_err();
        assert!(matches!(err, DecodeError::Syntax { .. }), "{err:?}");
        assert_eq!(err.kind(), ErrorKind::Malformed);
    }

    #[tokio::test]
    async fn undecodable_value_names_its_key() {
        let err = collect(r#"{"7":{"a":"not a number"}}"#, 16).await.unwrap_err();
        match err {
            DecodeError::Entry { key, .. } => assert_eq!(key, "7"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn oversized_value_is_rejected() {
        let mut stream = EntryStream::new(reader(r#"{"1":{"a":1,"s":"xxxxxxxxxxxxxxxxxxxxxxxx"}}"#, 4))
            .with_max_value_len(16);
        let err = stream.next_entry::<V>().await.unwrap_err();
        assert!(matches!(err, DecodeError::Syntax { .. }));
    }
}
