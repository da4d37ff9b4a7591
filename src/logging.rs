//! Log setup with secret redaction.
//!
//! Every formatted line passes through [`redact`] before it reaches stdout,
//! so a sensitive key that slips into a message never hits the journal in
//! the clear.

use std::borrow::Cow;
use std::io::{self, Write};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;

pub const REDACTED: &str = "[REDACTED]";

// Matched case-insensitively
const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "passphrase",
    "psk",
    "secret",
    "token",
    "private_key",
    "privatekey",
];

fn is_value_end(b: u8) -> bool {
    b.is_ascii_whitespace() || matches!(b, b',' | b';' | b'"' | b'\'' | b'}' | b'&' | b')')
}

// Position right after `key` + optional quote + separator + optional quote/space,
// or None when the key isn't followed by a `=`/`:` separator
fn value_start(bytes: &[u8], mut i: usize) -> Option<usize> {
    if i < bytes.len() && matches!(bytes[i], b'"' | b'\'') {
        i += 1;
    }
    while i < bytes.len() && bytes[i] == b' ' {
        i += 1;
    }
    if i >= bytes.len() || !matches!(bytes[i], b'=' | b':') {
        return None;
    }
    i += 1;
    while i < bytes.len() && bytes[i] == b' ' {
        i += 1;
    }
    if i < bytes.len() && matches!(bytes[i], b'"' | b'\'') {
        i += 1;
    }
    Some(i)
}

/// Replace the value following any sensitive `key=value` / `"key": "value"`
/// pair with `[REDACTED]`.
pub fn redact(line: &str) -> Cow<'_, str> {
    let lower = line.to_ascii_lowercase();
    let bytes = line.as_bytes();

    // (start, end) spans of values to hide
    let mut spans: Vec<(usize, usize)> = Vec::new();
    for key in SENSITIVE_KEYS {
        let mut from = 0;
        while let Some(found) = lower[from..].find(key) {
            let key_end = from + found + key.len();
            from = key_end;

            let Some(start) = value_start(bytes, key_end) else {
                continue;
            };
            let mut end = start;
            while end < bytes.len() && !is_value_end(bytes[end]) {
                end += 1;
            }
            if end > start && &line[start..end] != REDACTED {
                spans.push((start, end));
            }
        }
    }

    if spans.is_empty() {
        return Cow::Borrowed(line);
    }

    spans.sort_unstable();
    let mut out = String::with_capacity(line.len());
    let mut cursor = 0;
    for (start, end) in spans {
        if start < cursor {
            continue;
        }
        out.push_str(&line[cursor..start]);
        out.push_str(REDACTED);
        cursor = end;
    }
    out.push_str(&line[cursor..]);
    Cow::Owned(out)
}

/// Redacts arbitrary multi-line text (e.g. journal output) line by line.
pub fn redact_text(text: &str) -> String {
    text.lines()
        .map(|l| redact(l).into_owned())
        .collect::<Vec<_>>()
        .join("\n")
}

// Buffers one formatted event and writes it out redacted when dropped
pub struct RedactingWriter<W: Write> {
    buf: Vec<u8>,
    inner: W,
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let text = String::from_utf8_lossy(&self.buf);
        self.inner.write_all(redact(&text).as_bytes())?;
        self.buf.clear();
        self.inner.flush()
    }
}

impl<W: Write> Drop for RedactingWriter<W> {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// Wraps another `MakeWriter` so everything it receives is redacted first.
#[derive(Clone, Copy, Default)]
pub struct RedactingMakeWriter<M> {
    inner: M,
}

impl<M> RedactingMakeWriter<M> {
    pub fn new(inner: M) -> Self {
        Self { inner }
    }
}

impl<'a, M: MakeWriter<'a>> MakeWriter<'a> for RedactingMakeWriter<M> {
    type Writer = RedactingWriter<M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter {
            buf: Vec::new(),
            inner: self.inner.make_writer(),
        }
    }
}

pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(RedactingMakeWriter::new(io::stdout))
        .with_ansi(false)
        .init();
}
