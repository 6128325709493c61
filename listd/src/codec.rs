//! BAPS3-style line protocol.
//!
//! A message is one line of whitespace-separated words: a command word followed
//! by its arguments. Words may be quoted with `'…'` (literal) or `"…"`
//! (backslash escapes honoured), and a bare backslash escapes the next byte.
//! Quoted newlines belong to the word, so a single line can arrive over several
//! socket reads. [`Tokeniser`] keeps that partial state between calls to
//! [`Tokeniser::feed`], which is why every connection owns its own instance.

use std::{borrow::Cow, fmt, string::FromUtf8Error};

use thiserror::Error;

/// Bytes that force a word to be quoted when encoding.
const SPECIAL: &[char] = &[' ', '\t', '\r', '\n', '\'', '"', '\\'];

/// Longest line, in bytes, a [`Tokeniser`] buffers by default.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 8192;

/// One tokenised line: the raw words in order.
pub type Line = Vec<String>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("line is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] FromUtf8Error),
    #[error("cannot build a message from an empty line")]
    EmptyLine,
    #[error("message has an empty command word")]
    EmptyWord,
    #[error("line exceeds {limit} bytes")]
    LineTooLong { limit: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Quote {
    #[default]
    None,
    Single,
    Double,
}

/// Incremental splitter turning a byte stream into [`Line`]s.
///
/// At most `max_line_length` bytes of one line are buffered. Past that the
/// line is discarded up to the next newline byte and reported as
/// [`CodecError::LineTooLong`].
#[derive(Debug)]
pub struct Tokeniser {
    words: Vec<Vec<u8>>,
    word: Vec<u8>,
    in_word: bool,
    quote: Quote,
    escaped: bool,
    line_len: usize,
    max_line_length: usize,
    overflowed: bool,
}

impl Default for Tokeniser {
    fn default() -> Self {
        Self::with_max_line_length(DEFAULT_MAX_LINE_LENGTH)
    }
}

impl Tokeniser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line_length(max_line_length: usize) -> Self {
        Self {
            words: Vec::new(),
            word: Vec::new(),
            in_word: false,
            quote: Quote::None,
            escaped: false,
            line_len: 0,
            max_line_length: max_line_length.max(1),
            overflowed: false,
        }
    }

    pub fn max_line_length(&self) -> usize {
        self.max_line_length
    }

    /// Feeds raw bytes and returns every line they complete.
    ///
    /// Each completed line is reported independently: a line that fails to
    /// decode yields an `Err` in its slot and the tokeniser carries on with the
    /// next one. Bytes after the last unquoted newline stay buffered.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Result<Line, CodecError>> {
        let mut lines = Vec::new();

        for &byte in bytes {
            if self.overflowed {
                if byte == b'\n' {
                    self.reset();
                    lines.push(Err(self.too_long()));
                }
                continue;
            }

            self.line_len += 1;
            if self.line_len > self.max_line_length {
                self.reset();
                if byte == b'\n' {
                    lines.push(Err(self.too_long()));
                } else {
                    self.overflowed = true;
                }
                continue;
            }

            if self.escaped {
                self.escaped = false;
                self.push(byte);
                continue;
            }

            match self.quote {
                Quote::Single => match byte {
                    b'\'' => self.quote = Quote::None,
                    _ => self.push(byte),
                },
                Quote::Double => match byte {
                    b'"' => self.quote = Quote::None,
                    b'\\' => self.escaped = true,
                    _ => self.push(byte),
                },
                Quote::None => match byte {
                    b'\'' => {
                        self.quote = Quote::Single;
                        self.in_word = true;
                    }
                    b'"' => {
                        self.quote = Quote::Double;
                        self.in_word = true;
                    }
                    b'\\' => {
                        self.escaped = true;
                        self.in_word = true;
                    }
                    b' ' | b'\t' => self.end_word(),
                    b'\r' => {}
                    b'\n' => lines.push(self.end_line()),
                    _ => self.push(byte),
                },
            }
        }

        lines
    }

    /// True when bytes of an unfinished line are buffered.
    pub fn has_partial(&self) -> bool {
        self.in_word
            || !self.words.is_empty()
            || self.quote != Quote::None
            || self.escaped
            || self.overflowed
    }

    fn reset(&mut self) {
        self.words.clear();
        self.word.clear();
        self.in_word = false;
        self.quote = Quote::None;
        self.escaped = false;
        self.line_len = 0;
        self.overflowed = false;
    }

    fn too_long(&self) -> CodecError {
        CodecError::LineTooLong {
            limit: self.max_line_length,
        }
    }

    fn push(&mut self, byte: u8) {
        self.word.push(byte);
        self.in_word = true;
    }

    fn end_word(&mut self) {
        if self.in_word {
            self.words.push(std::mem::take(&mut self.word));
            self.in_word = false;
        }
    }

    fn end_line(&mut self) -> Result<Line, CodecError> {
        self.end_word();
        self.line_len = 0;
        std::mem::take(&mut self.words)
            .into_iter()
            .map(|word| String::from_utf8(word).map_err(CodecError::from))
            .collect()
    }
}

/// A structured protocol unit: command word plus arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    word: String,
    args: Vec<String>,
}

impl Message {
    pub fn new(word: impl Into<String>) -> Self {
        Self {
            word: word.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn word(&self) -> &str {
        &self.word
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Builds a message from a tokenised line.
    pub fn from_line(line: Line) -> Result<Self, CodecError> {
        let mut words = line.into_iter();
        let word = words.next().ok_or(CodecError::EmptyLine)?;
        Ok(Self {
            word,
            args: words.collect(),
        })
    }

    /// Encodes the message as one newline-terminated line.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        if self.word.is_empty() {
            return Err(CodecError::EmptyWord);
        }
        let mut encoded = self.to_string().into_bytes();
        encoded.push(b'\n');
        Ok(encoded)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&quote(&self.word))?;
        for arg in &self.args {
            write!(f, " {}", quote(arg))?;
        }
        Ok(())
    }
}

fn quote(word: &str) -> Cow<'_, str> {
    if !word.is_empty() && !word.contains(SPECIAL) {
        return Cow::Borrowed(word);
    }
    Cow::Owned(format!("'{}'", word.replace('\'', r"'\''")))
}
