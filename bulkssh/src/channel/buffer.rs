//! Sliding match window over session output.
//!
//! Incoming bytes are stripped of terminal escape sequences and appended to
//! a window of unconsumed text. Patterns are searched in that window only;
//! once nothing matches, the window is cut back to the last `search_depth`
//! bytes, so memory stays O(search_depth) no matter how much a command
//! prints. The raw bytes have already gone to the output sinks by then.

use bytes::{Buf, Bytes, BytesMut};
use vte::{Parser, Perform};

use super::patterns::{PatternMatch, PatternSet};

/// Window of unconsumed, escape-free output.
pub struct PatternBuffer {
    window: BytesMut,
    parser: Parser,
    search_depth: usize,
}

impl PatternBuffer {
    /// Create a buffer keeping at most `search_depth` bytes between searches.
    pub fn new(search_depth: usize) -> Self {
        Self {
            window: BytesMut::with_capacity(search_depth * 2),
            parser: Parser::new(),
            search_depth,
        }
    }

    /// Append raw output, dropping escape sequences.
    ///
    /// The parser state survives between calls, so a sequence split across
    /// two reads is still removed.
    pub fn extend(&mut self, data: &[u8]) {
        let mut printable = Printable(&mut self.window);
        self.parser.advance(&mut printable, data);
    }

    /// Find the earliest match of any pattern in the window.
    ///
    /// On a match, everything up to the end of the match is consumed and
    /// returned; text after the match stays for the next search.
    pub fn take_match(&mut self, patterns: &PatternSet<'_>) -> Option<Consumed> {
        let found = patterns.earliest(&self.window)?;
        let consumed = self.window.split_to(found.end).freeze();
        Some(Consumed { found, text: consumed })
    }

    /// Drop everything but the last `search_depth` bytes.
    pub fn trim(&mut self) {
        if self.window.len() > self.search_depth {
            let excess = self.window.len() - self.search_depth;
            self.window.advance(excess);
        }
    }

    /// Take the remaining window contents.
    pub fn take(&mut self) -> Bytes {
        self.window.split().freeze()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.window
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }
}

/// Text consumed by a successful search.
#[derive(Debug, Clone)]
pub struct Consumed {
    pub found: PatternMatch,
    text: Bytes,
}

impl Consumed {
    /// Output preceding the match.
    pub fn before(&self) -> &[u8] {
        &self.text[..self.found.start]
    }

    /// The matched text itself.
    pub fn matched(&self) -> &[u8] {
        &self.text[self.found.start..self.found.end]
    }
}

/// Keeps printable characters and line control, drops everything else.
struct Printable<'a>(&'a mut BytesMut);

impl Perform for Printable<'_> {
    fn print(&mut self, c: char) {
        let mut utf8 = [0u8; 4];
        self.0.extend_from_slice(c.encode_utf8(&mut utf8).as_bytes());
    }

    fn execute(&mut self, byte: u8) {
        if matches!(byte, b'\n' | b'\r' | b'\t') {
            self.0.extend_from_slice(&[byte]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::bytes::Regex;

    #[test]
    fn test_basic_extend() {
        let mut buffer = PatternBuffer::new(100);
        buffer.extend(b"Hello, world!\r\n");
        assert_eq!(buffer.as_slice(), b"Hello, world!\r\n");
    }

    #[test]
    fn test_ansi_stripping() {
        let mut buffer = PatternBuffer::new(100);
        buffer.extend(b"\x1b[32mGreen text\x1b[0m");
        assert_eq!(buffer.as_slice(), b"Green text");
    }

    #[test]
    fn test_escape_split_across_reads() {
        let mut buffer = PatternBuffer::new(100);
        buffer.extend(b"router\x1b[");
        buffer.extend(b"0m#");
        assert_eq!(buffer.as_slice(), b"router#");
    }

    #[test]
    fn test_take_match_keeps_remainder() {
        let prompt = Regex::new(r"#").unwrap();
        let set = PatternSet::new().with(&prompt);

        let mut buffer = PatternBuffer::new(100);
        buffer.extend(b"router#show clock");

        let consumed = buffer.take_match(&set).unwrap();
        assert_eq!(consumed.before(), b"router");
        assert_eq!(consumed.matched(), b"#");
        assert_eq!(buffer.as_slice(), b"show clock");
    }

    #[test]
    fn test_trim_keeps_tail() {
        let mut buffer = PatternBuffer::new(10);
        buffer.extend(&[b'x'; 100]);
        buffer.extend(b"\nrouter#");
        buffer.trim();

        assert_eq!(buffer.len(), 10);
        assert!(buffer.as_slice().ends_with(b"router#"));
    }

    #[test]
    fn test_take_clears_buffer() {
        let mut buffer = PatternBuffer::new(100);
        buffer.extend(b"test data");
        assert_eq!(&buffer.take()[..], b"test data");
        assert!(buffer.is_empty());
    }
}
