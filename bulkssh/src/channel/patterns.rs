//! Pattern matching utilities for prompt detection.

use regex::bytes::Regex;

/// Trait for prompt matching - regex by default, extensible for custom parsers.
pub trait PromptMatcher: Send + Sync {
    /// Byte span `(start, end)` of the first match, or None.
    fn find_span(&self, data: &[u8]) -> Option<(usize, usize)>;

    /// Check if the data matches the pattern.
    fn is_match(&self, data: &[u8]) -> bool {
        self.find_span(data).is_some()
    }
}

/// Regex-based prompt matcher (the default implementation).
impl PromptMatcher for Regex {
    fn find_span(&self, data: &[u8]) -> Option<(usize, usize)> {
        self.find(data).map(|m| (m.start(), m.end()))
    }
}

/// Where a pattern of a [`PatternSet`] matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternMatch {
    /// Position of the pattern in its set.
    pub index: usize,
    pub start: usize,
    pub end: usize,
}

/// Ordered list of alternatives waited for together.
#[derive(Default)]
pub struct PatternSet<'a> {
    matchers: Vec<&'a dyn PromptMatcher>,
}

impl<'a> PatternSet<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an alternative; its index is the current length.
    pub fn with(mut self, matcher: &'a dyn PromptMatcher) -> Self {
        self.matchers.push(matcher);
        self
    }

    /// The match starting earliest in `data`.
    ///
    /// When two patterns match at the same offset, the one listed first wins.
    pub fn earliest(&self, data: &[u8]) -> Option<PatternMatch> {
        let mut best: Option<PatternMatch> = None;
        for (index, matcher) in self.matchers.iter().enumerate() {
            if let Some((start, end)) = matcher.find_span(data) {
                if best.is_none_or(|b| start < b.start) {
                    best = Some(PatternMatch { index, start, end });
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regex_prompt_matcher() {
        let pattern = Regex::new(r"router#\s*$").unwrap();
        assert!(pattern.is_match(b"router# "));
        assert!(pattern.is_match(b"some output\nrouter#"));
        assert!(!pattern.is_match(b"router> "));
    }

    #[test]
    fn test_earliest_match_wins() {
        let prompt = Regex::new(r"#").unwrap();
        let confirm = Regex::new(r"\[confirm\]").unwrap();
        let set = PatternSet::new().with(&prompt).with(&confirm);

        let found = set.earliest(b"Proceed? [confirm] router#").unwrap();
        assert_eq!(found.index, 1);
        assert_eq!(&b"Proceed? [confirm] router#"[found.start..found.end], b"[confirm]");
    }

    #[test]
    fn test_tie_goes_to_first_listed() {
        let a = Regex::new(r"Pass").unwrap();
        let b = Regex::new(r"Password").unwrap();
        let set = PatternSet::new().with(&b).with(&a);

        assert_eq!(set.earliest(b"Password: ").unwrap().index, 0);
    }

    #[test]
    fn test_no_match() {
        let prompt = Regex::new(r"#").unwrap();
        let set = PatternSet::new().with(&prompt);
        assert!(set.earliest(b"Building configuration...").is_none());
    }
}
