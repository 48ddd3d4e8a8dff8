//! Channel layer for pattern matching over session output.
//!
//! This module handles the interactive side of a session: escape
//! stripping, the sliding match window and waits that race several
//! patterns against end-of-stream and the idle timeout.

mod buffer;
mod expect;
mod patterns;

pub use buffer::{Consumed, PatternBuffer};
pub use expect::{ExpectChannel, Expectation, LINE_ENDING};
pub use patterns::{PatternMatch, PatternSet, PromptMatcher};
