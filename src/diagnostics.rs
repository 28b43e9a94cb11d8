//! Source locations for grammar diagnostics
//!
//! The parser tracks byte offsets ([`Span`]); errors shown to grammar authors
//! carry line/column positions ([`SourceSpan`]).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ast::Span;

/// Line/column location of a node inside a grammar declaration (1-based)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpan {
    pub start_line: u32,
    pub start_col: u32,
    pub end_line: u32,
    pub end_col: u32,
}

impl SourceSpan {
    pub fn new(start_line: u32, start_col: u32, end_line: u32, end_col: u32) -> Self {
        Self {
            start_line,
            start_col,
            end_line,
            end_col,
        }
    }

    /// Resolve a byte span against the source it was parsed from
    pub fn from_span(source: &str, span: Span) -> Self {
        let (start_line, start_col) = byte_to_line_col(source, span.start);
        let (end_line, end_col) = byte_to_line_col(source, span.end);
        Self::new(start_line, start_col, end_line, end_col)
    }
}

impl fmt::Display for SourceSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.start_line, self.start_col)
    }
}

/// Convert byte offset to line and column
fn byte_to_line_col(source: &str, offset: usize) -> (u32, u32) {
    let mut line = 1u32;
    let mut col = 1u32;

    for (i, c) in source.char_indices() {
        if i >= offset {
            break;
        }
        if c == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }

    (line, col)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_to_line_col() {
        let source = "Stage {\n  Int Retries\n}";
        assert_eq!(byte_to_line_col(source, 0), (1, 1));
        assert_eq!(byte_to_line_col(source, 6), (1, 7));
        assert_eq!(byte_to_line_col(source, 8), (2, 1));
        assert_eq!(byte_to_line_col(source, 10), (2, 3));
    }

    #[test]
    fn test_from_span_and_display() {
        let source = "Stage {\n  Int Retries\n}";
        let span = SourceSpan::from_span(source, Span::new(10, 21));
        assert_eq!(span, SourceSpan::new(2, 3, 2, 14));
        assert_eq!(span.to_string(), "line 2, column 3");
    }
}
