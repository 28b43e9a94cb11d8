//! Error types for grammar compilation, registry and dispatch
//!
//! Grammar problems are [`SyntaxError`]s. Everything that can go wrong after
//! a grammar is accepted is a [`KeywordError`]. The `InvalidState` variant is
//! reserved for broken registry invariants (it signals a bug in scope
//! push/pop pairing, never a user mistake).

use std::fmt;

use thiserror::Error;

use crate::ast::Span;
use crate::diagnostics::SourceSpan;

pub type Result<T, E = KeywordError> = std::result::Result<T, E>;

// =============================================================================
// SYNTAX ERRORS
// =============================================================================

/// A grammar declaration violates the declaration rules
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub message: String,
    /// Text of the offending node
    pub node: String,
    pub span: Span,
    /// Resolved line/column, when the declaration source is known
    pub location: Option<SourceSpan>,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, node: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            node: node.into(),
            span,
            location: None,
        }
    }

    /// Attach line/column information computed from the declaration source
    pub fn locate(mut self, source: &str) -> Self {
        self.location = Some(SourceSpan::from_span(source, self.span));
        self
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Syntax error. {}", self.message)?;
        if let Some(location) = &self.location {
            write!(f, " (at {})", location)?;
        }
        Ok(())
    }
}

impl std::error::Error for SyntaxError {}

// =============================================================================
// HOST ERRORS
// =============================================================================

/// Failure reported by a script host collaborator
#[derive(Debug, Error)]
pub enum HostError {
    #[error("{0}")]
    Failed(String),

    #[error("{0} is not a valid type name.")]
    UnknownType(String),

    #[error("binding '{name}' could not be updated: {reason}")]
    Binding { name: String, reason: String },

    /// A nested keyword invocation failed inside a body
    #[error(transparent)]
    Keyword(Box<KeywordError>),
}

impl HostError {
    pub fn failed(message: impl Into<String>) -> Self {
        HostError::Failed(message.into())
    }
}

impl From<KeywordError> for HostError {
    fn from(error: KeywordError) -> Self {
        HostError::Keyword(Box::new(error))
    }
}

// =============================================================================
// KEYWORD ERRORS
// =============================================================================

#[derive(Debug, Error)]
pub enum KeywordError {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    #[error("Unable to find a keyword with name '{name}' in the current scope.")]
    NotFound { name: String },

    #[error("Invalid keyword state: {message}")]
    InvalidState { message: String },

    #[error("Invalid operation: {message}")]
    InvalidOperation { message: String },

    #[error("Unsupported body for keyword '{keyword}': {message}")]
    UnsupportedBody { keyword: String, message: String },

    #[error("Invalid argument for keyword '{keyword}': {message}")]
    InvalidArgument { keyword: String, message: String },

    #[error("Host error: {0}")]
    Host(#[from] HostError),
}

impl KeywordError {
    pub(crate) fn invalid_state(message: impl Into<String>) -> Self {
        KeywordError::InvalidState {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_operation(message: impl Into<String>) -> Self {
        KeywordError::InvalidOperation {
            message: message.into(),
        }
    }

    /// Unwrap host errors that merely carry a nested keyword failure
    pub fn into_root_cause(self) -> KeywordError {
        match self {
            KeywordError::Host(HostError::Keyword(inner)) => inner.into_root_cause(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syntax_error_display_with_location() {
        let source = "Stage {\n  $x\n}";
        let err = SyntaxError::new("Expressions are not permitted.", "$x", Span::new(10, 12))
            .locate(source);
        assert_eq!(
            err.to_string(),
            "Syntax error. Expressions are not permitted. (at line 2, column 3)"
        );
    }

    #[test]
    fn test_root_cause_unwraps_nested_failures() {
        let inner = KeywordError::NotFound {
            name: "Item".to_string(),
        };
        let wrapped = KeywordError::Host(HostError::from(KeywordError::Host(HostError::from(
            inner,
        ))));
        assert!(matches!(
            wrapped.into_root_cause(),
            KeywordError::NotFound { name } if name == "Item"
        ));
    }
}
