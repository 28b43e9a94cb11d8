//! Syntax tree for grammar declarations
//!
//! The declaration language is a small command-shaped script syntax:
//!
//! ```text
//! Stage [Name] {
//!     Int Retries
//!     Int Timeout
//! }
//! ```
//!
//! The parser produces a faithful tree of what was written (statements,
//! pipelines, command elements, nested script blocks). It does not decide
//! whether a statement is a keyword or a property definition; that is the
//! classifier's job (see [`crate::grammar`]).

use serde::{Deserialize, Serialize};

use crate::value::ScriptBlock;

// =============================================================================
// SPANS
// =============================================================================

/// Byte range inside the source text a node was parsed from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Span {
    /// Byte offset of start
    pub start: usize,
    /// Byte offset of end
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Create a span covering two spans
    pub fn merge(a: Span, b: Span) -> Span {
        Span {
            start: a.start.min(b.start),
            end: a.end.max(b.end),
        }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

// =============================================================================
// SCRIPT BLOCKS
// =============================================================================

/// A `{ ... }` block (or the whole declaration source)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptBlockAst {
    /// `begin { }` block, if present
    pub begin_block: Option<NamedBlockAst>,
    /// `process { }` block, if present
    pub process_block: Option<NamedBlockAst>,
    /// The end block: either an explicit `end { }` or the unnamed statement list
    pub end_block: NamedBlockAst,
    /// Source text between the braces
    pub text: String,
    pub span: Span,
}

impl ScriptBlockAst {
    /// Statements of the end block
    pub fn statements(&self) -> &[StatementAst] {
        &self.end_block.statements
    }

    pub fn is_empty(&self) -> bool {
        self.begin_block.is_none()
            && self.process_block.is_none()
            && self.end_block.statements.is_empty()
    }

    /// Opaque executable form of this block, as handed to a script host
    pub fn to_script_block(&self) -> ScriptBlock {
        ScriptBlock::new(self.text.trim())
    }
}

/// Kind of a named block inside a script block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NamedBlockKind {
    Begin,
    Process,
    End,
}

impl NamedBlockKind {
    pub fn from_keyword(word: &str) -> Option<Self> {
        if word.eq_ignore_ascii_case("begin") {
            Some(Self::Begin)
        } else if word.eq_ignore_ascii_case("process") {
            Some(Self::Process)
        } else if word.eq_ignore_ascii_case("end") {
            Some(Self::End)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Begin => "begin",
            Self::Process => "process",
            Self::End => "end",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedBlockAst {
    pub kind: NamedBlockKind,
    /// False when written as `end { ... }`, true for a plain statement list
    pub unnamed: bool,
    pub statements: Vec<StatementAst>,
    pub span: Span,
}

// =============================================================================
// STATEMENTS
// =============================================================================

/// A single statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StatementAst {
    /// One or more commands joined by `|`
    Pipeline(PipelineAst),
    /// `if`, `foreach`, `while`, `function`, ... with everything that follows
    /// on the same statement
    Flow {
        keyword: String,
        elements: Vec<CommandElement>,
        span: Span,
    },
    /// `$target = value`
    Assignment {
        target: String,
        value: String,
        span: Span,
    },
}

impl StatementAst {
    pub fn span(&self) -> Span {
        match self {
            StatementAst::Pipeline(p) => p.span,
            StatementAst::Flow { span, .. } | StatementAst::Assignment { span, .. } => *span,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineAst {
    pub elements: Vec<PipelineElement>,
    pub span: Span,
}

/// One stage of a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PipelineElement {
    /// Bareword-led command: `Stage [Name] { ... }`
    Command(CommandAst),
    /// Expression-led stage: `"text"`, `42`, `$x`, `(Get-Thing)`
    Expression(CommandElement),
}

impl PipelineElement {
    pub fn span(&self) -> Span {
        match self {
            PipelineElement::Command(c) => c.span,
            PipelineElement::Expression(e) => e.span(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandAst {
    pub elements: Vec<CommandElement>,
    pub span: Span,
}

impl CommandAst {
    /// Leading bareword (the command name)
    pub fn name(&self) -> &str {
        self.elements.first().map(|e| e.text()).unwrap_or_default()
    }

    /// Trailing script block, when the command ends with one
    pub fn trailing_block(&self) -> Option<&ScriptBlockAst> {
        match self.elements.last() {
            Some(CommandElement::ScriptBlock(block)) => Some(block),
            _ => None,
        }
    }
}

// =============================================================================
// COMMAND ELEMENTS
// =============================================================================

/// A single element of a command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommandElement {
    /// Unquoted word, including bracketed words such as `[Name]`
    Bareword { text: String, span: Span },
    /// `"text"` or `'text'`; `text` is the raw extent including quotes
    Quoted {
        value: String,
        text: String,
        span: Span,
    },
    /// `$name`
    Variable { name: String, text: String, span: Span },
    /// Numeric literal
    Number { text: String, span: Span },
    /// `( ... )`, `@( ... )` or `$( ... )`
    SubExpression { text: String, span: Span },
    /// `@{ ... }`
    Hashtable { text: String, span: Span },
    /// `{ ... }`
    ScriptBlock(Box<ScriptBlockAst>),
}

impl CommandElement {
    /// The element exactly as written
    pub fn text(&self) -> &str {
        match self {
            CommandElement::Bareword { text, .. }
            | CommandElement::Quoted { text, .. }
            | CommandElement::Variable { text, .. }
            | CommandElement::Number { text, .. }
            | CommandElement::SubExpression { text, .. }
            | CommandElement::Hashtable { text, .. } => text,
            CommandElement::ScriptBlock(block) => &block.text,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            CommandElement::Bareword { span, .. }
            | CommandElement::Quoted { span, .. }
            | CommandElement::Variable { span, .. }
            | CommandElement::Number { span, .. }
            | CommandElement::SubExpression { span, .. }
            | CommandElement::Hashtable { span, .. } => *span,
            CommandElement::ScriptBlock(block) => block.span,
        }
    }

    /// Literal token (bareword or quoted string); everything else counts as
    /// an expression
    pub fn is_string_constant(&self) -> bool {
        matches!(
            self,
            CommandElement::Bareword { .. } | CommandElement::Quoted { .. }
        )
    }

    pub fn is_script_block(&self) -> bool {
        matches!(self, CommandElement::ScriptBlock(_))
    }
}
