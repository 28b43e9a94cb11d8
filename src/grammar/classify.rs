//! Statement classification
//!
//! Every statement in a grammar declaration must be a single command in one
//! of two shapes:
//!
//! ```text
//! Keyword [Name] { ... }     keyword definition (trailing script block)
//! Type [Property]            property definition
//! ```
//!
//! [`statement_shape`] decides which shape a statement has (or rejects it);
//! the validator then applies the per-shape rules and produces the classified
//! [`GrammarBlock`].

use serde::Serialize;

use crate::ast::{CommandAst, PipelineElement, ScriptBlockAst, Span, StatementAst};
use crate::error::SyntaxError;
use crate::keyword::{NameMode, TypeHandle};

pub(crate) const FORMAT_MESSAGE: &str = "All commands used in a domain-specific language definition must be in one of two formats: '<CommandName> [Name] {...}' or '<Type> [<PropertyName>]'.";

// =============================================================================
// CLASSIFIED GRAMMAR
// =============================================================================

/// A validated block: either all keyword definitions or all properties
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct GrammarBlock {
    pub statements: Vec<GrammarStatement>,
    pub span: Span,
}

impl GrammarBlock {
    pub fn keywords(&self) -> impl Iterator<Item = &KeywordDecl> {
        self.statements.iter().filter_map(|s| match s {
            GrammarStatement::Keyword(k) => Some(k),
            GrammarStatement::Property(_) => None,
        })
    }

    pub fn properties(&self) -> impl Iterator<Item = &PropertyDecl> {
        self.statements.iter().filter_map(|s| match s {
            GrammarStatement::Property(p) => Some(p),
            GrammarStatement::Keyword(_) => None,
        })
    }

    /// True when the block declares a property map
    pub fn is_property_block(&self) -> bool {
        matches!(self.statements.first(), Some(GrammarStatement::Property(_)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum GrammarStatement {
    Keyword(KeywordDecl),
    Property(PropertyDecl),
}

/// `Name [Name] { body }`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeywordDecl {
    pub name: String,
    pub name_mode: NameMode,
    pub body: GrammarBlock,
    pub span: Span,
}

impl KeywordDecl {
    /// Number of keyword declarations in this subtree, including this one
    pub fn keyword_count(&self) -> usize {
        1 + self.body.keywords().map(|k| k.keyword_count()).sum::<usize>()
    }
}

/// `Type Property` or `Type [Property]`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyDecl {
    pub name: String,
    pub required: bool,
    pub type_handle: TypeHandle,
    pub span: Span,
}

// =============================================================================
// SHAPES
// =============================================================================

/// Raw shape of a single declaration statement
#[derive(Debug, Clone, Copy)]
pub(crate) enum StatementShape<'a> {
    Keyword {
        command: &'a CommandAst,
        body: &'a ScriptBlockAst,
    },
    Property {
        command: &'a CommandAst,
    },
}

/// Decide the shape of a statement, rejecting anything that is not a single
/// two- or three-element command
pub(crate) fn statement_shape(stmt: &StatementAst) -> Result<StatementShape<'_>, SyntaxError> {
    let pipeline = match stmt {
        StatementAst::Pipeline(pipeline) => pipeline,
        other => {
            return Err(SyntaxError::new(
                FORMAT_MESSAGE,
                statement_text(other),
                other.span(),
            ))
        }
    };

    if pipeline.elements.len() > 1 {
        return Err(SyntaxError::new(
            "Pipelines are not supported in domain-specific language definitions.",
            statement_text(stmt),
            pipeline.span,
        ));
    }

    let command = match pipeline.elements.first() {
        Some(PipelineElement::Command(command)) => command,
        Some(PipelineElement::Expression(expr)) => {
            return Err(SyntaxError::new(FORMAT_MESSAGE, expr.text(), expr.span()))
        }
        None => return Err(SyntaxError::new(FORMAT_MESSAGE, "", pipeline.span)),
    };

    if !(2..=3).contains(&command.elements.len()) {
        return Err(SyntaxError::new(
            FORMAT_MESSAGE,
            command_text(command),
            command.span,
        ));
    }

    Ok(match command.trailing_block() {
        Some(body) => StatementShape::Keyword { command, body },
        None => StatementShape::Property { command },
    })
}

/// Source-like rendering of a command, used as the offending node text
pub(crate) fn command_text(command: &CommandAst) -> String {
    command
        .elements
        .iter()
        .map(|e| {
            if e.is_script_block() {
                format!("{{{}}}", e.text())
            } else {
                e.text().to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn statement_text(stmt: &StatementAst) -> String {
    match stmt {
        StatementAst::Pipeline(pipeline) => pipeline
            .elements
            .iter()
            .map(|e| match e {
                PipelineElement::Command(c) => command_text(c),
                PipelineElement::Expression(x) => x.text().to_string(),
            })
            .collect::<Vec<_>>()
            .join(" | "),
        StatementAst::Flow {
            keyword, elements, ..
        } => {
            let mut parts = vec![keyword.clone()];
            parts.extend(elements.iter().map(|e| e.text().to_string()));
            parts.join(" ")
        }
        StatementAst::Assignment { target, value, .. } => format!("${} = {}", target, value),
    }
}
