//! Parser for grammar declaration scripts
//!
//! Produces a raw [`ScriptBlockAst`]: every statement is kept as written
//! (pipelines, control flow, assignments), every command element keeps its
//! source text and byte span. Whether a statement is a keyword or property
//! definition is decided later by the grammar classifier, which is why this
//! parser accepts far more than a valid grammar.
//!
//! ## Lexical rules
//!
//! ```text
//! statement   := assignment | pipeline          (ends at newline, ';' or '}')
//! pipeline    := element+ ( '|' element+ )*
//! element     := '{' statements '}' | "..." | '...' | $name | $( ... )
//!              | @{ ... } | @( ... ) | ( ... ) | number | bareword
//! comment     := '#' to end of line
//! ```
//!
//! A backtick at the end of a line continues the statement on the next line.

use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, take_while, take_while1},
    character::complete::{anychar, char, digit1, multispace0, multispace1, none_of, one_of},
    combinator::{cut, eof, not, opt, peek, recognize, value, verify},
    error::{context, VerboseError, VerboseErrorKind},
    multi::{fold_many0, many0_count},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};

use crate::ast::*;
use crate::error::SyntaxError;

type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

/// Statement-leading words that introduce control flow rather than a command
const FLOW_KEYWORDS: &[&str] = &[
    "if", "elseif", "else", "foreach", "for", "while", "do", "until", "switch", "try", "catch",
    "finally", "trap", "function", "filter", "workflow", "configuration", "return", "break",
    "continue", "throw", "exit", "param",
];

const UNCLOSED_GROUP: &str = "Missing closing delimiter";

// ============================================================================
// Public API
// ============================================================================

/// Parse a declaration script into a syntax tree
///
/// The returned block spans the whole source; its `text` is the source itself.
pub fn parse_script_block(source: &str) -> Result<ScriptBlockAst, SyntaxError> {
    match script_body(source, source) {
        Ok((rest, block)) => {
            if rest.is_empty() {
                Ok(block)
            } else {
                Err(to_syntax_error(
                    source,
                    VerboseError {
                        errors: vec![(rest, VerboseErrorKind::Context("Unexpected token"))],
                    },
                ))
            }
        }
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(to_syntax_error(source, e)),
        Err(nom::Err::Incomplete(_)) => Err(SyntaxError::new(
            "Incomplete input",
            "",
            Span::new(source.len(), source.len()),
        )
        .locate(source)),
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn offset(src: &str, input: &str) -> usize {
    src.len() - input.len()
}

fn consumed_text<'a>(input: &'a str, rest: &'a str) -> &'a str {
    &input[..input.len() - rest.len()]
}

fn failure<'a>(input: &'a str, message: &'static str) -> nom::Err<VerboseError<&'a str>> {
    nom::Err::Failure(VerboseError {
        errors: vec![(input, VerboseErrorKind::Context(message))],
    })
}

fn to_syntax_error(src: &str, e: VerboseError<&str>) -> SyntaxError {
    let message = e
        .errors
        .iter()
        .find_map(|(_, kind)| match kind {
            VerboseErrorKind::Context(c) => Some(*c),
            _ => None,
        })
        .unwrap_or("Unexpected token");
    let at = e.errors.first().map(|(i, _)| *i).unwrap_or("");
    let start = offset(src, at);
    let node = at.lines().next().unwrap_or("").trim_end();
    SyntaxError::new(message, node, Span::new(start, start + node.len())).locate(src)
}

/// Spaces, tabs and backtick line continuations
fn inline_ws(input: &str) -> PResult<&str> {
    recognize(many0_count(alt((
        take_while1(|c: char| c == ' ' || c == '\t' || c == '\r'),
        tag("`\r\n"),
        tag("`\n"),
    ))))(input)
}

/// `#` to end of line
fn comment(input: &str) -> PResult<&str> {
    recognize(pair(char('#'), take_while(|c: char| c != '\n')))(input)
}

/// Whitespace, newlines, `;` and comments between statements
fn separators(input: &str) -> PResult<&str> {
    recognize(many0_count(alt((multispace1, tag(";"), comment))))(input)
}

fn at_statement_end(input: &str) -> bool {
    matches!(
        input.chars().next(),
        None | Some('\n') | Some(';') | Some('}') | Some('#')
    )
}

fn at_element_end(input: &str) -> bool {
    at_statement_end(input) || input.starts_with('|')
}

fn is_bareword_char(c: char) -> bool {
    !c.is_whitespace() && !matches!(c, '{' | '}' | '(' | ')' | ';' | '|' | '"' | '\'')
}

fn is_variable_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == ':' || c == '?'
}

// ============================================================================
// Blocks and statements
// ============================================================================

fn script_body<'a>(input: &'a str, src: &'a str) -> PResult<'a, ScriptBlockAst> {
    let start = offset(src, input);
    let (rest, statements) = statement_list(input, src)?;
    let span = Span::new(start, offset(src, rest));
    let block = assemble_block(statements, consumed_text(input, rest), span, input)?;
    Ok((rest, block))
}

fn statement_list<'a>(input: &'a str, src: &'a str) -> PResult<'a, Vec<StatementAst>> {
    let mut statements = Vec::new();
    let (mut rest, _) = separators(input)?;
    while !rest.is_empty() && !rest.starts_with('}') {
        let (after, stmt) = statement(rest, src)?;
        statements.push(stmt);
        let (after, _) = inline_ws(after)?;
        if !at_statement_end(after) {
            return Err(failure(after, "Unexpected token"));
        }
        let (next, _) = separators(after)?;
        rest = next;
    }
    Ok((rest, statements))
}

fn statement<'a>(input: &'a str, src: &'a str) -> PResult<'a, StatementAst> {
    match assignment(input, src) {
        Ok(result) => return Ok(result),
        Err(nom::Err::Error(_)) => {}
        Err(e) => return Err(e),
    }

    let (rest, pipeline) = pipeline(input, src)?;
    Ok((rest, classify_flow(pipeline)))
}

/// Re-tag a single-command pipeline led by a control-flow word
fn classify_flow(pipeline: PipelineAst) -> StatementAst {
    let is_flow = pipeline.elements.len() == 1
        && match &pipeline.elements[0] {
            PipelineElement::Command(command) => FLOW_KEYWORDS
                .iter()
                .any(|k| k.eq_ignore_ascii_case(command.name())),
            PipelineElement::Expression(_) => false,
        };

    if !is_flow {
        return StatementAst::Pipeline(pipeline);
    }

    let span = pipeline.span;
    match pipeline.elements.into_iter().next() {
        Some(PipelineElement::Command(command)) => {
            let mut elements = command.elements.into_iter();
            let keyword = elements
                .next()
                .map(|e| e.text().to_string())
                .unwrap_or_default();
            StatementAst::Flow {
                keyword,
                elements: elements.collect(),
                span,
            }
        }
        // unreachable given `is_flow`, but keep the pipeline rather than panic
        Some(other) => StatementAst::Pipeline(PipelineAst {
            elements: vec![other],
            span,
        }),
        None => StatementAst::Pipeline(PipelineAst {
            elements: Vec::new(),
            span,
        }),
    }
}

fn assignment<'a>(input: &'a str, src: &'a str) -> PResult<'a, StatementAst> {
    let start = offset(src, input);
    let (rest, target) = variable(input, src)?;
    let (rest, _) = tuple((inline_ws, char('='), not(char('='))))(rest)?;
    let (value_start, _) = inline_ws(rest)?;
    let (rest, elements) = command_elements(value_start, src)?;
    if elements.is_empty() {
        return Err(failure(value_start, "Missing value in assignment"));
    }
    let value = consumed_text(value_start, rest).trim_end();
    let end = start + (input.len() - value_start.len()) + value.len();

    let target = match target {
        CommandElement::Variable { name, .. } => name,
        other => other.text().to_string(),
    };

    Ok((
        rest,
        StatementAst::Assignment {
            target,
            value: value.to_string(),
            span: Span::new(start, end),
        },
    ))
}

fn pipeline<'a>(input: &'a str, src: &'a str) -> PResult<'a, PipelineAst> {
    let start = offset(src, input);
    let (mut rest, first) = pipeline_element(input, src)?;
    let mut end = first.span().end;
    let mut elements = vec![first];

    while let (next, Some(_)) = opt(tuple((inline_ws, char('|'), multispace0)))(rest)? {
        let (after, element) = cut(context("Missing pipeline element", |i| {
            pipeline_element(i, src)
        }))(next)?;
        end = element.span().end;
        elements.push(element);
        rest = after;
    }

    Ok((
        rest,
        PipelineAst {
            elements,
            span: Span::new(start, end),
        },
    ))
}

fn pipeline_element<'a>(input: &'a str, src: &'a str) -> PResult<'a, PipelineElement> {
    let start = offset(src, input);
    let (rest, first) = element(input, src)?;
    if !matches!(first, CommandElement::Bareword { .. }) {
        return Ok((rest, PipelineElement::Expression(first)));
    }

    let (rest, more) = command_elements(rest, src)?;
    let end = more.last().unwrap_or(&first).span().end;
    let mut elements = Vec::with_capacity(more.len() + 1);
    elements.push(first);
    elements.extend(more);

    Ok((
        rest,
        PipelineElement::Command(CommandAst {
            elements,
            span: Span::new(start, end),
        }),
    ))
}

/// Elements up to the end of the current pipeline stage
fn command_elements<'a>(input: &'a str, src: &'a str) -> PResult<'a, Vec<CommandElement>> {
    let mut elements = Vec::new();
    let mut rest = input;
    loop {
        let (next, _) = inline_ws(rest)?;
        if at_element_end(next) {
            return Ok((rest, elements));
        }
        let (after, element) = element(next, src)?;
        elements.push(element);
        rest = after;
    }
}

/// Fold `begin { }` / `process { }` / `end { }` statements into named blocks
fn assemble_block<'a>(
    statements: Vec<StatementAst>,
    text: &str,
    span: Span,
    at: &'a str,
) -> Result<ScriptBlockAst, nom::Err<VerboseError<&'a str>>> {
    let mut begin_block = None;
    let mut process_block = None;
    let mut end_block: Option<NamedBlockAst> = None;
    let mut unnamed = Vec::new();

    for stmt in statements {
        match named_block(&stmt) {
            Some(named) => {
                let slot = match named.kind {
                    NamedBlockKind::Begin => &mut begin_block,
                    NamedBlockKind::Process => &mut process_block,
                    NamedBlockKind::End => &mut end_block,
                };
                if slot.is_some() {
                    return Err(failure(at, "Duplicate named block"));
                }
                *slot = Some(named);
            }
            None => unnamed.push(stmt),
        }
    }

    let has_named = begin_block.is_some() || process_block.is_some() || end_block.is_some();
    if has_named && !unnamed.is_empty() {
        return Err(failure(at, "Unexpected statement outside of named blocks"));
    }

    let end_block = end_block.unwrap_or(NamedBlockAst {
        kind: NamedBlockKind::End,
        unnamed: true,
        statements: unnamed,
        span,
    });

    Ok(ScriptBlockAst {
        begin_block,
        process_block,
        end_block,
        text: text.to_string(),
        span,
    })
}

fn named_block(stmt: &StatementAst) -> Option<NamedBlockAst> {
    let StatementAst::Pipeline(pipeline) = stmt else {
        return None;
    };
    let [PipelineElement::Command(command)] = pipeline.elements.as_slice() else {
        return None;
    };
    let [CommandElement::Bareword { text, .. }, CommandElement::ScriptBlock(body)] =
        command.elements.as_slice()
    else {
        return None;
    };
    let kind = NamedBlockKind::from_keyword(text)?;
    Some(NamedBlockAst {
        kind,
        unnamed: false,
        statements: body.end_block.statements.clone(),
        span: command.span,
    })
}

// ============================================================================
// Command elements
// ============================================================================

/// One command element. Callers only ask for an element where one must
/// start, so a mismatch here is fatal.
fn element<'a>(input: &'a str, src: &'a str) -> PResult<'a, CommandElement> {
    cut(alt((
        |i| script_block_element(i, src),
        |i| quoted(i, src),
        |i| group(i, src),
        |i| variable(i, src),
        stray_sigil,
        |i| number(i, src),
        |i| bareword(i, src),
    )))(input)
}

fn script_block_element<'a>(input: &'a str, src: &'a str) -> PResult<'a, CommandElement> {
    let start = offset(src, input);
    let (inner, _) = char('{')(input)?;
    let (rest, statements) = statement_list(inner, src)?;
    let (rest, _) = cut(context("Missing closing '}' in statement block", char('}')))(rest)?;
    let inner_text = &inner[..inner.len() - rest.len() - 1];
    let span = Span::new(start, offset(src, rest));
    let block = assemble_block(statements, inner_text, span, input)?;
    Ok((rest, CommandElement::ScriptBlock(Box::new(block))))
}

fn quoted<'a>(input: &'a str, src: &'a str) -> PResult<'a, CommandElement> {
    let start = offset(src, input);
    let (_, _) = peek(one_of("\"'"))(input)?;
    let (rest, value) = cut(context("The string is missing the terminator", string_literal))(
        input,
    )?;
    let text = consumed_text(input, rest);
    Ok((
        rest,
        CommandElement::Quoted {
            value,
            text: text.to_string(),
            span: Span::new(start, start + text.len()),
        },
    ))
}

/// A double- or single-quoted string, returning its unescaped value
///
/// Inside double quotes a backtick escapes the next character; in both forms
/// a doubled quote stands for one quote character.
fn string_literal(input: &str) -> PResult<String> {
    alt((
        delimited(
            char('"'),
            fold_many0(double_quoted_char, String::new, push_char),
            char('"'),
        ),
        delimited(
            char('\''),
            fold_many0(single_quoted_char, String::new, push_char),
            char('\''),
        ),
    ))(input)
}

fn double_quoted_char(input: &str) -> PResult<char> {
    alt((
        none_of("\"`"),
        value('"', tag("\"\"")),
        preceded(
            char('`'),
            alt((
                value('\n', char('n')),
                value('\t', char('t')),
                value('\r', char('r')),
                value('\0', char('0')),
                anychar,
            )),
        ),
    ))(input)
}

fn single_quoted_char(input: &str) -> PResult<char> {
    alt((none_of("'"), value('\'', tag("''"))))(input)
}

fn push_char(mut s: String, c: char) -> String {
    s.push(c);
    s
}

/// `( … )`, `$( … )`, `@( … )` and `@{ … }`, captured verbatim
fn group<'a>(input: &'a str, src: &'a str) -> PResult<'a, CommandElement> {
    let start = offset(src, input);
    let (rest, hashtable) = alt((
        value(true, recognize(preceded(char('@'), braced))),
        value(false, recognize(preceded(opt(one_of("$@")), parenthesized))),
    ))(input)?;
    let text = consumed_text(input, rest).to_string();
    let span = Span::new(start, start + text.len());
    let element = if hashtable {
        CommandElement::Hashtable { text, span }
    } else {
        CommandElement::SubExpression { text, span }
    };
    Ok((rest, element))
}

fn parenthesized(input: &str) -> PResult<&str> {
    recognize(delimited(
        char('('),
        group_body,
        cut(context(UNCLOSED_GROUP, char(')'))),
    ))(input)
}

fn braced(input: &str) -> PResult<&str> {
    recognize(delimited(
        char('{'),
        group_body,
        cut(context(UNCLOSED_GROUP, char('}'))),
    ))(input)
}

fn bracketed(input: &str) -> PResult<&str> {
    recognize(delimited(
        char('['),
        group_body,
        cut(context(UNCLOSED_GROUP, char(']'))),
    ))(input)
}

/// Group contents: nested groups and complete strings are skipped whole; a
/// quote with no partner is plain text, as in `(it's)`
fn group_body(input: &str) -> PResult<()> {
    value(
        (),
        many0_count(alt((
            value((), is_not("(){}[]\"'")),
            value((), string_literal),
            value((), parenthesized),
            value((), braced),
            value((), bracketed),
            value((), one_of("\"'")),
        ))),
    )(input)
}

fn variable<'a>(input: &'a str, src: &'a str) -> PResult<'a, CommandElement> {
    let start = offset(src, input);
    let (rest, name) = preceded(char('$'), take_while1(is_variable_char))(input)?;
    let text = consumed_text(input, rest);
    Ok((
        rest,
        CommandElement::Variable {
            name: name.to_string(),
            text: text.to_string(),
            span: Span::new(start, start + text.len()),
        },
    ))
}

/// A `$` that starts neither a variable nor a sub-expression
fn stray_sigil(input: &str) -> PResult<CommandElement> {
    let (_, _) = char('$')(input)?;
    Err(failure(input, "Invalid variable reference"))
}

/// Numbers must end at whitespace or the end of the element; `3rd` and
/// `1.2.3` are words
fn number<'a>(input: &'a str, src: &'a str) -> PResult<'a, CommandElement> {
    let start = offset(src, input);
    let (rest, text) = terminated(
        recognize(tuple((
            opt(char('-')),
            digit1,
            opt(pair(char('.'), digit1)),
        ))),
        peek(alt((
            eof,
            recognize(one_of(" \t\r\n;}|#")),
            tag("`\n"),
            tag("`\r\n"),
        ))),
    )(input)?;
    Ok((
        rest,
        CommandElement::Number {
            text: text.to_string(),
            span: Span::new(start, start + text.len()),
        },
    ))
}

fn bareword<'a>(input: &'a str, src: &'a str) -> PResult<'a, CommandElement> {
    let start = offset(src, input);
    let (rest, text) = verify(take_while1(is_bareword_char), |t: &str| !t.starts_with('#'))(
        input,
    )?;
    Ok((
        rest,
        CommandElement::Bareword {
            text: text.to_string(),
            span: Span::new(start, start + text.len()),
        },
    ))
}

// ============================================================================
// Tests
// ============================================================================
