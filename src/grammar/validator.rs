//! Grammar validation
//!
//! Checks a declaration tree against the keyword/property rules and returns
//! the classified [`GrammarBlock`]. Validation is fail-fast: the first
//! violation is returned and nothing is registered.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::trace;

use super::classify::{
    command_text, statement_shape, GrammarBlock, GrammarStatement, KeywordDecl, PropertyDecl,
    StatementShape,
};
use crate::ast::{CommandAst, ScriptBlockAst};
use crate::config::OutputConfig;
use crate::error::SyntaxError;
use crate::host::{BindingTable, TypeResolver};
use crate::keyword::{NameMode, TypeHandle};

static KEYWORD_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z]+$").unwrap());
static REQUIRED_PROPERTY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\w+$").unwrap());
static OPTIONAL_PROPERTY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\[(\w+)\]$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Keywords,
    Properties,
}

/// Validates grammar declarations for one DSL
pub struct GrammarValidator<'a> {
    dsl_name: &'a str,
    types: &'a dyn TypeResolver,
    bindings: &'a dyn BindingTable,
    dispatcher_command: &'a str,
    /// Record fields the dispatcher fills in itself
    reserved_fields: Vec<String>,
    /// Resolved type tokens, keyed case-insensitively
    type_cache: HashMap<String, TypeHandle>,
}

impl<'a> GrammarValidator<'a> {
    pub fn new(
        dsl_name: &'a str,
        types: &'a dyn TypeResolver,
        bindings: &'a dyn BindingTable,
        dispatcher_command: &'a str,
    ) -> Self {
        let output = OutputConfig::default();
        Self {
            dsl_name,
            types,
            bindings,
            dispatcher_command,
            reserved_fields: vec![output.name_field, output.produced_by_field],
            type_cache: HashMap::new(),
        }
    }

    /// Property names that would collide with fields of the assembled record
    pub fn with_reserved_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reserved_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Validate `block`, declared inside the keyword `parent` (None at the root)
    pub fn validate(
        &mut self,
        block: &ScriptBlockAst,
        parent: Option<&str>,
    ) -> Result<GrammarBlock, SyntaxError> {
        if let Some(begin) = &block.begin_block {
            return Err(SyntaxError::new(
                "Begin blocks are not supported in domain-specific language definitions.",
                "begin",
                begin.span,
            ));
        }
        if let Some(process) = &block.process_block {
            return Err(SyntaxError::new(
                "Process blocks are not supported in domain-specific language definitions.",
                "process",
                process.span,
            ));
        }

        let mut kind: Option<BlockKind> = None;
        let mut keyword_names: Vec<&str> = Vec::new();
        let mut property_names: Vec<String> = Vec::new();
        let mut statements = Vec::new();

        for stmt in block.statements() {
            match statement_shape(stmt)? {
                StatementShape::Keyword { command, body } => {
                    if body.is_empty() {
                        return Err(SyntaxError::new(
                            "Empty script blocks are not permitted in domain-specific language definitions.",
                            "{}",
                            body.span,
                        ));
                    }
                    let leading = &command.elements[..command.elements.len() - 1];
                    if leading.iter().any(|e| !e.is_string_constant()) {
                        return Err(expressions_error(command));
                    }
                    if kind == Some(BlockKind::Properties) {
                        return Err(mixed_error(command));
                    }
                    kind = Some(BlockKind::Keywords);

                    let decl = self.keyword(command, body, parent, &keyword_names)?;
                    keyword_names.push(command.name());
                    statements.push(GrammarStatement::Keyword(decl));
                }
                StatementShape::Property { command } => {
                    if command.elements.iter().any(|e| !e.is_string_constant()) {
                        return Err(expressions_error(command));
                    }
                    if command.elements.len() != 2 {
                        return Err(SyntaxError::new(
                            super::classify::FORMAT_MESSAGE,
                            command_text(command),
                            command.span,
                        ));
                    }

                    let decl = self.property(command)?;
                    if kind == Some(BlockKind::Keywords) {
                        return Err(mixed_error(command));
                    }
                    if parent.is_none() {
                        return Err(SyntaxError::new(
                            "Properties can only be defined inside of a command script block in domain-specific language definitions.",
                            command_text(command),
                            command.span,
                        ));
                    }
                    if property_names
                        .iter()
                        .any(|n| n.eq_ignore_ascii_case(&decl.name))
                    {
                        return Err(SyntaxError::new(
                            "Properties can only be defined once per scriptblock in a domain-specific language definition.",
                            command_text(command),
                            command.span,
                        ));
                    }
                    kind = Some(BlockKind::Properties);

                    property_names.push(decl.name.clone());
                    statements.push(GrammarStatement::Property(decl));
                }
            }
        }

        Ok(GrammarBlock {
            statements,
            span: block.span,
        })
    }

    fn keyword(
        &mut self,
        command: &CommandAst,
        body: &ScriptBlockAst,
        parent: Option<&str>,
        seen: &[&str],
    ) -> Result<KeywordDecl, SyntaxError> {
        let name = command.name();
        let fail = |message: String| SyntaxError::new(message, command_text(command), command.span);

        if !KEYWORD_NAME.is_match(name) {
            return Err(fail(
                "Keyword names can only contain alphabetic characters.".to_string(),
            ));
        }

        if parent.is_some_and(|p| p.eq_ignore_ascii_case(name)) {
            return Err(fail(
                "A keyword name cannot be the same as that of its parent.".to_string(),
            ));
        }

        if parent.is_none() {
            if let Some(binding) = self.bindings.lookup(name) {
                if !binding.points_to(self.dispatcher_command) {
                    return Err(fail(format!(
                        "A conflicting alias by the name of {} already exists in the current scope. The {} domain-specific language requires this alias in order to function properly. The domain-specific language cannot be defined until this alias conflict has been removed.",
                        name, self.dsl_name
                    )));
                }
            }
        }

        let name_mode = match command.elements.len() {
            3 => NameMode::from_token(command.elements[1].text()).ok_or_else(|| {
                fail("When providing the name mode for a keyword, the only valid values are 'Name' (when the name is required) or '[Name]' (when the name is optional).".to_string())
            })?,
            _ => NameMode::NoName,
        };

        if seen.iter().any(|s| s.eq_ignore_ascii_case(name)) {
            return Err(fail(
                "Keywords can only be defined once per scriptblock in a domain-specific language definition.".to_string(),
            ));
        }

        trace!(keyword = name, parent = ?parent, "validating keyword body");
        let body = self.validate(body, Some(name))?;

        Ok(KeywordDecl {
            name: name.to_string(),
            name_mode,
            body,
            span: command.span,
        })
    }

    fn property(&mut self, command: &CommandAst) -> Result<PropertyDecl, SyntaxError> {
        let type_token = command.elements[0].text();
        let type_handle = self.resolve_type(type_token).ok_or_else(|| {
            SyntaxError::new(
                format!("{} is not a valid type name.", type_token),
                command_text(command),
                command.span,
            )
        })?;

        let raw = command.elements[1].text();
        let (name, required) = if let Some(caps) = OPTIONAL_PROPERTY.captures(raw) {
            (caps[1].to_string(), false)
        } else if REQUIRED_PROPERTY.is_match(raw) {
            (raw.to_string(), true)
        } else {
            return Err(SyntaxError::new(
                "Property names can only contain alpha-numeric characters and underscores.",
                command_text(command),
                command.span,
            ));
        };

        if let Some(field) = self
            .reserved_fields
            .iter()
            .find(|f| f.eq_ignore_ascii_case(&name))
        {
            return Err(SyntaxError::new(
                format!(
                    "The property name '{}' is reserved for the keyword output and cannot be declared.",
                    field
                ),
                command_text(command),
                command.span,
            ));
        }

        Ok(PropertyDecl {
            name,
            required,
            type_handle,
            span: command.span,
        })
    }

    fn resolve_type(&mut self, token: &str) -> Option<TypeHandle> {
        let key = token.to_ascii_lowercase();
        if let Some(handle) = self.type_cache.get(&key) {
            return Some(handle.clone());
        }
        let handle = self.types.resolve_type(token).ok()?;
        self.type_cache.insert(key, handle.clone());
        Some(handle)
    }
}

fn expressions_error(command: &CommandAst) -> SyntaxError {
    SyntaxError::new(
        "Expressions are not permitted in domain-specific language definitions.",
        command_text(command),
        command.span,
    )
}

fn mixed_error(command: &CommandAst) -> SyntaxError {
    SyntaxError::new(
        "You cannot define both commands and properties in the same script block in domain-specific language definitions.",
        command_text(command),
        command.span,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{BindingInfo, BuiltinTypes, InMemoryBindings};
    use crate::parser::parse_script_block;

    const DISPATCHER: &str = "Invoke-Keyword";

    fn validate_with(
        source: &str,
        bindings: &InMemoryBindings,
    ) -> Result<GrammarBlock, SyntaxError> {
        let types = BuiltinTypes::new();
        let ast = parse_script_block(source).unwrap();
        GrammarValidator::new("Pipeline", &types, bindings, DISPATCHER).validate(&ast, None)
    }

    fn validate(source: &str) -> Result<GrammarBlock, SyntaxError> {
        validate_with(source, &InMemoryBindings::new())
    }

    fn message(source: &str) -> String {
        validate(source).unwrap_err().message
    }

    #[test]
    fn test_valid_grammar() {
        let grammar = validate("Stage [Name] {\n  Int Retries\n  [Int] [Timeout]\n}").unwrap();
        let stage = grammar.keywords().next().unwrap();
        assert_eq!(stage.name, "Stage");
        assert_eq!(stage.name_mode, NameMode::OptionalName);
        assert!(stage.body.is_property_block());

        let props: Vec<_> = stage.body.properties().collect();
        assert_eq!(props[0].name, "Retries");
        assert!(props[0].required);
        assert_eq!(props[0].type_handle.name, "System.Int32");
        assert_eq!(props[1].name, "Timeout");
        assert!(!props[1].required);
    }

    #[test]
    fn test_nested_keywords() {
        let grammar = validate("Step { Item Name { Detail { String Text } } }").unwrap();
        let step = grammar.keywords().next().unwrap();
        assert_eq!(step.keyword_count(), 3);
        let item = step.body.keywords().next().unwrap();
        assert_eq!(item.name_mode, NameMode::NameRequired);
    }

    #[test]
    fn test_rejects_named_blocks() {
        assert!(message("begin { Setup }").starts_with("Begin blocks"));
        assert!(message("Stage { process { Int A } }").starts_with("Process blocks"));
    }

    #[test]
    fn test_rejects_empty_body() {
        assert!(message("Stage { }").starts_with("Empty script blocks"));
    }

    #[test]
    fn test_rejects_expressions() {
        assert!(message("Stage $mode { Int A }").starts_with("Expressions are not permitted"));
        assert!(message("Stage { Int $x }").starts_with("Expressions are not permitted"));
        assert!(message("Stage (it's) { Int A }").starts_with("Expressions are not permitted"));
    }

    #[test]
    fn test_rejects_bad_names() {
        assert!(message("Stage2 { Int A }").starts_with("Keyword names can only contain"));
        assert!(message("Stage { Stage { Int A } }").contains("same as that of its parent"));
        assert!(message("Stage Title { Int A }").contains("only valid values are 'Name'"));
        assert!(message("Stage { Int Re-tries }").starts_with("Property names can only"));
    }

    #[test]
    fn test_rejects_duplicates() {
        assert!(message("Stage { Int A }\nSTAGE { Int B }")
            .starts_with("Keywords can only be defined once"));
        assert!(message("Stage { Int A; String a }")
            .starts_with("Properties can only be defined once"));
    }

    #[test]
    fn test_rejects_mixing_and_root_properties() {
        assert!(message("Stage { Int A; Sub { Int B } }").starts_with("You cannot define both"));
        assert!(message("Stage { Sub { Int B }; Int A }").starts_with("You cannot define both"));
        assert!(message("Int Retries").starts_with("Properties can only be defined inside"));
    }

    #[test]
    fn test_rejects_reserved_property_names() {
        assert_eq!(
            message("Host { String Name; Int Port }"),
            "The property name 'Name' is reserved for the keyword output and cannot be declared."
        );
        assert!(message("Host { [String] [producedbykeyword] }").contains("'ProducedByKeyword'"));

        let types = BuiltinTypes::new();
        let bindings = InMemoryBindings::new();
        let ast = parse_script_block("Host { String Name; Int Port }").unwrap();
        let grammar = GrammarValidator::new("Pipeline", &types, &bindings, DISPATCHER)
            .with_reserved_fields(["Title", "Source"])
            .validate(&ast, None)
            .unwrap();
        assert_eq!(grammar.keywords().next().unwrap().body.properties().count(), 2);
    }

    #[test]
    fn test_rejects_unknown_type() {
        assert_eq!(message("Stage { Widget A }"), "Widget is not a valid type name.");
    }

    #[test]
    fn test_root_binding_conflict() {
        let mut bindings = InMemoryBindings::new();
        bindings.bind("Stage", BindingInfo::new("Get-Stage")).unwrap();
        let err = validate_with("Stage { Int A }", &bindings).unwrap_err();
        assert!(err.message.starts_with("A conflicting alias by the name of Stage"));
        assert!(err.message.contains("The Pipeline domain-specific language"));

        // a binding that already targets the dispatcher is not a conflict
        let mut bindings = InMemoryBindings::new();
        bindings.bind("Stage", BindingInfo::new(DISPATCHER)).unwrap();
        assert!(validate_with("Stage { Int A }", &bindings).is_ok());
    }

    #[test]
    fn test_display_has_prefix() {
        let err = validate("Stage { }").unwrap_err();
        assert!(err.to_string().starts_with("Syntax error. Empty script blocks"));
    }
}
