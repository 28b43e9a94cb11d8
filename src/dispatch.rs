//! Keyword invocation dispatch
//!
//! One invocation runs through a fixed sequence of states:
//!
//! ```text
//! Resolving -> Validating -> Invoking -> Collecting -> Finalizing -> Emitting
//! ```
//!
//! Executable bodies of DSL keywords run inside the keyword's scope, which is
//! always left again (see [`ScopeGuard`]) before a body failure propagates.
//! Bodies may invoke further keywords through the [`KeywordInvoker`] handle
//! they are given, so dispatch is re-entrant; no registry borrow is held
//! while the host runs a body or hook.

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::KeywordConfig;
use crate::error::{HostError, KeywordError, Result};
use crate::host::{KeywordInvoker, ScriptHost};
use crate::keyword::{BodyMode, KeywordDefinition, NameMode};
use crate::registry::{borrow_registry, KeywordRegistry, ScopeGuard};
use crate::value::{FieldMap, NamedArgs, Record, ScriptBlock, Value};

// =============================================================================
// REQUESTS
// =============================================================================

/// Where an invocation appears in the calling script
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationSite {
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub text: String,
}

impl InvocationSite {
    /// Parse `file::line::column::text` metadata. Missing or malformed parts
    /// are left empty (or zero).
    pub fn parse(metadata: &str) -> Self {
        let mut parts = metadata.splitn(4, "::");
        let file = parts.next().unwrap_or_default().to_string();
        let line = parts.next().and_then(|l| l.trim().parse().ok()).unwrap_or(0);
        let column = parts.next().and_then(|c| c.trim().parse().ok()).unwrap_or(0);
        let text = parts.next().unwrap_or_default().to_string();
        Self {
            file,
            line,
            column,
            text,
        }
    }
}

impl fmt::Display for InvocationSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}::{}::{}", self.file, self.line, self.column, self.text)
    }
}

/// A single keyword invocation
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationRequest {
    /// Command name the call was made through
    pub invocation_name: String,
    /// Keyword token to resolve
    pub keyword: String,
    /// Caller-supplied name argument
    pub name: Option<String>,
    /// Script block or property map
    pub body: Value,
    pub site: InvocationSite,
    /// True when the call received pipeline input
    pub expecting_input: bool,
}

impl InvocationRequest {
    pub fn new(keyword: impl Into<String>, body: impl Into<Value>) -> Self {
        let keyword = keyword.into();
        Self {
            invocation_name: keyword.clone(),
            keyword,
            name: None,
            body: body.into(),
            site: InvocationSite::default(),
            expecting_input: false,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Record the command name the call went through
    pub fn invoked_as(mut self, invocation_name: impl Into<String>) -> Self {
        self.invocation_name = invocation_name.into();
        self
    }

    pub fn at(mut self, site: InvocationSite) -> Self {
        self.site = site;
        self
    }

    pub fn with_pipeline_input(mut self) -> Self {
        self.expecting_input = true;
        self
    }
}

// =============================================================================
// DISPATCHER
// =============================================================================

/// Snapshot of the registry state one invocation needs
struct Resolved {
    definition: Arc<KeywordDefinition>,
    path: String,
    is_dsl: bool,
    on_invoking: Option<ScriptBlock>,
    on_invoked: Option<ScriptBlock>,
}

/// Runs keyword invocations against a registry and a script host
pub struct InvocationDispatcher<'a> {
    registry: &'a RefCell<KeywordRegistry>,
    host: &'a dyn ScriptHost,
    config: &'a KeywordConfig,
}

impl<'a> InvocationDispatcher<'a> {
    pub fn new(
        registry: &'a RefCell<KeywordRegistry>,
        host: &'a dyn ScriptHost,
        config: &'a KeywordConfig,
    ) -> Self {
        Self {
            registry,
            host,
            config,
        }
    }

    /// Invoke a keyword, returning everything it emits in order
    pub fn dispatch(&self, request: InvocationRequest) -> Result<Vec<Value>> {
        let resolved = self.resolve(&request.keyword)?;
        self.validate(&resolved, &request)?;

        let definition = &resolved.definition;
        let display_name = request
            .name
            .clone()
            .unwrap_or_else(|| definition.name().to_string());
        debug!(
            keyword = definition.name(),
            file = %request.site.file,
            line = request.site.line,
            column = request.site.column,
            text = %request.site.text,
            name = %display_name,
            "invoking keyword"
        );

        let mut output = Vec::new();

        if let Some(hook) = &resolved.on_invoking {
            let mut args = NamedArgs::new();
            args.insert(
                "Name".to_string(),
                request.name.clone().map(Value::String).unwrap_or(Value::Null),
            );
            output.extend(self.run(hook, &args)?);
        }

        let fields = match (&request.body, definition.body_mode()) {
            (Value::Script(body), BodyMode::ExecutableBody) => self.collect(&resolved, body)?,
            (Value::Map(map), BodyMode::MapBody) => map.clone(),
            _ => return Err(body_mismatch(definition)),
        };

        let record = self.finalize(&resolved, display_name, fields)?;

        match &resolved.on_invoked {
            Some(hook) => {
                let mut args = NamedArgs::new();
                args.insert("InputObject".to_string(), Value::Record(record));
                output.extend(self.run(hook, &args)?);
            }
            None => output.push(Value::Record(record)),
        }

        Ok(output)
    }

    fn resolve(&self, keyword: &str) -> Result<Resolved> {
        let mut registry = borrow_registry(self.registry)?;
        let definition = registry.load_visible(keyword)?;
        let id = definition.id();
        let entry = registry.get(id).ok_or_else(|| KeywordError::NotFound {
            name: keyword.to_string(),
        })?;
        let on_invoking = entry.on_invoking().cloned();
        let on_invoked = entry.on_invoked().cloned();

        Ok(Resolved {
            path: registry
                .keyword_path(id)
                .unwrap_or_else(|| definition.name().to_string()),
            is_dsl: registry.is_dsl_keyword(id),
            definition,
            on_invoking,
            on_invoked,
        })
    }

    fn validate(&self, resolved: &Resolved, request: &InvocationRequest) -> Result<()> {
        let definition = &resolved.definition;
        let command = &self.config.dispatcher.command;

        if self.is_direct_call(&request.invocation_name) {
            return Err(KeywordError::invalid_operation(format!(
                "The {} command is reserved for keyword use only. Do not invoke it directly. Invoke it using keyword bindings instead.",
                command
            )));
        }

        if request.expecting_input {
            return Err(KeywordError::invalid_operation(
                "The input object cannot be bound to any parameters for the keyword because keywords do not take pipeline input",
            ));
        }

        let body_mode = match &request.body {
            Value::Script(_) => BodyMode::ExecutableBody,
            Value::Map(_) => BodyMode::MapBody,
            other => {
                return Err(KeywordError::UnsupportedBody {
                    keyword: definition.name().to_string(),
                    message: format!(
                        "Cannot convert '{}' to either of the types 'ScriptBlock' or 'Hashtable' that are required for the keyword body.",
                        other
                    ),
                })
            }
        };
        if body_mode != definition.body_mode() {
            return Err(body_mismatch(definition));
        }

        let visible = self
            .registry
            .try_borrow()
            .map(|r| r.is_visible(definition.id()))
            .unwrap_or(false);
        if !visible {
            return Err(KeywordError::invalid_operation(format!(
                "keyword '{}' is not visible in the current scope",
                definition.name()
            )));
        }

        let has_name = request.name.as_deref().is_some_and(|n| !n.is_empty());
        match definition.name_mode() {
            NameMode::NameRequired if !has_name => {
                return Err(invalid_argument(definition, "a name is required"));
            }
            NameMode::NoName if has_name => {
                return Err(invalid_argument(definition, "the keyword does not take a name"));
            }
            _ => {}
        }

        if let Value::Map(map) = &request.body {
            if let Some(unknown) = map.keys().find(|k| definition.property(k).is_none()) {
                return Err(invalid_argument(
                    definition,
                    &format!("'{}' is not a property of this keyword", unknown),
                ));
            }
            let missing = definition
                .properties()
                .iter()
                .find(|p| p.required && !map.keys().any(|k| k.eq_ignore_ascii_case(&p.name)));
            if let Some(property) = missing {
                return Err(invalid_argument(
                    definition,
                    &format!("required property '{}' is missing", property.name),
                ));
            }
        }

        Ok(())
    }

    /// Direct calls name the dispatcher command itself, optionally qualified
    /// with its module (`Module\Command`)
    fn is_direct_call(&self, invocation_name: &str) -> bool {
        let dispatcher = &self.config.dispatcher;
        let unqualified = match invocation_name.split_once('\\') {
            Some((module, rest)) if module.eq_ignore_ascii_case(&dispatcher.module) => rest,
            Some(_) => return false,
            None => invocation_name,
        };
        unqualified.eq_ignore_ascii_case(&dispatcher.command)
    }

    /// Run an executable body and key its output items into an ordered map
    fn collect(&self, resolved: &Resolved, body: &ScriptBlock) -> Result<FieldMap> {
        let guard = if resolved.is_dsl {
            Some(ScopeGuard::enter(self.registry, resolved.definition.id())?)
        } else {
            None
        };

        let result = self.run(body, &NamedArgs::new());
        let released = match guard {
            Some(mut guard) => guard.release().map(|_| ()),
            None => Ok(()),
        };
        let items = result?;
        released?;

        let mut collected = Record::new();
        for item in items {
            let key = self.item_key(&item);
            collected.insert(key, item);
        }
        Ok(collected.fields)
    }

    /// Record key of a produced item: its `Name` field, else its type tag
    fn item_key(&self, item: &Value) -> String {
        match item.field(&self.config.output.name_field) {
            Some(Value::String(name)) => name.clone(),
            Some(Value::Null) | None => item.type_name().to_string(),
            Some(other) => other.to_string(),
        }
    }

    /// Assemble the output record. Body keys that collide with the name or
    /// produced-by field are rejected rather than overwritten.
    fn finalize(&self, resolved: &Resolved, name: String, fields: FieldMap) -> Result<Record> {
        let output = &self.config.output;
        let reserved = [&output.name_field, &output.produced_by_field];
        if let Some(key) = fields
            .keys()
            .find(|k| reserved.iter().any(|r| k.eq_ignore_ascii_case(r.as_str())))
        {
            return Err(invalid_argument(
                &resolved.definition,
                &format!(
                    "the body produced a field named '{}', which is reserved for the keyword output",
                    key
                ),
            ));
        }

        let mut record = Record::with_type(output.type_name(&resolved.path));
        record.insert(output.name_field.clone(), Value::String(name));
        for (key, value) in fields {
            record.insert(key, value);
        }
        record.insert(
            output.produced_by_field.clone(),
            Value::String(resolved.path.clone()),
        );
        Ok(record)
    }

    fn run(&self, block: &ScriptBlock, args: &NamedArgs) -> Result<Vec<Value>> {
        self.host.execute(block, args, self).map_err(host_failure)
    }
}

impl KeywordInvoker for InvocationDispatcher<'_> {
    fn invoke(&self, request: InvocationRequest) -> Result<Vec<Value>> {
        self.dispatch(request)
    }
}

/// Nested keyword failures surface unchanged; other host failures are wrapped
fn host_failure(error: HostError) -> KeywordError {
    match error {
        HostError::Keyword(inner) => *inner,
        other => KeywordError::Host(other),
    }
}

fn body_mismatch(definition: &KeywordDefinition) -> KeywordError {
    let expected = match definition.body_mode() {
        BodyMode::MapBody => "a property map (hashtable)",
        BodyMode::ExecutableBody => "a script block",
    };
    KeywordError::UnsupportedBody {
        keyword: definition.name().to_string(),
        message: format!(
            "the {} body of this keyword must be {}",
            definition.body_mode(),
            expected
        ),
    }
}

fn invalid_argument(definition: &KeywordDefinition, message: &str) -> KeywordError {
    KeywordError::InvalidArgument {
        keyword: definition.name().to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_site_parse() {
        let site = InvocationSite::parse("build.ps1::12::5::Stage build @{ a::b }");
        assert_eq!(site.file, "build.ps1");
        assert_eq!(site.line, 12);
        assert_eq!(site.column, 5);
        assert_eq!(site.text, "Stage build @{ a::b }");
        assert_eq!(site.to_string(), "build.ps1::12::5::Stage build @{ a::b }");
    }

    #[test]
    fn test_site_parse_partial() {
        let site = InvocationSite::parse("script.ps1::x");
        assert_eq!(site.file, "script.ps1");
        assert_eq!(site.line, 0);
        assert_eq!(site.text, "");
    }

    #[test]
    fn test_request_builder() {
        let request = InvocationRequest::new("Stage", ScriptBlock::new(""))
            .named("build")
            .invoked_as("Invoke-Keyword")
            .with_pipeline_input();
        assert_eq!(request.keyword, "Stage");
        assert_eq!(request.invocation_name, "Invoke-Keyword");
        assert_eq!(request.name.as_deref(), Some("build"));
        assert!(request.expecting_input);
    }

    #[test]
    fn test_host_failure_unwraps_nested_keyword_errors() {
        let nested = HostError::from(KeywordError::NotFound {
            name: "Item".to_string(),
        });
        assert!(matches!(host_failure(nested), KeywordError::NotFound { .. }));
        assert!(matches!(
            host_failure(HostError::failed("boom")),
            KeywordError::Host(_)
        ));
    }
}
