//! Host collaborators
//!
//! The keyword core never executes bodies or owns the name-binding table
//! itself. It talks to the embedding host through three narrow traits:
//!
//! - [`ScriptHost`] runs executable bodies and resolves type tokens
//! - [`BindingTable`] maps invocation names to the dispatcher command
//! - [`ModuleExports`] publishes root keywords of module-declared DSLs
//!
//! [`InMemoryBindings`], [`BuiltinTypes`] and [`NativeHost`] are ready-made
//! implementations for embedders without a richer host.

use std::collections::HashMap;
use std::fmt;

use indexmap::IndexMap;

use crate::dispatch::InvocationRequest;
use crate::error::{HostError, KeywordError};
use crate::keyword::{ModuleRef, TypeHandle};
use crate::value::{NamedArgs, ScriptBlock, Value};

// =============================================================================
// TRAITS
// =============================================================================

/// Resolves property type tokens (`Int`, `String`, ...) to host types
pub trait TypeResolver {
    fn resolve_type(&self, token: &str) -> Result<TypeHandle, HostError>;
}

/// Handle a running body uses to invoke further keywords
pub trait KeywordInvoker {
    fn invoke(&self, request: InvocationRequest) -> Result<Vec<Value>, KeywordError>;
}

/// Executes opaque bodies on behalf of the dispatcher
pub trait ScriptHost: TypeResolver {
    /// Run `body` with named arguments, returning its output items in order.
    /// Nested keyword invocations go through `invoker`.
    fn execute(
        &self,
        body: &ScriptBlock,
        args: &NamedArgs,
        invoker: &dyn KeywordInvoker,
    ) -> Result<Vec<Value>, HostError>;
}

/// What an invocation name is bound to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingInfo {
    /// Command the name resolves to
    pub target: String,
    pub description: String,
    pub module: Option<ModuleRef>,
}

impl BindingInfo {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            description: String::new(),
            module: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_module(mut self, module: Option<ModuleRef>) -> Self {
        self.module = module;
        self
    }

    /// True when this binding points at `target` (case-insensitive)
    pub fn points_to(&self, target: &str) -> bool {
        self.target.eq_ignore_ascii_case(target)
    }
}

/// Publishes names from a module to its importers
pub trait ModuleExports {
    fn export_binding(&mut self, module: &ModuleRef, name: &str) -> Result<(), HostError>;
}

/// Name-binding (alias) table of the host
pub trait BindingTable: ModuleExports {
    fn bind(&mut self, name: &str, info: BindingInfo) -> Result<(), HostError>;

    /// Remove the binding visible under `name`; false when nothing was removed
    fn unbind(&mut self, name: &str) -> bool;

    fn lookup(&self, name: &str) -> Option<BindingInfo>;
}

// =============================================================================
// IN-MEMORY BINDINGS
// =============================================================================

/// Layered binding table
///
/// Lookups search from the innermost layer outwards; binds and unbinds act on
/// the innermost layer holding the name (binds on a fresh name go to the
/// innermost layer).
#[derive(Debug, Clone)]
pub struct InMemoryBindings {
    layers: Vec<IndexMap<String, (String, BindingInfo)>>,
    exports: IndexMap<String, Vec<String>>,
}

impl Default for InMemoryBindings {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBindings {
    pub fn new() -> Self {
        Self {
            layers: vec![IndexMap::new()],
            exports: IndexMap::new(),
        }
    }

    /// Enter a nested host scope
    pub fn push_layer(&mut self) {
        self.layers.push(IndexMap::new());
    }

    /// Leave the innermost host scope, discarding its bindings.
    /// The outermost layer is never removed.
    pub fn pop_layer(&mut self) -> bool {
        if self.layers.len() > 1 {
            self.layers.pop();
            true
        } else {
            false
        }
    }

    /// Bind `name` in the innermost layer even when an outer layer already
    /// binds it (the outer binding is shadowed, not replaced)
    pub fn bind_local(&mut self, name: &str, info: BindingInfo) {
        let index = self.layers.len() - 1;
        self.layers[index].insert(name.to_ascii_lowercase(), (name.to_string(), info));
    }

    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    /// Visible names in binding order, innermost layer last
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for layer in &self.layers {
            for (_, (name, _)) in layer {
                if !names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
                    names.push(name.clone());
                }
            }
        }
        names
    }

    /// Names exported by a module, in export order
    pub fn exported(&self, module: &str) -> Vec<String> {
        self.exports
            .get(&module.to_ascii_lowercase())
            .cloned()
            .unwrap_or_default()
    }

    fn layer_holding(&self, key: &str) -> Option<usize> {
        self.layers.iter().rposition(|layer| layer.contains_key(key))
    }
}

impl ModuleExports for InMemoryBindings {
    fn export_binding(&mut self, module: &ModuleRef, name: &str) -> Result<(), HostError> {
        let names = self
            .exports
            .entry(module.name.to_ascii_lowercase())
            .or_default();
        if !names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
            names.push(name.to_string());
        }
        Ok(())
    }
}

impl BindingTable for InMemoryBindings {
    fn bind(&mut self, name: &str, info: BindingInfo) -> Result<(), HostError> {
        if name.is_empty() {
            return Err(HostError::Binding {
                name: name.to_string(),
                reason: "empty name".to_string(),
            });
        }
        let key = name.to_ascii_lowercase();
        let index = self
            .layer_holding(&key)
            .unwrap_or(self.layers.len() - 1);
        self.layers[index].insert(key, (name.to_string(), info));
        Ok(())
    }

    fn unbind(&mut self, name: &str) -> bool {
        let key = name.to_ascii_lowercase();
        match self.layer_holding(&key) {
            Some(index) => self.layers[index].shift_remove(&key).is_some(),
            None => false,
        }
    }

    fn lookup(&self, name: &str) -> Option<BindingInfo> {
        let key = name.to_ascii_lowercase();
        self.layers
            .iter()
            .rev()
            .find_map(|layer| layer.get(&key))
            .map(|(_, info)| info.clone())
    }
}

// =============================================================================
// BUILTIN TYPES
// =============================================================================

const BUILTIN_TYPES: &[(&str, &str)] = &[
    ("int", "System.Int32"),
    ("int32", "System.Int32"),
    ("long", "System.Int64"),
    ("int64", "System.Int64"),
    ("short", "System.Int16"),
    ("byte", "System.Byte"),
    ("string", "System.String"),
    ("char", "System.Char"),
    ("bool", "System.Boolean"),
    ("boolean", "System.Boolean"),
    ("switch", "System.Management.Automation.SwitchParameter"),
    ("double", "System.Double"),
    ("float", "System.Single"),
    ("single", "System.Single"),
    ("decimal", "System.Decimal"),
    ("datetime", "System.DateTime"),
    ("timespan", "System.TimeSpan"),
    ("guid", "System.Guid"),
    ("uri", "System.Uri"),
    ("version", "System.Version"),
    ("hashtable", "System.Collections.Hashtable"),
    ("array", "System.Array"),
    ("scriptblock", "System.Management.Automation.ScriptBlock"),
    ("object", "System.Object"),
    ("psobject", "System.Management.Automation.PSObject"),
];

/// Type resolver over a fixed table of common type tokens
///
/// Accepts short aliases (`int`), their canonical names (`System.Int32`) and
/// the bracketed form (`[int]`), all case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct BuiltinTypes {
    extra: Vec<(String, String)>,
}

impl BuiltinTypes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an alias on top of the builtin table
    pub fn with_alias(mut self, alias: impl Into<String>, canonical: impl Into<String>) -> Self {
        self.extra.push((alias.into(), canonical.into()));
        self
    }
}

impl TypeResolver for BuiltinTypes {
    fn resolve_type(&self, token: &str) -> Result<TypeHandle, HostError> {
        let bare = token
            .strip_prefix('[')
            .and_then(|t| t.strip_suffix(']'))
            .unwrap_or(token)
            .trim();

        let extra = self
            .extra
            .iter()
            .map(|(a, c)| (a.as_str(), c.as_str()));
        BUILTIN_TYPES
            .iter()
            .copied()
            .chain(extra)
            .find(|(alias, canonical)| {
                alias.eq_ignore_ascii_case(bare) || canonical.eq_ignore_ascii_case(bare)
            })
            .map(|(_, canonical)| TypeHandle::new(canonical))
            .ok_or_else(|| HostError::UnknownType(token.to_string()))
    }
}

// =============================================================================
// NATIVE HOST
// =============================================================================

type NativeBody =
    dyn Fn(&NamedArgs, &dyn KeywordInvoker) -> Result<Vec<Value>, HostError> + 'static;

/// Script host whose bodies are Rust closures keyed by script source text
///
/// An empty body produces no output. Any other source without a registered
/// closure is a host failure.
#[derive(Default)]
pub struct NativeHost {
    types: BuiltinTypes,
    bodies: HashMap<String, Box<NativeBody>>,
}

impl NativeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_types(mut self, types: BuiltinTypes) -> Self {
        self.types = types;
        self
    }

    /// Register the closure that runs for `source`
    pub fn register<F>(&mut self, source: impl AsRef<str>, body: F)
    where
        F: Fn(&NamedArgs, &dyn KeywordInvoker) -> Result<Vec<Value>, HostError> + 'static,
    {
        self.bodies
            .insert(source.as_ref().trim().to_string(), Box::new(body));
    }

    pub fn with_body<F>(mut self, source: impl AsRef<str>, body: F) -> Self
    where
        F: Fn(&NamedArgs, &dyn KeywordInvoker) -> Result<Vec<Value>, HostError> + 'static,
    {
        self.register(source, body);
        self
    }
}

impl fmt::Debug for NativeHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sources: Vec<&String> = self.bodies.keys().collect();
        sources.sort();
        f.debug_struct("NativeHost")
            .field("types", &self.types)
            .field("bodies", &sources)
            .finish()
    }
}

impl TypeResolver for NativeHost {
    fn resolve_type(&self, token: &str) -> Result<TypeHandle, HostError> {
        self.types.resolve_type(token)
    }
}

impl ScriptHost for NativeHost {
    fn execute(
        &self,
        body: &ScriptBlock,
        args: &NamedArgs,
        invoker: &dyn KeywordInvoker,
    ) -> Result<Vec<Value>, HostError> {
        let source = body.source().trim();
        match self.bodies.get(source) {
            Some(run) => run(args, invoker),
            None if source.is_empty() => Ok(Vec::new()),
            None => Err(HostError::failed(format!(
                "no native body registered for {}",
                body
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoInvoker;

    impl KeywordInvoker for NoInvoker {
        fn invoke(&self, request: InvocationRequest) -> Result<Vec<Value>, KeywordError> {
            Err(KeywordError::NotFound {
                name: request.keyword,
            })
        }
    }

    #[test]
    fn test_bindings_are_case_insensitive() {
        let mut bindings = InMemoryBindings::new();
        bindings.bind("Stage", BindingInfo::new("Invoke-Keyword")).unwrap();

        let info = bindings.lookup("STAGE").unwrap();
        assert!(info.points_to("invoke-keyword"));
        assert!(bindings.unbind("stage"));
        assert!(!bindings.unbind("stage"));
        assert!(bindings.lookup("Stage").is_none());
    }

    #[test]
    fn test_inner_layer_shadows_outer() {
        let mut bindings = InMemoryBindings::new();
        bindings.bind("Step", BindingInfo::new("Invoke-Keyword")).unwrap();
        bindings.push_layer();
        bindings.bind("Other", BindingInfo::new("Get-Thing")).unwrap();

        // an existing name is rebound where it lives
        bindings.bind("Step", BindingInfo::new("Get-Step")).unwrap();
        assert_eq!(bindings.lookup("Step").unwrap().target, "Get-Step");

        assert!(bindings.pop_layer());
        assert!(bindings.lookup("Other").is_none());
        assert_eq!(bindings.lookup("Step").unwrap().target, "Get-Step");
        assert!(!bindings.pop_layer());
    }

    #[test]
    fn test_exports_deduplicate() {
        let mut bindings = InMemoryBindings::new();
        let module = ModuleRef::new("Build");
        bindings.export_binding(&module, "Pipeline").unwrap();
        bindings.export_binding(&module, "pipeline").unwrap();
        assert_eq!(bindings.exported("build"), vec!["Pipeline".to_string()]);
    }

    #[test]
    fn test_builtin_types() {
        let types = BuiltinTypes::new().with_alias("money", "System.Decimal");
        assert_eq!(types.resolve_type("Int").unwrap().name, "System.Int32");
        assert_eq!(types.resolve_type("[string]").unwrap().name, "System.String");
        assert_eq!(types.resolve_type("System.Boolean").unwrap().name, "System.Boolean");
        assert_eq!(types.resolve_type("Money").unwrap().name, "System.Decimal");
        assert!(matches!(
            types.resolve_type("Widget"),
            Err(HostError::UnknownType(t)) if t == "Widget"
        ));
    }

    #[test]
    fn test_native_host_runs_registered_bodies() {
        let host = NativeHost::new().with_body("emit", |args, _| {
            Ok(vec![args.get("Name").cloned().unwrap_or(Value::Null)])
        });
        let mut args = NamedArgs::new();
        args.insert("Name".to_string(), Value::from("x"));

        let out = host.execute(&ScriptBlock::new(" emit "), &args, &NoInvoker).unwrap();
        assert_eq!(out, vec![Value::from("x")]);

        let empty = host.execute(&ScriptBlock::new(""), &args, &NoInvoker).unwrap();
        assert!(empty.is_empty());

        assert!(host
            .execute(&ScriptBlock::new("missing"), &args, &NoInvoker)
            .is_err());
    }
}
