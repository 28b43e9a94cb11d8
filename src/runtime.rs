//! Keyword runtime
//!
//! [`KeywordRuntime`] is the context object an embedder creates once: it owns
//! the registry (behind a `RefCell`, so bodies can re-enter it), the script
//! host and the configuration. There is no global state.

use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::{info, warn};

use crate::ast::ScriptBlockAst;
use crate::config::KeywordConfig;
use crate::dispatch::{InvocationDispatcher, InvocationRequest};
use crate::error::{KeywordError, Result};
use crate::grammar::{GrammarValidator, KeywordTreeBuilder};
use crate::host::{BindingTable, InMemoryBindings, ScriptHost};
use crate::keyword::{KeywordDefinition, KeywordDefinitionBuilder, ModuleRef};
use crate::parser::parse_script_block;
use crate::registry::{borrow_registry, KeywordRegistry};
use crate::value::{ScriptBlock, Value};

/// Lifecycle event a handler can be attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeywordEvent {
    /// Runs before the body with a `Name` argument; its output is emitted first
    OnInvoking,
    /// Receives the finished record as `InputObject`; its output replaces it
    OnInvoked,
}

impl fmt::Display for KeywordEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeywordEvent::OnInvoking => write!(f, "OnInvoking"),
            KeywordEvent::OnInvoked => write!(f, "OnInvoked"),
        }
    }
}

impl FromStr for KeywordEvent {
    type Err = KeywordError;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("OnInvoking") {
            Ok(KeywordEvent::OnInvoking)
        } else if s.eq_ignore_ascii_case("OnInvoked") {
            Ok(KeywordEvent::OnInvoked)
        } else {
            Err(KeywordError::InvalidArgument {
                keyword: String::new(),
                message: format!(
                    "'{}' is not a keyword event; expected OnInvoking or OnInvoked",
                    s
                ),
            })
        }
    }
}

pub struct KeywordRuntime<H: ScriptHost> {
    registry: RefCell<KeywordRegistry>,
    host: H,
    config: KeywordConfig,
}

impl<H: ScriptHost> fmt::Debug for KeywordRuntime<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeywordRuntime")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish()
    }
}

impl<H: ScriptHost> KeywordRuntime<H> {
    /// Runtime with default configuration and in-memory bindings
    pub fn new(host: H) -> Self {
        Self::with_config(host, KeywordConfig::default())
    }

    pub fn with_config(host: H, config: KeywordConfig) -> Self {
        Self::with_bindings(host, config, Box::new(InMemoryBindings::new()))
    }

    /// Runtime over the host's own binding table
    pub fn with_bindings(host: H, config: KeywordConfig, bindings: Box<dyn BindingTable>) -> Self {
        let registry = KeywordRegistry::new(bindings, &config);
        Self {
            registry: RefCell::new(registry),
            host,
            config,
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn config(&self) -> &KeywordConfig {
        &self.config
    }

    /// Read access to the registry; fails while a mutation is in progress
    pub fn registry(&self) -> Result<Ref<'_, KeywordRegistry>> {
        self.registry
            .try_borrow()
            .map_err(|_| KeywordError::invalid_state("keyword registry is being modified"))
    }

    pub fn registry_mut(&self) -> Result<RefMut<'_, KeywordRegistry>> {
        borrow_registry(&self.registry)
    }

    pub fn dispatcher(&self) -> InvocationDispatcher<'_> {
        InvocationDispatcher::new(&self.registry, &self.host, &self.config)
    }

    /// Dispatch a single invocation
    pub fn invoke(&self, request: InvocationRequest) -> Result<Vec<Value>> {
        self.dispatcher().dispatch(request)
    }

    // -------------------------------------------------------------------------
    // DSL lifecycle
    // -------------------------------------------------------------------------

    /// Declare (or re-declare) a DSL from declaration source text. Returns the
    /// DSL's root keywords.
    pub fn declare_dsl(
        &self,
        name: &str,
        source: &str,
        module: Option<ModuleRef>,
    ) -> Result<Vec<Arc<KeywordDefinition>>> {
        let ast = parse_script_block(source)?;
        self.declare(name, &ast, module)
            .map_err(|e| match e {
                KeywordError::Syntax(syntax) => KeywordError::Syntax(syntax.locate(source)),
                other => other,
            })
    }

    /// Declare a DSL from an already parsed declaration
    pub fn declare_dsl_ast(
        &self,
        name: &str,
        syntax: &ScriptBlockAst,
        module: Option<ModuleRef>,
    ) -> Result<Vec<Arc<KeywordDefinition>>> {
        self.declare(name, syntax, module)
    }

    fn declare(
        &self,
        name: &str,
        syntax: &ScriptBlockAst,
        module: Option<ModuleRef>,
    ) -> Result<Vec<Arc<KeywordDefinition>>> {
        if name.trim().is_empty() {
            return Err(KeywordError::InvalidArgument {
                keyword: String::new(),
                message: "the domain-specific language name must not be empty".to_string(),
            });
        }

        let mut registry = borrow_registry(&self.registry)?;

        let grammar = GrammarValidator::new(
            name,
            &self.host,
            registry.bindings(),
            registry.binding_target(),
        )
        .with_reserved_fields([
            self.config.output.name_field.as_str(),
            self.config.output.produced_by_field.as_str(),
        ])
        .validate(syntax, None)?;

        let replaced = registry.remove_dsl(name)?;
        if replaced > 0 {
            info!(dsl = name, replaced, "replacing domain-specific language");
        }

        let mut builder = KeywordTreeBuilder::new(&mut *registry, name, module);
        if let Err(e) = builder.build(&grammar, None, None) {
            if let Err(rollback) = registry.remove_dsl(name) {
                warn!(dsl = name, error = %rollback, "rollback of partial declaration failed");
            }
            return Err(e);
        }

        let roots = registry.dsl_roots(Some(name));
        info!(
            dsl = name,
            roots = roots.len(),
            keywords = registry.dsl_keywords(name).len(),
            "declared domain-specific language"
        );
        Ok(roots)
    }

    /// Remove every keyword of a DSL; returns how many were removed
    pub fn remove_dsl(&self, name: &str) -> Result<usize> {
        let removed = borrow_registry(&self.registry)?.remove_dsl(name)?;
        info!(dsl = name, removed, "removed domain-specific language");
        Ok(removed)
    }

    // -------------------------------------------------------------------------
    // Standalone keywords
    // -------------------------------------------------------------------------

    /// Register a keyword outside any DSL
    ///
    /// `configure` receives a builder with a fresh id and the given name.
    pub fn register_standalone(
        &self,
        name: &str,
        configure: impl FnOnce(KeywordDefinitionBuilder) -> KeywordDefinitionBuilder,
    ) -> Result<Arc<KeywordDefinition>> {
        let mut registry = borrow_registry(&self.registry)?;
        let id = registry.allocate_id();
        let definition = configure(KeywordDefinition::builder(id, name)).build();
        registry.register_standalone(definition)
    }

    pub fn remove_standalone(&self, name: &str) -> Result<bool> {
        borrow_registry(&self.registry)?.remove_standalone(name)
    }

    // -------------------------------------------------------------------------
    // Events
    // -------------------------------------------------------------------------

    /// Attach an event handler to a DSL keyword. Returns false when the DSL
    /// has no keyword at `path`.
    pub fn register_keyword_event(
        &self,
        dsl_name: &str,
        path: &str,
        event: KeywordEvent,
        handler: ScriptBlock,
    ) -> Result<bool> {
        let mut registry = borrow_registry(&self.registry)?;
        Ok(match event {
            KeywordEvent::OnInvoking => registry.set_on_invoking(dsl_name, path, handler),
            KeywordEvent::OnInvoked => registry.set_on_invoked(dsl_name, path, handler),
        })
    }
}
