//! keyword-dsl: grammar compiler, keyword registry and dispatcher for nested
//! keyword DSLs
//!
//! A DSL is declared as a nested block of keyword and property statements:
//! - Nom-based parser for the declaration (and body) block syntax
//! - Grammar validator and keyword tree builder
//! - Scoped keyword registry with per-scope visibility and bindings
//! - Invocation dispatcher that runs bodies through a [`ScriptHost`] and
//!   assembles map bodies into records
//! - YAML configuration types and loader
//!
//! Bodies are opaque: executing them is the job of the embedding host.

pub mod ast;
pub mod config;
pub mod diagnostics;
pub mod dispatch;
pub mod error;
pub mod grammar;
pub mod host;
pub mod keyword;
pub mod parser;
pub mod registry;
pub mod runtime;
pub mod value;

// Re-export commonly used types
pub use ast::{ScriptBlockAst, Span};
pub use config::loader::{ConfigLoader, GrammarSource};
pub use config::types::*;
pub use diagnostics::SourceSpan;
pub use dispatch::{InvocationDispatcher, InvocationRequest, InvocationSite};
pub use error::{HostError, KeywordError, Result, SyntaxError};
pub use grammar::{GrammarBlock, GrammarStatement, GrammarValidator, KeywordTreeBuilder};
pub use host::{
    BindingInfo, BindingTable, BuiltinTypes, InMemoryBindings, KeywordInvoker, ModuleExports,
    NativeHost, ScriptHost, TypeResolver,
};
pub use keyword::{
    BodyMode, KeywordDefinition, KeywordDefinitionBuilder, KeywordId, ModuleRef, NameMode,
    PropertySpec, TypeHandle,
};
pub use parser::parse_script_block;
pub use registry::{KeywordRegistry, ScopeGuard};
pub use runtime::{KeywordEvent, KeywordRuntime};
pub use value::{NamedArgs, Record, ScriptBlock, Value};
