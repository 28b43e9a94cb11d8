//! Keyword definitions
//!
//! A [`KeywordDefinition`] is immutable once built. Mutable per-keyword state
//! (visibility, hooks, DSL membership) lives in the registry.

use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// IDENTITY
// =============================================================================

/// Stable keyword identity, allocated by the registry (never zero)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeywordId(u64);

impl KeywordId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for KeywordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// =============================================================================
// MODES
// =============================================================================

/// Whether an invocation carries a name argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NameMode {
    #[default]
    NoName,
    OptionalName,
    NameRequired,
}

impl NameMode {
    /// Parse the optional middle token of a keyword definition
    ///
    /// `Name` selects [`NameMode::NameRequired`], `[Name]` selects
    /// [`NameMode::OptionalName`] (both case-insensitive).
    pub fn from_token(token: &str) -> Option<Self> {
        if token.eq_ignore_ascii_case("[Name]") {
            Some(Self::OptionalName)
        } else if token.eq_ignore_ascii_case("Name") {
            Some(Self::NameRequired)
        } else {
            None
        }
    }
}

/// How a keyword's body is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BodyMode {
    /// Declarative property map (`@{ Key = value }`)
    MapBody,
    /// Opaque executable block run by the script host
    ExecutableBody,
}

impl fmt::Display for BodyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BodyMode::MapBody => write!(f, "map"),
            BodyMode::ExecutableBody => write!(f, "executable"),
        }
    }
}

// =============================================================================
// PROPERTIES
// =============================================================================

/// Host type a property value is constrained to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeHandle {
    /// Canonical type name as reported by the host
    pub name: String,
}

impl TypeHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl fmt::Display for TypeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// One declared property of a map-bodied keyword
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySpec {
    pub name: String,
    pub required: bool,
    pub type_constraint: TypeHandle,
}

// =============================================================================
// DEFINITION
// =============================================================================

/// Module that declared a keyword
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleRef {
    pub name: String,
}

impl ModuleRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordDefinition {
    id: KeywordId,
    name: String,
    name_mode: NameMode,
    body_mode: BodyMode,
    properties: Vec<PropertySpec>,
    module: Option<ModuleRef>,
}

impl KeywordDefinition {
    /// Start building a definition for an allocated id
    pub fn builder(id: KeywordId, name: impl Into<String>) -> KeywordDefinitionBuilder {
        KeywordDefinitionBuilder {
            id,
            name: name.into(),
            name_mode: NameMode::NoName,
            body_mode: BodyMode::ExecutableBody,
            properties: Vec::new(),
            module: None,
        }
    }

    pub fn id(&self) -> KeywordId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn name_mode(&self) -> NameMode {
        self.name_mode
    }

    pub fn body_mode(&self) -> BodyMode {
        self.body_mode
    }

    pub fn properties(&self) -> &[PropertySpec] {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&PropertySpec> {
        self.properties
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn module(&self) -> Option<&ModuleRef> {
        self.module.as_ref()
    }

    /// Case-insensitive name comparison, as used for invocation tokens
    pub fn is_named(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

pub struct KeywordDefinitionBuilder {
    id: KeywordId,
    name: String,
    name_mode: NameMode,
    body_mode: BodyMode,
    properties: Vec<PropertySpec>,
    module: Option<ModuleRef>,
}

impl KeywordDefinitionBuilder {
    pub fn name_mode(mut self, mode: NameMode) -> Self {
        self.name_mode = mode;
        self
    }

    /// Declare a map body. An empty list still selects [`BodyMode::MapBody`].
    pub fn map_body(mut self, properties: Vec<PropertySpec>) -> Self {
        self.body_mode = BodyMode::MapBody;
        self.properties = properties;
        self
    }

    pub fn executable_body(mut self) -> Self {
        self.body_mode = BodyMode::ExecutableBody;
        self.properties.clear();
        self
    }

    pub fn module(mut self, module: Option<ModuleRef>) -> Self {
        self.module = module;
        self
    }

    pub fn build(self) -> KeywordDefinition {
        KeywordDefinition {
            id: self.id,
            name: self.name,
            name_mode: self.name_mode,
            body_mode: self.body_mode,
            properties: self.properties,
            module: self.module,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_mode_tokens() {
        assert_eq!(NameMode::from_token("Name"), Some(NameMode::NameRequired));
        assert_eq!(NameMode::from_token("[name]"), Some(NameMode::OptionalName));
        assert_eq!(NameMode::from_token("Title"), None);
    }

    #[test]
    fn test_builder_defaults_to_executable() {
        let def = KeywordDefinition::builder(KeywordId::new(7), "Step").build();
        assert_eq!(def.body_mode(), BodyMode::ExecutableBody);
        assert_eq!(def.name_mode(), NameMode::NoName);
        assert!(def.properties().is_empty());
        assert!(def.is_named("STEP"));
    }

    #[test]
    fn test_map_body_properties() {
        let def = KeywordDefinition::builder(KeywordId::new(1), "Stage")
            .name_mode(NameMode::OptionalName)
            .map_body(vec![PropertySpec {
                name: "Retries".to_string(),
                required: true,
                type_constraint: TypeHandle::new("System.Int32"),
            }])
            .build();
        assert_eq!(def.body_mode(), BodyMode::MapBody);
        assert!(def.property("retries").is_some());
        assert!(def.property("Timeout").is_none());
    }
}
