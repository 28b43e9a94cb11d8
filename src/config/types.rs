//! Configuration type definitions
//!
//! These structs map directly to `keywords.yaml`. Every field has a default,
//! so an empty or partial file is valid.

use serde::{Deserialize, Serialize};

// =============================================================================
// TOP-LEVEL CONFIG
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct KeywordConfig {
    pub dispatcher: DispatcherConfig,
    pub output: OutputConfig,
    pub grammar: GrammarConfig,
}

// =============================================================================
// DISPATCHER
// =============================================================================

/// How keyword names are bound to the dispatcher
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Command every keyword binding points at
    pub command: String,
    /// Module the dispatcher command lives in; a module-qualified direct call
    /// (`Module\Command`) is rejected like a plain one
    pub module: String,
    /// Description attached to managed bindings
    pub binding_description: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            command: "Invoke-Keyword".to_string(),
            module: "KeywordDsl".to_string(),
            binding_description: "This binding is automatically managed by the keyword runtime."
                .to_string(),
        }
    }
}

// =============================================================================
// OUTPUT
// =============================================================================

/// Shape of the records produced by keyword invocations
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Category label prefix; records are tagged `<prefix>#<path>`
    pub type_prefix: String,
    pub name_field: String,
    pub produced_by_field: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            type_prefix: "KeywordDsl.DslAutomaticOutput".to_string(),
            name_field: "Name".to_string(),
            produced_by_field: "ProducedByKeyword".to_string(),
        }
    }
}

impl OutputConfig {
    pub fn type_name(&self, path: &str) -> String {
        format!("{}#{}", self.type_prefix, path)
    }
}

// =============================================================================
// GRAMMAR
// =============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GrammarConfig {
    /// Separator joining keyword names into DSL paths
    pub path_separator: String,
    /// Extension of grammar files under `grammars/`
    pub file_extension: String,
}

impl Default for GrammarConfig {
    fn default() -> Self {
        Self {
            path_separator: "/".to_string(),
            file_extension: "kwdsl".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "output:\n  type_prefix: Build.Output\ngrammar:\n  path_separator: '\\'\n";
        let config: KeywordConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.output.type_prefix, "Build.Output");
        assert_eq!(config.output.name_field, "Name");
        assert_eq!(config.grammar.path_separator, "\\");
        assert_eq!(config.grammar.file_extension, "kwdsl");
        assert_eq!(config.dispatcher, DispatcherConfig::default());
    }

    #[test]
    fn test_type_name() {
        let output = OutputConfig::default();
        assert_eq!(
            output.type_name("Pipeline/Stage"),
            "KeywordDsl.DslAutomaticOutput#Pipeline/Stage"
        );
    }
}
