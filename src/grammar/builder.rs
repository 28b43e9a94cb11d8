//! Keyword tree construction
//!
//! Walks a validated [`GrammarBlock`] and registers one DSL keyword per
//! keyword declaration. A keyword whose body declares properties gets a map
//! body; every other keyword gets an executable body. Parents are registered
//! before their children, so every child's parent id is already known to the
//! registry.

use tracing::debug;

use super::classify::GrammarBlock;
use crate::error::Result;
use crate::keyword::{KeywordDefinition, KeywordId, ModuleRef, PropertySpec};
use crate::registry::KeywordRegistry;

pub struct KeywordTreeBuilder<'r> {
    registry: &'r mut KeywordRegistry,
    dsl_name: String,
    module: Option<ModuleRef>,
    registered: Vec<KeywordId>,
}

impl<'r> KeywordTreeBuilder<'r> {
    pub fn new(
        registry: &'r mut KeywordRegistry,
        dsl_name: impl Into<String>,
        module: Option<ModuleRef>,
    ) -> Self {
        Self {
            registry,
            dsl_name: dsl_name.into(),
            module,
            registered: Vec::new(),
        }
    }

    /// Register every keyword in `grammar` below `parent`, returning the
    /// property specs declared directly in `grammar`
    pub fn build(
        &mut self,
        grammar: &GrammarBlock,
        parent: Option<KeywordId>,
        parent_path: Option<&str>,
    ) -> Result<Vec<PropertySpec>> {
        for decl in grammar.keywords() {
            let id = self.registry.allocate_id();
            let path = match parent_path {
                Some(parent_path) => format!(
                    "{}{}{}",
                    parent_path,
                    self.registry.path_separator(),
                    decl.name
                ),
                None => decl.name.clone(),
            };

            let nested = property_specs(&decl.body);
            let builder = KeywordDefinition::builder(id, &decl.name)
                .name_mode(decl.name_mode)
                .module(self.module.clone());
            let definition = if nested.is_empty() {
                builder.executable_body().build()
            } else {
                builder.map_body(nested).build()
            };

            debug!(
                dsl = %self.dsl_name,
                path = %path,
                body = %definition.body_mode(),
                "building keyword"
            );
            self.registry
                .register_dsl(&self.dsl_name, definition, parent, &path)?;
            self.registered.push(id);

            if parent.is_none() {
                if let Some(module) = &self.module {
                    self.registry.export(module, &decl.name)?;
                }
            }

            self.build(&decl.body, Some(id), Some(&path))?;
        }

        Ok(property_specs(grammar))
    }

    /// Ids registered so far, parents before children
    pub fn registered(&self) -> &[KeywordId] {
        &self.registered
    }
}

/// Property specs declared directly in `block`
fn property_specs(block: &GrammarBlock) -> Vec<PropertySpec> {
    block
        .properties()
        .map(|decl| PropertySpec {
            name: decl.name.clone(),
            required: decl.required,
            type_constraint: decl.type_handle.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KeywordConfig;
    use crate::grammar::GrammarValidator;
    use crate::host::{BuiltinTypes, InMemoryBindings};
    use crate::keyword::{BodyMode, NameMode};
    use crate::parser::parse_script_block;

    fn build(source: &str, module: Option<ModuleRef>) -> (KeywordRegistry, Vec<KeywordId>) {
        let mut registry =
            KeywordRegistry::new(Box::new(InMemoryBindings::new()), &KeywordConfig::default());
        let ast = parse_script_block(source).unwrap();
        let grammar = GrammarValidator::new(
            "Flow",
            &BuiltinTypes::new(),
            registry.bindings(),
            registry.binding_target(),
        )
        .validate(&ast, None)
        .unwrap();

        let mut builder = KeywordTreeBuilder::new(&mut registry, "Flow", module);
        let root_props = builder.build(&grammar, None, None).unwrap();
        assert!(root_props.is_empty());
        let ids = builder.registered().to_vec();
        (registry, ids)
    }

    #[test]
    fn test_paths_and_body_modes() {
        let (registry, ids) = build(
            "Step {\n  Item [Name] {\n    Detail { String Text; [Int] [Weight] }\n  }\n}",
            None,
        );
        assert_eq!(ids.len(), 3);

        let step = registry.dsl_keyword("Flow", "Step").unwrap();
        let item = registry.dsl_keyword("Flow", "Step/Item").unwrap();
        let detail = registry.dsl_keyword("Flow", "Step/Item/Detail").unwrap();

        assert_eq!(step.body_mode(), BodyMode::ExecutableBody);
        assert_eq!(item.body_mode(), BodyMode::ExecutableBody);
        assert_eq!(item.name_mode(), NameMode::OptionalName);
        assert_eq!(detail.body_mode(), BodyMode::MapBody);

        let props = detail.properties();
        assert_eq!(props.len(), 2);
        assert_eq!(props[0].type_constraint.name, "System.String");
        assert!(props[0].required);
        assert!(!props[1].required);

        assert_eq!(registry.parent(detail.id()), Some(item.id()));
        assert_eq!(registry.parent(item.id()), Some(step.id()));
        assert!(registry.is_visible(step.id()));
        assert!(!registry.is_visible(item.id()));
    }

    #[test]
    fn test_module_roots_are_exported() {
        let module = ModuleRef::new("Build");
        let (registry, _) = build("Step { Item { Int A } }\nStage { Int B }", Some(module.clone()));
        let step = registry.dsl_keyword("Flow", "Step").unwrap();
        assert_eq!(step.module(), Some(&module));
        let binding = registry.bindings().lookup("Stage").unwrap();
        assert_eq!(binding.module, Some(module));
    }
}
