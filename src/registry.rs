//! Keyword registry
//!
//! Resident store of every registered keyword (standalone and DSL-owned),
//! their visibility and lifecycle hooks, plus the scope stack that drives
//! visibility while DSL keyword bodies run.
//!
//! ## Scoping
//!
//! Entering a DSL keyword ([`KeywordRegistry::push_scope`]) hides it and its
//! siblings and shows its children, so a body can only invoke the keywords
//! declared one level below. Leaving it ([`KeywordRegistry::pop_scope`])
//! reverses that and re-binds standalone keywords whose names were cleared
//! while the scope was active.
//!
//! Every visible keyword has its name bound to the dispatcher command in the
//! host's [`BindingTable`]; hidden keywords have their binding removed.

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, error, warn};

use crate::config::KeywordConfig;
use crate::error::{KeywordError, Result};
use crate::host::{BindingInfo, BindingTable};
use crate::keyword::{KeywordDefinition, KeywordId, ModuleRef};
use crate::value::ScriptBlock;

// =============================================================================
// ENTRIES
// =============================================================================

/// A registered keyword with its mutable state
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    definition: Arc<KeywordDefinition>,
    visible: bool,
    on_invoking: Option<ScriptBlock>,
    on_invoked: Option<ScriptBlock>,
}

impl RegistryEntry {
    fn new(definition: Arc<KeywordDefinition>, visible: bool) -> Self {
        Self {
            definition,
            visible,
            on_invoking: None,
            on_invoked: None,
        }
    }

    pub fn definition(&self) -> &Arc<KeywordDefinition> {
        &self.definition
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn on_invoking(&self) -> Option<&ScriptBlock> {
        self.on_invoking.as_ref()
    }

    pub fn on_invoked(&self) -> Option<&ScriptBlock> {
        self.on_invoked.as_ref()
    }
}

/// DSL placement of a DSL-owned keyword
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DslMembership {
    pub dsl_name: String,
    /// Names from the DSL root to this keyword, joined by the path separator
    pub path: String,
    /// None for DSL roots
    pub parent: Option<KeywordId>,
}

// =============================================================================
// REGISTRY
// =============================================================================

pub struct KeywordRegistry {
    entries: IndexMap<KeywordId, RegistryEntry>,
    memberships: IndexMap<KeywordId, DslMembership>,
    scope: Vec<KeywordId>,
    next_id: u64,
    bindings: Box<dyn BindingTable>,
    binding_target: String,
    binding_description: String,
    path_separator: String,
}

impl fmt::Debug for KeywordRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeywordRegistry")
            .field("entries", &self.entries.len())
            .field("dsl_members", &self.memberships.len())
            .field("scope", &self.scope)
            .field("binding_target", &self.binding_target)
            .finish()
    }
}

impl KeywordRegistry {
    pub fn new(bindings: Box<dyn BindingTable>, config: &KeywordConfig) -> Self {
        Self {
            entries: IndexMap::new(),
            memberships: IndexMap::new(),
            scope: Vec::new(),
            next_id: 1,
            bindings,
            binding_target: config.dispatcher.command.clone(),
            binding_description: config.dispatcher.binding_description.clone(),
            path_separator: config.grammar.path_separator.clone(),
        }
    }

    /// Reserve a fresh keyword id
    pub fn allocate_id(&mut self) -> KeywordId {
        let id = KeywordId::new(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn path_separator(&self) -> &str {
        &self.path_separator
    }

    /// Command every managed binding points at
    pub fn binding_target(&self) -> &str {
        &self.binding_target
    }

    pub fn bindings(&self) -> &dyn BindingTable {
        self.bindings.as_ref()
    }

    pub fn bindings_mut(&mut self) -> &mut dyn BindingTable {
        self.bindings.as_mut()
    }

    /// Publish a module-declared keyword name through the binding table
    pub fn export(&mut self, module: &ModuleRef, name: &str) -> Result<()> {
        self.bindings.export_binding(module, name)?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Registration
    // -------------------------------------------------------------------------

    /// Register a keyword that belongs to no DSL. Standalone keywords are
    /// always visible.
    pub fn register_standalone(
        &mut self,
        definition: KeywordDefinition,
    ) -> Result<Arc<KeywordDefinition>> {
        let definition = Arc::new(definition);
        self.insert_entry(Arc::clone(&definition), true)?;
        debug!(keyword = definition.name(), id = %definition.id(), "registered standalone keyword");
        Ok(definition)
    }

    /// Register a DSL member. Only roots registered outside any scope start
    /// visible.
    pub fn register_dsl(
        &mut self,
        dsl_name: &str,
        definition: KeywordDefinition,
        parent: Option<KeywordId>,
        path: &str,
    ) -> Result<Arc<KeywordDefinition>> {
        if let Some(parent) = parent {
            if !self.memberships.contains_key(&parent) {
                return Err(KeywordError::invalid_state(format!(
                    "parent keyword {} of '{}' is not a DSL keyword",
                    parent, path
                )));
            }
        }
        if self.dsl_keyword_id(dsl_name, path).is_some() {
            return Err(KeywordError::invalid_state(format!(
                "path '{}' is already registered in DSL '{}'",
                path, dsl_name
            )));
        }

        let definition = Arc::new(definition);
        let visible = parent.is_none() && self.scope.is_empty();
        self.insert_entry(Arc::clone(&definition), visible)?;
        self.memberships.insert(
            definition.id(),
            DslMembership {
                dsl_name: dsl_name.to_string(),
                path: path.to_string(),
                parent,
            },
        );
        debug!(dsl = dsl_name, path, id = %definition.id(), visible, "registered DSL keyword");
        Ok(definition)
    }

    fn insert_entry(&mut self, definition: Arc<KeywordDefinition>, visible: bool) -> Result<()> {
        let id = definition.id();
        if self.entries.contains_key(&id) {
            return Err(KeywordError::invalid_state(format!(
                "keyword id {} is already registered",
                id
            )));
        }
        if visible {
            self.bind_keyword(&definition)?;
        }
        self.entries
            .insert(id, RegistryEntry::new(definition, visible));
        Ok(())
    }

    /// Remove a keyword and its DSL membership, clearing its dispatcher binding
    pub fn unregister(&mut self, id: KeywordId) -> Result<Arc<KeywordDefinition>> {
        let entry = self.entries.shift_remove(&id).ok_or_else(|| {
            KeywordError::invalid_state(format!(
                "The keyword with id {} was not found in the keyword database.",
                id
            ))
        })?;
        self.memberships.shift_remove(&id);
        self.unbind_keyword(entry.definition.name());
        Ok(entry.definition)
    }

    /// Remove every member of a DSL; returns how many keywords were removed
    pub fn remove_dsl(&mut self, dsl_name: &str) -> Result<usize> {
        let ids = self.dsl_keyword_ids(dsl_name);
        for id in &ids {
            self.unregister(*id)?;
        }
        if !ids.is_empty() {
            // removing a DSL root may have cleared a name a standalone keyword shares
            self.rebind_standalone()?;
        }
        Ok(ids.len())
    }

    /// Remove the first standalone keyword with `name`
    pub fn remove_standalone(&mut self, name: &str) -> Result<bool> {
        match self.standalone_keyword(name) {
            Some(definition) => {
                self.unregister(definition.id())?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // -------------------------------------------------------------------------
    // Bindings
    // -------------------------------------------------------------------------

    fn bind_keyword(&mut self, definition: &KeywordDefinition) -> Result<()> {
        let already_bound = self
            .bindings
            .lookup(definition.name())
            .is_some_and(|b| b.points_to(&self.binding_target));
        if already_bound {
            return Ok(());
        }

        let info = BindingInfo::new(&self.binding_target)
            .with_description(&self.binding_description)
            .with_module(definition.module().cloned());
        self.bindings.bind(definition.name(), info)?;
        Ok(())
    }

    /// Remove every dispatcher binding for `name`, including duplicates left
    /// behind by outside edits
    fn unbind_keyword(&mut self, name: &str) {
        loop {
            let points_here = self
                .bindings
                .lookup(name)
                .is_some_and(|b| b.points_to(&self.binding_target));
            if !points_here || !self.bindings.unbind(name) {
                break;
            }
        }
    }

    fn rebind_standalone(&mut self) -> Result<()> {
        let unbound: Vec<Arc<KeywordDefinition>> = self
            .standalone_keywords()
            .into_iter()
            .filter(|def| self.bindings.lookup(def.name()).is_none())
            .collect();
        for definition in unbound {
            self.bind_keyword(&definition)?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Visibility
    // -------------------------------------------------------------------------

    pub fn show(&mut self, id: KeywordId) -> Result<()> {
        let definition = {
            let entry = self.entry_mut(id)?;
            entry.visible = true;
            Arc::clone(&entry.definition)
        };
        self.bind_keyword(&definition)
    }

    /// Hide a DSL keyword. Standalone keywords cannot be hidden.
    pub fn hide(&mut self, id: KeywordId) -> Result<()> {
        let name = self.entry(id)?.definition.name().to_string();
        if !self.is_dsl_keyword(id) {
            return Err(KeywordError::invalid_operation(format!(
                "attempt to hide standalone keyword '{}'.",
                name
            )));
        }
        self.entry_mut(id)?.visible = false;
        self.unbind_keyword(&name);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Scope stack
    // -------------------------------------------------------------------------

    /// Enter a DSL keyword: hide it and its siblings, show its children
    pub fn push_scope(&mut self, id: KeywordId) -> Result<()> {
        let name = self.entry(id)?.definition.name().to_string();
        if !self.is_dsl_keyword(id) {
            return Err(KeywordError::invalid_operation(format!(
                "pushing a standalone keyword ({}) onto the dynamic keyword stack. This should never happen.",
                name
            )));
        }

        self.scope.push(id);
        if let Err(e) = self.enter(id) {
            // leave the stack as it was before this push
            if let Err(rollback) = self.pop_scope() {
                warn!(keyword = %name, error = %rollback, "failed to undo keyword scope entry");
            }
            return Err(e);
        }
        debug!(keyword = %name, depth = self.scope.len(), "entered keyword scope");
        Ok(())
    }

    fn enter(&mut self, id: KeywordId) -> Result<()> {
        for sibling in self.siblings(id) {
            self.hide(sibling)?;
        }
        for child in self.children(id) {
            self.show(child)?;
        }
        Ok(())
    }

    /// Leave the innermost scope: hide its children, show its siblings and
    /// re-bind standalone keywords left without a binding
    pub fn pop_scope(&mut self) -> Result<KeywordId> {
        let id = self.scope.pop().ok_or_else(|| {
            KeywordError::invalid_operation(
                "popping a DSL keyword off of dynamic keyword stack when the dynamic keyword stack is empty. This should never happen.",
            )
        })?;

        // the keyword may have been removed while its scope was active
        if self.memberships.contains_key(&id) {
            for child in self.children(id) {
                self.hide(child)?;
            }
            for sibling in self.siblings(id) {
                self.show(sibling)?;
            }
        } else {
            warn!(id = %id, "popped scope of a keyword that is no longer registered");
        }

        self.rebind_standalone()?;
        debug!(id = %id, depth = self.scope.len(), "left keyword scope");
        Ok(id)
    }

    pub fn scope_stack(&self) -> &[KeywordId] {
        &self.scope
    }

    pub fn scope_depth(&self) -> usize {
        self.scope.len()
    }

    // -------------------------------------------------------------------------
    // Resolution
    // -------------------------------------------------------------------------

    /// Every visible keyword registered under `name`
    pub fn resolve_visible(&self, name: &str) -> Vec<Arc<KeywordDefinition>> {
        self.entries
            .values()
            .filter(|e| e.visible && e.definition.is_named(name))
            .map(|e| Arc::clone(&e.definition))
            .collect()
    }

    /// Resolve `name` to the single keyword an invocation should run, and make
    /// sure its binding is in place
    pub fn load_visible(&mut self, name: &str) -> Result<Arc<KeywordDefinition>> {
        let visible = self.resolve_visible(name);
        let chosen = match visible.len() {
            0 => {
                return Err(KeywordError::NotFound {
                    name: name.to_string(),
                })
            }
            1 => Arc::clone(&visible[0]),
            _ => {
                let dsl: Vec<&Arc<KeywordDefinition>> = visible
                    .iter()
                    .filter(|d| self.is_dsl_keyword(d.id()))
                    .collect();
                match dsl.as_slice() {
                    [only] => Arc::clone(only),
                    [] => {
                        return Err(KeywordError::invalid_state(format!(
                            "multiple standalone keywords with the name '{}' detected. This should never happen.",
                            name
                        )))
                    }
                    _ => {
                        return Err(KeywordError::invalid_state(format!(
                            "multiple DSL keywords with the name '{}' are visible. This should never happen.",
                            name
                        )))
                    }
                }
            }
        };

        self.bind_keyword(&chosen)?;
        Ok(chosen)
    }

    // -------------------------------------------------------------------------
    // Hooks
    // -------------------------------------------------------------------------

    /// Attach an action run before the keyword's body. Returns false (and
    /// changes nothing) when no keyword has that DSL path.
    pub fn set_on_invoking(&mut self, dsl_name: &str, path: &str, handler: ScriptBlock) -> bool {
        self.set_hook(dsl_name, path, |entry| entry.on_invoking = Some(handler))
    }

    /// Attach an action that receives the finished record
    pub fn set_on_invoked(&mut self, dsl_name: &str, path: &str, handler: ScriptBlock) -> bool {
        self.set_hook(dsl_name, path, |entry| entry.on_invoked = Some(handler))
    }

    fn set_hook(
        &mut self,
        dsl_name: &str,
        path: &str,
        apply: impl FnOnce(&mut RegistryEntry),
    ) -> bool {
        let entry = self
            .dsl_keyword_id(dsl_name, path)
            .and_then(|id| self.entries.get_mut(&id));
        match entry {
            Some(entry) => {
                apply(entry);
                true
            }
            None => {
                warn!(dsl = dsl_name, path, "no keyword found for event handler");
                false
            }
        }
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn get(&self, id: KeywordId) -> Option<&RegistryEntry> {
        self.entries.get(&id)
    }

    pub fn definition(&self, id: KeywordId) -> Option<Arc<KeywordDefinition>> {
        self.entries.get(&id).map(|e| Arc::clone(&e.definition))
    }

    pub fn membership(&self, id: KeywordId) -> Option<&DslMembership> {
        self.memberships.get(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, id: KeywordId) -> Result<&RegistryEntry> {
        self.entries.get(&id).ok_or_else(|| not_registered(id))
    }

    fn entry_mut(&mut self, id: KeywordId) -> Result<&mut RegistryEntry> {
        self.entries.get_mut(&id).ok_or_else(|| not_registered(id))
    }

    /// DSL path of a DSL keyword, or the name of a standalone one
    pub fn keyword_path(&self, id: KeywordId) -> Option<String> {
        match self.memberships.get(&id) {
            Some(m) => Some(m.path.clone()),
            None => self.entries.get(&id).map(|e| e.definition.name().to_string()),
        }
    }

    pub fn is_visible(&self, id: KeywordId) -> bool {
        self.entries.get(&id).is_some_and(|e| e.visible)
    }

    pub fn is_dsl_keyword(&self, id: KeywordId) -> bool {
        self.memberships.contains_key(&id)
    }

    pub fn is_standalone(&self, id: KeywordId) -> bool {
        self.entries.contains_key(&id) && !self.memberships.contains_key(&id)
    }

    pub fn is_root(&self, id: KeywordId) -> bool {
        self.memberships.get(&id).is_some_and(|m| m.parent.is_none())
    }

    pub fn standalone_keywords(&self) -> Vec<Arc<KeywordDefinition>> {
        self.entries
            .iter()
            .filter(|(id, _)| !self.memberships.contains_key(*id))
            .map(|(_, e)| Arc::clone(&e.definition))
            .collect()
    }

    pub fn standalone_keyword(&self, name: &str) -> Option<Arc<KeywordDefinition>> {
        self.standalone_keywords()
            .into_iter()
            .find(|d| d.is_named(name))
    }

    /// Names of the registered DSLs, in registration order
    pub fn dsl_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for m in self.memberships.values() {
            if !names.iter().any(|n| n.eq_ignore_ascii_case(&m.dsl_name)) {
                names.push(m.dsl_name.clone());
            }
        }
        names
    }

    fn dsl_keyword_ids(&self, dsl_name: &str) -> Vec<KeywordId> {
        self.memberships
            .iter()
            .filter(|(_, m)| m.dsl_name.eq_ignore_ascii_case(dsl_name))
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn dsl_keywords(&self, dsl_name: &str) -> Vec<Arc<KeywordDefinition>> {
        self.dsl_keyword_ids(dsl_name)
            .into_iter()
            .filter_map(|id| self.definition(id))
            .collect()
    }

    fn dsl_keyword_id(&self, dsl_name: &str, path: &str) -> Option<KeywordId> {
        self.memberships
            .iter()
            .find(|(_, m)| {
                m.dsl_name.eq_ignore_ascii_case(dsl_name) && m.path.eq_ignore_ascii_case(path)
            })
            .map(|(id, _)| *id)
    }

    pub fn dsl_keyword(&self, dsl_name: &str, path: &str) -> Option<Arc<KeywordDefinition>> {
        self.dsl_keyword_id(dsl_name, path)
            .and_then(|id| self.definition(id))
    }

    /// Root keywords of one DSL, or of every DSL when `dsl_name` is None
    pub fn dsl_roots(&self, dsl_name: Option<&str>) -> Vec<Arc<KeywordDefinition>> {
        self.memberships
            .iter()
            .filter(|(_, m)| {
                m.parent.is_none()
                    && dsl_name.map_or(true, |n| m.dsl_name.eq_ignore_ascii_case(n))
            })
            .filter_map(|(id, _)| self.definition(*id))
            .collect()
    }

    /// First DSL root keyword registered under `name`, across all DSLs
    pub fn dsl_root(&self, name: &str) -> Option<Arc<KeywordDefinition>> {
        self.dsl_roots(None).into_iter().find(|d| d.is_named(name))
    }

    pub fn parent(&self, id: KeywordId) -> Option<KeywordId> {
        self.memberships.get(&id).and_then(|m| m.parent)
    }

    /// Direct children of a DSL keyword, in registration order
    pub fn children(&self, id: KeywordId) -> Vec<KeywordId> {
        self.memberships
            .iter()
            .filter(|(_, m)| m.parent == Some(id))
            .map(|(child, _)| *child)
            .collect()
    }

    /// Keywords sharing `id`'s parent and DSL, `id` included. Empty for
    /// standalone keywords.
    pub fn siblings(&self, id: KeywordId) -> Vec<KeywordId> {
        let Some(me) = self.memberships.get(&id) else {
            return Vec::new();
        };
        self.memberships
            .iter()
            .filter(|(_, m)| {
                m.parent == me.parent && m.dsl_name.eq_ignore_ascii_case(&me.dsl_name)
            })
            .map(|(sibling, _)| *sibling)
            .collect()
    }

    pub fn inside_dsl(&self) -> bool {
        !self.scope.is_empty()
    }

    /// DSL of the innermost entered keyword
    pub fn current_dsl_name(&self) -> Option<&str> {
        self.scope
            .last()
            .and_then(|id| self.memberships.get(id))
            .map(|m| m.dsl_name.as_str())
    }

    /// True when `id` is a direct child of the innermost entered keyword
    pub fn is_child_of_current_scope(&self, id: KeywordId) -> bool {
        match (self.scope.last(), self.memberships.get(&id)) {
            (Some(top), Some(m)) => m.parent == Some(*top),
            _ => false,
        }
    }

    /// Visibility of every entry, in registration order
    pub fn visibility_snapshot(&self) -> Vec<(KeywordId, bool)> {
        self.entries.iter().map(|(id, e)| (*id, e.visible)).collect()
    }
}

fn not_registered(id: KeywordId) -> KeywordError {
    KeywordError::invalid_state(format!(
        "The keyword with id {} was not found in the keyword database.",
        id
    ))
}

// =============================================================================
// SCOPE GUARD
// =============================================================================

/// Pops the scope it pushed, whether the body it guards succeeded or not
///
/// Call [`ScopeGuard::release`] to observe the pop result. A guard dropped
/// without a successful release (early return, panic unwinding) still pops
/// and logs any failure.
#[must_use = "dropping the guard immediately leaves the scope"]
pub struct ScopeGuard<'a> {
    registry: &'a RefCell<KeywordRegistry>,
    keyword: KeywordId,
    released: bool,
}

impl<'a> ScopeGuard<'a> {
    pub fn enter(registry: &'a RefCell<KeywordRegistry>, keyword: KeywordId) -> Result<Self> {
        borrow_registry(registry)?.push_scope(keyword)?;
        Ok(Self {
            registry,
            keyword,
            released: false,
        })
    }

    pub fn keyword(&self) -> KeywordId {
        self.keyword
    }

    /// Leave the scope, returning the popped keyword id. If the registry is
    /// busy the guard stays armed and pops when dropped.
    pub fn release(&mut self) -> Result<KeywordId> {
        if self.released {
            return Err(KeywordError::invalid_operation(format!(
                "scope of keyword {} was already left",
                self.keyword
            )));
        }
        let mut registry = borrow_registry(self.registry)?;
        self.released = true;
        let popped = registry.pop_scope()?;
        if popped != self.keyword {
            return Err(KeywordError::invalid_state(format!(
                "scope stack out of order: expected {} on top, popped {}",
                self.keyword, popped
            )));
        }
        Ok(popped)
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match self.registry.try_borrow_mut() {
            Ok(mut registry) => {
                if let Err(e) = registry.pop_scope() {
                    error!(keyword = %self.keyword, error = %e, "failed to leave keyword scope");
                }
            }
            Err(_) => {
                error!(keyword = %self.keyword, "keyword registry busy; scope was not left");
            }
        }
    }
}

pub(crate) fn borrow_registry(
    registry: &RefCell<KeywordRegistry>,
) -> Result<std::cell::RefMut<'_, KeywordRegistry>> {
    registry
        .try_borrow_mut()
        .map_err(|_| KeywordError::invalid_state("keyword registry is already borrowed"))
}
