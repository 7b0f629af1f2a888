//! Macro, rule and fragment registries plus the evaluator and type-handler
//! wiring consumed by `build_query`.

use crate::ast::DynamicSql;
use crate::eval::{DefaultEvaluator, Evaluator};
use crate::rules::{self, SqlRule};
use crate::types::TypeHandlerRegistry;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// Everything `build_query` resolves names against.
///
/// A process-wide default instance exists (see [`default_registry`]); callers
/// that register their own macros, rules or fragments build a private
/// instance per session. The registry is read-mostly: mutating a shared
/// instance while other threads build queries against it requires external
/// synchronization or copy-on-write on the caller's side.
#[derive(Debug, Clone)]
pub struct RegistryManager {
    macros: HashMap<String, String>,
    rules: HashMap<String, Arc<dyn SqlRule>>,
    fragments: HashMap<String, Arc<DynamicSql>>,
    evaluator: Arc<dyn Evaluator>,
    type_handlers: TypeHandlerRegistry,
}

impl Default for RegistryManager {
    fn default() -> Self {
        Self {
            macros: HashMap::new(),
            rules: rules::builtin_rules(),
            fragments: HashMap::new(),
            evaluator: Arc::new(DefaultEvaluator),
            type_handlers: TypeHandlerRegistry::default(),
        }
    }
}

impl RegistryManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a literal macro body under `name`.
    pub fn add_macro(&mut self, name: impl Into<String>, sql: impl Into<String>) -> &mut Self {
        self.macros.insert(name.into(), sql.into());
        self
    }

    pub fn find_macro(&self, name: &str) -> Option<&str> {
        self.macros.get(name).map(String::as_str)
    }

    /// Register (or replace) a named rule.
    pub fn register_rule(&mut self, name: impl Into<String>, rule: Arc<dyn SqlRule>) -> &mut Self {
        self.rules.insert(name.into(), rule);
        self
    }

    pub fn rule(&self, name: &str) -> Option<Arc<dyn SqlRule>> {
        self.rules.get(name).cloned()
    }

    /// Register a reusable fragment for `include(...)`.
    pub fn add_fragment(&mut self, name: impl Into<String>, fragment: DynamicSql) -> &mut Self {
        self.fragments.insert(name.into(), Arc::new(fragment));
        self
    }

    pub fn fragment(&self, name: &str) -> Option<Arc<DynamicSql>> {
        self.fragments.get(name).cloned()
    }

    pub fn set_evaluator(&mut self, evaluator: Arc<dyn Evaluator>) -> &mut Self {
        self.evaluator = evaluator;
        self
    }

    pub fn evaluator(&self) -> &dyn Evaluator {
        &*self.evaluator
    }

    pub fn type_handlers(&self) -> &TypeHandlerRegistry {
        &self.type_handlers
    }

    pub fn type_handlers_mut(&mut self) -> &mut TypeHandlerRegistry {
        &mut self.type_handlers
    }
}

/// The process-wide default registry: built-in rules, the default evaluator
/// and the default type handlers, no user macros or fragments. Immutable;
/// clone it (or build a fresh [`RegistryManager`]) to customize.
pub fn default_registry() -> &'static RegistryManager {
    static DEFAULT: OnceLock<RegistryManager> = OnceLock::new();
    DEFAULT.get_or_init(RegistryManager::new)
}
