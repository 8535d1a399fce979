//! Per-model API options and registry configuration.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Options that control how a model type talks to its data source.
///
/// Unset options inherit from ancestor schemas and then from the registry
/// defaults. An option that is still unset behaves as `false`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiOptions {
    /// Keep fetched objects in the strong cache, keyed by id.
    pub cache_by_id: Option<bool>,
    /// Fetch related objects automatically when they are read.
    pub auto_get_child_objects: Option<bool>,
}

impl ApiOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache_by_id(mut self, value: bool) -> Self {
        self.cache_by_id = Some(value);
        self
    }

    pub fn with_auto_get_child_objects(mut self, value: bool) -> Self {
        self.auto_get_child_objects = Some(value);
        self
    }

    /// Fill every unset option from `parent`.
    pub fn set_unset_values(&mut self, parent: &ApiOptions) {
        if self.cache_by_id.is_none() {
            self.cache_by_id = parent.cache_by_id;
        }
        if self.auto_get_child_objects.is_none() {
            self.auto_get_child_objects = parent.auto_get_child_objects;
        }
    }

    /// Options set on `self` win; the rest come from `base`.
    pub fn over(mut self, base: &ApiOptions) -> Self {
        self.set_unset_values(base);
        self
    }

    pub fn caches_by_id(&self) -> bool {
        self.cache_by_id.unwrap_or(false)
    }

    pub fn auto_gets_child_objects(&self) -> bool {
        self.auto_get_child_objects.unwrap_or(false)
    }
}

/// Stacks of temporary option overrides, one stack per model name.
#[derive(Debug, Default)]
pub(crate) struct ScopeStacks {
    stacks: Mutex<HashMap<String, Vec<ApiOptions>>>,
}

impl ScopeStacks {
    pub(crate) fn push(self: &Arc<Self>, model: &str, options: ApiOptions) -> OptionsScope {
        let mut stacks = self.stacks.lock().unwrap_or_else(|e| e.into_inner());
        let stack = stacks.entry(model.to_string()).or_default();
        let depth = stack.len();
        stack.push(options);
        tracing::trace!(model = model, depth = depth, "entered options scope");
        OptionsScope {
            stacks: Arc::clone(self),
            model: model.to_string(),
            depth,
        }
    }

    /// The innermost overrides folded over each other, if any scope is active.
    pub(crate) fn current(&self, model: &str) -> Option<ApiOptions> {
        let stacks = self.stacks.lock().unwrap_or_else(|e| e.into_inner());
        let stack = stacks.get(model)?;
        let mut iter = stack.iter().rev();
        let mut options = *iter.next()?;
        for outer in iter {
            options.set_unset_values(outer);
        }
        Some(options)
    }

    fn truncate(&self, model: &str, depth: usize) {
        let mut stacks = self.stacks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(stack) = stacks.get_mut(model) {
            stack.truncate(depth);
            if stack.is_empty() {
                stacks.remove(model);
            }
        }
    }
}

/// Guard returned by [`Registry::options_scope`](crate::Registry::options_scope).
///
/// While alive, its options override the model's own. Dropping it restores
/// whatever was active before it was created, including any scopes opened
/// inside it that were leaked.
#[must_use = "the override ends as soon as the scope is dropped"]
pub struct OptionsScope {
    stacks: Arc<ScopeStacks>,
    model: String,
    depth: usize,
}

impl OptionsScope {
    pub fn model(&self) -> &str {
        &self.model
    }
}

impl Drop for OptionsScope {
    fn drop(&mut self) {
        self.stacks.truncate(&self.model, self.depth);
        tracing::trace!(model = %self.model, depth = self.depth, "left options scope");
    }
}

impl std::fmt::Debug for OptionsScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptionsScope")
            .field("model", &self.model)
            .field("depth", &self.depth)
            .finish()
    }
}

/// Registry-wide configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Share fetched objects through weak handles while they are alive elsewhere.
    pub weak_cache_enabled: bool,
    /// Options applied underneath every schema's own options.
    pub default_options: ApiOptions,
    /// Bound on the strong cache. `None` keeps entries until invalidated.
    pub strong_cache_capacity: Option<usize>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            weak_cache_enabled: false,
            default_options: ApiOptions::default(),
            strong_cache_capacity: None,
        }
    }
}

impl RegistryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from JSON. Missing keys keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn weak_cache_enabled(mut self, enabled: bool) -> Self {
        self.weak_cache_enabled = enabled;
        self
    }

    pub fn default_options(mut self, options: ApiOptions) -> Self {
        self.default_options = options;
        self
    }

    pub fn strong_cache_capacity(mut self, capacity: usize) -> Self {
        self.strong_cache_capacity = Some(capacity);
        self
    }
}
