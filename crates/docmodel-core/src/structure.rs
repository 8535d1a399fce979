//! Model schemas, resolved structures, and the registry that owns them.
//!
//! A [`ModelSchema`] is the explicit declaration of one model type: its
//! fields, an optional parent to inherit from, and its API options. Schemas
//! are registered in a [`Registry`], which turns each one into a
//! [`Structure`] the first time it is needed and caches the result.
//!
//! Field resolution walks the ancestor chain: a field redeclared on a child
//! model starts from the nearest ancestor's resolved field and only overrides
//! what it sets itself.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, RwLock, Weak};

use crate::cache::{ObjectCache, StrongCache, WeakCachePool};
use crate::convert::{DefaultConverters, float_to_string};
use crate::document::Document;
use crate::error::{ConfigError, Error, Result, UsageErrorKind};
use crate::field::{DefaultValue, Field, FieldInfo, ResolveContext};
use crate::model::{Instance, value_matches};
use crate::options::{ApiOptions, OptionsScope, RegistryConfig, ScopeStacks};
use crate::pattern::{IDENTIFIER, matches_pattern};
use crate::relationship::IdentityFetcher;
use crate::types::{FieldKind, TypeHint};
use crate::value::Value;

/// Attribute names that are never treated as fields.
const RESERVED_NAME: &str = "api";
const INTERNAL_PREFIX: char = '_';

/// Name of the identity field.
pub const ID_FIELD: &str = "id";

fn is_skipped_name(name: &str) -> bool {
    name.starts_with(INTERNAL_PREFIX) || name == RESERVED_NAME
}

enum Declaration {
    Field(Field),
    /// Wrapped into a copy of the schema's field template at build time
    Auto {
        name: String,
        hint: TypeHint,
        default: Option<Value>,
        getter: Option<crate::field::Getter>,
        setter: Option<crate::field::Setter>,
    },
}

impl Declaration {
    fn name(&self) -> Option<&str> {
        match self {
            Declaration::Field(field) => field.name(),
            Declaration::Auto { name, .. } => Some(name),
        }
    }

    fn into_field(self, template: Option<&Field>) -> Field {
        match self {
            Declaration::Field(field) => field,
            Declaration::Auto {
                name,
                hint,
                default,
                getter,
                setter,
            } => {
                let mut field = template.cloned().unwrap_or_default().with_name(&name);
                field = field.kind(hint);
                if let Some(default) = default {
                    field = field.with_default_if_unset(DefaultValue::Value(default));
                }
                if let Some(getter) = getter {
                    field = field.getter(move |instance: &Instance| getter(instance));
                }
                if let Some(setter) = setter {
                    field = field.setter(move |instance: &mut Instance, value: Option<Value>| {
                        setter(instance, value)
                    });
                }
                field
            }
        }
    }
}

/// Declaration of one model type.
///
/// # Example
///
/// ```ignore
/// let schema = ModelSchema::new("Account")
///     .attr("id", FieldKind::Int)
///     .field(Field::new("email").kind(FieldKind::Str).post_filter(LowerFilter))
///     .attr_with_default("status", FieldKind::Str, "active");
/// registry.register(schema)?;
/// ```
pub struct ModelSchema {
    name: String,
    parent: Option<String>,
    declarations: Vec<Declaration>,
    options: ApiOptions,
    field_template: Option<Field>,
}

impl ModelSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            declarations: Vec::new(),
            options: ApiOptions::default(),
            field_template: None,
        }
    }

    /// Declare a field.
    pub fn field(mut self, field: Field) -> Self {
        self.declarations.push(Declaration::Field(field));
        self
    }

    /// Declare a plain attribute, built from the field template.
    pub fn attr(mut self, name: impl Into<String>, kind: impl Into<TypeHint>) -> Self {
        self.declarations.push(Declaration::Auto {
            name: name.into(),
            hint: kind.into(),
            default: None,
            getter: None,
            setter: None,
        });
        self
    }

    /// Declare a plain attribute with a default value.
    pub fn attr_with_default(
        mut self,
        name: impl Into<String>,
        kind: impl Into<TypeHint>,
        default: impl Into<Value>,
    ) -> Self {
        self.declarations.push(Declaration::Auto {
            name: name.into(),
            hint: kind.into(),
            default: Some(default.into()),
            getter: None,
            setter: None,
        });
        self
    }

    /// Declare a computed, read-only attribute.
    pub fn property<G>(mut self, name: impl Into<String>, kind: impl Into<TypeHint>, getter: G) -> Self
    where
        G: Fn(&Instance) -> Result<Option<Value>> + Send + Sync + 'static,
    {
        self.declarations.push(Declaration::Auto {
            name: name.into(),
            hint: kind.into(),
            default: None,
            getter: Some(Arc::new(getter)),
            setter: None,
        });
        self
    }

    /// Declare a computed attribute that can also be written.
    pub fn property_with_setter<G, S>(
        mut self,
        name: impl Into<String>,
        kind: impl Into<TypeHint>,
        getter: G,
        setter: S,
    ) -> Self
    where
        G: Fn(&Instance) -> Result<Option<Value>> + Send + Sync + 'static,
        S: Fn(&mut Instance, Option<Value>) -> Result<()> + Send + Sync + 'static,
    {
        self.declarations.push(Declaration::Auto {
            name: name.into(),
            hint: kind.into(),
            default: None,
            getter: Some(Arc::new(getter)),
            setter: Some(Arc::new(setter)),
        });
        self
    }

    /// Inherit fields and options from another registered model.
    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn options(mut self, options: ApiOptions) -> Self {
        self.options = options;
        self
    }

    /// Field that attributes declared with [`attr`](Self::attr) and friends start from.
    pub fn field_template(mut self, template: Field) -> Self {
        self.field_template = Some(template);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    fn declares(&self, name: &str) -> bool {
        self.declarations.iter().any(|d| d.name() == Some(name))
    }
}

impl fmt::Debug for ModelSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.declarations.iter().filter_map(Declaration::name).collect();
        f.debug_struct("ModelSchema")
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("fields", &names)
            .field("options", &self.options)
            .finish()
    }
}

/// The resolved, immutable field set of one model type.
pub struct Structure {
    name: Arc<str>,
    /// Nearest ancestor first
    ancestors: Vec<Arc<str>>,
    fields: Vec<FieldInfo>,
    index: HashMap<String, usize>,
    options: ApiOptions,
    registry: Weak<RegistryInner>,
}

impl Structure {
    /// Model name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ancestor model names, nearest first.
    pub fn ancestors(&self) -> &[Arc<str>] {
        &self.ancestors
    }

    /// Fields in declaration order, inherited fields first.
    pub fn fields(&self) -> &[FieldInfo] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.index.get(name).map(|&i| &self.fields[i])
    }

    pub fn field_map(&self) -> BTreeMap<&str, &FieldInfo> {
        self.fields.iter().map(|f| (f.name.as_str(), f)).collect()
    }

    /// Fields the remote side should not send unless asked.
    pub fn excluded_field_map(&self) -> BTreeMap<&str, &FieldInfo> {
        self.fields
            .iter()
            .filter(|f| f.exclude)
            .map(|f| (f.name.as_str(), f))
            .collect()
    }

    /// Options declared on this model and its ancestors, without registry
    /// defaults or active scopes.
    pub fn options(&self) -> ApiOptions {
        self.options
    }

    pub fn has_id_field(&self) -> bool {
        self.index.contains_key(ID_FIELD)
    }

    /// Is this model `model` or one of its descendants?
    pub fn is_a(&self, model: &str) -> bool {
        self.name.as_ref() == model || self.ancestors.iter().any(|a| a.as_ref() == model)
    }

    /// The cache key for an object of this type with identity `id`.
    ///
    /// A mapping id (composite identity) is keyed by its entries in sorted
    /// key order.
    pub fn id_cache_key(&self, id: &Value) -> String {
        match id {
            Value::Map(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                let mut key = self.name.to_string();
                for k in keys {
                    key.push('-');
                    key.push_str(k);
                    key.push('-');
                    key.push_str(&json_key_component(&map[k]));
                }
                key
            }
            other => format!("{}-id-{}", self.name, key_component(other)),
        }
    }

    /// The registry this structure was built by.
    pub fn registry(&self) -> Result<Registry> {
        self.registry
            .upgrade()
            .map(|inner| Registry { inner })
            .ok_or_else(|| {
                Error::usage(
                    UsageErrorKind::Detached,
                    format!("structure for {} outlived its registry", self.name),
                )
            })
    }

    /// Options in effect right now: active scopes, then this model's own,
    /// then registry defaults.
    pub fn effective_options(&self) -> Result<ApiOptions> {
        self.registry()?.effective_options(&self.name)
    }

    /// Is `name` a relationship field? With `and_has_id`, the related model
    /// must also have an identity field.
    pub fn is_field_a_child(&self, name: &str, and_has_id: bool) -> Result<bool> {
        let Some(related) = self.field(name).and_then(|f| f.related_type.as_ref()) else {
            return Ok(false);
        };
        if !and_has_id {
            return Ok(true);
        }
        self.registry()?.schema_has_id(related)
    }

    /// Structure of the model a relationship field points at.
    pub fn related_structure(&self, field_name: &str) -> Result<Arc<Structure>> {
        let related = self
            .field(field_name)
            .and_then(|f| f.related_type.clone())
            .ok_or_else(|| {
                Error::usage(
                    UsageErrorKind::NotARelationship,
                    format!("{}.{} is not a relationship field", self.name, field_name),
                )
            })?;
        self.registry()?.structure(&related)
    }
}

fn key_component(value: &Value) -> String {
    match value {
        Value::Text(s) => s.clone(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => float_to_string(*f),
        Value::Decimal(d) => d.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Enum(e) => key_component(&e.raw),
        other => other
            .to_json()
            .map(|json| json_key_component(&json))
            .unwrap_or_else(|_| format!("{:?}", other)),
    }
}

fn json_key_component(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl fmt::Debug for Structure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.fields.iter().map(|f| f.name.as_str()).collect();
        f.debug_struct("Structure")
            .field("name", &self.name)
            .field("ancestors", &self.ancestors)
            .field("fields", &names)
            .finish_non_exhaustive()
    }
}

pub(crate) struct RegistryInner {
    schemas: RwLock<HashMap<String, Arc<ModelSchema>>>,
    structures: RwLock<HashMap<String, Arc<Structure>>>,
    fetchers: RwLock<HashMap<String, Arc<dyn IdentityFetcher>>>,
    scopes: Arc<ScopeStacks>,
    strong_cache: StrongCache,
    weak_cache: WeakCachePool,
    default_converters: DefaultConverters,
    config: RegistryConfig,
}

/// Owns model schemas, their cached structures, fetchers and object caches.
///
/// `Registry` is a cheap handle; clones share everything.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        Self::with_converters(config, DefaultConverters::standard())
    }

    /// Use a custom set of default converters.
    pub fn with_converters(config: RegistryConfig, default_converters: DefaultConverters) -> Self {
        let strong_cache = match config.strong_cache_capacity {
            Some(capacity) => StrongCache::with_capacity(capacity),
            None => StrongCache::new(),
        };
        Self {
            inner: Arc::new(RegistryInner {
                schemas: RwLock::new(HashMap::new()),
                structures: RwLock::new(HashMap::new()),
                fetchers: RwLock::new(HashMap::new()),
                scopes: Arc::new(ScopeStacks::default()),
                strong_cache,
                weak_cache: WeakCachePool::new(config.weak_cache_enabled),
                default_converters,
                config,
            }),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    pub fn default_converters(&self) -> &DefaultConverters {
        &self.inner.default_converters
    }

    pub fn strong_cache(&self) -> &StrongCache {
        &self.inner.strong_cache
    }

    pub fn weak_cache(&self) -> &WeakCachePool {
        &self.inner.weak_cache
    }

    /// Register a model schema. Each name can be registered once.
    pub fn register(&self, schema: ModelSchema) -> Result<()> {
        if !matches_pattern(&schema.name, IDENTIFIER) {
            return Err(ConfigError::new("model name is not a valid identifier")
                .model(&schema.name)
                .into());
        }
        if schema.parent.as_deref() == Some(schema.name.as_str()) {
            return Err(ConfigError::new("model can't extend itself")
                .model(&schema.name)
                .into());
        }
        let mut schemas = self.inner.schemas.write().unwrap_or_else(|e| e.into_inner());
        if schemas.contains_key(&schema.name) {
            return Err(ConfigError::new("a model with this name is already registered")
                .model(&schema.name)
                .into());
        }
        let name = schema.name.clone();
        schemas.insert(name.clone(), Arc::new(schema));
        tracing::debug!(model = %name, "registered model schema");
        Ok(())
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.inner
            .schemas
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(name)
    }

    /// Registered model names, sorted.
    pub fn model_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .schemas
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn schema(&self, name: &str) -> Result<Arc<ModelSchema>> {
        self.inner
            .schemas
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| {
                Error::usage(
                    UsageErrorKind::UnknownModel,
                    format!("no model named '{}' is registered", name),
                )
            })
    }

    /// The resolved structure for `name`, built on first use.
    pub fn structure(&self, name: &str) -> Result<Arc<Structure>> {
        if let Some(structure) = self
            .inner
            .structures
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
        {
            return Ok(Arc::clone(structure));
        }

        let built = Arc::new(self.build_structure(name)?);
        let mut structures = self
            .inner
            .structures
            .write()
            .unwrap_or_else(|e| e.into_inner());
        // A concurrent build may have finished first; keep whichever was stored first.
        Ok(Arc::clone(
            structures.entry(name.to_string()).or_insert(built),
        ))
    }

    /// Drop the cached structure of `name` and of every model that extends it.
    pub fn invalidate(&self, name: &str) {
        let mut structures = self
            .inner
            .structures
            .write()
            .unwrap_or_else(|e| e.into_inner());
        structures.retain(|_, structure| !structure.is_a(name));
        tracing::debug!(model = name, "invalidated cached structures");
    }

    /// Ancestor names of `name`, nearest first.
    fn ancestor_chain(&self, name: &str) -> Result<Vec<Arc<str>>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        seen.insert(name.to_string());
        let mut current = self.schema(name)?.parent.clone();
        while let Some(parent) = current {
            if !seen.insert(parent.clone()) {
                return Err(ConfigError::new(format!(
                    "inheritance cycle through '{}'",
                    parent
                ))
                .model(name)
                .into());
            }
            let schema = self.schema(&parent).map_err(|_| {
                Error::from(
                    ConfigError::new(format!("parent model '{}' is not registered", parent))
                        .model(name),
                )
            })?;
            chain.push(Arc::from(parent.as_str()));
            current = schema.parent.clone();
        }
        Ok(chain)
    }

    /// Does `name` declare or inherit an identity field?
    ///
    /// Answered from the schemas alone, so relationship cycles between
    /// models never recurse into structure building.
    pub(crate) fn schema_has_id(&self, name: &str) -> Result<bool> {
        let schema = self.schema(name).map_err(|_| {
            Error::from(ConfigError::new(format!(
                "related model '{}' is not registered",
                name
            )))
        })?;
        if schema.declares(ID_FIELD) {
            return Ok(true);
        }
        for ancestor in self.ancestor_chain(name)? {
            if self.schema(&ancestor)?.declares(ID_FIELD) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn is_subtype(&self, model: &str, ancestor: &str) -> bool {
        model == ancestor
            || self
                .ancestor_chain(model)
                .is_ok_and(|chain| chain.iter().any(|a| a.as_ref() == ancestor))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    fn build_structure(&self, name: &str) -> Result<Structure> {
        let schema = self.schema(name)?;
        let ancestors = self.ancestor_chain(name)?;
        let parent = match &schema.parent {
            Some(parent) => Some(self.structure(parent)?),
            None => None,
        };

        let mut fields: Vec<FieldInfo> = parent
            .as_ref()
            .map(|p| p.fields().to_vec())
            .unwrap_or_default();
        for field in &mut fields {
            field.is_foreign_key_of = None;
        }
        let mut index: HashMap<String, usize> = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect();

        let has_id_field = |model: &str| self.schema_has_id(model);
        let is_subtype = |model: &str, ancestor: &str| self.is_subtype(model, ancestor);
        let ctx = ResolveContext {
            model: name,
            default_converters: &self.inner.default_converters,
            has_id_field: &has_id_field,
            is_subtype: &is_subtype,
        };

        let template = schema.field_template.as_ref();
        for declaration in schema.declarations.iter().map(clone_declaration) {
            let Some(field_name) = declaration.name().map(str::to_string) else {
                return Err(ConfigError::new("field declared without a name")
                    .model(name)
                    .into());
            };
            if is_skipped_name(&field_name) {
                tracing::trace!(model = name, field = %field_name, "skipping reserved name");
                continue;
            }
            if !matches_pattern(&field_name, IDENTIFIER) {
                return Err(ConfigError::new("field name is not a valid identifier")
                    .model(name)
                    .field(&field_name)
                    .into());
            }
            let parent_field = parent.as_ref().and_then(|p| p.field(&field_name));
            let resolved = declaration
                .into_field(template)
                .resolve(parent_field, &ctx)?;
            self.validate_field(name, &resolved)?;
            match index.get(&field_name) {
                Some(&i) => fields[i] = resolved,
                None => {
                    index.insert(field_name, fields.len());
                    fields.push(resolved);
                }
            }
        }

        // Link `{name}_id` fields back to the relationship they identify.
        let links: Vec<(usize, String)> = fields
            .iter()
            .filter_map(|f| {
                let id_name = f.related_field_name_for_id.as_ref()?;
                index.get(id_name).map(|&i| (i, f.name.clone()))
            })
            .collect();
        for (i, relationship) in links {
            fields[i].is_foreign_key_of = Some(relationship);
        }

        let mut options = schema.options;
        if let Some(parent) = &parent {
            options.set_unset_values(&parent.options);
        }

        tracing::debug!(model = name, fields = fields.len(), "built structure");
        Ok(Structure {
            name: Arc::from(name),
            ancestors,
            fields,
            index,
            options,
            registry: Arc::downgrade(&self.inner),
        })
    }

    fn validate_field(&self, model: &str, field: &FieldInfo) -> Result<()> {
        let error = |message: String| -> Error {
            ConfigError::new(message)
                .model(model)
                .field(&field.name)
                .into()
        };

        if let Some(related) = &field.related_type {
            if !self.is_registered(related) {
                return Err(error(format!("related model '{}' is not registered", related)));
            }
        }

        if field.converter.is_none() && !self.kind_is_supported(&field.type_hint) {
            return Err(error(format!(
                "type {} is not supported without a converter",
                field.type_hint
            )));
        }

        match &field.default {
            Some(default) if default.is_null() && !field.nullable => Err(error(
                "default is the null sentinel but the field is not nullable".to_string(),
            )),
            Some(DefaultValue::Value(value))
                if field.converter.is_none()
                    && !value.is_null()
                    && !value_matches(&field.type_hint, value)
                    && field.type_hint.element_kind().is_none() =>
            {
                Err(error(format!(
                    "default {:?} does not match type {} and there is no converter",
                    value, field.type_hint
                )))
            }
            _ => Ok(()),
        }
    }

    fn kind_is_supported(&self, kind: &FieldKind) -> bool {
        match kind {
            FieldKind::List(inner) | FieldKind::Set(inner) => {
                inner.is_natively_supported()
                    || self.inner.default_converters.for_kind(inner).is_some()
                    || matches!(inner.as_ref(), FieldKind::Enum(_))
            }
            other => other.is_natively_supported(),
        }
    }

    /// Register the fetcher used to resolve `model` objects by identity.
    pub fn set_fetcher(&self, model: &str, fetcher: impl IdentityFetcher + 'static) {
        self.inner
            .fetchers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(model.to_string(), Arc::new(fetcher));
    }

    /// The fetcher for `model`, falling back to the nearest ancestor's.
    pub fn fetcher(&self, model: &str) -> Option<Arc<dyn IdentityFetcher>> {
        let fetchers = self.inner.fetchers.read().unwrap_or_else(|e| e.into_inner());
        if let Some(fetcher) = fetchers.get(model) {
            return Some(Arc::clone(fetcher));
        }
        self.ancestor_chain(model)
            .ok()?
            .iter()
            .find_map(|ancestor| fetchers.get(ancestor.as_ref()).cloned())
    }

    /// Override options for `model` until the returned guard is dropped.
    pub fn options_scope(&self, model: &str, options: ApiOptions) -> OptionsScope {
        self.inner.scopes.push(model, options)
    }

    /// Options in effect for `model`: active scopes first, then the schema's
    /// own (with ancestors), then the registry defaults.
    pub fn effective_options(&self, model: &str) -> Result<ApiOptions> {
        let structure = self.structure(model)?;
        let mut options = structure.options();
        options.set_unset_values(&self.inner.config.default_options);
        Ok(match self.inner.scopes.current(model) {
            Some(scoped) => scoped.over(&options),
            None => options,
        })
    }

    /// A new, empty instance of `model`.
    pub fn new_instance(&self, model: &str) -> Result<Instance> {
        Ok(Instance::new(self.structure(model)?))
    }

    /// A new instance of `model` populated from a document.
    pub fn new_instance_from_document(&self, model: &str, document: &Document) -> Result<Instance> {
        let mut instance = self.new_instance(model)?;
        instance.from_document(document)?;
        Ok(instance)
    }

    /// A new instance of `model` with same-named fields copied from `other`.
    pub fn new_instance_from(&self, model: &str, other: &Instance) -> Result<Instance> {
        let mut instance = self.new_instance(model)?;
        instance.copy_from(other)?;
        Ok(instance)
    }

    /// Remove one object from both caches.
    pub fn forget_cached(&self, model: &str, key: &str) {
        self.inner.strong_cache.remove(model, key);
        self.inner.weak_cache.remove(model, key);
    }
}

fn clone_declaration(declaration: &Declaration) -> Declaration {
    match declaration {
        Declaration::Field(field) => Declaration::Field(field.clone()),
        Declaration::Auto {
            name,
            hint,
            default,
            getter,
            setter,
        } => Declaration::Auto {
            name: name.clone(),
            hint: hint.clone(),
            default: default.clone(),
            getter: getter.clone(),
            setter: setter.clone(),
        },
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("models", &self.model_names())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}
