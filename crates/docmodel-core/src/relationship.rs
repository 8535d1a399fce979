//! Relationship ids, lazy fetching and bulk child resolution.
//!
//! A relationship field pointing at a model with an identity field can hold
//! either the related object itself or, before it has been fetched, just its
//! id. Ids arrive from documents (`{name}_id` keys) or from writes to the
//! `{name}_id` attribute, and are kept as pending ids in the instance state.
//! The first read of the relationship fetches the object through the
//! related model's [`IdentityFetcher`], consulting the object caches first.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::cache::ObjectCache;
use crate::convert::Direction;
use crate::error::{Error, Result, UsageErrorKind};
use crate::model::{Instance, ModelRef};
use crate::structure::{ID_FIELD, Registry, Structure};
use crate::value::Value;

/// Looks up model objects by identity on behalf of the runtime.
///
/// Implementations must tolerate ids that do not exist by returning
/// `Ok(None)`.
pub trait IdentityFetcher: Send + Sync {
    fn fetch_by_identity(&self, structure: &Structure, id: &Value) -> Result<Option<ModelRef>>;

    /// Fetch several objects at once. Missing ids are left out of the result.
    fn fetch_many(&self, structure: &Structure, ids: &[Value]) -> Result<Vec<ModelRef>> {
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(object) = self.fetch_by_identity(structure, id)? {
                found.push(object);
            }
        }
        Ok(found)
    }
}

impl<F> IdentityFetcher for F
where
    F: Fn(&Structure, &Value) -> Result<Option<ModelRef>> + Send + Sync,
{
    fn fetch_by_identity(&self, structure: &Structure, id: &Value) -> Result<Option<ModelRef>> {
        self(structure, id)
    }
}

/// What is known about the id of a relationship field.
#[derive(Debug, Clone, PartialEq)]
pub enum RelatedId {
    /// The related object is already materialized (only when asked to report it)
    ChildSet,
    /// Explicitly null
    Null,
    Id(Value),
    /// Nothing known yet
    Unknown,
}

impl RelatedId {
    /// `Value::Null` for an explicit null, the id itself, or `None`.
    pub fn into_option(self) -> Option<Value> {
        match self {
            RelatedId::Id(id) => Some(id),
            RelatedId::Null => Some(Value::Null),
            RelatedId::ChildSet | RelatedId::Unknown => None,
        }
    }
}

/// Convert an incoming id into the child's id field type.
fn convert_id(child: &Structure, id: &Value) -> Result<Value> {
    match child.field(ID_FIELD) {
        Some(field) => match &field.converter {
            Some(converter) => converter.convert(Direction::ToModel, field, id.clone()),
            None => Ok(id.clone()),
        },
        None => Ok(id.clone()),
    }
}

impl Instance {
    fn ensure_child_with_id(&self, name: &str) -> Result<()> {
        if self.structure().is_field_a_child(name, true)? {
            return Ok(());
        }
        Err(Error::usage(
            UsageErrorKind::NotARelationship,
            format!(
                "{}.{} is not a relationship to a model with an id field",
                self.model_name(),
                name
            ),
        ))
    }

    /// Record the id of the object a relationship field points at.
    ///
    /// A materialized child with the same id is kept. A null id nulls out a
    /// child that already has an id; a child without an id yet is left
    /// alone. Any other id drops the materialized child, so the next read
    /// fetches the object by that id.
    pub fn set_related_id(&mut self, name: &str, id: Option<Value>) -> Result<()> {
        self.ensure_child_with_id(name)?;
        let child = self.peek(name);

        match (&child, &id) {
            (Some(Value::Model(existing)), Some(id)) if !id.is_null() => {
                let incoming = convert_id(existing.structure(), id)?;
                if self.child_id(name, existing).as_ref() == Some(&incoming) {
                    return Ok(());
                }
            }
            (Some(Value::Model(existing)), None) if self.child_id(name, existing).is_none() => {
                return Ok(());
            }
            (Some(Value::Null), Some(Value::Null)) => return Ok(()),
            (Some(Value::Model(existing)), Some(Value::Null)) => {
                if existing.structure().has_id_field() && self.child_id(name, existing).is_some() {
                    self.state_mut().clear_pending_related_id(name);
                    self.store(name, Some(Value::Null));
                }
                return Ok(());
            }
            (_, Some(Value::Null)) => {
                self.state_mut().clear_pending_related_id(name);
                self.store(name, Some(Value::Null));
                return Ok(());
            }
            _ => {}
        }

        if child.is_some() {
            self.unset(name);
        }
        match id {
            Some(id) => {
                tracing::trace!(model = self.model_name(), field = name, id = ?id, "stored pending related id");
                self.state_mut().set_pending_related_id(name, id);
            }
            None => {
                self.state_mut().clear_pending_related_id(name);
            }
        }
        Ok(())
    }

    /// The id of the object a relationship field points at, without fetching it.
    ///
    /// With `return_false_if_child_set`, a materialized child is reported as
    /// [`RelatedId::ChildSet`] instead of its id.
    pub fn get_related_id(&self, name: &str, return_false_if_child_set: bool) -> Result<RelatedId> {
        self.ensure_child_with_id(name)?;
        Ok(match self.peek(name) {
            Some(_) if return_false_if_child_set => RelatedId::ChildSet,
            Some(Value::Null) => RelatedId::Null,
            Some(Value::Model(child)) => match self.child_id(name, &child) {
                Some(Value::Null) => RelatedId::Null,
                Some(id) => RelatedId::Id(id),
                None => RelatedId::Unknown,
            },
            Some(_) => RelatedId::Unknown,
            None => match self.state().pending_related_id(name) {
                Some(Value::Null) => RelatedId::Null,
                Some(id) => RelatedId::Id(id.clone()),
                None => RelatedId::Unknown,
            },
        })
    }
}

fn cached(registry: &Registry, structure: &Structure, key: &str, caches_by_id: bool) -> Option<ModelRef> {
    if let Some(object) = registry.weak_cache().get(structure.name(), key) {
        tracing::debug!(model = structure.name(), key = key, "weak cache hit");
        return Some(object);
    }
    if caches_by_id {
        if let Some(object) = registry.strong_cache().get(structure.name(), key) {
            tracing::debug!(model = structure.name(), key = key, "strong cache hit");
            return Some(object);
        }
    }
    tracing::debug!(model = structure.name(), key = key, "cache miss");
    None
}

fn remember(registry: &Registry, structure: &Structure, key: &str, object: &ModelRef, caches_by_id: bool) {
    registry.weak_cache().set(structure.name(), key, object);
    if caches_by_id {
        registry.strong_cache().set(structure.name(), key, object);
    }
}

/// Decimal and UUID ids are queried by their text form.
fn query_id(id: &Value) -> Value {
    match id {
        Value::Decimal(d) => Value::Text(d.to_string()),
        other => other.clone(),
    }
}

/// Get the `structure` object with identity `id`: from the weak cache, then
/// the strong cache (when `cache_by_id` is on), then the model's fetcher.
///
/// Fetched objects are cached. With `auto_get_child_objects` on, their own
/// pending children are bulk-fetched right away (one level deep).
pub fn get_via_id(structure: &Structure, id: &Value) -> Result<Option<ModelRef>> {
    if id.is_null() {
        return Ok(None);
    }
    let registry = structure.registry()?;
    let options = structure.effective_options()?;
    let key = structure.id_cache_key(id);

    if let Some(object) = cached(&registry, structure, &key, options.caches_by_id()) {
        return Ok(Some(object));
    }

    let Some(fetcher) = registry.fetcher(structure.name()) else {
        tracing::debug!(model = structure.name(), "no identity fetcher registered");
        return Ok(None);
    };
    tracing::trace!(model = structure.name(), id = ?id, "fetching by identity");
    let fetched = fetcher.fetch_by_identity(structure, &query_id(id))?;

    if let Some(object) = &fetched {
        remember(&registry, structure, &key, object, options.caches_by_id());
        if options.auto_gets_child_objects() {
            match object.try_write() {
                Some(mut guard) => {
                    bulk_fetch_related(&mut [&mut *guard])?;
                }
                None => tracing::debug!(
                    model = structure.name(),
                    "fetched object is locked; not fetching its children"
                ),
            }
        }
    }
    Ok(fetched)
}

struct Wanted {
    id: Value,
    /// (instance index, field name)
    targets: Vec<(usize, String)>,
}

/// Fetch every pending related object of `instances`, one fetch per related
/// model type, and assign them.
///
/// Children that are already materialized are left alone, and ids shared by
/// several instances are fetched once. Only one level is resolved: children
/// of the fetched objects stay pending. Returns how many fields were filled.
#[tracing::instrument(level = "debug", skip(instances), fields(count = instances.len()))]
pub fn bulk_fetch_related(instances: &mut [&mut Instance]) -> Result<usize> {
    let Some(first) = instances.first() else {
        return Ok(0);
    };
    let registry = first.structure().registry()?;

    // Related model name to (structure, cache key to wanted id)
    let mut wanted: BTreeMap<String, (Arc<Structure>, BTreeMap<String, Wanted>)> = BTreeMap::new();
    for (index, instance) in instances.iter().enumerate() {
        let structure = Arc::clone(instance.structure());
        for field in structure.fields() {
            if !structure.is_field_a_child(&field.name, true)? {
                continue;
            }
            let RelatedId::Id(id) = instance.get_related_id(&field.name, true)? else {
                continue;
            };
            let related = structure.related_structure(&field.name)?;
            let key = related.id_cache_key(&id);
            let (_, ids) = wanted
                .entry(related.name().to_string())
                .or_insert_with(|| (Arc::clone(&related), BTreeMap::new()));
            ids.entry(key)
                .or_insert_with(|| Wanted {
                    id,
                    targets: Vec::new(),
                })
                .targets
                .push((index, field.name.clone()));
        }
    }

    let mut assigned = 0;
    for (model, (related, ids)) in wanted {
        let caches_by_id = related.effective_options()?.caches_by_id();
        let mut found: HashMap<String, ModelRef> = HashMap::new();
        let mut missing = Vec::new();
        for (key, entry) in &ids {
            match cached(&registry, &related, key, caches_by_id) {
                Some(object) => {
                    found.insert(key.clone(), object);
                }
                None => missing.push(query_id(&entry.id)),
            }
        }

        if !missing.is_empty() {
            match registry.fetcher(&model) {
                Some(fetcher) => {
                    tracing::debug!(model = %model, ids = missing.len(), "bulk fetching related objects");
                    for object in fetcher.fetch_many(&related, &missing)? {
                        let Some(id) = object.read().peek(ID_FIELD) else {
                            continue;
                        };
                        let key = related.id_cache_key(&id);
                        remember(&registry, &related, &key, &object, caches_by_id);
                        found.insert(key, object);
                    }
                }
                None => tracing::debug!(model = %model, "no identity fetcher registered"),
            }
        }

        for (key, entry) in ids {
            let Some(object) = found.get(&key) else {
                continue;
            };
            for (index, field) in entry.targets {
                instances[index].set(&field, object.clone())?;
                assigned += 1;
            }
        }
    }
    Ok(assigned)
}

/// A materialized child object and the field it is set on.
#[derive(Debug, Clone)]
pub struct ChildRef {
    pub field: String,
    pub child: ModelRef,
}

/// Every relationship field of `instance` that holds an object right now.
/// Nothing is fetched.
pub fn existing_children(instance: &Instance) -> Vec<ChildRef> {
    instance
        .structure()
        .fields()
        .iter()
        .filter(|field| field.is_relationship())
        .filter_map(|field| match instance.peek(&field.name) {
            Some(Value::Model(child)) => Some(ChildRef {
                field: field.name.clone(),
                child,
            }),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{ApiOptions, RegistryConfig};
    use crate::structure::ModelSchema;
    use crate::types::{FieldKind, TypeHint};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn registry_with(config: RegistryConfig, child_options: ApiOptions) -> Registry {
        let registry = Registry::with_config(config);
        registry
            .register(
                ModelSchema::new("Child")
                    .attr("id", FieldKind::Int)
                    .attr("name", FieldKind::Str)
                    .attr("parent", TypeHint::nullable(FieldKind::model("Parent")))
                    .options(child_options),
            )
            .unwrap();
        registry
            .register(
                ModelSchema::new("Parent")
                    .attr("id", FieldKind::Int)
                    .attr("child", TypeHint::nullable(FieldKind::model("Child")))
                    .attr("other", TypeHint::nullable(FieldKind::model("Child")))
                    .attr("title", FieldKind::Str),
            )
            .unwrap();
        registry
    }

    fn registry() -> Registry {
        registry_with(RegistryConfig::default(), ApiOptions::default())
    }

    /// Builds `Child` objects named after their id and counts calls.
    #[derive(Clone, Default)]
    struct CountingFetcher {
        single: Arc<AtomicUsize>,
        many: Arc<Mutex<Vec<usize>>>,
    }

    impl IdentityFetcher for CountingFetcher {
        fn fetch_by_identity(&self, structure: &Structure, id: &Value) -> Result<Option<ModelRef>> {
            self.single.fetch_add(1, Ordering::SeqCst);
            if *id == Value::Int(404) {
                return Ok(None);
            }
            let mut child = structure.registry()?.new_instance(structure.name())?;
            child.set("id", id.clone())?;
            child.set("name", format!("child {:?}", id))?;
            Ok(Some(ModelRef::new(child)))
        }

        fn fetch_many(&self, structure: &Structure, ids: &[Value]) -> Result<Vec<ModelRef>> {
            self.many.lock().unwrap().push(ids.len());
            let mut out = Vec::new();
            for id in ids {
                let mut child = structure.registry()?.new_instance(structure.name())?;
                child.set("id", id.clone())?;
                out.push(ModelRef::new(child));
            }
            Ok(out)
        }
    }

    fn child(registry: &Registry, id: i64) -> ModelRef {
        let mut child = registry.new_instance("Child").unwrap();
        child.set("id", id).unwrap();
        ModelRef::new(child)
    }

    #[test]
    fn test_related_id_from_materialized_child() {
        let registry = registry();
        let mut parent = registry.new_instance("Parent").unwrap();
        parent.set("child", child(&registry, 5)).unwrap();
        assert_eq!(parent.get("child_id").unwrap(), Some(Value::Int(5)));
        assert_eq!(
            parent.get_related_id("child", true).unwrap(),
            RelatedId::ChildSet
        );
    }

    #[test]
    fn test_self_reference_reports_own_id() {
        let registry = Registry::new();
        registry
            .register(
                ModelSchema::new("Node")
                    .attr("id", FieldKind::Int)
                    .attr("next", TypeHint::nullable(FieldKind::model("Node"))),
            )
            .unwrap();
        let mut node = registry.new_instance("Node").unwrap();
        node.set("id", 1).unwrap();
        let node = ModelRef::new(node);

        let mut guard = node.write();
        guard.set("next", node.clone()).unwrap();
        assert_eq!(guard.get("next_id").unwrap(), Some(Value::Int(1)));
        assert_eq!(
            guard.get_related_id("next", false).unwrap(),
            RelatedId::Id(Value::Int(1))
        );
        let exported = guard.to_document(false).unwrap().unwrap();
        assert_eq!(exported.get("next_id"), Some(&serde_json::Value::from(1)));

        guard.set_related_id("next", Some(Value::Int(1))).unwrap();
        assert_eq!(guard.peek("next"), Some(Value::Model(node.clone())));
        guard.unset("next");
    }

    #[test]
    fn test_locked_child_reports_id_from_assignment() {
        let registry = registry();
        let mut parent = registry.new_instance("Parent").unwrap();
        let existing = child(&registry, 5);
        parent.set("child", existing.clone()).unwrap();

        let _busy = existing.write();
        assert_eq!(parent.get("child_id").unwrap(), Some(Value::Int(5)));
        parent.set_related_id("child", Some(Value::Int(5))).unwrap();
        assert_eq!(parent.peek("child"), Some(Value::Model(existing.clone())));
    }

    #[test]
    fn test_locked_fetched_child_keeps_pending_id() {
        let registry = registry();
        let shared = child(&registry, 8);
        let served = shared.clone();
        registry.set_fetcher("Child", move |_: &Structure, _: &Value| -> Result<Option<ModelRef>> {
            Ok(Some(served.clone()))
        });
        let mut parent = registry.new_instance("Parent").unwrap();
        parent.set("child_id", 8).unwrap();

        let _busy = shared.write();
        assert_eq!(parent.get_model("child").unwrap(), Some(shared.clone()));
        assert_eq!(parent.get("child_id").unwrap(), Some(Value::Int(8)));
    }

    #[test]
    fn test_non_relationship_is_usage_error() {
        let registry = registry();
        let mut parent = registry.new_instance("Parent").unwrap();
        assert_eq!(
            parent
                .set_related_id("title", Some(Value::Int(1)))
                .unwrap_err()
                .usage_kind(),
            Some(UsageErrorKind::NotARelationship)
        );
        assert!(parent.get_related_id("title", false).is_err());
    }

    #[test]
    fn test_lazy_fetch_happens_once() {
        let registry = registry();
        let fetcher = CountingFetcher::default();
        registry.set_fetcher("Child", fetcher.clone());

        let mut parent = registry.new_instance("Parent").unwrap();
        parent.set("child_id", 20).unwrap();
        assert!(!parent.is_materialized("child"));
        assert_eq!(parent.get("child_id").unwrap(), Some(Value::Int(20)));

        let first = parent.get_model("child").unwrap().unwrap();
        let second = parent.get_model("child").unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.read().peek("id"), Some(Value::Int(20)));
        assert_eq!(fetcher.single.load(Ordering::SeqCst), 1);
        assert!(parent.state().pending_related_id("child").is_none());
    }

    #[test]
    fn test_missing_object_leaves_attribute_unset() {
        let registry = registry();
        registry.set_fetcher("Child", CountingFetcher::default());
        let mut parent = registry.new_instance("Parent").unwrap();
        parent.set("child_id", 404).unwrap();
        assert_eq!(parent.get("child").unwrap(), None);
        assert_eq!(parent.get("child_id").unwrap(), Some(Value::Int(404)));
    }

    #[test]
    fn test_fetch_errors_propagate() {
        let registry = registry();
        registry.set_fetcher("Child", |structure: &Structure, id: &Value| -> Result<Option<ModelRef>> {
            Err(Error::Fetch(crate::error::FetchError {
                model: structure.name().to_string(),
                id: format!("{:?}", id),
                source: None,
            }))
        });
        let mut parent = registry.new_instance("Parent").unwrap();
        parent.set("child_id", 1).unwrap();
        let err = parent.get("child").unwrap_err();
        assert!(matches!(err, Error::Fetch(ref e) if e.model == "Child"));
        assert!(parent.state().pending_related_id("child").is_some());
    }

    #[test]
    fn test_same_id_keeps_child() {
        let registry = registry();
        let mut parent = registry.new_instance("Parent").unwrap();
        let existing = child(&registry, 5);
        parent.set("child", existing.clone()).unwrap();
        parent.set_related_id("child", Some(Value::from("5"))).unwrap();
        assert_eq!(parent.peek("child"), Some(Value::Model(existing)));
    }

    #[test]
    fn test_different_id_drops_child() {
        let registry = registry();
        let mut parent = registry.new_instance("Parent").unwrap();
        parent.set("child", child(&registry, 5)).unwrap();
        parent.set("child_id", 6).unwrap();
        assert!(!parent.is_materialized("child"));
        assert_eq!(
            parent.get_related_id("child", false).unwrap(),
            RelatedId::Id(Value::Int(6))
        );
    }

    #[test]
    fn test_null_id() {
        let registry = registry();
        let mut parent = registry.new_instance("Parent").unwrap();
        parent.set("child_id", Value::Null).unwrap();
        assert_eq!(parent.peek("child"), Some(Value::Null));
        assert_eq!(parent.get_related_id("child", false).unwrap(), RelatedId::Null);

        // A child that has no id yet is not replaced by a null id.
        let unsaved = ModelRef::new(registry.new_instance("Child").unwrap());
        parent.set("other", unsaved.clone()).unwrap();
        parent.set_related_id("other", Some(Value::Null)).unwrap();
        assert_eq!(parent.peek("other"), Some(Value::Model(unsaved)));

        parent.set("other", child(&registry, 3)).unwrap();
        parent.set_related_id("other", Some(Value::Null)).unwrap();
        assert_eq!(parent.peek("other"), Some(Value::Null));
    }

    #[test]
    fn test_pending_null_resolves_to_null() {
        let registry = registry();
        let mut parent = registry.new_instance("Parent").unwrap();
        parent.state_mut().set_pending_related_id("child", Value::Null);
        assert_eq!(parent.get("child").unwrap(), Some(Value::Null));
        assert!(parent.is_materialized("child"));
    }

    #[test]
    fn test_setting_object_clears_pending_id() {
        let registry = registry();
        let mut parent = registry.new_instance("Parent").unwrap();
        parent.set("child_id", 9).unwrap();
        parent.set("child", child(&registry, 1)).unwrap();
        assert!(parent.state().pending_related_id("child").is_none());
        assert_eq!(parent.get("child_id").unwrap(), Some(Value::Int(1)));
    }

    #[test]
    fn test_strong_cache_when_cache_by_id() {
        let registry = registry_with(
            RegistryConfig::default(),
            ApiOptions::new().with_cache_by_id(true),
        );
        let fetcher = CountingFetcher::default();
        registry.set_fetcher("Child", fetcher.clone());

        let mut a = registry.new_instance("Parent").unwrap();
        let mut b = registry.new_instance("Parent").unwrap();
        a.set("child_id", 7).unwrap();
        b.set("child_id", 7).unwrap();
        let from_a = a.get_model("child").unwrap().unwrap();
        let from_b = b.get_model("child").unwrap().unwrap();
        assert_eq!(from_a, from_b);
        assert_eq!(fetcher.single.load(Ordering::SeqCst), 1);
        assert_eq!(registry.strong_cache().len(), 1);

        {
            let _scope = registry.options_scope("Child", ApiOptions::new().with_cache_by_id(false));
            let mut c = registry.new_instance("Parent").unwrap();
            c.set("child_id", 7).unwrap();
            let from_c = c.get_model("child").unwrap().unwrap();
            assert_ne!(from_c, from_a);
        }
        assert_eq!(fetcher.single.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_weak_cache_shares_live_objects() {
        let registry = registry_with(
            RegistryConfig::new().weak_cache_enabled(true),
            ApiOptions::default(),
        );
        let fetcher = CountingFetcher::default();
        registry.set_fetcher("Child", fetcher.clone());

        let mut a = registry.new_instance("Parent").unwrap();
        a.set("child_id", 8).unwrap();
        let held = a.get_model("child").unwrap().unwrap();

        let mut b = registry.new_instance("Parent").unwrap();
        b.set("child_id", 8).unwrap();
        assert_eq!(b.get_model("child").unwrap().unwrap(), held);
        assert_eq!(fetcher.single.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_decimal_ids_are_fetched_as_text() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let registry = registry();
        registry.set_fetcher("Child", move |_: &Structure, id: &Value| -> Result<Option<ModelRef>> {
            log.lock().unwrap().push(id.clone());
            Ok(None)
        });
        let related = registry.structure("Child").unwrap();
        get_via_id(&related, &Value::Decimal(rust_decimal::Decimal::new(15, 1))).unwrap();
        assert_eq!(seen.lock().unwrap().as_slice(), &[Value::from("1.5")]);
    }

    #[test]
    fn test_bulk_fetch_dedupes_ids() {
        let registry = registry();
        let fetcher = CountingFetcher::default();
        registry.set_fetcher("Child", fetcher.clone());

        let mut a = registry.new_instance("Parent").unwrap();
        let mut b = registry.new_instance("Parent").unwrap();
        let mut c = registry.new_instance("Parent").unwrap();
        a.set("child_id", 1).unwrap();
        a.set("other_id", 2).unwrap();
        b.set("child_id", 1).unwrap();
        c.set("child", child(&registry, 3)).unwrap();

        let assigned = bulk_fetch_related(&mut [&mut a, &mut b, &mut c]).unwrap();
        assert_eq!(assigned, 3);
        assert_eq!(*fetcher.many.lock().unwrap(), vec![2]);
        assert_eq!(fetcher.single.load(Ordering::SeqCst), 0);
        assert_eq!(a.peek("child"), b.peek("child"));
        assert!(a.is_materialized("other"));
        assert_eq!(c.get("child_id").unwrap(), Some(Value::Int(3)));
    }

    #[test]
    fn test_auto_get_child_objects() {
        let registry = registry_with(
            RegistryConfig::default(),
            ApiOptions::new().with_auto_get_child_objects(true),
        );
        let parents = CountingFetcher::default();
        registry.set_fetcher("Child", move |structure: &Structure, id: &Value| -> Result<Option<ModelRef>> {
            let mut child = structure.registry()?.new_instance(structure.name())?;
            child.set("id", id.clone())?;
            child.set("parent_id", 100)?;
            Ok(Some(ModelRef::new(child)))
        });
        registry.set_fetcher("Parent", parents.clone());

        let mut parent = registry.new_instance("Parent").unwrap();
        parent.set("child_id", 1).unwrap();
        let child = parent.get_model("child").unwrap().unwrap();
        assert!(child.read().is_materialized("parent"));
        assert_eq!(parents.many.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_existing_children() {
        let registry = registry();
        let mut parent = registry.new_instance("Parent").unwrap();
        parent.set("child", child(&registry, 1)).unwrap();
        parent.set("other_id", 2).unwrap();
        let children = existing_children(&parent);
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].field, "child");
    }
}
