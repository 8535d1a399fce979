//! Model instances and the shared handle used to link them.
//!
//! An [`Instance`] is one record of a registered model type. Attribute reads
//! and writes go through [`Instance::get`] and [`Instance::set`], which apply
//! defaulting, conversion, nullability and lazy relationship resolution.
//!
//! Instances that other instances point at are wrapped in a [`ModelRef`], a
//! cheap shared handle with interior locking. Two handles are equal only when
//! they point at the same object.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use chrono::{DateTime, FixedOffset, NaiveDate};
use rust_decimal::Decimal;

use crate::convert::{Converter, Direction, EnumConverter, float_to_string};
use crate::error::{ConfigError, Error, Result, TypeError, UsageErrorKind};
use crate::field::FieldInfo;
use crate::relationship::get_via_id;
use crate::state::InstanceState;
use crate::structure::{ID_FIELD, Structure};
use crate::types::FieldKind;
use crate::value::{Value, format_utc};

const INTERNAL_PREFIX: char = '_';
const RESERVED_NAME: &str = "api";

/// Names that bypass field logic entirely.
fn is_internal_name(name: &str) -> bool {
    name.starts_with(INTERNAL_PREFIX) || name == RESERVED_NAME
}

struct ModelCell {
    /// Kept outside the lock so type checks never contend with writers
    structure: Arc<Structure>,
    instance: RwLock<Instance>,
}

/// Shared handle to a model instance.
#[derive(Clone)]
pub struct ModelRef(Arc<ModelCell>);

impl ModelRef {
    pub fn new(mut instance: Instance) -> Self {
        let structure = Arc::clone(&instance.structure);
        Self(Arc::new_cyclic(|cell| {
            instance.owner = cell.clone();
            ModelCell {
                structure,
                instance: RwLock::new(instance),
            }
        }))
    }

    /// Whether this handle wraps `instance`. Needs no lock, so it also works
    /// while the caller holds `instance` locked through this handle.
    pub fn points_to(&self, instance: &Instance) -> bool {
        std::ptr::eq(instance.owner.as_ptr(), Arc::as_ptr(&self.0))
    }

    /// Structure of the referenced instance, readable without locking.
    pub fn structure(&self) -> &Arc<Structure> {
        &self.0.structure
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Instance> {
        self.0.instance.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Instance> {
        self.0.instance.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Read access, or `None` if the instance is write-locked right now.
    pub fn try_read(&self) -> Option<RwLockReadGuard<'_, Instance>> {
        match self.0.instance.try_read() {
            Ok(guard) => Some(guard),
            Err(std::sync::TryLockError::Poisoned(e)) => Some(e.into_inner()),
            Err(std::sync::TryLockError::WouldBlock) => None,
        }
    }

    /// Write access, or `None` if the instance is locked right now.
    pub fn try_write(&self) -> Option<RwLockWriteGuard<'_, Instance>> {
        match self.0.instance.try_write() {
            Ok(guard) => Some(guard),
            Err(std::sync::TryLockError::Poisoned(e)) => Some(e.into_inner()),
            Err(std::sync::TryLockError::WouldBlock) => None,
        }
    }

    /// Read an attribute, resolving it lazily if needed.
    ///
    /// Materialized values are read under a shared lock; only lazy
    /// resolution takes the write lock.
    pub fn get(&self, name: &str) -> Result<Option<Value>> {
        {
            let guard = self.read();
            let computed = guard.structure.field(name).is_some_and(|f| f.getter.is_some());
            if !computed {
                if let Some(value) = guard.peek(name) {
                    return Ok(Some(value));
                }
            }
        }
        self.write().get(name)
    }

    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        self.write().set(name, value)
    }

    pub fn downgrade(&self) -> WeakModelRef {
        WeakModelRef(Arc::downgrade(&self.0))
    }

    /// A deep copy: nested model instances are copied too, and shared
    /// references inside the graph stay shared in the copy.
    pub fn duplicate(&self) -> ModelRef {
        let mut visited = HashMap::new();
        self.duplicate_with(&mut visited)
    }

    fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    fn duplicate_with(&self, visited: &mut HashMap<usize, ModelRef>) -> ModelRef {
        if let Some(copy) = visited.get(&self.addr()) {
            return copy.clone();
        }
        let source = self.read();
        let copy = ModelRef::new(Instance {
            structure: Arc::clone(&source.structure),
            values: HashMap::new(),
            state: source.state.clone(),
            owner: Weak::new(),
        });
        visited.insert(self.addr(), copy.clone());
        let values = source
            .values
            .iter()
            .map(|(name, value)| (name.clone(), copy_value(value, visited)))
            .collect();
        copy.write().values = values;
        copy
    }
}

fn copy_value(value: &Value, visited: &mut HashMap<usize, ModelRef>) -> Value {
    match value {
        Value::Model(model) => Value::Model(model.duplicate_with(visited)),
        Value::List(items) => Value::List(items.iter().map(|v| copy_value(v, visited)).collect()),
        Value::Set(items) => Value::Set(items.iter().map(|v| copy_value(v, visited)).collect()),
        other => other.clone(),
    }
}

impl PartialEq for ModelRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for ModelRef {}

impl fmt::Debug for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModelRef({}@{:#x})", self.0.structure.name(), self.addr())
    }
}

/// Non-owning counterpart of [`ModelRef`].
#[derive(Clone)]
pub struct WeakModelRef(Weak<ModelCell>);

impl WeakModelRef {
    pub fn upgrade(&self) -> Option<ModelRef> {
        self.0.upgrade().map(ModelRef)
    }

    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

impl fmt::Debug for WeakModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakModelRef(alive: {})", self.is_alive())
    }
}

/// One record of a registered model type.
pub struct Instance {
    structure: Arc<Structure>,
    values: HashMap<String, Value>,
    state: InstanceState,
    /// The handle this instance lives in, if any
    owner: Weak<ModelCell>,
}

impl Clone for Instance {
    /// The clone is a standalone instance, not owned by any handle.
    fn clone(&self) -> Self {
        Self {
            structure: Arc::clone(&self.structure),
            values: self.values.clone(),
            state: self.state.clone(),
            owner: Weak::new(),
        }
    }
}

impl Instance {
    pub fn new(structure: Arc<Structure>) -> Self {
        Self {
            structure,
            values: HashMap::new(),
            state: InstanceState::new(),
            owner: Weak::new(),
        }
    }

    /// Set several attributes, failing on names the model does not have.
    pub fn with_values<I, S>(mut self, values: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Value)>,
        S: AsRef<str>,
    {
        for (name, value) in values {
            let name = name.as_ref();
            if self.structure.field(name).is_none() && self.foreign_key_base(name)?.is_none() {
                return Err(Error::usage(
                    UsageErrorKind::UnknownAttribute,
                    format!(
                        "initial value given for unknown field '{}' on {}",
                        name,
                        self.structure.name()
                    ),
                ));
            }
            self.set(name, value)?;
        }
        Ok(self)
    }

    pub fn structure(&self) -> &Arc<Structure> {
        &self.structure
    }

    pub fn model_name(&self) -> &str {
        self.structure.name()
    }

    pub fn state(&self) -> &InstanceState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut InstanceState {
        &mut self.state
    }

    /// The materialized value, without defaulting or lazy lookups.
    pub fn peek(&self, name: &str) -> Option<Value> {
        self.values.get(name).cloned()
    }

    pub fn is_materialized(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// `base` when `name` is `{base}_id` and `base` is a relationship to a
    /// model with an identity field.
    fn foreign_key_base<'n>(&self, name: &'n str) -> Result<Option<&'n str>> {
        match name.strip_suffix("_id") {
            Some(base) if self.structure.is_field_a_child(base, true)? => Ok(Some(base)),
            _ => Ok(None),
        }
    }

    /// Read an attribute.
    ///
    /// Returns `None` when the attribute has no value and no default.
    /// Values computed here (defaults, fetched relationships) are stored so
    /// later reads return the same thing.
    pub fn get(&mut self, name: &str) -> Result<Option<Value>> {
        let structure = Arc::clone(&self.structure);
        let field = structure.field(name);

        if let Some(getter) = field.and_then(|f| f.getter.as_ref()) {
            if let Some(value) = getter(self)? {
                return Ok(Some(value));
            }
        }

        if let Some(value) = self.values.get(name) {
            return Ok(Some(value.clone()));
        }

        if let Some(base) = self.foreign_key_base(name)? {
            let id = self.get_related_id(base, false)?.into_option();
            if let Some(id) = &id {
                if let Some(setter) = field.and_then(|f| f.setter.as_ref()) {
                    setter(self, Some(id.clone()))?;
                }
            }
            if id.is_some() || field.is_none() {
                return Ok(id);
            }
        }

        let Some(field) = field else {
            if is_internal_name(name) {
                return Ok(None);
            }
            return Err(Error::usage(
                UsageErrorKind::UnknownAttribute,
                format!("{} has no attribute '{}'", structure.name(), name),
            ));
        };

        if field.related_field_name_for_id.is_some() {
            match self.state.pending_related_id(name).cloned() {
                Some(Value::Null) => {
                    self.materialize(field, Some(Value::Null))?;
                    return Ok(Some(Value::Null));
                }
                Some(id) => {
                    let related = structure.related_structure(name)?;
                    if let Some(child) = get_via_id(&related, &id)? {
                        tracing::trace!(
                            model = structure.name(),
                            field = name,
                            "resolved related object from pending id"
                        );
                        self.state.clear_pending_related_id(name);
                        let value = Value::Model(child);
                        self.materialize(field, Some(value.clone()))?;
                        if self.state.assigned_child_id(name).is_none() {
                            self.state.set_assigned_child_id(name, Some(id));
                        }
                        return Ok(Some(value));
                    }
                }
                None => {}
            }
        }

        let value = self.computed_default(field)?;
        if value.is_some() {
            tracing::trace!(model = structure.name(), field = name, "materialized default");
            self.materialize(field, value.clone())?;
        }
        Ok(value)
    }

    fn materialize(&mut self, field: &FieldInfo, value: Option<Value>) -> Result<()> {
        if let Some(setter) = &field.setter {
            return setter(self, value);
        }
        self.store(&field.name, value);
        Ok(())
    }

    pub(crate) fn store(&mut self, name: &str, value: Option<Value>) {
        self.state.set_assigned_child_id(name, None);
        let child_id = match &value {
            Some(Value::Model(child)) => self.child_id(name, child),
            _ => None,
        };
        self.state.set_assigned_child_id(name, child_id);
        match value {
            Some(value) => {
                self.values.insert(name.to_string(), value);
            }
            None => {
                self.values.remove(name);
            }
        }
    }

    /// The field's default, converted to its declared type.
    fn computed_default(&self, field: &FieldInfo) -> Result<Option<Value>> {
        let Some(default) = &field.default else {
            return Ok(None);
        };
        let config_error = |message: String| -> Error {
            ConfigError::new(message)
                .model(self.structure.name())
                .field(&field.name)
                .into()
        };
        if default.is_null() {
            if !field.nullable {
                return Err(config_error(
                    "default is null but the field is not nullable".to_string(),
                ));
            }
            return Ok(Some(Value::Null));
        }

        let value = default.produce();
        if value_matches(&field.type_hint, &value) || (value.is_null() && field.nullable) {
            return Ok(Some(value));
        }
        if let Some(converter) = &field.converter {
            return converter.convert(Direction::ToModel, field, value).map(Some);
        }
        if field.type_hint.element_kind().is_some() {
            return self.rebuild_container(field, value).map(Some);
        }
        Err(config_error(format!(
            "default {:?} does not match type {} and there is no converter",
            value, field.type_hint
        )))
    }

    /// Write an attribute.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        self.set_opt(name, Some(value.into()))
    }

    /// Write an attribute; `None` resets it to its default.
    pub fn set_opt(&mut self, name: &str, value: Option<Value>) -> Result<()> {
        if is_internal_name(name) {
            self.store(name, value);
            return Ok(());
        }
        if let Some(base) = self.foreign_key_base(name)? {
            return self.set_related_id(base, value);
        }

        let structure = Arc::clone(&self.structure);
        let field = structure.field(name).ok_or_else(|| {
            Error::usage(
                UsageErrorKind::UnknownAttribute,
                format!("{} has no attribute '{}'", structure.name(), name),
            )
        })?;

        if field.getter.is_some() && field.setter.is_none() {
            return Err(Error::usage(
                UsageErrorKind::UnsupportedWrite,
                format!(
                    "{}.{} has a getter but no setter; it can't be written",
                    structure.name(),
                    name
                ),
            ));
        }

        // The instance stays untouched until the written value is final.
        let value = self.resolve_write(field, value)?;
        let value = match &field.post_filter {
            Some(filter) => filter.filter(name, value)?,
            None => value,
        };

        self.state.clear_pending_related_id(name);
        if let Some(setter) = &field.setter {
            return setter(self, value);
        }
        self.store(name, value);
        Ok(())
    }

    /// Remove the materialized value (and any pending id), so the next read
    /// resolves it again.
    pub fn unset(&mut self, name: &str) {
        self.store(name, None);
        self.state.clear_pending_related_id(name);
    }

    /// The id of `child`, stored (or about to be) under `name`.
    ///
    /// A child that is this very instance is read directly. A child that is
    /// write-locked right now reports the id it had when it was assigned.
    pub(crate) fn child_id(&self, name: &str, child: &ModelRef) -> Option<Value> {
        if child.points_to(self) {
            return self.peek(ID_FIELD);
        }
        match child.try_read() {
            Some(guard) => guard.peek(ID_FIELD),
            None => {
                tracing::trace!(
                    model = self.model_name(),
                    field = name,
                    "child is locked; using its id from assignment"
                );
                self.state.assigned_child_id(name).cloned()
            }
        }
    }

    /// The value a write stores, after null handling, defaulting and conversion.
    fn resolve_write(&self, field: &FieldInfo, value: Option<Value>) -> Result<Option<Value>> {
        let mut value = value;
        if field.nullable
            && !field.type_hint.is_str()
            && value.as_ref().is_some_and(Value::is_empty_text)
        {
            value = Some(Value::Null);
        }
        if value.is_none() {
            value = self.computed_default(field)?;
        }

        let Some(value) = value else {
            return Ok(None);
        };

        if value.is_null() {
            if !field.nullable {
                return Err(TypeError::new(field.type_hint.to_string(), "Null")
                    .model(self.structure.name())
                    .field(&field.name)
                    .into());
            }
            return Ok(Some(value));
        }

        if value_matches(&field.type_hint, &value) {
            return Ok(Some(value));
        }

        if let Some(converter) = &field.converter {
            return converter.convert(Direction::ToModel, field, value).map(Some);
        }

        match &field.type_hint {
            FieldKind::Dict => match value {
                Value::List(_) | Value::Set(_) | Value::Model(_) => {
                    Err(TypeError::new(FieldKind::Dict.to_string(), value.type_name())
                        .model(self.structure.name())
                        .field(&field.name)
                        .into())
                }
                scalar => {
                    tracing::warn!(
                        model = self.structure.name(),
                        field = %field.name,
                        value = ?scalar,
                        "scalar assigned to a mapping field; storing an empty mapping"
                    );
                    Ok(Some(Value::Map(serde_json::Map::new())))
                }
            },
            FieldKind::List(_) | FieldKind::Set(_) => self.rebuild_container(field, value).map(Some),
            other => Err(TypeError::new(other.to_string(), format!("{:?}", value))
                .model(self.structure.name())
                .field(&field.name)
                .into()),
        }
    }

    /// Convert each element with the element kind's default converter and
    /// rebuild the declared container kind.
    fn rebuild_container(&self, field: &FieldInfo, value: Value) -> Result<Value> {
        let Some(element_kind) = field.type_hint.element_kind() else {
            return Ok(value);
        };
        let items = match value {
            Value::List(items) | Value::Set(items) => items,
            other => {
                return Err(TypeError::new(field.type_hint.to_string(), format!("{:?}", other))
                    .model(self.structure.name())
                    .field(&field.name)
                    .into());
            }
        };

        let converter: Option<Arc<dyn Converter>> = match element_kind {
            FieldKind::Enum(_) => Some(Arc::new(EnumConverter)),
            kind => self.structure.registry()?.default_converters().for_kind(kind),
        };
        let items = match converter {
            Some(converter) => {
                let mut element_field = field.clone();
                element_field.type_hint = element_kind.clone();
                element_field.nullable = false;
                items
                    .into_iter()
                    .map(|item| {
                        if value_matches(element_kind, &item) {
                            Ok(item)
                        } else {
                            converter.convert(Direction::ToModel, &element_field, item)
                        }
                    })
                    .collect::<Result<Vec<_>>>()?
            }
            None => items,
        };

        Ok(match field.type_hint {
            FieldKind::Set(_) => Value::set_of(items),
            _ => Value::List(items),
        })
    }

    fn get_typed<T>(
        &mut self,
        name: &str,
        expected: &str,
        extract: impl FnOnce(&Value) -> Option<T>,
    ) -> Result<Option<T>> {
        match self.get(name)? {
            None | Some(Value::Null) => Ok(None),
            Some(value) => extract(&value).map(Some).ok_or_else(|| {
                TypeError::new(expected, value.type_name())
                    .model(self.structure.name())
                    .field(name)
                    .into()
            }),
        }
    }

    pub fn get_str(&mut self, name: &str) -> Result<Option<String>> {
        self.get_typed(name, "TEXT", |v| v.as_str().map(str::to_string))
    }

    pub fn get_i64(&mut self, name: &str) -> Result<Option<i64>> {
        self.get_typed(name, "INT", Value::as_i64)
    }

    pub fn get_f64(&mut self, name: &str) -> Result<Option<f64>> {
        self.get_typed(name, "FLOAT", Value::as_f64)
    }

    pub fn get_bool(&mut self, name: &str) -> Result<Option<bool>> {
        self.get_typed(name, "BOOL", Value::as_bool)
    }

    pub fn get_decimal(&mut self, name: &str) -> Result<Option<Decimal>> {
        self.get_typed(name, "DECIMAL", Value::as_decimal)
    }

    pub fn get_date(&mut self, name: &str) -> Result<Option<NaiveDate>> {
        self.get_typed(name, "DATE", |v| match v {
            Value::Date(d) => Some(*d),
            _ => None,
        })
    }

    pub fn get_datetime(&mut self, name: &str) -> Result<Option<DateTime<FixedOffset>>> {
        self.get_typed(name, "DATETIME", |v| match v {
            Value::DateTime(dt) => Some(*dt),
            _ => None,
        })
    }

    pub fn get_model(&mut self, name: &str) -> Result<Option<ModelRef>> {
        self.get_typed(name, "MODEL", |v| v.as_model().cloned())
    }

    /// Copy every field both models share, where `other` has a value.
    ///
    /// Related ids `other` has not resolved yet are carried over as well.
    pub fn copy_from(&mut self, other: &Instance) -> Result<()> {
        let structure = Arc::clone(&self.structure);
        for field in structure.fields() {
            if other.structure.field(&field.name).is_none() {
                continue;
            }
            match other.peek(&field.name) {
                Some(value) => self.set(&field.name, value)?,
                None => {
                    if let Some(id) = other.state.pending_related_id(&field.name) {
                        if structure.is_field_a_child(&field.name, true)? {
                            self.set_related_id(&field.name, Some(id.clone()))?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// A copy of this instance whose nested model values are copies too.
    pub fn deep_copy(&self) -> Instance {
        let mut visited = HashMap::new();
        Instance {
            structure: Arc::clone(&self.structure),
            values: self
                .values
                .iter()
                .map(|(name, value)| (name.clone(), copy_value(value, &mut visited)))
                .collect(),
            state: self.state.clone(),
            owner: Weak::new(),
        }
    }

    /// `Model(attr=value, ...)` over the fields marked `include_in_repr`.
    pub fn repr(&self) -> String {
        let parts: Vec<String> = self
            .structure
            .fields()
            .iter()
            .filter(|f| f.include_in_repr)
            .map(|f| {
                let shown = match self.values.get(&f.name) {
                    Some(value) => display_value(value),
                    None => "None".to_string(),
                };
                format!("{}={}", f.name, shown)
            })
            .collect();
        format!("{}({})", self.structure.name(), parts.join(", "))
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => float_to_string(*f),
        Value::Decimal(d) => d.to_string(),
        Value::Text(s) => s.clone(),
        Value::Date(d) => d.format("%Y-%m-%d").to_string(),
        Value::DateTime(dt) => format_utc(dt),
        Value::Enum(e) => format!("{}.{}", e.enum_name, e.member),
        Value::Map(m) => serde_json::Value::Object(m.clone()).to_string(),
        Value::List(items) => {
            let shown: Vec<String> = items.iter().map(display_value).collect();
            format!("[{}]", shown.join(", "))
        }
        Value::Set(items) => {
            let shown: Vec<String> = items.iter().map(display_value).collect();
            format!("{{{}}}", shown.join(", "))
        }
        // Nested instances may be locked by the caller, and may point back here.
        Value::Model(model) => format!("{}(..)", model.structure().name()),
    }
}

/// Does `value` already have the declared kind?
pub(crate) fn value_matches(kind: &FieldKind, value: &Value) -> bool {
    match (kind, value) {
        (FieldKind::Str | FieldKind::Uuid, Value::Text(_))
        | (FieldKind::Int, Value::Int(_))
        | (FieldKind::Float, Value::Float(_))
        | (FieldKind::Bool, Value::Bool(_))
        | (FieldKind::Decimal, Value::Decimal(_))
        | (FieldKind::Date, Value::Date(_))
        | (FieldKind::DateTime, Value::DateTime(_))
        | (FieldKind::Dict, Value::Map(_)) => true,
        (FieldKind::List(inner), Value::List(items)) | (FieldKind::Set(inner), Value::Set(items)) => {
            items.iter().all(|item| value_matches(inner, item))
        }
        (FieldKind::Enum(def), Value::Enum(member)) => member.enum_name == def.name,
        (FieldKind::Model(name), Value::Model(model)) => model.structure().is_a(name),
        (FieldKind::Union(branches), value) => branches.iter().any(|b| value_matches(b, value)),
        _ => false,
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.values.keys().collect();
        names.sort();
        f.debug_struct("Instance")
            .field("model", &self.structure.name())
            .field("materialized", &names)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{Field, LowerFilter};
    use crate::structure::{ModelSchema, Registry};
    use crate::types::{EnumDef, TypeHint};
    use std::str::FromStr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn registry() -> Registry {
        let registry = Registry::new();
        registry
            .register(
                ModelSchema::new("Child")
                    .attr("id", FieldKind::Int)
                    .field(Field::new("name").kind(FieldKind::Str).include_in_repr(true)),
            )
            .unwrap();
        registry
            .register(
                ModelSchema::new("Sample")
                    .field(Field::new("id").kind(FieldKind::Int).include_in_repr(true))
                    .attr("title", FieldKind::Str)
                    .attr("count", TypeHint::nullable(FieldKind::Int))
                    .attr("ratio", FieldKind::Float)
                    .attr("flag", FieldKind::Bool)
                    .attr("amount", FieldKind::Decimal)
                    .attr("extra", FieldKind::Dict)
                    .attr("labels", FieldKind::set(FieldKind::Str))
                    .attr("scores", FieldKind::list(FieldKind::Int))
                    .attr_with_default("code", FieldKind::Str, 2)
                    .field(
                        Field::new("tags")
                            .kind(FieldKind::list(FieldKind::Str))
                            .default_factory(|| Value::List(Vec::new())),
                    )
                    .field(Field::new("email").kind(FieldKind::Str).post_filter(LowerFilter))
                    .attr("child", TypeHint::nullable(FieldKind::model("Child"))),
            )
            .unwrap();
        registry
    }

    fn sample(registry: &Registry) -> Instance {
        registry.new_instance("Sample").unwrap()
    }

    #[test]
    fn test_unset_attribute_is_none() {
        let registry = registry();
        let mut obj = sample(&registry);
        assert_eq!(obj.get("title").unwrap(), None);
        assert!(!obj.is_materialized("title"));
    }

    #[test]
    fn test_unknown_attribute() {
        let registry = registry();
        let mut obj = sample(&registry);
        assert_eq!(
            obj.get("nope").unwrap_err().usage_kind(),
            Some(UsageErrorKind::UnknownAttribute)
        );
        assert_eq!(
            obj.set("nope", 1).unwrap_err().usage_kind(),
            Some(UsageErrorKind::UnknownAttribute)
        );
        assert_eq!(obj.get("_private").unwrap(), None);
    }

    #[test]
    fn test_internal_names_bypass_fields() {
        let registry = registry();
        let mut obj = sample(&registry);
        obj.set("_cache", 5).unwrap();
        assert_eq!(obj.get("_cache").unwrap(), Some(Value::Int(5)));
    }

    #[test]
    fn test_default_converted_and_materialized() {
        let registry = registry();
        let mut obj = sample(&registry);
        assert_eq!(obj.get("code").unwrap(), Some(Value::from("2")));
        assert!(obj.is_materialized("code"));
    }

    #[test]
    fn test_default_factory_is_fresh_per_instance() {
        let registry = registry();
        let mut a = sample(&registry);
        let mut b = sample(&registry);
        a.get("tags").unwrap();
        a.set("tags", Value::List(vec![Value::from("x")])).unwrap();
        assert_eq!(b.get("tags").unwrap(), Some(Value::List(Vec::new())));
    }

    #[test]
    fn test_nullable_empty_string_becomes_null() {
        let registry = registry();
        let mut obj = sample(&registry);
        obj.set("count", "").unwrap();
        assert_eq!(obj.peek("count"), Some(Value::Null));
    }

    #[test]
    fn test_null_on_non_nullable_is_type_error() {
        let registry = registry();
        let mut obj = sample(&registry);
        assert!(obj.set("title", Value::Null).unwrap_err().is_type_error());
    }

    #[test]
    fn test_converter_applied_on_write() {
        let registry = registry();
        let mut obj = sample(&registry);
        obj.set("title", 5).unwrap();
        assert_eq!(obj.peek("title"), Some(Value::from("5")));
        obj.set("ratio", "1.5").unwrap();
        assert_eq!(obj.peek("ratio"), Some(Value::Float(1.5)));
        obj.set("flag", "yes").unwrap();
        assert_eq!(obj.peek("flag"), Some(Value::Bool(true)));
        obj.set("amount", "1.03").unwrap();
        assert_eq!(
            obj.get_decimal("amount").unwrap(),
            Some(Decimal::from_str("1.03").unwrap())
        );
        assert!(obj.set("count", "many").unwrap_err().is_type_error());
    }

    #[test]
    fn test_scalar_to_mapping_becomes_empty_mapping() {
        let registry = registry();
        let mut obj = sample(&registry);
        obj.set("extra", 3).unwrap();
        assert_eq!(obj.peek("extra"), Some(Value::Map(serde_json::Map::new())));
    }

    #[test]
    fn test_container_to_mapping_is_type_error() {
        let registry = registry();
        let mut obj = sample(&registry);
        let mut map = serde_json::Map::new();
        map.insert("k".to_string(), serde_json::Value::from(1));
        obj.set("extra", Value::Map(map.clone())).unwrap();

        let err = obj.set("extra", Value::List(vec![Value::Int(1)])).unwrap_err();
        assert!(err.is_type_error());
        let err = obj.set("extra", Value::set_of(vec![Value::Int(1)])).unwrap_err();
        assert!(err.is_type_error());
        assert_eq!(obj.peek("extra"), Some(Value::Map(map)));
    }

    #[test]
    fn test_rejected_write_leaves_instance_unchanged() {
        let filtered = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&filtered);
        let registry = registry();
        registry
            .register(
                ModelSchema::new("Derived").field(
                    Field::new("link")
                        .kind(TypeHint::nullable(FieldKind::model("Child")))
                        .getter(|_: &Instance| Ok(None))
                        .post_filter(move |_: &str, value: Option<Value>| -> Result<Option<Value>> {
                            seen.fetch_add(1, Ordering::SeqCst);
                            Ok(value)
                        }),
                ),
            )
            .unwrap();
        let mut obj = registry.new_instance("Derived").unwrap();
        obj.state_mut().set_pending_related_id("link", Value::Int(3));

        let err = obj.set("link", Value::Null).unwrap_err();
        assert_eq!(err.usage_kind(), Some(UsageErrorKind::UnsupportedWrite));
        assert_eq!(obj.state().pending_related_id("link"), Some(&Value::Int(3)));
        assert_eq!(filtered.load(Ordering::SeqCst), 0);
        assert!(!obj.is_materialized("link"));
    }

    #[test]
    fn test_failed_conversion_keeps_pending_id() {
        let registry = registry();
        let mut obj = sample(&registry);
        obj.set("child_id", 5).unwrap();
        let other = ModelRef::new(sample(&registry));
        assert!(obj.set("child", other).unwrap_err().is_type_error());
        assert_eq!(obj.state().pending_related_id("child"), Some(&Value::Int(5)));
    }

    #[test]
    fn test_collections_rebuilt_with_element_conversion() {
        let registry = registry();
        let mut obj = sample(&registry);
        obj.set(
            "labels",
            Value::List(vec![Value::from("a"), Value::Int(1), Value::from("a")]),
        )
        .unwrap();
        assert_eq!(
            obj.peek("labels"),
            Some(Value::Set(vec![Value::from("a"), Value::from("1")]))
        );

        obj.set("scores", Value::List(vec![Value::from("3"), Value::Int(4)]))
            .unwrap();
        assert_eq!(
            obj.peek("scores"),
            Some(Value::List(vec![Value::Int(3), Value::Int(4)]))
        );
        assert!(obj.set("scores", "not a list").unwrap_err().is_type_error());
    }

    #[test]
    fn test_post_filter() {
        let registry = registry();
        let mut obj = sample(&registry);
        obj.set("email", "Someone@Example.COM").unwrap();
        assert_eq!(
            obj.get_str("email").unwrap().as_deref(),
            Some("someone@example.com")
        );
    }

    #[test]
    fn test_set_none_resets_to_default() {
        let registry = registry();
        let mut obj = sample(&registry);
        obj.set("code", "x").unwrap();
        obj.set_opt("code", None).unwrap();
        assert_eq!(obj.peek("code"), Some(Value::from("2")));
        obj.set("title", "x").unwrap();
        obj.set_opt("title", None).unwrap();
        assert!(!obj.is_materialized("title"));
    }

    #[test]
    fn test_typed_getters() {
        let registry = registry();
        let mut obj = sample(&registry);
        obj.set("id", 7).unwrap();
        obj.set("flag", true).unwrap();
        assert_eq!(obj.get_i64("id").unwrap(), Some(7));
        assert_eq!(obj.get_bool("flag").unwrap(), Some(true));
        assert_eq!(obj.get_f64("ratio").unwrap(), None);
        assert!(obj.get_i64("flag").is_ok());
        assert!(obj.get_str("id").unwrap_err().is_type_error());
    }

    #[test]
    fn test_with_values_rejects_unknown_names() {
        let registry = registry();
        let obj = sample(&registry)
            .with_values([("id", Value::Int(1)), ("title", Value::from("x"))])
            .unwrap();
        assert_eq!(obj.peek("title"), Some(Value::from("x")));
        let err = sample(&registry)
            .with_values([("bogus", Value::Int(1))])
            .unwrap_err();
        assert_eq!(err.usage_kind(), Some(UsageErrorKind::UnknownAttribute));
    }

    #[test]
    fn test_model_value_type_checked() {
        let registry = registry();
        let mut obj = sample(&registry);
        let child = ModelRef::new(registry.new_instance("Child").unwrap());
        obj.set("child", child.clone()).unwrap();
        assert_eq!(obj.get_model("child").unwrap(), Some(child));

        let other = ModelRef::new(sample(&registry));
        assert!(obj.set("child", other).unwrap_err().is_type_error());
        obj.set("child", Value::Null).unwrap();
        assert_eq!(obj.get_model("child").unwrap(), None);
    }

    #[test]
    fn test_getter_and_setter_overrides() {
        let registry = Registry::new();
        registry
            .register(
                ModelSchema::new("Computed")
                    .attr("first", FieldKind::Str)
                    .property("shout", FieldKind::Str, |obj: &Instance| {
                        Ok(obj
                            .peek("first")
                            .and_then(|v| v.as_str().map(str::to_uppercase))
                            .map(Value::Text))
                    })
                    .property_with_setter(
                        "alias",
                        FieldKind::Str,
                        |obj: &Instance| Ok(obj.peek("_alias")),
                        |obj: &mut Instance, value: Option<Value>| obj.set_opt("_alias", value),
                    ),
            )
            .unwrap();
        let mut obj = registry.new_instance("Computed").unwrap();
        obj.set("first", "ann").unwrap();
        assert_eq!(obj.get("shout").unwrap(), Some(Value::from("ANN")));
        assert_eq!(
            obj.set("shout", "x").unwrap_err().usage_kind(),
            Some(UsageErrorKind::UnsupportedWrite)
        );
        obj.set("alias", "a").unwrap();
        assert_eq!(obj.get("alias").unwrap(), Some(Value::from("a")));
        assert!(!obj.is_materialized("alias"));
    }

    #[test]
    fn test_enum_field() {
        let registry = Registry::new();
        let color = EnumDef::new("Color")
            .member("Red", "red")
            .member("Blue", "blue")
            .into_kind();
        registry
            .register(ModelSchema::new("Paint").attr("color", color.clone()).attr(
                "palette",
                FieldKind::list(color),
            ))
            .unwrap();
        let mut obj = registry.new_instance("Paint").unwrap();
        obj.set("color", "blue").unwrap();
        match obj.peek("color") {
            Some(Value::Enum(member)) => assert_eq!(member.member.as_ref(), "Blue"),
            other => panic!("expected an enum member, got {other:?}"),
        }
        obj.set("palette", Value::List(vec![Value::from("red")]))
            .unwrap();
        assert!(matches!(
            obj.peek("palette"),
            Some(Value::List(items)) if matches!(&items[0], Value::Enum(_))
        ));
        assert!(obj.set("color", "green").unwrap_err().is_type_error());
    }

    #[test]
    fn test_model_default_is_copied_per_instance() {
        let registry = registry();
        let mut template = registry.new_instance("Child").unwrap();
        template.set("name", "template").unwrap();
        let template = ModelRef::new(template);
        registry
            .register(
                ModelSchema::new("Holder").field(
                    Field::new("child")
                        .kind(FieldKind::model("Child"))
                        .default_value(template.clone()),
                ),
            )
            .unwrap();

        let mut a = registry.new_instance("Holder").unwrap();
        let mut b = registry.new_instance("Holder").unwrap();
        let a_child = a.get_model("child").unwrap().unwrap();
        let b_child = b.get_model("child").unwrap().unwrap();
        assert_ne!(a_child, b_child);
        assert_ne!(a_child, template);
        a_child.set("name", "changed").unwrap();
        assert_eq!(b_child.read().peek("name"), Some(Value::from("template")));
    }

    #[test]
    fn test_points_to_own_handle_only() {
        let registry = registry();
        let handle = ModelRef::new(sample(&registry));
        assert!(handle.points_to(&handle.read()));

        let detached = handle.read().clone();
        assert!(!handle.points_to(&detached));
        let other = ModelRef::new(detached);
        assert!(!handle.points_to(&other.read()));
    }

    #[test]
    fn test_shared_get_under_read_lock() {
        let registry = registry();
        let mut obj = sample(&registry);
        obj.set("title", "x").unwrap();
        let handle = ModelRef::new(obj);

        let reader = handle.read();
        assert_eq!(handle.get("title").unwrap(), Some(Value::from("x")));
        assert!(handle.try_read().is_some());
        drop(reader);
        assert_eq!(handle.get("code").unwrap(), Some(Value::from("2")));
    }

    #[test]
    fn test_duplicate_keeps_cycles() {
        let registry = Registry::new();
        registry
            .register(ModelSchema::new("Node").attr("next", TypeHint::nullable(FieldKind::model("Node"))))
            .unwrap();
        let a = ModelRef::new(registry.new_instance("Node").unwrap());
        let b = ModelRef::new(registry.new_instance("Node").unwrap());
        a.set("next", b.clone()).unwrap();
        b.set("next", a.clone()).unwrap();

        let copy = a.duplicate();
        let copy_b = copy.read().peek("next").and_then(|v| v.as_model().cloned()).unwrap();
        let back = copy_b.read().peek("next").and_then(|v| v.as_model().cloned()).unwrap();
        assert_eq!(back, copy);
        assert_ne!(copy_b, b);
    }

    #[test]
    fn test_copy_from() {
        let registry = registry();
        registry
            .register(ModelSchema::new("Slim").attr("title", FieldKind::Str).attr("other", FieldKind::Int))
            .unwrap();
        let mut source = sample(&registry);
        source.set("title", "t").unwrap();
        source.set("count", 3).unwrap();
        let copy = registry.new_instance_from("Slim", &source).unwrap();
        assert_eq!(copy.peek("title"), Some(Value::from("t")));
        assert!(!copy.is_materialized("other"));
    }

    #[test]
    fn test_repr() {
        let registry = registry();
        let mut obj = sample(&registry);
        assert_eq!(obj.repr(), "Sample(id=None)");
        obj.set("id", 3).unwrap();
        assert_eq!(obj.to_string(), "Sample(id=3)");
    }

    #[test]
    fn test_getter_called_each_read() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let registry = Registry::new();
        registry
            .register(ModelSchema::new("Live").property(
                "tick",
                FieldKind::Int,
                move |_: &Instance| Ok(Some(Value::Int(counter.fetch_add(1, Ordering::SeqCst) as i64))),
            ))
            .unwrap();
        let mut obj = registry.new_instance("Live").unwrap();
        assert_eq!(obj.get("tick").unwrap(), Some(Value::Int(0)));
        assert_eq!(obj.get("tick").unwrap(), Some(Value::Int(1)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
