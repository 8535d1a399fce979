//! Export to and import from JSON documents.
//!
//! An export walks relationship fields first and then plain fields, placing
//! each value at its json path. With `only_changes`, the result is diffed
//! against the union of every document previously imported into the
//! instance, so only the keys that changed are sent back.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::convert::{Direction, float_to_string};
use crate::error::{ConfigError, Error, Result, TypeError};
use crate::field::FieldInfo;
use crate::model::{Instance, ModelRef};
use crate::relationship::RelatedId;
use crate::structure::{ID_FIELD, Structure};
use crate::types::FieldKind;
use crate::value::Value;

/// A JSON object, the wire form of a model.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Look a value up by path. A `null` part-way down counts as found.
fn lookup_path<'a>(document: &'a Document, segments: &[&str]) -> Option<&'a serde_json::Value> {
    let mut found: Option<&serde_json::Value> = None;
    for segment in segments {
        let map = match found {
            None => document,
            Some(serde_json::Value::Object(map)) => map,
            Some(serde_json::Value::Null) => return found,
            Some(_) => return None,
        };
        found = Some(map.get(*segment)?);
    }
    found
}

fn insert_at_path(
    document: &mut Document,
    field: &FieldInfo,
    model: &str,
    value: serde_json::Value,
) -> Result<()> {
    let segments = field.json_path_segments();
    let Some((leaf, parents)) = segments.split_last() else {
        return Ok(());
    };
    let mut target = document;
    for segment in parents {
        let entry = target
            .entry((*segment).to_string())
            .or_insert_with(|| serde_json::Value::Object(Document::new()));
        target = match entry {
            serde_json::Value::Object(map) => map,
            _ => {
                return Err(ConfigError::new(format!(
                    "json path '{}' runs through a non-object value at '{}'",
                    field.json_path, segment
                ))
                .model(model)
                .field(&field.name)
                .into());
            }
        };
    }
    target.insert((*leaf).to_string(), value);
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scalar {
    Text,
    Int,
    Float,
}

fn scalar_kind(value: &serde_json::Value) -> Option<Scalar> {
    match value {
        serde_json::Value::String(_) => Some(Scalar::Text),
        serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => Some(Scalar::Int),
        serde_json::Value::Number(_) => Some(Scalar::Float),
        _ => None,
    }
}

fn convert_scalar(value: &serde_json::Value, to: Scalar) -> Option<serde_json::Value> {
    match (value, to) {
        (serde_json::Value::String(s), Scalar::Int) => s.trim().parse::<i64>().ok().map(Into::into),
        (serde_json::Value::String(s), Scalar::Float) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(serde_json::Value::Number),
        (serde_json::Value::Number(n), Scalar::Text) => Some(serde_json::Value::String(
            match n.as_i64() {
                Some(i) => i.to_string(),
                None => float_to_string(n.as_f64()?),
            },
        )),
        (serde_json::Value::Number(n), Scalar::Int) => {
            let f = n.as_f64()?;
            f.is_finite().then(|| serde_json::Value::from(f.trunc() as i64))
        }
        (serde_json::Value::Number(n), Scalar::Float) => n
            .as_f64()
            .and_then(serde_json::Number::from_f64)
            .map(serde_json::Value::Number),
        _ => None,
    }
}

/// Convert a previously imported value to the JSON type of the value about
/// to be exported, when both are strings or numbers. Falls back to the old
/// value unchanged when it does not convert.
pub fn coerce_old_value(old: &serde_json::Value, new: &serde_json::Value) -> serde_json::Value {
    match (scalar_kind(old), scalar_kind(new)) {
        (Some(from), Some(to)) if from != to => convert_scalar(old, to).unwrap_or_else(|| {
            tracing::debug!(old = %old, new = %new, "old value does not convert; comparing as is");
            old.clone()
        }),
        _ => old.clone(),
    }
}

/// JSON equality where `1` and `1.0` are the same number.
pub fn json_equal(a: &serde_json::Value, b: &serde_json::Value) -> bool {
    use serde_json::Value as J;
    match (a, b) {
        (J::Number(x), J::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        (J::Array(x), J::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(x, y)| json_equal(x, y))
        }
        (J::Object(x), J::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(k, v)| y.get(k).is_some_and(|other| json_equal(v, other)))
        }
        _ => a == b,
    }
}

/// Order-insensitive comparison for set-typed fields.
fn same_members(a: &serde_json::Value, b: &serde_json::Value) -> bool {
    match (a, b) {
        (serde_json::Value::Array(x), serde_json::Value::Array(y)) => {
            x.iter().all(|item| y.iter().any(|other| json_equal(item, other)))
                && y.iter().all(|item| x.iter().any(|other| json_equal(item, other)))
        }
        _ => json_equal(a, b),
    }
}

fn is_set_field(structure: &Structure, key: &str) -> bool {
    structure
        .fields()
        .iter()
        .any(|f| f.json_path == key && matches!(f.type_hint, FieldKind::Set(_)))
}

impl Instance {
    /// Export this instance as a document.
    ///
    /// With `only_changes`, keys whose value equals the last imported one are
    /// left out, and `None` means nothing changed. An instance that never
    /// imported a document exports everything. Read-only fields are never
    /// exported, and attributes with no value are left out.
    #[tracing::instrument(level = "debug", skip(self), fields(model = %self.model_name()))]
    pub fn to_document(&mut self, only_changes: bool) -> Result<Option<Document>> {
        let structure = Arc::clone(self.structure());
        let only_changes = only_changes && self.state().last_known_document().is_some();
        let mut document = Document::new();

        for field in structure.fields() {
            if field.read_only || !field.is_relationship() {
                continue;
            }
            if field.json_path != field.name {
                return Err(Error::NotImplemented(format!(
                    "{}.{}: a relationship field can't have a json path ('{}') other than its name; \
                     declare a separate `{}_id` field with that path instead",
                    structure.name(),
                    field.name,
                    field.json_path,
                    field.name
                )));
            }
            if field.type_hint.is_list_of_models() {
                tracing::trace!(field = %field.name, "skipped; lists of models are not exported");
                continue;
            }

            let related = structure.related_structure(&field.name)?;
            if related.has_id_field() {
                match self.get_related_id(&field.name, false)? {
                    RelatedId::Id(id) => {
                        document.insert(format!("{}_id", field.name), id.to_json()?);
                    }
                    RelatedId::Null => {
                        document.insert(format!("{}_id", field.name), serde_json::Value::Null);
                    }
                    RelatedId::ChildSet | RelatedId::Unknown => {}
                }
                continue;
            }

            match self.get(&field.name)? {
                None => {}
                Some(Value::Null) => {
                    document.insert(field.name.clone(), serde_json::Value::Null);
                }
                Some(Value::Model(child)) => {
                    let nested = export_child(&child, only_changes)?;
                    match nested {
                        Some(nested) => {
                            document.insert(field.name.clone(), serde_json::Value::Object(nested));
                        }
                        None if only_changes => {}
                        None => {
                            document.insert(field.name.clone(), serde_json::Value::Object(Document::new()));
                        }
                    }
                }
                Some(other) => {
                    return Err(TypeError::new(field.type_hint.to_string(), other.type_name())
                        .model(structure.name())
                        .field(&field.name)
                        .into());
                }
            }
        }

        for field in structure.fields() {
            if field.read_only || field.is_relationship() {
                continue;
            }
            let Some(value) = self.get(&field.name)? else {
                continue;
            };
            let value = match &field.converter {
                Some(converter) if !value.is_null() => {
                    converter.convert(Direction::ToWire, field, value)?
                }
                _ => value,
            };
            insert_at_path(&mut document, field, structure.name(), value.to_json()?)?;
        }

        if !only_changes {
            tracing::trace!(keys = document.len(), "exported full document");
            return Ok(Some(document));
        }

        for key in self.fields_to_drop(&document) {
            document.remove(&key);
        }
        if document.is_empty() {
            tracing::debug!("no changes to export");
            return Ok(None);
        }
        tracing::debug!(keys = document.len(), "exported changes");
        Ok(Some(document))
    }

    /// Top-level keys of `document` whose values have not changed since the
    /// last import.
    ///
    /// A key that has no previously imported value is always kept. A field
    /// with `include_with_fields` is kept whenever one of those fields is
    /// kept.
    pub fn fields_to_drop(&self, document: &Document) -> BTreeSet<String> {
        let mut drop = BTreeSet::new();
        let Some(previous) = self.state().last_known_document() else {
            return drop;
        };
        let structure = self.structure();

        for (key, new) in document {
            let Some(old) = previous.get(key) else {
                tracing::trace!(key = %key, "kept; no previous value");
                continue;
            };
            let old = coerce_old_value(old, new);
            let unchanged = if is_set_field(structure, key) {
                same_members(new, &old)
            } else {
                json_equal(new, &old)
            };
            if unchanged {
                drop.insert(key.clone());
            } else {
                tracing::trace!(key = %key, "kept; value changed");
            }
        }

        for field in structure.fields() {
            if field.include_with_fields.is_empty() || !drop.contains(&field.name) {
                continue;
            }
            if !field.include_with_fields.is_subset(&drop) {
                drop.remove(&field.name);
            }
        }
        drop
    }

    /// Update this instance from a document.
    ///
    /// The document is merged into the last-known snapshot first. Fields
    /// whose path is missing from the document are left untouched; a `null`
    /// sets the null sentinel. Relationship ids (`{name}_id`) are recorded as
    /// pending and fetched on first read.
    #[tracing::instrument(level = "debug", skip(self, document), fields(model = %self.model_name(), keys = document.len()))]
    pub fn from_document(&mut self, document: &Document) -> Result<()> {
        self.state_mut().merge_document(document);
        let structure = Arc::clone(self.structure());

        let mut values = document.clone();
        for field in structure.fields() {
            if let Some(found) = lookup_path(document, &field.json_path_segments()) {
                values.insert(field.name.clone(), found.clone());
            }
        }

        for field in structure.fields() {
            if field.is_relationship() {
                continue;
            }
            let Some(raw) = values.get(&field.name) else {
                continue;
            };
            if field.getter.is_some() && field.setter.is_none() {
                tracing::trace!(field = %field.name, "skipped; field can't be written");
                continue;
            }
            let value = if raw.is_null() {
                Value::Null
            } else {
                let value = Value::from_json(raw);
                match &field.converter {
                    Some(converter) => converter.convert(Direction::FromWire, field, value)?,
                    None => value,
                }
            };
            self.set(&field.name, value)?;
        }

        for field in structure.fields() {
            if !field.is_relationship() {
                continue;
            }
            if field.type_hint.is_list_of_models() {
                return Err(Error::NotImplemented(format!(
                    "{}.{}: importing a list of models is not supported",
                    structure.name(),
                    field.name
                )));
            }
            let related = structure.related_structure(&field.name)?;

            if let Some(raw) = values.get(&field.name) {
                let value = match raw {
                    serde_json::Value::Null => Value::Null,
                    serde_json::Value::Object(nested) => {
                        let child = structure
                            .registry()?
                            .new_instance_from_document(related.name(), nested)?;
                        Value::Model(ModelRef::new(child))
                    }
                    other => {
                        return Err(TypeError::new(related.name(), json_type_name(other))
                            .model(structure.name())
                            .field(&field.name)
                            .into());
                    }
                };
                self.set(&field.name, value)?;
                continue;
            }

            if !related.has_id_field() {
                continue;
            }
            let id_name = format!("{}_id", field.name);
            let Some(raw_id) = document.get(&id_name) else {
                continue;
            };
            let id = if raw_id.is_null() {
                Value::Null
            } else {
                let id_field = structure.field(&id_name).or_else(|| related.field(ID_FIELD));
                let id = Value::from_json(raw_id);
                match id_field.and_then(|f| f.converter.as_ref().map(|c| (f, c))) {
                    Some((id_field, converter)) => {
                        converter.convert(Direction::FromWire, id_field, id)?
                    }
                    None => id,
                }
            };
            self.set_related_id(&field.name, Some(id))?;
        }
        Ok(())
    }

    /// Forget every imported document; the next changes-only export sends
    /// everything.
    pub fn forget_original_document(&mut self) {
        self.state_mut().forget_original_document();
    }

    /// Whether a changes-only export would send anything.
    pub fn has_changes(&mut self) -> Result<bool> {
        Ok(self.to_document(true)?.is_some())
    }
}

fn export_child(child: &ModelRef, only_changes: bool) -> Result<Option<Document>> {
    let Some(mut guard) = child.try_write() else {
        return Err(Error::Custom(format!(
            "embedded {} is already locked; embedded models can't form a cycle",
            child.structure().name()
        )));
    };
    guard.to_document(only_changes)
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
