//! Field declarations and resolved field metadata.
//!
//! A [`Field`] is what a model author writes: every attribute is optional and
//! unset attributes are resolved later. Resolution is a pure function of the
//! declaration and the same-named field on the nearest ancestor model; it
//! produces an immutable [`FieldInfo`].

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::convert::{Converter, DefaultConverters, EnumConverter};
use crate::error::{ConfigError, Result};
use crate::model::Instance;
use crate::types::{FieldKind, TypeHint};
use crate::value::Value;

/// Getter override: returns `None` to fall through to normal resolution.
pub type Getter = Arc<dyn Fn(&Instance) -> Result<Option<Value>> + Send + Sync>;

/// Setter override: receives the fully resolved value.
pub type Setter = Arc<dyn Fn(&mut Instance, Option<Value>) -> Result<()> + Send + Sync>;

/// Post-filter applied to a value after type checks and conversion on write.
///
/// Returning `None` leaves the attribute unset; returning `Value::Null`
/// stores the null sentinel. The result is not type checked again.
pub trait Filter: Send + Sync {
    fn filter(&self, name: &str, value: Option<Value>) -> Result<Option<Value>>;
}

impl<F> Filter for F
where
    F: Fn(&str, Option<Value>) -> Result<Option<Value>> + Send + Sync,
{
    fn filter(&self, name: &str, value: Option<Value>) -> Result<Option<Value>> {
        self(name, value)
    }
}

/// Lower-cases text values.
#[derive(Debug, Clone, Copy, Default)]
pub struct LowerFilter;

impl Filter for LowerFilter {
    fn filter(&self, _name: &str, value: Option<Value>) -> Result<Option<Value>> {
        Ok(match value {
            Some(Value::Text(s)) => Some(Value::Text(s.to_lowercase())),
            other => other,
        })
    }
}

/// A field default: a fixed value or a factory called once per instance.
#[derive(Clone)]
pub enum DefaultValue {
    Value(Value),
    Factory(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl DefaultValue {
    /// Produce an independent default value.
    pub fn produce(&self) -> Value {
        match self {
            DefaultValue::Value(Value::Model(model)) => Value::Model(model.duplicate()),
            DefaultValue::Value(v) => v.clone(),
            DefaultValue::Factory(f) => f(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, DefaultValue::Value(Value::Null))
    }

    fn copied(&self) -> Self {
        match self {
            DefaultValue::Value(v) => DefaultValue::Value(copy_value(v)),
            DefaultValue::Factory(f) => DefaultValue::Factory(Arc::clone(f)),
        }
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Value(v) => f.debug_tuple("Value").field(v).finish(),
            DefaultValue::Factory(_) => f.write_str("Factory(..)"),
        }
    }
}

fn copy_value(value: &Value) -> Value {
    match value {
        Value::Model(model) => Value::Model(model.duplicate()),
        other => other.clone(),
    }
}

/// The declarable attributes of a field, used to track provenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FieldOption {
    Name,
    TypeHint,
    Nullable,
    ReadOnly,
    Exclude,
    Default,
    PostFilter,
    Converter,
    Getter,
    Setter,
    IncludeWithFields,
    JsonPath,
    JsonPathSeparator,
    IncludeInRepr,
    RelatedType,
    RelatedFieldNameForId,
}

/// Compact set of [`FieldOption`]s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptionSet(u32);

impl OptionSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn contains(self, option: FieldOption) -> bool {
        self.0 & (1 << option as u8) != 0
    }

    pub fn insert(&mut self, option: FieldOption) {
        self.0 |= 1 << option as u8;
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// A field declaration. Unset attributes inherit or resolve to defaults.
///
/// Attributes that may be explicitly declared as "none" (default, converter,
/// post filter, related type, related id name) are `Option<Option<_>>`: the
/// outer `None` means "not declared".
#[derive(Clone, Default)]
pub struct Field {
    name: Option<String>,
    type_hint: Option<TypeHint>,
    nullable: Option<bool>,
    read_only: Option<bool>,
    exclude: Option<bool>,
    default: Option<Option<DefaultValue>>,
    post_filter: Option<Option<Arc<dyn Filter>>>,
    converter: Option<Option<Arc<dyn Converter>>>,
    getter: Option<Getter>,
    setter: Option<Setter>,
    include_with_fields: Option<BTreeSet<String>>,
    json_path: Option<String>,
    json_path_separator: Option<String>,
    include_in_repr: Option<bool>,
    related_type: Option<Option<Arc<str>>>,
    related_field_name_for_id: Option<Option<String>>,
}

impl Field {
    /// Declare a field named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Declare the field's type.
    pub fn kind(mut self, hint: impl Into<TypeHint>) -> Self {
        self.type_hint = Some(hint.into());
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = Some(nullable);
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = Some(read_only);
        self
    }

    pub fn exclude(mut self, exclude: bool) -> Self {
        self.exclude = Some(exclude);
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(Some(DefaultValue::Value(value.into())));
        self
    }

    /// Default produced by calling `factory` for each instance.
    pub fn default_factory(mut self, factory: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        self.default = Some(Some(DefaultValue::Factory(Arc::new(factory))));
        self
    }

    /// Explicitly declare that there is no default.
    pub fn no_default(mut self) -> Self {
        self.default = Some(None);
        self
    }

    pub fn post_filter(mut self, filter: impl Filter + 'static) -> Self {
        self.post_filter = Some(Some(Arc::new(filter)));
        self
    }

    pub fn converter(mut self, converter: impl Converter + 'static) -> Self {
        self.converter = Some(Some(Arc::new(converter)));
        self
    }

    /// Explicitly declare that no converter is used, not even the default one.
    pub fn no_converter(mut self) -> Self {
        self.converter = Some(None);
        self
    }

    pub fn getter(
        mut self,
        getter: impl Fn(&Instance) -> Result<Option<Value>> + Send + Sync + 'static,
    ) -> Self {
        self.getter = Some(Arc::new(getter));
        self
    }

    pub fn setter(
        mut self,
        setter: impl Fn(&mut Instance, Option<Value>) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.setter = Some(Arc::new(setter));
        self
    }

    /// Sibling fields that force this field into a changes-only export.
    pub fn include_with_fields<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include_with_fields = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Place the field at a nested location, e.g. `"outer.inner"`.
    pub fn json_path(mut self, path: impl Into<String>) -> Self {
        self.json_path = Some(path.into());
        self
    }

    pub fn json_path_separator(mut self, separator: impl Into<String>) -> Self {
        self.json_path_separator = Some(separator.into());
        self
    }

    pub fn include_in_repr(mut self, include: bool) -> Self {
        self.include_in_repr = Some(include);
        self
    }

    pub fn related_type(mut self, model: impl AsRef<str>) -> Self {
        self.related_type = Some(Some(Arc::from(model.as_ref())));
        self
    }

    pub fn related_field_name_for_id(mut self, name: impl Into<String>) -> Self {
        self.related_field_name_for_id = Some(Some(name.into()));
        self
    }

    pub(crate) fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub(crate) fn with_default_if_unset(mut self, value: DefaultValue) -> Self {
        if self.default.is_none() {
            self.default = Some(Some(value));
        }
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn has_getter(&self) -> bool {
        self.getter.is_some()
    }

    /// Options this declaration sets explicitly.
    pub fn declared_options(&self) -> OptionSet {
        let mut set = OptionSet::empty();
        let checks = [
            (self.name.is_some(), FieldOption::Name),
            (self.type_hint.is_some(), FieldOption::TypeHint),
            (self.nullable.is_some(), FieldOption::Nullable),
            (self.read_only.is_some(), FieldOption::ReadOnly),
            (self.exclude.is_some(), FieldOption::Exclude),
            (self.default.is_some(), FieldOption::Default),
            (self.post_filter.is_some(), FieldOption::PostFilter),
            (self.converter.is_some(), FieldOption::Converter),
            (self.getter.is_some(), FieldOption::Getter),
            (self.setter.is_some(), FieldOption::Setter),
            (
                self.include_with_fields.is_some(),
                FieldOption::IncludeWithFields,
            ),
            (self.json_path.is_some(), FieldOption::JsonPath),
            (
                self.json_path_separator.is_some(),
                FieldOption::JsonPathSeparator,
            ),
            (self.include_in_repr.is_some(), FieldOption::IncludeInRepr),
            (self.related_type.is_some(), FieldOption::RelatedType),
            (
                self.related_field_name_for_id.is_some(),
                FieldOption::RelatedFieldNameForId,
            ),
        ];
        for (present, option) in checks {
            if present {
                set.insert(option);
            }
        }
        set
    }

    /// Copy every attribute the parent explicitly set and this declaration did not.
    fn inherit_from(&mut self, parent: &FieldInfo) {
        let explicit = parent.explicitly_set;
        let inherit = |option: FieldOption| explicit.contains(option);

        if self.nullable.is_none() && inherit(FieldOption::Nullable) {
            self.nullable = Some(parent.nullable);
        }
        if self.read_only.is_none() && inherit(FieldOption::ReadOnly) {
            self.read_only = Some(parent.read_only);
        }
        if self.exclude.is_none() && inherit(FieldOption::Exclude) {
            self.exclude = Some(parent.exclude);
        }
        if self.default.is_none() && inherit(FieldOption::Default) {
            self.default = Some(parent.default.as_ref().map(DefaultValue::copied));
        }
        if self.post_filter.is_none() && inherit(FieldOption::PostFilter) {
            self.post_filter = Some(parent.post_filter.clone());
        }
        if self.converter.is_none() && inherit(FieldOption::Converter) {
            self.converter = Some(parent.converter.clone());
        }
        if self.getter.is_none() && inherit(FieldOption::Getter) {
            self.getter = parent.getter.clone();
        }
        if self.setter.is_none() && inherit(FieldOption::Setter) {
            self.setter = parent.setter.clone();
        }
        if self.include_with_fields.is_none() && inherit(FieldOption::IncludeWithFields) {
            self.include_with_fields = Some(parent.include_with_fields.clone());
        }
        if self.json_path.is_none() && inherit(FieldOption::JsonPath) {
            self.json_path = Some(parent.json_path.clone());
        }
        if self.json_path_separator.is_none() && inherit(FieldOption::JsonPathSeparator) {
            self.json_path_separator = Some(parent.json_path_separator.clone());
        }
        if self.include_in_repr.is_none() && inherit(FieldOption::IncludeInRepr) {
            self.include_in_repr = Some(parent.include_in_repr);
        }
        if self.related_type.is_none() && inherit(FieldOption::RelatedType) {
            self.related_type = Some(parent.related_type.clone());
        }
        if self.related_field_name_for_id.is_none() && inherit(FieldOption::RelatedFieldNameForId)
        {
            self.related_field_name_for_id = Some(parent.related_field_name_for_id.clone());
        }
    }

    /// Resolve this declaration into final field metadata.
    ///
    /// `parent` is the same-named field of the nearest ancestor model. Only
    /// attributes the parent set explicitly are inherited; everything else
    /// resolves from this field's own type.
    pub fn resolve(
        mut self,
        parent: Option<&FieldInfo>,
        ctx: &ResolveContext<'_>,
    ) -> Result<FieldInfo> {
        let Some(name) = self.name.clone() else {
            return Err(ConfigError::new("field declared without a name")
                .model(ctx.model)
                .into());
        };
        let config_error =
            |message: String| ConfigError::new(message).model(ctx.model).field(&name);

        let own = self.declared_options();
        let explicitly_set = parent.map_or(own, |p| p.explicitly_set.union(own));

        let hint = match (&self.type_hint, parent) {
            (Some(hint), _) => hint.clone(),
            (None, Some(p)) => TypeHint {
                kind: p.type_hint.clone(),
                nullable: p.nullable,
            },
            (None, None) => {
                return Err(config_error("no type declared for field".to_string()).into());
            }
        };

        if let Some(parent) = parent {
            check_parent_compatible(&hint.kind, parent, ctx).map_err(config_error)?;
            self.inherit_from(parent);
        }

        let json_path = self.json_path.take().unwrap_or_else(|| name.clone());
        let include_with_fields = self.include_with_fields.take().unwrap_or_default();
        if !include_with_fields.is_empty() && json_path != name {
            return Err(config_error(format!(
                "can't use include_with_fields ({:?}) with a json_path ('{}') that differs \
                 from the field name",
                include_with_fields, json_path
            ))
            .into());
        }
        let json_path_separator = self
            .json_path_separator
            .take()
            .unwrap_or_else(|| ".".to_string());
        if json_path_separator.is_empty() {
            return Err(config_error("json_path_separator can't be empty".to_string()).into());
        }

        let mut converter = self.converter.take();
        let converter_declared_here = own.contains(FieldOption::Converter);
        if !converter_declared_here && converter.as_ref().is_none_or(Option::is_none) {
            if let Some(default) = hint
                .kind
                .basic_kind()
                .and_then(|kind| ctx.default_converters.get(kind))
            {
                converter = Some(Some(default));
            }
        }
        if converter.is_none() && matches!(hint.kind, FieldKind::Enum(_)) {
            converter = Some(Some(Arc::new(EnumConverter)));
        }

        let related_type = match self.related_type.take() {
            Some(declared) => declared,
            None => hint.kind.related_model().cloned(),
        };
        let related_field_name_for_id = match self.related_field_name_for_id.take() {
            Some(declared) => declared,
            None => match &related_type {
                Some(related) if (ctx.has_id_field)(related)? => Some(format!("{}_id", name)),
                _ => None,
            },
        };

        Ok(FieldInfo {
            nullable: self.nullable.unwrap_or(hint.nullable),
            type_hint: hint.kind,
            read_only: self.read_only.unwrap_or(false),
            exclude: self.exclude.unwrap_or(false),
            default: self.default.flatten(),
            post_filter: self.post_filter.flatten(),
            converter: converter.flatten(),
            getter: self.getter,
            setter: self.setter,
            include_with_fields,
            json_path,
            json_path_separator,
            include_in_repr: self.include_in_repr.unwrap_or(false),
            related_type,
            related_field_name_for_id,
            is_foreign_key_of: None,
            explicitly_set,
            name,
        })
    }
}

fn check_parent_compatible(
    kind: &FieldKind,
    parent: &FieldInfo,
    ctx: &ResolveContext<'_>,
) -> std::result::Result<(), String> {
    match (kind.related_model(), parent.type_hint.related_model()) {
        (None, None) => Ok(()),
        (Some(child), Some(ancestor)) => {
            if child == ancestor || (ctx.is_subtype)(child, ancestor) {
                Ok(())
            } else {
                Err(format!(
                    "relationship to {} must be the same as, or a subtype of, the inherited \
                     relationship to {}",
                    child, ancestor
                ))
            }
        }
        (Some(child), None) => Err(format!(
            "relationship to {} overrides inherited non-relationship field of type {}",
            child, parent.type_hint
        )),
        (None, Some(ancestor)) => Err(format!(
            "type {} overrides inherited relationship to {}",
            kind, ancestor
        )),
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("type_hint", &self.type_hint)
            .field("declared", &self.declared_options())
            .finish_non_exhaustive()
    }
}

/// Lookups the resolver needs from the structure registry.
pub struct ResolveContext<'a> {
    pub model: &'a str,
    pub default_converters: &'a DefaultConverters,
    /// Does the named model have an identity field?
    pub has_id_field: &'a dyn Fn(&str) -> Result<bool>,
    /// Is the first model the same as or a descendant of the second?
    pub is_subtype: &'a dyn Fn(&str, &str) -> bool,
}

/// Resolved, immutable metadata about one model attribute.
#[derive(Clone)]
pub struct FieldInfo {
    /// Attribute name
    pub name: String,
    /// Declared type, with the nullable wrapper removed
    pub type_hint: FieldKind,
    /// Whether the null sentinel may be stored
    pub nullable: bool,
    /// Never sent on export
    pub read_only: bool,
    /// Ask the remote side not to send this field by default
    pub exclude: bool,
    pub default: Option<DefaultValue>,
    pub post_filter: Option<Arc<dyn Filter>>,
    pub converter: Option<Arc<dyn Converter>>,
    pub getter: Option<Getter>,
    pub setter: Option<Setter>,
    /// Keep this field in a changes-only export when any of these are kept
    pub include_with_fields: BTreeSet<String>,
    pub json_path: String,
    pub json_path_separator: String,
    pub include_in_repr: bool,
    /// Related model name for relationship fields
    pub related_type: Option<Arc<str>>,
    /// `{name}_id` when the related model has an identity field
    pub related_field_name_for_id: Option<String>,
    /// Name of the relationship field this field holds the id for
    pub is_foreign_key_of: Option<String>,
    explicitly_set: OptionSet,
}

impl FieldInfo {
    /// Options set explicitly on this field or on an ancestor's field it inherits from.
    pub fn explicitly_set(&self) -> OptionSet {
        self.explicitly_set
    }

    pub fn was_option_explicitly_set(&self, option: FieldOption) -> bool {
        self.explicitly_set.contains(option)
    }

    pub fn is_relationship(&self) -> bool {
        self.related_type.is_some()
    }

    /// True when this field stores the id of a relationship field.
    pub fn is_foreign_key(&self) -> bool {
        self.is_foreign_key_of.is_some()
    }

    /// The json path split on the separator.
    pub fn json_path_segments(&self) -> Vec<&str> {
        self.json_path.split(self.json_path_separator.as_str()).collect()
    }

    /// Does the declared type accept the null sentinel?
    pub fn accepts_null(&self) -> bool {
        self.nullable
    }
}

impl fmt::Debug for FieldInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldInfo")
            .field("name", &self.name)
            .field("type_hint", &self.type_hint)
            .field("nullable", &self.nullable)
            .field("read_only", &self.read_only)
            .field("default", &self.default)
            .field("has_converter", &self.converter.is_some())
            .field("json_path", &self.json_path)
            .field("include_with_fields", &self.include_with_fields)
            .field("related_type", &self.related_type)
            .field("related_field_name_for_id", &self.related_field_name_for_id)
            .field("is_foreign_key_of", &self.is_foreign_key_of)
            .finish_non_exhaustive()
    }
}
