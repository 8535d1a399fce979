//! Declared field types.
//!
//! `FieldKind` is the closed set of types a model attribute can declare. It
//! replaces runtime type-hint inspection: every field states its kind up front
//! and the structure builder validates it once.

use std::fmt;
use std::sync::Arc;

use crate::value::{EnumValue, Value};

/// The declared type of a model attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Str,
    Int,
    Float,
    Bool,
    Decimal,
    Date,
    DateTime,
    /// UUIDs are held as their canonical string form.
    Uuid,
    /// Untyped JSON mapping.
    Dict,
    List(Box<FieldKind>),
    Set(Box<FieldKind>),
    Enum(Arc<EnumDef>),
    /// Another registered model, referenced by name.
    Model(Arc<str>),
    /// Any of several kinds. Needs an explicit converter.
    Union(Vec<FieldKind>),
}

/// Scalar kinds that can have a registered default converter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BasicKind {
    Str,
    Int,
    Float,
    Bool,
    Decimal,
    Date,
    DateTime,
    Uuid,
}

impl FieldKind {
    /// A list of `inner`.
    pub fn list(inner: FieldKind) -> Self {
        FieldKind::List(Box::new(inner))
    }

    /// A set of `inner`.
    pub fn set(inner: FieldKind) -> Self {
        FieldKind::Set(Box::new(inner))
    }

    /// A relationship to the model registered as `name`.
    pub fn model(name: impl AsRef<str>) -> Self {
        FieldKind::Model(Arc::from(name.as_ref()))
    }

    /// The converter lookup key for scalar kinds.
    pub const fn basic_kind(&self) -> Option<BasicKind> {
        match self {
            FieldKind::Str => Some(BasicKind::Str),
            FieldKind::Int => Some(BasicKind::Int),
            FieldKind::Float => Some(BasicKind::Float),
            FieldKind::Bool => Some(BasicKind::Bool),
            FieldKind::Decimal => Some(BasicKind::Decimal),
            FieldKind::Date => Some(BasicKind::Date),
            FieldKind::DateTime => Some(BasicKind::DateTime),
            FieldKind::Uuid => Some(BasicKind::Uuid),
            _ => None,
        }
    }

    /// Kinds the runtime can store without any converter.
    pub const fn is_natively_supported(&self) -> bool {
        matches!(
            self,
            FieldKind::Str
                | FieldKind::Int
                | FieldKind::Float
                | FieldKind::Bool
                | FieldKind::Dict
                | FieldKind::List(_)
                | FieldKind::Set(_)
                | FieldKind::Model(_)
        )
    }

    /// Related model name, unwrapping a single-element list.
    pub fn related_model(&self) -> Option<&Arc<str>> {
        match self {
            FieldKind::Model(name) => Some(name),
            FieldKind::List(inner) => match inner.as_ref() {
                FieldKind::Model(name) => Some(name),
                _ => None,
            },
            _ => None,
        }
    }

    /// True for `List(Model(..))`, the unsupported one-to-many shape.
    pub fn is_list_of_models(&self) -> bool {
        matches!(self, FieldKind::List(inner) if matches!(inner.as_ref(), FieldKind::Model(_)))
    }

    pub const fn is_str(&self) -> bool {
        matches!(self, FieldKind::Str)
    }

    /// Element kind for list and set kinds.
    pub fn element_kind(&self) -> Option<&FieldKind> {
        match self {
            FieldKind::List(inner) | FieldKind::Set(inner) => Some(inner),
            _ => None,
        }
    }

    /// Branches of a union, or the kind itself.
    pub fn branches(&self) -> &[FieldKind] {
        match self {
            FieldKind::Union(branches) => branches,
            other => std::slice::from_ref(other),
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Str => write!(f, "str"),
            FieldKind::Int => write!(f, "int"),
            FieldKind::Float => write!(f, "float"),
            FieldKind::Bool => write!(f, "bool"),
            FieldKind::Decimal => write!(f, "Decimal"),
            FieldKind::Date => write!(f, "date"),
            FieldKind::DateTime => write!(f, "datetime"),
            FieldKind::Uuid => write!(f, "UUID"),
            FieldKind::Dict => write!(f, "dict"),
            FieldKind::List(inner) => write!(f, "List[{}]", inner),
            FieldKind::Set(inner) => write!(f, "Set[{}]", inner),
            FieldKind::Enum(def) => write!(f, "{}", def.name),
            FieldKind::Model(name) => write!(f, "{}", name),
            FieldKind::Union(branches) => {
                write!(f, "Union[")?;
                for (i, branch) in branches.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", branch)?;
                }
                write!(f, "]")
            }
        }
    }
}

/// A declared type plus whether the null sentinel is part of it.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeHint {
    pub kind: FieldKind,
    pub nullable: bool,
}

impl TypeHint {
    pub fn of(kind: FieldKind) -> Self {
        Self {
            kind,
            nullable: false,
        }
    }

    /// The kind, with the null sentinel allowed.
    pub fn nullable(kind: FieldKind) -> Self {
        Self {
            kind,
            nullable: true,
        }
    }
}

impl From<FieldKind> for TypeHint {
    fn from(kind: FieldKind) -> Self {
        TypeHint::of(kind)
    }
}

/// An enumeration type: named members, each with a raw wire value.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumDef {
    pub name: Arc<str>,
    members: Vec<(Arc<str>, Value)>,
}

impl EnumDef {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
            members: Vec::new(),
        }
    }

    /// Add a member with its raw value (usually a string or integer).
    pub fn member(mut self, name: impl AsRef<str>, raw: impl Into<Value>) -> Self {
        self.members.push((Arc::from(name.as_ref()), raw.into()));
        self
    }

    /// Wrap into a field kind.
    pub fn into_kind(self) -> FieldKind {
        FieldKind::Enum(Arc::new(self))
    }

    /// Look up a member by name.
    pub fn by_name(&self, name: &str) -> Option<EnumValue> {
        self.members
            .iter()
            .find(|(member, _)| member.as_ref() == name)
            .map(|(member, raw)| self.value_of(member, raw))
    }

    /// Look up a member by raw value.
    pub fn by_raw(&self, raw: &Value) -> Option<EnumValue> {
        self.members
            .iter()
            .find(|(_, value)| value == raw)
            .map(|(member, value)| self.value_of(member, value))
    }

    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|(name, _)| name.as_ref())
    }

    fn value_of(&self, member: &Arc<str>, raw: &Value) -> EnumValue {
        EnumValue {
            enum_name: Arc::clone(&self.name),
            member: Arc::clone(member),
            raw: Box::new(raw.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn color() -> EnumDef {
        EnumDef::new("Color").member("Red", "red").member("Blue", "blue")
    }

    #[test]
    fn test_related_model_unwraps_list() {
        assert_eq!(
            FieldKind::model("Child").related_model().map(|n| n.as_ref()),
            Some("Child")
        );
        let list = FieldKind::list(FieldKind::model("Child"));
        assert_eq!(list.related_model().map(|n| n.as_ref()), Some("Child"));
        assert!(list.is_list_of_models());
        assert!(FieldKind::set(FieldKind::model("Child")).related_model().is_none());
        assert!(FieldKind::Int.related_model().is_none());
    }

    #[test]
    fn test_native_support() {
        assert!(FieldKind::Str.is_natively_supported());
        assert!(FieldKind::list(FieldKind::Decimal).is_natively_supported());
        assert!(!FieldKind::Decimal.is_natively_supported());
        assert!(!color().into_kind().is_natively_supported());
        assert!(!FieldKind::Union(vec![FieldKind::Int, FieldKind::Str]).is_natively_supported());
    }

    #[test]
    fn test_display() {
        assert_eq!(FieldKind::list(FieldKind::Int).to_string(), "List[int]");
        assert_eq!(
            FieldKind::Union(vec![FieldKind::Int, FieldKind::Str]).to_string(),
            "Union[int, str]"
        );
        assert_eq!(color().into_kind().to_string(), "Color");
    }

    #[test]
    fn test_enum_lookup() {
        let def = color();
        let red = def.by_name("Red").unwrap();
        assert_eq!(*red.raw, Value::Text("red".into()));
        let blue = def.by_raw(&Value::Text("blue".into())).unwrap();
        assert_eq!(blue.member.as_ref(), "Blue");
        assert!(def.by_raw(&Value::Text("green".into())).is_none());
    }
}
