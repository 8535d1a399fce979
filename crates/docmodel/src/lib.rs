//! docmodel - typed models over JSON documents.
//!
//! docmodel maps JSON documents from a remote API onto registered model
//! types, providing:
//!
//! - Field declarations with defaults inherited through model hierarchies
//! - Attribute reads and writes with type conversion and null handling
//! - Lazy related-object lookups by id, with strong and weak object caches
//! - Changes-only exports diffed against everything previously imported
//!
//! # Quick Start
//!
//! ```
//! use docmodel::prelude::*;
//! use serde_json::json;
//!
//! # fn main() -> docmodel::Result<()> {
//! let registry = Registry::new();
//! registry.register(
//!     ModelSchema::new("Account")
//!         .attr("id", FieldKind::Int)
//!         .attr("name", FieldKind::Str)
//!         .attr("balance", FieldKind::Decimal),
//! )?;
//!
//! let mut account = docmodel::from_json_str(&registry, "Account", r#"{"id": 1, "name": "a", "balance": "1.03"}"#)?;
//! account.set("name", "b")?;
//!
//! let changes = account.to_document(true)?.unwrap_or_default();
//! assert_eq!(serde_json::Value::Object(changes), json!({"name": "b"}));
//! # Ok(())
//! # }
//! ```

pub use docmodel_core::{
    ApiOptions, BasicConverter, BasicKind, ChildRef, ConfigError, Converter, DateConverter,
    DateTimeConverter, DecimalConverter, DefaultConverters, DefaultValue, Direction, Document,
    DocumentSnapshot, EnumConverter, EnumDef, EnumValue, Error, FetchError, Field, FieldInfo,
    FieldKind, FieldOption, Filter, Getter, ID_FIELD, IdentityFetcher, Instance, InstanceState,
    LowerFilter, ModelRef, ModelSchema, ObjectCache, OptionSet, OptionsScope, Registry,
    RegistryConfig, RelatedId, ResolveContext, Result, Setter, StrongCache, Structure, TypeError,
    TypeHint, UsageError, UsageErrorKind, Value, WeakCachePool, WeakCacheScope, WeakModelRef,
    bulk_fetch_related, coerce_old_value, existing_children, format_utc, get_via_id, json_equal,
    matches_pattern, parse_bool, parse_datetime,
};

/// Parse `json` as a document and build a `model` instance from it.
pub fn from_json_str(registry: &Registry, model: &str, json: &str) -> Result<Instance> {
    let document: Document = serde_json::from_str(json)?;
    registry.new_instance_from_document(model, &document)
}

/// Export `instance` as a JSON string; `None` when `only_changes` is set and
/// nothing changed.
pub fn to_json_string(instance: &mut Instance, only_changes: bool) -> Result<Option<String>> {
    let Some(document) = instance.to_document(only_changes)? else {
        tracing::debug!(model = instance.model_name(), "nothing to send");
        return Ok(None);
    };
    Ok(Some(serde_json::to_string(&document)?))
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{
        ApiOptions, Document, Error, Field, FieldKind, IdentityFetcher, Instance, ModelRef,
        ModelSchema, Registry, RegistryConfig, RelatedId, Result, Structure, TypeHint, Value,
    };
}
