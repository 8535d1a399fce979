//! Core types for docmodel.
//!
//! This crate maps JSON documents onto registered model types:
//!
//! - `Field` declarations, resolved into `FieldInfo` with defaults inherited
//!   from parent models
//! - `Registry` and `Structure` for the finalized field set of each model
//! - `Instance` for attribute reads and writes with defaults, conversion and
//!   lazy relationship lookups
//! - `to_document` / `from_document` for export and import, including
//!   changes-only exports
//! - `StrongCache` and `WeakCachePool` for objects fetched by identity

pub mod cache;
pub mod convert;
pub mod document;
pub mod error;
pub mod field;
pub mod model;
pub mod options;
pub mod pattern;
pub mod relationship;
pub mod state;
pub mod structure;
pub mod types;
pub mod value;

pub use cache::{ObjectCache, StrongCache, WeakCachePool, WeakCacheScope};
pub use convert::{
    BasicConverter, Converter, DateConverter, DateTimeConverter, DecimalConverter,
    DefaultConverters, Direction, EnumConverter, parse_bool, parse_datetime,
};
pub use document::{Document, coerce_old_value, json_equal};
pub use error::{
    ConfigError, Error, FetchError, Result, TypeError, UsageError, UsageErrorKind,
};
pub use field::{
    DefaultValue, Field, FieldInfo, FieldOption, Filter, Getter, LowerFilter, OptionSet,
    ResolveContext, Setter,
};
pub use model::{Instance, ModelRef, WeakModelRef};
pub use options::{ApiOptions, OptionsScope, RegistryConfig};
pub use pattern::matches_pattern;
pub use relationship::{
    ChildRef, IdentityFetcher, RelatedId, bulk_fetch_related, existing_children, get_via_id,
};
pub use state::{DocumentSnapshot, InstanceState};
pub use structure::{ID_FIELD, ModelSchema, Registry, Structure};
pub use types::{BasicKind, EnumDef, FieldKind, TypeHint};
pub use value::{EnumValue, Value, format_utc};
