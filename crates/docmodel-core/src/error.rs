//! Error types for docmodel operations.

use std::fmt;

/// The primary error type for all docmodel operations.
#[derive(Debug)]
pub enum Error {
    /// Model/field declaration problems, raised while a structure is finalized
    Config(ConfigError),
    /// Value incompatible with a field's declared type
    Type(TypeError),
    /// API misuse (unknown attribute, getter-only write, ...)
    Usage(UsageError),
    /// Behavior that is explicitly unsupported for now
    NotImplemented(String),
    /// Failure reported by an external identity fetcher
    Fetch(FetchError),
    /// Serialization/deserialization errors
    Serde(String),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConfigError {
    pub model: Option<String>,
    pub field: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: String,
    pub actual: String,
    pub model: Option<String>,
    pub field: Option<String>,
}

#[derive(Debug)]
pub struct UsageError {
    pub kind: UsageErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageErrorKind {
    /// Attribute name has no field on the model
    UnknownAttribute,
    /// Field has a getter override but no setter
    UnsupportedWrite,
    /// Field is not a relationship to a model with an identity field
    NotARelationship,
    /// Model name is not registered
    UnknownModel,
    /// Structure outlived the registry that built it
    Detached,
}

#[derive(Debug)]
pub struct FetchError {
    pub model: String,
    pub id: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ConfigError {
    /// Create a configuration error with only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            model: None,
            field: None,
            message: message.into(),
            source: None,
        }
    }

    /// Attach the model name this error refers to.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Attach the field name this error refers to.
    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

impl TypeError {
    pub fn new(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self {
            expected: expected.into(),
            actual: actual.into(),
            model: None,
            field: None,
        }
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

impl UsageError {
    pub fn new(kind: UsageErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl Error {
    /// Is this a configuration (declaration-time) error?
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }

    /// Is this a type error raised by an attribute write?
    pub fn is_type_error(&self) -> bool {
        matches!(self, Error::Type(_))
    }

    /// Is this an explicitly unsupported operation?
    pub fn is_not_implemented(&self) -> bool {
        matches!(self, Error::NotImplemented(_))
    }

    /// Get the usage error kind, if this is a usage error.
    pub fn usage_kind(&self) -> Option<UsageErrorKind> {
        match self {
            Error::Usage(u) => Some(u.kind),
            _ => None,
        }
    }

    pub(crate) fn usage(kind: UsageErrorKind, message: impl Into<String>) -> Self {
        Error::Usage(UsageError::new(kind, message))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(e) => write!(f, "Configuration error: {}", e),
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::Usage(e) => write!(f, "Usage error: {}", e.message),
            Error::NotImplemented(msg) => write!(f, "Not implemented: {}", msg),
            Error::Fetch(e) => write!(f, "Fetch error: {}", e),
            Error::Serde(msg) => write!(f, "Serialization error: {}", msg),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Fetch(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.model, &self.field) {
            (Some(model), Some(field)) => write!(f, "{}.{}: {}", model, field, self.message),
            (Some(model), None) => write!(f, "{}: {}", model, self.message),
            (None, Some(field)) => write!(f, "field '{}': {}", field, self.message),
            (None, None) => write!(f, "{}", self.message),
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.model, &self.field) {
            (Some(model), Some(field)) => write!(
                f,
                "expected {} for attribute '{}' on {}, found {}",
                self.expected, field, model, self.actual
            ),
            (None, Some(field)) => write!(
                f,
                "expected {} for attribute '{}', found {}",
                self.expected, field, self.actual
            ),
            _ => write!(f, "expected {}, found {}", self.expected, self.actual),
        }
    }
}

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fetching {} with id {} failed", self.model, self.id)?;
        if let Some(source) = &self.source {
            write!(f, ": {}", source)?;
        }
        Ok(())
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<UsageError> for Error {
    fn from(err: UsageError) -> Self {
        Error::Usage(err)
    }
}

impl From<FetchError> for Error {
    fn from(err: FetchError) -> Self {
        Error::Fetch(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err.to_string())
    }
}

/// Result type alias for docmodel operations.
pub type Result<T> = std::result::Result<T, Error>;
