//! Schema registration and lookup errors.

use thiserror::Error;

/// Errors raised while registering or introspecting a schema.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// A type name was registered twice.
    #[error("type '{name}' is already registered")]
    DuplicateType { name: String },

    /// A field name was registered twice on the same type.
    #[error("field '{field}' is already declared on type '{owner}'")]
    DuplicateField { owner: String, field: String },

    /// The referenced type id does not belong to this schema.
    #[error("unknown type id {id}")]
    UnknownType { id: u32 },

    /// The referenced type name is not registered.
    #[error("unknown type '{name}'")]
    UnknownTypeName { name: String },

    /// The type has no field with this name.
    #[error("type '{owner}' has no field '{field}'")]
    UnknownField { owner: String, field: String },

    /// Fields can only be declared on (or read from) object types.
    #[error("type '{name}' is not an object type")]
    NotAnObject { name: String },

    /// Element access on a non-array type.
    #[error("type '{name}' is not an array type")]
    NotAnArray { name: String },
}

impl SchemaError {
    /// Stable error code for programmatic handling.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateType { .. } => "SCHEMA:DUPLICATE_TYPE",
            Self::DuplicateField { .. } => "SCHEMA:DUPLICATE_FIELD",
            Self::UnknownType { .. } => "SCHEMA:UNKNOWN_TYPE",
            Self::UnknownTypeName { .. } => "SCHEMA:UNKNOWN_TYPE_NAME",
            Self::UnknownField { .. } => "SCHEMA:UNKNOWN_FIELD",
            Self::NotAnObject { .. } => "SCHEMA:NOT_AN_OBJECT",
            Self::NotAnArray { .. } => "SCHEMA:NOT_AN_ARRAY",
        }
    }

    /// Create an unknown field error
    pub fn unknown_field(owner: impl Into<String>, field: impl Into<String>) -> Self {
        Self::UnknownField {
            owner: owner.into(),
            field: field.into(),
        }
    }

    /// Create a not-an-object error
    pub fn not_an_object(name: impl Into<String>) -> Self {
        Self::NotAnObject { name: name.into() }
    }

    /// Create a not-an-array error
    pub fn not_an_array(name: impl Into<String>) -> Self {
        Self::NotAnArray { name: name.into() }
    }
}

/// Result type for schema operations
pub type SchemaResult<T> = Result<T, SchemaError>;
