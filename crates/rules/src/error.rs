//! Error types for arbor-rules
//!
//! Every variant is a configuration fault: it is raised while rules are
//! attached, assembled or migrated, never while an assembled procedure runs.
//! Codes follow the `RULES:*` scheme.

use arbor_expression::ExpressionError;
use arbor_schema::SchemaError;
use thiserror::Error;

/// Rule configuration, assembly and migration errors
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuleError {
    /// A path contains a node kind rule trees cannot index
    #[error("Unsupported path node '{kind}' in {path}")]
    UnsupportedPathNode { kind: &'static str, path: String },

    /// A path starts at a root of another type than the tree
    #[error("Root type mismatch: tree is rooted at '{expected}', path starts at '{actual}'")]
    RootTypeMismatch { expected: String, actual: String },

    /// Rules depend on each other in a cycle
    #[error("Cyclic dependency while assembling {path}")]
    CyclicDependency { path: String },

    /// A rule reads a value outside the subtree being assembled
    #[error("Rule at {path} depends on {dependency}, outside the assembled subtree")]
    ExternalDependency { path: String, dependency: String },

    /// Two different source arrays were declared for one array
    #[error("Conflicting source arrays for {path}: {first} and {second}")]
    ConflictingSourceArrays {
        path: String,
        first: String,
        second: String,
    },

    /// Element rules iterate more than one distinct array at one level
    #[error("Rules under {path} iterate more than one source array: {first} and {second}")]
    MultipleSourceArrays {
        path: String,
        first: String,
        second: String,
    },

    /// No setter chain covers a path during migration
    #[error("Unable to migrate {path}: no correspondence covers it")]
    UnableToMigrate { path: String },

    /// Trees over different schemas or roots cannot be combined
    #[error("Incompatible rule trees: {message}")]
    IncompatibleTrees { message: String },

    /// Engine configuration is invalid
    #[error("Invalid engine configuration: {message}")]
    InvalidConfig { message: String },

    /// Expression construction or compilation failed
    #[error(transparent)]
    Expression(#[from] ExpressionError),

    /// Schema lookup failed
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

impl RuleError {
    /// Get error code for categorization
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedPathNode { .. } => "RULES:UNSUPPORTED_PATH_NODE",
            Self::RootTypeMismatch { .. } => "RULES:ROOT_TYPE_MISMATCH",
            Self::CyclicDependency { .. } => "RULES:CYCLIC_DEPENDENCY",
            Self::ExternalDependency { .. } => "RULES:EXTERNAL_DEPENDENCY",
            Self::ConflictingSourceArrays { .. } => "RULES:CONFLICTING_SOURCE_ARRAYS",
            Self::MultipleSourceArrays { .. } => "RULES:MULTIPLE_SOURCE_ARRAYS",
            Self::UnableToMigrate { .. } => "RULES:UNABLE_TO_MIGRATE",
            Self::IncompatibleTrees { .. } => "RULES:INCOMPATIBLE_TREES",
            Self::InvalidConfig { .. } => "RULES:INVALID_CONFIG",
            Self::Expression(_) => "RULES:EXPRESSION",
            Self::Schema(_) => "RULES:SCHEMA",
        }
    }

    /// Create an unsupported path node error
    pub fn unsupported(kind: &'static str, path: impl ToString) -> Self {
        Self::UnsupportedPathNode {
            kind,
            path: path.to_string(),
        }
    }

    /// Create a cyclic dependency error
    pub fn cyclic(path: impl ToString) -> Self {
        Self::CyclicDependency {
            path: path.to_string(),
        }
    }

    /// Create an external dependency error
    pub fn external(path: impl ToString, dependency: impl ToString) -> Self {
        Self::ExternalDependency {
            path: path.to_string(),
            dependency: dependency.to_string(),
        }
    }

    /// Create an unable-to-migrate error
    pub fn unable_to_migrate(path: impl ToString) -> Self {
        Self::UnableToMigrate {
            path: path.to_string(),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Whether the fault comes from rule configuration rather than from the
    /// expression or schema layer.
    pub fn is_configuration_fault(&self) -> bool {
        !matches!(self, Self::Expression(_) | Self::Schema(_))
    }
}

/// Result type for rule operations
pub type RuleResult<T> = Result<T, RuleError>;
