//! A single validation outcome.
//!
//! Code and message use `Cow<'static, str>` so statically declared validators
//! do not allocate.

use std::borrow::Cow;
use std::fmt;

use arbor_expression::{ConcretePath, Severity};
use serde::Serialize;

/// One failed validator.
///
/// ```
/// use arbor_validator::{Severity, ValidationResult};
///
/// let result = ValidationResult::new("required", "Name is required")
///     .with_path("Customer.Name")
///     .with_priority(10);
/// assert_eq!(result.severity, Severity::Error);
/// assert_eq!(result.to_string(), "[Customer.Name] required: Name is required");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    /// Error code for programmatic handling.
    pub code: Cow<'static, str>,

    /// Human-readable message.
    pub message: Cow<'static, str>,

    /// Severity.
    pub severity: Severity,

    /// Declaration priority; lower sorts first.
    pub priority: i64,

    /// Formatted paths the result is reported against.
    pub paths: Vec<String>,

    /// Where the result is stored in its tree.
    #[serde(skip)]
    pub location: ConcretePath,
}

impl ValidationResult {
    /// Creates an error-severity result with a code and message.
    pub fn new(code: impl Into<Cow<'static, str>>, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            severity: Severity::Error,
            priority: 0,
            paths: Vec::new(),
            location: ConcretePath::root(),
        }
    }

    /// Adds a reported path.
    #[must_use = "builder methods must be chained or built"]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.paths.push(path.into());
        self
    }

    /// Sets the severity.
    #[must_use = "builder methods must be chained or built"]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Sets the priority.
    #[must_use = "builder methods must be chained or built"]
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the storage location.
    #[must_use = "builder methods must be chained or built"]
    pub fn at(mut self, location: ConcretePath) -> Self {
        self.location = location;
        self
    }

    /// Whether this result makes the instance invalid.
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.paths.is_empty() {
            write!(f, "{}: {}", self.code, self.message)
        } else {
            write!(f, "[{}] {}: {}", self.paths.join(", "), self.code, self.message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_display_without_paths() {
        let result = ValidationResult::new("custom", "Something is off");
        assert_eq!(result.to_string(), "custom: Something is off");
    }

    #[test]
    fn test_display_joins_paths() {
        let result = ValidationResult::new("mismatch", "Totals differ")
            .with_path("Total")
            .with_path("Lines[*].Amount")
            .with_severity(Severity::Warning);
        assert_eq!(result.to_string(), "[Total, Lines[*].Amount] mismatch: Totals differ");
        assert!(!result.is_error());
    }

    #[test]
    fn test_serializes_without_location() {
        let result = ValidationResult::new("required", "Required").with_path("Name");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "code": "required",
                "message": "Required",
                "severity": "Error",
                "priority": 0,
                "paths": ["Name"],
            })
        );
    }
}
