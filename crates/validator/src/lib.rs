#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # arbor-validator
//!
//! Results produced by assembled rule-tree validators.
//!
//! A validator procedure reports every failed check to a
//! [`ValidationResultTree`], which stores it at the structural location of
//! the checked value and stops accepting results once its limit is reached.
//!
//! ## Quick Start
//!
//! ```
//! use arbor_validator::{ValidationResult, ValidationResultTree};
//!
//! let mut tree = ValidationResultTree::new().with_limit(2);
//! for _ in 0..3 {
//!     tree.push(ValidationResult::new("required", "Required"));
//! }
//! assert_eq!(tree.len(), 2);
//! assert!(tree.is_exhausted());
//! ```

mod result;
mod tree;

pub use arbor_expression::Severity;
pub use result::ValidationResult;
pub use tree::{DEFAULT_MAX_RESULTS, ItemKey, ResultNode, ValidationResultTree};
