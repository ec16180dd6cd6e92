#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # arbor-schema
//!
//! Schema registry for arbor rule trees.
//!
//! Every registered type gets a stable [`TypeId`] and every field a stable
//! [`FieldId`]. Rule trees key their edges on these ids, so two accessors
//! naming the same field of the same declaring type are always the same edge,
//! no matter how the accessor was spelled.
//!
//! Instances are plain `serde_json::Value` trees: objects keyed by field name,
//! arrays, and scalars.

pub mod error;
pub mod schema;
pub mod types;

pub use error::{SchemaError, SchemaResult};
pub use schema::{Schema, SchemaBuilder};
pub use types::{FieldDef, FieldId, FieldRef, ScalarKind, TypeDef, TypeId, TypeKind, TypeRef};
