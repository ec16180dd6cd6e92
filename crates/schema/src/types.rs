//! Type and field identities.
//!
//! Identity is always the integer id assigned at registration. Names ride
//! along in [`TypeRef`] / [`FieldRef`] for display and for keying object
//! values, but never take part in equality or hashing.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Stable id of a registered type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeId(pub(crate) u32);

impl TypeId {
    /// Raw integer value.
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Stable id of a registered field, unique across the whole schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldId(pub(crate) u32);

impl FieldId {
    /// Raw integer value.
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "F{}", self.0)
    }
}

/// Scalar value kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarKind {
    /// `true` / `false`, defaults to `false`.
    Bool,
    /// Integer, defaults to `0`.
    Int,
    /// Floating point, defaults to `0.0`.
    Float,
    /// String, defaults to `null`.
    String,
    /// Untyped value, defaults to `null`.
    Any,
}

impl ScalarKind {
    /// Display name used when the scalar is registered as a type.
    pub fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::String => "string",
            Self::Any => "any",
        }
    }

    pub(crate) const ALL: [ScalarKind; 5] = [
        ScalarKind::Bool,
        ScalarKind::Int,
        ScalarKind::Float,
        ScalarKind::String,
        ScalarKind::Any,
    ];
}

/// Shape of a registered type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeKind {
    /// A leaf value.
    Scalar(ScalarKind),
    /// An object with named fields.
    Object,
    /// An array of `element`.
    Array { element: TypeId },
}

/// Lightweight type handle carried inside path roots.
#[derive(Clone)]
pub struct TypeRef {
    id: TypeId,
    name: Arc<str>,
}

impl TypeRef {
    pub(crate) fn new(id: TypeId, name: Arc<str>) -> Self {
        Self { id, name }
    }

    /// Type id.
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Registered type name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PartialEq for TypeRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeRef {}

impl Hash for TypeRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.id)
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Lightweight field handle carried inside member-access nodes.
///
/// Equality and hashing use the field id only; two handles for the same
/// field of the same declaring type are always equal.
#[derive(Clone)]
pub struct FieldRef {
    id: FieldId,
    owner: TypeId,
    ty: TypeId,
    name: Arc<str>,
}

impl FieldRef {
    /// Field id.
    pub fn id(&self) -> FieldId {
        self.id
    }

    /// Declaring type.
    pub fn owner(&self) -> TypeId {
        self.owner
    }

    /// Type of the field's value.
    pub fn ty(&self) -> TypeId {
        self.ty
    }

    /// Field name; the key used in object values.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PartialEq for FieldRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for FieldRef {}

impl Hash for FieldRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.id)
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A registered type.
#[derive(Debug, Clone)]
pub struct TypeDef {
    pub(crate) id: TypeId,
    pub(crate) name: Arc<str>,
    pub(crate) kind: TypeKind,
    pub(crate) fields: IndexMap<Arc<str>, FieldId>,
}

impl TypeDef {
    /// Type id.
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Type kind.
    pub fn kind(&self) -> &TypeKind {
        &self.kind
    }

    /// Field ids in declaration order; empty for non-objects.
    pub fn field_ids(&self) -> impl Iterator<Item = FieldId> + '_ {
        self.fields.values().copied()
    }

    /// Handle for this type.
    pub fn to_ref(&self) -> TypeRef {
        TypeRef::new(self.id, Arc::clone(&self.name))
    }
}

/// A registered field.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub(crate) field: FieldRef,
}

impl FieldDef {
    pub(crate) fn new(id: FieldId, owner: TypeId, ty: TypeId, name: Arc<str>) -> Self {
        Self {
            field: FieldRef { id, owner, ty, name },
        }
    }

    /// Handle for this field.
    pub fn to_ref(&self) -> FieldRef {
        self.field.clone()
    }

    /// Field name.
    pub fn name(&self) -> &str {
        self.field.name()
    }

    /// Field value type.
    pub fn ty(&self) -> TypeId {
        self.field.ty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn field_ref_identity_ignores_name() {
        let a = FieldDef::new(FieldId(3), TypeId(1), TypeId(2), Arc::from("Total")).to_ref();
        let b = FieldDef::new(FieldId(3), TypeId(1), TypeId(2), Arc::from("renamed")).to_ref();
        let c = FieldDef::new(FieldId(4), TypeId(1), TypeId(2), Arc::from("Total")).to_ref();
        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<_> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn type_ref_display_uses_name() {
        let t = TypeRef::new(TypeId(7), Arc::from("Order"));
        assert_eq!(t.to_string(), "Order");
        assert_eq!(format!("{t:?}"), "Order(T7)");
    }
}
