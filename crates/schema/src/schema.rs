//! Schema registry.
//!
//! A [`Schema`] is assembled once with a [`SchemaBuilder`] and then shared
//! read-only (`Arc<Schema>`) by every rule tree built over it. Ids are dense
//! indexes into the registry tables, so lookups never hash.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::error::{SchemaError, SchemaResult};
use crate::types::{FieldDef, FieldId, FieldRef, ScalarKind, TypeDef, TypeId, TypeKind, TypeRef};

/// Builder for a [`Schema`].
///
/// Object types are declared first and get fields afterwards, which allows
/// self-referencing and mutually recursive types.
///
/// ```
/// use arbor_schema::{ScalarKind, Schema};
///
/// let mut builder = Schema::builder();
/// let int = builder.scalar(ScalarKind::Int);
/// let line = builder.object("Line").unwrap();
/// builder.field(line, "Qty", int).unwrap();
/// let lines = builder.array_of(line).unwrap();
/// let order = builder.object("Order").unwrap();
/// builder.field(order, "Lines", lines).unwrap();
/// let schema = builder.build();
///
/// assert_eq!(schema.field(order, "Lines").unwrap().ty(), lines);
/// ```
#[derive(Debug)]
pub struct SchemaBuilder {
    types: Vec<TypeDef>,
    fields: Vec<FieldDef>,
    by_name: HashMap<Arc<str>, TypeId>,
    arrays: HashMap<TypeId, TypeId>,
}

impl SchemaBuilder {
    /// Create a builder with the scalar types pre-registered.
    pub fn new() -> Self {
        let mut builder = Self {
            types: Vec::new(),
            fields: Vec::new(),
            by_name: HashMap::new(),
            arrays: HashMap::new(),
        };
        for kind in ScalarKind::ALL {
            builder.push_type(Arc::from(kind.name()), TypeKind::Scalar(kind));
        }
        builder
    }

    fn push_type(&mut self, name: Arc<str>, kind: TypeKind) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        self.by_name.insert(Arc::clone(&name), id);
        self.types.push(TypeDef {
            id,
            name,
            kind,
            fields: IndexMap::new(),
        });
        id
    }

    /// Id of a pre-registered scalar type.
    pub fn scalar(&self, kind: ScalarKind) -> TypeId {
        scalar_id(kind)
    }

    /// Declare an object type.
    pub fn object(&mut self, name: &str) -> SchemaResult<TypeId> {
        if self.by_name.contains_key(name) {
            return Err(SchemaError::DuplicateType {
                name: name.to_owned(),
            });
        }
        let id = self.push_type(Arc::from(name), TypeKind::Object);
        tracing::trace!(type_name = name, type_id = %id, "declared object type");
        Ok(id)
    }

    /// Add a field to a previously declared object type.
    pub fn field(&mut self, owner: TypeId, name: &str, ty: TypeId) -> SchemaResult<FieldId> {
        self.check_type(ty)?;
        let next = FieldId(self.fields.len() as u32);
        let def = self
            .types
            .get_mut(owner.0 as usize)
            .ok_or(SchemaError::UnknownType { id: owner.0 })?;
        if def.kind != TypeKind::Object {
            return Err(SchemaError::not_an_object(def.name.as_ref()));
        }
        if def.fields.contains_key(name) {
            return Err(SchemaError::DuplicateField {
                owner: def.name.to_string(),
                field: name.to_owned(),
            });
        }
        let name: Arc<str> = Arc::from(name);
        def.fields.insert(Arc::clone(&name), next);
        self.fields.push(FieldDef::new(next, owner, ty, name));
        Ok(next)
    }

    /// Array type over `element`; interned, so repeated calls return the same id.
    pub fn array_of(&mut self, element: TypeId) -> SchemaResult<TypeId> {
        self.check_type(element)?;
        if let Some(&id) = self.arrays.get(&element) {
            return Ok(id);
        }
        let name = format!("{}[]", self.types[element.0 as usize].name);
        let id = self.push_type(Arc::from(name), TypeKind::Array { element });
        self.arrays.insert(element, id);
        Ok(id)
    }

    fn check_type(&self, ty: TypeId) -> SchemaResult<()> {
        if (ty.0 as usize) < self.types.len() {
            Ok(())
        } else {
            Err(SchemaError::UnknownType { id: ty.0 })
        }
    }

    /// Freeze the builder into a shareable schema.
    pub fn build(self) -> Arc<Schema> {
        tracing::debug!(
            types = self.types.len(),
            fields = self.fields.len(),
            "schema built"
        );
        Arc::new(Schema {
            types: self.types,
            fields: self.fields,
            by_name: self.by_name,
            arrays: self.arrays,
        })
    }
}

impl Default for SchemaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn scalar_id(kind: ScalarKind) -> TypeId {
    let index = ScalarKind::ALL
        .iter()
        .position(|k| *k == kind)
        .unwrap_or_default();
    TypeId(index as u32)
}

/// Immutable schema registry.
#[derive(Debug)]
pub struct Schema {
    types: Vec<TypeDef>,
    fields: Vec<FieldDef>,
    by_name: HashMap<Arc<str>, TypeId>,
    arrays: HashMap<TypeId, TypeId>,
}

impl Schema {
    /// Start building a schema.
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::new()
    }

    /// Number of registered types, scalars included.
    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    /// Id of a scalar type.
    pub fn scalar(&self, kind: ScalarKind) -> TypeId {
        scalar_id(kind)
    }

    /// Type definition by id.
    pub fn type_def(&self, id: TypeId) -> SchemaResult<&TypeDef> {
        self.types
            .get(id.0 as usize)
            .ok_or(SchemaError::UnknownType { id: id.0 })
    }

    /// Type handle by id.
    pub fn type_ref(&self, id: TypeId) -> SchemaResult<TypeRef> {
        self.type_def(id).map(TypeDef::to_ref)
    }

    /// Type name by id, or `"?"` for foreign ids.
    pub fn type_name(&self, id: TypeId) -> &str {
        self.types.get(id.0 as usize).map_or("?", TypeDef::name)
    }

    /// Type id by registered name.
    pub fn type_by_name(&self, name: &str) -> SchemaResult<TypeId> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| SchemaError::UnknownTypeName {
                name: name.to_owned(),
            })
    }

    /// Field of `owner` called `name`.
    pub fn field(&self, owner: TypeId, name: &str) -> SchemaResult<FieldRef> {
        let def = self.type_def(owner)?;
        if def.kind != TypeKind::Object {
            return Err(SchemaError::not_an_object(def.name()));
        }
        def.fields
            .get(name)
            .map(|id| self.fields[id.0 as usize].to_ref())
            .ok_or_else(|| SchemaError::unknown_field(def.name(), name))
    }

    /// Field definition by id.
    pub fn field_def(&self, id: FieldId) -> Option<&FieldDef> {
        self.fields.get(id.0 as usize)
    }

    /// All fields of an object type in declaration order.
    pub fn fields(&self, owner: TypeId) -> SchemaResult<Vec<FieldRef>> {
        let def = self.type_def(owner)?;
        Ok(def
            .field_ids()
            .map(|id| self.fields[id.0 as usize].to_ref())
            .collect())
    }

    /// Element type of an array type.
    pub fn element_type(&self, array: TypeId) -> SchemaResult<TypeId> {
        match self.type_def(array)?.kind {
            TypeKind::Array { element } => Ok(element),
            _ => Err(SchemaError::not_an_array(self.type_name(array))),
        }
    }

    /// Array type over `element`, if one was registered.
    pub fn array_of(&self, element: TypeId) -> Option<TypeId> {
        self.arrays.get(&element).copied()
    }

    /// Whether `ty` is an array type.
    pub fn is_array(&self, ty: TypeId) -> bool {
        matches!(
            self.types.get(ty.0 as usize).map(TypeDef::kind),
            Some(TypeKind::Array { .. })
        )
    }

    /// Whether `ty` is an object type.
    pub fn is_object(&self, ty: TypeId) -> bool {
        matches!(
            self.types.get(ty.0 as usize).map(TypeDef::kind),
            Some(TypeKind::Object)
        )
    }

    /// Default value of a type.
    ///
    /// Objects are default-constructed one level deep: scalar fields get
    /// their defaults, nested object and array fields stay `null` until
    /// something writes through them.
    pub fn default_value(&self, ty: TypeId) -> Value {
        let Some(def) = self.types.get(ty.0 as usize) else {
            return Value::Null;
        };
        match def.kind {
            TypeKind::Scalar(kind) => scalar_default(kind),
            TypeKind::Array { .. } => Value::Array(Vec::new()),
            TypeKind::Object => {
                let mut object = Map::with_capacity(def.fields.len());
                for (name, id) in &def.fields {
                    let field_ty = self.fields[id.0 as usize].ty();
                    let value = match self.types[field_ty.0 as usize].kind {
                        TypeKind::Scalar(kind) => scalar_default(kind),
                        _ => Value::Null,
                    };
                    object.insert(name.to_string(), value);
                }
                Value::Object(object)
            }
        }
    }
}

fn scalar_default(kind: ScalarKind) -> Value {
    match kind {
        ScalarKind::Bool => Value::Bool(false),
        ScalarKind::Int => Value::from(0),
        ScalarKind::Float => Value::from(0.0),
        ScalarKind::String | ScalarKind::Any => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn order_schema() -> (Arc<Schema>, TypeId, TypeId, TypeId) {
        let mut b = Schema::builder();
        let int = b.scalar(ScalarKind::Int);
        let string = b.scalar(ScalarKind::String);
        let line = b.object("Line").unwrap();
        b.field(line, "Qty", int).unwrap();
        b.field(line, "Sku", string).unwrap();
        let lines = b.array_of(line).unwrap();
        let order = b.object("Order").unwrap();
        b.field(order, "Lines", lines).unwrap();
        b.field(order, "Total", int).unwrap();
        (b.build(), order, line, lines)
    }

    #[test]
    fn test_field_lookup() {
        let (schema, order, _, lines) = order_schema();
        let field = schema.field(order, "Lines").unwrap();
        assert_eq!(field.name(), "Lines");
        assert_eq!(field.ty(), lines);
        assert_eq!(field.owner(), order);
        assert!(schema.field(order, "Missing").is_err());
    }

    #[test]
    fn test_array_interning() {
        let mut b = Schema::builder();
        let int = b.scalar(ScalarKind::Int);
        let a = b.array_of(int).unwrap();
        let again = b.array_of(int).unwrap();
        assert_eq!(a, again);
        let schema = b.build();
        assert_eq!(schema.element_type(a).unwrap(), int);
        assert_eq!(schema.type_name(a), "int[]");
    }

    #[test]
    fn test_duplicates_rejected() {
        let mut b = Schema::builder();
        let int = b.scalar(ScalarKind::Int);
        let t = b.object("T").unwrap();
        b.field(t, "A", int).unwrap();
        assert_eq!(b.field(t, "A", int).unwrap_err().code(), "SCHEMA:DUPLICATE_FIELD");
        assert_eq!(b.object("T").unwrap_err().code(), "SCHEMA:DUPLICATE_TYPE");
        assert_eq!(
            b.field(int, "X", int).unwrap_err().code(),
            "SCHEMA:NOT_AN_OBJECT"
        );
    }

    #[test]
    fn test_default_values() {
        let (schema, order, line, lines) = order_schema();
        assert_eq!(schema.default_value(line), json!({ "Qty": 0, "Sku": null }));
        assert_eq!(schema.default_value(order), json!({ "Lines": null, "Total": 0 }));
        assert_eq!(schema.default_value(lines), json!([]));
        assert_eq!(
            schema.default_value(schema.scalar(ScalarKind::Bool)),
            json!(false)
        );
    }

    #[test]
    fn test_recursive_type() {
        let mut b = Schema::builder();
        let node = b.object("Node").unwrap();
        b.field(node, "Next", node).unwrap();
        let schema = b.build();
        assert_eq!(schema.field(node, "Next").unwrap().ty(), node);
        assert_eq!(schema.default_value(node), json!({ "Next": null }));
    }
}
