//! Accessor chains.
//!
//! A chain is a run of path nodes ending in `Root` or a lambda `Param`.
//! [`Chain`] decomposes one into its head and a list of [`Shard`]s so the
//! rule tree and the migration engine can work segment by segment.

use arbor_schema::{FieldRef, Schema, TypeId};

use crate::ast::{Expr, Lambda, LoopId};
use crate::error::{ExpressionError, ExpressionResult};

/// One segment of an accessor chain.
#[derive(Debug, Clone)]
pub enum Shard {
    /// `.Field`
    Member(FieldRef),
    /// `[n]`
    Index(usize),
    /// `.Each()`
    Each,
    /// `.Current()`
    Current,
    /// `.Where(..)`
    Where(Lambda),
    /// Loop-bound element.
    Iter(LoopId),
}

impl Shard {
    /// Whether the shard steps from an array into its elements without a
    /// constant index.
    pub fn is_collection(&self) -> bool {
        matches!(self, Self::Each | Self::Current | Self::Iter(_))
    }

    /// Whether the shard steps into an element (collection or constant index).
    pub fn is_element(&self) -> bool {
        self.is_collection() || matches!(self, Self::Index(_))
    }

    /// Append this shard to `expr`.
    pub fn apply(self, expr: Expr) -> Expr {
        match self {
            Self::Member(field) => expr.member(field),
            Self::Index(index) => expr.index(index),
            Self::Each => expr.each(),
            Self::Current => expr.current(),
            Self::Where(predicate) => Expr::Where {
                parent: Box::new(expr),
                predicate,
            },
            Self::Iter(id) => expr.iter(id),
        }
    }
}

/// A decomposed accessor chain.
#[derive(Debug, Clone)]
pub struct Chain {
    /// `Root` or `Param` node.
    pub head: Expr,
    /// Segments from the head outwards.
    pub shards: Vec<Shard>,
}

impl Chain {
    /// Decompose `expr`; `None` if it is not an accessor chain.
    pub fn decompose(expr: &Expr) -> Option<Self> {
        let mut shards = Vec::new();
        let mut node = expr;
        loop {
            let shard = match node {
                Expr::Root(_) | Expr::Param { .. } => break,
                Expr::Member { field, .. } => Shard::Member(field.clone()),
                Expr::Index { index, .. } => Shard::Index(*index),
                Expr::Each(_) => Shard::Each,
                Expr::Current(_) => Shard::Current,
                Expr::Where { predicate, .. } => Shard::Where(predicate.clone()),
                Expr::Iter { id, .. } => Shard::Iter(*id),
                _ => return None,
            };
            shards.push(shard);
            node = node.path_parent()?;
        }
        shards.reverse();
        Some(Self {
            head: node.clone(),
            shards,
        })
    }

    /// Rebuild the expression from the first `len` shards.
    pub fn prefix(&self, len: usize) -> Expr {
        self.shards[..len.min(self.shards.len())]
            .iter()
            .cloned()
            .fold(self.head.clone(), |expr, shard| shard.apply(expr))
    }

    /// Rebuild the full expression.
    pub fn into_expr(self) -> Expr {
        self.shards
            .into_iter()
            .fold(self.head, |expr, shard| shard.apply(expr))
    }

    /// Number of collection shards.
    pub fn collection_depth(&self) -> usize {
        self.shards.iter().filter(|s| s.is_collection()).count()
    }
}

/// Type of the value an accessor chain denotes.
///
/// `Each`, `Current`, `Iter` and constant indexes denote elements; `Where`
/// keeps the array type.
pub fn chain_type(schema: &Schema, expr: &Expr) -> ExpressionResult<TypeId> {
    match expr {
        Expr::Root(ty) => Ok(ty.id()),
        Expr::Param { ty, .. } => Ok(*ty),
        Expr::Member { field, .. } => Ok(field.ty()),
        Expr::Index { parent, .. }
        | Expr::Each(parent)
        | Expr::Current(parent)
        | Expr::Iter { parent, .. } => {
            let array = chain_type(schema, parent)?;
            Ok(schema.element_type(array)?)
        }
        Expr::Where { parent, .. } => chain_type(schema, parent),
        Expr::Map { projection, .. } => {
            let element = chain_type(schema, &projection.body)?;
            schema.array_of(element).ok_or_else(|| {
                ExpressionError::type_error("registered array type", schema.type_name(element))
            })
        }
        other => Err(ExpressionError::type_error(
            "accessor chain",
            other.kind_name(),
        )),
    }
}

/// Schema-checked builder for accessor chains.
///
/// ```
/// use arbor_expression::PathBuilder;
/// use arbor_schema::{ScalarKind, Schema};
///
/// let mut b = Schema::builder();
/// let int = b.scalar(ScalarKind::Int);
/// let line = b.object("Line").unwrap();
/// b.field(line, "Qty", int).unwrap();
/// let lines = b.array_of(line).unwrap();
/// let order = b.object("Order").unwrap();
/// b.field(order, "Lines", lines).unwrap();
/// let schema = b.build();
///
/// let path = PathBuilder::new(&schema, order)
///     .unwrap()
///     .field("Lines")
///     .unwrap()
///     .each()
///     .unwrap()
///     .field("Qty")
///     .unwrap()
///     .build();
/// assert_eq!(path.to_string(), "Order.Lines.Each().Qty");
/// ```
#[derive(Debug, Clone)]
pub struct PathBuilder<'a> {
    schema: &'a Schema,
    expr: Expr,
    ty: TypeId,
}

impl<'a> PathBuilder<'a> {
    /// Start at the root of `root`.
    pub fn new(schema: &'a Schema, root: TypeId) -> ExpressionResult<Self> {
        Ok(Self {
            schema,
            expr: Expr::root(schema.type_ref(root)?),
            ty: root,
        })
    }

    /// Start from an existing chain.
    pub fn from_expr(schema: &'a Schema, expr: Expr) -> ExpressionResult<Self> {
        let ty = chain_type(schema, &expr)?;
        Ok(Self { schema, expr, ty })
    }

    /// Type of the chain built so far.
    pub fn ty(&self) -> TypeId {
        self.ty
    }

    /// `.name`
    pub fn field(self, name: &str) -> ExpressionResult<Self> {
        let field = self.schema.field(self.ty, name)?;
        Ok(Self {
            ty: field.ty(),
            expr: self.expr.member(field),
            schema: self.schema,
        })
    }

    /// `[index]`
    pub fn index(self, index: usize) -> ExpressionResult<Self> {
        let element = self.schema.element_type(self.ty)?;
        Ok(Self {
            ty: element,
            expr: self.expr.index(index),
            schema: self.schema,
        })
    }

    /// `.Each()`
    pub fn each(self) -> ExpressionResult<Self> {
        let element = self.schema.element_type(self.ty)?;
        Ok(Self {
            ty: element,
            expr: self.expr.each(),
            schema: self.schema,
        })
    }

    /// `.Current()`
    pub fn current(self) -> ExpressionResult<Self> {
        let element = self.schema.element_type(self.ty)?;
        Ok(Self {
            ty: element,
            expr: self.expr.current(),
            schema: self.schema,
        })
    }

    /// `.Where(predicate)`
    pub fn filter(self, predicate: impl FnOnce(Expr) -> Expr) -> ExpressionResult<Self> {
        let element = self.schema.element_type(self.ty)?;
        Ok(Self {
            ty: self.ty,
            expr: self.expr.filter(element, predicate),
            schema: self.schema,
        })
    }

    /// Finish.
    pub fn build(self) -> Expr {
        self.expr
    }
}

/// Parse a textual path relative to the root of `root`.
///
/// Segments are separated by `.`; each is a field name optionally followed
/// by `[n]` indexes, or one of `Each()` / `Current()`. The empty string is
/// the root itself.
pub fn parse_path(schema: &Schema, root: TypeId, text: &str) -> ExpressionResult<Expr> {
    let mut builder = PathBuilder::new(schema, root)?;
    let text = text.trim();
    if text.is_empty() {
        return Ok(builder.build());
    }
    for segment in text.split('.') {
        let segment = segment.trim();
        builder = match segment {
            "Each()" => builder.each()?,
            "Current()" => builder.current()?,
            "" => {
                return Err(ExpressionError::parse_error(format!(
                    "empty segment in '{text}'"
                )));
            }
            _ => {
                let (name, mut rest) = match segment.find('[') {
                    Some(pos) => segment.split_at(pos),
                    None => (segment, ""),
                };
                if !name.is_empty() {
                    builder = builder.field(name)?;
                }
                while !rest.is_empty() {
                    let close = rest.find(']').ok_or_else(|| {
                        ExpressionError::parse_error(format!("unclosed index in '{segment}'"))
                    })?;
                    let index = rest[1..close].trim().parse::<usize>().map_err(|_| {
                        ExpressionError::parse_error(format!(
                            "invalid index '{}' in '{segment}'",
                            &rest[1..close]
                        ))
                    })?;
                    builder = builder.index(index)?;
                    rest = &rest[close + 1..];
                    if !rest.is_empty() && !rest.starts_with('[') {
                        return Err(ExpressionError::parse_error(format!(
                            "unexpected '{rest}' in '{segment}'"
                        )));
                    }
                }
                builder
            }
        };
    }
    Ok(builder.build())
}
