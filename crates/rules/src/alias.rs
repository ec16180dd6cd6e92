//! Element aliases.
//!
//! Inside an assembled loop, "the current element" of an iterated array is
//! the element at the loop index. [`Aliases`] rewrites `array.Current()` (and
//! for places also `array.Each()`) into the bound element expression.
//!
//! Rewriting is bottom-up: inner arrays are bound first, so a nested array is
//! registered by its already-bound form (`Orders[#1].Lines`). Arrays are
//! matched with `Each` and `Current` treated alike.

use arbor_expression::{Equivalence, Expr};

#[derive(Debug, Clone)]
struct Binding {
    array: Expr,
    element: Expr,
}

/// Array-to-element bindings in scope.
#[derive(Debug, Clone, Default)]
pub struct Aliases {
    bindings: Vec<Binding>,
}

impl Aliases {
    /// No bindings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind elements of `array` to `element`. Later bindings shadow earlier.
    pub fn push(&mut self, array: Expr, element: Expr) {
        self.bindings.push(Binding { array, element });
    }

    /// Number of bindings.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Drop bindings pushed after the first `len`.
    pub fn truncate(&mut self, len: usize) {
        self.bindings.truncate(len);
    }

    /// Whether elements of `array` are bound.
    pub fn binds(&self, array: &Expr) -> bool {
        let eq = matching();
        self.bindings.iter().any(|b| eq.exprs(&b.array, array))
    }

    /// Bind `Current()` elements in a value or condition. `Each()` keeps its
    /// projection meaning.
    pub fn values(&self, expr: Expr) -> Expr {
        self.rewrite(expr, false)
    }

    /// Bind `Current()` and `Each()` elements in a place.
    pub fn places(&self, expr: Expr) -> Expr {
        self.rewrite(expr, true)
    }

    fn rewrite(&self, expr: Expr, each_too: bool) -> Expr {
        if self.bindings.is_empty() {
            return expr;
        }
        let eq = matching();
        self.bind(expr, each_too, &eq)
    }

    fn bind(&self, expr: Expr, each_too: bool, eq: &Equivalence) -> Expr {
        let expr = expr.map_children(&mut |child| self.bind(child, each_too, eq));
        let bound = match &expr {
            Expr::Current(parent) => self.element_of(parent, eq),
            Expr::Each(parent) if each_too => self.element_of(parent, eq),
            _ => None,
        };
        bound.unwrap_or(expr)
    }

    fn element_of(&self, array: &Expr, eq: &Equivalence) -> Option<Expr> {
        self.bindings
            .iter()
            .rev()
            .find(|b| eq.exprs(&b.array, array))
            .map(|b| b.element.clone())
    }
}

/// Arrays are registered in their bound form, so loop ids must match exactly.
fn matching() -> Equivalence {
    Equivalence::default().strict().ignore_each_current()
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_expression::{LoopId, parse_path};
    use arbor_schema::{ScalarKind, Schema};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_values_keep_projections() {
        let mut b = Schema::builder();
        let int = b.scalar(ScalarKind::Int);
        let line = b.object("Line").unwrap();
        b.field(line, "Qty", int).unwrap();
        let lines = b.array_of(line).unwrap();
        let order = b.object("Order").unwrap();
        b.field(order, "Lines", lines).unwrap();
        let schema = b.build();

        let array = parse_path(&schema, order, "Lines").unwrap();
        let id = LoopId::fresh();
        let mut aliases = Aliases::new();
        aliases.push(array.clone(), array.clone().iter(id));

        let current = parse_path(&schema, order, "Lines.Current().Qty").unwrap();
        let each = parse_path(&schema, order, "Lines.Each().Qty").unwrap();
        let bound = array.iter(id).member(schema.field(line, "Qty").unwrap());

        let eq = Equivalence::default().strict();
        assert!(eq.exprs(&aliases.values(current.clone()), &bound));
        assert!(eq.exprs(&aliases.values(each.clone()), &each));
        assert!(eq.exprs(&aliases.places(each), &bound));
        assert_eq!(aliases.len(), 1);
        aliases.truncate(0);
        assert!(eq.exprs(&aliases.values(current.clone()), &current));
    }
}
