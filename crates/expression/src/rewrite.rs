//! Tree walking and rewriting.
//!
//! [`Expr::rewrite`] is a top-down replacement: the callback sees the
//! outermost node first, and a node it replaces is not descended into. Alias
//! substitution relies on that to always replace the longest matching prefix
//! of a chain.

use crate::ast::{Check, Expr, Function, Lambda, ParamId, Stmt};
use crate::equivalence::Equivalence;

impl Expr {
    /// Visit direct children, lambda bodies included.
    pub fn for_each_child<'a>(&'a self, mut f: impl FnMut(&'a Expr)) {
        match self {
            Expr::Root(_) | Expr::Param { .. } | Expr::Literal(_) | Expr::Slot(_) => {}
            Expr::Member { parent, .. }
            | Expr::Index { parent, .. }
            | Expr::Each(parent)
            | Expr::Current(parent)
            | Expr::Iter { parent, .. } => f(parent),
            Expr::Where { parent, predicate } => {
                f(parent);
                f(&predicate.body);
            }
            Expr::Unary { operand, .. } => f(operand),
            Expr::Binary { left, right, .. } => {
                f(left);
                f(right);
            }
            Expr::Conditional {
                condition,
                then,
                otherwise,
            } => {
                f(condition);
                f(then);
                f(otherwise);
            }
            Expr::Call { args, .. } => args.iter().for_each(f),
            Expr::Map { source, projection } => {
                f(source);
                f(&projection.body);
            }
        }
    }

    /// Rebuild with every direct child passed through `f`.
    pub fn map_children(self, f: &mut impl FnMut(Expr) -> Expr) -> Expr {
        fn lambda(l: Lambda, f: &mut impl FnMut(Expr) -> Expr) -> Lambda {
            Lambda {
                body: Box::new(f(*l.body)),
                ..l
            }
        }
        match self {
            leaf @ (Expr::Root(_) | Expr::Param { .. } | Expr::Literal(_) | Expr::Slot(_)) => leaf,
            Expr::Member { parent, field } => Expr::Member {
                parent: Box::new(f(*parent)),
                field,
            },
            Expr::Index { parent, index } => Expr::Index {
                parent: Box::new(f(*parent)),
                index,
            },
            Expr::Each(parent) => Expr::Each(Box::new(f(*parent))),
            Expr::Current(parent) => Expr::Current(Box::new(f(*parent))),
            Expr::Iter { parent, id } => Expr::Iter {
                parent: Box::new(f(*parent)),
                id,
            },
            Expr::Where { parent, predicate } => Expr::Where {
                parent: Box::new(f(*parent)),
                predicate: lambda(predicate, f),
            },
            Expr::Unary { op, operand } => Expr::Unary {
                op,
                operand: Box::new(f(*operand)),
            },
            Expr::Binary { op, left, right } => Expr::Binary {
                op,
                left: Box::new(f(*left)),
                right: Box::new(f(*right)),
            },
            Expr::Conditional {
                condition,
                then,
                otherwise,
            } => Expr::Conditional {
                condition: Box::new(f(*condition)),
                then: Box::new(f(*then)),
                otherwise: Box::new(f(*otherwise)),
            },
            Expr::Call { function, args } => Expr::Call {
                function,
                args: args.into_iter().map(&mut *f).collect(),
            },
            Expr::Map { source, projection } => Expr::Map {
                source: Box::new(f(*source)),
                projection: lambda(projection, f),
            },
        }
    }

    /// Top-down rewrite; `f` returning `Some` replaces the node and stops
    /// descent below it.
    pub fn rewrite(self, f: &mut impl FnMut(&Expr) -> Option<Expr>) -> Expr {
        if let Some(replacement) = f(&self) {
            return replacement;
        }
        self.map_children(&mut |child| child.rewrite(f))
    }

    /// Whether any node satisfies `pred`.
    pub fn any_node(&self, pred: &mut impl FnMut(&Expr) -> bool) -> bool {
        if pred(self) {
            return true;
        }
        let mut found = false;
        self.for_each_child(|child| {
            if !found {
                found = child.any_node(pred);
            }
        });
        found
    }

    /// Whether the expression refers to lambda parameter `id`.
    pub fn references_param(&self, id: ParamId) -> bool {
        self.any_node(&mut |node| matches!(node, Expr::Param { id: p, .. } if *p == id))
    }

    /// Replace every reference to parameter `id` with `with`.
    pub fn replace_param(self, id: ParamId, with: &Expr) -> Expr {
        self.rewrite(&mut |node| match node {
            Expr::Param { id: p, .. } if *p == id => Some(with.clone()),
            _ => None,
        })
    }

    /// Replace every sub-expression equivalent to an alias source with the
    /// alias target, longest match first.
    pub fn substitute(self, aliases: &[(Expr, Expr)]) -> Expr {
        if aliases.is_empty() {
            return self;
        }
        self.rewrite(&mut |node| {
            if !node.is_path_node() {
                return None;
            }
            aliases
                .iter()
                .find(|(from, _)| Equivalence::default().exprs(from, node))
                .map(|(_, to)| to.clone())
        })
    }

    /// Maximal accessor chains, including those inside lambda bodies.
    pub fn chains(&self) -> Vec<&Expr> {
        let mut out = Vec::new();
        collect_chains(self, &mut out);
        out
    }

    /// Host functions referenced anywhere in the expression.
    pub fn extern_calls(&self) -> Vec<&Function> {
        let mut out = Vec::new();
        fn walk<'a>(expr: &'a Expr, out: &mut Vec<&'a Function>) {
            if let Expr::Call {
                function: function @ Function::Extern(_),
                ..
            } = expr
            {
                out.push(function);
            }
            expr.for_each_child(|child| walk(child, out));
        }
        walk(self, &mut out);
        out
    }
}

fn collect_chains<'a>(expr: &'a Expr, out: &mut Vec<&'a Expr>) {
    if expr.is_chain() {
        out.push(expr);
        let mut node = expr;
        while let Some(parent) = node.path_parent() {
            if let Expr::Where { predicate, .. } = node {
                collect_chains(&predicate.body, out);
            }
            node = parent;
        }
        return;
    }
    expr.for_each_child(|child| collect_chains(child, out));
}

impl Stmt {
    /// Rebuild with every contained expression passed through `f`, nested
    /// statements included.
    pub fn map_exprs(self, f: &mut impl FnMut(Expr) -> Expr) -> Stmt {
        fn block(stmts: Vec<Stmt>, f: &mut impl FnMut(Expr) -> Expr) -> Vec<Stmt> {
            stmts.into_iter().map(|s| s.map_exprs(f)).collect()
        }
        match self {
            Stmt::Assign { target, value } => Stmt::Assign {
                target: f(target),
                value: f(value),
            },
            Stmt::If {
                condition,
                then,
                otherwise,
            } => Stmt::If {
                condition: f(condition),
                then: block(then, f),
                otherwise: block(otherwise, f),
            },
            Stmt::Resize {
                array,
                length,
                element,
            } => Stmt::Resize {
                array: f(array),
                length: f(length),
                element: f(element),
            },
            Stmt::Loop { id, length, body } => Stmt::Loop {
                id,
                length: f(length),
                body: block(body, f),
            },
            Stmt::Check(check) => Stmt::Check(Check {
                location: f(check.location),
                reported: check.reported.into_iter().map(&mut *f).collect(),
                condition: f(check.condition),
                code: f(check.code),
                message: f(check.message),
                severity: check.severity,
                priority: f(check.priority),
            }),
            Stmt::Mark(tag) => Stmt::Mark(f(tag)),
        }
    }

    /// Visit every contained expression, nested statements included.
    pub fn for_each_expr<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        match self {
            Stmt::Assign { target, value } => {
                f(target);
                f(value);
            }
            Stmt::If {
                condition,
                then,
                otherwise,
            } => {
                f(condition);
                then.iter().chain(otherwise).for_each(|s| s.for_each_expr(f));
            }
            Stmt::Resize {
                array,
                length,
                element,
            } => {
                f(array);
                f(length);
                f(element);
            }
            Stmt::Loop { length, body, .. } => {
                f(length);
                body.iter().for_each(|s| s.for_each_expr(f));
            }
            Stmt::Check(check) => {
                f(&check.location);
                check.reported.iter().for_each(&mut *f);
                f(&check.condition);
                f(&check.code);
                f(&check.message);
                f(&check.priority);
            }
            Stmt::Mark(tag) => f(tag),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::LoopId;
    use crate::path::parse_path;
    use arbor_schema::{ScalarKind, Schema, TypeId};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn schema() -> (Arc<Schema>, TypeId, TypeId) {
        let mut b = Schema::builder();
        let int = b.scalar(ScalarKind::Int);
        let line = b.object("Line").unwrap();
        b.field(line, "Qty", int).unwrap();
        let lines = b.array_of(line).unwrap();
        let order = b.object("Order").unwrap();
        b.field(order, "Lines", lines).unwrap();
        b.field(order, "Total", int).unwrap();
        (b.build(), order, line)
    }

    #[test]
    fn test_substitute_replaces_longest_prefix() {
        let (schema, order, _) = schema();
        let each = parse_path(&schema, order, "Lines.Each()").unwrap();
        let lines = parse_path(&schema, order, "Lines").unwrap();
        let qty = parse_path(&schema, order, "Lines.Each().Qty").unwrap();
        let id = LoopId::fresh();

        let aliased = lines.clone().iter(id);
        let out = (qty + Expr::literal(1)).substitute(&[(each, aliased.clone())]);
        assert_eq!(
            out.to_string(),
            format!("({}.Qty + 1)", aliased)
        );
    }

    #[test]
    fn test_chains_are_maximal() {
        let (schema, order, line) = schema();
        let qty = schema.field(line, "Qty").unwrap();
        let filtered = parse_path(&schema, order, "Lines")
            .unwrap()
            .filter(line, |l| l.member(qty.clone()).greater_than(Expr::literal(0)))
            .each()
            .member(qty.clone());
        let total = parse_path(&schema, order, "Total").unwrap();
        let expr = filtered + total;

        let chains: Vec<String> = expr.chains().iter().map(ToString::to_string).collect();
        assert_eq!(chains.len(), 3);
        assert!(chains[0].starts_with("Order.Lines.Where("));
        assert!(chains[1].ends_with(".Qty"));
        assert!(chains[1].starts_with('p'));
        assert_eq!(chains[2], "Order.Total");
    }

    #[test]
    fn test_replace_param() {
        let (schema, order, line) = schema();
        let qty = schema.field(line, "Qty").unwrap();
        let lambda = Lambda::new(line, |l| l.member(qty));
        assert!(lambda.body.references_param(lambda.param));

        let element = parse_path(&schema, order, "Lines[0]").unwrap();
        let body = lambda.body.replace_param(lambda.param, &element);
        assert_eq!(body.to_string(), "Order.Lines[0].Qty");
    }
}
