//! Canonical forms.
//!
//! Canonicalization strips everything that varies between otherwise identical
//! procedures: every literal occurrence and every host function moves into a
//! positional [`Closure`] (the shape keeps a `Slot(i)` in its place), and
//! parameters and loops are renumbered by first occurrence. Two procedures
//! that differ only in their constants share one shape, so one compiled
//! artifact serves both.
//!
//! Accessor chains stay in the shape. A chain names fields of the schema and
//! reads the frame's roots at run time, so there is no captured value to move
//! into a slot; procedures reading different fields get different shapes
//! even when the fields share a type.

use std::collections::HashMap;

use serde_json::Value;

use crate::ast::{Check, Expr, ExternFn, Function, Lambda, LoopId, ParamId, Procedure, Stmt};
use crate::equivalence::Equivalence;

/// One extracted closure entry.
#[derive(Debug, Clone)]
pub enum ClosureValue {
    /// A constant.
    Value(Value),
    /// A host function.
    Function(ExternFn),
}

impl PartialEq for ClosureValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Value(a), Self::Value(b)) => a == b,
            (Self::Function(a), Self::Function(b)) => a.name() == b.name(),
            _ => false,
        }
    }
}

/// Positional values extracted from a procedure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Closure {
    values: Vec<ClosureValue>,
}

impl Closure {
    /// Number of slots.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether nothing was extracted.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Constant in `slot`.
    pub fn value(&self, slot: usize) -> Option<&Value> {
        match self.values.get(slot)? {
            ClosureValue::Value(value) => Some(value),
            ClosureValue::Function(_) => None,
        }
    }

    /// Host function in `slot`.
    pub fn function(&self, slot: usize) -> Option<&ExternFn> {
        match self.values.get(slot)? {
            ClosureValue::Function(function) => Some(function),
            ClosureValue::Value(_) => None,
        }
    }

    /// All slots in order.
    pub fn iter(&self) -> impl Iterator<Item = &ClosureValue> {
        self.values.iter()
    }

    fn push(&mut self, value: ClosureValue) -> usize {
        self.values.push(value);
        self.values.len() - 1
    }
}

/// A shape plus the closure that completes it.
#[derive(Debug, Clone)]
pub struct CanonicalForm<T> {
    /// Renumbered tree with constants replaced by slots.
    pub shape: T,
    /// Extracted constants and functions.
    pub closure: Closure,
}

impl PartialEq for CanonicalForm<Expr> {
    fn eq(&self, other: &Self) -> bool {
        self.closure == other.closure && Equivalence::default().strict().exprs(&self.shape, &other.shape)
    }
}

impl PartialEq for CanonicalForm<Procedure> {
    fn eq(&self, other: &Self) -> bool {
        self.closure == other.closure
            && Equivalence::default()
                .strict()
                .procedures(&self.shape, &other.shape)
    }
}

/// Canonical form of an expression.
pub fn canonical_expr(expr: &Expr) -> CanonicalForm<Expr> {
    let mut canonicalizer = Canonicalizer::new(true);
    let shape = canonicalizer.expr(expr);
    CanonicalForm {
        shape,
        closure: canonicalizer.closure,
    }
}

/// Canonical form of a procedure.
///
/// With `extract_closures` off, literals and host functions stay in the
/// shape and only renumbering happens.
pub fn canonical_procedure(procedure: &Procedure, extract_closures: bool) -> CanonicalForm<Procedure> {
    let mut canonicalizer = Canonicalizer::new(extract_closures);
    let body = canonicalizer.block(&procedure.body);
    CanonicalForm {
        shape: Procedure::new(procedure.root.clone(), body),
        closure: canonicalizer.closure,
    }
}

struct Canonicalizer {
    extract: bool,
    closure: Closure,
    params: HashMap<ParamId, ParamId>,
    loops: HashMap<LoopId, LoopId>,
}

impl Canonicalizer {
    fn new(extract: bool) -> Self {
        Self {
            extract,
            closure: Closure::default(),
            params: HashMap::new(),
            loops: HashMap::new(),
        }
    }

    fn param(&mut self, id: ParamId) -> ParamId {
        let next = ParamId::canonical(self.params.len() as u32);
        *self.params.entry(id).or_insert(next)
    }

    fn loop_id(&mut self, id: LoopId) -> LoopId {
        let next = LoopId::canonical(self.loops.len() as u32);
        *self.loops.entry(id).or_insert(next)
    }

    fn lambda(&mut self, lambda: &Lambda) -> Lambda {
        let param = self.param(lambda.param);
        Lambda {
            param,
            param_type: lambda.param_type,
            body: Box::new(self.expr(&lambda.body)),
        }
    }

    fn boxed(&mut self, expr: &Expr) -> Box<Expr> {
        Box::new(self.expr(expr))
    }

    fn expr(&mut self, expr: &Expr) -> Expr {
        match expr {
            Expr::Root(ty) => Expr::Root(ty.clone()),
            Expr::Param { id, ty } => Expr::Param {
                id: self.param(*id),
                ty: *ty,
            },
            Expr::Member { parent, field } => Expr::Member {
                parent: self.boxed(parent),
                field: field.clone(),
            },
            Expr::Index { parent, index } => Expr::Index {
                parent: self.boxed(parent),
                index: *index,
            },
            Expr::Each(parent) => Expr::Each(self.boxed(parent)),
            Expr::Current(parent) => Expr::Current(self.boxed(parent)),
            Expr::Where { parent, predicate } => Expr::Where {
                parent: self.boxed(parent),
                predicate: self.lambda(predicate),
            },
            Expr::Iter { parent, id } => {
                let id = self.loop_id(*id);
                Expr::Iter {
                    parent: self.boxed(parent),
                    id,
                }
            }
            Expr::Literal(value) if self.extract => {
                Expr::Slot(self.closure.push(ClosureValue::Value(value.clone())))
            }
            Expr::Literal(value) => Expr::Literal(value.clone()),
            Expr::Slot(index) => Expr::Slot(*index),
            Expr::Unary { op, operand } => Expr::Unary {
                op: *op,
                operand: self.boxed(operand),
            },
            Expr::Binary { op, left, right } => Expr::Binary {
                op: *op,
                left: self.boxed(left),
                right: self.boxed(right),
            },
            Expr::Conditional {
                condition,
                then,
                otherwise,
            } => Expr::Conditional {
                condition: self.boxed(condition),
                then: self.boxed(then),
                otherwise: self.boxed(otherwise),
            },
            Expr::Call { function, args } => {
                let function = match function {
                    Function::Extern(ext) if self.extract => {
                        Function::Slot(self.closure.push(ClosureValue::Function(ext.clone())))
                    }
                    other => other.clone(),
                };
                Expr::Call {
                    function,
                    args: args.iter().map(|arg| self.expr(arg)).collect(),
                }
            }
            Expr::Map { source, projection } => Expr::Map {
                source: self.boxed(source),
                projection: self.lambda(projection),
            },
        }
    }

    fn block(&mut self, stmts: &[Stmt]) -> Vec<Stmt> {
        stmts.iter().map(|stmt| self.stmt(stmt)).collect()
    }

    fn stmt(&mut self, stmt: &Stmt) -> Stmt {
        match stmt {
            Stmt::Assign { target, value } => Stmt::Assign {
                target: self.expr(target),
                value: self.expr(value),
            },
            Stmt::If {
                condition,
                then,
                otherwise,
            } => Stmt::If {
                condition: self.expr(condition),
                then: self.block(then),
                otherwise: self.block(otherwise),
            },
            Stmt::Resize {
                array,
                length,
                element,
            } => Stmt::Resize {
                array: self.expr(array),
                length: self.expr(length),
                element: self.expr(element),
            },
            Stmt::Loop { id, length, body } => {
                let length = self.expr(length);
                Stmt::Loop {
                    id: self.loop_id(*id),
                    length,
                    body: self.block(body),
                }
            }
            Stmt::Check(check) => Stmt::Check(Check {
                location: self.expr(&check.location),
                reported: check.reported.iter().map(|r| self.expr(r)).collect(),
                condition: self.expr(&check.condition),
                code: self.expr(&check.code),
                message: self.expr(&check.message),
                severity: check.severity,
                priority: self.expr(&check.priority),
            }),
            Stmt::Mark(tag) => Stmt::Mark(self.expr(tag)),
        }
    }
}
