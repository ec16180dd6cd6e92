//! Compilation backends.
//!
//! A backend turns a canonical procedure shape into an executable body. The
//! body never holds constants of its own: every run pairs it with the
//! [`Closure`] extracted during canonicalization, which is what lets one
//! body serve every procedure of the same shape.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use arbor_schema::TypeId;

use crate::ast::{Expr, LoopId, ParamId, Procedure, Stmt};
use crate::canonical::Closure;
use crate::error::{ExpressionError, ExpressionResult};
use crate::eval::{Frame, Inputs};

/// An executable procedure body.
pub trait CompiledBody: Send + Sync + fmt::Debug {
    /// Run the body in `frame`.
    fn execute(&self, frame: &mut Frame<'_, '_>) -> ExpressionResult<()>;

    /// Closure slots the body reads; a bound closure must have at least this
    /// many entries.
    fn slot_count(&self) -> usize;
}

/// Compiles procedure shapes into executable bodies.
pub trait CompileBackend: Send + Sync + fmt::Debug {
    /// Backend name, for logging.
    fn name(&self) -> &'static str;

    /// Compile a canonical shape.
    fn compile(&self, shape: &Procedure) -> ExpressionResult<Arc<dyn CompiledBody>>;
}

/// Backend that checks scoping once and then interprets the statements.
#[derive(Debug, Clone, Copy, Default)]
pub struct Interpreter;

#[derive(Debug)]
struct Interpreted {
    body: Vec<Stmt>,
    slots: usize,
}

impl CompiledBody for Interpreted {
    fn execute(&self, frame: &mut Frame<'_, '_>) -> ExpressionResult<()> {
        frame.run(&self.body)
    }

    fn slot_count(&self) -> usize {
        self.slots
    }
}

impl CompileBackend for Interpreter {
    fn name(&self) -> &'static str {
        "interpreter"
    }

    fn compile(&self, shape: &Procedure) -> ExpressionResult<Arc<dyn CompiledBody>> {
        let mut scoping = Scoping::default();
        scoping.block(&shape.body)?;
        tracing::trace!(
            backend = self.name(),
            root = %shape.root,
            statements = shape.statement_count(),
            "compiled procedure"
        );
        Ok(Arc::new(Interpreted {
            body: shape.body.clone(),
            slots: scoping.slots,
        }))
    }
}

/// Checks that every loop variable and lambda parameter is used inside its
/// binder, and counts closure slots.
#[derive(Default)]
struct Scoping {
    loops: HashSet<LoopId>,
    params: HashSet<ParamId>,
    slots: usize,
}

impl Scoping {
    fn block(&mut self, stmts: &[Stmt]) -> ExpressionResult<()> {
        for stmt in stmts {
            match stmt {
                Stmt::Loop { id, length, body } => {
                    self.expr(length)?;
                    let fresh = self.loops.insert(*id);
                    let result = self.block(body);
                    if fresh {
                        self.loops.remove(id);
                    }
                    result?;
                }
                Stmt::If {
                    condition,
                    then,
                    otherwise,
                } => {
                    self.expr(condition)?;
                    self.block(then)?;
                    self.block(otherwise)?;
                }
                other => {
                    let mut result = Ok(());
                    other.for_each_expr(&mut |expr| {
                        if result.is_ok() {
                            result = self.expr(expr);
                        }
                    });
                    result?;
                }
            }
        }
        Ok(())
    }

    fn expr(&mut self, expr: &Expr) -> ExpressionResult<()> {
        match expr {
            Expr::Iter { id, .. } if !self.loops.contains(id) => {
                return Err(ExpressionError::UnboundLoop {
                    id: format!("{id:?}"),
                });
            }
            Expr::Param { id, .. } if !self.params.contains(id) => {
                return Err(ExpressionError::UnboundParameter {
                    id: format!("{id:?}"),
                });
            }
            Expr::Slot(index) => self.slots = self.slots.max(index + 1),
            Expr::Call {
                function: crate::ast::Function::Slot(index),
                ..
            } => self.slots = self.slots.max(index + 1),
            _ => {}
        }
        match expr {
            Expr::Where { parent, predicate }
            | Expr::Map {
                source: parent,
                projection: predicate,
            } => {
                self.expr(parent)?;
                let fresh = self.params.insert(predicate.param);
                let result = self.expr(&predicate.body);
                if fresh {
                    self.params.remove(&predicate.param);
                }
                result
            }
            _ => {
                let mut result = Ok(());
                expr.for_each_child(|child| {
                    if result.is_ok() {
                        result = self.expr(child);
                    }
                });
                result
            }
        }
    }
}

/// A compiled body bound to its closure: ready to run.
#[derive(Debug, Clone)]
pub struct Callable {
    root: TypeId,
    body: Arc<dyn CompiledBody>,
    closure: Arc<Closure>,
}

impl Callable {
    /// Bind `body` to `closure`.
    pub fn new(
        root: TypeId,
        body: Arc<dyn CompiledBody>,
        closure: Arc<Closure>,
    ) -> ExpressionResult<Self> {
        if closure.len() < body.slot_count() {
            return Err(ExpressionError::UnresolvedSlot {
                index: closure.len(),
            });
        }
        Ok(Self {
            root,
            body,
            closure,
        })
    }

    /// Type of the instance the body receives.
    pub fn root(&self) -> TypeId {
        self.root
    }

    /// The shared compiled body.
    pub fn body(&self) -> &Arc<dyn CompiledBody> {
        &self.body
    }

    /// The bound closure.
    pub fn closure(&self) -> &Closure {
        &self.closure
    }

    /// A fresh frame over `inputs`.
    pub fn frame<'a, 's>(&'a self, inputs: Inputs<'a>) -> Frame<'a, 's> {
        Frame::new(&self.closure, inputs)
    }

    /// Run in a frame obtained from [`Callable::frame`].
    pub fn run(&self, frame: &mut Frame<'_, '_>) -> ExpressionResult<()> {
        self.body.execute(frame)
    }
}
