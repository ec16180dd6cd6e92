//! Structural equivalence and hashing.
//!
//! Two expressions are equivalent when they have the same shape, refer to the
//! same fields and types, hold equal constants and call the same functions,
//! with lambda parameters and loop variables renamed consistently. The
//! renaming is a bijection: one parameter on the left can never correspond to
//! two different parameters on the right, or vice versa.
//!
//! Hashing numbers parameters and loops by first occurrence, so equivalent
//! trees always hash the same.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};

use serde_json::Value;

use crate::ast::{Check, Expr, Function, Lambda, LoopId, ParamId, Procedure, Stmt};

/// Equivalence options.
///
/// The default is non-strict and tells `Each()` and `Current()` apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Equivalence {
    strict: bool,
    distinguish_each_current: bool,
}

impl Default for Equivalence {
    fn default() -> Self {
        Self {
            strict: false,
            distinguish_each_current: true,
        }
    }
}

impl Equivalence {
    /// Free parameters and loops must be identical; only binders introduce
    /// a renaming.
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Treat `Each()` and `Current()` as the same node.
    pub fn ignore_each_current(mut self) -> Self {
        self.distinguish_each_current = false;
        self
    }

    /// Whether two expressions are equivalent.
    pub fn exprs(&self, a: &Expr, b: &Expr) -> bool {
        Matcher::new(*self).expr(a, b)
    }

    /// Whether two statement lists are equivalent.
    pub fn stmts(&self, a: &[Stmt], b: &[Stmt]) -> bool {
        Matcher::new(*self).block(a, b)
    }

    /// Whether two procedures are equivalent.
    pub fn procedures(&self, a: &Procedure, b: &Procedure) -> bool {
        a.root == b.root && self.stmts(&a.body, &b.body)
    }

    /// Hash consistent with [`Equivalence::exprs`].
    pub fn hash_expr(&self, expr: &Expr) -> u64 {
        let mut hasher = DefaultHasher::new();
        Digest::new(*self, &mut hasher).expr(expr);
        hasher.finish()
    }

    /// Hash consistent with [`Equivalence::procedures`].
    pub fn hash_procedure(&self, procedure: &Procedure) -> u64 {
        let mut hasher = DefaultHasher::new();
        procedure.root.hash(&mut hasher);
        let mut digest = Digest::new(*self, &mut hasher);
        digest.block(&procedure.body);
        hasher.finish()
    }
}

/// Bijective renaming between two id spaces.
#[derive(Debug)]
struct Renaming<T> {
    forward: HashMap<T, T>,
    backward: HashMap<T, T>,
}

impl<T: Copy + Eq + Hash> Renaming<T> {
    fn new() -> Self {
        Self {
            forward: HashMap::new(),
            backward: HashMap::new(),
        }
    }

    /// Match a reference; free ids get mapped on first sight unless strict.
    fn reference(&mut self, a: T, b: T, strict: bool) -> bool {
        match (self.forward.get(&a), self.backward.get(&b)) {
            (Some(mapped), _) => *mapped == b,
            (None, Some(_)) => false,
            (None, None) if strict => a == b,
            (None, None) => {
                self.forward.insert(a, b);
                self.backward.insert(b, a);
                true
            }
        }
    }

    /// Bind `a` to `b` for the duration of a scope; returns what to restore.
    fn bind(&mut self, a: T, b: T) -> (Option<T>, Option<T>) {
        (self.forward.insert(a, b), self.backward.insert(b, a))
    }

    fn unbind(&mut self, a: T, b: T, previous: (Option<T>, Option<T>)) {
        match previous.0 {
            Some(old) => self.forward.insert(a, old),
            None => self.forward.remove(&a),
        };
        match previous.1 {
            Some(old) => self.backward.insert(b, old),
            None => self.backward.remove(&b),
        };
    }
}

struct Matcher {
    options: Equivalence,
    params: Renaming<ParamId>,
    loops: Renaming<LoopId>,
}

impl Matcher {
    fn new(options: Equivalence) -> Self {
        Self {
            options,
            params: Renaming::new(),
            loops: Renaming::new(),
        }
    }

    fn lambda(&mut self, a: &Lambda, b: &Lambda) -> bool {
        if a.param_type != b.param_type {
            return false;
        }
        let previous = self.params.bind(a.param, b.param);
        let result = self.expr(&a.body, &b.body);
        self.params.unbind(a.param, b.param, previous);
        result
    }

    fn expr(&mut self, a: &Expr, b: &Expr) -> bool {
        match (a, b) {
            (Expr::Root(x), Expr::Root(y)) => x == y,
            (Expr::Param { id: x, ty: tx }, Expr::Param { id: y, ty: ty_ }) => {
                tx == ty_ && self.params.reference(*x, *y, self.options.strict)
            }
            (
                Expr::Member {
                    parent: pa,
                    field: fa,
                },
                Expr::Member {
                    parent: pb,
                    field: fb,
                },
            ) => fa == fb && self.expr(pa, pb),
            (
                Expr::Index {
                    parent: pa,
                    index: ia,
                },
                Expr::Index {
                    parent: pb,
                    index: ib,
                },
            ) => ia == ib && self.expr(pa, pb),
            (Expr::Each(pa), Expr::Each(pb)) | (Expr::Current(pa), Expr::Current(pb)) => {
                self.expr(pa, pb)
            }
            (Expr::Each(pa), Expr::Current(pb)) | (Expr::Current(pa), Expr::Each(pb))
                if !self.options.distinguish_each_current =>
            {
                self.expr(pa, pb)
            }
            (
                Expr::Where {
                    parent: pa,
                    predicate: la,
                },
                Expr::Where {
                    parent: pb,
                    predicate: lb,
                },
            ) => self.expr(pa, pb) && self.lambda(la, lb),
            (Expr::Iter { parent: pa, id: ia }, Expr::Iter { parent: pb, id: ib }) => {
                self.loops.reference(*ia, *ib, self.options.strict) && self.expr(pa, pb)
            }
            (Expr::Literal(x), Expr::Literal(y)) => x == y,
            (Expr::Slot(x), Expr::Slot(y)) => x == y,
            (
                Expr::Unary {
                    op: oa,
                    operand: xa,
                },
                Expr::Unary {
                    op: ob,
                    operand: xb,
                },
            ) => oa == ob && self.expr(xa, xb),
            (
                Expr::Binary {
                    op: oa,
                    left: la,
                    right: ra,
                },
                Expr::Binary {
                    op: ob,
                    left: lb,
                    right: rb,
                },
            ) => oa == ob && self.expr(la, lb) && self.expr(ra, rb),
            (
                Expr::Conditional {
                    condition: ca,
                    then: ta,
                    otherwise: ea,
                },
                Expr::Conditional {
                    condition: cb,
                    then: tb,
                    otherwise: eb,
                },
            ) => self.expr(ca, cb) && self.expr(ta, tb) && self.expr(ea, eb),
            (
                Expr::Call {
                    function: fa,
                    args: aa,
                },
                Expr::Call {
                    function: fb,
                    args: ab,
                },
            ) => {
                same_function(fa, fb)
                    && aa.len() == ab.len()
                    && aa.iter().zip(ab).all(|(x, y)| self.expr(x, y))
            }
            (
                Expr::Map {
                    source: sa,
                    projection: la,
                },
                Expr::Map {
                    source: sb,
                    projection: lb,
                },
            ) => self.expr(sa, sb) && self.lambda(la, lb),
            _ => false,
        }
    }

    fn block(&mut self, a: &[Stmt], b: &[Stmt]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| self.stmt(x, y))
    }

    fn stmt(&mut self, a: &Stmt, b: &Stmt) -> bool {
        match (a, b) {
            (
                Stmt::Assign {
                    target: ta,
                    value: va,
                },
                Stmt::Assign {
                    target: tb,
                    value: vb,
                },
            ) => self.expr(ta, tb) && self.expr(va, vb),
            (
                Stmt::If {
                    condition: ca,
                    then: ta,
                    otherwise: ea,
                },
                Stmt::If {
                    condition: cb,
                    then: tb,
                    otherwise: eb,
                },
            ) => self.expr(ca, cb) && self.block(ta, tb) && self.block(ea, eb),
            (
                Stmt::Resize {
                    array: aa,
                    length: la,
                    element: ea,
                },
                Stmt::Resize {
                    array: ab,
                    length: lb,
                    element: eb,
                },
            ) => self.expr(aa, ab) && self.expr(la, lb) && self.expr(ea, eb),
            (
                Stmt::Loop {
                    id: ia,
                    length: la,
                    body: ba,
                },
                Stmt::Loop {
                    id: ib,
                    length: lb,
                    body: bb,
                },
            ) => {
                if !self.expr(la, lb) {
                    return false;
                }
                let previous = self.loops.bind(*ia, *ib);
                let result = self.block(ba, bb);
                self.loops.unbind(*ia, *ib, previous);
                result
            }
            (Stmt::Check(x), Stmt::Check(y)) => self.check(x, y),
            (Stmt::Mark(x), Stmt::Mark(y)) => self.expr(x, y),
            _ => false,
        }
    }

    fn check(&mut self, a: &Check, b: &Check) -> bool {
        a.severity == b.severity
            && a.reported.len() == b.reported.len()
            && self.expr(&a.location, &b.location)
            && a
                .reported
                .iter()
                .zip(&b.reported)
                .all(|(x, y)| self.expr(x, y))
            && self.expr(&a.condition, &b.condition)
            && self.expr(&a.code, &b.code)
            && self.expr(&a.message, &b.message)
            && self.expr(&a.priority, &b.priority)
    }
}

fn same_function(a: &Function, b: &Function) -> bool {
    match (a, b) {
        (Function::Builtin(x), Function::Builtin(y)) => x == y,
        (Function::Extern(x), Function::Extern(y)) => x.name() == y.name(),
        (Function::Slot(x), Function::Slot(y)) => x == y,
        _ => false,
    }
}

struct Digest<'h, H: Hasher> {
    options: Equivalence,
    hasher: &'h mut H,
    params: HashMap<ParamId, u32>,
    loops: HashMap<LoopId, u32>,
}

impl<'h, H: Hasher> Digest<'h, H> {
    fn new(options: Equivalence, hasher: &'h mut H) -> Self {
        Self {
            options,
            hasher,
            params: HashMap::new(),
            loops: HashMap::new(),
        }
    }

    fn param(&mut self, id: ParamId) {
        let next = self.params.len() as u32;
        let n = *self.params.entry(id).or_insert(next);
        n.hash(self.hasher);
    }

    fn loop_id(&mut self, id: LoopId) {
        let next = self.loops.len() as u32;
        let n = *self.loops.entry(id).or_insert(next);
        n.hash(self.hasher);
    }

    fn tag(&mut self, tag: u8) {
        tag.hash(self.hasher);
    }

    fn lambda(&mut self, lambda: &Lambda) {
        lambda.param_type.hash(self.hasher);
        self.param(lambda.param);
        self.expr(&lambda.body);
    }

    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Root(ty) => {
                self.tag(1);
                ty.hash(self.hasher);
            }
            Expr::Param { id, ty } => {
                self.tag(2);
                ty.hash(self.hasher);
                self.param(*id);
            }
            Expr::Member { parent, field } => {
                self.tag(3);
                field.hash(self.hasher);
                self.expr(parent);
            }
            Expr::Index { parent, index } => {
                self.tag(4);
                index.hash(self.hasher);
                self.expr(parent);
            }
            Expr::Each(parent) => {
                self.tag(5);
                self.expr(parent);
            }
            Expr::Current(parent) => {
                self.tag(if self.options.distinguish_each_current {
                    6
                } else {
                    5
                });
                self.expr(parent);
            }
            Expr::Where { parent, predicate } => {
                self.tag(7);
                self.expr(parent);
                self.lambda(predicate);
            }
            Expr::Iter { parent, id } => {
                self.tag(8);
                self.loop_id(*id);
                self.expr(parent);
            }
            Expr::Literal(value) => {
                self.tag(9);
                hash_value(value, self.hasher);
            }
            Expr::Slot(index) => {
                self.tag(10);
                index.hash(self.hasher);
            }
            Expr::Unary { op, operand } => {
                self.tag(11);
                op.hash(self.hasher);
                self.expr(operand);
            }
            Expr::Binary { op, left, right } => {
                self.tag(12);
                op.hash(self.hasher);
                self.expr(left);
                self.expr(right);
            }
            Expr::Conditional {
                condition,
                then,
                otherwise,
            } => {
                self.tag(13);
                self.expr(condition);
                self.expr(then);
                self.expr(otherwise);
            }
            Expr::Call { function, args } => {
                self.tag(14);
                match function {
                    Function::Builtin(builtin) => builtin.hash(self.hasher),
                    Function::Extern(ext) => ext.name().hash(self.hasher),
                    Function::Slot(index) => index.hash(self.hasher),
                }
                args.len().hash(self.hasher);
                for arg in args {
                    self.expr(arg);
                }
            }
            Expr::Map { source, projection } => {
                self.tag(15);
                self.expr(source);
                self.lambda(projection);
            }
        }
    }

    fn block(&mut self, stmts: &[Stmt]) {
        stmts.len().hash(self.hasher);
        for stmt in stmts {
            self.stmt(stmt);
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Assign { target, value } => {
                self.tag(20);
                self.expr(target);
                self.expr(value);
            }
            Stmt::If {
                condition,
                then,
                otherwise,
            } => {
                self.tag(21);
                self.expr(condition);
                self.block(then);
                self.block(otherwise);
            }
            Stmt::Resize {
                array,
                length,
                element,
            } => {
                self.tag(22);
                self.expr(array);
                self.expr(length);
                self.expr(element);
            }
            Stmt::Loop { id, length, body } => {
                self.tag(23);
                self.expr(length);
                self.loop_id(*id);
                self.block(body);
            }
            Stmt::Check(check) => {
                self.tag(24);
                check.severity.hash(self.hasher);
                self.expr(&check.location);
                check.reported.len().hash(self.hasher);
                for reported in &check.reported {
                    self.expr(reported);
                }
                self.expr(&check.condition);
                self.expr(&check.code);
                self.expr(&check.message);
                self.expr(&check.priority);
            }
            Stmt::Mark(tag) => {
                self.tag(25);
                self.expr(tag);
            }
        }
    }
}

/// Hash a JSON value; equal values hash equally.
pub fn hash_value<H: Hasher>(value: &Value, state: &mut H) {
    match value {
        Value::Null => 0u8.hash(state),
        Value::Bool(b) => {
            1u8.hash(state);
            b.hash(state);
        }
        Value::Number(n) => {
            2u8.hash(state);
            n.to_string().hash(state);
        }
        Value::String(s) => {
            3u8.hash(state);
            s.hash(state);
        }
        Value::Array(items) => {
            4u8.hash(state);
            items.len().hash(state);
            for item in items {
                hash_value(item, state);
            }
        }
        Value::Object(map) => {
            5u8.hash(state);
            map.len().hash(state);
            for (key, item) in map {
                key.hash(state);
                hash_value(item, state);
            }
        }
    }
}

/// Map key that compares expressions by equivalence.
#[derive(Debug, Clone)]
pub struct EquivalenceKey {
    expr: Expr,
    options: Equivalence,
    hash: u64,
}

impl EquivalenceKey {
    /// Key under the default options.
    pub fn new(expr: Expr) -> Self {
        Self::with_options(expr, Equivalence::default())
    }

    /// Key under explicit options.
    pub fn with_options(expr: Expr, options: Equivalence) -> Self {
        let hash = options.hash_expr(&expr);
        Self {
            expr,
            options,
            hash,
        }
    }

    /// The wrapped expression.
    pub fn expr(&self) -> &Expr {
        &self.expr
    }
}

impl PartialEq for EquivalenceKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
            && self.options == other.options
            && self.options.exprs(&self.expr, &other.expr)
    }
}

impl Eq for EquivalenceKey {}

impl Hash for EquivalenceKey {
    fn hash<S: Hasher>(&self, state: &mut S) {
        self.hash.hash(state);
    }
}
