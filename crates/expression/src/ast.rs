//! Abstract syntax tree for paths, expressions and assembled procedures.
//!
//! Path nodes (`Root`, `Member`, `Index`, `Each`, `Current`, `Where`, plus the
//! assembler-only `Iter` and lambda `Param`) form accessor chains. The rest of
//! [`Expr`] covers the value language rules are written in. [`Stmt`] and
//! [`Procedure`] are what the rule assembler emits and the compilation backend
//! consumes.

use std::fmt;
use std::ops;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use arbor_schema::{FieldRef, TypeId, TypeRef};
use serde::{Deserialize, Serialize};
use serde_json::Value;

static NEXT_PARAM: AtomicU32 = AtomicU32::new(1);
static NEXT_LOOP: AtomicU32 = AtomicU32::new(1);

/// Identity of a lambda parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamId(u32);

impl ParamId {
    /// Allocate a process-unique parameter id.
    pub fn fresh() -> Self {
        Self(NEXT_PARAM.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn canonical(index: u32) -> Self {
        Self(index)
    }
}

/// Identity of an assembled loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoopId(u32);

impl LoopId {
    /// Allocate a process-unique loop id.
    pub fn fresh() -> Self {
        Self(NEXT_LOOP.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn canonical(index: u32) -> Self {
        Self(index)
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// Logical negation
    Not,
    /// Arithmetic negation
    Negate,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Subtract,
    /// `*`
    Multiply,
    /// `/`
    Divide,
    /// `%`
    Modulo,
    /// `==`
    Equal,
    /// `!=`
    NotEqual,
    /// `<`
    LessThan,
    /// `>`
    GreaterThan,
    /// `<=`
    LessEqual,
    /// `>=`
    GreaterEqual,
    /// `&&` (short-circuit)
    And,
    /// `||` (short-circuit)
    Or,
}

impl BinaryOp {
    /// Operator symbol used by the textual form.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Modulo => "%",
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::LessThan => "<",
            Self::GreaterThan => ">",
            Self::LessEqual => "<=",
            Self::GreaterEqual => ">=",
            Self::And => "&&",
            Self::Or => "||",
        }
    }
}

/// Built-in functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    /// Length of an array or string; `0` for `null`.
    Len,
    /// Sum of the numbers in an array.
    Sum,
    /// Number of non-null elements.
    Count,
    /// Whether any element is truthy.
    Any,
    /// Whether every element is truthy.
    All,
    /// Whether the value is `null`.
    IsNull,
    /// Whether the value is `null`, an empty string or an empty array.
    IsEmpty,
    /// First non-null argument.
    Coalesce,
    /// String concatenation of all arguments.
    Concat,
}

impl Builtin {
    /// Function name used by the textual form.
    pub fn name(self) -> &'static str {
        match self {
            Self::Len => "len",
            Self::Sum => "sum",
            Self::Count => "count",
            Self::Any => "any",
            Self::All => "all",
            Self::IsNull => "is_null",
            Self::IsEmpty => "is_empty",
            Self::Coalesce => "coalesce",
            Self::Concat => "concat",
        }
    }
}

type ExternBody = dyn Fn(&[Value]) -> Value + Send + Sync;

/// A host function callable from rule expressions.
///
/// Identity is the registered name: two handles with the same name are the
/// same function as far as equivalence and caching are concerned.
#[derive(Clone)]
pub struct ExternFn {
    name: Arc<str>,
    body: Arc<ExternBody>,
}

impl ExternFn {
    /// Wrap a host function under a stable name.
    pub fn new(
        name: impl Into<Arc<str>>,
        body: impl Fn(&[Value]) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            body: Arc::new(body),
        }
    }

    /// Registered name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke the function.
    pub fn call(&self, args: &[Value]) -> Value {
        (self.body)(args)
    }
}

impl fmt::Debug for ExternFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "extern {}", self.name)
    }
}

/// Callee of a [`Expr::Call`].
#[derive(Debug, Clone)]
pub enum Function {
    /// Built-in function.
    Builtin(Builtin),
    /// Host function.
    Extern(ExternFn),
    /// Host function taken from a closure slot (canonical form only).
    Slot(usize),
}

/// Single-parameter lambda used by `Where` filters and `Map` projections.
#[derive(Debug, Clone)]
pub struct Lambda {
    /// Parameter identity.
    pub param: ParamId,
    /// Parameter type.
    pub param_type: TypeId,
    /// Body; refers to the parameter through [`Expr::Param`].
    pub body: Box<Expr>,
}

impl Lambda {
    /// Build a lambda with a fresh parameter.
    pub fn new(param_type: TypeId, body: impl FnOnce(Expr) -> Expr) -> Self {
        let param = ParamId::fresh();
        let body = body(Expr::Param {
            id: param,
            ty: param_type,
        });
        Self {
            param,
            param_type,
            body: Box::new(body),
        }
    }

    /// The parameter as an expression.
    pub fn param_expr(&self) -> Expr {
        Expr::Param {
            id: self.param,
            ty: self.param_type,
        }
    }
}

/// Expression node.
#[derive(Debug, Clone)]
pub enum Expr {
    /// The root instance of a type.
    Root(TypeRef),
    /// A lambda parameter.
    Param {
        /// Parameter identity.
        id: ParamId,
        /// Parameter type.
        ty: TypeId,
    },
    /// Field access.
    Member {
        /// Accessed object.
        parent: Box<Expr>,
        /// Accessed field.
        field: FieldRef,
    },
    /// Array element at a constant index.
    Index {
        /// Accessed array.
        parent: Box<Expr>,
        /// Element index.
        index: usize,
    },
    /// Every element of an array.
    Each(Box<Expr>),
    /// The element currently being processed.
    Current(Box<Expr>),
    /// Array filtered by a predicate.
    Where {
        /// Filtered array.
        parent: Box<Expr>,
        /// Predicate over one element.
        predicate: Lambda,
    },
    /// Array element at the current index of an enclosing loop.
    Iter {
        /// Iterated array.
        parent: Box<Expr>,
        /// Enclosing loop.
        id: LoopId,
    },
    /// Constant value.
    Literal(Value),
    /// Closure value (canonical form only).
    Slot(usize),
    /// Unary operation.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        operand: Box<Expr>,
    },
    /// Binary operation.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// `if condition then then else otherwise`
    Conditional {
        /// Condition.
        condition: Box<Expr>,
        /// Value when the condition is truthy.
        then: Box<Expr>,
        /// Value otherwise.
        otherwise: Box<Expr>,
    },
    /// Function call.
    Call {
        /// Callee.
        function: Function,
        /// Arguments.
        args: Vec<Expr>,
    },
    /// Projection of every element of an array.
    Map {
        /// Projected array.
        source: Box<Expr>,
        /// Projection of one element.
        projection: Lambda,
    },
}

impl Expr {
    /// Root reference.
    pub fn root(ty: TypeRef) -> Self {
        Self::Root(ty)
    }

    /// Constant.
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    /// `null` constant.
    pub fn null() -> Self {
        Self::Literal(Value::Null)
    }

    /// Field access on `self`.
    pub fn member(self, field: FieldRef) -> Self {
        Self::Member {
            parent: Box::new(self),
            field,
        }
    }

    /// Constant index on `self`.
    pub fn index(self, index: usize) -> Self {
        Self::Index {
            parent: Box::new(self),
            index,
        }
    }

    /// `self.Each()`
    pub fn each(self) -> Self {
        Self::Each(Box::new(self))
    }

    /// `self.Current()`
    pub fn current(self) -> Self {
        Self::Current(Box::new(self))
    }

    /// Element of `self` at the current index of `id`.
    pub fn iter(self, id: LoopId) -> Self {
        Self::Iter {
            parent: Box::new(self),
            id,
        }
    }

    /// `self.Where(predicate)` over elements of `element_type`.
    pub fn filter(self, element_type: TypeId, predicate: impl FnOnce(Expr) -> Expr) -> Self {
        Self::Where {
            parent: Box::new(self),
            predicate: Lambda::new(element_type, predicate),
        }
    }

    /// Projection of every element of `self`.
    pub fn map(self, element_type: TypeId, projection: impl FnOnce(Expr) -> Expr) -> Self {
        Self::Map {
            source: Box::new(self),
            projection: Lambda::new(element_type, projection),
        }
    }

    /// Builtin call.
    pub fn call(function: Builtin, args: Vec<Expr>) -> Self {
        Self::Call {
            function: Function::Builtin(function),
            args,
        }
    }

    /// Host function call.
    pub fn call_extern(function: ExternFn, args: Vec<Expr>) -> Self {
        Self::Call {
            function: Function::Extern(function),
            args,
        }
    }

    /// Conditional expression.
    pub fn condition(condition: Expr, then: Expr, otherwise: Expr) -> Self {
        Self::Conditional {
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }
    }

    /// Binary operation.
    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Self::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// `self == other`
    pub fn equals(self, other: Expr) -> Self {
        Self::binary(BinaryOp::Equal, self, other)
    }

    /// `self != other`
    pub fn not_equals(self, other: Expr) -> Self {
        Self::binary(BinaryOp::NotEqual, self, other)
    }

    /// `self < other`
    pub fn less_than(self, other: Expr) -> Self {
        Self::binary(BinaryOp::LessThan, self, other)
    }

    /// `self > other`
    pub fn greater_than(self, other: Expr) -> Self {
        Self::binary(BinaryOp::GreaterThan, self, other)
    }

    /// `self <= other`
    pub fn less_equal(self, other: Expr) -> Self {
        Self::binary(BinaryOp::LessEqual, self, other)
    }

    /// `self >= other`
    pub fn greater_equal(self, other: Expr) -> Self {
        Self::binary(BinaryOp::GreaterEqual, self, other)
    }

    /// `self && other`
    pub fn and(self, other: Expr) -> Self {
        Self::binary(BinaryOp::And, self, other)
    }

    /// `self || other`
    pub fn or(self, other: Expr) -> Self {
        Self::binary(BinaryOp::Or, self, other)
    }

    /// Left-folded `||` of all conditions; `None` when empty.
    pub fn any_of(conditions: impl IntoIterator<Item = Expr>) -> Option<Self> {
        conditions.into_iter().reduce(Expr::or)
    }

    /// Left-folded `&&` of all conditions; `None` when empty.
    pub fn all_of(conditions: impl IntoIterator<Item = Expr>) -> Option<Self> {
        conditions.into_iter().reduce(Expr::and)
    }

    /// Whether this node is one of the accessor-chain node kinds.
    pub fn is_path_node(&self) -> bool {
        matches!(
            self,
            Self::Root(_)
                | Self::Param { .. }
                | Self::Member { .. }
                | Self::Index { .. }
                | Self::Each(_)
                | Self::Current(_)
                | Self::Where { .. }
                | Self::Iter { .. }
        )
    }

    /// Parent of a non-root path node.
    pub fn path_parent(&self) -> Option<&Expr> {
        match self {
            Self::Member { parent, .. }
            | Self::Index { parent, .. }
            | Self::Each(parent)
            | Self::Current(parent)
            | Self::Where { parent, .. }
            | Self::Iter { parent, .. } => Some(parent),
            _ => None,
        }
    }

    /// Whether this is a well-formed accessor chain ending in `Root` or `Param`.
    pub fn is_chain(&self) -> bool {
        let mut node = self;
        loop {
            match node {
                Self::Root(_) | Self::Param { .. } => return true,
                _ => match node.path_parent() {
                    Some(parent) => node = parent,
                    None => return false,
                },
            }
        }
    }

    /// First node of a chain (`Root` or `Param`).
    pub fn chain_root(&self) -> Option<&Expr> {
        let mut node = self;
        loop {
            match node {
                Self::Root(_) | Self::Param { .. } => return Some(node),
                _ => node = node.path_parent()?,
            }
        }
    }

    /// Root type of a chain rooted at [`Expr::Root`].
    pub fn root_type(&self) -> Option<TypeId> {
        match self.chain_root()? {
            Self::Root(ty) => Some(ty.id()),
            _ => None,
        }
    }

    /// Short kind name, used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Root(_) => "root",
            Self::Param { .. } => "parameter",
            Self::Member { .. } => "member",
            Self::Index { .. } => "index",
            Self::Each(_) => "each",
            Self::Current(_) => "current",
            Self::Where { .. } => "where",
            Self::Iter { .. } => "iter",
            Self::Literal(_) => "literal",
            Self::Slot(_) => "slot",
            Self::Unary { .. } => "unary",
            Self::Binary { .. } => "binary",
            Self::Conditional { .. } => "conditional",
            Self::Call { .. } => "call",
            Self::Map { .. } => "map",
        }
    }
}

impl ops::Add for Expr {
    type Output = Expr;

    fn add(self, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Add, self, rhs)
    }
}

impl ops::Sub for Expr {
    type Output = Expr;

    fn sub(self, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Subtract, self, rhs)
    }
}

impl ops::Mul for Expr {
    type Output = Expr;

    fn mul(self, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Multiply, self, rhs)
    }
}

impl ops::Div for Expr {
    type Output = Expr;

    fn div(self, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Divide, self, rhs)
    }
}

impl ops::Rem for Expr {
    type Output = Expr;

    fn rem(self, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Modulo, self, rhs)
    }
}

impl ops::Not for Expr {
    type Output = Expr;

    fn not(self) -> Expr {
        Expr::Unary {
            op: UnaryOp::Not,
            operand: Box::new(self),
        }
    }
}

impl ops::Neg for Expr {
    type Output = Expr;

    fn neg(self) -> Expr {
        Expr::Unary {
            op: UnaryOp::Negate,
            operand: Box::new(self),
        }
    }
}

/// Severity of a validation outcome.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub enum Severity {
    /// Must be fixed.
    #[default]
    Error,
    /// Should be addressed but does not make the instance invalid.
    Warning,
    /// Informational.
    Info,
}

/// Validator evaluation emitted by the assembler.
#[derive(Debug, Clone)]
pub struct Check {
    /// Where the outcome is stored in the result tree.
    pub location: Expr,
    /// Paths reported to the user; empty means `location`.
    pub reported: Vec<Expr>,
    /// The check fails when this is truthy.
    pub condition: Expr,
    /// Error code.
    pub code: Expr,
    /// Message text.
    pub message: Expr,
    /// Severity.
    pub severity: Severity,
    /// Declaration priority; lower sorts first.
    pub priority: Expr,
}

/// Statement of an assembled procedure.
#[derive(Debug, Clone)]
pub enum Stmt {
    /// Write `value` at the place denoted by `target`.
    Assign {
        /// Place (an accessor chain).
        target: Expr,
        /// Value.
        value: Expr,
    },
    /// Conditional block.
    If {
        /// Condition.
        condition: Expr,
        /// Statements when truthy.
        then: Vec<Stmt>,
        /// Statements otherwise.
        otherwise: Vec<Stmt>,
    },
    /// Grow (with `element`) or truncate the array at `array` to `length`.
    Resize {
        /// Array place.
        array: Expr,
        /// Target length.
        length: Expr,
        /// Value of newly allocated elements.
        element: Expr,
    },
    /// Run `body` for every index in `0..length`.
    Loop {
        /// Loop identity referenced by [`Expr::Iter`].
        id: LoopId,
        /// Iteration count.
        length: Expr,
        /// Body.
        body: Vec<Stmt>,
    },
    /// Evaluate a validator.
    Check(Check),
    /// Coverage tag; the expression evaluates to a rule id.
    Mark(Expr),
}

/// A complete assembled body, rooted at one target type.
#[derive(Debug, Clone)]
pub struct Procedure {
    /// Type of the instance the procedure receives.
    pub root: TypeRef,
    /// Statements.
    pub body: Vec<Stmt>,
}

impl Procedure {
    /// Create a procedure.
    pub fn new(root: TypeRef, body: Vec<Stmt>) -> Self {
        Self { root, body }
    }

    /// Total number of statements, nested ones included.
    pub fn statement_count(&self) -> usize {
        fn count(stmts: &[Stmt]) -> usize {
            stmts
                .iter()
                .map(|stmt| {
                    1 + match stmt {
                        Stmt::If {
                            then, otherwise, ..
                        } => count(then) + count(otherwise),
                        Stmt::Loop { body, .. } => count(body),
                        _ => 0,
                    }
                })
                .sum()
        }
        count(&self.body)
    }
}

// ============================================================================
// Textual form
// ============================================================================

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root(ty) => write!(f, "{ty}"),
            Self::Param { id, .. } => write!(f, "p{}", id.0),
            Self::Member { parent, field } => write!(f, "{parent}.{field}"),
            Self::Index { parent, index } => write!(f, "{parent}[{index}]"),
            Self::Each(parent) => write!(f, "{parent}.Each()"),
            Self::Current(parent) => write!(f, "{parent}.Current()"),
            Self::Where { parent, predicate } => write!(
                f,
                "{parent}.Where(p{} => {})",
                predicate.param.0, predicate.body
            ),
            Self::Iter { parent, id } => write!(f, "{parent}[#{}]", id.0),
            Self::Literal(value) => write!(f, "{value}"),
            Self::Slot(index) => write!(f, "${index}"),
            Self::Unary { op, operand } => match op {
                UnaryOp::Not => write!(f, "!({operand})"),
                UnaryOp::Negate => write!(f, "-({operand})"),
            },
            Self::Binary { op, left, right } => write!(f, "({left} {} {right})", op.symbol()),
            Self::Conditional {
                condition,
                then,
                otherwise,
            } => write!(f, "(if {condition} then {then} else {otherwise})"),
            Self::Call { function, args } => {
                match function {
                    Function::Builtin(builtin) => write!(f, "{}(", builtin.name())?,
                    Function::Extern(ext) => write!(f, "{}(", ext.name())?,
                    Function::Slot(index) => write!(f, "${index}(")?,
                }
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            Self::Map { source, projection } => write!(
                f,
                "{source}.Select(p{} => {})",
                projection.param.0, projection.body
            ),
        }
    }
}
