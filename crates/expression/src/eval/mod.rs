//! Procedure interpreter.
//!
//! A [`Frame`] executes statements against one writable target instance and
//! any number of read-only inputs. Reads never fail on missing data: an
//! absent field or element reads as `null`. Writes auto-vivify: missing
//! objects are created, arrays grow to fit a constant index, and an unbound
//! `Each()` in a target broadcasts the write to every element.
//!
//! Writes run in two phases. The target chain is first resolved against the
//! current state into concrete locations (evaluating `Where` filters and
//! expanding `Each()` there), then the value is stored at each location.

mod ops;
mod sink;

use std::borrow::Cow;

use arbor_schema::TypeId;
use serde_json::{Map, Value};
use smallvec::SmallVec;

use crate::ast::{BinaryOp, Expr, Function, Lambda, LoopId, ParamId, Stmt};
use crate::canonical::Closure;
use crate::error::{ExpressionError, ExpressionResult};
use crate::format::{ConcretePath, Segment};
use crate::path::{Chain, Shard};
use crate::value::{as_length, is_truthy, to_text, value_type_name};

pub use sink::{CheckReport, CheckSink, FirstFailure, MarkRecorder};

/// Maximum recursion depth for expression evaluation
const MAX_RECURSION_DEPTH: usize = 256;

static NULL: Value = Value::Null;

/// Read-only root instances keyed by type.
///
/// Covariant in `'a`, so inputs borrowed for longer than a frame lives can
/// be handed to it.
#[derive(Debug, Clone, Default)]
pub struct Inputs<'a> {
    roots: Vec<(TypeId, &'a Value)>,
}

impl<'a> Inputs<'a> {
    /// No inputs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the instance for `ty`; a later entry for the same type wins.
    pub fn with(mut self, ty: TypeId, value: &'a Value) -> Self {
        self.roots.retain(|(t, _)| *t != ty);
        self.roots.push((ty, value));
        self
    }

    /// Instance for `ty`.
    pub fn get(&self, ty: TypeId) -> Option<&'a Value> {
        self.roots
            .iter()
            .find(|(t, _)| *t == ty)
            .map(|(_, value)| *value)
    }
}

/// Lambda bindings, linked through enclosing scopes.
#[derive(Debug, Clone, Copy)]
struct Scope<'s> {
    binding: Option<(ParamId, &'s Value)>,
    parent: Option<&'s Scope<'s>>,
    depth: usize,
}

impl<'s> Scope<'s> {
    const fn top() -> Self {
        Self {
            binding: None,
            parent: None,
            depth: 0,
        }
    }

    fn nested(&'s self) -> ExpressionResult<Self> {
        if self.depth >= MAX_RECURSION_DEPTH {
            return Err(ExpressionError::RecursionLimit {
                limit: MAX_RECURSION_DEPTH,
            });
        }
        Ok(Self {
            binding: None,
            parent: Some(self),
            depth: self.depth + 1,
        })
    }

    fn bind(&'s self, id: ParamId, value: &'s Value) -> Self {
        Self {
            binding: Some((id, value)),
            parent: Some(self),
            depth: self.depth + 1,
        }
    }

    fn lookup(&self, id: ParamId) -> Option<&'s Value> {
        match self.binding {
            Some((bound, value)) if bound == id => Some(value),
            _ => self.parent?.lookup(id),
        }
    }
}

/// Result of reading a chain: one value, or the flattened projection of an
/// unbound `Each()`.
enum Located<'v> {
    One(Cow<'v, Value>),
    Many(Vec<Cow<'v, Value>>),
}

impl<'v> Located<'v> {
    fn into_value(self) -> Value {
        match self {
            Self::One(value) => value.into_owned(),
            Self::Many(values) => Value::Array(values.into_iter().map(Cow::into_owned).collect()),
        }
    }

    fn map(self, mut f: impl FnMut(Cow<'v, Value>) -> Cow<'v, Value>) -> Self {
        match self {
            Self::One(value) => Self::One(f(value)),
            Self::Many(values) => Self::Many(values.into_iter().map(f).collect()),
        }
    }
}

fn child<'v>(value: Cow<'v, Value>, step: impl Fn(&Value) -> Option<&Value>) -> Cow<'v, Value> {
    match value {
        Cow::Borrowed(v) => Cow::Borrowed(step(v).unwrap_or(&NULL)),
        Cow::Owned(v) => Cow::Owned(step(&v).cloned().unwrap_or(Value::Null)),
    }
}

fn elements(value: Cow<'_, Value>) -> Vec<Cow<'_, Value>> {
    match value {
        Cow::Borrowed(Value::Array(items)) => items.iter().map(Cow::Borrowed).collect(),
        Cow::Owned(Value::Array(items)) => items.into_iter().map(Cow::Owned).collect(),
        _ => Vec::new(),
    }
}

/// One step of a resolved write location.
#[derive(Debug, Clone)]
enum Step {
    Key(String),
    Index(usize),
}

/// Execution state of one procedure run.
///
/// `'a` covers the instances and the closure the frame reads; `'s` covers
/// the check sink and mark recorder it reports to.
pub struct Frame<'a, 's> {
    target: Option<(TypeId, &'a mut Value)>,
    inputs: Inputs<'a>,
    closure: &'a Closure,
    loops: SmallVec<[(LoopId, usize); 4]>,
    sink: Option<&'s mut (dyn CheckSink + 's)>,
    recorder: Option<&'s mut (dyn MarkRecorder + 's)>,
}

impl<'a, 's> Frame<'a, 's> {
    /// Frame reading `inputs`, completing canonical slots from `closure`.
    pub fn new(closure: &'a Closure, inputs: Inputs<'a>) -> Self {
        Self {
            target: None,
            inputs,
            closure,
            loops: SmallVec::new(),
            sink: None,
            recorder: None,
        }
    }

    /// Make `value` the writable root of type `ty`.
    pub fn with_target(mut self, ty: TypeId, value: &'a mut Value) -> Self {
        self.target = Some((ty, value));
        self
    }

    /// Route failed checks to `sink`. Without a sink checks are skipped.
    pub fn with_sink(mut self, sink: &'s mut (dyn CheckSink + 's)) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Route coverage marks to `recorder`.
    pub fn with_recorder(mut self, recorder: &'s mut (dyn MarkRecorder + 's)) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Execute a statement list.
    pub fn run(&mut self, stmts: &[Stmt]) -> ExpressionResult<()> {
        for stmt in stmts {
            self.exec(stmt)?;
        }
        Ok(())
    }

    /// Evaluate an expression against the current state.
    pub fn eval(&self, expr: &Expr) -> ExpressionResult<Value> {
        self.value(expr, &Scope::top())
    }

    fn exec(&mut self, stmt: &Stmt) -> ExpressionResult<()> {
        match stmt {
            Stmt::Assign { target, value } => {
                let value = self.eval(value)?;
                let locations = self.resolve_target(target)?;
                let root = self.target_mut()?;
                for location in &locations {
                    *slot_mut(root, location) = value.clone();
                }
                Ok(())
            }
            Stmt::If {
                condition,
                then,
                otherwise,
            } => {
                if is_truthy(&self.eval(condition)?) {
                    self.run(then)
                } else {
                    self.run(otherwise)
                }
            }
            Stmt::Resize {
                array,
                length,
                element,
            } => {
                let length = self.length(length)?;
                let element = self.eval(element)?;
                let locations = self.resolve_target(array)?;
                let root = self.target_mut()?;
                for location in &locations {
                    let slot = slot_mut(root, location);
                    if !slot.is_array() {
                        *slot = Value::Array(Vec::with_capacity(length));
                    }
                    if let Value::Array(items) = slot {
                        items.resize(length, element.clone());
                    }
                }
                Ok(())
            }
            Stmt::Loop { id, length, body } => {
                let length = self.length(length)?;
                for index in 0..length {
                    self.loops.push((*id, index));
                    let result = self.run(body);
                    self.loops.pop();
                    result?;
                }
                Ok(())
            }
            Stmt::Check(check) => {
                let Some(sink) = self.sink.as_deref() else {
                    return Ok(());
                };
                if sink.is_exhausted() || !is_truthy(&self.eval(&check.condition)?) {
                    return Ok(());
                }
                let priority = self.eval(&check.priority)?;
                let report = CheckReport {
                    location: self.locate(&check.location),
                    reported: if check.reported.is_empty() {
                        vec![self.locate(&check.location)]
                    } else {
                        check.reported.iter().map(|r| self.locate(r)).collect()
                    },
                    code: to_text(&self.eval(&check.code)?),
                    message: to_text(&self.eval(&check.message)?),
                    severity: check.severity,
                    priority: priority.as_i64().unwrap_or_default(),
                };
                if let Some(sink) = self.sink.as_deref_mut() {
                    sink.report(report);
                }
                Ok(())
            }
            Stmt::Mark(tag) => {
                let tag = self.eval(tag)?;
                if let (Some(recorder), Some(id)) = (self.recorder.as_deref_mut(), tag.as_u64()) {
                    recorder.record(id);
                }
                Ok(())
            }
        }
    }

    fn length(&self, expr: &Expr) -> ExpressionResult<usize> {
        let value = self.eval(expr)?;
        as_length(&value)
            .ok_or_else(|| ExpressionError::type_error("length", value_type_name(&value)))
    }

    fn target_mut(&mut self) -> ExpressionResult<&mut Value> {
        self.target
            .as_mut()
            .map(|(_, value)| &mut **value)
            .ok_or_else(|| ExpressionError::invalid_target("procedure has no writable target"))
    }

    fn loop_index(&self, id: LoopId) -> Option<usize> {
        self.loops
            .iter()
            .rev()
            .find(|(bound, _)| *bound == id)
            .map(|(_, index)| *index)
    }

    fn root(&self, expr: &Expr) -> ExpressionResult<&Value> {
        let Expr::Root(ty) = expr else {
            return Err(ExpressionError::invalid_target(format!(
                "chain must start at a root, found {}",
                expr.kind_name()
            )));
        };
        if let Some((target, value)) = &self.target {
            if *target == ty.id() {
                return Ok(&**value);
            }
        }
        self.inputs
            .get(ty.id())
            .ok_or_else(|| ExpressionError::missing_input(ty.name()))
    }

    /// Symbolic location of a chain: loop-bound elements become indexes,
    /// unbound collections the whole-array marker.
    fn locate(&self, expr: &Expr) -> ConcretePath {
        let mut path = ConcretePath::root();
        let Some(chain) = Chain::decompose(expr) else {
            return path;
        };
        for shard in chain.shards {
            match shard {
                Shard::Member(field) => path.push(Segment::Field(field.name().to_owned())),
                Shard::Index(index) => path.push(Segment::Index(index)),
                Shard::Iter(id) => path.push(
                    self.loop_index(id)
                        .map_or(Segment::Whole, Segment::Index),
                ),
                Shard::Each | Shard::Current => path.push(Segment::Whole),
                Shard::Where(_) => {}
            }
        }
        path
    }

    /// Concrete write locations of a target chain against the current state.
    fn resolve_target(&self, target: &Expr) -> ExpressionResult<Vec<Vec<Step>>> {
        let chain = Chain::decompose(target).ok_or_else(|| {
            ExpressionError::invalid_target(format!("{} is not a path", target.kind_name()))
        })?;
        let writable = match (&self.target, &chain.head) {
            (Some((ty, _)), Expr::Root(root)) => root.id() == *ty,
            _ => false,
        };
        if !writable {
            return Err(ExpressionError::invalid_target(format!(
                "{target} is not rooted at the writable instance"
            )));
        }
        let mut cursors = vec![Cursor {
            steps: Vec::new(),
            value: self.root(&chain.head)?,
            allowed: None,
        }];
        for shard in &chain.shards {
            let mut next = Vec::with_capacity(cursors.len());
            for cursor in cursors {
                match shard {
                    Shard::Member(field) => {
                        next.push(cursor.step(Step::Key(field.name().to_owned())));
                    }
                    Shard::Index(index) => {
                        if cursor.admits(*index) {
                            next.push(cursor.step(Step::Index(*index)));
                        }
                    }
                    Shard::Iter(id) => {
                        let index = self.loop_index(*id).ok_or_else(|| {
                            ExpressionError::UnboundLoop {
                                id: format!("{id:?}"),
                            }
                        })?;
                        if cursor.admits(index) {
                            next.push(cursor.step(Step::Index(index)));
                        }
                    }
                    Shard::Each | Shard::Current => {
                        if let Value::Array(items) = cursor.value {
                            for index in 0..items.len() {
                                if cursor.admits(index) {
                                    next.push(cursor.step(Step::Index(index)));
                                }
                            }
                        }
                    }
                    Shard::Where(predicate) => {
                        let kept = self.filter_indexes(cursor.value, predicate)?;
                        let allowed = match cursor.allowed {
                            Some(previous) => {
                                kept.into_iter().filter(|i| previous.contains(i)).collect()
                            }
                            None => kept,
                        };
                        next.push(Cursor {
                            allowed: Some(allowed),
                            ..cursor
                        });
                    }
                }
            }
            cursors = next;
        }
        Ok(cursors.into_iter().map(|cursor| cursor.steps).collect())
    }

    fn filter_indexes(&self, array: &Value, predicate: &Lambda) -> ExpressionResult<Vec<usize>> {
        let scope = Scope::top();
        let mut kept = Vec::new();
        if let Value::Array(items) = array {
            for (index, item) in items.iter().enumerate() {
                let bound = scope.bind(predicate.param, item);
                if is_truthy(&self.value(&predicate.body, &bound)?) {
                    kept.push(index);
                }
            }
        }
        Ok(kept)
    }

    fn value(&self, expr: &Expr, scope: &Scope<'_>) -> ExpressionResult<Value> {
        let scope = scope.nested()?;
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Slot(index) => self
                .closure
                .value(*index)
                .cloned()
                .ok_or(ExpressionError::UnresolvedSlot { index: *index }),
            Expr::Unary { op, operand } => ops::unary(*op, &self.value(operand, &scope)?),
            Expr::Binary { op, left, right } => {
                let left = self.value(left, &scope)?;
                match op {
                    BinaryOp::And if !is_truthy(&left) => Ok(Value::Bool(false)),
                    BinaryOp::Or if is_truthy(&left) => Ok(Value::Bool(true)),
                    _ => ops::binary(*op, &left, &self.value(right, &scope)?),
                }
            }
            Expr::Conditional {
                condition,
                then,
                otherwise,
            } => {
                if is_truthy(&self.value(condition, &scope)?) {
                    self.value(then, &scope)
                } else {
                    self.value(otherwise, &scope)
                }
            }
            Expr::Call { function, args } => {
                let args = args
                    .iter()
                    .map(|arg| self.value(arg, &scope))
                    .collect::<ExpressionResult<Vec<_>>>()?;
                match function {
                    Function::Builtin(builtin) => ops::builtin(*builtin, &args),
                    Function::Extern(ext) => Ok(ext.call(&args)),
                    Function::Slot(index) => self
                        .closure
                        .function(*index)
                        .map(|ext| ext.call(&args))
                        .ok_or(ExpressionError::UnresolvedSlot { index: *index }),
                }
            }
            Expr::Map { source, projection } => {
                let source = self.read(source, &scope)?.into_value();
                let mut out = Vec::new();
                if let Value::Array(items) = &source {
                    out.reserve(items.len());
                    for item in items {
                        let bound = scope.bind(projection.param, item);
                        out.push(self.value(&projection.body, &bound)?);
                    }
                }
                Ok(Value::Array(out))
            }
            path => Ok(self.read(path, &scope)?.into_value()),
        }
    }

    fn read<'v>(&'v self, expr: &Expr, scope: &Scope<'v>) -> ExpressionResult<Located<'v>> {
        match expr {
            Expr::Root(_) => Ok(Located::One(Cow::Borrowed(self.root(expr)?))),
            Expr::Param { id, .. } => scope
                .lookup(*id)
                .map(|value| Located::One(Cow::Borrowed(value)))
                .ok_or_else(|| ExpressionError::UnboundParameter {
                    id: format!("{id:?}"),
                }),
            Expr::Member { parent, field } => {
                let name = field.name();
                Ok(self.read(parent, scope)?.map(|v| child(v, |v| v.get(name))))
            }
            Expr::Index { parent, index } => {
                Ok(self.read(parent, scope)?.map(|v| child(v, |v| v.get(*index))))
            }
            Expr::Iter { parent, id } => {
                let index = self
                    .loop_index(*id)
                    .ok_or_else(|| ExpressionError::UnboundLoop {
                        id: format!("{id:?}"),
                    })?;
                Ok(self.read(parent, scope)?.map(|v| child(v, |v| v.get(index))))
            }
            Expr::Each(parent) | Expr::Current(parent) => Ok(match self.read(parent, scope)? {
                Located::One(array) => Located::Many(elements(array)),
                Located::Many(arrays) => Located::Many(arrays.into_iter().flat_map(elements).collect()),
            }),
            Expr::Where { parent, predicate } => {
                let filter = |array: Cow<'v, Value>| -> ExpressionResult<Cow<'v, Value>> {
                    let mut kept = Vec::new();
                    for item in elements(array) {
                        let bound = scope.bind(predicate.param, &item);
                        if is_truthy(&self.value(&predicate.body, &bound)?) {
                            kept.push(item.into_owned());
                        }
                    }
                    Ok(Cow::Owned(Value::Array(kept)))
                };
                Ok(match self.read(parent, scope)? {
                    Located::One(array) => Located::One(filter(array)?),
                    Located::Many(arrays) => Located::Many(
                        arrays
                            .into_iter()
                            .map(filter)
                            .collect::<ExpressionResult<_>>()?,
                    ),
                })
            }
            other => Ok(Located::One(Cow::Owned(self.value(other, scope)?))),
        }
    }
}

/// Partially resolved write location.
struct Cursor<'v> {
    steps: Vec<Step>,
    value: &'v Value,
    /// Element indexes admitted by preceding `Where` filters.
    allowed: Option<Vec<usize>>,
}

impl<'v> Cursor<'v> {
    fn admits(&self, index: usize) -> bool {
        self.allowed.as_ref().is_none_or(|allowed| allowed.contains(&index))
    }

    fn step(&self, step: Step) -> Self {
        let value = match &step {
            Step::Key(key) => self.value.get(key.as_str()),
            Step::Index(index) => self.value.get(*index),
        };
        let mut steps = Vec::with_capacity(self.steps.len() + 1);
        steps.extend_from_slice(&self.steps);
        steps.push(step);
        Self {
            steps,
            value: value.unwrap_or(&NULL),
            allowed: None,
        }
    }
}

/// Navigate to a location, creating objects and growing arrays on the way.
fn slot_mut<'v>(root: &'v mut Value, steps: &[Step]) -> &'v mut Value {
    let mut slot = root;
    for step in steps {
        slot = match step {
            Step::Key(key) => {
                if !slot.is_object() {
                    *slot = Value::Object(Map::new());
                }
                match slot {
                    Value::Object(map) => map.entry(key.clone()).or_insert(Value::Null),
                    other => other,
                }
            }
            Step::Index(index) => {
                if !slot.is_array() {
                    *slot = Value::Array(Vec::new());
                }
                match slot {
                    Value::Array(items) => {
                        if items.len() <= *index {
                            items.resize(index + 1, Value::Null);
                        }
                        &mut items[*index]
                    }
                    other => other,
                }
            }
        };
    }
    slot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Builtin, Check, Severity};
    use crate::path::parse_path;
    use arbor_schema::{ScalarKind, Schema};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    struct Fixture {
        schema: Arc<Schema>,
        order: TypeId,
        line: TypeId,
    }

    impl Fixture {
        fn new() -> Self {
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
            b.field(order, "Note", string).unwrap();
            Self {
                schema: b.build(),
                order,
                line,
            }
        }

        fn path(&self, text: &str) -> Expr {
            parse_path(&self.schema, self.order, text).unwrap()
        }

        fn run(&self, stmts: &[Stmt], value: &mut Value) -> ExpressionResult<()> {
            let closure = Closure::default();
            let mut frame = Frame::new(&closure, Inputs::new()).with_target(self.order, value);
            frame.run(stmts)
        }
    }

    #[derive(Default)]
    struct Collect(Vec<CheckReport>, usize);

    impl CheckSink for Collect {
        fn is_exhausted(&self) -> bool {
            self.1 > 0 && self.0.len() >= self.1
        }

        fn report(&mut self, report: CheckReport) {
            self.0.push(report);
        }
    }

    #[test]
    fn test_read_projection_and_sum() {
        let f = Fixture::new();
        let mut value = json!({ "Lines": [{ "Qty": 2 }, { "Qty": 5 }] });
        let sum = Expr::call(Builtin::Sum, vec![f.path("Lines.Each().Qty")]);
        f.run(
            &[Stmt::Assign {
                target: f.path("Total"),
                value: sum,
            }],
            &mut value,
        )
        .unwrap();
        assert_eq!(value["Total"], json!(7));
    }

    #[test]
    fn test_missing_reads_are_null() {
        let f = Fixture::new();
        let closure = Closure::default();
        let value = json!({});
        let frame = Frame::new(&closure, Inputs::new().with(f.order, &value));
        assert_eq!(frame.eval(&f.path("Lines[3].Qty")).unwrap(), Value::Null);
        assert_eq!(
            frame
                .eval(&Expr::call(Builtin::Len, vec![f.path("Lines")]))
                .unwrap(),
            json!(0)
        );
    }

    #[test]
    fn test_write_auto_vivifies() {
        let f = Fixture::new();
        let mut value = json!({});
        f.run(
            &[Stmt::Assign {
                target: f.path("Lines[2].Qty"),
                value: Expr::literal(9),
            }],
            &mut value,
        )
        .unwrap();
        assert_eq!(value, json!({ "Lines": [null, null, { "Qty": 9 }] }));
    }

    #[test]
    fn test_each_in_target_broadcasts() {
        let f = Fixture::new();
        let mut value = json!({ "Lines": [{ "Qty": 1 }, { "Qty": 2 }] });
        f.run(
            &[Stmt::Assign {
                target: f.path("Lines.Each().Sku"),
                value: Expr::literal("x"),
            }],
            &mut value,
        )
        .unwrap();
        assert_eq!(
            value,
            json!({ "Lines": [{ "Qty": 1, "Sku": "x" }, { "Qty": 2, "Sku": "x" }] })
        );
    }

    #[test]
    fn test_where_in_target_filters() {
        let f = Fixture::new();
        let qty = f.schema.field(f.line, "Qty").unwrap();
        let target = f
            .path("Lines")
            .filter(f.line, |l| l.member(qty.clone()).greater_than(Expr::literal(1)))
            .each()
            .member(qty.clone());
        let mut value = json!({ "Lines": [{ "Qty": 1 }, { "Qty": 2 }, { "Qty": 3 }] });
        f.run(
            &[Stmt::Assign {
                target,
                value: Expr::literal(0),
            }],
            &mut value,
        )
        .unwrap();
        assert_eq!(
            value,
            json!({ "Lines": [{ "Qty": 1 }, { "Qty": 0 }, { "Qty": 0 }] })
        );
    }

    #[test]
    fn test_resize_and_loop() {
        let f = Fixture::new();
        let qty = f.schema.field(f.line, "Qty").unwrap();
        let id = LoopId::fresh();
        let lines = f.path("Lines");
        let stmts = vec![
            Stmt::Resize {
                array: lines.clone(),
                length: Expr::literal(3),
                element: Expr::literal(json!({ "Qty": 0 })),
            },
            Stmt::Loop {
                id,
                length: Expr::call(Builtin::Len, vec![lines.clone()]),
                body: vec![Stmt::Assign {
                    target: lines.clone().iter(id).member(qty.clone()),
                    value: lines.iter(id).member(qty) + Expr::literal(1),
                }],
            },
        ];
        let mut value = json!({ "Lines": [{ "Qty": 5 }] });
        f.run(&stmts, &mut value).unwrap();
        assert_eq!(
            value,
            json!({ "Lines": [{ "Qty": 6 }, { "Qty": 1 }, { "Qty": 1 }] })
        );
    }

    #[test]
    fn test_resize_truncates() {
        let f = Fixture::new();
        let mut value = json!({ "Lines": [{}, {}, {}] });
        f.run(
            &[Stmt::Resize {
                array: f.path("Lines"),
                length: Expr::literal(1),
                element: Expr::null(),
            }],
            &mut value,
        )
        .unwrap();
        assert_eq!(value, json!({ "Lines": [{}] }));
    }

    #[test]
    fn test_checks_report_locations() {
        let f = Fixture::new();
        let qty = f.schema.field(f.line, "Qty").unwrap();
        let id = LoopId::fresh();
        let lines = f.path("Lines");
        let location = lines.clone().iter(id).member(qty);
        let stmts = vec![Stmt::Loop {
            id,
            length: Expr::call(Builtin::Len, vec![lines]),
            body: vec![Stmt::Check(Check {
                location: location.clone(),
                reported: Vec::new(),
                condition: location.less_than(Expr::literal(0)),
                code: Expr::literal("NEGATIVE"),
                message: Expr::literal("must not be negative"),
                severity: Severity::Error,
                priority: Expr::literal(1),
            })],
        }];

        let value = json!({ "Lines": [{ "Qty": 1 }, { "Qty": -1 }, { "Qty": -2 }] });
        let closure = Closure::default();
        let mut sink = Collect::default();
        let mut frame =
            Frame::new(&closure, Inputs::new().with(f.order, &value)).with_sink(&mut sink);
        frame.run(&stmts).unwrap();
        drop(frame);

        let paths: Vec<String> = sink.0.iter().map(|r| r.location.to_string()).collect();
        assert_eq!(paths, vec!["Lines[1].Qty", "Lines[2].Qty"]);
        assert_eq!(sink.0[0].code, "NEGATIVE");
        assert_eq!(sink.0[0].priority, 1);
    }

    /// Caller-owned inputs and target, with a sink local to the call.
    fn failures(
        closure: &Closure,
        stmts: &[Stmt],
        target: (TypeId, &mut Value),
        inputs: Inputs<'_>,
    ) -> usize {
        let mut sink = Collect::default();
        let mut frame = Frame::new(closure, inputs)
            .with_target(target.0, target.1)
            .with_sink(&mut sink);
        frame.run(stmts).unwrap();
        drop(frame);
        sink.0.len()
    }

    #[test]
    fn test_local_sink_with_caller_inputs() {
        let f = Fixture::new();
        let check = Stmt::Check(Check {
            location: f.path("Total"),
            reported: Vec::new(),
            condition: f.path("Total").greater_than(Expr::literal(1)),
            code: Expr::literal("A"),
            message: Expr::literal("a"),
            severity: Severity::Error,
            priority: Expr::literal(0),
        });
        let closure = Closure::default();
        let other = json!({ "Total": 0 });
        let inputs = Inputs::new().with(f.line, &other);
        let mut target = json!({ "Total": 5 });
        assert_eq!(failures(&closure, &[check], (f.order, &mut target), inputs), 1);
    }

    #[test]
    fn test_exhausted_sink_skips_checks() {
        let f = Fixture::new();
        let check = Stmt::Check(Check {
            location: f.path("Total"),
            reported: Vec::new(),
            condition: Expr::literal(true),
            code: Expr::literal("A"),
            message: Expr::literal("a"),
            severity: Severity::Error,
            priority: Expr::literal(0),
        });
        let value = json!({});
        let closure = Closure::default();
        let mut sink = Collect(Vec::new(), 1);
        let mut frame =
            Frame::new(&closure, Inputs::new().with(f.order, &value)).with_sink(&mut sink);
        frame.run(&[check.clone(), check]).unwrap();
        drop(frame);
        assert_eq!(sink.0.len(), 1);
    }

    #[test]
    fn test_map_projection() {
        let f = Fixture::new();
        let qty = f.schema.field(f.line, "Qty").unwrap();
        let doubled = f
            .path("Lines")
            .map(f.line, |l| l.member(qty) * Expr::literal(2));
        let closure = Closure::default();
        let value = json!({ "Lines": [{ "Qty": 1 }, { "Qty": 4 }] });
        let frame = Frame::new(&closure, Inputs::new().with(f.order, &value));
        assert_eq!(frame.eval(&doubled).unwrap(), json!([2, 8]));
    }

    #[test]
    fn test_missing_input_and_bad_target() {
        let f = Fixture::new();
        let closure = Closure::default();
        let frame = Frame::new(&closure, Inputs::new());
        assert_eq!(
            frame.eval(&f.path("Total")).unwrap_err().code(),
            "EXPR:MISSING_INPUT"
        );

        let mut value = json!({});
        let err = f
            .run(
                &[Stmt::Assign {
                    target: Expr::literal(1),
                    value: Expr::literal(2),
                }],
                &mut value,
            )
            .unwrap_err();
        assert_eq!(err.code(), "EXPR:INVALID_TARGET");
    }

    #[test]
    fn test_marks_are_recorded() {
        #[derive(Default)]
        struct Marks(Vec<u64>);
        impl MarkRecorder for Marks {
            fn record(&mut self, rule: u64) {
                self.0.push(rule);
            }
        }

        let f = Fixture::new();
        let closure = Closure::default();
        let mut value = json!({});
        let mut marks = Marks::default();
        let mut frame = Frame::new(&closure, Inputs::new())
            .with_target(f.order, &mut value)
            .with_recorder(&mut marks);
        frame
            .run(&[Stmt::Mark(Expr::literal(4)), Stmt::Mark(Expr::literal(9))])
            .unwrap();
        drop(frame);
        assert_eq!(marks.0, vec![4, 9]);
    }
}
