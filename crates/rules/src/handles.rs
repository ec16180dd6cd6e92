//! Callable handles over assembled procedures.

use std::fmt;
use std::sync::Arc;

use arbor_expression::{Callable, ExpressionResult, FirstFailure, Inputs, PathFormatter};
use arbor_schema::TypeId;
use arbor_validator::ValidationResultTree;
use serde_json::Value;

use crate::recording::RecordingContext;
use crate::rule::RuleId;

/// Applies the setters, aggregates, nullify and hide rules below one path to
/// an instance of that path's type, in place.
#[derive(Debug, Clone)]
pub struct TreeMutator {
    callable: Callable,
    rules: Arc<[RuleId]>,
}

impl TreeMutator {
    pub(crate) fn new(callable: Callable, rules: Vec<RuleId>) -> Self {
        Self {
            callable,
            rules: rules.into(),
        }
    }

    /// Type of the instance the mutator receives.
    pub fn root_type(&self) -> TypeId {
        self.callable.root()
    }

    /// Rules compiled into the mutator, ascending.
    pub fn rules(&self) -> &[RuleId] {
        &self.rules
    }

    /// The underlying callable.
    pub fn callable(&self) -> &Callable {
        &self.callable
    }

    /// Apply the rules to `value`.
    pub fn mutate(&self, value: &mut Value) -> ExpressionResult<()> {
        self.mutate_with(value, Inputs::new())
    }

    /// Apply the rules to `value`, reading other roots from `inputs`.
    pub fn mutate_with(&self, value: &mut Value, inputs: Inputs<'_>) -> ExpressionResult<()> {
        let mut frame = self
            .callable
            .frame(inputs)
            .with_target(self.root_type(), value);
        self.callable.run(&mut frame)
    }

    /// Like [`TreeMutator::mutate_with`], recording compiled and executed
    /// rules into `recording`.
    pub fn mutate_recorded(
        &self,
        value: &mut Value,
        inputs: Inputs<'_>,
        recording: &mut RecordingContext,
    ) -> ExpressionResult<()> {
        recording.add_compiled(&self.rules);
        let mut frame = self
            .callable
            .frame(inputs)
            .with_target(self.root_type(), value)
            .with_recorder(recording);
        self.callable.run(&mut frame)
    }
}

/// Evaluates the validators below one path into a [`ValidationResultTree`].
#[derive(Clone)]
pub struct TreeValidator {
    callable: Callable,
    rules: Arc<[RuleId]>,
    limit: usize,
    formatter: Arc<dyn PathFormatter>,
}

impl fmt::Debug for TreeValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeValidator")
            .field("callable", &self.callable)
            .field("rules", &self.rules)
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}

impl TreeValidator {
    pub(crate) fn new(
        callable: Callable,
        rules: Vec<RuleId>,
        limit: usize,
        formatter: Arc<dyn PathFormatter>,
    ) -> Self {
        Self {
            callable,
            rules: rules.into(),
            limit,
            formatter,
        }
    }

    /// Type of the instance the validator receives.
    pub fn root_type(&self) -> TypeId {
        self.callable.root()
    }

    pub(crate) fn callable(&self) -> &Callable {
        &self.callable
    }

    /// Validator rules compiled in, ascending.
    pub fn rules(&self) -> &[RuleId] {
        &self.rules
    }

    /// Results a run collects before the tree is exhausted.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Validate `value`.
    pub fn validate(&self, value: &Value) -> ExpressionResult<ValidationResultTree> {
        self.validate_with(value, Inputs::new())
    }

    /// Validate `value`, reading other roots from `inputs`.
    pub fn validate_with(
        &self,
        value: &Value,
        inputs: Inputs<'_>,
    ) -> ExpressionResult<ValidationResultTree> {
        let mut results = ValidationResultTree::new()
            .with_limit(self.limit)
            .with_formatter(self.formatter.clone());
        let mut frame = self
            .callable
            .frame(inputs.with(self.root_type(), value))
            .with_sink(&mut results);
        self.callable.run(&mut frame)?;
        drop(frame);
        Ok(results)
    }
}

/// Answers whether an instance passes every error-severity validator,
/// stopping at the first failure.
#[derive(Debug, Clone)]
pub struct StaticValidator {
    callable: Callable,
}

impl StaticValidator {
    pub(crate) fn new(callable: Callable) -> Self {
        Self { callable }
    }

    /// Type of the instance the validator receives.
    pub fn root_type(&self) -> TypeId {
        self.callable.root()
    }

    /// Whether `value` is valid.
    pub fn is_valid(&self, value: &Value) -> ExpressionResult<bool> {
        self.is_valid_with(value, Inputs::new())
    }

    /// Whether `value` is valid, reading other roots from `inputs`.
    pub fn is_valid_with(&self, value: &Value, inputs: Inputs<'_>) -> ExpressionResult<bool> {
        let mut sink = FirstFailure::default();
        let mut frame = self
            .callable
            .frame(inputs.with(self.root_type(), value))
            .with_sink(&mut sink);
        self.callable.run(&mut frame)?;
        drop(frame);
        Ok(!sink.failed())
    }
}

/// Fills destination instances from source instances through a
/// correspondence tree.
#[derive(Debug, Clone)]
pub struct Converter {
    mutator: TreeMutator,
    source: TypeId,
}

impl Converter {
    pub(crate) fn new(mutator: TreeMutator, source: TypeId) -> Self {
        Self { mutator, source }
    }

    /// Source type.
    pub fn source_type(&self) -> TypeId {
        self.source
    }

    /// Destination type.
    pub fn destination_type(&self) -> TypeId {
        self.mutator.root_type()
    }

    /// The correspondence tree's mutator.
    pub fn mutator(&self) -> &TreeMutator {
        &self.mutator
    }

    /// Write the values `source` determines into `destination`.
    pub fn convert(&self, source: &Value, destination: &mut Value) -> ExpressionResult<()> {
        self.mutator
            .mutate_with(destination, Inputs::new().with(self.source, source))
    }

    /// Build a fresh destination from `source`, starting from `initial`.
    pub fn convert_into(&self, source: &Value, initial: Value) -> ExpressionResult<Value> {
        let mut destination = initial;
        self.convert(source, &mut destination)?;
        Ok(destination)
    }
}
