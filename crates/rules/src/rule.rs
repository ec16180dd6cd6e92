//! Rule taxonomy.
//!
//! A [`Rule`] is what an application declares at a path. Once attached to a
//! tree it becomes an [`AttachedRule`]: the rule plus its declaration id, the
//! tree's root type and the path it was attached through. The path may carry
//! `Where` filters; they act as an extra condition on the rule.

use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use arbor_expression::{Builtin, Check, Chain, Expr, Severity, Shard, Stmt};
use arbor_schema::TypeId;
use serde::Serialize;

use crate::alias::Aliases;

static NEXT_RULE: AtomicU64 = AtomicU64::new(1);

/// Declaration id of an attached rule; later declarations have larger ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RuleId(u64);

impl RuleId {
    pub(crate) fn next() -> Self {
        Self(NEXT_RULE.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw integer value.
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a validator checks.
#[derive(Debug, Clone)]
pub enum ValidatorKind {
    /// Fails when the condition holds.
    InvalidIf(Expr),
    /// Fails when the value is `null`, an empty string or an empty array,
    /// and the condition (if any) holds.
    RequiredIf(Option<Expr>),
}

/// A validator declaration.
///
/// ```
/// use arbor_expression::{Expr, Severity};
/// use arbor_rules::ValidatorRule;
///
/// let rule = ValidatorRule::invalid_if(Expr::literal(true), "always", "Always fails")
///     .with_severity(Severity::Warning)
///     .with_priority(5);
/// assert_eq!(rule.priority, Some(5));
/// ```
#[derive(Debug, Clone)]
pub struct ValidatorRule {
    /// Check performed.
    pub kind: ValidatorKind,
    /// Result code.
    pub code: Cow<'static, str>,
    /// Result message.
    pub message: Cow<'static, str>,
    /// Result severity.
    pub severity: Severity,
    /// Explicit priority; defaults to the declaration order.
    pub priority: Option<i64>,
    /// Paths results are reported against; empty means the validated path.
    pub reported: Vec<Expr>,
}

impl ValidatorRule {
    fn new(
        kind: ValidatorKind,
        code: impl Into<Cow<'static, str>>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            severity: Severity::Error,
            priority: None,
            reported: Vec::new(),
        }
    }

    /// Fails when `condition` holds.
    pub fn invalid_if(
        condition: Expr,
        code: impl Into<Cow<'static, str>>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::new(ValidatorKind::InvalidIf(condition), code, message)
    }

    /// Fails when the value is empty.
    pub fn required(
        code: impl Into<Cow<'static, str>>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::new(ValidatorKind::RequiredIf(None), code, message)
    }

    /// Fails when the value is empty while `condition` holds.
    pub fn required_if(
        condition: Expr,
        code: impl Into<Cow<'static, str>>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::new(ValidatorKind::RequiredIf(Some(condition)), code, message)
    }

    /// Sets the severity.
    #[must_use = "builder methods must be chained or built"]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Sets an explicit priority.
    #[must_use = "builder methods must be chained or built"]
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Adds a reported path.
    #[must_use = "builder methods must be chained or built"]
    pub fn with_reported(mut self, path: Expr) -> Self {
        self.reported.push(path);
        self
    }

    /// Condition under which the check fails, for the value at `place`.
    pub fn failure(&self, place: &Expr) -> Expr {
        match &self.kind {
            ValidatorKind::InvalidIf(condition) => condition.clone(),
            ValidatorKind::RequiredIf(condition) => {
                let empty = Expr::call(Builtin::IsEmpty, vec![place.clone()]);
                match condition {
                    Some(condition) => condition.clone().and(empty),
                    None => empty,
                }
            }
        }
    }

    /// Conjoin `guard` to the failure condition.
    pub(crate) fn guarded(mut self, guard: Option<Expr>) -> Self {
        let Some(guard) = guard else {
            return self;
        };
        self.kind = match self.kind {
            ValidatorKind::InvalidIf(condition) => ValidatorKind::InvalidIf(guard.and(condition)),
            ValidatorKind::RequiredIf(None) => ValidatorKind::RequiredIf(Some(guard)),
            ValidatorKind::RequiredIf(Some(condition)) => {
                ValidatorKind::RequiredIf(Some(guard.and(condition)))
            }
        };
        self
    }
}

/// A rule declared at a path.
#[derive(Debug, Clone)]
pub enum Rule {
    /// Unconditionally set the value.
    ///
    /// Setters at one node combine in declaration order: the latest setter
    /// whose condition holds wins, and this one always holds, so it
    /// overrides every setter declared before it.
    Set {
        /// New value.
        value: Expr,
    },
    /// Set the value when a condition holds.
    SetIf {
        /// Condition.
        condition: Expr,
        /// New value.
        value: Expr,
    },
    /// Hide the value when a condition holds.
    HideIf {
        /// Condition.
        condition: Expr,
    },
    /// Disable the value when a condition holds.
    DisableIf {
        /// Condition.
        condition: Expr,
    },
    /// Reset the value to `null` when a condition holds.
    NullifyIf {
        /// Condition.
        condition: Expr,
    },
    /// Validate the value.
    Validator(ValidatorRule),
    /// Contribute a condition to a named boolean aggregate.
    Aggregate {
        /// Aggregate name; same-named contributions are OR-ed.
        name: String,
        /// Contributed condition.
        condition: Expr,
    },
    /// Declare which array backs the array at this path.
    SourceArray {
        /// Source array.
        array: Expr,
    },
}

impl Rule {
    /// `Set`
    pub fn set(value: Expr) -> Self {
        Self::Set { value }
    }

    /// `SetIf`
    pub fn set_if(condition: Expr, value: Expr) -> Self {
        Self::SetIf { condition, value }
    }

    /// `HideIf`
    pub fn hide_if(condition: Expr) -> Self {
        Self::HideIf { condition }
    }

    /// `DisableIf`
    pub fn disable_if(condition: Expr) -> Self {
        Self::DisableIf { condition }
    }

    /// `NullifyIf`
    pub fn nullify_if(condition: Expr) -> Self {
        Self::NullifyIf { condition }
    }

    /// `Aggregate`
    pub fn aggregate(name: impl Into<String>, condition: Expr) -> Self {
        Self::Aggregate {
            name: name.into(),
            condition,
        }
    }

    /// `SourceArray`
    pub fn source_array(array: Expr) -> Self {
        Self::SourceArray { array }
    }

    /// Short kind name, used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Set { .. } => "set",
            Self::SetIf { .. } => "set-if",
            Self::HideIf { .. } => "hide-if",
            Self::DisableIf { .. } => "disable-if",
            Self::NullifyIf { .. } => "nullify-if",
            Self::Validator(_) => "validator",
            Self::Aggregate { .. } => "aggregate",
            Self::SourceArray { .. } => "source-array",
        }
    }

    /// Whether the rule writes the value at its path.
    pub fn is_setter(&self) -> bool {
        matches!(self, Self::Set { .. } | Self::SetIf { .. })
    }

    /// Expressions the rule evaluates. Reported paths are labels, not reads,
    /// and are not included.
    pub fn expressions(&self) -> Vec<&Expr> {
        match self {
            Self::Set { value } => vec![value],
            Self::SetIf { condition, value } => vec![condition, value],
            Self::HideIf { condition }
            | Self::DisableIf { condition }
            | Self::NullifyIf { condition }
            | Self::Aggregate { condition, .. } => vec![condition],
            Self::Validator(validator) => match &validator.kind {
                ValidatorKind::InvalidIf(condition) => vec![condition],
                ValidatorKind::RequiredIf(condition) => condition.iter().collect(),
            },
            Self::SourceArray { array } => vec![array],
        }
    }

    /// Paths the rule reads.
    pub fn dependencies(&self) -> Vec<&Expr> {
        self.expressions()
            .into_iter()
            .flat_map(Expr::chains)
            .collect()
    }

    /// Rebuild with every expression, reported paths included, passed
    /// through `f`.
    pub fn try_map_exprs<E>(
        self,
        f: &mut impl FnMut(Expr) -> Result<Expr, E>,
    ) -> Result<Self, E> {
        Ok(match self {
            Self::Set { value } => Self::Set { value: f(value)? },
            Self::SetIf { condition, value } => Self::SetIf {
                condition: f(condition)?,
                value: f(value)?,
            },
            Self::HideIf { condition } => Self::HideIf {
                condition: f(condition)?,
            },
            Self::DisableIf { condition } => Self::DisableIf {
                condition: f(condition)?,
            },
            Self::NullifyIf { condition } => Self::NullifyIf {
                condition: f(condition)?,
            },
            Self::Validator(mut validator) => {
                validator.kind = match validator.kind {
                    ValidatorKind::InvalidIf(condition) => ValidatorKind::InvalidIf(f(condition)?),
                    ValidatorKind::RequiredIf(Some(condition)) => {
                        ValidatorKind::RequiredIf(Some(f(condition)?))
                    }
                    ValidatorKind::RequiredIf(None) => ValidatorKind::RequiredIf(None),
                };
                validator.reported = validator
                    .reported
                    .into_iter()
                    .map(&mut *f)
                    .collect::<Result<_, _>>()?;
                Self::Validator(validator)
            }
            Self::Aggregate { name, condition } => Self::Aggregate {
                name,
                condition: f(condition)?,
            },
            Self::SourceArray { array } => Self::SourceArray { array: f(array)? },
        })
    }
}

/// A rule attached to a tree.
#[derive(Debug, Clone)]
pub struct AttachedRule {
    /// Declaration id.
    pub id: RuleId,
    /// Root type of the owning tree.
    pub root: TypeId,
    /// Path the rule was attached through, filters included.
    pub path: Expr,
    /// The rule.
    pub rule: Rule,
}

impl AttachedRule {
    /// Conjunction of the attachment path's `Where` filters, each applied to
    /// the current element of its array.
    ///
    /// Enclosing `Each()` steps become `Current()`, so a filter on a nested
    /// array reads the elements of the enclosing loops.
    pub fn guard(&self) -> Option<Expr> {
        let chain = Chain::decompose(&self.path)?;
        let mut array = chain.head.clone();
        let mut conditions = Vec::new();
        for shard in chain.shards {
            match shard {
                Shard::Where(predicate) => {
                    let element = array.clone().current();
                    conditions.push(predicate.body.replace_param(predicate.param, &element));
                }
                Shard::Each => array = array.current(),
                other => array = other.apply(array),
            }
        }
        Expr::all_of(conditions)
    }

    /// Statements that apply this rule to the value at `place`, with
    /// `aliases` binding current elements. `None` for rules that emit
    /// nothing on their own.
    ///
    /// `Where` filters of the attachment path are conjoined to the rule's
    /// condition.
    pub fn apply_at(&self, place: &Expr, aliases: &Aliases) -> Option<Vec<Stmt>> {
        let guard = self.guard();
        let guarded = |condition: Option<&Expr>| -> Option<Expr> {
            let condition = match (guard.clone(), condition.cloned()) {
                (Some(guard), Some(condition)) => Some(guard.and(condition)),
                (guard, condition) => guard.or(condition),
            };
            condition.map(|c| aliases.values(c))
        };
        let assign = |value: Expr| Stmt::Assign {
            target: place.clone(),
            value: aliases.values(value),
        };
        let when = |condition: Option<Expr>, stmt: Stmt| match condition {
            Some(condition) => Stmt::If {
                condition,
                then: vec![stmt],
                otherwise: Vec::new(),
            },
            None => stmt,
        };
        let stmt = match &self.rule {
            Rule::Set { value } => when(guarded(None), assign(value.clone())),
            Rule::SetIf { condition, value } => {
                when(guarded(Some(condition)), assign(value.clone()))
            }
            Rule::HideIf { condition } | Rule::NullifyIf { condition } => {
                when(guarded(Some(condition)), assign(Expr::null()))
            }
            Rule::Aggregate { condition, .. } => {
                let condition = guarded(Some(condition)).unwrap_or_else(|| Expr::literal(false));
                Stmt::Assign {
                    target: place.clone(),
                    value: condition,
                }
            }
            Rule::Validator(validator) => {
                let validator = validator.clone().guarded(guard.clone());
                Stmt::Check(Check {
                    location: place.clone(),
                    reported: validator
                        .reported
                        .iter()
                        .map(|path| aliases.places(path.clone()))
                        .collect(),
                    condition: aliases.values(validator.failure(place)),
                    code: Expr::literal(validator.code.as_ref()),
                    message: Expr::literal(validator.message.as_ref()),
                    severity: validator.severity,
                    priority: Expr::literal(
                        validator
                            .priority
                            .unwrap_or_else(|| self.id.raw() as i64),
                    ),
                })
            }
            Rule::DisableIf { .. } | Rule::SourceArray { .. } => return None,
        };
        Some(vec![stmt])
    }
}
