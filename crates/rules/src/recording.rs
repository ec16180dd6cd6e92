//! Rule coverage recording.

use std::collections::BTreeSet;

use arbor_expression::MarkRecorder;

use crate::rule::RuleId;

/// Rules compiled into the mutators run with this context, and the ones whose
/// effect was applied at least once.
///
/// Pass it by `&mut` to [`TreeMutator::mutate_recorded`]; one context can
/// span several mutator runs.
///
/// [`TreeMutator::mutate_recorded`]: crate::TreeMutator::mutate_recorded
#[derive(Debug, Clone, Default)]
pub struct RecordingContext {
    compiled: BTreeSet<RuleId>,
    executed: BTreeSet<RuleId>,
}

impl RecordingContext {
    /// Empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rules compiled into any recorded mutator.
    pub fn compiled(&self) -> &BTreeSet<RuleId> {
        &self.compiled
    }

    /// Rules that took effect.
    pub fn executed(&self) -> &BTreeSet<RuleId> {
        &self.executed
    }

    /// Compiled rules that never took effect, ascending.
    pub fn unexecuted(&self) -> Vec<RuleId> {
        self.compiled.difference(&self.executed).copied().collect()
    }

    pub(crate) fn add_compiled(&mut self, rules: &[RuleId]) {
        self.compiled.extend(rules.iter().copied());
    }
}

impl MarkRecorder for RecordingContext {
    fn record(&mut self, rule: u64) {
        self.executed.insert(RuleId::from_raw(rule));
    }
}
