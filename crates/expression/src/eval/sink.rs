//! Receivers for side outputs of a running procedure.

use crate::ast::Severity;
use crate::format::ConcretePath;

/// One failed check.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckReport {
    /// Where the outcome belongs in the result tree.
    pub location: ConcretePath,
    /// Paths shown to the user.
    pub reported: Vec<ConcretePath>,
    /// Error code.
    pub code: String,
    /// Message text.
    pub message: String,
    /// Severity.
    pub severity: Severity,
    /// Declaration priority; lower sorts first.
    pub priority: i64,
}

/// Collects failed checks.
pub trait CheckSink {
    /// Once exhausted, remaining checks are skipped without evaluation.
    fn is_exhausted(&self) -> bool;

    /// Record a failed check.
    fn report(&mut self, report: CheckReport);
}

/// Receives coverage marks.
pub trait MarkRecorder {
    /// A rule with this id was executed.
    fn record(&mut self, rule: u64);
}

/// Sink that only remembers whether anything failed; exhausted on the first
/// failure.
#[derive(Debug, Default)]
pub struct FirstFailure {
    failed: bool,
}

impl FirstFailure {
    /// Whether a check failed.
    pub fn failed(&self) -> bool {
        self.failed
    }
}

impl CheckSink for FirstFailure {
    fn is_exhausted(&self) -> bool {
        self.failed
    }

    fn report(&mut self, report: CheckReport) {
        if report.severity == Severity::Error {
            self.failed = true;
        }
    }
}
