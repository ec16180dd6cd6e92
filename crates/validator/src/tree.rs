//! Schema-shaped accumulation of validation results.
//!
//! A [`ValidationResultTree`] mirrors the validated instance: object children
//! by field name, array children by element index, plus one
//! [`ItemKey::Whole`] child per array for results that do not belong to a
//! single element. The tree holds at most [`DEFAULT_MAX_RESULTS`] results
//! unless configured otherwise; once the limit is reached it is *exhausted*
//! and every further result is dropped.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use arbor_expression::{
    CheckReport, CheckSink, ConcretePath, DefaultPathFormatter, PathFormatter, Segment,
};
use tracing::trace;

use crate::result::ValidationResult;

/// Results a tree holds unless configured otherwise.
pub const DEFAULT_MAX_RESULTS: usize = 1000;

/// Key of an array child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ItemKey {
    /// Results about the array as a whole.
    Whole,
    /// Results about one element.
    At(usize),
}

/// One location of a result tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultNode {
    results: Vec<ValidationResult>,
    fields: BTreeMap<String, ResultNode>,
    items: BTreeMap<ItemKey, ResultNode>,
}

impl ResultNode {
    /// Results stored exactly here.
    pub fn results(&self) -> &[ValidationResult] {
        &self.results
    }

    /// Child for an object field.
    pub fn field(&self, name: &str) -> Option<&ResultNode> {
        self.fields.get(name)
    }

    /// Child for an array element.
    pub fn item(&self, index: usize) -> Option<&ResultNode> {
        self.items.get(&ItemKey::At(index))
    }

    /// Child for the array as a whole.
    pub fn whole(&self) -> Option<&ResultNode> {
        self.items.get(&ItemKey::Whole)
    }

    /// Field children in name order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &ResultNode)> {
        self.fields.iter().map(|(name, node)| (name.as_str(), node))
    }

    /// Array children, whole-array child first.
    pub fn items(&self) -> impl Iterator<Item = (ItemKey, &ResultNode)> {
        self.items.iter().map(|(key, node)| (*key, node))
    }

    /// Number of results in this subtree.
    pub fn len(&self) -> usize {
        self.results.len()
            + self.fields.values().map(ResultNode::len).sum::<usize>()
            + self.items.values().map(ResultNode::len).sum::<usize>()
    }

    /// Whether the subtree holds no results.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn child_mut(&mut self, segment: &Segment) -> &mut ResultNode {
        match segment {
            Segment::Field(name) => self.fields.entry(name.clone()).or_default(),
            Segment::Index(index) => self.items.entry(ItemKey::At(*index)).or_default(),
            Segment::Whole => self.items.entry(ItemKey::Whole).or_default(),
        }
    }

    fn child(&self, segment: &Segment) -> Option<&ResultNode> {
        match segment {
            Segment::Field(name) => self.field(name),
            Segment::Index(index) => self.item(*index),
            Segment::Whole => self.whole(),
        }
    }

    fn collect<'a>(&'a self, out: &mut Vec<&'a ValidationResult>) {
        out.extend(&self.results);
        for node in self.fields.values().chain(self.items.values()) {
            node.collect(out);
        }
    }
}

/// Capped tree of validation results.
///
/// ```
/// use arbor_expression::{ConcretePath, Segment};
/// use arbor_validator::{ValidationResult, ValidationResultTree};
///
/// let mut tree = ValidationResultTree::new();
/// let location = ConcretePath::from_segments(vec![
///     Segment::Field("Lines".into()),
///     Segment::Index(1),
///     Segment::Field("Qty".into()),
/// ]);
/// tree.push(ValidationResult::new("positive", "Must be positive").at(location.clone()));
///
/// assert!(!tree.is_valid());
/// let node = tree.node(&location).unwrap();
/// assert_eq!(node.results()[0].code, "positive");
/// ```
#[derive(Clone)]
pub struct ValidationResultTree {
    root: ResultNode,
    limit: usize,
    count: usize,
    exhausted: bool,
    formatter: Arc<dyn PathFormatter>,
}

impl Default for ValidationResultTree {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ValidationResultTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationResultTree")
            .field("root", &self.root)
            .field("limit", &self.limit)
            .field("count", &self.count)
            .field("exhausted", &self.exhausted)
            .finish_non_exhaustive()
    }
}

impl ValidationResultTree {
    /// Empty tree with the default limit and path formatter.
    pub fn new() -> Self {
        Self {
            root: ResultNode::default(),
            limit: DEFAULT_MAX_RESULTS,
            count: 0,
            exhausted: false,
            formatter: Arc::new(DefaultPathFormatter),
        }
    }

    /// Hold at most `limit` results.
    #[must_use = "builder methods must be chained or built"]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self.exhausted = self.count >= limit;
        self
    }

    /// Format reported paths with `formatter`.
    #[must_use = "builder methods must be chained or built"]
    pub fn with_formatter(mut self, formatter: Arc<dyn PathFormatter>) -> Self {
        self.formatter = formatter;
        self
    }

    /// Maximum number of results.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of stored results.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether no result is stored.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Whether the limit was reached; later results were dropped.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Whether no error-severity result is stored.
    pub fn is_valid(&self) -> bool {
        self.iter().all(|result| !result.is_error())
    }

    /// The root location.
    pub fn root(&self) -> &ResultNode {
        &self.root
    }

    /// The node at `location`, if any result was stored at or below it.
    pub fn node(&self, location: &ConcretePath) -> Option<&ResultNode> {
        location
            .segments()
            .iter()
            .try_fold(&self.root, |node, segment| node.child(segment))
    }

    /// Store `result` at its location. Returns `false` when the tree is
    /// exhausted and the result was dropped.
    pub fn push(&mut self, result: ValidationResult) -> bool {
        if self.exhausted {
            trace!(code = %result.code, "result tree exhausted, dropping result");
            return false;
        }
        let node = result
            .location
            .segments()
            .iter()
            .fold(&mut self.root, |node, segment| node.child_mut(segment));
        node.results.push(result);
        self.count += 1;
        if self.count >= self.limit {
            self.exhausted = true;
            trace!(limit = self.limit, "result tree exhausted");
        }
        true
    }

    /// All results, depth first.
    pub fn iter(&self) -> impl Iterator<Item = &ValidationResult> {
        let mut out = Vec::with_capacity(self.count);
        self.root.collect(&mut out);
        out.into_iter()
    }

    /// All results ordered by priority; equal priorities keep tree order.
    pub fn sorted(&self) -> Vec<&ValidationResult> {
        let mut out: Vec<_> = self.iter().collect();
        out.sort_by_key(|result| result.priority);
        out
    }

    /// Error-severity results.
    pub fn errors(&self) -> impl Iterator<Item = &ValidationResult> {
        self.iter().filter(|result| result.is_error())
    }
}

impl CheckSink for ValidationResultTree {
    fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    fn report(&mut self, report: CheckReport) {
        let paths = report
            .reported
            .iter()
            .map(|path| self.formatter.format(path))
            .collect();
        self.push(ValidationResult {
            code: report.code.into(),
            message: report.message.into(),
            severity: report.severity,
            priority: report.priority,
            paths,
            location: report.location,
        });
    }
}

impl fmt::Display for ValidationResultTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "no validation results");
        }
        writeln!(f, "{} validation result(s):", self.count)?;
        for (i, result) in self.sorted().into_iter().enumerate() {
            writeln!(f, "  {}. {}", i + 1, result)?;
        }
        if self.exhausted {
            write!(f, "  (limit of {} reached)", self.limit)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_expression::Severity;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn at(segments: Vec<Segment>) -> ConcretePath {
        ConcretePath::from_segments(segments)
    }

    fn report(location: ConcretePath, priority: i64) -> CheckReport {
        CheckReport {
            reported: vec![location.clone()],
            location,
            code: "invalid".into(),
            message: "Invalid".into(),
            severity: Severity::Error,
            priority,
        }
    }

    #[test]
    fn test_results_are_placed_by_location() {
        let mut tree = ValidationResultTree::new();
        let lines = Segment::Field("Lines".into());
        tree.report(report(at(vec![lines.clone(), Segment::Index(2)]), 0));
        tree.report(report(at(vec![lines.clone(), Segment::Whole]), 0));
        tree.report(report(ConcretePath::root(), 0));

        let node = tree.root().field("Lines").unwrap();
        assert_eq!(node.item(2).unwrap().results().len(), 1);
        assert_eq!(node.whole().unwrap().results().len(), 1);
        assert!(node.item(0).is_none());
        assert_eq!(tree.root().results().len(), 1);
        assert_eq!(tree.root().len(), 3);

        let keys: Vec<_> = node.items().map(|(key, _)| key).collect();
        assert_eq!(keys, vec![ItemKey::Whole, ItemKey::At(2)]);
    }

    #[rstest]
    #[case(1005, 1000, 1000, true)]
    #[case(999, 1000, 999, false)]
    #[case(3, 2, 2, true)]
    fn test_limit(
        #[case] pushed: usize,
        #[case] limit: usize,
        #[case] stored: usize,
        #[case] exhausted: bool,
    ) {
        let mut tree = ValidationResultTree::new().with_limit(limit);
        for _ in 0..pushed {
            tree.report(report(ConcretePath::root(), 0));
        }
        assert_eq!(tree.len(), stored);
        assert_eq!(tree.root().results().len(), stored);
        assert_eq!(tree.is_exhausted(), exhausted);
    }

    #[test]
    fn test_push_reports_drops() {
        let mut tree = ValidationResultTree::new().with_limit(1);
        assert!(tree.push(ValidationResult::new("a", "A")));
        assert!(!tree.push(ValidationResult::new("b", "B")));
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_sorted_by_priority() {
        let mut tree = ValidationResultTree::new();
        tree.push(ValidationResult::new("late", "Late").with_priority(5));
        tree.push(ValidationResult::new("early", "Early").with_priority(-1));
        tree.push(ValidationResult::new("middle", "Middle").with_priority(5));
        let codes: Vec<_> = tree.sorted().iter().map(|r| r.code.to_string()).collect();
        assert_eq!(codes, vec!["early", "late", "middle"]);
    }

    #[test]
    fn test_warnings_keep_tree_valid() {
        let mut tree = ValidationResultTree::new();
        tree.push(ValidationResult::new("hint", "Hint").with_severity(Severity::Warning));
        assert!(tree.is_valid());
        assert_eq!(tree.errors().count(), 0);
        tree.push(ValidationResult::new("bad", "Bad"));
        assert!(!tree.is_valid());
    }

    #[test]
    fn test_reported_paths_use_formatter() {
        struct Slashes;
        impl PathFormatter for Slashes {
            fn format(&self, path: &ConcretePath) -> String {
                path.segments()
                    .iter()
                    .map(|s| match s {
                        Segment::Field(name) => name.clone(),
                        Segment::Index(i) => i.to_string(),
                        Segment::Whole => "*".to_owned(),
                    })
                    .collect::<Vec<_>>()
                    .join("/")
            }
        }

        let mut tree = ValidationResultTree::new().with_formatter(Arc::new(Slashes));
        tree.report(report(
            at(vec![Segment::Field("Lines".into()), Segment::Index(3)]),
            0,
        ));
        let result = tree.iter().next().unwrap();
        assert_eq!(result.paths, vec!["Lines/3".to_owned()]);
    }
}
