//! Per-node rule canonicalization.
//!
//! Before a node is emitted, its rules are collapsed into one canonical set:
//! hide-if, disable-if and nullify-if conditions are OR-merged, same-named
//! aggregates are OR-merged, setters fold into a single conditional value and
//! at most one source array survives. Filters of the attachment paths are
//! folded into the conditions, so every canonical rule is attached at the
//! node's own path.

use arbor_expression::{Equivalence, Expr};
use arbor_schema::Schema;
use indexmap::IndexMap;

use crate::error::{RuleError, RuleResult};
use crate::rule::{AttachedRule, Rule, RuleId};
use crate::tree::Node;

/// Canonical rules of one node.
#[derive(Debug, Clone, Default)]
pub struct NodeRules {
    /// Combined setter.
    pub setter: Option<AttachedRule>,
    /// Evaluates to the id of the setter that applies, or `null`.
    pub setter_mark: Option<Expr>,
    /// OR of all hide-if conditions.
    pub hide: Option<AttachedRule>,
    /// OR of all disable-if conditions.
    pub disable: Option<Expr>,
    /// OR of all nullify-if conditions.
    pub nullify: Option<AttachedRule>,
    /// One aggregate per name, in first-declaration order.
    pub aggregates: Vec<AttachedRule>,
    /// Declared source array.
    pub source_array: Option<Expr>,
    /// Validators in declaration order, filters folded in.
    pub validators: Vec<AttachedRule>,
    /// Every rule that contributed.
    pub members: Vec<RuleId>,
}

struct Setter {
    id: RuleId,
    condition: Option<Expr>,
    value: Expr,
}

fn conjoin(guard: Option<Expr>, condition: &Expr) -> Expr {
    match guard {
        Some(guard) => guard.and(condition.clone()),
        None => condition.clone(),
    }
}

impl NodeRules {
    /// Canonicalize the rules attached at `node`.
    pub fn canonicalize(schema: &Schema, node: &Node) -> RuleResult<Self> {
        let mut rules: Vec<&AttachedRule> = node.rules().iter().collect();
        rules.sort_by_key(|r| r.id);

        let mut out = Self::default();
        let mut setters = Vec::new();
        let mut hides = Vec::new();
        let mut disables = Vec::new();
        let mut nullifies = Vec::new();
        let mut aggregates: IndexMap<&str, (RuleId, Vec<Expr>)> = IndexMap::new();

        for attached in rules {
            out.members.push(attached.id);
            let guard = attached.guard();
            match &attached.rule {
                Rule::Set { value } => setters.push(Setter {
                    id: attached.id,
                    condition: guard,
                    value: value.clone(),
                }),
                Rule::SetIf { condition, value } => setters.push(Setter {
                    id: attached.id,
                    condition: Some(conjoin(guard, condition)),
                    value: value.clone(),
                }),
                Rule::HideIf { condition } => hides.push((attached.id, conjoin(guard, condition))),
                Rule::DisableIf { condition } => disables.push(conjoin(guard, condition)),
                Rule::NullifyIf { condition } => {
                    nullifies.push((attached.id, conjoin(guard, condition)))
                }
                Rule::Aggregate { name, condition } => {
                    let entry = aggregates
                        .entry(name.as_str())
                        .or_insert_with(|| (attached.id, Vec::new()));
                    entry.0 = attached.id;
                    entry.1.push(conjoin(guard, condition));
                }
                Rule::SourceArray { array } => {
                    let eq = Equivalence::default().ignore_each_current();
                    match &out.source_array {
                        Some(first) if !eq.exprs(first, array) => {
                            return Err(RuleError::ConflictingSourceArrays {
                                path: node.path().to_string(),
                                first: first.to_string(),
                                second: array.to_string(),
                            });
                        }
                        Some(_) => {}
                        None => out.source_array = Some(array.clone()),
                    }
                }
                Rule::Validator(validator) => out.validators.push(
                    node.synthetic(attached.id, Rule::Validator(validator.clone().guarded(guard))),
                ),
            }
        }

        if !setters.is_empty() {
            let (value, mark) = combine_setters(schema, node, setters);
            out.setter = Some(value);
            out.setter_mark = Some(mark);
        }
        out.hide = merged(hides).map(|(id, c)| node.synthetic(id, Rule::hide_if(c)));
        out.disable = Expr::any_of(disables);
        out.nullify = merged(nullifies).map(|(id, c)| node.synthetic(id, Rule::nullify_if(c)));
        out.aggregates = aggregates
            .into_iter()
            .filter_map(|(name, (id, conditions))| {
                Expr::any_of(conditions).map(|c| node.synthetic(id, Rule::aggregate(name, c)))
            })
            .collect();
        Ok(out)
    }

    /// Whether nothing is attached.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Emitted rules, in emission order: aggregates, setter, nullify, hide,
    /// validators.
    pub fn emitted(&self) -> impl Iterator<Item = &AttachedRule> {
        self.aggregates
            .iter()
            .chain(&self.setter)
            .chain(&self.nullify)
            .chain(&self.hide)
            .chain(&self.validators)
    }

    /// Paths read by the mutating rules of the node.
    pub fn dependencies(&self) -> Vec<&Expr> {
        let mut deps: Vec<&Expr> = self
            .aggregates
            .iter()
            .chain(&self.setter)
            .chain(&self.nullify)
            .chain(&self.hide)
            .flat_map(|r| r.rule.dependencies())
            .collect();
        if let Some(mark) = &self.setter_mark {
            deps.extend(mark.chains());
        }
        if let Some(source) = &self.source_array {
            deps.extend(source.chains());
        }
        deps
    }

    /// Paths read by the validators of the node and by the conditions that
    /// suppress them.
    pub fn validation_dependencies(&self) -> Vec<&Expr> {
        let mut deps: Vec<&Expr> = self
            .validators
            .iter()
            .chain(&self.hide)
            .flat_map(|r| r.rule.dependencies())
            .collect();
        if let Some(disable) = &self.disable {
            deps.extend(disable.chains());
        }
        deps
    }
}

fn merged(conditions: Vec<(RuleId, Expr)>) -> Option<(RuleId, Expr)> {
    let last = conditions.last()?.0;
    Expr::any_of(conditions.into_iter().map(|(_, c)| c)).map(|c| (last, c))
}

/// Fold setters into one value, in declaration order. The most recently
/// declared setter whose condition holds wins; an unconditional setter holds
/// always, so it overrides every setter declared before it. Without a match
/// the type default applies.
fn combine_setters(schema: &Schema, node: &Node, setters: Vec<Setter>) -> (AttachedRule, Expr) {
    let latest = setters.iter().map(|s| s.id).max().unwrap_or_else(RuleId::next);
    let mut value = Expr::literal(schema.default_value(node.ty()));
    let mut mark = Expr::null();
    for setter in setters {
        let id = Expr::literal(setter.id.raw());
        match setter.condition {
            Some(condition) => {
                value = Expr::condition(condition.clone(), setter.value, value);
                mark = Expr::condition(condition, id, mark);
            }
            None => {
                value = setter.value;
                mark = id;
            }
        }
    }
    (node.synthetic(latest, Rule::set(value)), mark)
}

impl Node {
    fn synthetic(&self, id: RuleId, rule: Rule) -> AttachedRule {
        AttachedRule {
            id,
            root: self.path().root_type().unwrap_or_else(|| self.ty()),
            path: self.path().clone(),
            rule,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::ValidatorRule;
    use crate::tree::RuleTree;
    use arbor_expression::{Closure, Frame, Inputs, parse_path};
    use arbor_schema::{ScalarKind, TypeId};
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};
    use std::sync::Arc;

    fn fixture() -> (Arc<Schema>, TypeId) {
        let mut b = Schema::builder();
        let int = b.scalar(ScalarKind::Int);
        let boolean = b.scalar(ScalarKind::Bool);
        let line = b.object("Line").unwrap();
        b.field(line, "Qty", int).unwrap();
        let lines = b.array_of(line).unwrap();
        let order = b.object("Order").unwrap();
        b.field(order, "Lines", lines).unwrap();
        b.field(order, "Other", lines).unwrap();
        b.field(order, "A", int).unwrap();
        b.field(order, "B", int).unwrap();
        b.field(order, "Flag", boolean).unwrap();
        (b.build(), order)
    }

    fn canonical(tree: &RuleTree, path: &Expr) -> RuleResult<NodeRules> {
        let id = tree.find(path).unwrap().unwrap();
        let arena = tree.read();
        NodeRules::canonicalize(tree.schema(), arena.node(id))
    }

    fn eval(root: TypeId, expr: Expr, value: &Value) -> Value {
        let closure = Closure::default();
        Frame::new(&closure, Inputs::new().with(root, value))
            .eval(&expr)
            .unwrap()
    }

    #[test]
    fn test_hide_conditions_are_or_merged() {
        let (schema, order) = fixture();
        let tree = RuleTree::new(schema.clone(), order).unwrap();
        let b = parse_path(&schema, order, "B").unwrap();
        let a = parse_path(&schema, order, "A").unwrap();
        tree.attach(&b, Rule::hide_if(a.clone().equals(Expr::literal(1))))
            .unwrap();
        tree.attach(&b, Rule::hide_if(a.clone().equals(Expr::literal(2))))
            .unwrap();
        tree.attach(&b, Rule::disable_if(a.clone().equals(Expr::literal(3))))
            .unwrap();
        tree.attach(&b, Rule::disable_if(a.equals(Expr::literal(4))))
            .unwrap();

        let rules = canonical(&tree, &b).unwrap();
        let Some(Rule::HideIf { condition }) = rules.hide.map(|r| r.rule) else {
            panic!("expected a merged hide rule");
        };
        assert_eq!(
            condition.to_string(),
            "((Order.A == 1) || (Order.A == 2))"
        );
        assert_eq!(
            rules.disable.unwrap().to_string(),
            "((Order.A == 3) || (Order.A == 4))"
        );
        assert_eq!(rules.members.len(), 4);
    }

    #[test]
    fn test_latest_conditional_setter_wins() {
        let (schema, order) = fixture();
        let tree = RuleTree::new(schema.clone(), order).unwrap();
        let a = parse_path(&schema, order, "A").unwrap();
        let flag = parse_path(&schema, order, "Flag").unwrap();
        let b = parse_path(&schema, order, "B").unwrap();
        tree.attach(&b, Rule::set(Expr::literal(1))).unwrap();
        tree.attach(&b, Rule::set_if(a.clone().greater_than(Expr::literal(0)), Expr::literal(2)))
            .unwrap();
        tree.attach(&b, Rule::set_if(flag, Expr::literal(3))).unwrap();

        let rules = canonical(&tree, &b).unwrap();
        let Some(Rule::Set { value }) = rules.setter.map(|r| r.rule) else {
            panic!("expected a combined setter");
        };
        let cases = [
            (json!({ "A": 0, "Flag": false }), 1),
            (json!({ "A": 5, "Flag": false }), 2),
            (json!({ "A": 5, "Flag": true }), 3),
        ];
        for (input, expected) in cases {
            assert_eq!(eval(order, value.clone(), &input), json!(expected));
        }
    }

    #[test]
    fn test_later_unconditional_setter_overrides_conditions() {
        let (schema, order) = fixture();
        let tree = RuleTree::new(schema.clone(), order).unwrap();
        let flag = parse_path(&schema, order, "Flag").unwrap();
        let b = parse_path(&schema, order, "B").unwrap();
        tree.attach(&b, Rule::set_if(flag.clone(), Expr::literal(3))).unwrap();
        tree.attach(&b, Rule::set(Expr::literal(1))).unwrap();
        tree.attach(&b, Rule::set_if(!flag, Expr::literal(4))).unwrap();

        let rules = canonical(&tree, &b).unwrap();
        let Some(Rule::Set { value }) = rules.setter.map(|r| r.rule) else {
            panic!("expected a combined setter");
        };
        assert_eq!(eval(order, value.clone(), &json!({ "Flag": true })), json!(1));
        assert_eq!(eval(order, value, &json!({ "Flag": false })), json!(4));
    }

    #[test]
    fn test_conditional_setters_fall_back_to_default() {
        let (schema, order) = fixture();
        let tree = RuleTree::new(schema.clone(), order).unwrap();
        let b = parse_path(&schema, order, "B").unwrap();
        let flag = parse_path(&schema, order, "Flag").unwrap();
        tree.attach(&b, Rule::set_if(flag, Expr::literal(9))).unwrap();

        let rules = canonical(&tree, &b).unwrap();
        let value = rules.setter.map(|r| r.rule);
        let Some(Rule::Set { value }) = value else {
            panic!("expected a combined setter");
        };
        assert_eq!(
            eval(order, value, &json!({ "Flag": false })),
            json!(0)
        );
        let mark = rules.setter_mark.unwrap();
        assert_eq!(eval(order, mark, &json!({ "Flag": false })), Value::Null);
    }

    #[test]
    fn test_conflicting_source_arrays() {
        let (schema, order) = fixture();
        let tree = RuleTree::new(schema.clone(), order).unwrap();
        let lines = parse_path(&schema, order, "Lines").unwrap();
        tree.attach(&lines, Rule::source_array(parse_path(&schema, order, "Other").unwrap()))
            .unwrap();
        tree.attach(&lines, Rule::source_array(parse_path(&schema, order, "Other").unwrap()))
            .unwrap();
        assert!(canonical(&tree, &lines).is_ok());

        tree.attach(&lines, Rule::source_array(parse_path(&schema, order, "Lines").unwrap()))
            .unwrap();
        assert_eq!(
            canonical(&tree, &lines).unwrap_err().code(),
            "RULES:CONFLICTING_SOURCE_ARRAYS"
        );
    }

    #[test]
    fn test_filtered_validator_gets_guard() {
        let (schema, order) = fixture();
        let line = schema.type_by_name("Line").unwrap();
        let qty = schema.field(line, "Qty").unwrap();
        let tree = RuleTree::new(schema.clone(), order).unwrap();
        let filtered = parse_path(&schema, order, "Lines")
            .unwrap()
            .filter(line, |p| p.member(qty.clone()).greater_than(Expr::literal(10)))
            .each()
            .member(qty.clone());
        tree.attach(&filtered, Rule::Validator(ValidatorRule::required("req", "Required")))
            .unwrap();

        let place = parse_path(&schema, order, "Lines.Each().Qty").unwrap();
        let rules = canonical(&tree, &place).unwrap();
        assert_eq!(rules.validators.len(), 1);
        let validator = &rules.validators[0];
        assert!(validator.guard().is_none());
        let Rule::Validator(rule) = &validator.rule else {
            panic!("expected a validator");
        };
        assert_eq!(
            rule.failure(&place).to_string(),
            "((Order.Lines.Current().Qty > 10) && is_empty(Order.Lines.Each().Qty))"
        );
    }

    #[test]
    fn test_aggregates_merge_by_name() {
        let (schema, order) = fixture();
        let tree = RuleTree::new(schema.clone(), order).unwrap();
        let flag = parse_path(&schema, order, "Flag").unwrap();
        let a = parse_path(&schema, order, "A").unwrap();
        tree.attach(&flag, Rule::aggregate("any", a.clone().equals(Expr::literal(1))))
            .unwrap();
        tree.attach(&flag, Rule::aggregate("any", a.equals(Expr::literal(2))))
            .unwrap();
        let rules = canonical(&tree, &flag).unwrap();
        assert_eq!(rules.aggregates.len(), 1);
        assert_eq!(rules.dependencies().len(), 2);
    }
}
