//! Procedure assembly.
//!
//! The assembler walks the subtree of a rule tree below a target path and
//! emits one [`Procedure`] applying every rule in it:
//!
//! - [`Mode::Mutate`] emits assignments. Before a unit is emitted, the units
//!   its rules read are emitted first; arrays are resized to their source
//!   array and iterated with one loop.
//! - [`Mode::Validate`] emits checks. Arrays are iterated over their own
//!   length, hidden or disabled values skip their validators.
//!
//! The procedure is re-rooted on the target node's type, so the callable
//! receives the instance at the target path.

mod arrays;
mod deps;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use arbor_expression::{Equivalence, Expr, Procedure, Stmt, chain_type};
use arbor_schema::Schema;
use tracing::debug;

use crate::alias::Aliases;
use crate::canonical::NodeRules;
use crate::edge::Edge;
use crate::error::RuleResult;
use crate::rule::{AttachedRule, Rule, RuleId};
use crate::tree::{Arena, NodeId, RuleTree};

/// What the assembled procedure does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Apply setters, aggregates, nullify and hide rules.
    Mutate,
    /// Evaluate validators.
    Validate,
}

/// An assembled procedure and the rules compiled into it.
#[derive(Debug, Clone)]
pub struct Assembled {
    /// The procedure.
    pub procedure: Procedure,
    /// Ids of every rule that contributed, ascending.
    pub rules: Vec<RuleId>,
}

/// Assemble the rules of `tree` below `target`.
///
/// ```
/// use arbor_expression::{Expr, parse_path};
/// use arbor_rules::{Mode, Rule, RuleTree, assemble};
/// use arbor_schema::{ScalarKind, Schema};
///
/// let mut b = Schema::builder();
/// let int = b.scalar(ScalarKind::Int);
/// let root = b.object("Root").unwrap();
/// b.field(root, "A", int).unwrap();
/// b.field(root, "B", int).unwrap();
/// let schema = b.build();
///
/// let tree = RuleTree::new(schema.clone(), root).unwrap();
/// let a = parse_path(&schema, root, "A").unwrap();
/// let b = parse_path(&schema, root, "B").unwrap();
/// tree.attach(&b, Rule::set(a + Expr::literal(4))).unwrap();
///
/// let target = parse_path(&schema, root, "").unwrap();
/// let assembled = assemble(&tree, &target, Mode::Mutate).unwrap();
/// assert_eq!(assembled.rules.len(), 1);
/// ```
pub fn assemble(tree: &RuleTree, target: &Expr, mode: Mode) -> RuleResult<Assembled> {
    let shards = tree.shards(target)?;
    let arena = tree.read();
    let Some(node) = arena.find(&shards) else {
        let ty = chain_type(tree.schema(), target)?;
        debug!(target = %target, ?mode, "no rules below target");
        return Ok(Assembled {
            procedure: Procedure::new(tree.schema().type_ref(ty)?, Vec::new()),
            rules: Vec::new(),
        });
    };

    let mut assembler = Assembler::new(tree, &arena, mode, node);
    let body = assembler.emit_unit(node)?;
    let root = tree.schema().type_ref(arena.node(node).ty())?;
    let body = if node == NodeId::ROOT {
        body
    } else {
        let path = arena.node(node).path().clone();
        let eq = Equivalence::default().ignore_each_current();
        body.into_iter()
            .map(|stmt| {
                stmt.map_exprs(&mut |expr| {
                    expr.rewrite(&mut |e| {
                        (e.is_path_node() && eq.exprs(e, &path)).then(|| Expr::root(root.clone()))
                    })
                })
            })
            .collect()
    };

    let procedure = Procedure::new(root, body);
    let rules: Vec<RuleId> = assembler.compiled.into_iter().collect();
    debug!(
        target = %target,
        ?mode,
        statements = procedure.statement_count(),
        rules = rules.len(),
        "assembled procedure"
    );
    Ok(Assembled { procedure, rules })
}

pub(crate) struct Assembler<'t> {
    tree: &'t RuleTree,
    arena: &'t Arena,
    mode: Mode,
    target: NodeId,
    canonical: HashMap<NodeId, Arc<NodeRules>>,
    visiting: HashSet<NodeId>,
    own_done: HashSet<NodeId>,
    committed: HashSet<NodeId>,
    /// Arrays whose elements are being emitted.
    open: Vec<NodeId>,
    aliases: Aliases,
    compiled: BTreeSet<RuleId>,
}

impl<'t> Assembler<'t> {
    fn new(tree: &'t RuleTree, arena: &'t Arena, mode: Mode, target: NodeId) -> Self {
        Self {
            tree,
            arena,
            mode,
            target,
            canonical: HashMap::new(),
            visiting: HashSet::new(),
            own_done: HashSet::new(),
            committed: HashSet::new(),
            open: Vec::new(),
            aliases: Aliases::new(),
            compiled: BTreeSet::new(),
        }
    }

    fn schema(&self) -> &'t Schema {
        self.tree.schema()
    }

    fn rules(&mut self, id: NodeId) -> RuleResult<Arc<NodeRules>> {
        if let Some(rules) = self.canonical.get(&id) {
            return Ok(rules.clone());
        }
        let rules = Arc::new(NodeRules::canonicalize(self.schema(), self.arena.node(id))?);
        self.canonical.insert(id, rules.clone());
        Ok(rules)
    }

    /// `id` and its descendants, preorder.
    fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = vec![id];
        let mut i = 0;
        while let Some(&at) = out.get(i) {
            out.extend(self.arena.node(at).children().map(|(_, child)| child));
            i += 1;
        }
        out
    }

    fn place(&self, id: NodeId) -> Expr {
        self.aliases.places(self.arena.node(id).path().clone())
    }

    /// Emit the node `id` with everything below it.
    fn emit_unit(&mut self, id: NodeId) -> RuleResult<Vec<Stmt>> {
        self.visiting.insert(id);
        let mut out = Vec::new();
        match self.mode {
            Mode::Mutate => {
                for member in self.subtree(id) {
                    let rules = self.rules(member)?;
                    for dep in rules.dependencies() {
                        out.extend(self.require(id, member, dep)?);
                    }
                }
            }
            Mode::Validate => {
                let rules = self.rules(id)?;
                for dep in rules.validation_dependencies() {
                    self.check_external(id, dep)?;
                }
            }
        }

        let rules = self.rules(id)?;
        self.compiled.extend(rules.members.iter().copied());
        let place = self.place(id);
        let own = self.own(&rules, &place);
        self.own_done.insert(id);
        let children = self.children(id, &place)?;

        match self.mode {
            Mode::Mutate => {
                out.extend(own);
                out.extend(children);
                for closing in [&rules.nullify, &rules.hide].into_iter().flatten() {
                    out.extend(self.marked(closing, &place));
                }
            }
            Mode::Validate => {
                let mut body = match &rules.disable {
                    Some(disable) if !own.is_empty() => {
                        vec![self.unless(disable.clone(), own)]
                    }
                    _ => own,
                };
                body.extend(children);
                match rules.hide.as_ref().map(|r| &r.rule) {
                    Some(Rule::HideIf { condition }) if !body.is_empty() => {
                        out.push(self.unless(condition.clone(), body));
                    }
                    _ => out.extend(body),
                }
            }
        }

        self.visiting.remove(&id);
        self.committed.insert(id);
        Ok(out)
    }

    /// Statements for the node's own rules, before its children.
    fn own(&self, rules: &NodeRules, place: &Expr) -> Vec<Stmt> {
        let mut out = Vec::new();
        match self.mode {
            Mode::Mutate => {
                for aggregate in &rules.aggregates {
                    out.extend(self.marked(aggregate, place));
                }
                if let Some(setter) = &rules.setter {
                    if let Some(mark) = &rules.setter_mark {
                        out.push(Stmt::Mark(self.aliases.values(mark.clone())));
                    }
                    out.extend(setter.apply_at(place, &self.aliases).unwrap_or_default());
                }
            }
            Mode::Validate => {
                for validator in &rules.validators {
                    out.extend(validator.apply_at(place, &self.aliases).unwrap_or_default());
                }
            }
        }
        out
    }

    /// `rule` applied at `place`, tagged with a coverage mark where it takes
    /// effect.
    fn marked(&self, rule: &AttachedRule, place: &Expr) -> Vec<Stmt> {
        let mark = Stmt::Mark(Expr::literal(rule.id.raw()));
        let mut stmts = rule.apply_at(place, &self.aliases).unwrap_or_default();
        match stmts.as_mut_slice() {
            [Stmt::If { then, .. }] => then.insert(0, mark),
            _ => stmts.insert(0, mark),
        }
        stmts
    }

    fn unless(&self, condition: Expr, body: Vec<Stmt>) -> Stmt {
        Stmt::If {
            condition: !self.aliases.values(condition),
            then: body,
            otherwise: Vec::new(),
        }
    }

    /// Fields in declaration order, then the element loop, then constant
    /// indexes.
    fn children(&mut self, id: NodeId, place: &Expr) -> RuleResult<Vec<Stmt>> {
        let mut children: Vec<(Edge, NodeId)> = self
            .arena
            .node(id)
            .children()
            .filter(|(_, child)| self.arena.has_rules_below(*child))
            .collect();
        children.sort_by_key(|(edge, _)| match edge {
            Edge::Field(field) => (0, field.raw() as usize),
            Edge::Each => (1, 0),
            Edge::Index(index) => (2, *index),
        });

        let mut out = Vec::new();
        for (edge, child) in children {
            if self.committed.contains(&child) {
                continue;
            }
            match edge {
                Edge::Field(_) => out.extend(self.emit_unit(child)?),
                Edge::Each => out.extend(self.each_loop(id, child, place)?),
                Edge::Index(index) => out.extend(self.indexed(id, child, place, index)?),
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::ValidatorRule;
    use arbor_expression::parse_path;
    use arbor_schema::{ScalarKind, TypeId};

    fn fixture() -> (Arc<Schema>, TypeId, TypeId) {
        let mut b = Schema::builder();
        let int = b.scalar(ScalarKind::Int);
        let line = b.object("Line").unwrap();
        b.field(line, "Qty", int).unwrap();
        b.field(line, "Price", int).unwrap();
        b.field(line, "Amount", int).unwrap();
        let lines = b.array_of(line).unwrap();
        let order = b.object("Order").unwrap();
        b.field(order, "Lines", lines).unwrap();
        b.field(order, "A", int).unwrap();
        b.field(order, "B", int).unwrap();
        b.field(order, "Total", int).unwrap();
        (b.build(), order, line)
    }

    fn assigned(stmts: &[Stmt]) -> Vec<String> {
        let mut out = Vec::new();
        for stmt in stmts {
            match stmt {
                Stmt::Assign { target, .. } => out.push(target.to_string()),
                Stmt::If { then, .. } => out.extend(assigned(then)),
                Stmt::Loop { body, .. } => out.extend(assigned(body)),
                _ => {}
            }
        }
        out
    }

    #[test]
    fn test_dependencies_are_emitted_first() {
        let (schema, order, _) = fixture();
        let tree = RuleTree::new(schema.clone(), order).unwrap();
        let path = |text| parse_path(&schema, order, text).unwrap();
        tree.attach(&path("A"), Rule::set(path("B") + Expr::literal(1)))
            .unwrap();
        tree.attach(&path("B"), Rule::set(path("Total") * Expr::literal(2)))
            .unwrap();
        tree.attach(&path("Total"), Rule::set(Expr::literal(5)))
            .unwrap();

        let assembled = assemble(&tree, &path(""), Mode::Mutate).unwrap();
        assert_eq!(
            assigned(&assembled.procedure.body),
            vec!["Order.Total", "Order.B", "Order.A"]
        );
        assert_eq!(assembled.rules.len(), 3);
    }

    #[test]
    fn test_cycles_are_rejected() {
        let (schema, order, _) = fixture();
        let tree = RuleTree::new(schema.clone(), order).unwrap();
        let path = |text| parse_path(&schema, order, text).unwrap();
        tree.attach(&path("A"), Rule::set(path("B") + Expr::literal(1)))
            .unwrap();
        tree.attach(&path("B"), Rule::set(path("A") + Expr::literal(1)))
            .unwrap();

        let err = assemble(&tree, &path(""), Mode::Mutate).unwrap_err();
        assert_eq!(err.code(), "RULES:CYCLIC_DEPENDENCY");
    }

    #[test]
    fn test_self_reads_are_not_cycles() {
        let (schema, order, _) = fixture();
        let tree = RuleTree::new(schema.clone(), order).unwrap();
        let path = |text| parse_path(&schema, order, text).unwrap();
        tree.attach(&path("A"), Rule::set(path("A") + Expr::literal(1)))
            .unwrap();
        assert!(assemble(&tree, &path(""), Mode::Mutate).is_ok());
    }

    #[test]
    fn test_element_rules_run_in_one_loop() {
        let (schema, order, _) = fixture();
        let tree = RuleTree::new(schema.clone(), order).unwrap();
        let path = |text| parse_path(&schema, order, text).unwrap();
        tree.attach(
            &path("Lines.Each().Amount"),
            Rule::set(path("Lines.Current().Qty") * path("Lines.Current().Price")),
        )
        .unwrap();
        tree.attach(
            &path("Total"),
            Rule::set(Expr::call(
                arbor_expression::Builtin::Sum,
                vec![path("Lines.Each().Amount")],
            )),
        )
        .unwrap();

        let assembled = assemble(&tree, &path(""), Mode::Mutate).unwrap();
        let body = &assembled.procedure.body;
        assert!(matches!(body.first(), Some(Stmt::Loop { .. })));
        let assigned = assigned(body);
        assert_eq!(assigned.len(), 2);
        assert!(assigned[0].starts_with("Order.Lines[#"));
        assert_eq!(assigned[1], "Order.Total");
    }

    #[test]
    fn test_external_dependency_below_target() {
        let (schema, order, _) = fixture();
        let tree = RuleTree::new(schema.clone(), order).unwrap();
        let path = |text| parse_path(&schema, order, text).unwrap();
        tree.attach(
            &path("Lines.Each().Amount"),
            Rule::set(path("Lines.Current().Qty") * path("A")),
        )
        .unwrap();

        let err = assemble(&tree, &path("Lines.Each()"), Mode::Mutate).unwrap_err();
        assert_eq!(err.code(), "RULES:EXTERNAL_DEPENDENCY");
    }

    #[test]
    fn test_reroots_on_target_type() {
        let (schema, order, line) = fixture();
        let tree = RuleTree::new(schema.clone(), order).unwrap();
        let path = |text| parse_path(&schema, order, text).unwrap();
        tree.attach(
            &path("Lines.Each().Amount"),
            Rule::set(path("Lines.Current().Qty") * Expr::literal(2)),
        )
        .unwrap();

        let assembled = assemble(&tree, &path("Lines.Each()"), Mode::Mutate).unwrap();
        assert_eq!(assembled.procedure.root.id(), line);
        assert_eq!(assigned(&assembled.procedure.body), vec!["Line.Amount"]);
    }

    #[test]
    fn test_hidden_validators_are_skipped() {
        let (schema, order, _) = fixture();
        let tree = RuleTree::new(schema.clone(), order).unwrap();
        let path = |text| parse_path(&schema, order, text).unwrap();
        tree.attach(
            &path("A"),
            Rule::Validator(ValidatorRule::required("required", "A is required")),
        )
        .unwrap();
        tree.attach(&path("A"), Rule::hide_if(path("B").equals(Expr::literal(0))))
            .unwrap();

        let assembled = assemble(&tree, &path(""), Mode::Validate).unwrap();
        let [Stmt::If { then, .. }] = assembled.procedure.body.as_slice() else {
            panic!("expected the checks to be guarded");
        };
        assert!(matches!(then.as_slice(), [Stmt::Check(_)]));
    }

    #[test]
    fn test_missing_target_gives_empty_procedure() {
        let (schema, order, line) = fixture();
        let tree = RuleTree::new(schema.clone(), order).unwrap();
        let assembled = assemble(
            &tree,
            &parse_path(&schema, order, "Lines.Each()").unwrap(),
            Mode::Validate,
        )
        .unwrap();
        assert!(assembled.procedure.body.is_empty());
        assert_eq!(assembled.procedure.root.id(), line);
    }
}
