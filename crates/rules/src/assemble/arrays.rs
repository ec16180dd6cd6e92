//! Array emission: element loops and constant-index children.

use arbor_expression::{Builtin, Chain, Equivalence, Expr, LoopId, Shard, Stmt};
use tracing::{trace, warn};

use super::{Assembler, Mode};
use crate::error::{RuleError, RuleResult};
use crate::rule::Rule;
use crate::tree::NodeId;

impl Assembler<'_> {
    /// Loop over the elements of the array at `place`, emitting the element
    /// node `element` once as the loop body.
    pub(super) fn each_loop(
        &mut self,
        array: NodeId,
        element: NodeId,
        place: &Expr,
    ) -> RuleResult<Vec<Stmt>> {
        let id = LoopId::fresh();
        let scope = self.aliases.len();
        self.aliases.push(place.clone(), place.clone().iter(id));

        let bound = match self.mode {
            Mode::Mutate => self
                .source_array(array, element, id)
                .map(|source| source.into_iter().collect()),
            Mode::Validate => self.current_arrays(element, id),
        };
        let bound: Vec<Expr> = match bound {
            Ok(bound) => bound,
            Err(err) => {
                self.aliases.truncate(scope);
                return Err(err);
            }
        };

        let mut out = Vec::new();
        if let (Mode::Mutate, Some(source)) = (self.mode, bound.first()) {
            out.push(Stmt::Resize {
                array: place.clone(),
                length: Expr::call(Builtin::Len, vec![source.clone()]),
                element: Expr::literal(self.schema().default_value(self.arena.node(element).ty())),
            });
        }
        for source in bound {
            trace!(array = %place, source = %source, "binding parallel array");
            self.aliases.push(source.clone(), source.iter(id));
        }

        self.open.push(array);
        let body = self.emit_unit(element);
        self.open.pop();
        self.aliases.truncate(scope);

        out.push(Stmt::Loop {
            id,
            length: Expr::call(Builtin::Len, vec![place.clone()]),
            body: body?,
        });
        Ok(out)
    }

    /// Emit the constant-index child `child` of the array at `place`.
    pub(super) fn indexed(
        &mut self,
        array: NodeId,
        child: NodeId,
        place: &Expr,
        index: usize,
    ) -> RuleResult<Vec<Stmt>> {
        let scope = self.aliases.len();
        self.aliases.push(place.clone(), place.clone().index(index));
        self.open.push(array);
        let body = self.emit_unit(child);
        self.open.pop();
        self.aliases.truncate(scope);
        body
    }

    /// Array the destination array is resized to: a declared source array,
    /// or the one array the element setters iterate with `Current()`.
    fn source_array(
        &mut self,
        array: NodeId,
        element: NodeId,
        id: LoopId,
    ) -> RuleResult<Option<Expr>> {
        for node in [array, element] {
            if let Some(source) = &self.rules(node)?.source_array {
                return Ok(Some(self.aliases.values(source.clone())));
            }
        }

        let mut found: Vec<Expr> = Vec::new();
        for member in self.subtree(element) {
            let rules = self.rules(member)?;
            let Some(setter) = &rules.setter else {
                continue;
            };
            for dep in setter.rule.dependencies() {
                self.collect_current(dep, id, &mut found);
            }
        }
        match found.as_slice() {
            [] => Ok(None),
            [single] => Ok(Some(single.clone())),
            [first, second, ..] => {
                let path = self.arena.node(array).path();
                warn!(path = %path, first = %first, second = %second, "ambiguous source array");
                Err(RuleError::MultipleSourceArrays {
                    path: path.to_string(),
                    first: first.to_string(),
                    second: second.to_string(),
                })
            }
        }
    }

    /// Arrays the validators below `element` iterate with `Current()`, bound
    /// to the same index as the validated array.
    fn current_arrays(&mut self, element: NodeId, id: LoopId) -> RuleResult<Vec<Expr>> {
        let mut found = Vec::new();
        for member in self.subtree(element) {
            let rules = self.rules(member)?;
            for dep in rules.validation_dependencies() {
                self.collect_current(dep, id, &mut found);
            }
            for validator in &rules.validators {
                if let Rule::Validator(rule) = &validator.rule {
                    for reported in &rule.reported {
                        self.collect_current(reported, id, &mut found);
                    }
                }
            }
        }
        Ok(found)
    }

    /// Add the first array of `chain` still iterated with `Current()` once
    /// the aliases in scope are applied. Arrays nested inside elements of the
    /// loop `id` belong to inner loops and are skipped.
    fn collect_current(&self, chain: &Expr, id: LoopId, found: &mut Vec<Expr>) {
        let bound = self.aliases.values(chain.clone());
        let Some(decomposed) = Chain::decompose(&bound) else {
            return;
        };
        let Some(at) = decomposed
            .shards
            .iter()
            .position(|s| matches!(s, Shard::Current))
        else {
            return;
        };
        let array = decomposed.prefix(at);
        if array.any_node(&mut |e| matches!(e, Expr::Iter { id: inner, .. } if *inner == id)) {
            return;
        }
        let eq = Equivalence::default().strict().ignore_each_current();
        if !found.iter().any(|f| eq.exprs(f, &array)) {
            found.push(array);
        }
    }
}
