//! Dependency units.
//!
//! A rule reading a path depends on the unit that produces the value there:
//! the deepest tree node on the path, or the nearest ancestor with rules when
//! the path runs past the tree. Nodes inside arrays whose elements are not
//! being emitted lift to the array, since elements are produced by one loop.

use arbor_expression::{Chain, Equivalence, Expr, Shard, Stmt};
use tracing::warn;

use super::Assembler;
use crate::error::{RuleError, RuleResult};
use crate::tree::NodeId;

impl Assembler<'_> {
    /// Emit the unit `dep` depends on unless it is inside `owner` or already
    /// emitted. `member` is the node holding the reading rule.
    pub(super) fn require(
        &mut self,
        owner: NodeId,
        member: NodeId,
        dep: &Expr,
    ) -> RuleResult<Vec<Stmt>> {
        self.check_external(member, dep)?;
        let Some(unit) = self.unit_of(dep)? else {
            return Ok(Vec::new());
        };
        if self.arena.is_ancestor(owner, unit)
            || !self.arena.is_ancestor(self.target, unit)
            || self.committed.contains(&unit)
        {
            return Ok(Vec::new());
        }
        if self.visiting.contains(&unit) {
            if self.own_done.contains(&unit) {
                return Ok(Vec::new());
            }
            let path = self.arena.node(unit).path();
            warn!(path = %path, dependency = %dep, "cyclic rule dependency");
            return Err(RuleError::cyclic(path));
        }
        self.emit_unit(unit)
    }

    /// Unit producing the value `dep` reads; `None` for reads of other roots
    /// and of values no rule produces.
    pub(super) fn unit_of(&self, dep: &Expr) -> RuleResult<Option<NodeId>> {
        if dep.root_type() != Some(self.tree.root_type()) {
            return Ok(None);
        }
        let shards = self.tree.shards(dep)?;
        let (mut unit, consumed) = self.arena.deepest(&shards);
        if consumed < shards.len() {
            while self.arena.node(unit).rules().is_empty() {
                match self.arena.node(unit).parent() {
                    Some(parent) => unit = parent,
                    None => return Ok(None),
                }
            }
        }

        let mut at = unit;
        while at != self.target {
            let node = self.arena.node(at);
            let Some(parent) = node.parent() else {
                break;
            };
            if node.edge().is_some_and(|e| e.is_element()) && !self.open.contains(&parent) {
                unit = parent;
            }
            at = parent;
        }
        Ok(Some(unit))
    }

    /// Reads of the tree root must stay below the target node.
    pub(super) fn check_external(&self, member: NodeId, dep: &Expr) -> RuleResult<()> {
        if self.target == NodeId::ROOT || dep.root_type() != Some(self.tree.root_type()) {
            return Ok(());
        }
        let Some(chain) = Chain::decompose(dep) else {
            return Ok(());
        };
        let target = self.arena.node(self.target).path();
        let depth = Chain::decompose(target).map_or(0, |c| c.shards.len());
        let stripped = Chain {
            head: chain.head,
            shards: chain
                .shards
                .into_iter()
                .filter(|s| !matches!(s, Shard::Where(_)))
                .collect(),
        };
        let inside = stripped.shards.len() >= depth
            && Equivalence::default()
                .ignore_each_current()
                .exprs(&stripped.prefix(depth), target);
        if inside {
            return Ok(());
        }
        let path = self.arena.node(member).path();
        warn!(path = %path, dependency = %dep, "rule reads outside the assembled subtree");
        Err(RuleError::external(path, dep))
    }
}
