//! Path-indexed rule trees.
//!
//! A [`RuleTree`] stores rules by the canonical path they were attached to.
//! Nodes live in an arena and are created lazily, exactly once, the first
//! time a rule is attached below them. Lookups never create nodes.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arbor_expression::{Chain, Expr, Shard};
use arbor_schema::{Schema, SchemaError, TypeId, TypeRef};
use indexmap::IndexMap;
use parking_lot::{RwLock, RwLockReadGuard};
use tracing::{debug, trace};

use crate::edge::Edge;
use crate::error::{RuleError, RuleResult};
use crate::rule::{AttachedRule, Rule, RuleId};

static NEXT_TREE: AtomicU64 = AtomicU64::new(1);

/// Process-unique tree identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TreeId(u64);

/// Arena index of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// The tree root.
    pub const ROOT: Self = Self(0);
}

/// One node of a rule tree.
#[derive(Debug, Clone)]
pub struct Node {
    path: Expr,
    ty: TypeId,
    parent: Option<NodeId>,
    edge: Option<Edge>,
    children: IndexMap<Edge, NodeId>,
    rules: Vec<AttachedRule>,
}

impl Node {
    /// Canonical path: the root followed by one accessor per edge.
    pub fn path(&self) -> &Expr {
        &self.path
    }

    /// Type of the values at this node.
    pub fn ty(&self) -> TypeId {
        self.ty
    }

    /// Parent node; `None` at the root.
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Edge from the parent.
    pub fn edge(&self) -> Option<Edge> {
        self.edge
    }

    /// Child reached through `edge`.
    pub fn child(&self, edge: Edge) -> Option<NodeId> {
        self.children.get(&edge).copied()
    }

    /// Children in creation order.
    pub fn children(&self) -> impl Iterator<Item = (Edge, NodeId)> + '_ {
        self.children.iter().map(|(edge, id)| (*edge, *id))
    }

    /// Rules attached here, in declaration order.
    pub fn rules(&self) -> &[AttachedRule] {
        &self.rules
    }
}

/// Nodes of one tree.
#[derive(Debug)]
pub struct Arena {
    nodes: Vec<Node>,
    rule_count: usize,
}

impl Arena {
    /// Node by id.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the arena holds nothing but the root.
    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// Deepest node reached by `shards` without creating anything, plus the
    /// number of shards consumed to reach it. A constant index falls back to
    /// the `Each` child when no child exists for that index.
    pub fn deepest(&self, shards: &[Shard]) -> (NodeId, usize) {
        let mut at = NodeId::ROOT;
        for (i, shard) in shards.iter().enumerate() {
            let Some(edge) = Edge::of(shard) else {
                continue;
            };
            let node = self.node(at);
            let next = node.child(edge).or_else(|| match edge {
                Edge::Index(_) => node.child(Edge::Each),
                _ => None,
            });
            match next {
                Some(next) => at = next,
                None => return (at, i),
            }
        }
        (at, shards.len())
    }

    /// Node reached by `shards`, if every step exists.
    pub fn find(&self, shards: &[Shard]) -> Option<NodeId> {
        match self.deepest(shards) {
            (node, consumed) if consumed == shards.len() => Some(node),
            _ => None,
        }
    }

    /// Whether `ancestor` is `node` or one of its ancestors.
    pub fn is_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut at = Some(node);
        while let Some(id) = at {
            if id == ancestor {
                return true;
            }
            at = self.node(id).parent;
        }
        false
    }

    /// Whether any rule is attached at `id` or below.
    pub fn has_rules_below(&self, id: NodeId) -> bool {
        let node = self.node(id);
        !node.rules.is_empty() || node.children.values().any(|c| self.has_rules_below(*c))
    }

    fn create(&mut self, schema: &Schema, shards: &[Shard]) -> RuleResult<NodeId> {
        let mut at = NodeId::ROOT;
        for shard in shards {
            let Some(edge) = Edge::of(shard) else {
                continue;
            };
            if let Some(next) = self.node(at).child(edge) {
                at = next;
                continue;
            }
            let parent = self.node(at);
            let (path, ty) = match shard {
                Shard::Member(field) => (parent.path.clone().member(field.clone()), field.ty()),
                Shard::Index(index) => (
                    parent.path.clone().index(*index),
                    schema.element_type(parent.ty)?,
                ),
                _ => (parent.path.clone().each(), schema.element_type(parent.ty)?),
            };
            trace!(path = %path, "creating rule tree node");
            let id = NodeId(self.nodes.len());
            self.nodes.push(Node {
                path,
                ty,
                parent: Some(at),
                edge: Some(edge),
                children: IndexMap::new(),
                rules: Vec::new(),
            });
            self.nodes[at.0].children.insert(edge, id);
            at = id;
        }
        Ok(at)
    }
}

/// Rules of one root type, indexed by path.
///
/// ```
/// use arbor_expression::{Expr, parse_path};
/// use arbor_rules::{Rule, RuleTree};
/// use arbor_schema::{ScalarKind, Schema};
///
/// let mut b = Schema::builder();
/// let int = b.scalar(ScalarKind::Int);
/// let root = b.object("Root").unwrap();
/// b.field(root, "A", int).unwrap();
/// let schema = b.build();
///
/// let tree = RuleTree::new(schema.clone(), root).unwrap();
/// let path = parse_path(&schema, root, "A").unwrap();
/// tree.attach(&path, Rule::set(Expr::literal(1))).unwrap();
/// assert_eq!(tree.rules_at(&path).unwrap().len(), 1);
/// ```
pub struct RuleTree {
    id: TreeId,
    schema: Arc<Schema>,
    root: TypeRef,
    arena: RwLock<Arena>,
}

impl std::fmt::Debug for RuleTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleTree")
            .field("id", &self.id)
            .field("root", &self.root)
            .field("revision", &self.revision())
            .finish_non_exhaustive()
    }
}

impl RuleTree {
    /// Empty tree rooted at `root`.
    pub fn new(schema: Arc<Schema>, root: TypeId) -> RuleResult<Self> {
        let root = schema.type_ref(root)?;
        let node = Node {
            path: Expr::root(root.clone()),
            ty: root.id(),
            parent: None,
            edge: None,
            children: IndexMap::new(),
            rules: Vec::new(),
        };
        Ok(Self {
            id: TreeId(NEXT_TREE.fetch_add(1, Ordering::Relaxed)),
            schema,
            root,
            arena: RwLock::new(Arena {
                nodes: vec![node],
                rule_count: 0,
            }),
        })
    }

    /// Tree identity.
    pub fn id(&self) -> TreeId {
        self.id
    }

    /// Schema the tree's paths are checked against.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Root type.
    pub fn root(&self) -> &TypeRef {
        &self.root
    }

    /// Root type id.
    pub fn root_type(&self) -> TypeId {
        self.root.id()
    }

    /// Number of attached rules. Trees are append-only, so this also serves
    /// as a revision number for caches built from the tree.
    pub fn revision(&self) -> usize {
        self.arena.read().rule_count
    }

    /// Number of nodes, the root included.
    pub fn len(&self) -> usize {
        self.arena.read().len()
    }

    /// Whether no rule has been attached.
    pub fn is_empty(&self) -> bool {
        self.revision() == 0
    }

    /// Read access to the nodes.
    pub fn read(&self) -> RwLockReadGuard<'_, Arena> {
        self.arena.read()
    }

    /// Shards of `path`, checked against the tree root and the schema.
    pub fn shards(&self, path: &Expr) -> RuleResult<Vec<Shard>> {
        let chain = Chain::decompose(path).ok_or_else(|| {
            RuleError::unsupported(first_foreign_kind(path), path)
        })?;
        match &chain.head {
            Expr::Root(ty) if ty.id() == self.root.id() => {}
            Expr::Root(ty) => {
                return Err(RuleError::RootTypeMismatch {
                    expected: self.root.name().to_owned(),
                    actual: ty.name().to_owned(),
                });
            }
            other => return Err(RuleError::unsupported(other.kind_name(), path)),
        }
        let mut ty = self.root.id();
        for shard in &chain.shards {
            ty = match shard {
                Shard::Member(field) if field.owner() == ty => field.ty(),
                Shard::Member(field) => {
                    return Err(SchemaError::unknown_field(
                        self.schema.type_name(ty),
                        field.name(),
                    )
                    .into());
                }
                Shard::Where(_) => ty,
                _ => self.schema.element_type(ty)?,
            };
        }
        Ok(chain.shards)
    }

    /// Node at `path`, if it exists.
    pub fn find(&self, path: &Expr) -> RuleResult<Option<NodeId>> {
        let shards = self.shards(path)?;
        Ok(self.arena.read().find(&shards))
    }

    /// Node at `path`, created (with any missing ancestors) if absent.
    pub fn find_or_create(&self, path: &Expr) -> RuleResult<NodeId> {
        let shards = self.shards(path)?;
        self.node_for(&shards)
    }

    fn node_for(&self, shards: &[Shard]) -> RuleResult<NodeId> {
        let exact = |arena: &Arena| {
            let mut at = NodeId::ROOT;
            for edge in shards.iter().filter_map(Edge::of) {
                at = arena.node(at).child(edge)?;
            }
            Some(at)
        };
        if let Some(id) = exact(&*self.arena.read()) {
            return Ok(id);
        }
        let mut arena = self.arena.write();
        if let Some(id) = exact(&*arena) {
            return Ok(id);
        }
        arena.create(&self.schema, shards)
    }

    /// Canonical path of a node.
    pub fn node_path(&self, id: NodeId) -> Expr {
        self.arena.read().node(id).path.clone()
    }

    /// Attach `rule` at `path`; returns its declaration id.
    pub fn attach(&self, path: &Expr, rule: Rule) -> RuleResult<RuleId> {
        let id = RuleId::next();
        self.attach_as(path, rule, id)?;
        Ok(id)
    }

    pub(crate) fn attach_as(&self, path: &Expr, rule: Rule, id: RuleId) -> RuleResult<()> {
        let shards = self.shards(path)?;
        let node = self.node_for(&shards)?;
        trace!(rule = %id, kind = rule.kind_name(), path = %path, "attaching rule");
        let mut arena = self.arena.write();
        arena.nodes[node.0].rules.push(AttachedRule {
            id,
            root: self.root.id(),
            path: path.clone(),
            rule,
        });
        arena.rule_count += 1;
        Ok(())
    }

    /// Rules attached exactly at `path`; empty when the node does not exist.
    pub fn rules_at(&self, path: &Expr) -> RuleResult<Vec<AttachedRule>> {
        let shards = self.shards(path)?;
        let arena = self.arena.read();
        Ok(arena
            .find(&shards)
            .map(|id| arena.node(id).rules.clone())
            .unwrap_or_default())
    }

    /// Every attached rule, in declaration order.
    pub fn rules(&self) -> Vec<AttachedRule> {
        let arena = self.arena.read();
        let mut rules: Vec<_> = arena.nodes.iter().flat_map(|n| n.rules.clone()).collect();
        rules.sort_by_key(|r| r.id);
        rules
    }

    /// Copy every rule of `other` not already present here. Both trees must
    /// share the schema and the root type. Returns the number of rules added.
    pub fn merge_from(&self, other: &RuleTree) -> RuleResult<usize> {
        if std::ptr::eq(self, other) {
            return Ok(0);
        }
        if !Arc::ptr_eq(&self.schema, &other.schema) {
            return Err(RuleError::IncompatibleTrees {
                message: "trees are declared over different schemas".to_owned(),
            });
        }
        if self.root.id() != other.root.id() {
            return Err(RuleError::IncompatibleTrees {
                message: format!(
                    "tree rooted at '{}' cannot absorb rules rooted at '{}'",
                    self.root.name(),
                    other.root.name()
                ),
            });
        }
        let present: std::collections::HashSet<RuleId> =
            self.rules().into_iter().map(|r| r.id).collect();
        let mut added = 0;
        for attached in other.rules() {
            if present.contains(&attached.id) {
                continue;
            }
            self.attach_as(&attached.path, attached.rule, attached.id)?;
            added += 1;
        }
        debug!(added, root = %self.root, "merged rule trees");
        Ok(added)
    }
}

fn first_foreign_kind(path: &Expr) -> &'static str {
    let mut node = path;
    while node.is_path_node() {
        match node.path_parent() {
            Some(parent) => node = parent,
            None => break,
        }
    }
    node.kind_name()
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_expression::parse_path;
    use arbor_schema::ScalarKind;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn schema() -> (Arc<Schema>, TypeId, TypeId) {
        let mut b = Schema::builder();
        let int = b.scalar(ScalarKind::Int);
        let line = b.object("Line").unwrap();
        b.field(line, "Qty", int).unwrap();
        let lines = b.array_of(line).unwrap();
        let order = b.object("Order").unwrap();
        b.field(order, "Lines", lines).unwrap();
        b.field(order, "Total", int).unwrap();
        let other = b.object("Other").unwrap();
        b.field(other, "Total", int).unwrap();
        (b.build(), order, other)
    }

    #[rstest]
    #[case("Lines.Each().Qty", "Lines.Current().Qty")]
    #[case("Lines.Each().Qty", "Lines.Each().Qty")]
    #[case("Total", "Total")]
    fn test_equivalent_paths_share_a_node(#[case] first: &str, #[case] second: &str) {
        let (schema, order, _) = schema();
        let tree = RuleTree::new(schema.clone(), order).unwrap();
        let a = tree
            .find_or_create(&parse_path(&schema, order, first).unwrap())
            .unwrap();
        let b = tree
            .find_or_create(&parse_path(&schema, order, second).unwrap())
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_find_never_creates() {
        let (schema, order, _) = schema();
        let tree = RuleTree::new(schema.clone(), order).unwrap();
        let path = parse_path(&schema, order, "Lines.Each().Qty").unwrap();
        assert_eq!(tree.find(&path).unwrap(), None);
        assert_eq!(tree.len(), 1);
        tree.find_or_create(&path).unwrap();
        assert_eq!(tree.len(), 4);
    }

    #[test]
    fn test_index_falls_back_to_each() {
        let (schema, order, _) = schema();
        let tree = RuleTree::new(schema.clone(), order).unwrap();
        let each = tree
            .find_or_create(&parse_path(&schema, order, "Lines.Each().Qty").unwrap())
            .unwrap();
        let indexed = parse_path(&schema, order, "Lines[2].Qty").unwrap();
        assert_eq!(tree.find(&indexed).unwrap(), Some(each));

        let exact = tree.find_or_create(&indexed).unwrap();
        assert_ne!(exact, each);
        assert_eq!(tree.find(&indexed).unwrap(), Some(exact));
        assert_eq!(tree.node_path(exact).to_string(), "Order.Lines[2].Qty");
    }

    #[test]
    fn test_filters_do_not_descend() {
        let (schema, order, _) = schema();
        let line = schema.type_by_name("Line").unwrap();
        let qty = schema.field(line, "Qty").unwrap();
        let tree = RuleTree::new(schema.clone(), order).unwrap();
        let filtered = parse_path(&schema, order, "Lines")
            .unwrap()
            .filter(line, |p| p.member(qty.clone()).greater_than(Expr::literal(0)))
            .each()
            .member(qty);
        let id = tree.find_or_create(&filtered).unwrap();
        assert_eq!(tree.node_path(id).to_string(), "Order.Lines.Each().Qty");
    }

    #[test]
    fn test_rejects_foreign_paths() {
        let (schema, order, other) = schema();
        let tree = RuleTree::new(schema.clone(), order).unwrap();

        let foreign = parse_path(&schema, other, "Total").unwrap();
        let err = tree.attach(&foreign, Rule::set(Expr::literal(1))).unwrap_err();
        assert_eq!(err.code(), "RULES:ROOT_TYPE_MISMATCH");

        let computed = parse_path(&schema, order, "Total").unwrap() + Expr::literal(1);
        let err = tree.find(&computed).unwrap_err();
        assert_eq!(
            err,
            RuleError::unsupported("binary", "(Order.Total + 1)")
        );

        let wrong_owner = Expr::root(schema.type_ref(order).unwrap())
            .member(schema.field(other, "Total").unwrap());
        assert_eq!(tree.find(&wrong_owner).unwrap_err().code(), "RULES:SCHEMA");
    }

    #[test]
    fn test_merge_skips_known_rules() {
        let (schema, order, _) = schema();
        let path = parse_path(&schema, order, "Total").unwrap();
        let first = RuleTree::new(schema.clone(), order).unwrap();
        let second = RuleTree::new(schema.clone(), order).unwrap();
        first.attach(&path, Rule::set(Expr::literal(1))).unwrap();
        second.attach(&path, Rule::set(Expr::literal(2))).unwrap();

        assert_eq!(first.merge_from(&second).unwrap(), 1);
        assert_eq!(first.merge_from(&second).unwrap(), 0);
        assert_eq!(first.revision(), 2);
        let ids: Vec<_> = first.rules().iter().map(|r| r.id).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_merge_rejects_other_roots() {
        let (schema, order, other) = schema();
        let first = RuleTree::new(schema.clone(), order).unwrap();
        let second = RuleTree::new(schema, other).unwrap();
        assert_eq!(
            first.merge_from(&second).unwrap_err().code(),
            "RULES:INCOMPATIBLE_TREES"
        );
    }
}
