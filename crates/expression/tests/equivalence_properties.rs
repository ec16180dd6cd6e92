//! Property tests: equivalence, hashing and canonical forms agree.

use std::sync::Arc;

use arbor_expression::{Equivalence, Expr, canonical_expr};
use arbor_schema::{ScalarKind, Schema, TypeId};
use proptest::prelude::*;

struct Tree {
    schema: Arc<Schema>,
    node: TypeId,
}

fn tree() -> Tree {
    let mut b = Schema::builder();
    let int = b.scalar(ScalarKind::Int);
    let node = b.object("Node").unwrap();
    let children = b.array_of(node).unwrap();
    b.field(node, "Children", children).unwrap();
    b.field(node, "Value", int).unwrap();
    Tree {
        schema: b.build(),
        node,
    }
}

#[derive(Debug, Clone)]
enum Step {
    Each,
    Current,
    Index(usize),
    Where(i64),
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        Just(Step::Each),
        Just(Step::Current),
        (0usize..3).prop_map(Step::Index),
        (-2i64..3).prop_map(Step::Where),
    ]
}

/// Build a chain over `Node.Children...`; every call allocates fresh lambda
/// parameters.
fn build(tree: &Tree, steps: &[Step], leaf: bool) -> Expr {
    let children = tree.schema.field(tree.node, "Children").unwrap();
    let value = tree.schema.field(tree.node, "Value").unwrap();
    let mut expr = Expr::root(tree.schema.type_ref(tree.node).unwrap());
    for step in steps {
        let array = expr.member(children.clone());
        expr = match step {
            Step::Each => array.each(),
            Step::Current => array.current(),
            Step::Index(i) => array.index(*i),
            Step::Where(k) => {
                let value = value.clone();
                array
                    .filter(tree.node, |p| p.member(value).greater_than(Expr::literal(*k)))
                    .each()
            }
        };
    }
    if leaf { expr.member(value) } else { expr }
}

proptest! {
    #[test]
    fn independently_built_chains_are_equivalent(
        steps in prop::collection::vec(step(), 0..5),
        leaf in any::<bool>(),
    ) {
        let tree = tree();
        let a = build(&tree, &steps, leaf);
        let b = build(&tree, &steps, leaf);
        let eq = Equivalence::default();
        prop_assert!(eq.exprs(&a, &b));
        prop_assert_eq!(eq.hash_expr(&a), eq.hash_expr(&b));
        prop_assert!(canonical_expr(&a) == canonical_expr(&b));
    }

    #[test]
    fn equivalent_chains_hash_equally(
        left in prop::collection::vec(step(), 0..4),
        right in prop::collection::vec(step(), 0..4),
    ) {
        let tree = tree();
        let a = build(&tree, &left, true);
        let b = build(&tree, &right, true);
        for eq in [Equivalence::default(), Equivalence::default().ignore_each_current()] {
            if eq.exprs(&a, &b) {
                prop_assert_eq!(eq.hash_expr(&a), eq.hash_expr(&b));
            }
        }
    }

    #[test]
    fn equivalence_is_symmetric(
        left in prop::collection::vec(step(), 0..4),
        right in prop::collection::vec(step(), 0..4),
    ) {
        let tree = tree();
        let a = build(&tree, &left, true);
        let b = build(&tree, &right, true);
        let eq = Equivalence::default();
        prop_assert_eq!(eq.exprs(&a, &b), eq.exprs(&b, &a));
    }
}
