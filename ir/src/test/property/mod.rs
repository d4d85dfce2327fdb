//! Constant folding agrees with evaluation on arbitrary integer expression trees.

use proptest::prelude::*;

use crate::*;

#[derive(Debug, Clone)]
enum Tree {
    Leaf(i64),
    Var,
    Node(BinaryScalarOp, Box<Tree>, Box<Tree>),
}

fn tree() -> impl Strategy<Value = Tree> {
    let leaf = prop_oneof![(-9i64..10).prop_map(Tree::Leaf), Just(Tree::Var)];
    leaf.prop_recursive(3, 8, 2, |inner| {
        (
            prop_oneof![
                Just(BinaryScalarOp::Add),
                Just(BinaryScalarOp::Sub),
                Just(BinaryScalarOp::Mul),
                Just(BinaryScalarOp::Min),
                Just(BinaryScalarOp::Max),
            ],
            inner.clone(),
            inner,
        )
            .prop_map(|(op, l, r)| Tree::Node(op, Box::new(l), Box::new(r)))
    })
}

fn build(fusion: &mut Fusion, tree: &Tree, var: ValId) -> ValId {
    match tree {
        Tree::Leaf(v) => fusion.int(*v),
        Tree::Var => var,
        Tree::Node(op, l, r) => {
            let l = build(fusion, l, var);
            let r = build(fusion, r, var);
            fusion.binary(*op, l, r)
        }
    }
}

fn reference(tree: &Tree, x: i64) -> i64 {
    match tree {
        Tree::Leaf(v) => *v,
        Tree::Var => x,
        Tree::Node(op, l, r) => {
            let (l, r) = (reference(l, x), reference(r, x));
            match op {
                BinaryScalarOp::Add => l + r,
                BinaryScalarOp::Sub => l - r,
                BinaryScalarOp::Mul => l * r,
                BinaryScalarOp::Min => l.min(r),
                _ => l.max(r),
            }
        }
    }
}

proptest! {
    #[test]
    fn folding_preserves_value(tree in tree(), x in -9i64..10) {
        let mut fusion = Fusion::new();
        let var = fusion.symbolic("x", DataType::Index);
        let built = build(&mut fusion, &tree, var);
        let mut evaluator = ExpressionEvaluator::new();
        evaluator.bind_named("x", x);
        prop_assert_eq!(evaluator.evaluate_int(&fusion, built), Some(reference(&tree, x)));
    }
}
