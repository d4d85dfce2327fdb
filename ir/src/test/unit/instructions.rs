//! Instruction list round trip through a second fusion.

use crate::instructions::*;
use crate::*;

fn sample(fusion: &mut Fusion) -> ValId {
    let n = fusion.symbolic("n", DataType::Index);
    let tid = fusion.named_scalar("threadIdx.x", DataType::Index);
    let four = fusion.int(4);
    let blocks = fusion.ceil_div(n, four);
    let index = fusion.mul(tid, four);
    let in_bounds = fusion.lt(index, n);
    let positive = fusion.lt(four, blocks);
    fusion.and(in_bounds, positive)
}

#[test]
fn test_dependencies_come_first() {
    let mut fusion = Fusion::new();
    let root = sample(&mut fusion);
    let order = sorted_evaluation_list(&fusion, &[root]);
    assert_eq!(order.last(), Some(&root));
    for (position, val) in order.iter().enumerate() {
        for operand in fusion.val(*val).operands() {
            let at = order.iter().position(|v| *v == operand).unwrap();
            assert!(at < position, "{operand} must precede {val}");
        }
    }
}

#[test]
fn test_shared_operands_are_emitted_once() {
    let mut fusion = Fusion::new();
    let root = sample(&mut fusion);
    let serialized = ExpressionSerializer::new().serialize(&fusion, &[root, root]);
    let symbols = serialized.instructions.iter().filter(|i| matches!(i, Instruction::Symbolic { .. })).count();
    assert_eq!(symbols, 1);
    assert_eq!(serialized.roots[0], serialized.roots[1]);
}

#[test]
fn test_replay_evaluates_identically() {
    let mut source = Fusion::new();
    let root = sample(&mut source);
    let serialized = ExpressionSerializer::new().serialize(&source, &[root]);

    let mut target = Fusion::new();
    let rebuilt = ExpressionBuilder::new(&mut target).deserialize(&serialized).unwrap();

    let mut evaluator = ExpressionEvaluator::new();
    evaluator.bind_named("n", 100).bind_named("threadIdx.x", 7);
    assert_eq!(evaluator.evaluate(&source, root), evaluator.evaluate(&target, rebuilt[0]));
    assert_eq!(source.display_val(root).to_string(), target.display_val(rebuilt[0]).to_string());
}

#[test]
fn test_forward_reference_is_rejected() {
    let serialized = SerializedExpressions {
        instructions: vec![
            Instruction::Constant { value: ScalarValue::Int(1), dtype: DataType::Index },
            Instruction::Binary { op: BinaryScalarOp::Add, lhs: 0, rhs: 2, dtype: DataType::Index },
        ],
        roots: vec![1],
    };
    let mut fusion = Fusion::new();
    let result = ExpressionBuilder::new(&mut fusion).deserialize(&serialized);
    assert_eq!(result, Err(Error::UnknownOperand { instruction: 1, slot: 2 }));
}
