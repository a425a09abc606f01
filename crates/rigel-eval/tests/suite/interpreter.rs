//! The interpreter run on hand-built sequences, including the malformed
//! ones a correct compiler never emits.

use pretty_assertions::assert_eq;
use rigel_eval::{
    interpret, BinaryOp, EvalError, Instruction, Op, Result, ResultKind, RuntimeContext,
};
use rigel_jdwp::mock::MAIN_THREAD_ID;
use rigel_jdwp::JdwpValue;

use super::common::harness;

fn seq(ops: Vec<Op>) -> Vec<Instruction> {
    ops.into_iter()
        .map(|op| Instruction { op, start: 0 })
        .collect()
}

async fn run_ops(ops: Vec<Op>) -> Result<Option<JdwpValue>> {
    let h = harness().await;
    let context = RuntimeContext::from_frame(&h.client, MAIN_THREAD_ID)
        .await
        .unwrap();
    interpret::run(&seq(ops), &context, &h.client).await
}

fn int_binary(op: BinaryOp) -> Op {
    Op::Binary {
        op,
        result_kind: ResultKind::Int,
        left_kind: ResultKind::Int,
        right_kind: ResultKind::Int,
        is_assignment: false,
    }
}

#[tokio::test]
async fn forward_jump_skips_instructions() {
    let result = run_ops(vec![
        Op::PushConstant(JdwpValue::Int(1)),
        Op::Jump { offset: 2 },
        Op::PushConstant(JdwpValue::Int(99)),
    ])
    .await
    .unwrap();
    assert_eq!(result, Some(JdwpValue::Int(1)));
}

#[tokio::test]
async fn conditional_jump_takes_the_matching_branch() {
    // 0: push condition   1: jump to 4 when true   2: push 10
    // 3: jump past end    4: push 20
    let branchy = |condition: bool| {
        vec![
            Op::PushConstant(JdwpValue::Boolean(condition)),
            Op::ConditionalJump {
                offset: 3,
                jump_on_true: true,
            },
            Op::PushConstant(JdwpValue::Int(10)),
            Op::Jump { offset: 2 },
            Op::PushConstant(JdwpValue::Int(20)),
        ]
    };
    assert_eq!(
        run_ops(branchy(true)).await.unwrap(),
        Some(JdwpValue::Int(20))
    );
    assert_eq!(
        run_ops(branchy(false)).await.unwrap(),
        Some(JdwpValue::Int(10))
    );
}

#[tokio::test]
async fn backward_jump_drives_a_loop() {
    // while (i < 3) i = i + 1; then yield i.
    let result = run_ops(vec![
        Op::DeclareLocal {
            name: "i".to_string(),
            type_name: "int".to_string(),
        },
        Op::PushLocal("i".to_string()),
        Op::PushConstant(JdwpValue::Int(3)),
        int_binary(BinaryOp::Less),
        Op::ConditionalJump {
            offset: 8,
            jump_on_true: false,
        },
        Op::PushLocal("i".to_string()),
        Op::PushLocal("i".to_string()),
        Op::PushConstant(JdwpValue::Int(1)),
        int_binary(BinaryOp::Plus),
        Op::AssignVariable,
        Op::Pop,
        Op::Jump { offset: -10 },
        Op::PushLocal("i".to_string()),
    ])
    .await
    .unwrap();
    assert_eq!(result, Some(JdwpValue::Int(3)));
}

#[tokio::test]
async fn declared_local_starts_at_its_default() {
    let result = run_ops(vec![
        Op::DeclareLocal {
            name: "q".to_string(),
            type_name: "java.lang.String".to_string(),
        },
        Op::PushLocal("q".to_string()),
    ])
    .await
    .unwrap();
    assert_eq!(result, Some(JdwpValue::Null));
}

#[tokio::test]
async fn termination_reads_through_a_slot() {
    // A lone frame-local reference must yield the slot's value.
    let result = run_ops(vec![Op::PushLocal("x".to_string())]).await.unwrap();
    assert_eq!(result, Some(JdwpValue::Int(42)));
}

#[tokio::test]
async fn dup_duplicates_the_top_entry() {
    let result = run_ops(vec![
        Op::PushConstant(JdwpValue::Int(5)),
        Op::Dup,
        int_binary(BinaryOp::Plus),
    ])
    .await
    .unwrap();
    assert_eq!(result, Some(JdwpValue::Int(10)));
}

#[tokio::test]
async fn numeric_dispatch_follows_the_declared_kind() {
    assert_eq!(
        run_ops(vec![
            Op::PushConstant(JdwpValue::Int(7)),
            Op::PushConstant(JdwpValue::Int(3)),
            int_binary(BinaryOp::Minus),
        ])
        .await
        .unwrap(),
        Some(JdwpValue::Int(4))
    );
    assert_eq!(
        run_ops(vec![
            Op::PushConstant(JdwpValue::Double(7.5)),
            Op::PushConstant(JdwpValue::Int(3)),
            Op::Binary {
                op: BinaryOp::Minus,
                result_kind: ResultKind::Double,
                left_kind: ResultKind::Double,
                right_kind: ResultKind::Int,
                is_assignment: false,
            },
        ])
        .await
        .unwrap(),
        Some(JdwpValue::Double(4.5))
    );
}

#[tokio::test]
async fn pop_on_an_empty_stack_is_an_internal_error() {
    let result = run_ops(vec![Op::Pop]).await;
    assert!(matches!(result, Err(EvalError::Internal(_))));
}

#[tokio::test]
async fn jump_out_of_range_is_an_internal_error() {
    let forward = run_ops(vec![Op::Jump { offset: 5 }]).await;
    assert!(matches!(forward, Err(EvalError::Internal(_))));

    let backward = run_ops(vec![Op::Jump { offset: -1 }]).await;
    assert!(matches!(backward, Err(EvalError::Internal(_))));
}

#[tokio::test]
async fn reference_minus_is_an_internal_error() {
    let result = run_ops(vec![
        Op::PushConstant(JdwpValue::Int(1)),
        Op::PushConstant(JdwpValue::Int(2)),
        Op::Binary {
            op: BinaryOp::Minus,
            result_kind: ResultKind::Str,
            left_kind: ResultKind::Str,
            right_kind: ResultKind::Str,
            is_assignment: false,
        },
    ])
    .await;
    assert!(matches!(result, Err(EvalError::Internal(_))));
}

#[tokio::test]
async fn leftover_stack_entries_are_an_internal_error() {
    let result = run_ops(vec![
        Op::PushConstant(JdwpValue::Int(1)),
        Op::PushConstant(JdwpValue::Int(2)),
    ])
    .await;
    assert!(matches!(result, Err(EvalError::Internal(_))));
}

#[tokio::test]
async fn empty_sequence_yields_nothing() {
    assert_eq!(run_ops(Vec::new()).await.unwrap(), None);
}
