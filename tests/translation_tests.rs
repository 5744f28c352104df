//! Tests for straight-line and branching method bodies
//!
//! This test suite covers:
//! - Appending consecutive effects into one method-body node
//! - Conditional branches and their negated prune pairs
//! - Switch tables lowered into chained prune pairs
//! - Object construction
//! - Node reuse at join points and loop heads, and the limits that abandon a method
//! - Batch behavior: failures, unknown instructions and the parallel merge

mod common;

use cilsil::bytecode::{MethodRef, Opcode, Operand, Parameter, TypeRef};
use cilsil::ir::{
    BinopKind, Const, Expression, IfKind, Instruction, NodeKind, PruneNodeKind, StatementNodeKind,
};
use cilsil::ErrorSeverity;
use common::*;

// =============================================================================
// STRAIGHT-LINE CODE
// =============================================================================

#[test]
fn test_store_then_field_load_share_two_nodes() {
    // Foo x = null; _ = x.count;
    let m = method(
        "M",
        vec![],
        TypeRef::Void,
        vec![TypeRef::class("Foo")],
        vec![
            op(0, Opcode::Ldnull),
            op(1, Opcode::Stloc_0),
            op(2, Opcode::Ldloc_0),
            op_with(3, Opcode::Ldfld, Operand::Field(field("Foo", "count", int32()))),
            op(8, Opcode::Pop),
            op(9, Opcode::Ret),
        ],
    );
    let (cfg, sig) = translate_one(m);
    let all = nodes(&cfg, &sig);

    let bodies = statements(&all, StatementNodeKind::MethodBody);
    assert_eq!(bodies.len(), 2);
    assert_eq!(count_kind(&all, |k| matches!(k, NodeKind::PruneNode { .. })), 0);

    // store, then local load plus field load appended to the same node
    assert!(matches!(bodies[0].instructions[0], Instruction::Store { .. }));
    assert!(bodies[1].instructions.len() >= 2);
    assert!(bodies[1]
        .instructions
        .iter()
        .any(|i| matches!(i, Instruction::Load { expression: Expression::Lfield { .. }, .. })));

    let proc = procedure(&cfg, &sig);
    assert_eq!(bodies[1].succs, vec![proc.pd_exit_node]);
}

#[test]
fn test_empty_void_method_links_start_to_exit() {
    let m = method("Empty", vec![], TypeRef::Void, vec![], vec![op(0, Opcode::Ret)]);
    let (cfg, sig) = translate_one(m);
    let proc = procedure(&cfg, &sig);
    assert_eq!(node(&cfg, proc.pd_start_node).succs, vec![proc.pd_exit_node]);
}

#[test]
fn test_return_value_is_stored_in_return_slot() {
    let m = method(
        "Answer",
        vec![],
        int32(),
        vec![],
        vec![op_with(0, Opcode::Ldc_I4_S, Operand::Int32(42)), op(2, Opcode::Ret)],
    );
    let (cfg, sig) = translate_one(m);
    let all = nodes(&cfg, &sig);
    let returns = statements(&all, StatementNodeKind::ReturnStmt);
    assert_eq!(returns.len(), 1);
    match &returns[0].instructions[0] {
        Instruction::Store { lvalue, rvalue, .. } => {
            assert!(matches!(lvalue, Expression::Lvar { pvar } if pvar.name() == "return"));
            assert_eq!(rvalue, &Expression::int(42));
        }
        other => panic!("expected return store, got {}", other),
    }
}

#[test]
fn test_newobj_allocates_then_constructs() {
    let ctor = MethodRef {
        declaring_type: TypeRef::class("Widget"),
        name: ".ctor".to_string(),
        parameters: vec![Parameter::new("size", int32())],
        return_type: TypeRef::Void,
        has_this: true,
        declaring_type_is_delegate: false,
    };
    let m = method(
        "Build",
        vec![],
        TypeRef::Void,
        vec![],
        vec![
            op(0, Opcode::Ldc_I4_5),
            op_with(1, Opcode::Newobj, Operand::Method(ctor)),
            op(6, Opcode::Pop),
            op(7, Opcode::Ret),
        ],
    );
    let (cfg, sig) = translate_one(m);
    let all = nodes(&cfg, &sig);
    let calls = statements(&all, StatementNodeKind::Call);
    assert_eq!(calls.len(), 1);
    assert!(matches!(
        &calls[0].kind,
        NodeKind::StatementNode { stmt_node_comment: Some(c), .. } if c == "System.Void Widget::.ctor(System.Int32)"
    ));

    let names: Vec<&str> = calls[0]
        .instructions
        .iter()
        .filter_map(|i| match i {
            Instruction::Call {
                function_expression: Expression::Const(Const::Fun(name)),
                ..
            } => Some(name.method_name.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(names, vec!["__new", ".ctor"]);

    match &calls[0].instructions[1] {
        Instruction::Call { args, .. } => {
            assert_eq!(args.len(), 2);
            assert!(matches!(args[0].expression, Expression::Var { .. }));
            assert_eq!(args[1].expression, Expression::int(5));
        }
        other => panic!("expected constructor call, got {}", other),
    }
}

// =============================================================================
// BRANCHES
// =============================================================================

#[test]
fn test_brtrue_produces_negated_prune_pair() {
    let m = method(
        "Branch",
        vec![Parameter::new("flag", boolean())],
        TypeRef::Void,
        vec![],
        vec![
            op(0, Opcode::Ldarg_0),
            branch(1, Opcode::Brtrue_S, 4),
            op(3, Opcode::Ret),
            op(4, Opcode::Ret),
        ],
    );
    let (cfg, sig) = translate_one(m);
    let all = nodes(&cfg, &sig);
    let pair = prunes(&all, PruneNodeKind::MethodBody);
    assert_eq!(pair.len(), 2);

    let condition = |n: &cilsil::ir::CfgNode| match &n.instructions[0] {
        Instruction::Prune {
            condition, if_kind, ..
        } => {
            assert_eq!(*if_kind, IfKind::Ik_if);
            condition.clone()
        }
        other => panic!("expected prune, got {}", other),
    };
    let on_true = pair.iter().find(|n| is_true_branch(n)).unwrap();
    let on_false = pair.iter().find(|n| !is_true_branch(n)).unwrap();
    assert!(matches!(condition(on_true), Expression::Var { .. }));
    assert_eq!(condition(on_false), Expression::lnot(condition(on_true)));

    let exit = procedure(&cfg, &sig).pd_exit_node;
    assert_eq!(on_true.succs, vec![exit]);
    assert_eq!(on_false.succs, vec![exit]);
}

#[test]
fn test_switch_chains_case_prunes() {
    let m = method(
        "Dispatch",
        vec![Parameter::new("k", int32())],
        TypeRef::Void,
        vec![],
        vec![
            op(0, Opcode::Ldarg_0),
            op_with(1, Opcode::Switch, Operand::Switch(vec![19, 20, 21])),
            op(18, Opcode::Ret),
            op(19, Opcode::Ret),
            op(20, Opcode::Ret),
            op(21, Opcode::Ret),
        ],
    );
    let (cfg, sig) = translate_one(m);
    let all = nodes(&cfg, &sig);
    let cases = prunes(&all, PruneNodeKind::MethodBody);
    assert_eq!(cases.len(), 6);
    assert!(cases
        .iter()
        .all(|n| matches!(n.kind, NodeKind::PruneNode { if_kind: IfKind::Ik_switch, .. })));

    let compared: Vec<i64> = cases
        .iter()
        .filter(|n| is_true_branch(n))
        .map(|n| match &n.instructions[0] {
            Instruction::Prune {
                condition:
                    Expression::Binop {
                        operator: BinopKind::Eq,
                        right,
                        ..
                    },
                ..
            } => match right.as_ref() {
                Expression::Const(Const::Int(i)) => i.value,
                other => panic!("expected case constant, got {}", other),
            },
            other => panic!("expected case prune, got {}", other),
        })
        .collect();
    assert_eq!(compared, vec![0, 1, 2]);

    // every "otherwise" node except the last leads to the next case pair
    let otherwise: Vec<_> = cases.iter().filter(|n| !is_true_branch(n)).collect();
    assert_eq!(otherwise[0].succs.len(), 2);
    assert_eq!(otherwise[1].succs.len(), 2);
    assert_eq!(otherwise[2].succs, vec![procedure(&cfg, &sig).pd_exit_node]);
}

// =============================================================================
// NODE REUSE
// =============================================================================

#[test]
fn test_diamond_reuses_join_node() {
    // if (flag) { } else { } ; _ = flag;
    let m = method(
        "Diamond",
        vec![Parameter::new("flag", boolean())],
        TypeRef::Void,
        vec![],
        vec![
            op(0, Opcode::Ldarg_0),
            branch(1, Opcode::Brfalse_S, 6),
            op(3, Opcode::Nop),
            branch(4, Opcode::Br_S, 7),
            op(6, Opcode::Nop),
            op(7, Opcode::Ldarg_0),
            op(8, Opcode::Pop),
            op(9, Opcode::Ret),
        ],
    );
    let (cfg, sig) = translate_one(m);
    let all = nodes(&cfg, &sig);
    let bodies = statements(&all, StatementNodeKind::MethodBody);
    assert_eq!(bodies.len(), 2);

    let merge = bodies[1];
    let pair = prunes(&all, PruneNodeKind::MethodBody);
    assert_eq!(merge.preds.len(), 2);
    assert!(pair.iter().all(|p| merge.preds.contains(&p.id)));
}

/// `if (flag) x = 1; else x = 2;` with the constant still on the stack at the shared store
fn diamond_with_stack_values() -> cilsil::bytecode::MethodDef {
    method(
        "Choose",
        vec![Parameter::new("flag", boolean())],
        TypeRef::Void,
        vec![int32()],
        vec![
            op(0, Opcode::Ldarg_0),
            branch(1, Opcode::Brfalse_S, 6),
            op(3, Opcode::Ldc_I4_1),
            branch(4, Opcode::Br_S, 7),
            op(6, Opcode::Ldc_I4_2),
            op(7, Opcode::Stloc_0),
            op(8, Opcode::Ret),
        ],
    )
}

/// `int i = 0; while (i < 10) { i = i + 1; ... }` with `steps` increments in the body
fn counting_loop(steps: i32) -> cilsil::bytecode::MethodDef {
    let mut body = vec![
        op(0, Opcode::Ldc_I4_0),
        op(1, Opcode::Stloc_0),
        branch(2, Opcode::Br_S, 4 + 4 * steps),
    ];
    for step in 0..steps {
        let at = 4 + 4 * step;
        body.push(op(at, Opcode::Ldloc_0));
        body.push(op(at + 1, Opcode::Ldc_I4_1));
        body.push(op(at + 2, Opcode::Add));
        body.push(op(at + 3, Opcode::Stloc_0));
    }
    let head = 4 + 4 * steps;
    body.push(op(head, Opcode::Ldloc_0));
    body.push(op_with(head + 1, Opcode::Ldc_I4_S, Operand::Int32(10)));
    body.push(branch(head + 3, Opcode::Blt_S, 4));
    body.push(op(head + 5, Opcode::Ret));
    method("Count", vec![], TypeRef::Void, vec![int32()], body)
}

#[test]
fn test_different_stack_values_do_not_share_store() {
    let (cfg, sig) = translate_one(diamond_with_stack_values());
    let all = nodes(&cfg, &sig);

    let stores: Vec<_> = all
        .iter()
        .flat_map(|n| n.instructions.iter())
        .filter_map(|i| match i {
            Instruction::Store { rvalue, .. } => Some(rvalue),
            _ => None,
        })
        .collect();
    assert_eq!(stores.len(), 2);
    assert_ne!(stores[0], stores[1]);

    let store_nodes = all
        .iter()
        .filter(|n| n.instructions.iter().any(|i| matches!(i, Instruction::Store { .. })))
        .count();
    assert_eq!(store_nodes, 2);
}

#[test]
fn test_visit_threshold_abandons_method() {
    let program = cilsil::bytecode::Program {
        methods: vec![diamond_with_stack_values()],
        ..Default::default()
    };
    let translator = cilsil::Translator::new(cilsil::TranslateOptions {
        visit_threshold: 0,
        ..options()
    });
    let report = translator.translate_program(&program);

    assert_eq!(report.translated(), 0);
    assert_eq!(report.timed_out, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].severity, ErrorSeverity::Recoverable);
}

#[test]
fn test_loop_head_is_one_node_for_any_body_size() {
    for steps in [1, 3, 6] {
        let (cfg, sig) = translate_one(counting_loop(steps));
        let all = nodes(&cfg, &sig);

        assert_eq!(
            count_kind(&all, |k| matches!(k, NodeKind::JoinNode)),
            1,
            "steps = {}",
            steps
        );
        let pair = prunes(&all, PruneNodeKind::MethodBody);
        assert_eq!(pair.len(), 2, "steps = {}", steps);
        assert_eq!(pair[0].preds.len(), 1);
        assert_eq!(pair[0].preds, pair[1].preds);

        let join = node(&cfg, pair[0].preds[0]);
        assert_eq!(join.kind, NodeKind::JoinNode);
        assert_eq!(join.preds.len(), 1);

        // entered once from the initial store and once from the end of the body
        let condition = node(&cfg, join.preds[0]);
        assert!(condition.is_statement(StatementNodeKind::MethodBody));
        assert_eq!(condition.preds.len(), 2, "steps = {}", steps);
    }
}

#[test]
fn test_loop_closes_over_condition_node() {
    // int i = 0; while (i < 10) i = i + 1;
    let m = method(
        "Loop",
        vec![],
        TypeRef::Void,
        vec![int32()],
        vec![
            op(0, Opcode::Ldc_I4_0),
            op(1, Opcode::Stloc_0),
            branch(2, Opcode::Br_S, 8),
            op(4, Opcode::Ldloc_0),
            op(5, Opcode::Ldc_I4_1),
            op(6, Opcode::Add),
            op(7, Opcode::Stloc_0),
            op(8, Opcode::Ldloc_0),
            op_with(9, Opcode::Ldc_I4_S, Operand::Int32(10)),
            branch(11, Opcode::Blt_S, 4),
            op(13, Opcode::Ret),
        ],
    );
    let (cfg, sig) = translate_one(m);
    let all = nodes(&cfg, &sig);

    assert_eq!(count_kind(&all, |k| matches!(k, NodeKind::JoinNode)), 1);
    let bodies = statements(&all, StatementNodeKind::MethodBody);
    // initial store, condition load, loop body
    assert_eq!(bodies.len(), 3);

    let (init, condition, body) = (bodies[0], bodies[1], bodies[2]);
    assert_eq!(condition.preds, vec![init.id, body.id]);
    assert_eq!(body.succs, vec![condition.id]);
    // load of i, then the store of i + 1
    assert_eq!(body.instructions.len(), 2);
    assert!(matches!(
        &body.instructions[1],
        Instruction::Store { rvalue: Expression::Binop { operator: BinopKind::PlusA, .. }, .. }
    ));
}

#[test]
fn test_iteration_cap_abandons_method() {
    let m = method(
        "Loop",
        vec![],
        TypeRef::Void,
        vec![int32()],
        vec![
            op(0, Opcode::Ldc_I4_0),
            op(1, Opcode::Stloc_0),
            branch(2, Opcode::Br_S, 8),
            op(4, Opcode::Ldloc_0),
            op(5, Opcode::Ldc_I4_1),
            op(6, Opcode::Add),
            op(7, Opcode::Stloc_0),
            op(8, Opcode::Ldloc_0),
            op_with(9, Opcode::Ldc_I4_S, Operand::Int32(10)),
            branch(11, Opcode::Blt_S, 4),
            op(13, Opcode::Ret),
        ],
    );
    let program = cilsil::bytecode::Program {
        methods: vec![m],
        ..Default::default()
    };
    let translator = cilsil::Translator::new(cilsil::TranslateOptions {
        max_iterations: 3,
        ..options()
    });
    let report = translator.translate_program(&program);
    assert_eq!(report.translated(), 0);
    assert_eq!(report.timed_out, 1);
    assert_eq!(report.failures[0].severity, ErrorSeverity::Recoverable);
}

// =============================================================================
// BATCHES
// =============================================================================

#[test]
fn test_unknown_instruction_is_counted_and_skipped() {
    let bad = method(
        "Bad",
        vec![],
        TypeRef::Void,
        vec![],
        vec![op(0, Opcode::Calli), op(5, Opcode::Ret)],
    );
    let good = method("Good", vec![], TypeRef::Void, vec![], vec![op(0, Opcode::Ret)]);
    let report = translate(vec![bad, good]);

    assert_eq!(report.translated(), 1);
    assert!(report.cfg.contains_procedure("System.Void C::Good()"));
    assert_eq!(report.unknown_instructions.get("calli"), Some(&1));
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].method, "System.Void C::Bad()");
    assert!(!report.has_fatal());
}

#[test]
fn test_stack_underflow_is_fatal() {
    let m = method("Under", vec![], TypeRef::Void, vec![], vec![op(0, Opcode::Pop), op(1, Opcode::Ret)]);
    let report = translate(vec![m]);
    assert_eq!(report.translated(), 0);
    assert!(report.has_fatal());
}

#[test]
fn test_parallel_and_sequential_agree_on_shape() {
    let methods: Vec<_> = (0..8)
        .map(|i| {
            method(
                &format!("M{}", i),
                vec![Parameter::new("flag", boolean())],
                TypeRef::Void,
                vec![],
                vec![
                    op(0, Opcode::Ldarg_0),
                    branch(1, Opcode::Brtrue_S, 4),
                    op(3, Opcode::Ret),
                    op(4, Opcode::Ret),
                ],
            )
        })
        .collect();
    let program = cilsil::bytecode::Program {
        methods,
        ..Default::default()
    };
    let sequential = cilsil::Translator::new(options()).translate_program(&program);
    let parallel = cilsil::Translator::new(cilsil::TranslateOptions {
        parallel: true,
        max_parallelism: 4,
        ..options()
    })
    .translate_program(&program);

    assert_eq!(sequential.translated(), 8);
    assert_eq!(parallel.translated(), 8);
    assert_eq!(
        sequential.cfg.procs.keys().collect::<Vec<_>>(),
        parallel.cfg.procs.keys().collect::<Vec<_>>()
    );
    assert_eq!(sequential.cfg.nodes.len(), parallel.cfg.nodes.len());
}
