//! Branches, switch and return

use super::{bad_operand, target, ProgramState};
use crate::bytecode::{Instruction as CilInstruction, MethodDef, OpcodeFamily, Operand};
use crate::error::{Error, Result};
use crate::ir::expr::RETURN_IDENTIFIER;
use crate::ir::{
    BinopKind, Expression, IdentKind, IfKind, Instruction, NodeId, NodeKind, PruneNodeKind,
    StatementNodeKind, Typ,
};
use std::collections::{HashSet, VecDeque};

/// Local a returned comparison is spilled through
const INLINE_RETURN: &str = "inlineReturn";

pub(super) fn br(state: &mut ProgramState<'_>, instr: &CilInstruction) -> Result<()> {
    let index = state.index_of(target(instr)?)?;
    state.push_continuation(index, None);
    Ok(())
}

/// `brtrue`/`brfalse`
pub(super) fn branch_on_value(
    state: &mut ProgramState<'_>,
    instr: &CilInstruction,
    on_true: bool,
) -> Result<()> {
    let taken = state.index_of(target(instr)?)?;
    let fallthrough = state.current_index() + 1;
    let condition = state.pop()?;
    if on_true {
        conditional(state, condition, taken, fallthrough)
    } else {
        conditional(state, condition, fallthrough, taken)
    }
}

/// `beq`, `blt`, ... over the top two operands
pub(super) fn branch_compare(
    state: &mut ProgramState<'_>,
    instr: &CilInstruction,
    kind: BinopKind,
) -> Result<()> {
    let taken = state.index_of(target(instr)?)?;
    let fallthrough = state.current_index() + 1;
    let condition = state.pop_two_and_apply_binop(kind)?;
    conditional(state, condition, taken, fallthrough)
}

fn conditional(
    state: &mut ProgramState<'_>,
    (condition, ty): (Expression, Typ),
    on_true: usize,
    on_false: usize,
) -> Result<()> {
    check_in_body(state, on_true.max(on_false))?;
    let condition = match condition {
        Expression::Var { .. } | Expression::Lvar { .. } if ty.is_pointer() => {
            Expression::binop(BinopKind::Ne, condition, Expression::null())
        }
        other => other,
    };

    enter_loop_head(state);
    let (true_node, false_node) = prune_pair(state, condition, IfKind::Ik_if);

    state.push_continuation(on_false, Some(false_node));
    state.push_continuation(on_true, Some(true_node));
    Ok(())
}

pub(super) fn switch(state: &mut ProgramState<'_>, instr: &CilInstruction) -> Result<()> {
    let targets = match &instr.operand {
        Operand::Switch(targets) => targets
            .iter()
            .map(|&t| state.index_of(t))
            .collect::<Result<Vec<_>>>()?,
        _ => return Err(bad_operand(instr, "switch table")),
    };
    check_in_body(state, state.current_index() + 1)?;
    let (value, _) = state.pop()?;

    enter_loop_head(state);
    for (case, index) in targets.into_iter().enumerate() {
        let condition = Expression::binop(BinopKind::Eq, value.clone(), Expression::int(case as i64));
        let (on_case, otherwise) = prune_pair(state, condition, IfKind::Ik_switch);
        state.push_continuation(index, Some(on_case));
        state.previous = otherwise;
    }
    state.push_next(None)
}

pub(super) fn ret(state: &mut ProgramState<'_>) -> Result<()> {
    let ret_type = state.return_type().clone();
    let return_var = state.local_expression(RETURN_IDENTIFIER);

    if ret_type.is_void() {
        let (previous, exit) = (state.previous, state.exit);
        state.link(previous, exit);
        state.push(return_var, ret_type);
        return Ok(());
    }

    let (mut value, _) = state.pop()?;
    // a comparison left over a stored value: return the stored value
    if value.is_binop() && state.stack_len() > 0 {
        value = state.pop()?.0;
    }
    if value.is_binop() {
        let spill = state.local_expression(INLINE_RETURN);
        state.register_local(INLINE_RETURN, ret_type.clone());
        let reload = state.fresh_identifier(IdentKind::Normal);
        let location = state.location.clone();
        let node = state.add_method_body_instructions(vec![
            Instruction::store(spill.clone(), value, ret_type.clone(), location.clone()),
            Instruction::load(reload.clone(), spill, ret_type.clone(), location),
        ]);
        state.previous = node;
        value = Expression::var(reload);
    }

    let mut node = state.new_node(NodeKind::statement(StatementNodeKind::ReturnStmt));
    node.instructions.push(Instruction::store(
        return_var.clone(),
        value,
        ret_type.clone(),
        state.location.clone(),
    ));
    node.add_succ(state.exit);
    state.register_node(node);
    state.push(return_var, ret_type);
    Ok(())
}

/// Register a true and a false prune node on `condition`, both after the previous node
fn prune_pair(state: &mut ProgramState<'_>, condition: Expression, if_kind: IfKind) -> (NodeId, NodeId) {
    let mut on_true = state.new_node(NodeKind::prune(true, PruneNodeKind::MethodBody, if_kind));
    on_true.instructions.push(Instruction::prune(
        condition.clone(),
        true,
        if_kind,
        state.location.clone(),
    ));
    let mut on_false = state.new_node(NodeKind::prune(false, PruneNodeKind::MethodBody, if_kind));
    on_false.instructions.push(Instruction::prune(
        Expression::lnot(condition),
        false,
        if_kind,
        state.location.clone(),
    ));
    (state.register_node(on_true), state.register_node(on_false))
}

/// A branch that can reach itself starts with a join node
fn enter_loop_head(state: &mut ProgramState<'_>) {
    if has_loops(state.method, state.current_index()) {
        let join = state.new_node(NodeKind::JoinNode);
        state.previous = state.register_node(join);
    }
}

fn check_in_body(state: &ProgramState<'_>, index: usize) -> Result<()> {
    if index < state.method.instructions.len() {
        Ok(())
    } else {
        Err(Error::translation(format!(
            "control falls off the end of the method after IL_{:04x}",
            state.current_offset()
        )))
    }
}

/// Whether the instruction at `start` can reach itself
pub(crate) fn has_loops(method: &MethodDef, start: usize) -> bool {
    let mut seen = HashSet::new();
    let mut queue: VecDeque<usize> = successors(method, start).into();
    while let Some(index) = queue.pop_front() {
        if index == start {
            return true;
        }
        if seen.insert(index) {
            queue.extend(successors(method, index));
        }
    }
    false
}

/// Normal-flow successors of an instruction, by index
fn successors(method: &MethodDef, index: usize) -> Vec<usize> {
    let instr = match method.instructions.get(index) {
        Some(i) => i,
        None => return Vec::new(),
    };
    let at = |offset: i32| method.index_of_offset(offset);
    let next = Some(index + 1).filter(|&i| i < method.instructions.len());

    match (instr.opcode.family(), &instr.operand) {
        (OpcodeFamily::Br | OpcodeFamily::Leave, Operand::Target(t)) => at(*t).into_iter().collect(),
        (OpcodeFamily::BranchOnValue { .. } | OpcodeFamily::BranchCompare(_), Operand::Target(t)) => {
            at(*t).into_iter().chain(next).collect()
        }
        (OpcodeFamily::Switch, Operand::Switch(targets)) => {
            next.into_iter().chain(targets.iter().filter_map(|&t| at(t))).collect()
        }
        _ if instr.opcode.is_unconditional_transfer() => Vec::new(),
        _ => next.into_iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::translate_instruction;
    use super::*;
    use crate::bytecode::{Opcode, TypeRef, TypeTable};
    use crate::ir::{IdAllocator, IntKind, UnopKind};

    fn translate_at(state: &mut ProgramState<'_>, index: usize) -> Result<()> {
        state.push_continuation(index, None);
        state.pop_continuation();
        state.begin_instruction();
        let instr = state.current_instruction().unwrap();
        translate_instruction(state, instr)
    }

    fn prune_condition(state: &ProgramState<'_>, id: NodeId) -> (bool, Expression) {
        match &state.node(id).unwrap().instructions[0] {
            Instruction::Prune {
                condition,
                true_branch,
                ..
            } => (*true_branch, condition.clone()),
            other => panic!("expected prune, got {}", other),
        }
    }

    #[test]
    fn test_brtrue_on_object_is_a_null_test() {
        let m = method(
            vec![],
            vec![],
            vec![
                op_with(0, Opcode::Brtrue_S, Operand::Target(3)),
                op(2, Opcode::Nop),
                op(3, Opcode::Ret),
            ],
        );
        let types = TypeTable::new();
        let ids = IdAllocator::new();
        let mut state = ProgramState::new(&m, &types, &ids, 1000).unwrap();
        let object = Expression::var(state.fresh_identifier(IdentKind::Normal));
        state.push(object.clone(), Typ::object());
        translate_at(&mut state, 0).unwrap();

        let succs = state.node(state.start).unwrap().succs.clone();
        assert_eq!(succs.len(), 2);
        let (tb, cond) = prune_condition(&state, succs[0]);
        assert!(tb);
        assert_eq!(cond, Expression::binop(BinopKind::Ne, object, Expression::null()));
        let (fb, negated) = prune_condition(&state, succs[1]);
        assert!(!fb);
        assert!(matches!(negated, Expression::Unop { operator: UnopKind::LNot, .. }));

        // true continuation is on top
        assert_eq!(state.pop_continuation(), Some(2));
        assert_eq!(state.previous, succs[0]);
        assert_eq!(state.pop_continuation(), Some(1));
        assert_eq!(state.previous, succs[1]);
    }

    #[test]
    fn test_brfalse_swaps_targets() {
        let m = method(
            vec![],
            vec![],
            vec![
                op_with(0, Opcode::Brfalse_S, Operand::Target(3)),
                op(2, Opcode::Nop),
                op(3, Opcode::Ret),
            ],
        );
        let types = TypeTable::new();
        let ids = IdAllocator::new();
        let mut state = ProgramState::new(&m, &types, &ids, 1000).unwrap();
        state.push(Expression::int(1), Typ::bool());
        translate_at(&mut state, 0).unwrap();
        // the true prune continues at the fall-through
        assert_eq!(state.pop_continuation(), Some(1));
        let (tb, cond) = prune_condition(&state, state.previous);
        assert!(tb);
        assert_eq!(cond, Expression::int(1));
        assert_eq!(state.pop_continuation(), Some(2));
    }

    #[test]
    fn test_backward_branch_gets_join() {
        // 0: nop; 1: ldc.i4.1; 2: brtrue.s 0; 4: ret
        let m = method(
            vec![],
            vec![],
            vec![
                op(0, Opcode::Nop),
                op(1, Opcode::Ldc_I4_1),
                op_with(2, Opcode::Brtrue_S, Operand::Target(0)),
                op(4, Opcode::Ret),
            ],
        );
        assert!(has_loops(&m, 2));
        assert!(has_loops(&m, 1));
        assert!(!has_loops(&m, 3));
        let types = TypeTable::new();
        let ids = IdAllocator::new();
        let mut state = ProgramState::new(&m, &types, &ids, 1000).unwrap();
        state.push(Expression::int(1), Typ::int(IntKind::IInt));
        translate_at(&mut state, 2).unwrap();
        let join = state.node(state.start).unwrap().succs[0];
        let join = state.node(join).unwrap();
        assert_eq!(join.kind, NodeKind::JoinNode);
        assert_eq!(join.succs.len(), 2);
    }

    #[test]
    fn test_switch_chains_cases() {
        let m = method(
            vec![],
            vec![],
            vec![
                op_with(0, Opcode::Switch, Operand::Switch(vec![13, 14])),
                op(13, Opcode::Nop),
                op(14, Opcode::Ret),
            ],
        );
        let types = TypeTable::new();
        let ids = IdAllocator::new();
        let mut state = ProgramState::new(&m, &types, &ids, 1000).unwrap();
        let v = Expression::var(state.fresh_identifier(IdentKind::Normal));
        state.push(v.clone(), Typ::int(IntKind::IInt));
        translate_at(&mut state, 0).unwrap();

        let first = state.node(state.start).unwrap().succs.clone();
        let (_, cond) = prune_condition(&state, first[0]);
        assert_eq!(cond, Expression::binop(BinopKind::Eq, v.clone(), Expression::int(0)));
        // the second case hangs off the first false prune
        let second = state.node(first[1]).unwrap().succs.clone();
        let (_, cond) = prune_condition(&state, second[0]);
        assert_eq!(cond, Expression::binop(BinopKind::Eq, v, Expression::int(1)));
        assert!(matches!(
            state.node(second[0]).unwrap().kind,
            NodeKind::PruneNode { if_kind: IfKind::Ik_switch, .. }
        ));

        // default case is scheduled last, from the last false prune
        assert_eq!(state.pop_continuation(), Some(1));
        assert_eq!(state.previous, second[1]);
    }

    #[test]
    fn test_void_return_links_exit() {
        let m = method(vec![], vec![], vec![op(0, Opcode::Ret)]);
        let types = TypeTable::new();
        let ids = IdAllocator::new();
        let mut state = ProgramState::new(&m, &types, &ids, 1000).unwrap();
        translate_at(&mut state, 0).unwrap();
        assert_eq!(state.node(state.start).unwrap().succs, vec![state.exit]);
        assert!(!state.has_continuation());
    }

    #[test]
    fn test_returned_comparison_is_spilled() {
        let mut m = method(vec![], vec![], vec![op(0, Opcode::Ret)]);
        m.reference.return_type = TypeRef::primitive("System.Boolean");
        let types = TypeTable::new();
        let ids = IdAllocator::new();
        let mut state = ProgramState::new(&m, &types, &ids, 1000).unwrap();
        state.push(
            Expression::binop(BinopKind::Eq, Expression::int(1), Expression::int(2)),
            Typ::int(IntKind::IInt),
        );
        translate_at(&mut state, 0).unwrap();

        let spill = state.node(state.start).unwrap().succs[0];
        let spill = state.node(spill).unwrap();
        assert_eq!(spill.instructions.len(), 2);
        let ret = state.node(spill.succs[0]).unwrap();
        assert!(ret.is_statement(StatementNodeKind::ReturnStmt));
        assert_eq!(ret.succs, vec![state.exit]);
        assert!(state.local_type(INLINE_RETURN).is_some());
    }
}
