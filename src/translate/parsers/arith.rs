//! Arithmetic, bitwise and comparison operators
//!
//! Operators only build expressions; nothing is emitted until the value is stored, passed or
//! branched on.

use super::ProgramState;
use crate::bytecode::Opcode;
use crate::error::Result;
use crate::ir::{BinopKind, Expression, UnopKind};

pub(super) fn binop(state: &mut ProgramState<'_>, kind: BinopKind) -> Result<()> {
    // `and`/`or` over booleans are the short-circuit operators
    let kind = match kind {
        BinopKind::BAnd if state.peek()?.1.is_bool() => BinopKind::LAnd,
        BinopKind::BOr if state.peek()?.1.is_bool() => BinopKind::LOr,
        BinopKind::Gt if follows_ldnull(state) => BinopKind::Ne,
        other => other,
    };
    let (value, ty) = state.pop_two_and_apply_binop(kind)?;
    state.push(value, ty);
    state.push_next(None)
}

fn follows_ldnull(state: &ProgramState<'_>) -> bool {
    state
        .method
        .previous(state.current_index())
        .map_or(false, |p| p.opcode == Opcode::Ldnull)
}

pub(super) fn unop(state: &mut ProgramState<'_>, kind: UnopKind) -> Result<()> {
    let (value, ty) = state.pop()?;
    state.push(Expression::unop(kind, value, ty.clone()), ty);
    state.push_next(None)
}
