//! Constant loads and plain stack shuffles

use super::{bad_operand, ProgramState};
use crate::bytecode::{Instruction as CilInstruction, Opcode, Operand};
use crate::error::Result;
use crate::ir::{Expression, FloatKind, IntKind, Typ};

pub(super) fn load_constant(state: &mut ProgramState<'_>, instr: &CilInstruction) -> Result<()> {
    let (value, ty) = match (instr.opcode, &instr.operand) {
        (op, _) if op.inline_constant().is_some() => (
            Expression::int(op.inline_constant().map_or(0, i64::from)),
            Typ::int(IntKind::IInt),
        ),
        (Opcode::Ldc_I4 | Opcode::Ldc_I4_S, Operand::Int32(v)) => {
            (Expression::int(i64::from(*v)), Typ::int(IntKind::IInt))
        }
        (Opcode::Ldc_I8, Operand::Int64(v)) => (Expression::int(*v), Typ::int(IntKind::ILongLong)),
        (Opcode::Ldc_R4, Operand::Float32(v)) => (
            Expression::float(f64::from(*v)),
            Typ::float(FloatKind::FFloat),
        ),
        (Opcode::Ldc_R8, Operand::Float64(v)) => {
            (Expression::float(*v), Typ::float(FloatKind::FDouble))
        }
        (Opcode::Ldstr, Operand::String(s)) => (Expression::string(s.clone()), Typ::string()),
        (Opcode::Ldnull, _) => (Expression::null(), Typ::object()),
        _ => return Err(bad_operand(instr, "constant")),
    };
    state.push(value, ty);
    state.push_next(None)
}

pub(super) fn pop(state: &mut ProgramState<'_>) -> Result<()> {
    state.pop()?;
    state.push_next(None)
}

pub(super) fn dup(state: &mut ProgramState<'_>) -> Result<()> {
    let (value, ty) = state.peek()?.clone();
    state.push(value, ty);
    state.push_next(None)
}
