//! Field access and indirect loads/stores through addresses

use super::{field_expression, field_operand, static_owner, ProgramState};
use crate::bytecode::{FieldRef, Instruction as CilInstruction};
use crate::error::{Error, Result};
use crate::ir::{Expression, IdentKind, Instruction, ReferenceKind, Typ};

/// Owner of an instance field, loading through an address when one is on the stack
fn field_owner(
    state: &mut ProgramState<'_>,
    field: &FieldRef,
    is_static: bool,
    instructions: &mut Vec<Instruction>,
) -> Result<Expression> {
    if is_static {
        return Ok(static_owner(field));
    }
    let (object, ty) = state.pop()?;
    match ty.as_address() {
        Some((value, _, _)) => {
            let id = state.fresh_identifier(IdentKind::Normal);
            instructions.push(Instruction::load(
                id.clone(),
                value.clone(),
                Typ::from_type_ref_no_pointer(&field.declaring_type)?,
                state.location.clone(),
            ));
            Ok(Expression::var(id))
        }
        None => Ok(object),
    }
}

pub(super) fn ldfld(state: &mut ProgramState<'_>, instr: &CilInstruction, is_static: bool) -> Result<()> {
    let field = field_operand(instr)?;
    let mut instructions = Vec::with_capacity(2);
    let owner = field_owner(state, field, is_static, &mut instructions)?;
    let target = field_expression(owner, field)?;

    let id = state.fresh_identifier(IdentKind::Normal);
    instructions.push(Instruction::load(
        id.clone(),
        target,
        Typ::from_type_ref_no_pointer(&field.declaring_type)?,
        state.location.clone(),
    ));
    let node = state.add_method_body_instructions(instructions);
    state.push(Expression::var(id), Typ::from_type_ref(&field.field_type)?);
    state.append = true;
    state.push_next(Some(node))
}

pub(super) fn ldflda(state: &mut ProgramState<'_>, instr: &CilInstruction, is_static: bool) -> Result<()> {
    let field = field_operand(instr)?;
    let mut instructions = Vec::new();
    let owner = field_owner(state, field, is_static, &mut instructions)?;
    let target = field_expression(owner, field)?;
    let ty = Typ::address(
        Typ::from_type_ref_no_pointer(&field.field_type)?,
        target.clone(),
        ReferenceKind::Field,
    );
    state.push(target, ty);
    if instructions.is_empty() {
        return state.push_next(None);
    }
    let node = state.add_method_body_instructions(instructions);
    state.append = true;
    state.push_next(Some(node))
}

pub(super) fn stfld(state: &mut ProgramState<'_>, instr: &CilInstruction, is_static: bool) -> Result<()> {
    let field = field_operand(instr)?;
    let (value, _) = state.pop()?;
    let owner = if is_static {
        static_owner(field)
    } else {
        state.pop()?.0
    };
    let store = Instruction::store(
        field_expression(owner, field)?,
        value,
        Typ::from_type_ref_no_pointer(&field.declaring_type)?,
        state.location.clone(),
    );
    let node = state.add_method_body_instructions(vec![store]);
    state.push_next(Some(node))
}

pub(super) fn ldind(state: &mut ProgramState<'_>) -> Result<()> {
    let (pointer, ty) = state.pop()?;
    let (value, reference, inner) = match ty.as_address() {
        Some((value, reference, inner)) => (value.clone(), reference, inner.clone()),
        None => return Err(Error::unhandled_type("ldind pointer", &ty)),
    };

    let mut instructions = Vec::with_capacity(2);
    let result = state.fresh_identifier(IdentKind::Normal);
    match reference {
        ReferenceKind::Field | ReferenceKind::Generic => {
            instructions.push(Instruction::load(
                result.clone(),
                value,
                inner.clone(),
                state.location.clone(),
            ));
        }
        // the parameter holds the pointer, so two hops
        ReferenceKind::Parameter => {
            let argument = state.fresh_identifier(IdentKind::Normal);
            instructions.push(Instruction::load(
                argument.clone(),
                pointer,
                inner.clone(),
                state.location.clone(),
            ));
            instructions.push(Instruction::load(
                result.clone(),
                Expression::var(argument),
                inner.strip_pointer(),
                state.location.clone(),
            ));
        }
    }

    let node = state.add_method_body_instructions(instructions);
    state.push(Expression::var(result), inner);
    state.append = true;
    state.push_next(Some(node))
}

pub(super) fn stind(state: &mut ProgramState<'_>) -> Result<()> {
    let (value, _) = state.pop()?;
    let (pointer, ty) = state.pop()?;

    let instructions = match ty.as_address() {
        Some((address, ReferenceKind::Parameter, inner)) => {
            let target = state.fresh_identifier(IdentKind::Normal);
            vec![
                Instruction::load(
                    target.clone(),
                    address.clone(),
                    inner.clone(),
                    state.location.clone(),
                ),
                Instruction::store(
                    Expression::var(target),
                    value,
                    inner.strip_pointer(),
                    state.location.clone(),
                ),
            ]
        }
        Some((_, _, inner)) => vec![Instruction::store(
            pointer,
            value,
            inner.clone(),
            state.location.clone(),
        )],
        None if ty.is_pointer() => vec![Instruction::store(
            pointer,
            value,
            ty.clone(),
            state.location.clone(),
        )],
        None => return Err(Error::unhandled_type("stind pointer", &ty)),
    };

    let node = state.add_method_body_instructions(instructions);
    state.push_next(Some(node))
}
