//! Locals and arguments

use super::{bad_operand, ProgramState};
use crate::bytecode::{Instruction as CilInstruction, Operand, TypeRef};
use crate::error::Result;
use crate::ir::{Expression, Instruction, ReferenceKind, Typ};

/// Locals are named by declaration index
pub(crate) fn local_name(index: u16) -> String {
    format!("%{}", index)
}

fn index_operand(instr: &CilInstruction) -> Result<u16> {
    if let Some(index) = instr.opcode.inline_index() {
        return Ok(index);
    }
    match instr.operand {
        Operand::Local(i) | Operand::Arg(i) => Ok(i),
        _ => Err(bad_operand(instr, "local or argument index")),
    }
}

/// Local `index` and its declared type
fn local(state: &ProgramState<'_>, instr: &CilInstruction, index: u16) -> Result<(Expression, Typ)> {
    let declared = state
        .method
        .locals
        .get(index as usize)
        .ok_or_else(|| bad_operand(instr, "declared local"))?;
    Ok((
        state.local_expression(&local_name(index)),
        Typ::from_type_ref(declared)?,
    ))
}

/// Argument `index` (counting `this`), its name and source type
fn argument(
    state: &ProgramState<'_>,
    instr: &CilInstruction,
    index: u16,
) -> Result<(Expression, TypeRef)> {
    let (name, ty) = state
        .method
        .argument(index)
        .ok_or_else(|| bad_operand(instr, "declared argument"))?;
    Ok((state.local_expression(&name), ty))
}

pub(super) fn ldloc(state: &mut ProgramState<'_>, instr: &CilInstruction) -> Result<()> {
    let index = index_operand(instr)?;
    let (variable, declared) = local(state, instr, index)?;
    let ty = if let Some(boxed) = state.boxed_locals.get(&index) {
        boxed.clone()
    } else if state.isinst_locals.contains(&index) {
        Typ::isinst_bool()
    } else {
        declared
    };

    // A pending pointer comparison stays on top as the branch condition
    if let Some((top, top_type)) = state.stack().last() {
        if top.is_binop() && top_type.is_pointer() {
            let (condition, _) = state.pop()?;
            let load = state.push_and_load(variable, ty);
            state.push(condition, Typ::bool());
            let node = state.add_method_body_instructions(vec![load]);
            state.append = true;
            return state.push_next(Some(node));
        }
    }

    let load = state.push_and_load(variable, ty);
    let node = state.add_method_body_instructions(vec![load]);
    state.append = true;
    state.push_next(Some(node))
}

pub(super) fn ldloca(state: &mut ProgramState<'_>, instr: &CilInstruction) -> Result<()> {
    let index = index_operand(instr)?;
    let (variable, declared) = local(state, instr, index)?;
    let ty = state.boxed_locals.get(&index).cloned().unwrap_or(declared);
    state.push(
        variable.clone(),
        Typ::address(ty, variable, ReferenceKind::Generic),
    );
    state.push_next(None)
}

pub(super) fn stloc(state: &mut ProgramState<'_>, instr: &CilInstruction) -> Result<()> {
    let index = index_operand(instr)?;
    local(state, instr, index)?;
    let (value, ty) = state.pop()?;

    if ty.as_boxed().is_some() {
        state.boxed_locals.insert(index, ty.clone());
    } else {
        state.boxed_locals.remove(&index);
    }
    if ty.is_isinst_result() {
        state.isinst_locals.insert(index);
    } else {
        state.isinst_locals.remove(&index);
    }

    if value.is_binop() && ty.is_pointer() {
        state.push(value, ty);
        return state.push_next(None);
    }

    let name = local_name(index);
    let store_type = match state.local_type(&name) {
        Some(registered) => registered.clone(),
        None => {
            state.register_local(&name, ty.clone());
            ty
        }
    };
    let store = Instruction::store(
        state.local_expression(&name),
        value,
        store_type,
        state.location.clone(),
    );
    let node = state.add_method_body_instructions(vec![store]);
    state.push_next(Some(node))
}

pub(super) fn ldarg(state: &mut ProgramState<'_>, instr: &CilInstruction) -> Result<()> {
    let index = index_operand(instr)?;
    let (variable, source) = argument(state, instr, index)?;

    if let TypeRef::ByRef { element } = &source {
        let inner = Typ::from_type_ref(element)?;
        state.push(
            variable.clone(),
            Typ::address(inner, variable, ReferenceKind::Parameter),
        );
        return state.push_next(None);
    }

    let ty = Typ::from_type_ref(&source)?;
    let load = state.push_and_load(variable, ty);
    let node = state.add_method_body_instructions(vec![load]);
    state.append = true;
    state.push_next(Some(node))
}

pub(super) fn ldarga(state: &mut ProgramState<'_>, instr: &CilInstruction) -> Result<()> {
    let index = index_operand(instr)?;
    let (variable, source) = argument(state, instr, index)?;
    let ty = Typ::from_type_ref(&source)?;
    state.push(
        variable.clone(),
        Typ::address(ty, variable, ReferenceKind::Parameter),
    );
    state.push_next(None)
}

pub(super) fn starg(state: &mut ProgramState<'_>, instr: &CilInstruction) -> Result<()> {
    let index = index_operand(instr)?;
    let (variable, source) = argument(state, instr, index)?;
    let ty = Typ::from_type_ref(&source)?;
    let (value, _) = state.pop()?;
    let store = Instruction::store(variable, value, ty, state.location.clone());
    let node = state.add_method_body_instructions(vec![store]);
    state.push_next(Some(node))
}
