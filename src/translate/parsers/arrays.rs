//! Array element access, length and allocation

use super::{dereference, type_operand, ProgramState};
use crate::bytecode::Instruction as CilInstruction;
use crate::error::{Error, Result};
use crate::ir::expr::{BUILTIN_GET_ARRAY_LENGTH, BUILTIN_NEW_ARRAY};
use crate::ir::{
    CallArg, CallFlags, Expression, IdentKind, Instruction, IntKind, ReferenceKind, SizeofKind, Typ,
};

/// Pop an array reference; only temporaries of array type are accepted
fn pop_array(state: &mut ProgramState<'_>, context: &str) -> Result<(Expression, Typ, Typ)> {
    let (array, ty) = state.pop()?;
    match (&array, ty.array_content()) {
        (Expression::Var { .. }, Some(content)) => {
            let content = content.clone();
            Ok((array, ty, content))
        }
        _ => Err(Error::unhandled_type(context, &ty)),
    }
}

pub(super) fn ldelem(state: &mut ProgramState<'_>) -> Result<()> {
    let (index, _) = state.pop()?;
    let (array, ty, content) = pop_array(state, "ldelem array")?;

    let check = dereference(state, &array, &ty);
    let element = state.fresh_identifier(IdentKind::Normal);
    let load = Instruction::load(
        element.clone(),
        Expression::lindex(array, index),
        content.clone(),
        state.location.clone(),
    );
    let node = state.add_method_body_instructions(vec![check, load]);
    state.push(Expression::var(element), content);
    state.append = true;
    state.push_next(Some(node))
}

pub(super) fn ldelema(state: &mut ProgramState<'_>) -> Result<()> {
    let (index, _) = state.pop()?;
    let (array, _, content) = pop_array(state, "ldelema array")?;
    let element = Expression::lindex(array, index);
    let ty = Typ::address(content, element.clone(), ReferenceKind::Generic);
    state.push(element, ty);
    state.push_next(None)
}

pub(super) fn stelem(state: &mut ProgramState<'_>) -> Result<()> {
    let (value, ty) = state.pop()?;
    let (index, _) = state.pop()?;
    let (array, _) = state.pop()?;
    let store = Instruction::store(
        Expression::lindex(array, index),
        value,
        ty,
        state.location.clone(),
    );
    let node = state.add_method_body_instructions(vec![store]);
    state.push_next(Some(node))
}

pub(super) fn ldlen(state: &mut ProgramState<'_>) -> Result<()> {
    let (array, ty, _) = pop_array(state, "ldlen array")?;

    let check = dereference(state, &array, &ty);
    let length = state.fresh_identifier(IdentKind::Normal);
    let length_type = Typ::int(IntKind::IInt);
    let call = Instruction::call(
        length.clone(),
        length_type.clone(),
        Expression::fun(BUILTIN_GET_ARRAY_LENGTH.clone()),
        vec![CallArg::new(array, ty)],
        CallFlags::default(),
        state.location.clone(),
    );
    let node = state.add_method_body_instructions(vec![check, call]);
    state.push(Expression::var(length), length_type);
    state.append = true;
    state.push_next(Some(node))
}

pub(super) fn newarr(state: &mut ProgramState<'_>, instr: &CilInstruction) -> Result<()> {
    let content = Typ::from_type_ref(type_operand(instr)?)?;
    let (length, _) = state.pop()?;

    let array_type = Typ::array(content);
    let pointer_type = Typ::ptr(array_type.clone());
    let array = state.fresh_identifier(IdentKind::Normal);
    let size = Expression::Sizeof {
        ty: array_type,
        kind: SizeofKind::exact,
        dynamic_length: Some(Box::new(length)),
        number_bytes: None,
    };
    let call = Instruction::call(
        array.clone(),
        pointer_type.clone(),
        Expression::fun(BUILTIN_NEW_ARRAY.clone()),
        vec![CallArg::new(size, pointer_type.clone())],
        CallFlags::default(),
        state.location.clone(),
    );
    let node = state.add_method_body_instructions(vec![call]);
    state.push(Expression::var(array), pointer_type);
    state.push_next(Some(node))
}
