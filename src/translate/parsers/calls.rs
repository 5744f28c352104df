//! Method calls, object construction and function pointers

use super::objects::allocation_call;
use super::{dereference, method_operand, ProgramState};
use crate::bytecode::{Instruction as CilInstruction, MethodRef};
use crate::error::Result;
use crate::ir::{
    CallArg, CallFlags, Expression, IdentKind, Identifier, Instruction, NodeKind,
    StatementNodeKind, Typ,
};
use crate::translate::state::procedure_name;

/// Pop the arguments of `callee` and build the call.
///
/// For a constructor the new object sits on top of the arguments and is taken first.
fn method_call(
    state: &mut ProgramState<'_>,
    callee: &MethodRef,
    is_virtual: bool,
    is_constructor: bool,
) -> Result<(Instruction, Vec<CallArg>, Identifier, Typ)> {
    let mut args = Vec::with_capacity(callee.stack_arity());
    let mut count = callee.stack_arity();
    if is_constructor {
        let (object, ty) = state.pop()?;
        args.push(CallArg::new(object, ty));
        count = count.saturating_sub(1);
    }
    args.extend(
        state
            .pop_many(count)?
            .into_iter()
            .map(|(e, t)| CallArg::new(e, t)),
    );

    let return_type = Typ::from_type_ref(&callee.return_type)?;
    let result = state.fresh_identifier(IdentKind::Normal);
    let call = Instruction::call(
        result.clone(),
        return_type.clone(),
        Expression::fun(procedure_name(callee)),
        args.clone(),
        CallFlags {
            cf_virtual: is_virtual,
            ..CallFlags::default()
        },
        state.location.clone(),
    );
    Ok((call, args, result, return_type))
}

pub(super) fn call(state: &mut ProgramState<'_>, instr: &CilInstruction, is_virtual: bool) -> Result<()> {
    let callee = method_operand(instr)?;
    let (call, args, result, return_type) = method_call(state, callee, is_virtual, false)?;

    let mut instructions = Vec::with_capacity(2);
    if callee.has_this && !callee.is_constructor() {
        if let Some(receiver) = args.first().filter(|a| matches!(a.expression, Expression::Var { .. })) {
            instructions.push(dereference(state, &receiver.expression, &receiver.ty));
        }
    }
    instructions.push(call);

    let mut node = state.new_node(NodeKind::commented(StatementNodeKind::Call, callee.signature()));
    node.instructions = instructions;
    let node = state.register_node(node);

    if !return_type.is_void() {
        state.push(Expression::var(result), return_type);
    }
    state.append = true;
    state.push_next(Some(node))
}

pub(super) fn newobj(state: &mut ProgramState<'_>, instr: &CilInstruction) -> Result<()> {
    let constructor = method_operand(instr)?;

    // Delegate construction keeps only the function pointer
    if let Some((value, ty)) = state.stack().last() {
        if value.is_fun_const()
            && ty.strip_pointer() == Typ::Tfun
            && constructor.declares_delegate()
            && constructor.parameters.len() == 2
        {
            let (function, function_type) = state.pop()?;
            state.pop()?;
            state.push(function, function_type);
            return state.push_next(None);
        }
    }

    let ty = Typ::from_type_ref(&constructor.declaring_type)?;
    let (allocation, object) = allocation_call(state, &ty);
    state.push(Expression::var(object.clone()), ty.clone());
    let (construct, ..) = method_call(state, constructor, false, true)?;

    let mut node = state.new_node(NodeKind::commented(
        StatementNodeKind::Call,
        constructor.signature(),
    ));
    node.instructions = vec![allocation, construct];
    let node = state.register_node(node);

    state.push(Expression::var(object), ty);
    state.append = true;
    state.push_next(Some(node))
}

pub(super) fn ldftn(state: &mut ProgramState<'_>, instr: &CilInstruction) -> Result<()> {
    let method = method_operand(instr)?;
    state.push(Expression::fun(procedure_name(method)), Typ::ptr(Typ::Tfun));
    state.push_next(None)
}
