//! # Opcode handlers
//!
//! One function per opcode family. [`translate_instruction`] routes on
//! [`OpcodeFamily`], so every opcode reaches exactly one handler.
//!
//! ## Module Structure
//!
//! ```text
//! parsers/
//! ├── mod.rs        # Dispatcher and operand helpers
//! ├── locals.rs     # ldloc/stloc/ldarg/starg and their address forms
//! ├── constants.rs  # ldc.*, ldstr, ldnull, pop, dup
//! ├── arith.rs      # Binary and unary operators
//! ├── branch.rs     # br*, switch, ret
//! ├── calls.rs      # call, callvirt, newobj, ldftn
//! ├── objects.rs    # box, unbox, isinst, castclass, initobj, ldtoken
//! ├── fields.rs     # ldfld/stfld families, ldind, stind
//! └── arrays.rs     # ldelem, ldelema, stelem, ldlen, newarr
//! ```
//!
//! Handlers read and validate their operand before touching the stack, so a failing handler
//! leaves the state as it found it apart from what it already popped.

mod arith;
mod arrays;
mod branch;
mod calls;
mod constants;
mod fields;
mod locals;
mod objects;

use super::state::ProgramState;
use crate::bytecode::{FieldRef, Instruction as CilInstruction, MethodRef, Operand, OpcodeFamily, TypeRef};
use crate::error::{Error, Result};
use crate::ir::{Expression, FieldIdentifier, IdentKind, Instruction, ProgramVariable, Typ};

/// Translate one instruction, scheduling its successors
pub fn translate_instruction(state: &mut ProgramState<'_>, instr: &CilInstruction) -> Result<()> {
    use OpcodeFamily::*;

    match instr.opcode.family() {
        Nop | Conv => state.push_next(None),

        Ldloc => locals::ldloc(state, instr),
        Ldloca => locals::ldloca(state, instr),
        Stloc => locals::stloc(state, instr),
        Ldarg => locals::ldarg(state, instr),
        Ldarga => locals::ldarga(state, instr),
        Starg => locals::starg(state, instr),

        LdcI4 | LdcI8 | LdcR4 | LdcR8 | Ldstr | Ldnull => constants::load_constant(state, instr),
        Pop => constants::pop(state),
        Dup => constants::dup(state),

        Binop(kind) => arith::binop(state, kind),
        Unop(kind) => arith::unop(state, kind),

        Br => branch::br(state, instr),
        BranchOnValue { on_true } => branch::branch_on_value(state, instr, on_true),
        BranchCompare(kind) => branch::branch_compare(state, instr, kind),
        Switch => branch::switch(state, instr),
        Ret => branch::ret(state),
        Leave => {
            let target = target(instr)?;
            state.leave(target)
        }
        Endfinally => state.end_finally(),
        Throw => state.throw(),
        Rethrow => state.rethrow(),

        Call { is_virtual } => calls::call(state, instr, is_virtual),
        Newobj => calls::newobj(state, instr),
        Ldftn => calls::ldftn(state, instr),

        Box => objects::box_value(state),
        Unbox { any } => objects::unbox(state, instr, any),
        Isinst => objects::isinst(state, instr),
        Castclass => objects::castclass(state, instr),
        Initobj => objects::initobj(state, instr),
        Ldtoken => objects::ldtoken(state, instr),

        Ldfld { is_static } => fields::ldfld(state, instr, is_static),
        Ldflda { is_static } => fields::ldflda(state, instr, is_static),
        Stfld { is_static } => fields::stfld(state, instr, is_static),
        Ldind => fields::ldind(state),
        Stind => fields::stind(state),

        Ldelem => arrays::ldelem(state),
        Ldelema => arrays::ldelema(state),
        Stelem => arrays::stelem(state),
        Ldlen => arrays::ldlen(state),
        Newarr => arrays::newarr(state, instr),

        Unsupported => Err(Error::UnsupportedOpcode {
            opcode: instr.opcode.to_string(),
            offset: instr.offset,
        }),
    }
}

// ---- operand helpers -------------------------------------------------------------------

fn bad_operand(instr: &CilInstruction, expected: &str) -> Error {
    Error::invalid_operand(
        instr.opcode.mnemonic(),
        instr.offset,
        format!("{}, found {}", expected, instr.operand_kind()),
    )
}

fn target(instr: &CilInstruction) -> Result<i32> {
    match instr.operand {
        Operand::Target(t) => Ok(t),
        _ => Err(bad_operand(instr, "branch target")),
    }
}

fn method_operand(instr: &CilInstruction) -> Result<&MethodRef> {
    match &instr.operand {
        Operand::Method(m) => Ok(m),
        _ => Err(bad_operand(instr, "method")),
    }
}

fn field_operand(instr: &CilInstruction) -> Result<&FieldRef> {
    match &instr.operand {
        Operand::Field(f) => Ok(f),
        _ => Err(bad_operand(instr, "field")),
    }
}

fn type_operand(instr: &CilInstruction) -> Result<&TypeRef> {
    match &instr.operand {
        Operand::Type(t) => Ok(t),
        _ => Err(bad_operand(instr, "type")),
    }
}

// ---- shared IR builders ----------------------------------------------------------------

/// `_ = *object`, the null-check witness before a member access
fn dereference(state: &mut ProgramState<'_>, object: &Expression, ty: &Typ) -> Instruction {
    let id = state.fresh_identifier(IdentKind::None);
    Instruction::load(id, object.clone(), ty.strip_pointer(), state.location.clone())
}

/// `owner.Decl.name`, typed by the declaring type
pub(super) fn field_expression(owner: Expression, field: &FieldRef) -> Result<Expression> {
    Ok(Expression::lfield(
        owner,
        FieldIdentifier::new(
            field_compatible_name(field),
            Typ::from_type_ref_no_pointer(&field.field_type)?,
        ),
        Typ::from_type_ref_no_pointer(&field.declaring_type)?,
    ))
}

fn field_compatible_name(field: &FieldRef) -> String {
    format!("{}.{}", field.declaring_type.compatible_full_name(), field.name)
}

/// Global standing for the class of a static field
fn static_owner(field: &FieldRef) -> Expression {
    Expression::lvar(ProgramVariable::global(
        field.declaring_type.compatible_full_name(),
    ))
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::bytecode::{Opcode, TypeTable};
    use crate::ir::IdAllocator;

    #[test]
    fn test_unsupported_opcode_is_reported() {
        let m = method(vec![], vec![], vec![op(0, Opcode::Calli), op(1, Opcode::Ret)]);
        let types = TypeTable::new();
        let ids = IdAllocator::new();
        let mut state = ProgramState::new(&m, &types, &ids, 1000).unwrap();
        state.push_continuation(0, None);
        state.pop_continuation();
        let err = translate_instruction(&mut state, &m.instructions[0]).unwrap_err();
        assert!(matches!(err, Error::UnsupportedOpcode { ref opcode, offset: 0 } if opcode == "calli"));
        assert!(err.is_unknown_instruction());
    }

    #[test]
    fn test_wrong_operand_shape() {
        let m = method(
            vec![],
            vec![],
            vec![op_with(0, Opcode::Ldfld, Operand::Int32(3)), op(5, Opcode::Ret)],
        );
        let types = TypeTable::new();
        let ids = IdAllocator::new();
        let mut state = ProgramState::new(&m, &types, &ids, 1000).unwrap();
        state.push(Expression::null(), Typ::object());
        state.push_continuation(0, None);
        state.pop_continuation();
        let err = translate_instruction(&mut state, &m.instructions[0]).unwrap_err();
        assert!(matches!(err, Error::InvalidOperand { .. }));
        // nothing was popped
        assert_eq!(state.stack_len(), 1);
    }

    #[test]
    fn test_field_expression_names() {
        let field = FieldRef {
            declaring_type: TypeRef::class("Outer/Inner"),
            name: "count".to_string(),
            field_type: TypeRef::primitive("System.Int32"),
            is_static: false,
        };
        let e = field_expression(Expression::null(), &field).unwrap();
        match e {
            Expression::Lfield { identifier, ty, .. } => {
                assert_eq!(identifier.field_name, "Outer$Inner.count");
                assert_eq!(ty, Typ::structure("Outer$Inner"));
            }
            other => panic!("unexpected {}", other),
        }
    }
}
