//! Object allocation, boxing and type tests

use super::{bad_operand, field_expression, type_operand, ProgramState};
use crate::bytecode::{FieldRef, Instruction as CilInstruction, Operand, TokenKind, TypeRef};
use crate::error::{Error, Result};
use crate::ir::expr::{BUILTIN_INSTANCEOF, BUILTIN_NEW, CONSTRUCTOR_NAME};
use crate::ir::types::OBJECT_TYPE_NAME;
use crate::ir::{
    CallArg, CallFlags, Const, Expression, IdentKind, Identifier, Instruction, IntRepresentation,
    NodeKind, ProcedureName, ReferenceKind, SizeofKind, StatementNodeKind, Typ,
};
use std::collections::HashSet;

impl<'a> ProgramState<'a> {
    /// `n$o = __new(sizeof(T))` followed by the parameterless constructor, as one Call node.
    ///
    /// The node becomes the previous node; the returned identifier holds the object.
    pub(crate) fn allocate_object(&mut self, ty: &Typ) -> Identifier {
        let type_name = ty.strip_pointer().to_string();
        let (allocation, object) = allocation_call(self, ty);
        let constructor = Instruction::call(
            self.fresh_identifier(IdentKind::Normal),
            Typ::Tvoid,
            Expression::fun(ProcedureName {
                method_name: CONSTRUCTOR_NAME.to_string(),
                parameters: vec![],
                class_name: type_name.clone(),
                return_type: "System.Void".to_string(),
                is_static: false,
            }),
            vec![CallArg::new(Expression::var(object.clone()), ty.clone())],
            CallFlags::default(),
            self.location.clone(),
        );

        let mut node = self.new_node(NodeKind::commented(
            StatementNodeKind::Call,
            format!("System.Void {}::.ctor()", type_name),
        ));
        node.instructions = vec![allocation, constructor];
        self.previous = self.register_node(node);
        object
    }
}

/// `n = __new(sizeof(T, exact))` typed `ty`
pub(super) fn allocation_call(state: &mut ProgramState<'_>, ty: &Typ) -> (Instruction, Identifier) {
    let object = state.fresh_identifier(IdentKind::Normal);
    let call = Instruction::call(
        object.clone(),
        ty.clone(),
        Expression::fun(BUILTIN_NEW.clone()),
        vec![CallArg::new(
            Expression::sizeof(ty.strip_pointer(), SizeofKind::exact),
            ty.clone(),
        )],
        CallFlags::default(),
        state.location.clone(),
    );
    (call, object)
}

/// Zero of an integer or float type
fn zero_of(ty: &Typ) -> Option<Expression> {
    match ty {
        Typ::Tint { kind, .. } => Some(Expression::Const(Const::Int(IntRepresentation {
            value: 0,
            unsigned: kind.is_unsigned(),
            is_pointer: false,
        }))),
        Typ::Tfloat { .. } => Some(Expression::float(0.0)),
        _ => None,
    }
}

pub(super) fn box_value(state: &mut ProgramState<'_>) -> Result<()> {
    let (value, ty) = state.pop()?;
    let boxed = Typ::boxed(Typ::structure(OBJECT_TYPE_NAME), value, ty);
    let object = state.allocate_object(&boxed);
    state.push(Expression::var(object), boxed);
    state.append = true;
    state.push_next(None)
}

pub(super) fn unbox(state: &mut ProgramState<'_>, instr: &CilInstruction, any: bool) -> Result<()> {
    let target = Typ::from_type_ref_no_pointer(type_operand(instr)?)?;
    let (_, ty) = state.pop()?;
    match ty.as_boxed() {
        Some((value, value_type)) => {
            let value = value.clone();
            let pushed = if any {
                value_type.clone()
            } else {
                Typ::address(value_type.clone(), value.clone(), ReferenceKind::Generic)
            };
            state.push(value, pushed);
        }
        None => {
            // the boxed value is not known here, stand in the type's zero
            let zero = zero_of(&target)
                .ok_or_else(|| Error::unhandled_type("unbox of an unknown object", &target))?;
            state.push(zero, target);
        }
    }
    state.push_next(None)
}

pub(super) fn isinst(state: &mut ProgramState<'_>, instr: &CilInstruction) -> Result<()> {
    let checked = Typ::from_type_ref_no_pointer(type_operand(instr)?)?;
    let (value, ty) = state.pop()?;
    let result = state.fresh_identifier(IdentKind::Normal);
    let call = Instruction::call(
        result.clone(),
        Typ::isinst_bool(),
        Expression::fun(BUILTIN_INSTANCEOF.clone()),
        vec![
            CallArg::new(value, ty),
            CallArg::new(Expression::sizeof(checked, SizeofKind::instof), Typ::Tvoid),
        ],
        CallFlags::default(),
        state.location.clone(),
    );
    let node = state.add_method_body_instructions(vec![call]);
    state.push(Expression::var(result), Typ::isinst_bool());
    state.push_next(Some(node))
}

pub(super) fn castclass(state: &mut ProgramState<'_>, instr: &CilInstruction) -> Result<()> {
    let ty = Typ::from_type_ref(type_operand(instr)?)?;
    let (value, _) = state.pop()?;
    state.push(
        Expression::Cast {
            ty: ty.clone(),
            expression: Box::new(value),
        },
        ty,
    );
    state.push_next(None)
}

pub(super) fn ldtoken(state: &mut ProgramState<'_>, instr: &CilInstruction) -> Result<()> {
    let handle = match &instr.operand {
        Operand::Token(TokenKind::Type(_)) | Operand::Type(_) => "System.RuntimeTypeHandle",
        Operand::Token(TokenKind::Field(_)) | Operand::Field(_) => "System.RuntimeFieldHandle",
        Operand::Token(TokenKind::Method(_)) | Operand::Method(_) => "System.RuntimeMethodHandle",
        _ => return Err(bad_operand(instr, "metadata token")),
    };
    let ty = Typ::ptr(Typ::structure(handle));
    let object = state.allocate_object(&ty);
    state.push(Expression::var(object), ty);
    state.append = true;
    state.push_next(None)
}

pub(super) fn initobj(state: &mut ProgramState<'_>, instr: &CilInstruction) -> Result<()> {
    let struct_type = type_operand(instr)?;
    let (_, pointer) = state.pop()?;
    let (address, inner) = match pointer.as_address() {
        Some((value, _, inner)) => (value.clone(), inner.clone()),
        None => return Err(Error::unhandled_type("initobj target", &pointer)),
    };

    let mut instructions = Vec::new();
    let (allocation, object) = allocation_call(state, &Typ::from_type_ref(struct_type)?);
    instructions.push(allocation);
    let types = state.types;
    if let Some(fields) = types.struct_fields(&struct_type.full_name()) {
        let mut parents = HashSet::from([struct_type.full_name()]);
        initialize_fields(state, &object, fields, &mut parents, &mut instructions)?;
    }
    instructions.push(Instruction::store(
        address,
        Expression::var(object),
        inner,
        state.location.clone(),
    ));

    let node = state.add_method_body_instructions(instructions);
    state.push_next(Some(node))
}

/// Store the default of every field of `owner`, allocating nested structs
fn initialize_fields(
    state: &mut ProgramState<'_>,
    owner: &Identifier,
    fields: &[FieldRef],
    parents: &mut HashSet<String>,
    instructions: &mut Vec<Instruction>,
) -> Result<()> {
    let types = state.types;
    for field in fields {
        let target = field_expression(Expression::var(owner.clone()), field)?;
        let declaring = Typ::from_type_ref_no_pointer(&field.declaring_type)?;
        let field_name = field.field_type.full_name();

        if let Some(nested) = types.struct_fields(&field_name) {
            if !parents.insert(field_name.clone()) {
                return Err(Error::unhandled_type("cyclic struct", field_name));
            }
            let (allocation, value) = allocation_call(state, &Typ::from_type_ref(&field.field_type)?);
            instructions.push(allocation);
            instructions.push(Instruction::store(
                target,
                Expression::var(value.clone()),
                declaring,
                state.location.clone(),
            ));
            initialize_fields(state, &value, nested, parents, instructions)?;
            parents.remove(&field_name);
        } else {
            let default = default_value(&field.field_type)?;
            instructions.push(Instruction::store(target, default, declaring, state.location.clone()));
        }
    }
    Ok(())
}

/// Default value of a non-struct field
fn default_value(ty: &TypeRef) -> Result<Expression> {
    if matches!(ty, TypeRef::GenericParam { .. }) {
        return Err(Error::unhandled_type("initobj generic field", ty.full_name()));
    }
    let sil = Typ::from_type_ref_no_pointer(ty)?;
    if let Some(zero) = zero_of(&sil) {
        return Ok(zero);
    }
    match sil {
        Typ::Tstruct { .. } | Typ::Tarray { .. } => Ok(Expression::null()),
        other => Err(Error::unhandled_type("initobj field", other)),
    }
}
