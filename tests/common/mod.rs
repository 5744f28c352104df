//! Shared builders for the integration tests

#![allow(dead_code)]

use cilsil::bytecode::{
    ExceptionHandlerEntry, FieldRef, HandlerKind, Instruction, MethodDef, MethodRef, Opcode,
    Operand, Parameter, Program, SequencePoint, TypeRef,
};
use cilsil::ir::{Cfg, CfgNode, NodeKind, ProcedureDescription, PruneNodeKind, StatementNodeKind};
use cilsil::{TranslateOptions, TranslationReport, Translator};

pub fn int32() -> TypeRef {
    TypeRef::primitive("System.Int32")
}

pub fn boolean() -> TypeRef {
    TypeRef::primitive("System.Boolean")
}

/// Method reference on class `C`
pub fn method_ref(name: &str, parameters: Vec<Parameter>, return_type: TypeRef, has_this: bool) -> MethodRef {
    MethodRef {
        declaring_type: TypeRef::class("C"),
        name: name.to_string(),
        parameters,
        return_type,
        has_this,
        declaring_type_is_delegate: false,
    }
}

/// Static `C::name` with one sequence point, so it is never skipped
pub fn method(
    name: &str,
    parameters: Vec<Parameter>,
    return_type: TypeRef,
    locals: Vec<TypeRef>,
    body: Vec<Instruction>,
) -> MethodDef {
    MethodDef {
        reference: method_ref(name, parameters, return_type, false),
        access: Default::default(),
        is_abstract: false,
        locals,
        instructions: body,
        exception_handlers: vec![],
        sequence_points: vec![SequencePoint {
            offset: 0,
            start_line: 10,
            start_column: 5,
            document: "C.cs".to_string(),
        }],
        declaring_fields: vec![],
    }
}

pub fn op(offset: i32, opcode: Opcode) -> Instruction {
    Instruction::simple(offset, opcode)
}

pub fn op_with(offset: i32, opcode: Opcode, operand: Operand) -> Instruction {
    Instruction::new(offset, opcode, operand)
}

pub fn branch(offset: i32, opcode: Opcode, target: i32) -> Instruction {
    Instruction::new(offset, opcode, Operand::Target(target))
}

pub fn field(owner: &str, name: &str, ty: TypeRef) -> FieldRef {
    FieldRef {
        declaring_type: TypeRef::class(owner),
        name: name.to_string(),
        field_type: ty,
        is_static: false,
    }
}

pub fn handler(
    kind: HandlerKind,
    try_range: (i32, i32),
    handler_range: (i32, i32),
    catch_type: Option<&str>,
) -> ExceptionHandlerEntry {
    ExceptionHandlerEntry {
        kind,
        try_start: try_range.0,
        try_end: try_range.1,
        handler_start: handler_range.0,
        handler_end: handler_range.1,
        catch_type: catch_type.map(TypeRef::class),
    }
}

pub fn options() -> TranslateOptions {
    TranslateOptions {
        skip_methods_without_debug_info: false,
        ..TranslateOptions::sequential()
    }
}

/// Translate `methods` sequentially
pub fn translate(methods: Vec<MethodDef>) -> TranslationReport {
    let program = Program {
        methods,
        ..Default::default()
    };
    Translator::new(options()).translate_program(&program)
}

/// Translate one method, panicking with the recorded failure if it was abandoned
pub fn translate_one(m: MethodDef) -> (Cfg, String) {
    let signature = m.signature();
    let report = translate(vec![m]);
    assert!(
        report.failures.is_empty(),
        "translation failed: {:?}",
        report.failures
    );
    (report.cfg, signature)
}

pub fn procedure<'a>(cfg: &'a Cfg, signature: &str) -> &'a ProcedureDescription {
    cfg.procs
        .get(signature)
        .unwrap_or_else(|| panic!("no procedure {}", signature))
}

pub fn nodes<'a>(cfg: &'a Cfg, signature: &str) -> Vec<&'a CfgNode> {
    cfg.procedure_nodes(procedure(cfg, signature))
}

pub fn node(cfg: &Cfg, id: i64) -> &CfgNode {
    cfg.node(id).unwrap_or_else(|| panic!("no node {}", id))
}

pub fn statements<'a>(nodes: &[&'a CfgNode], kind: StatementNodeKind) -> Vec<&'a CfgNode> {
    nodes.iter().copied().filter(|n| n.is_statement(kind)).collect()
}

pub fn prunes<'a>(nodes: &[&'a CfgNode], kind: PruneNodeKind) -> Vec<&'a CfgNode> {
    nodes
        .iter()
        .copied()
        .filter(|n| matches!(n.kind, NodeKind::PruneNode { prune_node_kind, .. } if prune_node_kind == kind))
        .collect()
}

pub fn count_kind(nodes: &[&CfgNode], predicate: impl Fn(&NodeKind) -> bool) -> usize {
    nodes.iter().filter(|n| predicate(&n.kind)).count()
}

pub fn is_true_branch(node: &CfgNode) -> bool {
    matches!(node.kind, NodeKind::PruneNode { true_branch: true, .. })
}
