//! Procedure descriptions

use super::expr::{ItemAnnotation, ProcedureName};
use super::instruction::{Location, SourceFile};
use super::node::NodeId;
use super::types::Typ;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcedureAccessKind {
    #[default]
    Default,
    Private,
    Public,
    Protected,
}

/// Formal parameter or captured variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableDescription {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: Typ,
}

impl fmt::Display for VariableDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.ty)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Local {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: Typ,
    pub modify_in_block: bool,
    pub is_const_expr: bool,
}

impl Local {
    pub fn new(name: impl Into<String>, ty: Typ) -> Self {
        Local {
            name: name.into(),
            ty,
            modify_in_block: false,
            is_const_expr: false,
        }
    }
}

impl fmt::Display for Local {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{ name= {}; typ= {}; modify_in_block= {}; is_constexp= {}}}",
            self.name, self.ty, self.modify_in_block, self.is_const_expr
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodAnnotation {
    pub return_value: ItemAnnotation,
    pub params: Vec<ItemAnnotation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcedureAttributes {
    pub access: ProcedureAccessKind,
    pub proc_name: ProcedureName,
    pub captured: Vec<VariableDescription>,
    pub exceptions: Vec<String>,
    pub formals: Vec<VariableDescription>,
    pub method_annotations: MethodAnnotation,
    pub const_formals: Vec<i32>,
    pub locals: Vec<Local>,
    pub is_abstract: bool,
    pub is_bridge_method: bool,
    pub is_defined: bool,
    pub is_generated: bool,
    pub is_objc_instance_method: bool,
    pub is_synthetic_method: bool,
    pub is_cpp_no_except_method: bool,
    pub is_java_synchronized_method: bool,
    pub is_model: bool,
    pub is_specialized: bool,
    pub is_variadic: bool,
    pub loc: Location,
    pub translation_unit: SourceFile,
    pub ret_type: Typ,
}

impl ProcedureAttributes {
    pub fn new(proc_name: ProcedureName, loc: Location) -> Self {
        ProcedureAttributes {
            access: ProcedureAccessKind::Default,
            proc_name,
            captured: Vec::new(),
            exceptions: Vec::new(),
            formals: Vec::new(),
            method_annotations: MethodAnnotation::default(),
            const_formals: Vec::new(),
            locals: Vec::new(),
            is_abstract: false,
            is_bridge_method: false,
            is_defined: true,
            is_generated: false,
            is_objc_instance_method: false,
            is_synthetic_method: false,
            is_cpp_no_except_method: false,
            is_java_synchronized_method: false,
            is_model: false,
            is_specialized: false,
            is_variadic: false,
            translation_unit: loc.source_file.clone(),
            loc,
            ret_type: Typ::Tvoid,
        }
    }

    pub fn find_local(&self, name: &str) -> Option<&Local> {
        self.locals.iter().find(|l| l.name == name)
    }
}

impl fmt::Display for ProcedureAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let formals = self
            .formals
            .iter()
            .map(|v| format!("({})", v))
            .collect::<Vec<_>>()
            .join(", ");
        let locals = self
            .locals
            .iter()
            .map(|l| l.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        write!(
            f,
            "{{\nProcName: {}\nAccess: {:?}\nFormals: {}\nLocation: {}\nLocals: {}\nReturnType: {}\n}}",
            self.proc_name, self.access, formals, self.loc, locals, self.ret_type
        )
    }
}

/// One translated method
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcedureDescription {
    pub pd_id: i64,
    pub pd_attributes: ProcedureAttributes,
    pub pd_nodes: Vec<NodeId>,
    pub pd_start_node: NodeId,
    pub pd_exit_node: NodeId,
    pub pd_exn_node: NodeId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::expr::BUILTIN_NEW;

    #[test]
    fn test_attribute_defaults() {
        let attrs = ProcedureAttributes::new(BUILTIN_NEW.clone(), Location::new(1, 1, "a.cs"));
        assert!(attrs.is_defined);
        assert_eq!(attrs.access, ProcedureAccessKind::Default);
        assert_eq!(attrs.translation_unit.path, "a.cs");
        let json = serde_json::to_value(&attrs).unwrap();
        assert_eq!(json["access"], "Default");
        assert_eq!(json["ret_type"]["type_kind"], "Tvoid");
        assert!(json["method_annotations"]["return_value"]["annotations"].is_array());
    }
}
