//! Input model: method bodies as handed over by the metadata reader
//!
//! Plain serde data. A reader for a concrete binary format produces these values (or their JSON
//! form); the translator never looks at raw metadata tables.

pub mod opcode;

pub use opcode::{Opcode, OpcodeFamily};

use crate::ir::ProcedureAccessKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

const OBJECT_FULL_NAME: &str = "System.Object";
const VOID_FULL_NAME: &str = "System.Void";

/// Reference to a source-level type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum TypeRef {
    /// Built-in value type such as `System.Int32`
    Primitive { name: String },
    Void,
    /// Class, struct, interface or delegate; nested types use `/`
    Class { name: String },
    Array { element: Box<TypeRef> },
    ByRef { element: Box<TypeRef> },
    GenericParam { name: String },
}

impl TypeRef {
    pub fn primitive(name: impl Into<String>) -> Self {
        TypeRef::Primitive { name: name.into() }
    }

    pub fn class(name: impl Into<String>) -> Self {
        TypeRef::Class { name: name.into() }
    }

    pub fn array(element: TypeRef) -> Self {
        TypeRef::Array {
            element: Box::new(element),
        }
    }

    pub fn by_ref(element: TypeRef) -> Self {
        TypeRef::ByRef {
            element: Box::new(element),
        }
    }

    pub fn is_by_ref(&self) -> bool {
        matches!(self, TypeRef::ByRef { .. })
    }

    pub fn is_void(&self) -> bool {
        match self {
            TypeRef::Void => true,
            TypeRef::Class { name } => name == VOID_FULL_NAME,
            _ => false,
        }
    }

    /// Source full name
    pub fn full_name(&self) -> String {
        match self {
            TypeRef::Primitive { name } | TypeRef::Class { name } => name.clone(),
            TypeRef::Void => VOID_FULL_NAME.to_string(),
            TypeRef::Array { element } => format!("{}[]", element.full_name()),
            TypeRef::ByRef { element } => format!("{}&", element.full_name()),
            TypeRef::GenericParam { name } => name.clone(),
        }
    }

    /// Full name usable in procedure and field names: nested separators become `$`, generic
    /// parameters become `System.Object`
    pub fn compatible_full_name(&self) -> String {
        match self {
            TypeRef::Primitive { name } => name.clone(),
            TypeRef::Void => VOID_FULL_NAME.to_string(),
            TypeRef::Class { name } => name.replace('/', "$"),
            TypeRef::Array { element } => format!("{}[]", element.compatible_full_name()),
            TypeRef::ByRef { element } => format!("{}&", element.compatible_full_name()),
            TypeRef::GenericParam { .. } => OBJECT_FULL_NAME.to_string(),
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_name())
    }
}

/// Field reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    pub declaring_type: TypeRef,
    pub name: String,
    pub field_type: TypeRef,
    #[serde(default)]
    pub is_static: bool,
}

impl FieldRef {
    /// `Declaring.Type.name`
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.declaring_type.compatible_full_name(), self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeRef,
}

impl Parameter {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Parameter {
            name: name.into(),
            ty,
        }
    }
}

/// Method reference as it appears in a call site or a definition
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodRef {
    pub declaring_type: TypeRef,
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    pub return_type: TypeRef,
    #[serde(default)]
    pub has_this: bool,
    /// Set when the declaring type derives from `System.MulticastDelegate`
    #[serde(default)]
    pub declaring_type_is_delegate: bool,
}

impl MethodRef {
    /// `Ret Declaring.Type::Name(P1,P2)`
    pub fn signature(&self) -> String {
        let params = self
            .parameters
            .iter()
            .map(|p| p.ty.compatible_full_name())
            .collect::<Vec<_>>()
            .join(",");
        format!(
            "{} {}::{}({})",
            self.return_type.compatible_full_name(),
            self.declaring_type.compatible_full_name(),
            self.name,
            params
        )
    }

    pub fn is_constructor(&self) -> bool {
        self.name == crate::ir::expr::CONSTRUCTOR_NAME
    }

    /// Whether the declaring type is a delegate, by flag or by name
    pub fn declares_delegate(&self) -> bool {
        self.declaring_type_is_delegate
            || matches!(&self.declaring_type, TypeRef::Class { name }
                if name.ends_with("Delegate") || name.starts_with("System.Func") || name.starts_with("System.Action"))
    }

    /// Number of stack entries a call consumes
    pub fn stack_arity(&self) -> usize {
        self.parameters.len() + usize::from(self.has_this)
    }
}

/// Token operand of `ldtoken`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenKind {
    Type(TypeRef),
    Field(FieldRef),
    Method(MethodRef),
}

/// Instruction operand
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    #[default]
    None,
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    String(String),
    /// Branch target offset
    Target(i32),
    /// Jump table offsets
    Switch(Vec<i32>),
    Local(u16),
    Arg(u16),
    Type(TypeRef),
    Field(FieldRef),
    Method(MethodRef),
    Token(TokenKind),
}

impl Operand {
    fn describe(&self) -> &'static str {
        match self {
            Operand::None => "no operand",
            Operand::Int32(_) => "int32",
            Operand::Int64(_) => "int64",
            Operand::Float32(_) => "float32",
            Operand::Float64(_) => "float64",
            Operand::String(_) => "string",
            Operand::Target(_) => "branch target",
            Operand::Switch(_) => "switch table",
            Operand::Local(_) => "local index",
            Operand::Arg(_) => "argument index",
            Operand::Type(_) => "type",
            Operand::Field(_) => "field",
            Operand::Method(_) => "method",
            Operand::Token(_) => "token",
        }
    }
}

/// One instruction of a method body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub offset: i32,
    pub opcode: Opcode,
    #[serde(default)]
    pub operand: Operand,
}

impl Instruction {
    pub fn new(offset: i32, opcode: Opcode, operand: Operand) -> Self {
        Instruction {
            offset,
            opcode,
            operand,
        }
    }

    pub fn simple(offset: i32, opcode: Opcode) -> Self {
        Instruction::new(offset, opcode, Operand::None)
    }

    pub fn operand_kind(&self) -> &'static str {
        self.operand.describe()
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IL_{:04x}: {}", self.offset, self.opcode)?;
        match &self.operand {
            Operand::None => Ok(()),
            Operand::Int32(v) => write!(f, " {}", v),
            Operand::Int64(v) => write!(f, " {}", v),
            Operand::Float32(v) => write!(f, " {}", v),
            Operand::Float64(v) => write!(f, " {}", v),
            Operand::String(s) => write!(f, " \"{}\"", s),
            Operand::Target(t) => write!(f, " IL_{:04x}", t),
            Operand::Switch(ts) => {
                let ts = ts.iter().map(|t| format!("IL_{:04x}", t)).collect::<Vec<_>>();
                write!(f, " ({})", ts.join(", "))
            }
            Operand::Local(i) => write!(f, " V_{}", i),
            Operand::Arg(i) => write!(f, " A_{}", i),
            Operand::Type(t) => write!(f, " {}", t),
            Operand::Field(field) => write!(f, " {}", field.full_name()),
            Operand::Method(m) => write!(f, " {}", m.signature()),
            Operand::Token(_) => write!(f, " <token>"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandlerKind {
    Catch,
    Finally,
    Filter,
    Fault,
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Exception handler table entry; both ends are exclusive offsets
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExceptionHandlerEntry {
    pub kind: HandlerKind,
    pub try_start: i32,
    pub try_end: i32,
    pub handler_start: i32,
    pub handler_end: i32,
    #[serde(default)]
    pub catch_type: Option<TypeRef>,
}

/// Debug location of the instruction at `offset`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencePoint {
    pub offset: i32,
    pub start_line: i32,
    pub start_column: i32,
    pub document: String,
}

/// Method with its body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDef {
    pub reference: MethodRef,
    #[serde(default)]
    pub access: ProcedureAccessKind,
    #[serde(default)]
    pub is_abstract: bool,
    #[serde(default)]
    pub locals: Vec<TypeRef>,
    #[serde(default)]
    pub instructions: Vec<Instruction>,
    #[serde(default)]
    pub exception_handlers: Vec<ExceptionHandlerEntry>,
    #[serde(default)]
    pub sequence_points: Vec<SequencePoint>,
    /// Fields of the declaring type
    #[serde(default)]
    pub declaring_fields: Vec<FieldRef>,
}

impl MethodDef {
    pub fn signature(&self) -> String {
        self.reference.signature()
    }

    /// Position of the instruction at `offset`
    pub fn index_of_offset(&self, offset: i32) -> Option<usize> {
        self.instructions
            .binary_search_by_key(&offset, |i| i.offset)
            .ok()
    }

    pub fn instruction(&self, index: usize) -> Option<&Instruction> {
        self.instructions.get(index)
    }

    /// Instruction following the one at `index`
    pub fn next(&self, index: usize) -> Option<&Instruction> {
        self.instructions.get(index + 1)
    }

    /// Instruction preceding the one at `index`
    pub fn previous(&self, index: usize) -> Option<&Instruction> {
        index.checked_sub(1).and_then(|i| self.instructions.get(i))
    }

    pub fn sequence_point(&self, offset: i32) -> Option<&SequencePoint> {
        self.sequence_points.iter().find(|sp| sp.offset == offset)
    }

    pub fn has_debug_info(&self) -> bool {
        !self.sequence_points.is_empty()
    }

    /// Type of argument `index`, counting `this` as argument 0 of instance methods
    pub fn argument(&self, index: u16) -> Option<(String, TypeRef)> {
        let index = index as usize;
        if self.reference.has_this {
            if index == 0 {
                return Some((
                    crate::ir::expr::THIS_IDENTIFIER.to_string(),
                    self.reference.declaring_type.clone(),
                ));
            }
            self.reference
                .parameters
                .get(index - 1)
                .map(|p| (p.name.clone(), p.ty.clone()))
        } else {
            self.reference
                .parameters
                .get(index)
                .map(|p| (p.name.clone(), p.ty.clone()))
        }
    }
}

/// Field layouts of struct types, keyed by type full name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeTable {
    #[serde(default)]
    pub structs: HashMap<String, Vec<FieldRef>>,
}

impl TypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, fields: Vec<FieldRef>) {
        self.structs.insert(name.into(), fields);
    }

    /// Instance fields of a struct type, if its layout is known
    pub fn struct_fields(&self, name: &str) -> Option<&[FieldRef]> {
        self.structs.get(name).map(|f| f.as_slice())
    }

    pub fn is_struct(&self, name: &str) -> bool {
        self.structs.contains_key(name)
    }
}

/// Whole input: methods plus the type table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    #[serde(default)]
    pub types: TypeTable,
    #[serde(default)]
    pub methods: Vec<MethodDef>,
}

impl Program {
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
