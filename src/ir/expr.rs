//! SIL expressions and the names they refer to

use super::types::{Typ, TypeName};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;
use std::hash::{Hash, Hasher};

pub const RETURN_IDENTIFIER: &str = "return";
pub const THIS_IDENTIFIER: &str = "this";
pub const CONSTRUCTOR_NAME: &str = ".ctor";
/// Prefix of translator-synthesized locals
pub const SYNTHETIC_IDENTIFIER: &str = "bcvar";
/// Prefix of the per-handler catch variables
pub const CATCH_VAR_IDENTIFIER: &str = "CatchVar";
const BUILTIN_CLASS_NAME: &str = "BuiltIn";

/// Kinds of temporary identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdentKind {
    None,
    Primed,
    Normal,
    Footprint,
}

impl IdentKind {
    pub fn standard_name(self) -> &'static str {
        match self {
            IdentKind::None | IdentKind::Normal => "n",
            IdentKind::Primed => "p",
            IdentKind::Footprint => "f",
        }
    }
}

/// Temporary identifier, `n$3`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier {
    pub kind: IdentKind,
    pub name: String,
    pub stamp: i32,
}

impl Identifier {
    pub fn new(kind: IdentKind, stamp: i32) -> Self {
        Identifier {
            kind,
            name: kind.standard_name().to_string(),
            stamp,
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kind == IdentKind::None {
            write!(f, "_")
        } else {
            write!(f, "{}${}", self.name, self.stamp)
        }
    }
}

/// Fully qualified procedure name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcedureName {
    pub method_name: String,
    pub parameters: Vec<String>,
    pub class_name: String,
    pub return_type: String,
    pub is_static: bool,
}

impl ProcedureName {
    fn builtin(name: &str) -> Self {
        ProcedureName {
            method_name: name.to_string(),
            parameters: Vec::new(),
            class_name: BUILTIN_CLASS_NAME.to_string(),
            return_type: String::new(),
            is_static: true,
        }
    }
}

impl fmt::Display for ProcedureName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_static {
            write!(f, "static ")?;
        }
        if !self.return_type.trim().is_empty() {
            write!(f, "{} ", self.return_type)?;
        }
        write!(
            f,
            "{}.{}({})",
            self.class_name,
            self.method_name,
            self.parameters.join(", ")
        )
    }
}

lazy_static! {
    pub static ref BUILTIN_NEW: ProcedureName = ProcedureName::builtin("__new");
    pub static ref BUILTIN_NEW_ARRAY: ProcedureName = ProcedureName::builtin("__new_array");
    pub static ref BUILTIN_UNWRAP_EXCEPTION: ProcedureName =
        ProcedureName::builtin("__unwrap_exception");
    pub static ref BUILTIN_INSTANCEOF: ProcedureName = ProcedureName::builtin("__instanceof");
    pub static ref BUILTIN_GET_ARRAY_LENGTH: ProcedureName =
        ProcedureName::builtin("__get_array_length");
}

/// Program variable, the target of an `Lvar`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "pv_kind")]
pub enum ProgramVariable {
    LocalVariable {
        pv_name: String,
        proc_name: ProcedureName,
    },
    GlobalVariable {
        pv_name: String,
    },
}

impl ProgramVariable {
    pub fn local(name: impl Into<String>, proc_name: &ProcedureName) -> Self {
        ProgramVariable::LocalVariable {
            pv_name: name.into(),
            proc_name: proc_name.clone(),
        }
    }

    pub fn global(name: impl Into<String>) -> Self {
        ProgramVariable::GlobalVariable {
            pv_name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ProgramVariable::LocalVariable { pv_name, .. }
            | ProgramVariable::GlobalVariable { pv_name } => pv_name,
        }
    }
}

impl fmt::Display for ProgramVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Annotation {
    pub class_name: String,
    pub params: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemAnnotationEntry {
    pub annotation: Annotation,
    pub visible: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemAnnotation {
    pub annotations: Vec<ItemAnnotationEntry>,
}

/// Field name plus type, as used by `Lfield`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldIdentifier {
    pub field_name: String,
    #[serde(rename = "type")]
    pub ty: Typ,
    #[serde(default)]
    pub annotation: ItemAnnotation,
}

impl FieldIdentifier {
    pub fn new(field_name: impl Into<String>, ty: Typ) -> Self {
        FieldIdentifier {
            field_name: field_name.into(),
            ty,
            annotation: ItemAnnotation::default(),
        }
    }
}

impl fmt::Display for FieldIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.field_name, self.ty)
    }
}

/// Integer constant
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntRepresentation {
    pub value: i64,
    pub unsigned: bool,
    pub is_pointer: bool,
}

impl fmt::Display for IntRepresentation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.value == 0 && self.is_pointer {
            write!(f, "null")
        } else {
            write!(f, "{}", self.value)
        }
    }
}

/// Float constant compared bitwise
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FloatValue(pub f64);

impl FloatValue {
    /// Infinities are clamped to the single precision range
    pub fn new(value: f64) -> Self {
        if value == f64::INFINITY {
            FloatValue(f32::MAX as f64)
        } else if value == f64::NEG_INFINITY {
            FloatValue(f32::MIN as f64)
        } else {
            FloatValue(value)
        }
    }
}

impl PartialEq for FloatValue {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for FloatValue {}

impl Hash for FloatValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstKind {
    Int,
    Fun,
    Str,
    Float,
    Class,
}

/// Constant value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "ConstRepr", try_from = "ConstRepr")]
pub enum Const {
    Int(IntRepresentation),
    Fun(ProcedureName),
    Str(String),
    Float(FloatValue),
    Class(TypeName),
}

impl Const {
    pub fn kind(&self) -> ConstKind {
        match self {
            Const::Int(_) => ConstKind::Int,
            Const::Fun(_) => ConstKind::Fun,
            Const::Str(_) => ConstKind::Str,
            Const::Float(_) => ConstKind::Float,
            Const::Class(_) => ConstKind::Class,
        }
    }
}

/// Wire form of a constant: the value plus its kind
#[derive(Serialize, Deserialize)]
struct ConstRepr {
    const_value: serde_json::Value,
    kind: ConstKind,
}

impl From<Const> for ConstRepr {
    fn from(c: Const) -> Self {
        let kind = c.kind();
        let const_value = match c {
            Const::Int(i) => serde_json::to_value(i),
            Const::Fun(p) => serde_json::to_value(p),
            Const::Str(s) => Ok(serde_json::Value::String(s)),
            Const::Float(v) => serde_json::to_value(v),
            Const::Class(t) => serde_json::to_value(t),
        }
        .unwrap_or(serde_json::Value::Null);
        ConstRepr { const_value, kind }
    }
}

impl TryFrom<ConstRepr> for Const {
    type Error = serde_json::Error;

    fn try_from(repr: ConstRepr) -> Result<Self, Self::Error> {
        let v = repr.const_value;
        Ok(match repr.kind {
            ConstKind::Int => Const::Int(serde_json::from_value(v)?),
            ConstKind::Fun => Const::Fun(serde_json::from_value(v)?),
            ConstKind::Str => Const::Str(serde_json::from_value(v)?),
            ConstKind::Float => Const::Float(serde_json::from_value(v)?),
            ConstKind::Class => Const::Class(serde_json::from_value(v)?),
        })
    }
}

impl fmt::Display for Const {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Const::Int(i) => write!(f, "{}", i),
            Const::Fun(p) => write!(f, "_fun {}", p),
            Const::Str(s) => write!(f, "\"{}\"", s),
            Const::Float(v) => write!(f, "{}", v.0),
            Const::Class(t) => write!(f, "{}", t),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinopKind {
    PlusA,
    PlusPI,
    MinusA,
    MinusPI,
    MinusPP,
    Mult,
    Div,
    Mod,
    Shiftlt,
    Shiftrt,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    BAnd,
    BXor,
    BOr,
    LAnd,
    LOr,
    PtrFld,
}

impl BinopKind {
    pub fn symbol(self) -> &'static str {
        match self {
            BinopKind::PlusA | BinopKind::PlusPI => "+",
            BinopKind::MinusA | BinopKind::MinusPI | BinopKind::MinusPP => "-",
            BinopKind::Mult => "*",
            BinopKind::Div => "/",
            BinopKind::Mod => "%",
            BinopKind::Shiftlt => "<<",
            BinopKind::Shiftrt => ">>",
            BinopKind::Lt => "<",
            BinopKind::Gt => ">",
            BinopKind::Le => "<=",
            BinopKind::Ge => ">=",
            BinopKind::Eq => "==",
            BinopKind::Ne => "!=",
            BinopKind::BAnd => "&",
            BinopKind::BXor => "^",
            BinopKind::BOr => "|",
            BinopKind::LAnd => "&&",
            BinopKind::LOr => "||",
            BinopKind::PtrFld => "->",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnopKind {
    Neg,
    BNot,
    LNot,
}

impl UnopKind {
    pub fn symbol(self) -> &'static str {
        match self {
            UnopKind::Neg => "-",
            UnopKind::BNot => "~",
            UnopKind::LNot => "!",
        }
    }
}

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SizeofKind {
    exact,
    instof,
    cast,
}

/// SIL expression
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "expr_kind")]
pub enum Expression {
    #[serde(rename = "BinopExpression")]
    Binop {
        operator: BinopKind,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    #[serde(rename = "UnopExpression")]
    Unop {
        operator: UnopKind,
        expression: Box<Expression>,
        #[serde(rename = "type")]
        ty: Typ,
    },
    #[serde(rename = "CastExpression")]
    Cast {
        #[serde(rename = "type")]
        ty: Typ,
        expression: Box<Expression>,
    },
    #[serde(rename = "ConstExpression")]
    Const(Const),
    #[serde(rename = "ExnExpression")]
    Exn { expression: Box<Expression> },
    #[serde(rename = "LfieldExpression")]
    Lfield {
        expression: Box<Expression>,
        identifier: FieldIdentifier,
        #[serde(rename = "type")]
        ty: Typ,
    },
    #[serde(rename = "LindexExpression")]
    Lindex {
        array: Box<Expression>,
        index: Box<Expression>,
    },
    #[serde(rename = "LvarExpression")]
    Lvar { pvar: ProgramVariable },
    #[serde(rename = "SizeofExpression")]
    Sizeof {
        #[serde(rename = "type")]
        ty: Typ,
        kind: SizeofKind,
        dynamic_length: Option<Box<Expression>>,
        number_bytes: Option<i32>,
    },
    #[serde(rename = "VarExpression")]
    Var { identifier: Identifier },
}

impl Expression {
    pub fn var(identifier: Identifier) -> Self {
        Expression::Var { identifier }
    }

    pub fn lvar(pvar: ProgramVariable) -> Self {
        Expression::Lvar { pvar }
    }

    pub fn int(value: i64) -> Self {
        Expression::Const(Const::Int(IntRepresentation {
            value,
            unsigned: false,
            is_pointer: false,
        }))
    }

    /// The null pointer constant
    pub fn null() -> Self {
        Expression::Const(Const::Int(IntRepresentation {
            value: 0,
            unsigned: false,
            is_pointer: true,
        }))
    }

    pub fn float(value: f64) -> Self {
        Expression::Const(Const::Float(FloatValue::new(value)))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Expression::Const(Const::Str(value.into()))
    }

    pub fn fun(name: ProcedureName) -> Self {
        Expression::Const(Const::Fun(name))
    }

    pub fn binop(operator: BinopKind, left: Expression, right: Expression) -> Self {
        Expression::Binop {
            operator,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn unop(operator: UnopKind, expression: Expression, ty: Typ) -> Self {
        Expression::Unop {
            operator,
            expression: Box::new(expression),
            ty,
        }
    }

    /// Logical negation, used for the false side of a branch
    pub fn lnot(expression: Expression) -> Self {
        Expression::unop(UnopKind::LNot, expression, Typ::bool())
    }

    pub fn exn(expression: Expression) -> Self {
        Expression::Exn {
            expression: Box::new(expression),
        }
    }

    pub fn sizeof(ty: Typ, kind: SizeofKind) -> Self {
        Expression::Sizeof {
            ty,
            kind,
            dynamic_length: None,
            number_bytes: None,
        }
    }

    pub fn lfield(owner: Expression, identifier: FieldIdentifier, ty: Typ) -> Self {
        Expression::Lfield {
            expression: Box::new(owner),
            identifier,
            ty,
        }
    }

    pub fn lindex(array: Expression, index: Expression) -> Self {
        Expression::Lindex {
            array: Box::new(array),
            index: Box::new(index),
        }
    }

    pub fn is_null(&self) -> bool {
        *self == Expression::null()
    }

    pub fn is_binop(&self) -> bool {
        matches!(self, Expression::Binop { .. })
    }

    pub fn is_fun_const(&self) -> bool {
        matches!(self, Expression::Const(Const::Fun(_)))
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Binop {
                operator,
                left,
                right,
            } => write!(f, "{} {} {}", left, operator.symbol(), right),
            Expression::Unop {
                operator,
                expression,
                ty,
            } => write!(f, "{}({}):{}", operator.symbol(), expression, ty),
            Expression::Cast { ty, expression } => write!(f, "({}){}", ty, expression),
            Expression::Const(c) => write!(f, "{}", c),
            Expression::Exn { expression } => write!(f, "EXN {}", expression),
            Expression::Lfield {
                expression,
                identifier,
                ..
            } => write!(f, "{}.{}", expression, identifier),
            Expression::Lindex { array, index } => write!(f, "{}[{}]", array, index),
            Expression::Lvar { pvar } => write!(f, "&{}", pvar),
            Expression::Sizeof { ty, kind, .. } => write!(f, "sizeof({}, {:?})", ty, kind),
            Expression::Var { identifier } => write!(f, "{}", identifier),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_display() {
        assert_eq!(Identifier::new(IdentKind::Normal, 4).to_string(), "n$4");
        assert_eq!(Identifier::new(IdentKind::None, 4).to_string(), "_");
    }

    #[test]
    fn test_null_constant() {
        assert!(Expression::null().is_null());
        assert!(!Expression::int(0).is_null());
        assert_eq!(Expression::null().to_string(), "null");
    }

    #[test]
    fn test_float_clamping() {
        assert_eq!(Expression::float(f64::INFINITY), Expression::float(f32::MAX as f64));
        assert_eq!(
            Expression::float(f64::NEG_INFINITY),
            Expression::float(f32::MIN as f64)
        );
    }

    #[test]
    fn test_const_json_shape() {
        let json = serde_json::to_value(Expression::null()).unwrap();
        assert_eq!(json["expr_kind"], "ConstExpression");
        assert_eq!(json["kind"], "Int");
        assert_eq!(json["const_value"]["is_pointer"], true);
        let back: Expression = serde_json::from_value(json).unwrap();
        assert_eq!(back, Expression::null());

        let s = serde_json::to_value(Expression::string("hi")).unwrap();
        assert_eq!(s["const_value"], "hi");
        assert_eq!(s["kind"], "Str");
    }

    #[test]
    fn test_builtin_names() {
        assert_eq!(BUILTIN_NEW.to_string(), "static BuiltIn.__new()");
        assert!(BUILTIN_UNWRAP_EXCEPTION.is_static);
    }

    #[test]
    fn test_expression_display() {
        let pname = BUILTIN_NEW.clone();
        let lvar = Expression::lvar(ProgramVariable::local("x", &pname));
        assert_eq!(lvar.to_string(), "&x");
        let cond = Expression::binop(BinopKind::Ne, lvar, Expression::null());
        assert_eq!(cond.to_string(), "&x != null");
        assert_eq!(Expression::lnot(cond).to_string(), "!(&x != null):bool");
    }
}
