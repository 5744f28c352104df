//! SIL types
//!
//! Every non-primitive, non-void source type is wrapped in a `Tptr`. Pointers may carry
//! side information (the address an `Address` points at, or the value a boxed pointer
//! holds). That information drives translation but is invisible to equality, hashing and
//! JSON output.

use super::expr::Expression;
use crate::bytecode::TypeRef;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Wrapper for data that travels with a value but does not take part in its identity
#[derive(Debug, Clone, Default)]
pub struct Untracked<T>(pub T);

impl<T> PartialEq for Untracked<T> {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl<T> Eq for Untracked<T> {}

impl<T> Hash for Untracked<T> {
    fn hash<H: Hasher>(&self, _state: &mut H) {}
}

/// Integer kinds
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntKind {
    IChar,
    ISChar,
    IUChar,
    IBool,
    IInt,
    IUInt,
    IShort,
    IUShort,
    ILong,
    IULong,
    ILongLong,
    IULongLong,
    I128,
    IU128,
}

impl IntKind {
    pub fn is_unsigned(self) -> bool {
        matches!(
            self,
            IntKind::IUChar
                | IntKind::IUInt
                | IntKind::IUShort
                | IntKind::IULong
                | IntKind::IULongLong
                | IntKind::IU128
        )
    }

    fn name(self) -> &'static str {
        match self {
            IntKind::IChar => "char",
            IntKind::ISChar => "schar",
            IntKind::IUChar => "uchar",
            IntKind::IBool => "bool",
            IntKind::IInt => "int",
            IntKind::IUInt => "uint",
            IntKind::IShort => "short",
            IntKind::IUShort => "ushort",
            IntKind::ILong => "long",
            IntKind::IULong => "ulong",
            IntKind::ILongLong => "longlong",
            IntKind::IULongLong => "ulonglong",
            IntKind::I128 => "128",
            IntKind::IU128 => "u128",
        }
    }
}

/// Floating point kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FloatKind {
    FFloat,
    FDouble,
    FLongDouble,
}

/// Pointer kinds
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PtrKind {
    Pk_pointer,
    Pk_reference,
    Pk_objc_weak,
    Pk_objc_unsafe_unretained,
    Pk_objc_autoreleasing,
}

/// What an address refers to; decides how many loads a dereference takes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReferenceKind {
    /// Address of a field (`ldflda`)
    Field,
    /// Address of a by-ref parameter, dereferenced twice
    Parameter,
    /// Any other address (`ldloca`, `unbox`)
    Generic,
}

/// Side information carried by a pointer type
#[derive(Debug, Clone, Default)]
pub enum PointerInfo {
    #[default]
    Plain,
    /// The pointer is an address of `value`
    Address {
        value: Box<Expression>,
        reference: ReferenceKind,
    },
    /// The pointer is a boxed object wrapping `value` of type `value_type`
    Boxed {
        value: Box<Expression>,
        value_type: Box<Typ>,
    },
}

/// Composite kinds of a type name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CsuKind {
    Class,
    Struct,
    Union,
    Protocol,
}

/// Named type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type_name_kind")]
pub enum TypeName {
    CsuTypeName { name: String, csu_kind: CsuKind },
}

impl TypeName {
    /// Class type name
    pub fn class(name: impl Into<String>) -> Self {
        TypeName::CsuTypeName {
            name: name.into(),
            csu_kind: CsuKind::Class,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            TypeName::CsuTypeName { name, .. } => name,
        }
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeName::CsuTypeName { name, csu_kind } => write!(f, "{:?} {}", csu_kind, name),
        }
    }
}

/// SIL type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type_kind")]
pub enum Typ {
    Tint {
        kind: IntKind,
        /// Set on the boolean produced by `isinst`
        #[serde(skip)]
        isinst: Untracked<bool>,
    },
    Tfloat {
        kind: FloatKind,
    },
    Tptr {
        kind: PtrKind,
        #[serde(rename = "type")]
        ty: Box<Typ>,
        #[serde(skip)]
        info: Untracked<PointerInfo>,
    },
    Tarray {
        content_type: Box<Typ>,
    },
    Tstruct {
        struct_name: String,
    },
    Tfun,
    Tvoid,
    Tvar {
        type_name: TypeName,
    },
}

pub const OBJECT_TYPE_NAME: &str = "System.Object";
pub const STRING_TYPE_NAME: &str = "System.String";

impl Typ {
    pub fn int(kind: IntKind) -> Self {
        Typ::Tint {
            kind,
            isinst: Untracked(false),
        }
    }

    pub fn bool() -> Self {
        Typ::int(IntKind::IBool)
    }

    /// Boolean produced by an `isinst` check
    pub fn isinst_bool() -> Self {
        Typ::Tint {
            kind: IntKind::IBool,
            isinst: Untracked(true),
        }
    }

    pub fn float(kind: FloatKind) -> Self {
        Typ::Tfloat { kind }
    }

    pub fn structure(name: impl Into<String>) -> Self {
        Typ::Tstruct {
            struct_name: name.into(),
        }
    }

    pub fn array(content: Typ) -> Self {
        Typ::Tarray {
            content_type: Box::new(content),
        }
    }

    /// Plain `T*`
    pub fn ptr(inner: Typ) -> Self {
        Typ::Tptr {
            kind: PtrKind::Pk_pointer,
            ty: Box::new(inner),
            info: Untracked(PointerInfo::Plain),
        }
    }

    /// `System.Object*`
    pub fn object() -> Self {
        Typ::ptr(Typ::structure(OBJECT_TYPE_NAME))
    }

    /// `System.String*`
    pub fn string() -> Self {
        Typ::ptr(Typ::structure(STRING_TYPE_NAME))
    }

    /// Pointer to `inner` that remembers the address expression it was taken from
    pub fn address(inner: Typ, value: Expression, reference: ReferenceKind) -> Self {
        Typ::Tptr {
            kind: PtrKind::Pk_pointer,
            ty: Box::new(inner),
            info: Untracked(PointerInfo::Address {
                value: Box::new(value),
                reference,
            }),
        }
    }

    /// Boxed object of type `inner` wrapping `value`
    pub fn boxed(inner: Typ, value: Expression, value_type: Typ) -> Self {
        Typ::Tptr {
            kind: PtrKind::Pk_pointer,
            ty: Box::new(inner),
            info: Untracked(PointerInfo::Boxed {
                value: Box::new(value),
                value_type: Box::new(value_type),
            }),
        }
    }

    /// Removes every pointer layer
    pub fn strip_pointer(&self) -> Typ {
        let mut current = self;
        while let Typ::Tptr { ty, .. } = current {
            current = ty;
        }
        current.clone()
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Typ::Tptr { .. })
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Typ::Tvoid)
    }

    pub fn is_bool(&self) -> bool {
        matches!(
            self,
            Typ::Tint {
                kind: IntKind::IBool,
                ..
            }
        )
    }

    pub fn is_isinst_result(&self) -> bool {
        matches!(self, Typ::Tint { isinst, .. } if isinst.0)
    }

    /// The address this pointer was taken from, if any
    pub fn as_address(&self) -> Option<(&Expression, ReferenceKind, &Typ)> {
        match self {
            Typ::Tptr {
                ty,
                info: Untracked(PointerInfo::Address { value, reference }),
                ..
            } => Some((value, *reference, ty)),
            _ => None,
        }
    }

    /// The boxed value and its type, if this is a boxed object
    pub fn as_boxed(&self) -> Option<(&Expression, &Typ)> {
        match self {
            Typ::Tptr {
                info: Untracked(PointerInfo::Boxed { value, value_type }),
                ..
            } => Some((value, value_type)),
            _ => None,
        }
    }

    /// Array content type behind an optional pointer
    pub fn array_content(&self) -> Option<&Typ> {
        match self {
            Typ::Tarray { content_type } => Some(content_type),
            Typ::Tptr { ty, .. } => ty.array_content(),
            _ => None,
        }
    }

    /// Source type to SIL type, pointer-wrapping non-primitive types
    pub fn from_type_ref(ty: &TypeRef) -> Result<Typ> {
        match ty {
            TypeRef::ByRef { element } => Ok(Typ::ptr(Typ::from_type_ref(element)?)),
            TypeRef::Primitive { .. } => Typ::from_type_ref_no_pointer(ty),
            TypeRef::Void => Ok(Typ::Tvoid),
            _ => Ok(Typ::ptr(Typ::from_type_ref_no_pointer(ty)?)),
        }
    }

    /// Source type to SIL type without the outer pointer
    pub fn from_type_ref_no_pointer(ty: &TypeRef) -> Result<Typ> {
        match ty {
            TypeRef::Primitive { name } => primitive(name),
            TypeRef::Void => Ok(Typ::Tvoid),
            TypeRef::Array { element } => Ok(Typ::array(Typ::from_type_ref(element)?)),
            TypeRef::GenericParam { .. } => Ok(Typ::structure(OBJECT_TYPE_NAME)),
            TypeRef::ByRef { element } => Typ::from_type_ref_no_pointer(element),
            TypeRef::Class { name } => Ok(match name.as_str() {
                "System.Boolean" => Typ::bool(),
                "System.Void" => Typ::Tvoid,
                _ => Typ::structure(name.replace('/', "$")),
            }),
        }
    }
}

fn primitive(name: &str) -> Result<Typ> {
    let ty = match name.strip_prefix("System.").unwrap_or(name) {
        "Int32" => Typ::int(IntKind::IInt),
        "UInt32" => Typ::int(IntKind::IUInt),
        "Bool" | "Boolean" => Typ::bool(),
        "SByte" => Typ::int(IntKind::ISChar),
        "Byte" => Typ::int(IntKind::IUChar),
        "Char" => Typ::int(IntKind::IChar),
        "Double" => Typ::float(FloatKind::FDouble),
        "Float" | "Single" => Typ::float(FloatKind::FFloat),
        "Long" | "Int64" => Typ::int(IntKind::ILong),
        "ULong" | "UInt64" => Typ::int(IntKind::IULong),
        "Short" | "Int16" => Typ::int(IntKind::IShort),
        "UInt16" => Typ::int(IntKind::IUShort),
        "IntPtr" => Typ::ptr(Typ::int(IntKind::IInt)),
        "UIntPtr" => Typ::ptr(Typ::int(IntKind::IUInt)),
        _ => return Err(Error::unhandled_type("primitive type", name)),
    };
    Ok(ty)
}

impl fmt::Display for Typ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Typ::Tint { kind, .. } => write!(f, "{}", kind.name()),
            Typ::Tfloat { .. } => write!(f, "float"),
            Typ::Tptr { kind, ty, .. } => match kind {
                PtrKind::Pk_pointer => write!(f, "{}*", ty),
                PtrKind::Pk_reference => write!(f, "&{}", ty),
                PtrKind::Pk_objc_weak => write!(f, "{}__weak *", ty),
                PtrKind::Pk_objc_unsafe_unretained => write!(f, "{}__unsafe_unretained *", ty),
                PtrKind::Pk_objc_autoreleasing => write!(f, "{}__autoreleasing", ty),
            },
            Typ::Tarray { content_type } => write!(f, "{}[]", content_type),
            Typ::Tstruct { struct_name } => write!(f, "{}", struct_name),
            Typ::Tfun => write!(f, "_fun_"),
            Typ::Tvoid => write!(f, "void"),
            Typ::Tvar { type_name } => write!(f, "{}", type_name),
        }
    }
}
