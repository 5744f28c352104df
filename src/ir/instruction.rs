//! SIL instructions and source locations

use super::expr::{Expression, Identifier};
use super::types::Typ;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathType {
    Absolute,
    Relative,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceFile {
    pub path_type: PathType,
    pub path: String,
}

impl SourceFile {
    pub fn empty() -> Self {
        SourceFile {
            path_type: PathType::Relative,
            path: String::new(),
        }
    }
}

/// Source position of an instruction or node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub line: i32,
    pub col: i32,
    pub source_file: SourceFile,
}

/// Lines at or above this value are compiler-generated placeholders
pub const SYNTHETIC_LINE: i32 = 10_000_000;

impl Location {
    pub fn new(line: i32, col: i32, path: impl Into<String>) -> Self {
        Location {
            line,
            col,
            source_file: SourceFile {
                path_type: PathType::Relative,
                path: path.into(),
            },
        }
    }

    /// Location of code without debug information
    pub fn unknown() -> Self {
        Location {
            line: -1,
            col: -1,
            source_file: SourceFile::empty(),
        }
    }
}

impl Default for Location {
    fn default() -> Self {
        Location::unknown()
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}", self.line)?;
        if self.col >= 0 {
            write!(f, ", column {}", self.col)?;
        }
        Ok(())
    }
}

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IfKind {
    Ik_bexp,
    Ik_dowhile,
    Ik_for,
    Ik_if,
    Ik_andor,
    Ik_while,
    Ik_switch,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallArg {
    pub expression: Expression,
    #[serde(rename = "type")]
    pub ty: Typ,
}

impl CallArg {
    pub fn new(expression: Expression, ty: Typ) -> Self {
        CallArg { expression, ty }
    }
}

impl fmt::Display for CallArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.expression, self.ty)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallFlags {
    pub cf_virtual: bool,
    pub cf_noreturn: bool,
    pub cf_is_objc_block: bool,
}

/// SIL instruction
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "instruction_kind")]
pub enum Instruction {
    /// `identifier = *expression`
    Load {
        identifier: Identifier,
        expression: Expression,
        #[serde(rename = "type")]
        ty: Typ,
        location: Location,
    },
    /// `*lvalue = rvalue`
    Store {
        lvalue: Expression,
        rvalue: Expression,
        #[serde(rename = "type")]
        ty: Typ,
        location: Location,
    },
    /// Assume `condition` holds (or does not, on the false branch)
    Prune {
        condition: Expression,
        true_branch: bool,
        if_kind: IfKind,
        location: Location,
    },
    Call {
        return_var: Identifier,
        return_type: Typ,
        function_expression: Expression,
        args: Vec<CallArg>,
        flags: CallFlags,
        location: Location,
    },
}

impl Instruction {
    pub fn load(identifier: Identifier, expression: Expression, ty: Typ, location: Location) -> Self {
        Instruction::Load {
            identifier,
            expression,
            ty,
            location,
        }
    }

    pub fn store(lvalue: Expression, rvalue: Expression, ty: Typ, location: Location) -> Self {
        Instruction::Store {
            lvalue,
            rvalue,
            ty,
            location,
        }
    }

    pub fn prune(condition: Expression, true_branch: bool, if_kind: IfKind, location: Location) -> Self {
        Instruction::Prune {
            condition,
            true_branch,
            if_kind,
            location,
        }
    }

    pub fn call(
        return_var: Identifier,
        return_type: Typ,
        function_expression: Expression,
        args: Vec<CallArg>,
        flags: CallFlags,
        location: Location,
    ) -> Self {
        Instruction::Call {
            return_var,
            return_type,
            function_expression,
            args,
            flags,
            location,
        }
    }

    pub fn location(&self) -> &Location {
        match self {
            Instruction::Load { location, .. }
            | Instruction::Store { location, .. }
            | Instruction::Prune { location, .. }
            | Instruction::Call { location, .. } => location,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Load {
                identifier,
                expression,
                ty,
                location,
            } => write!(f, "{}=*{}:{} [{}];", identifier, expression, ty, location),
            Instruction::Store {
                lvalue,
                rvalue,
                ty,
                location,
            } => write!(f, "*{}:{}={} [{}];", lvalue, ty, rvalue, location),
            Instruction::Prune {
                condition,
                true_branch,
                location,
                ..
            } => write!(f, "PRUNE ({}, {}) [{}];", condition, true_branch, location),
            Instruction::Call {
                return_var,
                return_type,
                function_expression,
                args,
                flags,
                location,
            } => {
                let args = args.iter().map(|a| a.to_string()).collect::<Vec<_>>();
                write!(
                    f,
                    "{}:{}={} ({})",
                    return_var,
                    return_type,
                    function_expression,
                    args.join(", ")
                )?;
                if flags.cf_virtual {
                    write!(f, " virtual ")?;
                }
                write!(f, " [{}];", location)
            }
        }
    }
}
