//! SIL intermediate representation
//!
//! Plain data: types, expressions, instructions, nodes, procedures and the run-wide graph
//! aggregate. The JSON shape produced by serde here is what the analyzer reads, so field
//! names and tags must not change.

pub mod cfg;
pub mod expr;
pub mod instruction;
pub mod node;
pub mod procedure;
pub mod types;

pub use cfg::{Cfg, IdAllocator, IdCheckpoint};
pub use expr::{
    BinopKind, Const, Expression, FieldIdentifier, IdentKind, Identifier, IntRepresentation,
    ProcedureName, ProgramVariable, SizeofKind, UnopKind,
};
pub use instruction::{CallArg, CallFlags, IfKind, Instruction, Location};
pub use node::{CfgNode, NodeId, NodeKind, PruneNodeKind, StatementNodeKind};
pub use procedure::{Local, ProcedureAccessKind, ProcedureAttributes, ProcedureDescription};
pub use types::{IntKind, FloatKind, PtrKind, ReferenceKind, Typ};
