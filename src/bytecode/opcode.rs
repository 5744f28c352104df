//! CIL opcodes and their routing families
//!
//! Every opcode maps to exactly one [`OpcodeFamily`]. The table below is the only place the
//! mapping is written down; the dispatcher matches exhaustively on the family.

use crate::ir::{BinopKind, UnopKind};
use serde::{Deserialize, Serialize};

/// Group of opcodes translated by the same handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpcodeFamily {
    /// No effect on the stack or graph (`nop` and instruction prefixes)
    Nop,
    Ldloc,
    Ldloca,
    Stloc,
    Ldarg,
    Ldarga,
    Starg,
    LdcI4,
    LdcI8,
    LdcR4,
    LdcR8,
    Ldstr,
    Ldnull,
    Pop,
    Dup,
    /// Numeric conversions, not modelled
    Conv,
    Binop(BinopKind),
    Unop(UnopKind),
    Br,
    /// `brtrue` and `brfalse`
    BranchOnValue { on_true: bool },
    /// Two-operand conditional branches
    BranchCompare(BinopKind),
    Switch,
    Ret,
    Leave,
    Endfinally,
    Throw,
    Rethrow,
    Call { is_virtual: bool },
    Newobj,
    Box,
    Unbox { any: bool },
    Isinst,
    Castclass,
    Initobj,
    Ldftn,
    Ldtoken,
    Ldfld { is_static: bool },
    Ldflda { is_static: bool },
    Stfld { is_static: bool },
    Ldelem,
    Ldelema,
    Stelem,
    Ldlen,
    Newarr,
    Ldind,
    Stind,
    /// No translation exists
    Unsupported,
}

macro_rules! opcodes {
    ($($variant:ident => $mnemonic:literal, $family:expr;)*) => {
        /// CIL opcode, serialized as its mnemonic
        #[allow(non_camel_case_types)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum Opcode {
            $(
                #[serde(rename = $mnemonic)]
                $variant,
            )*
        }

        impl Opcode {
            /// Every opcode, in table order
            pub const ALL: &'static [Opcode] = &[$(Opcode::$variant,)*];

            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(Opcode::$variant => $mnemonic,)*
                }
            }

            pub fn family(self) -> OpcodeFamily {
                use OpcodeFamily::*;
                match self {
                    $(Opcode::$variant => $family,)*
                }
            }

            pub fn from_mnemonic(mnemonic: &str) -> Option<Opcode> {
                match mnemonic {
                    $($mnemonic => Some(Opcode::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

opcodes! {
    Nop => "nop", Nop;
    Break => "break", Unsupported;
    Ldarg_0 => "ldarg.0", Ldarg;
    Ldarg_1 => "ldarg.1", Ldarg;
    Ldarg_2 => "ldarg.2", Ldarg;
    Ldarg_3 => "ldarg.3", Ldarg;
    Ldloc_0 => "ldloc.0", Ldloc;
    Ldloc_1 => "ldloc.1", Ldloc;
    Ldloc_2 => "ldloc.2", Ldloc;
    Ldloc_3 => "ldloc.3", Ldloc;
    Stloc_0 => "stloc.0", Stloc;
    Stloc_1 => "stloc.1", Stloc;
    Stloc_2 => "stloc.2", Stloc;
    Stloc_3 => "stloc.3", Stloc;
    Ldarg_S => "ldarg.s", Ldarg;
    Ldarga_S => "ldarga.s", Ldarga;
    Starg_S => "starg.s", Starg;
    Ldloc_S => "ldloc.s", Ldloc;
    Ldloca_S => "ldloca.s", Ldloca;
    Stloc_S => "stloc.s", Stloc;
    Ldnull => "ldnull", Ldnull;
    Ldc_I4_M1 => "ldc.i4.m1", LdcI4;
    Ldc_I4_0 => "ldc.i4.0", LdcI4;
    Ldc_I4_1 => "ldc.i4.1", LdcI4;
    Ldc_I4_2 => "ldc.i4.2", LdcI4;
    Ldc_I4_3 => "ldc.i4.3", LdcI4;
    Ldc_I4_4 => "ldc.i4.4", LdcI4;
    Ldc_I4_5 => "ldc.i4.5", LdcI4;
    Ldc_I4_6 => "ldc.i4.6", LdcI4;
    Ldc_I4_7 => "ldc.i4.7", LdcI4;
    Ldc_I4_8 => "ldc.i4.8", LdcI4;
    Ldc_I4_S => "ldc.i4.s", LdcI4;
    Ldc_I4 => "ldc.i4", LdcI4;
    Ldc_I8 => "ldc.i8", LdcI8;
    Ldc_R4 => "ldc.r4", LdcR4;
    Ldc_R8 => "ldc.r8", LdcR8;
    Dup => "dup", Dup;
    Pop => "pop", Pop;
    Jmp => "jmp", Unsupported;
    Call => "call", Call { is_virtual: false };
    Calli => "calli", Unsupported;
    Ret => "ret", Ret;
    Br_S => "br.s", Br;
    Brfalse_S => "brfalse.s", BranchOnValue { on_true: false };
    Brtrue_S => "brtrue.s", BranchOnValue { on_true: true };
    Beq_S => "beq.s", BranchCompare(BinopKind::Eq);
    Bge_S => "bge.s", BranchCompare(BinopKind::Ge);
    Bgt_S => "bgt.s", BranchCompare(BinopKind::Gt);
    Ble_S => "ble.s", BranchCompare(BinopKind::Le);
    Blt_S => "blt.s", BranchCompare(BinopKind::Lt);
    Bne_Un_S => "bne.un.s", BranchCompare(BinopKind::Ne);
    Bge_Un_S => "bge.un.s", BranchCompare(BinopKind::Ge);
    Bgt_Un_S => "bgt.un.s", BranchCompare(BinopKind::Gt);
    Ble_Un_S => "ble.un.s", BranchCompare(BinopKind::Le);
    Blt_Un_S => "blt.un.s", BranchCompare(BinopKind::Lt);
    Br => "br", Br;
    Brfalse => "brfalse", BranchOnValue { on_true: false };
    Brtrue => "brtrue", BranchOnValue { on_true: true };
    Beq => "beq", BranchCompare(BinopKind::Eq);
    Bge => "bge", BranchCompare(BinopKind::Ge);
    Bgt => "bgt", BranchCompare(BinopKind::Gt);
    Ble => "ble", BranchCompare(BinopKind::Le);
    Blt => "blt", BranchCompare(BinopKind::Lt);
    Bne_Un => "bne.un", BranchCompare(BinopKind::Ne);
    Bge_Un => "bge.un", BranchCompare(BinopKind::Ge);
    Bgt_Un => "bgt.un", BranchCompare(BinopKind::Gt);
    Ble_Un => "ble.un", BranchCompare(BinopKind::Le);
    Blt_Un => "blt.un", BranchCompare(BinopKind::Lt);
    Switch => "switch", Switch;
    Ldind_I1 => "ldind.i1", Ldind;
    Ldind_U1 => "ldind.u1", Ldind;
    Ldind_I2 => "ldind.i2", Ldind;
    Ldind_U2 => "ldind.u2", Ldind;
    Ldind_I4 => "ldind.i4", Ldind;
    Ldind_U4 => "ldind.u4", Ldind;
    Ldind_I8 => "ldind.i8", Ldind;
    Ldind_I => "ldind.i", Ldind;
    Ldind_R4 => "ldind.r4", Ldind;
    Ldind_R8 => "ldind.r8", Ldind;
    Ldind_Ref => "ldind.ref", Ldind;
    Stind_Ref => "stind.ref", Stind;
    Stind_I1 => "stind.i1", Stind;
    Stind_I2 => "stind.i2", Stind;
    Stind_I4 => "stind.i4", Stind;
    Stind_I8 => "stind.i8", Stind;
    Stind_R4 => "stind.r4", Stind;
    Stind_R8 => "stind.r8", Stind;
    Add => "add", Binop(BinopKind::PlusA);
    Sub => "sub", Binop(BinopKind::MinusA);
    Mul => "mul", Binop(BinopKind::Mult);
    Div => "div", Binop(BinopKind::Div);
    Div_Un => "div.un", Binop(BinopKind::Div);
    Rem => "rem", Binop(BinopKind::Mod);
    Rem_Un => "rem.un", Binop(BinopKind::Mod);
    And => "and", Binop(BinopKind::BAnd);
    Or => "or", Binop(BinopKind::BOr);
    Xor => "xor", Binop(BinopKind::BXor);
    Shl => "shl", Binop(BinopKind::Shiftlt);
    Shr => "shr", Binop(BinopKind::Shiftrt);
    Shr_Un => "shr.un", Binop(BinopKind::Shiftrt);
    Neg => "neg", Unop(UnopKind::Neg);
    Not => "not", Unop(UnopKind::BNot);
    Conv_I1 => "conv.i1", Conv;
    Conv_I2 => "conv.i2", Conv;
    Conv_I4 => "conv.i4", Conv;
    Conv_I8 => "conv.i8", Conv;
    Conv_R4 => "conv.r4", Conv;
    Conv_R8 => "conv.r8", Conv;
    Conv_U4 => "conv.u4", Conv;
    Conv_U8 => "conv.u8", Conv;
    Callvirt => "callvirt", Call { is_virtual: true };
    Cpobj => "cpobj", Unsupported;
    Ldobj => "ldobj", Unsupported;
    Ldstr => "ldstr", Ldstr;
    Newobj => "newobj", Newobj;
    Castclass => "castclass", Castclass;
    Isinst => "isinst", Isinst;
    Conv_R_Un => "conv.r.un", Conv;
    Unbox => "unbox", Unbox { any: false };
    Throw => "throw", Throw;
    Ldfld => "ldfld", Ldfld { is_static: false };
    Ldflda => "ldflda", Ldflda { is_static: false };
    Stfld => "stfld", Stfld { is_static: false };
    Ldsfld => "ldsfld", Ldfld { is_static: true };
    Ldsflda => "ldsflda", Ldflda { is_static: true };
    Stsfld => "stsfld", Stfld { is_static: true };
    Stobj => "stobj", Unsupported;
    Conv_Ovf_I1_Un => "conv.ovf.i1.un", Conv;
    Conv_Ovf_I2_Un => "conv.ovf.i2.un", Conv;
    Conv_Ovf_I4_Un => "conv.ovf.i4.un", Conv;
    Conv_Ovf_I8_Un => "conv.ovf.i8.un", Conv;
    Conv_Ovf_U1_Un => "conv.ovf.u1.un", Conv;
    Conv_Ovf_U2_Un => "conv.ovf.u2.un", Conv;
    Conv_Ovf_U4_Un => "conv.ovf.u4.un", Conv;
    Conv_Ovf_U8_Un => "conv.ovf.u8.un", Conv;
    Conv_Ovf_I_Un => "conv.ovf.i.un", Conv;
    Conv_Ovf_U_Un => "conv.ovf.u.un", Conv;
    Box => "box", Box;
    Newarr => "newarr", Newarr;
    Ldlen => "ldlen", Ldlen;
    Ldelema => "ldelema", Ldelema;
    Ldelem_I1 => "ldelem.i1", Ldelem;
    Ldelem_U1 => "ldelem.u1", Ldelem;
    Ldelem_I2 => "ldelem.i2", Ldelem;
    Ldelem_U2 => "ldelem.u2", Ldelem;
    Ldelem_I4 => "ldelem.i4", Ldelem;
    Ldelem_U4 => "ldelem.u4", Ldelem;
    Ldelem_I8 => "ldelem.i8", Ldelem;
    Ldelem_I => "ldelem.i", Ldelem;
    Ldelem_R4 => "ldelem.r4", Ldelem;
    Ldelem_R8 => "ldelem.r8", Ldelem;
    Ldelem_Ref => "ldelem.ref", Ldelem;
    Stelem_I => "stelem.i", Stelem;
    Stelem_I1 => "stelem.i1", Stelem;
    Stelem_I2 => "stelem.i2", Stelem;
    Stelem_I4 => "stelem.i4", Stelem;
    Stelem_I8 => "stelem.i8", Stelem;
    Stelem_R4 => "stelem.r4", Stelem;
    Stelem_R8 => "stelem.r8", Stelem;
    Stelem_Ref => "stelem.ref", Stelem;
    Ldelem_Any => "ldelem", Ldelem;
    Stelem_Any => "stelem", Stelem;
    Unbox_Any => "unbox.any", Unbox { any: true };
    Conv_Ovf_I1 => "conv.ovf.i1", Conv;
    Conv_Ovf_U1 => "conv.ovf.u1", Conv;
    Conv_Ovf_I2 => "conv.ovf.i2", Conv;
    Conv_Ovf_U2 => "conv.ovf.u2", Conv;
    Conv_Ovf_I4 => "conv.ovf.i4", Conv;
    Conv_Ovf_U4 => "conv.ovf.u4", Conv;
    Conv_Ovf_I8 => "conv.ovf.i8", Conv;
    Conv_Ovf_U8 => "conv.ovf.u8", Conv;
    Refanyval => "refanyval", Unsupported;
    Ckfinite => "ckfinite", Unsupported;
    Mkrefany => "mkrefany", Unsupported;
    Ldtoken => "ldtoken", Ldtoken;
    Conv_U2 => "conv.u2", Conv;
    Conv_U1 => "conv.u1", Conv;
    Conv_I => "conv.i", Conv;
    Conv_Ovf_I => "conv.ovf.i", Conv;
    Conv_Ovf_U => "conv.ovf.u", Conv;
    Add_Ovf => "add.ovf", Binop(BinopKind::PlusA);
    Add_Ovf_Un => "add.ovf.un", Binop(BinopKind::PlusA);
    Mul_Ovf => "mul.ovf", Binop(BinopKind::Mult);
    Mul_Ovf_Un => "mul.ovf.un", Binop(BinopKind::Mult);
    Sub_Ovf => "sub.ovf", Binop(BinopKind::MinusA);
    Sub_Ovf_Un => "sub.ovf.un", Binop(BinopKind::MinusA);
    Endfinally => "endfinally", Endfinally;
    Leave => "leave", Leave;
    Leave_S => "leave.s", Leave;
    Stind_I => "stind.i", Stind;
    Conv_U => "conv.u", Conv;
    Arglist => "arglist", Unsupported;
    Ceq => "ceq", Binop(BinopKind::Eq);
    Cgt => "cgt", Binop(BinopKind::Gt);
    Cgt_Un => "cgt.un", Binop(BinopKind::Gt);
    Clt => "clt", Binop(BinopKind::Lt);
    Clt_Un => "clt.un", Binop(BinopKind::Lt);
    Ldftn => "ldftn", Ldftn;
    Ldvirtftn => "ldvirtftn", Unsupported;
    Ldarg => "ldarg", Ldarg;
    Ldarga => "ldarga", Ldarga;
    Starg => "starg", Starg;
    Ldloc => "ldloc", Ldloc;
    Ldloca => "ldloca", Ldloca;
    Stloc => "stloc", Stloc;
    Localloc => "localloc", Unsupported;
    Endfilter => "endfilter", Unsupported;
    Unaligned => "unaligned.", Nop;
    Volatile => "volatile.", Nop;
    Tail => "tail.", Nop;
    Initobj => "initobj", Initobj;
    Constrained => "constrained.", Nop;
    Cpblk => "cpblk", Unsupported;
    Initblk => "initblk", Unsupported;
    No => "no.", Unsupported;
    Rethrow => "rethrow", Rethrow;
    Sizeof => "sizeof", Unsupported;
    Refanytype => "refanytype", Unsupported;
    Readonly => "readonly.", Nop;
}

impl Opcode {
    /// Local or argument index encoded in the opcode itself
    pub fn inline_index(self) -> Option<u16> {
        match self {
            Opcode::Ldarg_0 | Opcode::Ldloc_0 | Opcode::Stloc_0 => Some(0),
            Opcode::Ldarg_1 | Opcode::Ldloc_1 | Opcode::Stloc_1 => Some(1),
            Opcode::Ldarg_2 | Opcode::Ldloc_2 | Opcode::Stloc_2 => Some(2),
            Opcode::Ldarg_3 | Opcode::Ldloc_3 | Opcode::Stloc_3 => Some(3),
            _ => None,
        }
    }

    /// Constant encoded in a short `ldc.i4` form
    pub fn inline_constant(self) -> Option<i32> {
        match self {
            Opcode::Ldc_I4_M1 => Some(-1),
            Opcode::Ldc_I4_0 => Some(0),
            Opcode::Ldc_I4_1 => Some(1),
            Opcode::Ldc_I4_2 => Some(2),
            Opcode::Ldc_I4_3 => Some(3),
            Opcode::Ldc_I4_4 => Some(4),
            Opcode::Ldc_I4_5 => Some(5),
            Opcode::Ldc_I4_6 => Some(6),
            Opcode::Ldc_I4_7 => Some(7),
            Opcode::Ldc_I4_8 => Some(8),
            _ => None,
        }
    }

    /// Whether control never falls through to the next instruction
    pub fn is_unconditional_transfer(self) -> bool {
        matches!(
            self.family(),
            OpcodeFamily::Br
                | OpcodeFamily::Leave
                | OpcodeFamily::Ret
                | OpcodeFamily::Throw
                | OpcodeFamily::Rethrow
                | OpcodeFamily::Endfinally
        )
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.mnemonic())
    }
}
