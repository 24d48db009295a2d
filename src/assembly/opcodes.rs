//! The CIL opcode table (ECMA-335 Partition III).
//!
//! Every opcode the emitter can produce and the interpreter can execute is a variant of
//! [`OpCode`]. Encoding bytes, operand kind, stack effect and control-flow class all come
//! from a single [`OpCode::info`] match, so the encoder, the decoder and the size
//! computation of the instruction stream can never disagree.
//!
//! Only long-form branches are part of the table. Bodies are assembled incrementally and
//! every instruction's offset is recorded as it is emitted, so branch shrinking (which
//! would move later instructions) is never performed.

use std::{collections::HashMap, sync::OnceLock};

use strum::{EnumIter, IntoEnumIterator, IntoStaticStr};

use crate::assembly::instruction::{FlowType, OperandType, StackBehavior};

/// Prefix byte of two-byte opcodes.
pub const FE_PREFIX: u8 = 0xFE;

/// A CIL opcode.
///
/// The `strum` serialization is the ILDasm mnemonic, so `OpCode::LdArg0.mnemonic()` is
/// `"ldarg.0"` and [`OpCode::from_mnemonic`] accepts the same spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, IntoStaticStr)]
#[allow(missing_docs)]
pub enum OpCode {
    #[strum(serialize = "nop")]
    Nop,
    #[strum(serialize = "ldarg.0")]
    LdArg0,
    #[strum(serialize = "ldarg.1")]
    LdArg1,
    #[strum(serialize = "ldarg.2")]
    LdArg2,
    #[strum(serialize = "ldarg.3")]
    LdArg3,
    #[strum(serialize = "ldloc.0")]
    LdLoc0,
    #[strum(serialize = "ldloc.1")]
    LdLoc1,
    #[strum(serialize = "ldloc.2")]
    LdLoc2,
    #[strum(serialize = "ldloc.3")]
    LdLoc3,
    #[strum(serialize = "stloc.0")]
    StLoc0,
    #[strum(serialize = "stloc.1")]
    StLoc1,
    #[strum(serialize = "stloc.2")]
    StLoc2,
    #[strum(serialize = "stloc.3")]
    StLoc3,
    #[strum(serialize = "ldarg.s")]
    LdArgS,
    #[strum(serialize = "ldarga.s")]
    LdArgaS,
    #[strum(serialize = "starg.s")]
    StArgS,
    #[strum(serialize = "ldloc.s")]
    LdLocS,
    #[strum(serialize = "ldloca.s")]
    LdLocaS,
    #[strum(serialize = "stloc.s")]
    StLocS,
    #[strum(serialize = "ldnull")]
    LdNull,
    #[strum(serialize = "ldc.i4.m1")]
    LdcI4M1,
    #[strum(serialize = "ldc.i4.0")]
    LdcI4_0,
    #[strum(serialize = "ldc.i4.1")]
    LdcI4_1,
    #[strum(serialize = "ldc.i4.2")]
    LdcI4_2,
    #[strum(serialize = "ldc.i4.3")]
    LdcI4_3,
    #[strum(serialize = "ldc.i4.4")]
    LdcI4_4,
    #[strum(serialize = "ldc.i4.5")]
    LdcI4_5,
    #[strum(serialize = "ldc.i4.6")]
    LdcI4_6,
    #[strum(serialize = "ldc.i4.7")]
    LdcI4_7,
    #[strum(serialize = "ldc.i4.8")]
    LdcI4_8,
    #[strum(serialize = "ldc.i4.s")]
    LdcI4S,
    #[strum(serialize = "ldc.i4")]
    LdcI4,
    #[strum(serialize = "ldc.i8")]
    LdcI8,
    #[strum(serialize = "ldc.r4")]
    LdcR4,
    #[strum(serialize = "ldc.r8")]
    LdcR8,
    #[strum(serialize = "dup")]
    Dup,
    #[strum(serialize = "pop")]
    Pop,
    #[strum(serialize = "call")]
    Call,
    #[strum(serialize = "ret")]
    Ret,
    #[strum(serialize = "br")]
    Br,
    #[strum(serialize = "brfalse")]
    BrFalse,
    #[strum(serialize = "brtrue")]
    BrTrue,
    #[strum(serialize = "beq")]
    Beq,
    #[strum(serialize = "bne.un")]
    BneUn,
    #[strum(serialize = "switch")]
    Switch,
    #[strum(serialize = "ldind.i1")]
    LdIndI1,
    #[strum(serialize = "ldind.u1")]
    LdIndU1,
    #[strum(serialize = "ldind.i2")]
    LdIndI2,
    #[strum(serialize = "ldind.u2")]
    LdIndU2,
    #[strum(serialize = "ldind.i4")]
    LdIndI4,
    #[strum(serialize = "ldind.u4")]
    LdIndU4,
    #[strum(serialize = "ldind.i8")]
    LdIndI8,
    #[strum(serialize = "ldind.i")]
    LdIndI,
    #[strum(serialize = "ldind.r4")]
    LdIndR4,
    #[strum(serialize = "ldind.r8")]
    LdIndR8,
    #[strum(serialize = "ldind.ref")]
    LdIndRef,
    #[strum(serialize = "stind.ref")]
    StIndRef,
    #[strum(serialize = "stind.i1")]
    StIndI1,
    #[strum(serialize = "stind.i2")]
    StIndI2,
    #[strum(serialize = "stind.i4")]
    StIndI4,
    #[strum(serialize = "stind.i8")]
    StIndI8,
    #[strum(serialize = "stind.r4")]
    StIndR4,
    #[strum(serialize = "stind.r8")]
    StIndR8,
    #[strum(serialize = "add")]
    Add,
    #[strum(serialize = "sub")]
    Sub,
    #[strum(serialize = "mul")]
    Mul,
    #[strum(serialize = "conv.i4")]
    ConvI4,
    #[strum(serialize = "conv.i8")]
    ConvI8,
    #[strum(serialize = "conv.r8")]
    ConvR8,
    #[strum(serialize = "callvirt")]
    CallVirt,
    #[strum(serialize = "ldobj")]
    LdObj,
    #[strum(serialize = "ldstr")]
    LdStr,
    #[strum(serialize = "newobj")]
    NewObj,
    #[strum(serialize = "castclass")]
    CastClass,
    #[strum(serialize = "isinst")]
    IsInst,
    #[strum(serialize = "unbox")]
    Unbox,
    #[strum(serialize = "throw")]
    Throw,
    #[strum(serialize = "ldfld")]
    LdFld,
    #[strum(serialize = "ldflda")]
    LdFlda,
    #[strum(serialize = "stfld")]
    StFld,
    #[strum(serialize = "stobj")]
    StObj,
    #[strum(serialize = "box")]
    Box,
    #[strum(serialize = "newarr")]
    NewArr,
    #[strum(serialize = "ldlen")]
    LdLen,
    #[strum(serialize = "ldelem.ref")]
    LdElemRef,
    #[strum(serialize = "stelem.ref")]
    StElemRef,
    #[strum(serialize = "unbox.any")]
    UnboxAny,
    #[strum(serialize = "stind.i")]
    StIndI,
    #[strum(serialize = "ceq")]
    Ceq,
    #[strum(serialize = "ldarg")]
    LdArg,
    #[strum(serialize = "ldarga")]
    LdArga,
    #[strum(serialize = "starg")]
    StArg,
    #[strum(serialize = "ldloc")]
    LdLoc,
    #[strum(serialize = "ldloca")]
    LdLoca,
    #[strum(serialize = "stloc")]
    StLoc,
    #[strum(serialize = "initobj")]
    InitObj,
}

/// Static description of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpCodeInfo {
    /// `0xFE` for two-byte opcodes, `0` otherwise
    pub prefix: u8,
    /// The (second) opcode byte
    pub byte: u8,
    /// Inline operand kind
    pub operand: OperandType,
    /// Values popped; meaningless when `variable` is set
    pub pops: u8,
    /// Values pushed; meaningless when `variable` is set
    pub pushes: u8,
    /// The stack effect depends on a method signature (calls, `ret`)
    pub variable: bool,
    /// Control-flow class
    pub flow: FlowType,
}

const fn op(byte: u8, operand: OperandType, pops: u8, pushes: u8) -> OpCodeInfo {
    OpCodeInfo {
        prefix: 0,
        byte,
        operand,
        pops,
        pushes,
        variable: false,
        flow: FlowType::Sequential,
    }
}

const fn fe(byte: u8, operand: OperandType, pops: u8, pushes: u8) -> OpCodeInfo {
    OpCodeInfo {
        prefix: FE_PREFIX,
        ..op(byte, operand, pops, pushes)
    }
}

const fn flow(info: OpCodeInfo, flow: FlowType) -> OpCodeInfo {
    OpCodeInfo { flow, ..info }
}

const fn variable(info: OpCodeInfo) -> OpCodeInfo {
    OpCodeInfo {
        variable: true,
        ..info
    }
}

static BYTE_LOOKUP: OnceLock<HashMap<(u8, u8), OpCode>> = OnceLock::new();
static MNEMONIC_LOOKUP: OnceLock<HashMap<&'static str, OpCode>> = OnceLock::new();

impl OpCode {
    /// Returns the static description of this opcode.
    #[must_use]
    pub const fn info(self) -> OpCodeInfo {
        use OperandType as O;
        match self {
            OpCode::Nop => op(0x00, O::None, 0, 0),
            OpCode::LdArg0 => op(0x02, O::None, 0, 1),
            OpCode::LdArg1 => op(0x03, O::None, 0, 1),
            OpCode::LdArg2 => op(0x04, O::None, 0, 1),
            OpCode::LdArg3 => op(0x05, O::None, 0, 1),
            OpCode::LdLoc0 => op(0x06, O::None, 0, 1),
            OpCode::LdLoc1 => op(0x07, O::None, 0, 1),
            OpCode::LdLoc2 => op(0x08, O::None, 0, 1),
            OpCode::LdLoc3 => op(0x09, O::None, 0, 1),
            OpCode::StLoc0 => op(0x0A, O::None, 1, 0),
            OpCode::StLoc1 => op(0x0B, O::None, 1, 0),
            OpCode::StLoc2 => op(0x0C, O::None, 1, 0),
            OpCode::StLoc3 => op(0x0D, O::None, 1, 0),
            OpCode::LdArgS => op(0x0E, O::UInt8, 0, 1),
            OpCode::LdArgaS => op(0x0F, O::UInt8, 0, 1),
            OpCode::StArgS => op(0x10, O::UInt8, 1, 0),
            OpCode::LdLocS => op(0x11, O::UInt8, 0, 1),
            OpCode::LdLocaS => op(0x12, O::UInt8, 0, 1),
            OpCode::StLocS => op(0x13, O::UInt8, 1, 0),
            OpCode::LdNull => op(0x14, O::None, 0, 1),
            OpCode::LdcI4M1 => op(0x15, O::None, 0, 1),
            OpCode::LdcI4_0 => op(0x16, O::None, 0, 1),
            OpCode::LdcI4_1 => op(0x17, O::None, 0, 1),
            OpCode::LdcI4_2 => op(0x18, O::None, 0, 1),
            OpCode::LdcI4_3 => op(0x19, O::None, 0, 1),
            OpCode::LdcI4_4 => op(0x1A, O::None, 0, 1),
            OpCode::LdcI4_5 => op(0x1B, O::None, 0, 1),
            OpCode::LdcI4_6 => op(0x1C, O::None, 0, 1),
            OpCode::LdcI4_7 => op(0x1D, O::None, 0, 1),
            OpCode::LdcI4_8 => op(0x1E, O::None, 0, 1),
            OpCode::LdcI4S => op(0x1F, O::Int8, 0, 1),
            OpCode::LdcI4 => op(0x20, O::Int32, 0, 1),
            OpCode::LdcI8 => op(0x21, O::Int64, 0, 1),
            OpCode::LdcR4 => op(0x22, O::Float32, 0, 1),
            OpCode::LdcR8 => op(0x23, O::Float64, 0, 1),
            OpCode::Dup => op(0x25, O::None, 1, 2),
            OpCode::Pop => op(0x26, O::None, 1, 0),
            OpCode::Call => variable(flow(op(0x28, O::Token, 0, 0), FlowType::Call)),
            OpCode::Ret => variable(flow(op(0x2A, O::None, 0, 0), FlowType::Return)),
            OpCode::Br => flow(op(0x38, O::Int32, 0, 0), FlowType::UnconditionalBranch),
            OpCode::BrFalse => flow(op(0x39, O::Int32, 1, 0), FlowType::ConditionalBranch),
            OpCode::BrTrue => flow(op(0x3A, O::Int32, 1, 0), FlowType::ConditionalBranch),
            OpCode::Beq => flow(op(0x3B, O::Int32, 2, 0), FlowType::ConditionalBranch),
            OpCode::BneUn => flow(op(0x40, O::Int32, 2, 0), FlowType::ConditionalBranch),
            OpCode::Switch => flow(op(0x45, O::Switch, 1, 0), FlowType::Switch),
            OpCode::LdIndI1 => op(0x46, O::None, 1, 1),
            OpCode::LdIndU1 => op(0x47, O::None, 1, 1),
            OpCode::LdIndI2 => op(0x48, O::None, 1, 1),
            OpCode::LdIndU2 => op(0x49, O::None, 1, 1),
            OpCode::LdIndI4 => op(0x4A, O::None, 1, 1),
            OpCode::LdIndU4 => op(0x4B, O::None, 1, 1),
            OpCode::LdIndI8 => op(0x4C, O::None, 1, 1),
            OpCode::LdIndI => op(0x4D, O::None, 1, 1),
            OpCode::LdIndR4 => op(0x4E, O::None, 1, 1),
            OpCode::LdIndR8 => op(0x4F, O::None, 1, 1),
            OpCode::LdIndRef => op(0x50, O::None, 1, 1),
            OpCode::StIndRef => op(0x51, O::None, 2, 0),
            OpCode::StIndI1 => op(0x52, O::None, 2, 0),
            OpCode::StIndI2 => op(0x53, O::None, 2, 0),
            OpCode::StIndI4 => op(0x54, O::None, 2, 0),
            OpCode::StIndI8 => op(0x55, O::None, 2, 0),
            OpCode::StIndR4 => op(0x56, O::None, 2, 0),
            OpCode::StIndR8 => op(0x57, O::None, 2, 0),
            OpCode::Add => op(0x58, O::None, 2, 1),
            OpCode::Sub => op(0x59, O::None, 2, 1),
            OpCode::Mul => op(0x5A, O::None, 2, 1),
            OpCode::ConvI4 => op(0x69, O::None, 1, 1),
            OpCode::ConvI8 => op(0x6A, O::None, 1, 1),
            OpCode::ConvR8 => op(0x6C, O::None, 1, 1),
            OpCode::CallVirt => variable(flow(op(0x6F, O::Token, 0, 0), FlowType::Call)),
            OpCode::LdObj => op(0x71, O::Token, 1, 1),
            OpCode::LdStr => op(0x72, O::Token, 0, 1),
            OpCode::NewObj => variable(flow(op(0x73, O::Token, 0, 0), FlowType::Call)),
            OpCode::CastClass => op(0x74, O::Token, 1, 1),
            OpCode::IsInst => op(0x75, O::Token, 1, 1),
            OpCode::Unbox => op(0x79, O::Token, 1, 1),
            OpCode::Throw => flow(op(0x7A, O::None, 1, 0), FlowType::Throw),
            OpCode::LdFld => op(0x7B, O::Token, 1, 1),
            OpCode::LdFlda => op(0x7C, O::Token, 1, 1),
            OpCode::StFld => op(0x7D, O::Token, 2, 0),
            OpCode::StObj => op(0x81, O::Token, 2, 0),
            OpCode::Box => op(0x8C, O::Token, 1, 1),
            OpCode::NewArr => op(0x8D, O::Token, 1, 1),
            OpCode::LdLen => op(0x8E, O::None, 1, 1),
            OpCode::LdElemRef => op(0x9A, O::None, 2, 1),
            OpCode::StElemRef => op(0xA2, O::None, 3, 0),
            OpCode::UnboxAny => op(0xA5, O::Token, 1, 1),
            OpCode::StIndI => op(0xDF, O::None, 2, 0),
            OpCode::Ceq => fe(0x01, O::None, 2, 1),
            OpCode::LdArg => fe(0x09, O::UInt16, 0, 1),
            OpCode::LdArga => fe(0x0A, O::UInt16, 0, 1),
            OpCode::StArg => fe(0x0B, O::UInt16, 1, 0),
            OpCode::LdLoc => fe(0x0C, O::UInt16, 0, 1),
            OpCode::LdLoca => fe(0x0D, O::UInt16, 0, 1),
            OpCode::StLoc => fe(0x0E, O::UInt16, 1, 0),
            OpCode::InitObj => fe(0x15, O::Token, 1, 0),
        }
    }

    /// The ILDasm mnemonic of this opcode.
    #[must_use]
    pub fn mnemonic(self) -> &'static str {
        self.into()
    }

    /// The inline operand kind.
    #[must_use]
    pub fn operand_type(self) -> OperandType {
        self.info().operand
    }

    /// The control-flow class.
    #[must_use]
    pub fn flow(self) -> FlowType {
        self.info().flow
    }

    /// The static stack effect, `None` for opcodes whose effect depends on a signature.
    #[must_use]
    pub fn stack_behavior(self) -> Option<StackBehavior> {
        let info = self.info();
        if info.variable {
            return None;
        }
        #[allow(clippy::cast_possible_wrap)]
        Some(StackBehavior {
            pops: info.pops,
            pushes: info.pushes,
            net_effect: info.pushes as i8 - info.pops as i8,
        })
    }

    /// Number of bytes taken by the opcode itself (1 or 2).
    #[must_use]
    pub fn opcode_size(self) -> usize {
        if self.info().prefix == 0 {
            1
        } else {
            2
        }
    }

    /// Total encoded size for opcodes with a fixed-size operand.
    ///
    /// Returns `None` for `switch`, whose size depends on its target count.
    #[must_use]
    pub fn encoded_size(self) -> Option<usize> {
        self.operand_type()
            .size()
            .map(|operand| self.opcode_size() + operand)
    }

    /// Looks up an opcode by its encoding. `prefix` is `0` for single-byte opcodes.
    #[must_use]
    pub fn from_bytes(prefix: u8, byte: u8) -> Option<OpCode> {
        BYTE_LOOKUP
            .get_or_init(|| {
                OpCode::iter()
                    .map(|opcode| {
                        let info = opcode.info();
                        ((info.prefix, info.byte), opcode)
                    })
                    .collect()
            })
            .get(&(prefix, byte))
            .copied()
    }

    /// Looks up an opcode by its mnemonic.
    #[must_use]
    pub fn from_mnemonic(mnemonic: &str) -> Option<OpCode> {
        MNEMONIC_LOOKUP
            .get_or_init(|| {
                OpCode::iter()
                    .map(|opcode| (opcode.mnemonic(), opcode))
                    .collect()
            })
            .get(mnemonic)
            .copied()
    }

    /// Returns `true` for opcodes that transfer control to a label.
    #[must_use]
    pub fn is_branch(self) -> bool {
        matches!(
            self.flow(),
            FlowType::ConditionalBranch | FlowType::UnconditionalBranch | FlowType::Switch
        )
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mnemonic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn encodings_are_unique() {
        let mut seen = HashSet::new();
        for opcode in OpCode::iter() {
            let info = opcode.info();
            assert!(
                seen.insert((info.prefix, info.byte)),
                "duplicate encoding for {opcode}"
            );
        }
    }

    #[test]
    fn lookup_tables_are_complete() {
        for opcode in OpCode::iter() {
            let info = opcode.info();
            assert_eq!(OpCode::from_bytes(info.prefix, info.byte), Some(opcode));
            assert_eq!(OpCode::from_mnemonic(opcode.mnemonic()), Some(opcode));
        }
        assert_eq!(OpCode::from_bytes(0, 0x24), None);
        assert_eq!(OpCode::from_mnemonic("br.s"), None);
    }

    #[test]
    fn known_encodings() {
        assert_eq!(OpCode::Ret.info().byte, 0x2A);
        assert_eq!(OpCode::Box.info().byte, 0x8C);
        assert_eq!(OpCode::UnboxAny.info().byte, 0xA5);
        assert_eq!(OpCode::InitObj.info().prefix, FE_PREFIX);
        assert_eq!(OpCode::InitObj.info().byte, 0x15);
        assert_eq!(OpCode::LdArga.mnemonic(), "ldarga");
    }

    #[test]
    fn sizes() {
        assert_eq!(OpCode::LdArg0.encoded_size(), Some(1));
        assert_eq!(OpCode::LdArgaS.encoded_size(), Some(2));
        assert_eq!(OpCode::LdArga.encoded_size(), Some(4));
        assert_eq!(OpCode::Br.encoded_size(), Some(5));
        assert_eq!(OpCode::LdcI8.encoded_size(), Some(9));
        assert_eq!(OpCode::InitObj.encoded_size(), Some(6));
        assert_eq!(OpCode::Switch.encoded_size(), None);
    }

    #[test]
    fn stack_effects() {
        assert_eq!(OpCode::Call.stack_behavior(), None);
        let dup = OpCode::Dup.stack_behavior().unwrap();
        assert_eq!(dup.net_effect, 1);
        let stelem = OpCode::StElemRef.stack_behavior().unwrap();
        assert_eq!(stelem.pops, 3);
        assert_eq!(stelem.net_effect, -3);
    }
}
