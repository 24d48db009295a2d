//! CIL opcode table, instruction encoding and decoding.
//!
//! # Key Components
//!
//! - [`OpCode`] - the opcode table shared by every other component
//! - [`InstructionEncoder`] - bytecode generation with labels, stack tracking and rollback
//! - [`decode_instruction`] / [`decode_stream`] - bytecode back to [`Instruction`]s
//! - [`Parser`] - bounds-checked reader used by the decoder

mod decoder;
mod encoder;
mod instruction;
mod opcodes;
mod parser;

pub use decoder::{decode_instruction, decode_stream, validate_body};
pub use encoder::{EncoderCheckpoint, InstructionEncoder, LabelFixup, SwitchFixup};
pub use instruction::{FlowType, Immediate, Instruction, Operand, OperandType, StackBehavior};
pub use opcodes::{OpCode, OpCodeInfo, FE_PREFIX};
pub use parser::{read_le_at, CilIO, Parser};
