//! CIL instruction encoding.
//!
//! [`InstructionEncoder`] turns opcodes and operands into bytecode, resolves branch labels
//! and tracks the evaluation stack depth so that `max_stack` falls out of encoding and
//! inconsistent stack shapes are rejected at the point where they are produced.
//!
//! Emission can be speculative: [`InstructionEncoder::checkpoint`] captures the complete
//! encoder state and [`InstructionEncoder::rollback`] restores it, discarding everything
//! emitted in between (bytes, labels, fixups and stack bookkeeping).
//!
//! # Usage Examples
//!
//! ```rust
//! use dotreflect::assembly::{InstructionEncoder, OpCode};
//!
//! let mut encoder = InstructionEncoder::new();
//!
//! encoder.emit_ldarg(0)?;
//! encoder.emit_branch(OpCode::BrTrue, "nonzero")?;
//! encoder.emit_ldc_i4(0)?;
//! encoder.emit_ret(true)?;
//! encoder.define_label("nonzero")?;
//! encoder.emit_ldc_i4(1)?;
//! encoder.emit_ret(true)?;
//!
//! let (bytecode, max_stack, labels) = encoder.finalize()?;
//! assert_eq!(max_stack, 1);
//! assert_eq!(labels["nonzero"], 8);
//! assert_eq!(bytecode[1..6], [0x3A, 0x02, 0x00, 0x00, 0x00]);
//! # Ok::<(), dotreflect::Error>(())
//! ```

use std::collections::HashMap;

use crate::{
    assembly::{
        instruction::{FlowType, Immediate, Operand, OperandType},
        opcodes::OpCode,
    },
    metadata::token::Token,
    Error, Result,
};

/// Label fixup information for branch instruction resolution.
#[derive(Debug, Clone)]
pub struct LabelFixup {
    /// The target label name to resolve
    pub label: String,
    /// Position in bytecode where the 4-byte branch offset is written
    pub fixup_position: usize,
    /// Position of the branch instruction
    pub instruction_position: usize,
}

/// Switch fixup information for multi-way branch resolution.
#[derive(Debug, Clone)]
pub struct SwitchFixup {
    /// The target label names to resolve (one per switch case)
    pub labels: Vec<String>,
    /// Position in bytecode where the switch targets start (after the count)
    pub fixup_position: usize,
    /// Position after the switch instruction (for relative offset calculation)
    pub instruction_end_position: usize,
}

/// Complete encoder state captured by [`InstructionEncoder::checkpoint`].
#[derive(Debug, Clone)]
pub struct EncoderCheckpoint {
    bytecode_len: usize,
    fixups_len: usize,
    switch_fixups_len: usize,
    labels: HashMap<String, u32>,
    label_stack_depths: HashMap<String, i16>,
    current_stack_depth: i16,
    max_stack_depth: u16,
    unreachable: bool,
}

impl EncoderCheckpoint {
    /// Bytecode position at which the checkpoint was taken.
    #[must_use]
    pub fn position(&self) -> usize {
        self.bytecode_len
    }
}

/// Core CIL instruction encoder.
///
/// [`InstructionEncoder`] is not shared between threads; each body under construction
/// owns its encoder.
#[derive(Debug, Default)]
pub struct InstructionEncoder {
    /// Generated bytecode buffer
    bytecode: Vec<u8>,
    /// Defined label positions (label_name -> byte_position)
    labels: HashMap<String, u32>,
    /// Pending branch fixups awaiting label resolution
    fixups: Vec<LabelFixup>,
    /// Pending switch fixups awaiting label resolution
    switch_fixups: Vec<SwitchFixup>,
    /// Current stack depth (number of items on evaluation stack)
    current_stack_depth: i16,
    /// Maximum stack depth reached during encoding
    max_stack_depth: u16,
    /// Expected stack depth at branch targets.
    label_stack_depths: HashMap<String, i16>,
    /// Set after an unconditional transfer; cleared when a label is defined.
    unreachable: bool,
}

impl InstructionEncoder {
    /// Create a new instruction encoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit an instruction with a fixed stack effect.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidOpcode`] for calls, `ret`, branches and `switch`, which have
    ///   dedicated emit methods
    /// - [`Error::WrongOperandType`] if the operand does not match the opcode
    /// - [`Error::Malformed`] on stack underflow
    pub fn emit_instruction(&mut self, opcode: OpCode, operand: Option<Operand>) -> Result<()> {
        let info = opcode.info();
        if info.variable {
            return Err(Error::InvalidOpcode(format!(
                "'{opcode}' needs an explicit stack effect"
            )));
        }
        if opcode.is_branch() {
            return Err(Error::InvalidOpcode(format!(
                "'{opcode}' must be emitted with a label"
            )));
        }

        self.emit_opcode(opcode);
        self.emit_operand(operand, info.operand)?;

        self.update_stack_depth(info.pops, info.pushes)
            .map_err(|e| malformed_error!("Stack error at instruction '{}': {}", opcode, e))?;

        if matches!(info.flow, FlowType::Return | FlowType::Throw) {
            self.unreachable = true;
        }

        Ok(())
    }

    /// Emit a long-form branch instruction targeting `label`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBranch`] if the opcode is not a branch, or
    /// [`Error::Malformed`] if the stack depth at the target is inconsistent.
    pub fn emit_branch(&mut self, opcode: OpCode, label: &str) -> Result<()> {
        let info = opcode.info();
        if !matches!(
            info.flow,
            FlowType::ConditionalBranch | FlowType::UnconditionalBranch
        ) || info.operand != OperandType::Int32
        {
            return Err(Error::InvalidBranch(format!(
                "instruction '{opcode}' is not a branch instruction"
            )));
        }

        let instruction_position = self.bytecode.len();
        self.emit_opcode(opcode);

        self.fixups.push(LabelFixup {
            label: label.to_string(),
            fixup_position: self.bytecode.len(),
            instruction_position,
        });
        self.bytecode.extend_from_slice(&[0, 0, 0, 0]);

        self.update_stack_depth(info.pops, info.pushes)
            .map_err(|e| {
                malformed_error!("Stack error at branch '{}' to '{}': {}", opcode, label, e)
            })?;

        self.record_label_stack_depth(label)?;

        if info.flow == FlowType::UnconditionalBranch {
            self.unreachable = true;
        }

        Ok(())
    }

    /// Emit a `switch` instruction with one target label per case.
    ///
    /// # Errors
    ///
    /// Returns an error if the labels slice is empty or the stack is inconsistent.
    pub fn emit_switch(&mut self, labels: &[&str]) -> Result<()> {
        if labels.is_empty() {
            return Err(Error::InvalidBranch(
                "switch must have at least one target".to_string(),
            ));
        }

        self.emit_opcode(OpCode::Switch);

        let num_targets =
            u32::try_from(labels.len()).map_err(|_| malformed_error!("Too many switch targets"))?;
        self.bytecode.extend_from_slice(&num_targets.to_le_bytes());

        let fixup_position = self.bytecode.len();
        for _ in 0..labels.len() {
            self.bytecode.extend_from_slice(&[0, 0, 0, 0]);
        }

        self.switch_fixups.push(SwitchFixup {
            labels: labels.iter().map(|s| (*s).to_string()).collect(),
            fixup_position,
            instruction_end_position: self.bytecode.len(),
        });

        self.update_stack_depth(1, 0)
            .map_err(|e| malformed_error!("Stack error at 'switch': {}", e))?;

        for label in labels {
            self.record_label_stack_depth(label)?;
        }

        Ok(())
    }

    /// Emit `call`, `callvirt` or `newobj` with an explicit stack effect.
    ///
    /// `num_args` includes the receiver for instance calls. For `newobj` it counts only
    /// the constructor arguments and `has_result` should be `true`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOpcode`] for any other opcode, or [`Error::Malformed`] on
    /// stack underflow.
    pub fn emit_call(
        &mut self,
        opcode: OpCode,
        token: Token,
        num_args: u8,
        has_result: bool,
    ) -> Result<()> {
        if !matches!(opcode, OpCode::Call | OpCode::CallVirt | OpCode::NewObj) {
            return Err(Error::InvalidOpcode(format!(
                "'{opcode}' is not a call instruction"
            )));
        }

        self.emit_opcode(opcode);
        self.emit_operand(Some(Operand::Token(token)), OperandType::Token)?;

        let pushes = u8::from(has_result);
        self.update_stack_depth(num_args, pushes)
            .map_err(|e| malformed_error!("Stack error at call '{}': {}", opcode, e))?;

        Ok(())
    }

    /// Emit `ret`, popping the return value when `has_value` is set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] if anything but the return value is left on the
    /// evaluation stack.
    pub fn emit_ret(&mut self, has_value: bool) -> Result<()> {
        self.emit_opcode(OpCode::Ret);
        self.update_stack_depth(u8::from(has_value), 0)
            .map_err(|e| malformed_error!("Stack error at 'ret': {}", e))?;

        if !self.unreachable && self.current_stack_depth != 0 {
            return Err(malformed_error!(
                "Stack not empty at 'ret': {} item(s) left",
                self.current_stack_depth
            ));
        }

        self.unreachable = true;
        Ok(())
    }

    /// Emit a `ldarg` instruction with optimal encoding and return the opcode chosen.
    ///
    /// - `ldarg.0` through `ldarg.3` for indices 0-3 (1 byte)
    /// - `ldarg.s` for indices 4-255 (2 bytes)
    /// - `ldarg` for indices 256+ (4 bytes)
    pub fn emit_ldarg(&mut self, index: u16) -> Result<OpCode> {
        match index {
            0 => self.emit_fixed(OpCode::LdArg0),
            1 => self.emit_fixed(OpCode::LdArg1),
            2 => self.emit_fixed(OpCode::LdArg2),
            3 => self.emit_fixed(OpCode::LdArg3),
            _ => self.emit_indexed(OpCode::LdArgS, OpCode::LdArg, index),
        }
    }

    /// Emit a `ldarga` instruction with optimal encoding.
    pub fn emit_ldarga(&mut self, index: u16) -> Result<OpCode> {
        self.emit_indexed(OpCode::LdArgaS, OpCode::LdArga, index)
    }

    /// Emit a `starg` instruction with optimal encoding.
    pub fn emit_starg(&mut self, index: u16) -> Result<OpCode> {
        self.emit_indexed(OpCode::StArgS, OpCode::StArg, index)
    }

    /// Emit a `ldloc` instruction with optimal encoding.
    pub fn emit_ldloc(&mut self, index: u16) -> Result<OpCode> {
        match index {
            0 => self.emit_fixed(OpCode::LdLoc0),
            1 => self.emit_fixed(OpCode::LdLoc1),
            2 => self.emit_fixed(OpCode::LdLoc2),
            3 => self.emit_fixed(OpCode::LdLoc3),
            _ => self.emit_indexed(OpCode::LdLocS, OpCode::LdLoc, index),
        }
    }

    /// Emit a `ldloca` instruction with optimal encoding.
    pub fn emit_ldloca(&mut self, index: u16) -> Result<OpCode> {
        self.emit_indexed(OpCode::LdLocaS, OpCode::LdLoca, index)
    }

    /// Emit a `stloc` instruction with optimal encoding.
    pub fn emit_stloc(&mut self, index: u16) -> Result<OpCode> {
        match index {
            0 => self.emit_fixed(OpCode::StLoc0),
            1 => self.emit_fixed(OpCode::StLoc1),
            2 => self.emit_fixed(OpCode::StLoc2),
            3 => self.emit_fixed(OpCode::StLoc3),
            _ => self.emit_indexed(OpCode::StLocS, OpCode::StLoc, index),
        }
    }

    /// Emit a `ldc.i4` instruction with optimal encoding.
    ///
    /// - `ldc.i4.m1` through `ldc.i4.8` for values -1 to 8 (1 byte)
    /// - `ldc.i4.s` for values -128 to 127 (2 bytes)
    /// - `ldc.i4` for all other values (5 bytes)
    pub fn emit_ldc_i4(&mut self, value: i32) -> Result<OpCode> {
        let short = match value {
            -1 => Some(OpCode::LdcI4M1),
            0 => Some(OpCode::LdcI4_0),
            1 => Some(OpCode::LdcI4_1),
            2 => Some(OpCode::LdcI4_2),
            3 => Some(OpCode::LdcI4_3),
            4 => Some(OpCode::LdcI4_4),
            5 => Some(OpCode::LdcI4_5),
            6 => Some(OpCode::LdcI4_6),
            7 => Some(OpCode::LdcI4_7),
            8 => Some(OpCode::LdcI4_8),
            _ => None,
        };

        let (opcode, operand) = match (short, i8::try_from(value)) {
            (Some(opcode), _) => (opcode, None),
            (None, Ok(byte)) => (
                OpCode::LdcI4S,
                Some(Operand::Immediate(Immediate::Int8(byte))),
            ),
            (None, Err(_)) => (
                OpCode::LdcI4,
                Some(Operand::Immediate(Immediate::Int32(value))),
            ),
        };
        self.emit_instruction(opcode, operand)?;
        Ok(opcode)
    }

    fn emit_fixed(&mut self, opcode: OpCode) -> Result<OpCode> {
        self.emit_instruction(opcode, None)?;
        Ok(opcode)
    }

    fn emit_indexed(&mut self, short: OpCode, long: OpCode, index: u16) -> Result<OpCode> {
        let (opcode, operand) = match u8::try_from(index) {
            Ok(byte) => (short, Immediate::UInt8(byte)),
            Err(_) => (long, Immediate::UInt16(index)),
        };
        self.emit_instruction(opcode, Some(Operand::Immediate(operand)))?;
        Ok(opcode)
    }

    /// Define a label at the current bytecode position.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateLabel`] if the label already exists, or
    /// [`Error::Malformed`] if a fall-through path reaches the label with a different
    /// stack depth than the branches targeting it.
    pub fn define_label(&mut self, name: &str) -> Result<()> {
        if self.labels.contains_key(name) {
            return Err(Error::DuplicateLabel(name.to_string()));
        }

        // All control flow paths to this label must have the same stack depth.
        if let Some(&expected) = self.label_stack_depths.get(name) {
            if self.unreachable {
                self.current_stack_depth = expected;
            } else if self.current_stack_depth != expected {
                return Err(malformed_error!(
                    "Stack depth mismatch at label '{}': expected {} (from branch), got {} (current)",
                    name,
                    expected,
                    self.current_stack_depth
                ));
            }
        } else if !self.unreachable {
            self.label_stack_depths
                .insert(name.to_string(), self.current_stack_depth);
        } else {
            self.current_stack_depth = 0;
        }

        self.unreachable = false;

        let position = u32::try_from(self.bytecode.len())
            .map_err(|_| malformed_error!("Bytecode length exceeds u32 range"))?;
        self.labels.insert(name.to_string(), position);
        Ok(())
    }

    /// Returns the resolved offset for a defined label.
    #[must_use]
    pub fn label_offset(&self, name: &str) -> Option<u32> {
        self.labels.get(name).copied()
    }

    /// Returns the current bytecode position (length of emitted bytecode so far).
    #[must_use]
    pub fn current_position(&self) -> u32 {
        u32::try_from(self.bytecode.len()).unwrap_or(u32::MAX)
    }

    /// Maximum stack depth reached so far.
    #[must_use]
    pub fn max_stack_depth(&self) -> u16 {
        self.max_stack_depth
    }

    /// Current evaluation stack depth.
    #[must_use]
    pub fn current_stack_depth(&self) -> i16 {
        self.current_stack_depth
    }

    /// Returns `true` after an unconditional transfer with no label defined since.
    #[must_use]
    pub fn is_unreachable(&self) -> bool {
        self.unreachable
    }

    /// Captures the complete encoder state.
    #[must_use]
    pub fn checkpoint(&self) -> EncoderCheckpoint {
        EncoderCheckpoint {
            bytecode_len: self.bytecode.len(),
            fixups_len: self.fixups.len(),
            switch_fixups_len: self.switch_fixups.len(),
            labels: self.labels.clone(),
            label_stack_depths: self.label_stack_depths.clone(),
            current_stack_depth: self.current_stack_depth,
            max_stack_depth: self.max_stack_depth,
            unreachable: self.unreachable,
        }
    }

    /// Restores the state captured by [`InstructionEncoder::checkpoint`].
    ///
    /// Everything emitted after the checkpoint is discarded. Rolling back to the same
    /// checkpoint twice is a no-op the second time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] if the checkpoint lies beyond the current position,
    /// which happens when it was taken before an earlier rollback.
    pub fn rollback(&mut self, checkpoint: &EncoderCheckpoint) -> Result<()> {
        if checkpoint.bytecode_len > self.bytecode.len()
            || checkpoint.fixups_len > self.fixups.len()
            || checkpoint.switch_fixups_len > self.switch_fixups.len()
        {
            return Err(malformed_error!(
                "Checkpoint at {} is past the current position {}",
                checkpoint.bytecode_len,
                self.bytecode.len()
            ));
        }

        self.bytecode.truncate(checkpoint.bytecode_len);
        self.fixups.truncate(checkpoint.fixups_len);
        self.switch_fixups.truncate(checkpoint.switch_fixups_len);
        self.labels.clone_from(&checkpoint.labels);
        self.label_stack_depths
            .clone_from(&checkpoint.label_stack_depths);
        self.current_stack_depth = checkpoint.current_stack_depth;
        self.max_stack_depth = checkpoint.max_stack_depth;
        self.unreachable = checkpoint.unreachable;
        Ok(())
    }

    /// Finalize encoding and resolve all label references.
    ///
    /// Returns the bytecode, the maximum stack depth and the final label positions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UndefinedLabel`] if any referenced label was never defined.
    pub fn finalize(mut self) -> Result<(Vec<u8>, u16, HashMap<String, u32>)> {
        let fixups = std::mem::take(&mut self.fixups);
        for fixup in &fixups {
            let label_position = self
                .labels
                .get(&fixup.label)
                .ok_or_else(|| Error::UndefinedLabel(fixup.label.clone()))?;

            let next_instruction = fixup.fixup_position + 4;
            let offset = relative_offset(*label_position, next_instruction)?;
            self.bytecode[fixup.fixup_position..next_instruction]
                .copy_from_slice(&offset.to_le_bytes());
        }

        let switch_fixups = std::mem::take(&mut self.switch_fixups);
        for switch_fixup in &switch_fixups {
            for (i, label) in switch_fixup.labels.iter().enumerate() {
                let label_position = self
                    .labels
                    .get(label)
                    .ok_or_else(|| Error::UndefinedLabel(label.clone()))?;

                // Switch offsets are relative to the end of the whole switch instruction
                let offset =
                    relative_offset(*label_position, switch_fixup.instruction_end_position)?;
                let target_pos = switch_fixup.fixup_position + i * 4;
                self.bytecode[target_pos..target_pos + 4].copy_from_slice(&offset.to_le_bytes());
            }
        }

        Ok((self.bytecode, self.max_stack_depth, self.labels))
    }

    fn emit_opcode(&mut self, opcode: OpCode) {
        let info = opcode.info();
        if info.prefix != 0 {
            self.bytecode.push(info.prefix);
        }
        self.bytecode.push(info.byte);
    }

    fn emit_operand(&mut self, operand: Option<Operand>, expected: OperandType) -> Result<()> {
        match (expected, operand) {
            (OperandType::None, None) => {}
            (OperandType::Int8, Some(Operand::Immediate(Immediate::Int8(val)))) => {
                self.bytecode.extend_from_slice(&val.to_le_bytes());
            }
            (OperandType::UInt8, Some(Operand::Immediate(Immediate::UInt8(val)))) => {
                self.bytecode.push(val);
            }
            (OperandType::UInt16, Some(Operand::Immediate(Immediate::UInt16(val)))) => {
                self.bytecode.extend_from_slice(&val.to_le_bytes());
            }
            (OperandType::Int32, Some(Operand::Immediate(Immediate::Int32(val)))) => {
                self.bytecode.extend_from_slice(&val.to_le_bytes());
            }
            (OperandType::Int64, Some(Operand::Immediate(Immediate::Int64(val)))) => {
                self.bytecode.extend_from_slice(&val.to_le_bytes());
            }
            (OperandType::Float32, Some(Operand::Immediate(Immediate::Float32(val)))) => {
                self.bytecode.extend_from_slice(&val.to_le_bytes());
            }
            (OperandType::Float64, Some(Operand::Immediate(Immediate::Float64(val)))) => {
                self.bytecode.extend_from_slice(&val.to_le_bytes());
            }
            (OperandType::Token, Some(Operand::Token(token))) => {
                self.bytecode
                    .extend_from_slice(&token.value().to_le_bytes());
            }
            (expected, _) => {
                return Err(Error::WrongOperandType {
                    expected: format!("{expected:?}"),
                });
            }
        }
        Ok(())
    }

    fn update_stack_depth(&mut self, pops: u8, pushes: u8) -> Result<()> {
        let net_effect = i16::from(pushes) - i16::from(pops);
        self.current_stack_depth += net_effect;

        // Depth is meaningless in unreachable code; a label resets it.
        if self.current_stack_depth < 0 && !self.unreachable {
            return Err(malformed_error!(
                "Stack underflow: depth became {} after instruction with {} pops, {} pushes",
                self.current_stack_depth,
                pops,
                pushes
            ));
        }

        if self.current_stack_depth < 0 {
            self.current_stack_depth = 0;
        }

        let current_depth_u16 = u16::try_from(self.current_stack_depth)
            .map_err(|_| malformed_error!("Stack depth exceeds u16 range"))?;
        self.max_stack_depth = self.max_stack_depth.max(current_depth_u16);

        Ok(())
    }

    fn record_label_stack_depth(&mut self, label: &str) -> Result<()> {
        if self.unreachable {
            return Ok(());
        }

        if let Some(&expected) = self.label_stack_depths.get(label) {
            if self.current_stack_depth != expected {
                return Err(malformed_error!(
                    "Stack depth mismatch for branch to '{}': expected {}, but branch has {}",
                    label,
                    expected,
                    self.current_stack_depth
                ));
            }
        } else {
            self.label_stack_depths
                .insert(label.to_string(), self.current_stack_depth);
        }
        Ok(())
    }
}

fn relative_offset(label_position: u32, next_instruction: usize) -> Result<i32> {
    let label = i32::try_from(label_position)
        .map_err(|_| malformed_error!("Label position exceeds i32 range"))?;
    let next = i32::try_from(next_instruction)
        .map_err(|_| malformed_error!("Instruction position exceeds i32 range"))?;
    Ok(label - next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_instruction_encoding() -> Result<()> {
        let mut encoder = InstructionEncoder::new();

        encoder.emit_instruction(OpCode::Nop, None)?;
        encoder.emit_ret(false)?;

        let (bytecode, max_stack, _) = encoder.finalize()?;
        assert_eq!(bytecode, vec![0x00, 0x2A]);
        assert_eq!(max_stack, 0);

        Ok(())
    }

    #[test]
    fn test_compact_forms() -> Result<()> {
        let mut encoder = InstructionEncoder::new();

        assert_eq!(encoder.emit_ldarg(1)?, OpCode::LdArg1);
        assert_eq!(encoder.emit_ldarg(10)?, OpCode::LdArgS);
        assert_eq!(encoder.emit_ldarg(300)?, OpCode::LdArg);
        assert_eq!(encoder.emit_ldc_i4(-1)?, OpCode::LdcI4M1);
        assert_eq!(encoder.emit_ldc_i4(42)?, OpCode::LdcI4S);
        assert_eq!(encoder.emit_ldc_i4(1000)?, OpCode::LdcI4);

        let (bytecode, max_stack, _) = encoder.finalize()?;
        assert_eq!(
            bytecode,
            vec![
                0x03, // ldarg.1
                0x0E, 10, // ldarg.s 10
                0xFE, 0x09, 0x2C, 0x01, // ldarg 300
                0x15, // ldc.i4.m1
                0x1F, 42, // ldc.i4.s 42
                0x20, 0xE8, 0x03, 0x00, 0x00, // ldc.i4 1000
            ]
        );
        assert_eq!(max_stack, 6);

        Ok(())
    }

    #[test]
    fn test_forward_label_resolution() -> Result<()> {
        let mut encoder = InstructionEncoder::new();

        encoder.emit_branch(OpCode::Br, "target")?; // 0..5
        encoder.define_label("skipped")?;
        encoder.emit_instruction(OpCode::Nop, None)?; // 5
        encoder.define_label("target")?; // 6
        encoder.emit_ret(false)?;

        let (bytecode, _, labels) = encoder.finalize()?;
        assert_eq!(bytecode, vec![0x38, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2A]);
        assert_eq!(labels["target"], 6);

        Ok(())
    }

    #[test]
    fn test_switch_targets() -> Result<()> {
        let mut encoder = InstructionEncoder::new();

        encoder.emit_ldarg(0)?;
        encoder.emit_switch(&["a", "b"])?; // 1..14
        encoder.emit_ret(false)?; // 14
        encoder.define_label("a")?; // 15
        encoder.emit_ret(false)?;
        encoder.define_label("b")?; // 16
        encoder.emit_ret(false)?;

        let (bytecode, _, _) = encoder.finalize()?;
        assert_eq!(&bytecode[1..6], &[0x45, 0x02, 0x00, 0x00, 0x00]);
        assert_eq!(&bytecode[6..10], &1i32.to_le_bytes());
        assert_eq!(&bytecode[10..14], &2i32.to_le_bytes());

        Ok(())
    }

    #[test]
    fn test_call_stack_effect() -> Result<()> {
        let mut encoder = InstructionEncoder::new();

        encoder.emit_ldarg(0)?;
        encoder.emit_ldarg(1)?;
        encoder.emit_call(OpCode::Call, Token::new(0x0600_0001), 2, true)?;
        assert_eq!(encoder.current_stack_depth(), 1);
        encoder.emit_ret(true)?;

        let (bytecode, max_stack, _) = encoder.finalize()?;
        assert_eq!(bytecode, vec![0x02, 0x03, 0x28, 0x01, 0x00, 0x00, 0x06, 0x2A]);
        assert_eq!(max_stack, 2);

        Ok(())
    }

    #[test]
    fn test_rejected_instructions() {
        let mut encoder = InstructionEncoder::new();

        assert!(matches!(
            encoder.emit_instruction(OpCode::Call, None),
            Err(Error::InvalidOpcode(_))
        ));
        assert!(matches!(
            encoder.emit_instruction(OpCode::Br, None),
            Err(Error::InvalidOpcode(_))
        ));
        assert!(matches!(
            encoder.emit_branch(OpCode::Nop, "x"),
            Err(Error::InvalidBranch(_))
        ));
        assert!(matches!(
            encoder.emit_instruction(
                OpCode::LdArgS,
                Some(Operand::Immediate(Immediate::Int32(1)))
            ),
            Err(Error::WrongOperandType { .. })
        ));
    }

    #[test]
    fn test_stack_underflow() {
        let mut encoder = InstructionEncoder::new();
        let result = encoder.emit_instruction(OpCode::Pop, None);
        assert!(matches!(result, Err(Error::Malformed { .. })));
    }

    #[test]
    fn test_ret_with_leftover_stack() {
        let mut encoder = InstructionEncoder::new();
        encoder.emit_ldc_i4(1).unwrap();
        encoder.emit_ldc_i4(2).unwrap();
        assert!(encoder.emit_ret(true).is_err());
    }

    #[test]
    fn test_undefined_label() {
        let mut encoder = InstructionEncoder::new();
        encoder.emit_branch(OpCode::Br, "undefined_label").unwrap();
        let result = encoder.finalize();
        assert!(matches!(result, Err(Error::UndefinedLabel(_))));
    }

    #[test]
    fn test_duplicate_label() -> Result<()> {
        let mut encoder = InstructionEncoder::new();
        encoder.define_label("test_label")?;
        let result = encoder.define_label("test_label");
        assert!(matches!(result, Err(Error::DuplicateLabel(_))));
        Ok(())
    }

    #[test]
    fn test_stack_depth_mismatch_at_label() -> Result<()> {
        let mut encoder = InstructionEncoder::new();
        encoder.emit_ldarg(0)?;
        encoder.emit_branch(OpCode::BrTrue, "join")?;
        encoder.emit_ldc_i4(1)?;
        assert!(encoder.define_label("join").is_err());
        Ok(())
    }

    #[test]
    fn test_checkpoint_rollback() -> Result<()> {
        let mut encoder = InstructionEncoder::new();
        encoder.emit_ldarg(0)?;

        let checkpoint = encoder.checkpoint();
        encoder.emit_ldarg(1)?;
        encoder.emit_ldarg(2)?;
        encoder.emit_branch(OpCode::Br, "discarded")?;
        encoder.define_label("discarded")?;
        assert_eq!(encoder.max_stack_depth(), 3);

        encoder.rollback(&checkpoint)?;
        assert_eq!(encoder.current_position(), 1);
        assert_eq!(encoder.current_stack_depth(), 1);
        assert_eq!(encoder.max_stack_depth(), 1);
        assert_eq!(encoder.label_offset("discarded"), None);

        // rolling back again is harmless
        encoder.rollback(&checkpoint)?;
        encoder.emit_ret(true)?;

        let (bytecode, max_stack, labels) = encoder.finalize()?;
        assert_eq!(bytecode, vec![0x02, 0x2A]);
        assert_eq!(max_stack, 1);
        assert!(labels.is_empty());

        Ok(())
    }
}
