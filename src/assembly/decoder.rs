//! CIL instruction decoding.
//!
//! Decoding is the inverse of [`crate::assembly::InstructionEncoder`] and works off the
//! same opcode table. Finalized adapter bodies are decoded once to validate them and the
//! resulting instruction list is what the interpreter executes.

use crate::{
    assembly::{
        instruction::{FlowType, Immediate, Instruction, Operand, OperandType},
        opcodes::{OpCode, FE_PREFIX},
        parser::Parser,
    },
    metadata::token::Token,
    Error, Result,
};

/// Decodes every instruction in the parser's buffer, starting at its current position.
///
/// Offsets are relative to the start of the buffer.
///
/// # Errors
///
/// Returns an error if the stream contains an unknown opcode or a truncated operand.
///
/// ```rust
/// use dotreflect::{assembly::decode_stream, OpCode, Parser};
///
/// let bytecode = [0x00, 0x06, 0x2A]; // nop, ldloc.0, ret
/// let mut parser = Parser::new(&bytecode);
///
/// let instructions = decode_stream(&mut parser)?;
/// assert_eq!(instructions.len(), 3);
/// assert_eq!(instructions[1].opcode, OpCode::LdLoc0);
/// assert_eq!(instructions[2].offset, 2);
/// # Ok::<(), dotreflect::Error>(())
/// ```
pub fn decode_stream(parser: &mut Parser) -> Result<Vec<Instruction>> {
    let mut instructions = Vec::new();

    while parser.has_more_data() {
        instructions.push(decode_instruction(parser)?);
    }

    Ok(instructions)
}

/// Decodes a single instruction at the parser's current position.
///
/// # Errors
///
/// Returns [`Error::InvalidOpcode`] for byte sequences outside the opcode table and
/// [`Error::OutOfBounds`] for truncated operands.
pub fn decode_instruction(parser: &mut Parser) -> Result<Instruction> {
    let start = parser.pos();
    let first_byte = parser.read_le::<u8>()?;

    let opcode = if first_byte == FE_PREFIX {
        let second_byte = parser.read_le::<u8>()?;
        OpCode::from_bytes(FE_PREFIX, second_byte)
            .ok_or_else(|| Error::InvalidOpcode(format!("FE {second_byte:02X}")))?
    } else {
        OpCode::from_bytes(0, first_byte)
            .ok_or_else(|| Error::InvalidOpcode(format!("{first_byte:02X}")))?
    };

    let flow_type = opcode.flow();
    let operand = match opcode.operand_type() {
        OperandType::None => Operand::None,
        OperandType::Int8 => Operand::Immediate(Immediate::Int8(parser.read_le::<i8>()?)),
        OperandType::UInt8 => Operand::Immediate(Immediate::UInt8(parser.read_le::<u8>()?)),
        OperandType::UInt16 => Operand::Immediate(Immediate::UInt16(parser.read_le::<u16>()?)),
        OperandType::Int32 => {
            let value = parser.read_le::<i32>()?;
            if opcode.is_branch() {
                Operand::Target(value)
            } else {
                Operand::Immediate(Immediate::Int32(value))
            }
        }
        OperandType::Int64 => Operand::Immediate(Immediate::Int64(parser.read_le::<i64>()?)),
        OperandType::Float32 => Operand::Immediate(Immediate::Float32(parser.read_le::<f32>()?)),
        OperandType::Float64 => Operand::Immediate(Immediate::Float64(parser.read_le::<f64>()?)),
        OperandType::Token => Operand::Token(Token::new(parser.read_le::<u32>()?)),
        OperandType::Switch => {
            let case_count = parser.read_le::<u32>()? as usize;
            // Each target takes four bytes; reject counts the buffer cannot hold before
            // allocating for them.
            if case_count > parser.remaining() / 4 {
                return Err(out_of_bounds_error!());
            }

            let mut targets = Vec::with_capacity(case_count);
            for _ in 0..case_count {
                targets.push(parser.read_le::<i32>()?);
            }
            Operand::Switch(targets)
        }
    };

    let offset =
        u32::try_from(start).map_err(|_| malformed_error!("Offset exceeds u32 range"))?;
    let size = u32::try_from(parser.pos() - start)
        .map_err(|_| malformed_error!("Instruction size exceeds u32 range"))?;
    let next = i64::from(offset) + i64::from(size);

    let branch_targets = match &operand {
        Operand::Target(relative) => vec![absolute_target(next, *relative)?],
        Operand::Switch(relatives) => relatives
            .iter()
            .map(|relative| absolute_target(next, *relative))
            .collect::<Result<Vec<_>>>()?,
        _ => Vec::new(),
    };

    Ok(Instruction {
        offset,
        size,
        opcode,
        operand,
        flow_type,
        branch_targets,
    })
}

fn absolute_target(next: i64, relative: i32) -> Result<u32> {
    u32::try_from(next + i64::from(relative))
        .map_err(|_| Error::InvalidBranch(format!("branch target {relative:+} before body start")))
}

/// Checks that every branch target of a decoded body lands on an instruction boundary
/// and that control cannot run off the end of the body.
///
/// # Errors
///
/// Returns [`Error::InvalidBranch`] or [`Error::Malformed`] describing the first violation.
pub fn validate_body(instructions: &[Instruction]) -> Result<()> {
    let Some(last) = instructions.last() else {
        return Err(malformed_error!("Empty method body"));
    };

    if !matches!(
        last.flow_type,
        FlowType::Return | FlowType::Throw | FlowType::UnconditionalBranch
    ) {
        return Err(malformed_error!(
            "Body ends with '{}', control falls off the end",
            last.opcode
        ));
    }

    for instruction in instructions {
        for target in &instruction.branch_targets {
            if instructions
                .binary_search_by_key(target, |candidate| candidate.offset)
                .is_err()
            {
                return Err(Error::InvalidBranch(format!(
                    "'{}' at IL_{:04x} targets IL_{:04x}, which is not an instruction boundary",
                    instruction.opcode, instruction.offset, target
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_instruction_basic() {
        let mut parser = Parser::new(&[0x11, 0x10]);

        let result = decode_instruction(&mut parser).unwrap();

        assert_eq!(result.offset, 0);
        assert_eq!(result.size, 2);
        assert_eq!(result.opcode, OpCode::LdLocS);
        assert_eq!(result.flow_type, FlowType::Sequential);
        assert_eq!(result.index(), Some(0x10));
    }

    #[test]
    fn decode_instruction_two_byte() {
        let mut parser = Parser::new(&[0xFE, 0x15, 0x05, 0x00, 0x00, 0x02]);

        let result = decode_instruction(&mut parser).unwrap();

        assert_eq!(result.opcode, OpCode::InitObj);
        assert_eq!(result.size, 6);
        assert_eq!(result.token(), Some(Token::new(0x0200_0005)));
    }

    #[test]
    fn decode_branch_targets() {
        // nop; brtrue +1; nop; ret
        let bytecode = [0x00, 0x3A, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2A];
        let mut parser = Parser::new(&bytecode);

        let instructions = decode_stream(&mut parser).unwrap();
        assert_eq!(instructions.len(), 4);
        assert_eq!(instructions[1].flow_type, FlowType::ConditionalBranch);
        assert_eq!(instructions[1].branch_targets, vec![7]);
        assert!(validate_body(&instructions).is_ok());
    }

    #[test]
    fn decode_switch() {
        let mut bytecode = vec![0x45, 0x02, 0x00, 0x00, 0x00];
        bytecode.extend_from_slice(&0i32.to_le_bytes());
        bytecode.extend_from_slice(&1i32.to_le_bytes());
        bytecode.extend_from_slice(&[0x2A, 0x2A]);
        let mut parser = Parser::new(&bytecode);

        let switch = decode_instruction(&mut parser).unwrap();
        assert_eq!(switch.size, 13);
        assert_eq!(switch.branch_targets, vec![13, 14]);
    }

    #[test]
    fn decode_errors() {
        let mut parser = Parser::new(&[0x24]);
        assert!(matches!(
            decode_instruction(&mut parser),
            Err(Error::InvalidOpcode(_))
        ));

        let mut parser = Parser::new(&[0x20, 0x01]);
        assert!(matches!(
            decode_instruction(&mut parser),
            Err(Error::OutOfBounds { .. })
        ));

        let mut parser = Parser::new(&[0x45, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert!(decode_instruction(&mut parser).is_err());

        let mut parser = Parser::new(&[0x38, 0xF0, 0xFF, 0xFF, 0xFF]);
        assert!(matches!(
            decode_instruction(&mut parser),
            Err(Error::InvalidBranch(_))
        ));
    }

    #[test]
    fn validate_rejects_bad_bodies() {
        // branch into the middle of itself
        let bytecode = [0x38, 0xFE, 0xFF, 0xFF, 0xFF];
        let instructions = decode_stream(&mut Parser::new(&bytecode)).unwrap();
        assert!(matches!(
            validate_body(&instructions),
            Err(Error::InvalidBranch(_))
        ));

        // falls off the end
        let instructions = decode_stream(&mut Parser::new(&[0x00])).unwrap();
        assert!(validate_body(&instructions).is_err());

        assert!(validate_body(&[]).is_err());
    }
}
