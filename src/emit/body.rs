//! Finalized method bodies.

use std::fmt;

use crate::{
    assembly::{decode_stream, validate_body, Instruction, Parser},
    emit::tokens::TokenTable,
    metadata::typesystem::CilTypeRc,
    Result,
};

/// A finalized CIL method body with everything needed to execute it.
///
/// The bytecode is decoded once on construction; construction fails if the decoded
/// instructions do not form a valid body (see [`validate_body`]).
#[derive(Debug, Clone)]
pub struct MethodBody {
    bytecode: Vec<u8>,
    max_stack: u16,
    locals: Vec<CilTypeRc>,
    tokens: TokenTable,
    instructions: Vec<Instruction>,
}

impl MethodBody {
    /// Decodes and validates `bytecode`.
    ///
    /// # Errors
    ///
    /// Returns a decoding error for malformed bytecode, or the [`validate_body`] error for
    /// bodies whose control flow is inconsistent.
    pub fn new(
        bytecode: Vec<u8>,
        max_stack: u16,
        locals: Vec<CilTypeRc>,
        tokens: TokenTable,
    ) -> Result<Self> {
        let instructions = decode_stream(&mut Parser::new(&bytecode))?;
        validate_body(&instructions)?;

        Ok(MethodBody {
            bytecode,
            max_stack,
            locals,
            tokens,
            instructions,
        })
    }

    /// Encoded bytecode
    #[must_use]
    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }

    /// Maximum evaluation stack depth
    #[must_use]
    pub fn max_stack(&self) -> u16 {
        self.max_stack
    }

    /// Local variable types by index
    #[must_use]
    pub fn locals(&self) -> &[CilTypeRc] {
        &self.locals
    }

    /// The body's token table
    #[must_use]
    pub fn tokens(&self) -> &TokenTable {
        &self.tokens
    }

    /// Decoded instructions in offset order
    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Index into [`MethodBody::instructions`] of the instruction starting at `offset`.
    #[must_use]
    pub fn instruction_index(&self, offset: u32) -> Option<usize> {
        self.instructions
            .binary_search_by_key(&offset, |instruction| instruction.offset)
            .ok()
    }
}

impl fmt::Display for MethodBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, ".maxstack {}", self.max_stack)?;
        if !self.locals.is_empty() {
            let locals: Vec<String> = self
                .locals
                .iter()
                .enumerate()
                .map(|(i, ty)| format!("[{i}] {ty}"))
                .collect();
            writeln!(f, ".locals init ({})", locals.join(", "))?;
        }
        for instruction in &self.instructions {
            writeln!(f, "{instruction}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{assembly::OpCode, Error};

    #[test]
    fn decodes_on_construction() {
        // ldarg.0; ldarg.1; add; ret
        let body = MethodBody::new(vec![0x02, 0x03, 0x58, 0x2A], 2, Vec::new(), TokenTable::new())
            .unwrap();

        assert_eq!(body.instructions().len(), 4);
        assert_eq!(body.instruction_index(2), Some(2));
        assert_eq!(body.instruction_index(5), None);
        assert_eq!(body.instructions()[2].opcode, OpCode::Add);
        assert!(body.to_string().starts_with(".maxstack 2\nIL_0000: ldarg.0\n"));
    }

    #[test]
    fn rejects_invalid_bodies() {
        assert!(matches!(
            MethodBody::new(vec![0x02], 1, Vec::new(), TokenTable::new()),
            Err(Error::Malformed { .. })
        ));
        assert!(MethodBody::new(vec![0x24], 0, Vec::new(), TokenTable::new()).is_err());
    }
}
