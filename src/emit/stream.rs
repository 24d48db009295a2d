//! The instruction stream.
//!
//! [`InstructionStream`] is the symbolic log of a method body under construction. Every
//! operation the [`crate::emit::Emitter`] encodes is appended here together with the byte
//! offset at which it was encoded, using labels and local builders instead of raw branch
//! offsets and indices. The log is what listings and error messages are produced from,
//! and it is truncated together with the encoder when speculative emission is undone.
//!
//! Offsets never decrease in stream order. Local declarations, label definitions and
//! label marks occupy no bytes and share the offset of the next operation. The throw
//! helper directive owns the 11 bytes it expands to.

use std::fmt;

use crate::{
    assembly::{OpCode, OperandType},
    metadata::{method::MethodRc, typesystem::CilTypeRc},
    Result,
};

/// A branch target handle.
///
/// Labels are named positionally (`label0`, `label1`, ...) in the order they are defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(usize);

impl Label {
    pub(crate) fn new(id: usize) -> Self {
        Label(id)
    }

    /// Position of the label in definition order.
    #[must_use]
    pub fn id(&self) -> usize {
        self.0
    }

    /// The name the label is known by to the encoder.
    pub(crate) fn name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "label{}", self.0)
    }
}

/// A declared local variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalBuilder {
    index: u16,
    ty: CilTypeRc,
}

impl LocalBuilder {
    pub(crate) fn new(index: u16, ty: CilTypeRc) -> Self {
        LocalBuilder { index, ty }
    }

    /// Local slot index
    #[must_use]
    pub fn index(&self) -> u16 {
        self.index
    }

    /// Declared type
    #[must_use]
    pub fn local_type(&self) -> &CilTypeRc {
        &self.ty
    }
}

impl fmt::Display for LocalBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "local{}", self.index)
    }
}

/// The symbolic operand of a recorded operation.
#[derive(Debug, Clone)]
pub enum ILOperand {
    /// No operand
    None,
    /// 32-bit integer constant
    Int32(i32),
    /// 64-bit integer constant
    Int64(i64),
    /// 32-bit float constant
    Float32(f32),
    /// 64-bit float constant
    Float64(f64),
    /// String literal
    String(String),
    /// Type reference
    Type(CilTypeRc),
    /// Method reference
    Method(MethodRc),
    /// Instance field reference
    Field {
        /// Declaring type
        owner: CilTypeRc,
        /// Field name
        name: String,
    },
    /// Branch target
    Label(Label),
    /// `switch` targets
    Labels(Vec<Label>),
    /// Local variable
    Local(LocalBuilder),
    /// Argument index
    Argument(u16),
}

impl PartialEq for ILOperand {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ILOperand::None, ILOperand::None) => true,
            (ILOperand::Int32(a), ILOperand::Int32(b)) => a == b,
            (ILOperand::Int64(a), ILOperand::Int64(b)) => a == b,
            (ILOperand::Float32(a), ILOperand::Float32(b)) => a == b,
            (ILOperand::Float64(a), ILOperand::Float64(b)) => a == b,
            (ILOperand::String(a), ILOperand::String(b)) => a == b,
            (ILOperand::Type(a), ILOperand::Type(b)) => a == b,
            (ILOperand::Method(a), ILOperand::Method(b)) => a.token() == b.token(),
            (
                ILOperand::Field { owner, name },
                ILOperand::Field {
                    owner: other_owner,
                    name: other_name,
                },
            ) => owner == other_owner && name == other_name,
            (ILOperand::Label(a), ILOperand::Label(b)) => a == b,
            (ILOperand::Labels(a), ILOperand::Labels(b)) => a == b,
            (ILOperand::Local(a), ILOperand::Local(b)) => a == b,
            (ILOperand::Argument(a), ILOperand::Argument(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for ILOperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ILOperand::None => Ok(()),
            ILOperand::Int32(value) => write!(f, "{value}"),
            ILOperand::Int64(value) => write!(f, "{value}"),
            ILOperand::Float32(value) => write!(f, "{value}"),
            ILOperand::Float64(value) => write!(f, "{value}"),
            ILOperand::String(value) => write!(f, "{value:?}"),
            ILOperand::Type(ty) => write!(f, "{ty}"),
            ILOperand::Method(method) => write!(f, "{method}"),
            ILOperand::Field { owner, name } => write!(f, "{owner}::{name}"),
            ILOperand::Label(label) => write!(f, "{label}"),
            ILOperand::Labels(labels) => {
                let names: Vec<String> = labels.iter().map(ToString::to_string).collect();
                write!(f, "({})", names.join(", "))
            }
            ILOperand::Local(local) => write!(f, "{local}"),
            ILOperand::Argument(index) => write!(f, "{index}"),
        }
    }
}

/// Instructions to the generator that are not a single raw operation.
#[derive(Debug, Clone, PartialEq)]
pub enum GeneratorDirective {
    /// A local variable was declared
    DeclareLocal(LocalBuilder),
    /// A label was created
    DefineLabel(Label),
    /// A label was bound to the current offset
    MarkLabel(Label),
    /// `ldstr message; newobj Exception(string); throw`
    ThrowException {
        /// Exception type
        exception: CilTypeRc,
        /// Message passed to the constructor
        message: String,
    },
}

/// Encoded size of the throw helper: `ldstr` + `newobj` + `throw`.
const THROW_HELPER_SIZE: usize = 5 + 5 + 1;

/// One recorded instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum ILInstruction {
    /// A raw operation
    Op {
        /// The opcode as encoded (compact forms included)
        opcode: OpCode,
        /// Symbolic operand
        operand: ILOperand,
    },
    /// A generator directive
    Directive(GeneratorDirective),
}

impl ILInstruction {
    /// A raw operation.
    #[must_use]
    pub fn op(opcode: OpCode, operand: ILOperand) -> Self {
        ILInstruction::Op { opcode, operand }
    }

    /// Physical encoded size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        match self {
            ILInstruction::Op {
                opcode: OpCode::Switch,
                operand,
            } => {
                let targets = match operand {
                    ILOperand::Labels(labels) => labels.len(),
                    _ => 0,
                };
                OpCode::Switch.opcode_size() + 4 + 4 * targets
            }
            ILInstruction::Op { opcode, .. } => opcode.encoded_size().unwrap_or(0),
            ILInstruction::Directive(GeneratorDirective::ThrowException { .. }) => {
                THROW_HELPER_SIZE
            }
            ILInstruction::Directive(_) => 0,
        }
    }

    /// `true` for raw operations.
    #[must_use]
    pub fn is_op(&self) -> bool {
        matches!(self, ILInstruction::Op { .. })
    }

    /// The opcode of a raw operation.
    #[must_use]
    pub fn opcode(&self) -> Option<OpCode> {
        match self {
            ILInstruction::Op { opcode, .. } => Some(*opcode),
            ILInstruction::Directive(_) => None,
        }
    }
}

/// An instruction and the byte offset at which it was emitted.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEntry {
    offset: u32,
    instruction: ILInstruction,
}

impl StreamEntry {
    /// Byte offset
    #[must_use]
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// The recorded instruction
    #[must_use]
    pub fn instruction(&self) -> &ILInstruction {
        &self.instruction
    }

    /// Encoded size
    #[must_use]
    pub fn size(&self) -> usize {
        self.instruction.size()
    }
}

impl fmt::Display for StreamEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.instruction {
            ILInstruction::Op { opcode, operand } => {
                write!(f, "IL_{:04x}: {}", self.offset, opcode)?;
                if !matches!(operand, ILOperand::None)
                    && opcode.operand_type() != OperandType::None
                {
                    write!(f, " {operand}")?;
                }
                Ok(())
            }
            ILInstruction::Directive(GeneratorDirective::DeclareLocal(local)) => {
                write!(f, "         .local {local}: {}", local.local_type())
            }
            ILInstruction::Directive(GeneratorDirective::DefineLabel(label)) => {
                write!(f, "         .label {label}")
            }
            ILInstruction::Directive(GeneratorDirective::MarkLabel(label)) => {
                write!(f, "{label}:")
            }
            ILInstruction::Directive(GeneratorDirective::ThrowException { exception, message }) => {
                write!(f, "IL_{:04x}: throw new {exception}({message:?})", self.offset)
            }
        }
    }
}

/// Handle to a recorded entry, returned by [`InstructionStream::append`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamNode(usize);

impl StreamNode {
    /// Position of the entry in the stream.
    #[must_use]
    pub fn position(&self) -> usize {
        self.0
    }
}

/// The length of a stream at some point, for [`InstructionStream::rollback_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamMark(usize);

/// Ordered log of `(offset, instruction)` pairs.
///
/// ```rust
/// use dotreflect::{
///     emit::{ILInstruction, ILOperand},
///     InstructionStream, OpCode,
/// };
///
/// let mut stream = InstructionStream::new();
/// stream.append(0, ILInstruction::op(OpCode::LdArg0, ILOperand::Argument(0)))?;
/// let keep = stream.append(1, ILInstruction::op(OpCode::LdArg1, ILOperand::Argument(1)))?;
/// stream.append(2, ILInstruction::op(OpCode::Add, ILOperand::None))?;
///
/// assert_eq!(stream.find_by_offset(1).and_then(|e| e.instruction().opcode()), Some(OpCode::LdArg1));
/// stream.truncate_after(keep);
/// assert_eq!(stream.len(), 2);
/// # Ok::<(), dotreflect::Error>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct InstructionStream {
    entries: Vec<StreamEntry>,
}

impl InstructionStream {
    /// Creates an empty stream.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if nothing was recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries in emission order.
    #[must_use]
    pub fn entries(&self) -> &[StreamEntry] {
        &self.entries
    }

    /// Iterates over the entries in emission order.
    pub fn iter(&self) -> std::slice::Iter<'_, StreamEntry> {
        self.entries.iter()
    }

    /// The entry behind a node handle.
    #[must_use]
    pub fn get(&self, node: StreamNode) -> Option<&StreamEntry> {
        self.entries.get(node.0)
    }

    /// Handle to the last entry.
    #[must_use]
    pub fn last_node(&self) -> Option<StreamNode> {
        self.entries.len().checked_sub(1).map(StreamNode)
    }

    /// Offset just past the last recorded instruction.
    #[must_use]
    pub fn end_offset(&self) -> u32 {
        self.entries.last().map_or(0, |entry| {
            entry.offset + u32::try_from(entry.size()).unwrap_or(u32::MAX)
        })
    }

    /// Records `instruction` at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if `offset` lies before the offset of the last
    /// entry.
    pub fn append(&mut self, offset: u32, instruction: ILInstruction) -> Result<StreamNode> {
        if let Some(last) = self.entries.last() {
            if offset < last.offset {
                return Err(malformed_error!(
                    "Offset IL_{:04x} recorded after IL_{:04x}",
                    offset,
                    last.offset
                ));
            }
        }

        self.entries.push(StreamEntry {
            offset,
            instruction,
        });
        Ok(StreamNode(self.entries.len() - 1))
    }

    /// Returns the instruction encoded at exactly `offset`.
    ///
    /// Only entries that occupy bytes match: raw operations and the throw helper.
    /// Zero-size directives sharing the offset are skipped. The scan stops at the first
    /// entry past `offset`.
    #[must_use]
    pub fn find_by_offset(&self, offset: u32) -> Option<&StreamEntry> {
        self.entries
            .iter()
            .take_while(|entry| entry.offset <= offset)
            .find(|entry| entry.offset == offset && entry.size() > 0)
    }

    /// Removes every entry after `node`.
    ///
    /// A no-op when `node` is already the last entry or lies past the end.
    pub fn truncate_after(&mut self, node: StreamNode) {
        self.entries.truncate(node.0 + 1);
    }

    /// Captures the current length.
    #[must_use]
    pub fn mark(&self) -> StreamMark {
        StreamMark(self.entries.len())
    }

    /// Removes every entry recorded after `mark` was taken.
    pub fn rollback_to(&mut self, mark: StreamMark) {
        self.entries.truncate(mark.0);
    }
}

impl<'a> IntoIterator for &'a InstructionStream {
    type Item = &'a StreamEntry;
    type IntoIter = std::slice::Iter<'a, StreamEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl fmt::Display for InstructionStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(f, "{entry}")?;
        }
        Ok(())
    }
}
