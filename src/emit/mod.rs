//! Building method bodies.
//!
//! # Key Components
//!
//! - [`Emitter`] - primitive and composite emission over an [`crate::InstructionEncoder`]
//! - [`InstructionStream`] - the symbolic log of everything emitted
//! - [`TokenTable`] - what the tokens of one body refer to
//! - [`MethodBody`] - a finalized, decoded and validated body

mod body;
mod emitter;
mod stream;
mod tokens;

pub use body::MethodBody;
pub use emitter::{Emitter, EmitterCheckpoint, PARAMETER_COUNT_MISMATCH};
pub use stream::{
    GeneratorDirective, ILInstruction, ILOperand, InstructionStream, Label, LocalBuilder,
    StreamEntry, StreamMark, StreamNode,
};
pub use tokens::{TokenRef, TokenTable};
