//! The emitter: a cursor over a method body under construction.
//!
//! [`Emitter`] drives an [`InstructionEncoder`] and mirrors every operation into an
//! [`InstructionStream`]. It offers primitive operations (load an argument, box, cast,
//! declare a local, branch, call) and composite operations built from them and from the
//! conversion planner: loading a slot as another slot, loading an element of a trailing
//! `object[]` after checking its length, and loading the receiver of a method call.
//!
//! Speculative emission is undone with [`Emitter::checkpoint`] and
//! [`Emitter::rollback`], which restore the encoder, the stream, the local and label
//! counters and the token table together.

use crate::{
    adapter::{planner, ConversionPlan, Slot},
    assembly::{EncoderCheckpoint, Immediate, InstructionEncoder, OpCode, Operand},
    emit::{
        body::MethodBody,
        stream::{
            GeneratorDirective, ILInstruction, ILOperand, InstructionStream, Label, LocalBuilder,
            StreamMark, StreamNode,
        },
        tokens::TokenTable,
    },
    metadata::{
        method::{MethodDesc, MethodRc},
        registry::TypeRegistry,
        signature::SlotAccess,
        typesystem::{CilFlavor, CilTypeRc},
    },
    Result,
};

/// Message of the exception thrown when a `params` array has the wrong length.
pub const PARAMETER_COUNT_MISMATCH: &str = "Parameter count mismatch.";

/// Everything [`Emitter::rollback`] needs to restore.
#[derive(Debug, Clone)]
pub struct EmitterCheckpoint {
    encoder: EncoderCheckpoint,
    stream: StreamMark,
    locals: usize,
    labels: usize,
    tokens: (usize, u32, u32),
}

impl EmitterCheckpoint {
    /// Bytecode offset at which the checkpoint was taken.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.encoder.position()
    }
}

/// Stateful cursor over a growing method body.
///
/// ```rust
/// use dotreflect::{prelude::*, emit::Emitter};
///
/// let registry = TypeRegistry::new();
/// let mut emitter = Emitter::new(&registry);
///
/// emitter.ldarg(0)?;
/// emitter.box_value(&registry.int32())?;
/// emitter.ret(true)?;
///
/// assert_eq!(emitter.stream().to_string(), "IL_0000: ldarg.0\nIL_0001: box System.Int32\nIL_0006: ret\n");
/// let (body, _) = emitter.finalize()?;
/// assert_eq!(body.max_stack(), 1);
/// # Ok::<(), dotreflect::Error>(())
/// ```
#[derive(Debug)]
pub struct Emitter<'r> {
    registry: &'r TypeRegistry,
    encoder: InstructionEncoder,
    stream: InstructionStream,
    locals: Vec<CilTypeRc>,
    labels: usize,
    tokens: TokenTable,
}

impl<'r> Emitter<'r> {
    /// Creates an emitter for an empty body.
    #[must_use]
    pub fn new(registry: &'r TypeRegistry) -> Self {
        Emitter {
            registry,
            encoder: InstructionEncoder::new(),
            stream: InstructionStream::new(),
            locals: Vec::new(),
            labels: 0,
            tokens: TokenTable::new(),
        }
    }

    /// The type registry used for well-known types.
    #[must_use]
    pub fn registry(&self) -> &'r TypeRegistry {
        self.registry
    }

    /// The instruction log so far.
    #[must_use]
    pub fn stream(&self) -> &InstructionStream {
        &self.stream
    }

    /// Current bytecode offset.
    #[must_use]
    pub fn offset(&self) -> u32 {
        self.encoder.current_position()
    }

    /// Current evaluation stack depth.
    #[must_use]
    pub fn stack_depth(&self) -> i16 {
        self.encoder.current_stack_depth()
    }

    fn record(&mut self, offset: u32, instruction: ILInstruction) -> Result<StreamNode> {
        self.stream.append(offset, instruction)
    }

    fn encode(&mut self, opcode: OpCode, operand: Option<Operand>, il: ILOperand) -> Result<()> {
        let offset = self.offset();
        self.encoder.emit_instruction(opcode, operand)?;
        self.record(offset, ILInstruction::op(opcode, il))?;
        Ok(())
    }

    // Primitive operations

    /// Emits an operation without operand (`pop`, `dup`, `ldlen`, `ldelem.ref`, ...).
    ///
    /// # Errors
    ///
    /// Returns an encoder error if the opcode needs an operand or underflows the stack.
    pub fn op(&mut self, opcode: OpCode) -> Result<()> {
        self.encode(opcode, None, ILOperand::None)
    }

    /// `ldarg`
    pub fn ldarg(&mut self, index: u16) -> Result<()> {
        let offset = self.offset();
        let opcode = self.encoder.emit_ldarg(index)?;
        self.record(offset, ILInstruction::op(opcode, ILOperand::Argument(index)))?;
        Ok(())
    }

    /// `ldarga`
    pub fn ldarga(&mut self, index: u16) -> Result<()> {
        let offset = self.offset();
        let opcode = self.encoder.emit_ldarga(index)?;
        self.record(offset, ILInstruction::op(opcode, ILOperand::Argument(index)))?;
        Ok(())
    }

    /// `starg`
    pub fn starg(&mut self, index: u16) -> Result<()> {
        let offset = self.offset();
        let opcode = self.encoder.emit_starg(index)?;
        self.record(offset, ILInstruction::op(opcode, ILOperand::Argument(index)))?;
        Ok(())
    }

    /// `ldloc`
    pub fn ldloc(&mut self, local: &LocalBuilder) -> Result<()> {
        let offset = self.offset();
        let opcode = self.encoder.emit_ldloc(local.index())?;
        self.record(offset, ILInstruction::op(opcode, ILOperand::Local(local.clone())))?;
        Ok(())
    }

    /// `ldloca`
    pub fn ldloca(&mut self, local: &LocalBuilder) -> Result<()> {
        let offset = self.offset();
        let opcode = self.encoder.emit_ldloca(local.index())?;
        self.record(offset, ILInstruction::op(opcode, ILOperand::Local(local.clone())))?;
        Ok(())
    }

    /// `stloc`
    pub fn stloc(&mut self, local: &LocalBuilder) -> Result<()> {
        let offset = self.offset();
        let opcode = self.encoder.emit_stloc(local.index())?;
        self.record(offset, ILInstruction::op(opcode, ILOperand::Local(local.clone())))?;
        Ok(())
    }

    /// `ldc.i4` in its most compact form.
    pub fn ldc_i4(&mut self, value: i32) -> Result<()> {
        let offset = self.offset();
        let opcode = self.encoder.emit_ldc_i4(value)?;
        self.record(offset, ILInstruction::op(opcode, ILOperand::Int32(value)))?;
        Ok(())
    }

    /// `ldc.i8`
    pub fn ldc_i8(&mut self, value: i64) -> Result<()> {
        self.encode(
            OpCode::LdcI8,
            Some(Operand::Immediate(Immediate::Int64(value))),
            ILOperand::Int64(value),
        )
    }

    /// `ldc.r4`
    pub fn ldc_r4(&mut self, value: f32) -> Result<()> {
        self.encode(
            OpCode::LdcR4,
            Some(Operand::Immediate(Immediate::Float32(value))),
            ILOperand::Float32(value),
        )
    }

    /// `ldc.r8`
    pub fn ldc_r8(&mut self, value: f64) -> Result<()> {
        self.encode(
            OpCode::LdcR8,
            Some(Operand::Immediate(Immediate::Float64(value))),
            ILOperand::Float64(value),
        )
    }

    /// `ldnull`
    pub fn ldnull(&mut self) -> Result<()> {
        self.op(OpCode::LdNull)
    }

    /// `ldstr`
    pub fn ldstr(&mut self, value: &str) -> Result<()> {
        let token = self.tokens.string_token(value);
        self.encode(
            OpCode::LdStr,
            Some(Operand::Token(token)),
            ILOperand::String(value.to_string()),
        )
    }

    fn type_op(&mut self, opcode: OpCode, ty: &CilTypeRc) -> Result<()> {
        let token = self.tokens.type_token(ty);
        self.encode(opcode, Some(Operand::Token(token)), ILOperand::Type(ty.clone()))
    }

    /// `box`
    pub fn box_value(&mut self, ty: &CilTypeRc) -> Result<()> {
        self.type_op(OpCode::Box, ty)
    }

    /// `unbox` (address of the boxed value)
    pub fn unbox(&mut self, ty: &CilTypeRc) -> Result<()> {
        self.type_op(OpCode::Unbox, ty)
    }

    /// `unbox.any`
    pub fn unbox_any(&mut self, ty: &CilTypeRc) -> Result<()> {
        self.type_op(OpCode::UnboxAny, ty)
    }

    /// `castclass`
    pub fn castclass(&mut self, ty: &CilTypeRc) -> Result<()> {
        self.type_op(OpCode::CastClass, ty)
    }

    /// `isinst`
    pub fn isinst(&mut self, ty: &CilTypeRc) -> Result<()> {
        self.type_op(OpCode::IsInst, ty)
    }

    /// `initobj`
    pub fn initobj(&mut self, ty: &CilTypeRc) -> Result<()> {
        self.type_op(OpCode::InitObj, ty)
    }

    /// `ldobj`
    pub fn ldobj(&mut self, ty: &CilTypeRc) -> Result<()> {
        self.type_op(OpCode::LdObj, ty)
    }

    /// `stobj`
    pub fn stobj(&mut self, ty: &CilTypeRc) -> Result<()> {
        self.type_op(OpCode::StObj, ty)
    }

    /// `newarr`
    pub fn newarr(&mut self, element: &CilTypeRc) -> Result<()> {
        self.type_op(OpCode::NewArr, element)
    }

    fn field_op(&mut self, opcode: OpCode, owner: &CilTypeRc, name: &str) -> Result<()> {
        let index = owner
            .field_index(name)
            .ok_or_else(|| malformed_error!("Type '{}' has no field '{}'", owner, name))?;
        let token = self.tokens.field_token(owner, index);
        self.encode(
            opcode,
            Some(Operand::Token(token)),
            ILOperand::Field {
                owner: owner.clone(),
                name: name.to_string(),
            },
        )
    }

    /// `ldfld`
    pub fn ldfld(&mut self, owner: &CilTypeRc, name: &str) -> Result<()> {
        self.field_op(OpCode::LdFld, owner, name)
    }

    /// `ldflda`
    pub fn ldflda(&mut self, owner: &CilTypeRc, name: &str) -> Result<()> {
        self.field_op(OpCode::LdFlda, owner, name)
    }

    /// `stfld`
    pub fn stfld(&mut self, owner: &CilTypeRc, name: &str) -> Result<()> {
        self.field_op(OpCode::StFld, owner, name)
    }

    /// Loads a value of type `ty` through the address on the stack.
    ///
    /// Uses the `ldind.*` form matching `ty`, or `ldobj` for other value types.
    pub fn load_indirect(&mut self, ty: &CilTypeRc) -> Result<()> {
        let opcode = match ty.flavor() {
            CilFlavor::Boolean | CilFlavor::U1 => OpCode::LdIndU1,
            CilFlavor::I1 => OpCode::LdIndI1,
            CilFlavor::I2 => OpCode::LdIndI2,
            CilFlavor::Char | CilFlavor::U2 => OpCode::LdIndU2,
            CilFlavor::I4 => OpCode::LdIndI4,
            CilFlavor::U4 => OpCode::LdIndU4,
            CilFlavor::I8 | CilFlavor::U8 => OpCode::LdIndI8,
            CilFlavor::R4 => OpCode::LdIndR4,
            CilFlavor::R8 => OpCode::LdIndR8,
            CilFlavor::I | CilFlavor::U => OpCode::LdIndI,
            _ if ty.is_reference_type() => OpCode::LdIndRef,
            _ => return self.ldobj(ty),
        };
        self.op(opcode)
    }

    /// Stores a value of type `ty` through an address: `[address, value]` on the stack.
    ///
    /// Uses the `stind.*` form matching `ty`, or `stobj` for other value types.
    pub fn store_indirect(&mut self, ty: &CilTypeRc) -> Result<()> {
        let opcode = match ty.flavor() {
            CilFlavor::Boolean | CilFlavor::U1 | CilFlavor::I1 => OpCode::StIndI1,
            CilFlavor::Char | CilFlavor::U2 | CilFlavor::I2 => OpCode::StIndI2,
            CilFlavor::I4 | CilFlavor::U4 => OpCode::StIndI4,
            CilFlavor::I8 | CilFlavor::U8 => OpCode::StIndI8,
            CilFlavor::R4 => OpCode::StIndR4,
            CilFlavor::R8 => OpCode::StIndR8,
            CilFlavor::I | CilFlavor::U => OpCode::StIndI,
            _ if ty.is_reference_type() => OpCode::StIndRef,
            _ => return self.stobj(ty),
        };
        self.op(opcode)
    }

    fn call_op(&mut self, opcode: OpCode, method: &MethodRc) -> Result<()> {
        let (args, has_result) = if opcode == OpCode::NewObj {
            (method.params().len(), true)
        } else {
            (method.stack_arg_count(), !method.return_type().is_void())
        };
        let args = u8::try_from(args)
            .map_err(|_| malformed_error!("Too many arguments for '{}'", method.full_name()))?;

        let token = self.tokens.method_token(method);
        let offset = self.offset();
        self.encoder.emit_call(opcode, token, args, has_result)?;
        self.record(offset, ILInstruction::op(opcode, ILOperand::Method(method.clone())))?;
        Ok(())
    }

    /// `call`
    pub fn call(&mut self, method: &MethodRc) -> Result<()> {
        self.call_op(OpCode::Call, method)
    }

    /// `callvirt`
    pub fn callvirt(&mut self, method: &MethodRc) -> Result<()> {
        self.call_op(OpCode::CallVirt, method)
    }

    /// `newobj`
    pub fn newobj(&mut self, constructor: &MethodRc) -> Result<()> {
        self.call_op(OpCode::NewObj, constructor)
    }

    /// Calls `method` with `call` or `callvirt`.
    ///
    /// Static methods, non-virtual methods and methods declared on value types are
    /// called directly.
    pub fn call_method(&mut self, method: &MethodRc) -> Result<()> {
        if method.is_static() || !method.is_virtual() || method.declaring_type().is_value_type()
        {
            self.call(method)
        } else {
            self.callvirt(method)
        }
    }

    /// `ret`
    pub fn ret(&mut self, has_value: bool) -> Result<()> {
        let offset = self.offset();
        self.encoder.emit_ret(has_value)?;
        self.record(offset, ILInstruction::op(OpCode::Ret, ILOperand::None))?;
        Ok(())
    }

    /// Declares a local of type `ty`.
    pub fn declare_local(&mut self, ty: &CilTypeRc) -> Result<LocalBuilder> {
        let index = u16::try_from(self.locals.len())
            .map_err(|_| malformed_error!("Too many locals"))?;
        self.locals.push(ty.clone());

        let local = LocalBuilder::new(index, ty.clone());
        let offset = self.offset();
        self.record(
            offset,
            ILInstruction::Directive(GeneratorDirective::DeclareLocal(local.clone())),
        )?;
        Ok(local)
    }

    /// Creates a label to be marked later.
    pub fn define_label(&mut self) -> Result<Label> {
        let label = Label::new(self.labels);
        self.labels += 1;

        let offset = self.offset();
        self.record(
            offset,
            ILInstruction::Directive(GeneratorDirective::DefineLabel(label)),
        )?;
        Ok(label)
    }

    /// Binds `label` to the current offset.
    pub fn mark_label(&mut self, label: Label) -> Result<()> {
        let offset = self.offset();
        self.encoder.define_label(&label.name())?;
        self.record(
            offset,
            ILInstruction::Directive(GeneratorDirective::MarkLabel(label)),
        )?;
        Ok(())
    }

    /// Emits a long-form branch to `label`.
    pub fn branch(&mut self, opcode: OpCode, label: Label) -> Result<()> {
        let offset = self.offset();
        self.encoder.emit_branch(opcode, &label.name())?;
        self.record(offset, ILInstruction::op(opcode, ILOperand::Label(label)))?;
        Ok(())
    }

    /// Emits `switch` over `labels`.
    pub fn switch(&mut self, labels: &[Label]) -> Result<()> {
        let names: Vec<String> = labels.iter().map(Label::name).collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();

        let offset = self.offset();
        self.encoder.emit_switch(&names)?;
        self.record(
            offset,
            ILInstruction::op(OpCode::Switch, ILOperand::Labels(labels.to_vec())),
        )?;
        Ok(())
    }

    /// Throws a new `exception` constructed with `message`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the registry has no message constructor for
    /// `exception`.
    pub fn throw_exception(&mut self, exception: &CilTypeRc, message: &str) -> Result<()> {
        let constructor = self
            .registry
            .exception_constructor(exception)
            .ok_or_else(|| malformed_error!("No constructor for exception '{}'", exception))?;

        let offset = self.offset();
        let message_token = self.tokens.string_token(message);
        let constructor_token = self.tokens.method_token(&constructor);
        self.encoder
            .emit_instruction(OpCode::LdStr, Some(Operand::Token(message_token)))?;
        self.encoder
            .emit_call(OpCode::NewObj, constructor_token, 1, true)?;
        self.encoder.emit_instruction(OpCode::Throw, None)?;

        self.record(
            offset,
            ILInstruction::Directive(GeneratorDirective::ThrowException {
                exception: exception.clone(),
                message: message.to_string(),
            }),
        )?;
        Ok(())
    }

    // Composite operations

    /// Pushes the default value of `ty`.
    ///
    /// `ldnull` for reference types, a zero constant for numeric primitives and a zeroed
    /// temporary for every other value type.
    pub fn load_default(&mut self, ty: &CilTypeRc) -> Result<()> {
        match ty.flavor() {
            _ if ty.is_reference_type() => self.ldnull(),
            CilFlavor::Boolean
            | CilFlavor::Char
            | CilFlavor::I1
            | CilFlavor::U1
            | CilFlavor::I2
            | CilFlavor::U2
            | CilFlavor::I4
            | CilFlavor::U4 => self.ldc_i4(0),
            CilFlavor::I8 | CilFlavor::U8 => self.ldc_i8(0),
            CilFlavor::R4 => self.ldc_r4(0.0),
            CilFlavor::R8 => self.ldc_r8(0.0),
            _ => {
                let temp = self.declare_local(ty)?;
                self.ldloca(&temp)?;
                self.initobj(ty)?;
                self.ldloc(&temp)
            }
        }
    }

    /// Loads `source` converted to `dest`; see [`planner::emit_load_as`].
    ///
    /// # Errors
    ///
    /// Returns the planner's error if the conversion is unsupported or illegal.
    pub fn load_as(&mut self, source: &Slot, dest: &Slot) -> Result<ConversionPlan> {
        planner::emit_load_as(self, source, dest)
    }

    /// Checks at run time that the `object[]` in argument `array_arg` has exactly
    /// `expected` elements, throwing `TargetParameterCountException` otherwise.
    pub fn check_params_length(&mut self, array_arg: u16, expected: usize) -> Result<()> {
        let expected = i32::try_from(expected)
            .map_err(|_| malformed_error!("Parameter count {} out of range", expected))?;
        let exception = self.registry.target_parameter_count_exception();

        let length_ok = self.define_label()?;
        self.ldarg(array_arg)?;
        self.op(OpCode::LdLen)?;
        self.op(OpCode::ConvI4)?;
        self.ldc_i4(expected)?;
        self.branch(OpCode::Beq, length_ok)?;
        self.throw_exception(&exception, PARAMETER_COUNT_MISMATCH)?;
        self.mark_label(length_ok)
    }

    /// Loads element `index` of the `object[]` in argument `array_arg`, converted to `dest`.
    pub fn load_params_element(
        &mut self,
        array_arg: u16,
        index: usize,
        dest: &Slot,
    ) -> Result<ConversionPlan> {
        let index = i32::try_from(index)
            .map_err(|_| malformed_error!("Element index {} out of range", index))?;

        self.ldarg(array_arg)?;
        self.ldc_i4(index)?;
        self.op(OpCode::LdElemRef)?;

        let element = Slot::on_stack(&self.registry.object(), SlotAccess::Default);
        self.load_as(&element, dest)
    }

    /// Loads `source` as the receiver of `method`.
    ///
    /// The receiver is passed by reference when the declaring type is a value type.
    pub fn load_instance_for_member(
        &mut self,
        source: &Slot,
        method: &MethodDesc,
    ) -> Result<ConversionPlan> {
        let receiver = Slot::receiver(method.declaring_type());
        self.load_as(source, &receiver)
    }

    // Speculation

    /// Captures the complete emitter state.
    #[must_use]
    pub fn checkpoint(&self) -> EmitterCheckpoint {
        EmitterCheckpoint {
            encoder: self.encoder.checkpoint(),
            stream: self.stream.mark(),
            locals: self.locals.len(),
            labels: self.labels,
            tokens: self.tokens.checkpoint(),
        }
    }

    /// Discards everything emitted since `checkpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the checkpoint is stale.
    pub fn rollback(&mut self, checkpoint: &EmitterCheckpoint) -> Result<()> {
        self.encoder.rollback(&checkpoint.encoder)?;
        self.stream.rollback_to(checkpoint.stream);
        self.locals.truncate(checkpoint.locals);
        self.labels = checkpoint.labels;
        self.tokens.rollback(checkpoint.tokens);
        Ok(())
    }

    /// Resolves labels, decodes and validates the body.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UndefinedLabel`] for labels that were never marked, or a
    /// validation error for bodies whose control flow is inconsistent.
    pub fn finalize(self) -> Result<(MethodBody, InstructionStream)> {
        let (bytecode, max_stack, _) = self.encoder.finalize()?;
        let body = MethodBody::new(bytecode, max_stack, self.locals, self.tokens)?;
        Ok((body, self.stream))
    }
}
