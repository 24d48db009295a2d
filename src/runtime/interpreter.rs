//! The CIL interpreter.
//!
//! [`Runtime`] executes [`MethodBody`]s produced by the emitter and calls native methods
//! through a [`CallContext`]. Each call gets its own frame with arguments, locals and an
//! evaluation stack; managed pointers address frame slots, heap storage or host cells by
//! index, so they stay valid for as long as the storage they name.
//!
//! Managed exceptions are not catchable inside a body. A `throw` unwinds the whole
//! invocation and surfaces as [`Error::ManagedException`].

use std::sync::Arc;

use log::{debug, trace};

use crate::{
    assembly::{Immediate, Instruction, OpCode, Operand},
    emit::MethodBody,
    metadata::{
        method::{MethodDesc, MethodImpl},
        registry::{TypeRegistry, EXCEPTION_MESSAGE_FIELD},
        token::Token,
        typesystem::{CilFlavor, CilType, CilTypeRc},
    },
    runtime::{
        config::ExecutionLimits,
        heap::{HeapObject, ManagedHeap},
        value::{EmValue, HeapRef, ManagedPointer, PointerTarget, StructValue},
    },
    Error, Result,
};

const NULL_REFERENCE: &str = "Object reference not set to an instance of an object.";
const INDEX_OUT_OF_RANGE: &str = "Index was outside the bounds of the array.";
const ARITHMETIC_OVERFLOW: &str = "Arithmetic operation resulted in an overflow.";

/// Outcome of a single instruction.
enum StepResult {
    Continue,
    Branch(u32),
    Return(Option<EmValue>),
}

#[derive(Debug)]
struct Frame {
    args: Vec<EmValue>,
    locals: Vec<EmValue>,
    stack: Vec<EmValue>,
}

/// Executes adapted bodies and native methods.
///
/// ```rust
/// use dotreflect::prelude::*;
///
/// let mut runtime = Runtime::new();
/// let text = runtime.alloc_string("hello")?;
/// assert_eq!(runtime.render(&text), "hello");
/// assert_eq!(runtime.string(&text)?, "hello");
/// # Ok::<(), dotreflect::Error>(())
/// ```
#[derive(Debug)]
pub struct Runtime {
    registry: TypeRegistry,
    heap: ManagedHeap,
    frames: Vec<Frame>,
    cells: Vec<EmValue>,
    limits: ExecutionLimits,
    executed: u64,
    depth: usize,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    /// Creates a runtime with a fresh [`TypeRegistry`] and default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_registry(TypeRegistry::new())
    }

    /// Creates a runtime over `registry` with default limits.
    #[must_use]
    pub fn with_registry(registry: TypeRegistry) -> Self {
        let limits = ExecutionLimits::default();
        Runtime {
            registry,
            heap: ManagedHeap::new(limits.max_heap_objects),
            frames: Vec::new(),
            cells: Vec::new(),
            limits,
            executed: 0,
            depth: 0,
        }
    }

    /// Replaces the execution limits. Objects already allocated are kept.
    #[must_use]
    pub fn with_limits(mut self, limits: ExecutionLimits) -> Self {
        self.heap.set_max_objects(limits.max_heap_objects);
        self.limits = limits;
        self
    }

    /// The type registry
    #[must_use]
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// The managed heap
    #[must_use]
    pub fn heap(&self) -> &ManagedHeap {
        &self.heap
    }

    /// The active limits
    #[must_use]
    pub fn limits(&self) -> &ExecutionLimits {
        &self.limits
    }

    /// Instructions executed since the runtime was created
    #[must_use]
    pub fn executed_instructions(&self) -> u64 {
        self.executed
    }

    /// Calls `method` with `args` (receiver first for instance methods).
    ///
    /// # Returns
    ///
    /// The return value, or `None` for `void` methods.
    ///
    /// # Errors
    ///
    /// - [`Error::ArgumentCount`] if `args` does not match the method's stack arguments
    /// - [`Error::NoImplementation`] for methods without a body
    /// - [`Error::ManagedException`] if the callee throws
    /// - [`Error::LimitExceeded`] when an execution limit is reached
    pub fn call(&mut self, method: &MethodDesc, args: Vec<EmValue>) -> Result<Option<EmValue>> {
        if args.len() != method.stack_arg_count() {
            return Err(Error::ArgumentCount {
                expected: method.stack_arg_count(),
                found: args.len(),
            });
        }
        trace!("Calling {}", method.full_name());

        self.enter()?;
        let result = match method.implementation() {
            MethodImpl::Native(native) => {
                let native = Arc::clone(native);
                native(&mut CallContext { runtime: self }, &args)
            }
            MethodImpl::Il(body) => {
                let body = Arc::clone(body);
                self.execute(&body, args)
            }
            MethodImpl::None => Err(Error::NoImplementation(method.full_name())),
        };
        self.leave();
        result
    }

    /// Runs `body` as a method with `args` as its arguments.
    ///
    /// # Errors
    ///
    /// See [`Runtime::call`].
    pub fn run_body(&mut self, body: &MethodBody, args: Vec<EmValue>) -> Result<Option<EmValue>> {
        self.enter()?;
        let result = self.execute(body, args);
        self.leave();
        result
    }

    fn enter(&mut self) -> Result<()> {
        let max = self.limits.max_call_depth;
        if max != 0 && self.depth >= max {
            return Err(Error::LimitExceeded {
                limit: "call depth",
                value: max as u64,
            });
        }
        self.depth += 1;
        Ok(())
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    fn execute(&mut self, body: &MethodBody, args: Vec<EmValue>) -> Result<Option<EmValue>> {
        let frame = self.frames.len();
        self.frames.push(Frame {
            args,
            locals: body.locals().iter().map(EmValue::default_for).collect(),
            stack: Vec::with_capacity(usize::from(body.max_stack())),
        });

        let result = self.run_frame(body, frame);
        self.frames.truncate(frame);

        if let Err(Error::ManagedException { type_name, message }) = &result {
            debug!("Unhandled {} leaving frame {}: {}", type_name, frame, message);
        }
        result
    }

    fn run_frame(&mut self, body: &MethodBody, frame: usize) -> Result<Option<EmValue>> {
        let instructions = body.instructions();
        let mut index = 0;

        loop {
            let instruction = instructions
                .get(index)
                .ok_or_else(|| malformed_error!("Execution ran past the end of the body"))?;
            self.tick()?;

            match self.step(body, frame, instruction)? {
                StepResult::Continue => index += 1,
                StepResult::Branch(target) => {
                    index = body.instruction_index(target).ok_or_else(|| {
                        Error::InvalidBranch(format!("No instruction at IL_{target:04x}"))
                    })?;
                }
                StepResult::Return(value) => return Ok(value),
            }
        }
    }

    fn tick(&mut self) -> Result<()> {
        self.executed += 1;
        let max = self.limits.max_instructions;
        if max != 0 && self.executed > max {
            return Err(Error::LimitExceeded {
                limit: "instructions",
                value: max,
            });
        }
        Ok(())
    }

    #[allow(clippy::too_many_lines)]
    fn step(
        &mut self,
        body: &MethodBody,
        frame: usize,
        instruction: &Instruction,
    ) -> Result<StepResult> {
        let tokens = body.tokens();

        match instruction.opcode {
            OpCode::Nop => {}

            // Arguments and locals
            OpCode::LdArg0
            | OpCode::LdArg1
            | OpCode::LdArg2
            | OpCode::LdArg3
            | OpCode::LdArgS
            | OpCode::LdArg => {
                let target = PointerTarget::Argument {
                    frame,
                    index: variable_index(instruction)?,
                };
                let value = self.slot(&target)?.clone();
                self.push(frame, value)?;
            }
            OpCode::LdArgaS | OpCode::LdArga => {
                let pointer = ManagedPointer::to_argument(frame, variable_index(instruction)?);
                self.push(frame, EmValue::ManagedPtr(pointer))?;
            }
            OpCode::StArgS | OpCode::StArg => {
                let value = self.pop(frame)?;
                let target = PointerTarget::Argument {
                    frame,
                    index: variable_index(instruction)?,
                };
                *self.slot_mut(&target)? = value;
            }
            OpCode::LdLoc0
            | OpCode::LdLoc1
            | OpCode::LdLoc2
            | OpCode::LdLoc3
            | OpCode::LdLocS
            | OpCode::LdLoc => {
                let target = PointerTarget::Local {
                    frame,
                    index: variable_index(instruction)?,
                };
                let value = self.slot(&target)?.clone();
                self.push(frame, value)?;
            }
            OpCode::LdLocaS | OpCode::LdLoca => {
                let pointer = ManagedPointer::to_local(frame, variable_index(instruction)?);
                self.push(frame, EmValue::ManagedPtr(pointer))?;
            }
            OpCode::StLoc0
            | OpCode::StLoc1
            | OpCode::StLoc2
            | OpCode::StLoc3
            | OpCode::StLocS
            | OpCode::StLoc => {
                let value = self.pop(frame)?;
                let target = PointerTarget::Local {
                    frame,
                    index: variable_index(instruction)?,
                };
                *self.slot_mut(&target)? = value;
            }

            // Constants
            OpCode::LdNull => self.push(frame, EmValue::Null)?,
            OpCode::LdcI4M1
            | OpCode::LdcI4_0
            | OpCode::LdcI4_1
            | OpCode::LdcI4_2
            | OpCode::LdcI4_3
            | OpCode::LdcI4_4
            | OpCode::LdcI4_5
            | OpCode::LdcI4_6
            | OpCode::LdcI4_7
            | OpCode::LdcI4_8
            | OpCode::LdcI4S
            | OpCode::LdcI4 => self.push(frame, EmValue::I32(int_constant(instruction)?))?,
            OpCode::LdcI8 => match instruction.operand {
                Operand::Immediate(Immediate::Int64(value)) => {
                    self.push(frame, EmValue::I64(value))?;
                }
                _ => return Err(missing_operand(instruction, "int64")),
            },
            OpCode::LdcR4 => match instruction.operand {
                Operand::Immediate(Immediate::Float32(value)) => {
                    self.push(frame, EmValue::F32(value))?;
                }
                _ => return Err(missing_operand(instruction, "float32")),
            },
            OpCode::LdcR8 => match instruction.operand {
                Operand::Immediate(Immediate::Float64(value)) => {
                    self.push(frame, EmValue::F64(value))?;
                }
                _ => return Err(missing_operand(instruction, "float64")),
            },
            OpCode::LdStr => {
                let value = tokens.resolve_string(token(instruction)?)?;
                let object = self.heap.alloc_string(value)?;
                self.push(frame, EmValue::ObjectRef(object))?;
            }

            // Stack
            OpCode::Dup => {
                let value = self
                    .frame_mut(frame)?
                    .stack
                    .last()
                    .cloned()
                    .ok_or(Error::StackUnderflow)?;
                self.push(frame, value)?;
            }
            OpCode::Pop => {
                self.pop(frame)?;
            }

            // Arithmetic and comparison
            OpCode::Add | OpCode::Sub | OpCode::Mul => {
                let right = self.pop(frame)?;
                let left = self.pop(frame)?;
                self.push(frame, arithmetic(instruction.opcode, &left, &right)?)?;
            }
            OpCode::Ceq => {
                let right = self.pop(frame)?;
                let left = self.pop(frame)?;
                self.push(frame, EmValue::from(left.cil_equals(&right)))?;
            }
            OpCode::ConvI4 | OpCode::ConvI8 | OpCode::ConvR8 => {
                let value = self.pop(frame)?;
                self.push(frame, convert(instruction.opcode, &value)?)?;
            }

            // Control flow
            OpCode::Br => return Ok(StepResult::Branch(branch_target(instruction)?)),
            OpCode::BrTrue | OpCode::BrFalse => {
                let value = self.pop(frame)?;
                if value.is_truthy() == (instruction.opcode == OpCode::BrTrue) {
                    return Ok(StepResult::Branch(branch_target(instruction)?));
                }
            }
            OpCode::Beq | OpCode::BneUn => {
                let right = self.pop(frame)?;
                let left = self.pop(frame)?;
                if left.cil_equals(&right) == (instruction.opcode == OpCode::Beq) {
                    return Ok(StepResult::Branch(branch_target(instruction)?));
                }
            }
            OpCode::Switch => {
                let selector = self.pop(frame)?.as_i32()?;
                if let Some(target) = usize::try_from(selector)
                    .ok()
                    .and_then(|case| instruction.branch_targets.get(case))
                {
                    return Ok(StepResult::Branch(*target));
                }
            }
            OpCode::Ret => {
                let value = self.frame_mut(frame)?.stack.pop();
                return Ok(StepResult::Return(value));
            }
            OpCode::Throw => {
                let exception = self.pop(frame)?;
                return Err(self.throw(&exception)?);
            }

            // Calls
            OpCode::Call | OpCode::CallVirt => {
                let method = tokens.resolve_method(token(instruction)?)?.clone();
                let args = self.pop_args(frame, method.stack_arg_count())?;
                if instruction.opcode == OpCode::CallVirt
                    && args.first().is_some_and(EmValue::is_null)
                {
                    return Err(self.null_reference());
                }

                let result = self.call(&method, args)?;
                if !method.return_type().is_void() {
                    let value = result.ok_or_else(|| {
                        malformed_error!("'{}' returned no value", method.full_name())
                    })?;
                    self.push(frame, value)?;
                }
            }
            OpCode::NewObj => {
                let constructor = tokens.resolve_method(token(instruction)?)?.clone();
                let mut args = self.pop_args(frame, constructor.params().len())?;
                let ty = constructor.declaring_type().clone();

                let value = if ty.is_value_type() {
                    let cell = self.push_cell(EmValue::default_for(&ty));
                    args.insert(0, EmValue::ManagedPtr(ManagedPointer::to_cell(cell)));
                    let called = self.call(&constructor, args);
                    let value = self.cell(cell).cloned();
                    self.release_cells(cell);
                    called?;
                    value?
                } else {
                    let object = EmValue::ObjectRef(self.heap.alloc_instance(&ty)?);
                    args.insert(0, object.clone());
                    self.call(&constructor, args)?;
                    object
                };
                self.push(frame, value)?;
            }

            // Indirection
            OpCode::LdIndI1
            | OpCode::LdIndU1
            | OpCode::LdIndI2
            | OpCode::LdIndU2
            | OpCode::LdIndI4
            | OpCode::LdIndU4
            | OpCode::LdIndI8
            | OpCode::LdIndI
            | OpCode::LdIndR4
            | OpCode::LdIndR8
            | OpCode::LdIndRef => {
                let pointer = self.pop_pointer(frame)?;
                let value = self.load(&pointer)?;
                self.push(frame, normalize(instruction.opcode, value)?)?;
            }
            OpCode::StIndI1
            | OpCode::StIndI2
            | OpCode::StIndI4
            | OpCode::StIndI8
            | OpCode::StIndI
            | OpCode::StIndR4
            | OpCode::StIndR8
            | OpCode::StIndRef => {
                let value = normalize(instruction.opcode, self.pop(frame)?)?;
                let pointer = self.pop_pointer(frame)?;
                self.store(&pointer, value)?;
            }
            OpCode::LdObj => {
                let pointer = self.pop_pointer(frame)?;
                let value = self.load(&pointer)?;
                self.push(frame, value)?;
            }
            OpCode::StObj => {
                let value = self.pop(frame)?;
                let pointer = self.pop_pointer(frame)?;
                self.store(&pointer, value)?;
            }
            OpCode::InitObj => {
                let ty = tokens.resolve_type(token(instruction)?)?;
                let pointer = self.pop_pointer(frame)?;
                self.store(&pointer, EmValue::default_for(ty))?;
            }

            // Objects and types
            OpCode::Box => {
                let ty = tokens.resolve_type(token(instruction)?)?;
                let value = self.pop(frame)?;
                let boxed = self.box_value(ty, value)?;
                self.push(frame, boxed)?;
            }
            OpCode::Unbox => {
                let ty = tokens.resolve_type(token(instruction)?)?;
                let object = self.pop(frame)?;
                let boxed = self.unbox_target(&object, ty)?;
                self.push(frame, EmValue::ManagedPtr(ManagedPointer::to_boxed(boxed)))?;
            }
            OpCode::UnboxAny => {
                let ty = tokens.resolve_type(token(instruction)?)?;
                let object = self.pop(frame)?;
                let value = if ty.is_reference_type() {
                    self.cast(object, ty)?
                } else {
                    let boxed = self.unbox_target(&object, ty)?;
                    self.load(&ManagedPointer::to_boxed(boxed))?
                };
                self.push(frame, value)?;
            }
            OpCode::CastClass => {
                let ty = tokens.resolve_type(token(instruction)?)?;
                let object = self.pop(frame)?;
                let value = self.cast(object, ty)?;
                self.push(frame, value)?;
            }
            OpCode::IsInst => {
                let ty = tokens.resolve_type(token(instruction)?)?;
                let object = self.pop(frame)?;
                let value = if self.is_instance(&object, ty)? {
                    object
                } else {
                    EmValue::Null
                };
                self.push(frame, value)?;
            }
            OpCode::LdFld => {
                let (owner, field) = tokens.resolve_field(token(instruction)?)?;
                let name = field_name(owner, field)?;
                let target = self.pop(frame)?;
                let value = self.field(&target, name)?;
                self.push(frame, value)?;
            }
            OpCode::LdFlda => {
                let (owner, field) = tokens.resolve_field(token(instruction)?)?;
                let name = field_name(owner, field)?;
                let target = self.pop(frame)?;
                let pointer = self.field_pointer(&target, name)?;
                self.push(frame, EmValue::ManagedPtr(pointer))?;
            }
            OpCode::StFld => {
                let (owner, field) = tokens.resolve_field(token(instruction)?)?;
                let name = field_name(owner, field)?;
                let value = self.pop(frame)?;
                let target = self.pop(frame)?;
                self.set_field(&target, name, value)?;
            }

            // Arrays
            OpCode::NewArr => {
                let element = tokens.resolve_type(token(instruction)?)?;
                let length = self.pop(frame)?.as_i64()?;
                let length = usize::try_from(length)
                    .ok()
                    .filter(|length| i32::try_from(*length).is_ok())
                    .ok_or_else(|| Error::managed("System.OverflowException", ARITHMETIC_OVERFLOW))?;
                let array = self.alloc_array(element, vec![EmValue::default_for(element); length])?;
                self.push(frame, array)?;
            }
            OpCode::LdLen => {
                let array = self.pop_object(frame)?;
                let length = self.heap.array(array)?.len();
                self.push(frame, EmValue::NativeInt(length as i64))?;
            }
            OpCode::LdElemRef => {
                let index = self.pop(frame)?.as_i64()?;
                let array = self.pop_object(frame)?;
                let value = self
                    .heap
                    .array(array)?
                    .get(element_index(index)?)
                    .cloned()
                    .ok_or_else(index_out_of_range)?;
                self.push(frame, value)?;
            }
            OpCode::StElemRef => {
                let value = self.pop(frame)?;
                let index = self.pop(frame)?.as_i64()?;
                let array = self.pop_object(frame)?;
                *self
                    .heap
                    .array_mut(array)?
                    .get_mut(element_index(index)?)
                    .ok_or_else(index_out_of_range)? = value;
            }
        }

        Ok(StepResult::Continue)
    }

    // Evaluation stack

    fn frame_mut(&mut self, frame: usize) -> Result<&mut Frame> {
        self.frames
            .get_mut(frame)
            .ok_or_else(|| malformed_error!("No active frame {}", frame))
    }

    fn push(&mut self, frame: usize, value: EmValue) -> Result<()> {
        let max = self.limits.max_stack_depth;
        let stack = &mut self.frame_mut(frame)?.stack;
        if max != 0 && stack.len() >= max {
            return Err(Error::LimitExceeded {
                limit: "stack depth",
                value: max as u64,
            });
        }
        stack.push(value);
        Ok(())
    }

    fn pop(&mut self, frame: usize) -> Result<EmValue> {
        self.frame_mut(frame)?
            .stack
            .pop()
            .ok_or(Error::StackUnderflow)
    }

    fn pop_args(&mut self, frame: usize, count: usize) -> Result<Vec<EmValue>> {
        let stack = &mut self.frame_mut(frame)?.stack;
        let split = stack.len().checked_sub(count).ok_or(Error::StackUnderflow)?;
        Ok(stack.split_off(split))
    }

    fn pop_pointer(&mut self, frame: usize) -> Result<ManagedPointer> {
        match self.pop(frame)? {
            EmValue::ManagedPtr(pointer) => Ok(pointer),
            EmValue::Null => Err(self.null_reference()),
            other => Err(Error::TypeMismatch {
                operation: "indirection",
                expected: "managed pointer",
                found: other.type_name().to_string(),
            }),
        }
    }

    fn pop_object(&mut self, frame: usize) -> Result<HeapRef> {
        let value = self.pop(frame)?;
        value.as_object_ref()?.ok_or_else(|| self.null_reference())
    }

    // Storage

    fn slot(&self, target: &PointerTarget) -> Result<&EmValue> {
        let invalid = || Error::InvalidPointer(format!("{target:?}"));
        match target {
            PointerTarget::Argument { frame, index } => self
                .frames
                .get(*frame)
                .and_then(|frame| frame.args.get(usize::from(*index)))
                .ok_or_else(invalid),
            PointerTarget::Local { frame, index } => self
                .frames
                .get(*frame)
                .and_then(|frame| frame.locals.get(usize::from(*index)))
                .ok_or_else(invalid),
            PointerTarget::Cell(cell) => self.cells.get(*cell).ok_or_else(invalid),
            PointerTarget::Boxed(object) => match self.heap.get(*object)? {
                HeapObject::Boxed { value, .. } => Ok(value),
                other => Err(Error::TypeMismatch {
                    operation: "unbox",
                    expected: "boxed value",
                    found: other.kind().to_string(),
                }),
            },
            PointerTarget::ArrayElement { array, index } => {
                self.heap.array(*array)?.get(*index).ok_or_else(invalid)
            }
            PointerTarget::ObjectField { object, field } => {
                self.heap.fields(*object)?.get(*field).ok_or_else(invalid)
            }
            PointerTarget::Field { base, field } => match self.slot(&base.target)? {
                EmValue::Struct(value) => value.fields.get(*field).ok_or_else(invalid),
                other => Err(Error::TypeMismatch {
                    operation: "field address",
                    expected: "struct",
                    found: other.type_name().to_string(),
                }),
            },
        }
    }

    fn slot_mut(&mut self, target: &PointerTarget) -> Result<&mut EmValue> {
        let invalid = || Error::InvalidPointer(format!("{target:?}"));
        match target {
            PointerTarget::Argument { frame, index } => self
                .frames
                .get_mut(*frame)
                .and_then(|frame| frame.args.get_mut(usize::from(*index)))
                .ok_or_else(invalid),
            PointerTarget::Local { frame, index } => self
                .frames
                .get_mut(*frame)
                .and_then(|frame| frame.locals.get_mut(usize::from(*index)))
                .ok_or_else(invalid),
            PointerTarget::Cell(cell) => self.cells.get_mut(*cell).ok_or_else(invalid),
            PointerTarget::Boxed(object) => match self.heap.get_mut(*object)? {
                HeapObject::Boxed { value, .. } => Ok(value),
                other => Err(Error::TypeMismatch {
                    operation: "unbox",
                    expected: "boxed value",
                    found: other.kind().to_string(),
                }),
            },
            PointerTarget::ArrayElement { array, index } => {
                self.heap.array_mut(*array)?.get_mut(*index).ok_or_else(invalid)
            }
            PointerTarget::ObjectField { object, field } => {
                self.heap.fields_mut(*object)?.get_mut(*field).ok_or_else(invalid)
            }
            PointerTarget::Field { base, field } => match self.slot_mut(&base.target)? {
                EmValue::Struct(value) => value.fields.get_mut(*field).ok_or_else(invalid),
                other => Err(Error::TypeMismatch {
                    operation: "field address",
                    expected: "struct",
                    found: other.type_name().to_string(),
                }),
            },
        }
    }

    /// Reads the value `pointer` refers to.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPointer`] if the storage no longer exists.
    pub fn load(&self, pointer: &ManagedPointer) -> Result<EmValue> {
        self.slot(&pointer.target).cloned()
    }

    /// Writes `value` through `pointer`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPointer`] if the storage no longer exists.
    pub fn store(&mut self, pointer: &ManagedPointer, value: EmValue) -> Result<()> {
        *self.slot_mut(&pointer.target)? = value;
        Ok(())
    }

    pub(crate) fn push_cell(&mut self, value: EmValue) -> usize {
        self.cells.push(value);
        self.cells.len() - 1
    }

    pub(crate) fn cell(&self, cell: usize) -> Result<&EmValue> {
        self.cells
            .get(cell)
            .ok_or_else(|| Error::InvalidPointer(format!("cell {cell}")))
    }

    pub(crate) fn release_cells(&mut self, base: usize) {
        self.cells.truncate(base);
    }

    // Objects

    /// Allocates a string and returns a reference to it.
    pub fn alloc_string(&mut self, value: &str) -> Result<EmValue> {
        Ok(EmValue::ObjectRef(self.heap.alloc_string(value)?))
    }

    /// Allocates a single-dimensional array of `element` holding `items`.
    pub fn alloc_array(&mut self, element: &CilTypeRc, items: Vec<EmValue>) -> Result<EmValue> {
        Ok(EmValue::ObjectRef(self.heap.alloc_array(element, items)?))
    }

    /// Boxes `value` as `ty`. Reference types are returned unchanged.
    pub fn box_value(&mut self, ty: &CilTypeRc, value: EmValue) -> Result<EmValue> {
        if ty.is_reference_type() {
            return Ok(value);
        }
        Ok(EmValue::ObjectRef(self.heap.alloc_boxed(ty, value)?))
    }

    /// The contents of a string reference.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] unless `value` refers to a string.
    pub fn string(&self, value: &EmValue) -> Result<String> {
        match value {
            EmValue::ObjectRef(object) => Ok(self.heap.string(*object)?.to_string()),
            other => Err(Error::TypeMismatch {
                operation: "string",
                expected: "string",
                found: other.type_name().to_string(),
            }),
        }
    }

    /// The elements of an array reference.
    pub fn array(&self, value: &EmValue) -> Result<&[EmValue]> {
        match value.as_object_ref()? {
            Some(object) => self.heap.array(object),
            None => Err(self.null_reference()),
        }
    }

    /// The runtime type of an object reference, `None` for null.
    pub fn type_of(&self, value: &EmValue) -> Result<Option<CilTypeRc>> {
        Ok(match value.as_object_ref()? {
            Some(object) => Some(self.heap.get(object)?.runtime_type(&self.registry)),
            None => None,
        })
    }

    /// Reads field `name` of an object, a struct, or the struct behind a pointer.
    ///
    /// # Errors
    ///
    /// Throws `NullReferenceException` for null targets and fails with
    /// [`Error::Malformed`] if the type has no such field.
    pub fn field(&self, target: &EmValue, name: &str) -> Result<EmValue> {
        if let EmValue::Struct(value) = target {
            let index = field_index(&value.ty, name)?;
            return value
                .fields
                .get(index)
                .cloned()
                .ok_or_else(|| Error::InvalidPointer(format!("{}::{}", value.ty, name)));
        }
        let pointer = self.field_pointer(target, name)?;
        self.load(&pointer)
    }

    /// Writes field `name` of an object or of the struct behind a pointer.
    pub fn set_field(&mut self, target: &EmValue, name: &str, value: EmValue) -> Result<()> {
        let pointer = self.field_pointer(target, name)?;
        self.store(&pointer, value)
    }

    fn field_pointer(&self, target: &EmValue, name: &str) -> Result<ManagedPointer> {
        match target {
            EmValue::ObjectRef(object) => {
                let index = match self.heap.get(*object)? {
                    HeapObject::Instance { ty, .. }
                    | HeapObject::Boxed {
                        value: EmValue::Struct(StructValue { ty, .. }),
                        ..
                    } => field_index(ty, name)?,
                    other => {
                        return Err(Error::TypeMismatch {
                            operation: "field",
                            expected: "object with fields",
                            found: other.kind().to_string(),
                        })
                    }
                };
                Ok(ManagedPointer::to_object_field(*object, index))
            }
            EmValue::ManagedPtr(pointer) => match self.load(pointer)? {
                EmValue::Struct(value) => Ok(pointer.clone().field(field_index(&value.ty, name)?)),
                other => Err(Error::TypeMismatch {
                    operation: "field",
                    expected: "struct",
                    found: other.type_name().to_string(),
                }),
            },
            EmValue::Null => Err(self.null_reference()),
            other => Err(Error::TypeMismatch {
                operation: "field",
                expected: "object reference or pointer",
                found: other.type_name().to_string(),
            }),
        }
    }

    fn is_instance(&self, value: &EmValue, ty: &CilType) -> Result<bool> {
        Ok(match self.type_of(value)? {
            None => true,
            Some(actual) => ty.is_object() || *actual == *ty || actual.is_assignable_to(ty),
        })
    }

    fn cast(&self, value: EmValue, ty: &CilType) -> Result<EmValue> {
        if self.is_instance(&value, ty)? {
            return Ok(value);
        }
        let actual = self
            .type_of(&value)?
            .map_or_else(|| "null".to_string(), |actual| actual.full_name());
        Err(Error::managed(
            &self.registry.invalid_cast_exception().full_name(),
            format!(
                "Unable to cast object of type '{}' to type '{}'.",
                actual,
                ty.full_name()
            ),
        ))
    }

    fn unbox_target(&self, value: &EmValue, ty: &CilTypeRc) -> Result<HeapRef> {
        let object = value.as_object_ref()?.ok_or_else(|| self.null_reference())?;
        match self.heap.get(object)? {
            HeapObject::Boxed { ty: boxed, .. } if *boxed == *ty => Ok(object),
            other => Err(Error::managed(
                &self.registry.invalid_cast_exception().full_name(),
                format!(
                    "Unable to cast object of type '{}' to type '{}'.",
                    other.runtime_type(&self.registry).full_name(),
                    ty.full_name()
                ),
            )),
        }
    }

    fn throw(&self, exception: &EmValue) -> Result<Error> {
        let Some(ty) = self.type_of(exception)? else {
            return Ok(self.null_reference());
        };
        Ok(Error::ManagedException {
            type_name: ty.full_name(),
            message: self.exception_message(exception),
        })
    }

    fn exception_message(&self, exception: &EmValue) -> String {
        self.field(exception, EXCEPTION_MESSAGE_FIELD)
            .and_then(|message| self.string(&message))
            .unwrap_or_default()
    }

    fn null_reference(&self) -> Error {
        Error::managed(
            &self.registry.null_reference_exception().full_name(),
            NULL_REFERENCE,
        )
    }

    /// A human readable rendering of `value`.
    ///
    /// Strings render as their contents, boxed primitives as their value, exceptions as
    /// `Type: message` and other objects as their type name.
    #[must_use]
    pub fn render(&self, value: &EmValue) -> String {
        match value {
            EmValue::Null => "null".to_string(),
            EmValue::I32(value) => value.to_string(),
            EmValue::I64(value) | EmValue::NativeInt(value) => value.to_string(),
            EmValue::F32(value) => value.to_string(),
            EmValue::F64(value) => value.to_string(),
            EmValue::Struct(value) => value.ty.full_name(),
            EmValue::ManagedPtr(pointer) => match self.load(pointer) {
                Ok(target) => format!("&{}", self.render(&target)),
                Err(_) => "&?".to_string(),
            },
            EmValue::ObjectRef(object) => match self.heap.get(*object) {
                Ok(HeapObject::String(text)) => text.to_string(),
                Ok(HeapObject::Boxed { ty, value }) => self.render_boxed(ty, value),
                Ok(HeapObject::Instance { ty, .. })
                    if **ty == *self.registry.exception()
                        || ty.is_assignable_to(&self.registry.exception()) =>
                {
                    format!("{}: {}", ty.full_name(), self.exception_message(value))
                }
                Ok(other) => other.runtime_type(&self.registry).full_name(),
                Err(_) => object.to_string(),
            },
        }
    }

    fn render_boxed(&self, ty: &CilType, value: &EmValue) -> String {
        match (ty.flavor(), value) {
            (CilFlavor::Boolean, EmValue::I32(flag)) => {
                String::from(if *flag != 0 { "True" } else { "False" })
            }
            (CilFlavor::Char, EmValue::I32(code)) => u32::try_from(*code)
                .ok()
                .and_then(char::from_u32)
                .map_or_else(|| code.to_string(), String::from),
            (CilFlavor::U4, EmValue::I32(raw)) => (*raw as u32).to_string(),
            (CilFlavor::U8, EmValue::I64(raw)) => (*raw as u64).to_string(),
            _ => self.render(value),
        }
    }
}

/// Access to the runtime from inside a native method.
pub struct CallContext<'a> {
    runtime: &'a mut Runtime,
}

impl CallContext<'_> {
    /// The type registry
    #[must_use]
    pub fn registry(&self) -> &TypeRegistry {
        self.runtime.registry()
    }

    /// Mutable access to the runtime, e.g. to call other methods.
    pub fn runtime(&mut self) -> &mut Runtime {
        &mut *self.runtime
    }

    /// Reads through a by-reference argument.
    pub fn load(&self, pointer: &EmValue) -> Result<EmValue> {
        self.runtime.load(pointer.as_managed_ptr()?)
    }

    /// Writes through a by-reference argument.
    pub fn store(&mut self, pointer: &EmValue, value: EmValue) -> Result<()> {
        let pointer = pointer.as_managed_ptr()?.clone();
        self.runtime.store(&pointer, value)
    }

    /// Reads a field; see [`Runtime::field`].
    pub fn field(&self, target: &EmValue, name: &str) -> Result<EmValue> {
        self.runtime.field(target, name)
    }

    /// Writes a field; see [`Runtime::set_field`].
    pub fn set_field(&mut self, target: &EmValue, name: &str, value: EmValue) -> Result<()> {
        self.runtime.set_field(target, name, value)
    }

    /// Allocates a string.
    pub fn alloc_string(&mut self, value: &str) -> Result<EmValue> {
        self.runtime.alloc_string(value)
    }

    /// Boxes a value; see [`Runtime::box_value`].
    pub fn box_value(&mut self, ty: &CilTypeRc, value: EmValue) -> Result<EmValue> {
        self.runtime.box_value(ty, value)
    }

    /// The contents of a string reference.
    pub fn string(&self, value: &EmValue) -> Result<String> {
        self.runtime.string(value)
    }

    /// Renders a value; see [`Runtime::render`].
    #[must_use]
    pub fn render(&self, value: &EmValue) -> String {
        self.runtime.render(value)
    }
}

fn variable_index(instruction: &Instruction) -> Result<u16> {
    match instruction.opcode {
        OpCode::LdArg0 | OpCode::LdLoc0 | OpCode::StLoc0 => Ok(0),
        OpCode::LdArg1 | OpCode::LdLoc1 | OpCode::StLoc1 => Ok(1),
        OpCode::LdArg2 | OpCode::LdLoc2 | OpCode::StLoc2 => Ok(2),
        OpCode::LdArg3 | OpCode::LdLoc3 | OpCode::StLoc3 => Ok(3),
        _ => instruction
            .index()
            .ok_or_else(|| missing_operand(instruction, "index")),
    }
}

fn int_constant(instruction: &Instruction) -> Result<i32> {
    Ok(match instruction.opcode {
        OpCode::LdcI4M1 => -1,
        OpCode::LdcI4_0 => 0,
        OpCode::LdcI4_1 => 1,
        OpCode::LdcI4_2 => 2,
        OpCode::LdcI4_3 => 3,
        OpCode::LdcI4_4 => 4,
        OpCode::LdcI4_5 => 5,
        OpCode::LdcI4_6 => 6,
        OpCode::LdcI4_7 => 7,
        OpCode::LdcI4_8 => 8,
        _ => match instruction.operand {
            Operand::Immediate(Immediate::Int8(value)) => i32::from(value),
            Operand::Immediate(Immediate::Int32(value)) => value,
            _ => return Err(missing_operand(instruction, "int32")),
        },
    })
}

fn token(instruction: &Instruction) -> Result<Token> {
    instruction
        .token()
        .ok_or_else(|| missing_operand(instruction, "token"))
}

fn branch_target(instruction: &Instruction) -> Result<u32> {
    instruction
        .branch_targets
        .first()
        .copied()
        .ok_or_else(|| missing_operand(instruction, "branch target"))
}

fn missing_operand(instruction: &Instruction, expected: &str) -> Error {
    malformed_error!(
        "IL_{:04x}: {} has no {} operand",
        instruction.offset,
        instruction.opcode,
        expected
    )
}

fn field_name(owner: &CilType, field: usize) -> Result<&str> {
    owner
        .fields()
        .get(field)
        .map(|field| field.name.as_str())
        .ok_or_else(|| malformed_error!("Type '{}' has no field #{}", owner, field))
}

fn field_index(ty: &CilType, name: &str) -> Result<usize> {
    ty.field_index(name)
        .ok_or_else(|| malformed_error!("Type '{}' has no field '{}'", ty, name))
}

fn element_index(index: i64) -> Result<usize> {
    usize::try_from(index).map_err(|_| index_out_of_range())
}

fn index_out_of_range() -> Error {
    Error::managed("System.IndexOutOfRangeException", INDEX_OUT_OF_RANGE)
}

fn arithmetic(opcode: OpCode, left: &EmValue, right: &EmValue) -> Result<EmValue> {
    let int32 = |a: i32, b: i32| match opcode {
        OpCode::Add => a.wrapping_add(b),
        OpCode::Sub => a.wrapping_sub(b),
        _ => a.wrapping_mul(b),
    };
    let int64 = |a: i64, b: i64| match opcode {
        OpCode::Add => a.wrapping_add(b),
        OpCode::Sub => a.wrapping_sub(b),
        _ => a.wrapping_mul(b),
    };
    let float = |a: f64, b: f64| match opcode {
        OpCode::Add => a + b,
        OpCode::Sub => a - b,
        _ => a * b,
    };

    Ok(match (left, right) {
        (EmValue::I32(a), EmValue::I32(b)) => EmValue::I32(int32(*a, *b)),
        (EmValue::I64(a), EmValue::I64(b)) => EmValue::I64(int64(*a, *b)),
        (EmValue::NativeInt(_), EmValue::I32(_) | EmValue::NativeInt(_))
        | (EmValue::I32(_), EmValue::NativeInt(_)) => {
            EmValue::NativeInt(int64(left.as_i64()?, right.as_i64()?))
        }
        (EmValue::F32(a), EmValue::F32(b)) => {
            EmValue::F32(float(f64::from(*a), f64::from(*b)) as f32)
        }
        (EmValue::F32(_) | EmValue::F64(_), EmValue::F32(_) | EmValue::F64(_)) => {
            EmValue::F64(float(left.as_f64()?, right.as_f64()?))
        }
        _ => {
            return Err(Error::TypeMismatch {
                operation: "arithmetic",
                expected: "matching numeric operands",
                found: format!("{} and {}", left.type_name(), right.type_name()),
            })
        }
    })
}

fn convert(opcode: OpCode, value: &EmValue) -> Result<EmValue> {
    let integer = match value {
        EmValue::I32(_) | EmValue::I64(_) | EmValue::NativeInt(_) => Some(value.as_i64()?),
        _ => None,
    };
    let float = match value {
        EmValue::F32(_) | EmValue::F64(_) => Some(value.as_f64()?),
        _ => None,
    };

    Ok(match (opcode, integer, float) {
        (OpCode::ConvI4, Some(v), _) => EmValue::I32(v as i32),
        (OpCode::ConvI4, _, Some(v)) => EmValue::I32(v as i32),
        (OpCode::ConvI8, Some(v), _) => EmValue::I64(v),
        (OpCode::ConvI8, _, Some(v)) => EmValue::I64(v as i64),
        (OpCode::ConvR8, Some(v), _) => EmValue::F64(v as f64),
        (OpCode::ConvR8, _, Some(v)) => EmValue::F64(v),
        _ => {
            return Err(Error::TypeMismatch {
                operation: "conversion",
                expected: "numeric value",
                found: value.type_name().to_string(),
            })
        }
    })
}

/// Applies the width and signedness of a typed `ldind`/`stind` to `value`.
fn normalize(opcode: OpCode, value: EmValue) -> Result<EmValue> {
    Ok(match opcode {
        OpCode::LdIndI1 | OpCode::StIndI1 => EmValue::I32(i32::from(value.as_i32()? as i8)),
        OpCode::LdIndU1 => EmValue::I32(i32::from(value.as_i32()? as u8)),
        OpCode::LdIndI2 | OpCode::StIndI2 => EmValue::I32(i32::from(value.as_i32()? as i16)),
        OpCode::LdIndU2 => EmValue::I32(i32::from(value.as_i32()? as u16)),
        OpCode::LdIndI4 | OpCode::LdIndU4 | OpCode::StIndI4 => EmValue::I32(value.as_i32()?),
        OpCode::LdIndI8 | OpCode::StIndI8 => EmValue::I64(value.as_i64()?),
        OpCode::LdIndI | OpCode::StIndI => EmValue::NativeInt(value.as_i64()?),
        OpCode::LdIndR4 | OpCode::StIndR4 => EmValue::F32(value.as_f64()? as f32),
        OpCode::LdIndR8 | OpCode::StIndR8 => EmValue::F64(value.as_f64()?),
        _ => value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        emit::Emitter,
        metadata::{method::MethodDesc, signature::SlotAccess},
    };

    fn body(registry: &TypeRegistry, build: impl FnOnce(&mut Emitter<'_>)) -> MethodBody {
        let mut emitter = Emitter::new(registry);
        build(&mut emitter);
        emitter.finalize().unwrap().0
    }

    #[test]
    fn arithmetic_and_branches() {
        let registry = TypeRegistry::new();
        // returns arg0 == 3 ? arg0 * 10 : arg0 - 1
        let body = body(&registry, |e| {
            let other = e.define_label().unwrap();
            e.ldarg(0).unwrap();
            e.ldc_i4(3).unwrap();
            e.branch(OpCode::BneUn, other).unwrap();
            e.ldarg(0).unwrap();
            e.ldc_i4(10).unwrap();
            e.op(OpCode::Mul).unwrap();
            e.ret(true).unwrap();
            e.mark_label(other).unwrap();
            e.ldarg(0).unwrap();
            e.ldc_i4(1).unwrap();
            e.op(OpCode::Sub).unwrap();
            e.ret(true).unwrap();
        });

        let mut runtime = Runtime::new();
        assert_eq!(
            runtime.run_body(&body, vec![EmValue::I32(3)]).unwrap(),
            Some(EmValue::I32(30))
        );
        assert_eq!(
            runtime.run_body(&body, vec![EmValue::I32(8)]).unwrap(),
            Some(EmValue::I32(7))
        );
    }

    #[test]
    fn locals_and_indirection() {
        let registry = TypeRegistry::new();
        let int64 = registry.int64();
        let body = body(&registry, |e| {
            let local = e.declare_local(&int64).unwrap();
            e.ldloca(&local).unwrap();
            e.ldc_i8(40).unwrap();
            e.store_indirect(&int64).unwrap();
            e.ldloc(&local).unwrap();
            e.ldc_i8(2).unwrap();
            e.op(OpCode::Add).unwrap();
            e.ret(true).unwrap();
        });

        let mut runtime = Runtime::new();
        assert_eq!(
            runtime.run_body(&body, Vec::new()).unwrap(),
            Some(EmValue::I64(42))
        );
    }

    #[test]
    fn boxing_and_casts() {
        let registry = TypeRegistry::new();
        let int32 = registry.int32();
        let string = registry.string();
        let unbox = body(&registry, |e| {
            e.ldarg(0).unwrap();
            e.unbox_any(&int32).unwrap();
            e.ret(true).unwrap();
        });
        let cast = body(&registry, |e| {
            e.ldarg(0).unwrap();
            e.castclass(&string).unwrap();
            e.ret(true).unwrap();
        });

        let mut runtime = Runtime::with_registry(registry.clone());
        let boxed = runtime.box_value(&registry.int32(), EmValue::I32(5)).unwrap();
        assert_eq!(runtime.render(&boxed), "5");
        assert_eq!(
            runtime.run_body(&unbox, vec![boxed.clone()]).unwrap(),
            Some(EmValue::I32(5))
        );

        let err = runtime.run_body(&cast, vec![boxed]).unwrap_err();
        assert!(matches!(
            err,
            Error::ManagedException { ref type_name, ref message }
                if type_name == "System.InvalidCastException"
                    && message == "Unable to cast object of type 'System.Int32' to type 'System.String'."
        ));
        assert_eq!(runtime.run_body(&cast, vec![EmValue::Null]).unwrap(), Some(EmValue::Null));

        let flag = runtime.box_value(&registry.boolean(), EmValue::I32(1)).unwrap();
        assert_eq!(runtime.render(&flag), "True");
    }

    #[test]
    fn throw_surfaces_managed_exception() {
        let registry = TypeRegistry::new();
        let exception = registry.target_parameter_count_exception();
        let body = body(&registry, |e| {
            e.throw_exception(&exception, "Parameter count mismatch.").unwrap();
        });

        let mut runtime = Runtime::with_registry(registry);
        let err = runtime.run_body(&body, Vec::new()).unwrap_err();
        assert!(matches!(
            err,
            Error::ManagedException { ref type_name, ref message }
                if type_name == "System.Reflection.TargetParameterCountException"
                    && message == "Parameter count mismatch."
        ));
    }

    #[test]
    fn arrays() {
        let registry = TypeRegistry::new();
        let body = body(&registry, |e| {
            e.ldarg(0).unwrap();
            e.op(OpCode::LdLen).unwrap();
            e.op(OpCode::ConvI4).unwrap();
            e.ret(true).unwrap();
        });
        let element = body_element(&registry);

        let mut runtime = Runtime::with_registry(registry.clone());
        let text = runtime.alloc_string("x").unwrap();
        let array = runtime
            .alloc_array(&registry.object(), vec![text.clone(), EmValue::Null])
            .unwrap();

        assert_eq!(runtime.run_body(&body, vec![array.clone()]).unwrap(), Some(EmValue::I32(2)));
        assert_eq!(
            runtime
                .run_body(&element, vec![array.clone(), EmValue::I32(0)])
                .unwrap(),
            Some(text)
        );
        assert!(matches!(
            runtime.run_body(&element, vec![array, EmValue::I32(5)]),
            Err(Error::ManagedException { ref type_name, .. })
                if type_name == "System.IndexOutOfRangeException"
        ));
        let strings = runtime.alloc_array(&registry.string(), Vec::new()).unwrap();
        assert_eq!(runtime.render(&strings), "System.String[]");
    }

    fn body_element(registry: &TypeRegistry) -> MethodBody {
        body(registry, |e| {
            e.ldarg(0).unwrap();
            e.ldarg(1).unwrap();
            e.op(OpCode::LdElemRef).unwrap();
            e.ret(true).unwrap();
        })
    }

    #[test]
    fn native_calls_and_by_ref() {
        let registry = TypeRegistry::new();
        let counter = CilType::class("Demo", "Counter").build();
        let bump = MethodDesc::builder("Bump", &counter)
            .static_method()
            .param_ref("value", &registry.int32())
            .native(|ctx, args| {
                let current = ctx.load(&args[0])?.as_i32()?;
                ctx.store(&args[0], EmValue::I32(current + 1))?;
                Ok(None)
            })
            .build();
        let method = bump.clone();
        let body = body(&registry, move |e| {
            e.ldarga(0).unwrap();
            e.call(&method).unwrap();
            e.ldarg(0).unwrap();
            e.ret(true).unwrap();
        });

        let mut runtime = Runtime::with_registry(registry);
        assert_eq!(
            runtime.run_body(&body, vec![EmValue::I32(9)]).unwrap(),
            Some(EmValue::I32(10))
        );
        assert!(matches!(
            runtime.call(&bump, Vec::new()),
            Err(Error::ArgumentCount { expected: 1, found: 0 })
        ));
        assert_eq!(bump.params()[0].access, SlotAccess::Ref);
    }

    #[test]
    fn struct_fields_through_pointers() {
        let registry = TypeRegistry::new();
        let date_time = registry.date_time();
        let body = body(&registry, |e| {
            e.ldarga(0).unwrap();
            e.ldc_i8(99).unwrap();
            e.stfld(&date_time, "_ticks").unwrap();
            e.ldarg(0).unwrap();
            e.ldfld(&date_time, "_ticks").unwrap();
            e.ret(true).unwrap();
        });

        let mut runtime = Runtime::with_registry(registry.clone());
        let value = EmValue::default_for(&registry.date_time());
        assert_eq!(
            runtime.run_body(&body, vec![value]).unwrap(),
            Some(EmValue::I64(99))
        );
    }

    #[test]
    fn limits() {
        let registry = TypeRegistry::new();
        let spin = body(&registry, |e| {
            let top = e.define_label().unwrap();
            e.mark_label(top).unwrap();
            e.branch(OpCode::Br, top).unwrap();
        });

        let mut runtime = Runtime::with_registry(registry)
            .with_limits(ExecutionLimits::new().with_max_instructions(100));
        assert!(matches!(
            runtime.run_body(&spin, Vec::new()),
            Err(Error::LimitExceeded { limit: "instructions", value: 100 })
        ));
    }
}
