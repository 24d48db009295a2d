//! Instruction stream behavior as driven through the emitter.

use dotreflect::{
    emit::{GeneratorDirective, ILInstruction, ILOperand},
    prelude::*,
};

fn sample_body(registry: &TypeRegistry) -> Result<Emitter<'_>> {
    let mut emitter = Emitter::new(registry);
    let done = emitter.define_label()?;
    let temp = emitter.declare_local(&registry.int64())?;

    emitter.ldarg(0)?;
    emitter.ldc_i4(1000)?;
    emitter.branch(OpCode::Beq, done)?;
    emitter.ldc_i8(7)?;
    emitter.stloc(&temp)?;
    emitter.mark_label(done)?;
    emitter.ldstr("offsets")?;
    emitter.op(OpCode::Pop)?;
    emitter.ret(false)?;
    Ok(emitter)
}

#[test]
fn offsets_are_monotonic_and_match_the_encoding() -> Result<()> {
    let registry = TypeRegistry::new();
    let (body, stream) = sample_body(&registry)?.finalize()?;

    let offsets: Vec<u32> = stream.iter().map(|entry| entry.offset()).collect();
    assert!(offsets.windows(2).all(|pair| pair[0] <= pair[1]));

    for instruction in body.instructions() {
        let entry = stream.find_by_offset(instruction.offset).unwrap();
        assert_eq!(entry.instruction().opcode(), Some(instruction.opcode));
        assert_eq!(entry.size(), instruction.size as usize);
    }
    assert!(stream.find_by_offset(body.bytecode().len() as u32).is_none());
    assert_eq!(stream.end_offset() as usize, body.bytecode().len());
    Ok(())
}

#[test]
fn throw_helper_is_found_at_its_offset() -> Result<()> {
    let registry = TypeRegistry::new();
    let mut emitter = Emitter::new(&registry);
    emitter.check_params_length(0, 3)?;
    emitter.ret(false)?;
    let (body, stream) = emitter.finalize()?;

    // ldarg.0, ldlen, conv.i4, ldc.i4.3, beq
    let entry = stream.find_by_offset(9).unwrap();
    assert!(matches!(
        entry.instruction(),
        ILInstruction::Directive(GeneratorDirective::ThrowException { exception, .. })
            if *exception == registry.target_parameter_count_exception()
    ));
    assert_eq!(entry.size(), 11);
    assert_eq!(body.bytecode()[9], 0x72);

    // the label mark shares the offset of ret
    let ret = stream.find_by_offset(20).unwrap();
    assert_eq!(ret.instruction().opcode(), Some(OpCode::Ret));
    assert!((10..20).all(|offset| stream.find_by_offset(offset).is_none()));
    Ok(())
}

#[test]
fn appending_out_of_order_fails() {
    let mut stream = InstructionStream::new();
    stream
        .append(4, ILInstruction::op(OpCode::Nop, ILOperand::None))
        .unwrap();

    assert!(matches!(
        stream.append(2, ILInstruction::op(OpCode::Nop, ILOperand::None)),
        Err(Error::Malformed { .. })
    ));
    assert_eq!(stream.len(), 1);
}

#[test]
fn truncation_is_idempotent() -> Result<()> {
    let mut stream = InstructionStream::new();
    let mut nodes = Vec::new();
    for (offset, opcode) in [(0, OpCode::LdArg0), (1, OpCode::LdArg1), (2, OpCode::Add), (3, OpCode::Ret)] {
        nodes.push(stream.append(offset, ILInstruction::op(opcode, ILOperand::None))?);
    }
    let expected: Vec<_> = stream.entries()[..2].to_vec();

    stream.truncate_after(nodes[1]);
    assert_eq!(stream.entries(), expected.as_slice());

    stream.truncate_after(nodes[1]);
    assert_eq!(stream.entries(), expected.as_slice());
    assert_eq!(stream.last_node(), Some(nodes[1]));
    Ok(())
}

#[test]
fn listing_shows_directives_and_operands() -> Result<()> {
    let registry = TypeRegistry::new();
    let emitter = sample_body(&registry)?;
    let listing = emitter.stream().to_string();

    assert!(listing.contains(".label label0"));
    assert!(listing.contains(".local local0: System.Int64"));
    assert!(listing.contains("ldc.i4 1000"));
    assert!(listing.contains("beq label0"));
    assert!(listing.contains("label0:"));
    assert!(listing.contains("ldstr \"offsets\""));
    Ok(())
}

#[test]
fn rollback_restores_stream_and_encoding() -> Result<()> {
    let registry = TypeRegistry::new();
    let mut emitter = Emitter::new(&registry);

    emitter.ldarg(0)?;
    let checkpoint = emitter.checkpoint();
    let before = emitter.stream().len();

    emitter.unbox_any(&registry.date_time())?;
    emitter.op(OpCode::Pop)?;
    emitter.rollback(&checkpoint)?;

    assert_eq!(emitter.stream().len(), before);
    assert_eq!(emitter.offset(), 1);
    emitter.ret(true)?;

    let (body, _) = emitter.finalize()?;
    assert_eq!(body.bytecode(), &[0x02, 0x2A]);
    Ok(())
}
