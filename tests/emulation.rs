//! Reference interpreter integration tests.
//!
//! The protection tests rely on the interpreter to judge generated code, so
//! these pin down the parts of its behaviour they depend on: calls, stack
//! slots, pointer-valued memory, atomic orderings and execution limits.

use ircloak::{
    emulation::{EmulationLimits, Process, RtValue},
    ir::{AtomicOrdering, BinaryOp, Constant, Global, IrType, ModuleBuilder, Value},
    Error, Result,
};

fn int(bits: u32, value: u64) -> RtValue {
    RtValue::Int { bits, value }
}

#[test]
fn test_calls_between_functions() -> Result<()> {
    let mut mb = ModuleBuilder::new("calls");
    mb.function("double", vec![IrType::I32], IrType::I32, |fb| {
        let twice = fb
            .ins()
            .binary(BinaryOp::Add, IrType::I32, Value::Arg(0), Value::Arg(0))?;
        fb.ins().ret(Some(twice))?;
        Ok(())
    })?;
    mb.function("quadruple", vec![IrType::I32], IrType::I32, |fb| {
        let once = fb.ins().call("double", IrType::I32, vec![Value::Arg(0)])?;
        let twice = fb
            .ins()
            .call("double", IrType::I32, vec![once.expect("double returns a value")])?;
        fb.ins().ret(twice)?;
        Ok(())
    })?;
    let module = mb.finish();

    let process = Process::new(&module);
    assert_eq!(process.call_by_name("quadruple", &[int(32, 5)])?, int(32, 20));
    // 32-bit arithmetic wraps.
    assert_eq!(process.call_by_name("double", &[int(32, 0x8000_0001)])?, int(32, 2));
    Ok(())
}

#[test]
fn test_stack_slots_are_fresh_per_call() -> Result<()> {
    let mut mb = ModuleBuilder::new("slots");
    mb.function("bump", vec![], IrType::I8, |fb| {
        let slot = fb.ins().alloca(IrType::I8)?;
        let old = fb.ins().load(IrType::I8, slot.clone())?;
        let new = fb.ins().binary(BinaryOp::Add, IrType::I8, old, Value::int(8, 1))?;
        fb.ins().store(new.clone(), slot)?;
        fb.ins().ret(Some(new))?;
        Ok(())
    })?;
    let module = mb.finish();

    let process = Process::new(&module);
    for _ in 0..3 {
        assert_eq!(process.call_by_name("bump", &[])?, int(8, 1));
    }
    Ok(())
}

#[test]
fn test_pointers_stored_in_initializers() -> Result<()> {
    let pair = IrType::anon_struct(vec![IrType::I32, IrType::Ptr]);
    let mut mb = ModuleBuilder::new("pointers");
    let text = mb.global(Global::new(".str", Constant::c_string("hi")));
    let holder = mb.global(Global::new(
        "holder",
        Constant::Struct {
            ty: pair.clone(),
            fields: vec![Constant::int(32, 7), Constant::Global(text).cast()],
        },
    ));
    let get = mb.function("get", vec![], IrType::Ptr, |fb| {
        let field = fb.ins().field_ptr(pair, Value::global(holder), 1)?;
        let ptr = fb.ins().load(IrType::Ptr, field)?;
        fb.ins().ret(Some(ptr))?;
        Ok(())
    })?;
    let module = mb.finish();

    let process = Process::new(&module);
    let ptr = process.call(get, &[])?.as_ptr()?;
    assert_eq!(process.read_c_string(ptr)?, b"hi".to_vec());
    assert_eq!(process.load(ptr, &IrType::I8)?, int(8, u64::from(b'h')));
    Ok(())
}

#[test]
fn test_atomic_orderings_are_counted() -> Result<()> {
    let mut mb = ModuleBuilder::new("atomics");
    let flag = mb.global(Global::new("flag", Constant::int(32, 0)).with_constant(false));
    mb.function("publish", vec![], IrType::I32, |fb| {
        let seen = fb
            .ins()
            .load_atomic(IrType::I32, Value::global(flag), AtomicOrdering::Acquire, 4)?;
        fb.ins()
            .store_atomic(Value::int(32, 1), Value::global(flag), AtomicOrdering::Release, 4)?;
        fb.ins().ret(Some(seen))?;
        Ok(())
    })?;
    let module = mb.finish();

    let process = Process::new(&module);
    assert_eq!(process.call_by_name("publish", &[])?, int(32, 0));
    assert_eq!(process.call_by_name("publish", &[])?, int(32, 1));

    let stats = process.memory_stats();
    assert_eq!(stats.acquire_loads, 2);
    assert_eq!(stats.release_stores, 2);
    assert_eq!(stats.stores, 2);
    Ok(())
}

#[test]
fn test_limits() -> Result<()> {
    let mut mb = ModuleBuilder::new("limits");
    mb.function("recurse", vec![], IrType::Void, |fb| {
        fb.ins().call("recurse", IrType::Void, vec![])?;
        fb.ins().ret(None)?;
        Ok(())
    })?;
    mb.function("unary", vec![IrType::I8], IrType::I8, |fb| {
        fb.ins().ret(Some(Value::Arg(0)))?;
        Ok(())
    })?;
    let module = mb.finish();

    let process = Process::with_limits(&module, EmulationLimits::default().with_max_call_depth(8));
    assert!(matches!(
        process.call_by_name("recurse", &[]),
        Err(Error::Emulation(_))
    ));
    assert!(matches!(
        process.call_by_name("unary", &[]),
        Err(Error::Emulation(_))
    ));

    let tight = Process::with_limits(&module, EmulationLimits::default().with_max_instructions(4));
    assert!(matches!(
        tight.call_by_name("recurse", &[]),
        Err(Error::EmulationLimit(4))
    ));
    Ok(())
}
