//! Integration tests driving whole modules through the real loader, kernel,
//! and scheduler pool (plus two lower-level dispatch-loop scenarios that
//! only need a single process and no scheduler).

use std::sync::Arc;

use viua_rt::codec::{AccessMode, Encoder, Opcode, RegisterOperand, RegisterSetKind};
use viua_rt::kernel::{Kernel, Termination};
use viua_rt::loader::{Module, MAGIC};
use viua_rt::prelude::*;
use viua_rt::process::dispatch;

fn reg(index: u16) -> RegisterOperand {
    RegisterOperand { mode: AccessMode::Direct, set: RegisterSetKind::Local, index }
}

/// Assemble a module file: named functions and named blocks, packed back to
/// back in declaration order, with `main_name` recorded as the `main`
/// metadata entry.
fn build_module(main_name: &str, functions: &[(&str, Vec<u8>)], blocks: &[(&str, Vec<u8>)]) -> Arc<Module> {
    let mut code = Vec::new();
    let mut function_offsets = Vec::new();
    for (_, body) in functions {
        function_offsets.push(code.len() as u64);
        code.extend_from_slice(body);
    }
    let mut block_offsets = Vec::new();
    for (_, body) in blocks {
        block_offsets.push(code.len() as u64);
        code.extend_from_slice(body);
    }

    let mut bytes = MAGIC.to_vec();
    bytes.push(0); // executable
    bytes.extend_from_slice(&1u32.to_be_bytes()); // metadata count
    bytes.extend_from_slice(b"main\0");
    bytes.extend_from_slice(main_name.as_bytes());
    bytes.push(0);
    bytes.extend_from_slice(&0u32.to_be_bytes()); // external functions
    bytes.extend_from_slice(&0u32.to_be_bytes()); // external blocks
    bytes.extend_from_slice(&0u32.to_be_bytes()); // jump table
    bytes.extend_from_slice(&(functions.len() as u32).to_be_bytes());
    for ((name, _), offset) in functions.iter().zip(&function_offsets) {
        bytes.extend_from_slice(name.as_bytes());
        bytes.push(0);
        bytes.extend_from_slice(&offset.to_be_bytes());
    }
    bytes.extend_from_slice(&(blocks.len() as u32).to_be_bytes());
    for ((name, _), offset) in blocks.iter().zip(&block_offsets) {
        bytes.extend_from_slice(name.as_bytes());
        bytes.push(0);
        bytes.extend_from_slice(&offset.to_be_bytes());
    }
    bytes.extend_from_slice(&code);
    Arc::new(Module::from_bytes(bytes).unwrap())
}

fn allocate_registers(enc: &mut Encoder, count: i32) {
    enc.encode_opcode_byte(Opcode::AllocateRegisters as u8);
    enc.encode_i32(0, count);
}

/// Emit `frame argc` + one `param`/`pamv` per register in `sources`, ready
/// for a following `call`/`tailcall`.
fn open_call(enc: &mut Encoder, sources: &[RegisterOperand]) {
    enc.encode_opcode_byte(Opcode::Frame as u8);
    enc.encode_i32(0, sources.len() as i32);
    enc.encode_i32(0, 0);
    for (index, src) in sources.iter().enumerate() {
        enc.encode_opcode_byte(Opcode::Param as u8);
        enc.encode_i32(0, index as i32);
        enc.encode_register(*src);
    }
}

#[test]
fn arithmetic_and_return_scenario() {
    // main/0(a=3, b=4, c=2, d=7) computes ((a + b) * c) / d via three real
    // cross-function calls (the first two `call`, the last a `tailcall`),
    // exercising the `name`-form callee the way a compiled module would
    // chain arithmetic helpers together.
    let mut main = Encoder::new();
    allocate_registers(&mut main, 6);
    main.encode_opcode_byte(Opcode::Arg as u8);
    main.encode_register(reg(0));
    main.encode_i32(0, 0);
    main.encode_opcode_byte(Opcode::Arg as u8);
    main.encode_register(reg(1));
    main.encode_i32(0, 1);
    main.encode_opcode_byte(Opcode::Arg as u8);
    main.encode_register(reg(2));
    main.encode_i32(0, 2);
    main.encode_opcode_byte(Opcode::Arg as u8);
    main.encode_register(reg(3));
    main.encode_i32(0, 3);

    open_call(&mut main, &[reg(0), reg(1)]);
    main.encode_opcode_byte(Opcode::Call as u8);
    main.encode_register(reg(4));
    main.encode_callee_name("add/2");

    open_call(&mut main, &[reg(4), reg(2)]);
    main.encode_opcode_byte(Opcode::Call as u8);
    main.encode_register(reg(5));
    main.encode_callee_name("mul/2");

    open_call(&mut main, &[reg(5), reg(3)]);
    main.encode_opcode_byte(Opcode::Tailcall as u8);
    main.encode_callee_name("div/2");

    fn binary_helper(opcode: Opcode) -> Vec<u8> {
        let mut enc = Encoder::new();
        allocate_registers(&mut enc, 2);
        enc.encode_opcode_byte(Opcode::Arg as u8);
        enc.encode_register(reg(0));
        enc.encode_i32(0, 0);
        enc.encode_opcode_byte(Opcode::Arg as u8);
        enc.encode_register(reg(1));
        enc.encode_i32(0, 1);
        enc.encode_opcode_byte(opcode as u8);
        enc.encode_register(reg(0));
        enc.encode_register(reg(0));
        enc.encode_register(reg(1));
        enc.encode_opcode_byte(Opcode::Return as u8);
        enc.into_bytes()
    }

    let module = build_module(
        "main/0",
        &[
            ("main/0", main.into_bytes()),
            ("add/2", binary_helper(Opcode::Add)),
            ("mul/2", binary_helper(Opcode::Mul)),
            ("div/2", binary_helper(Opcode::Div)),
        ],
        &[],
    );

    let (kernel, _unused_main) = Kernel::bootstrap(RuntimeConfig::default(), Arc::clone(&module)).unwrap();
    let worker = kernel
        .spawn(module, "main/0", vec![Value::Integer(3), Value::Integer(4), Value::Integer(2), Value::Integer(7)])
        .unwrap();
    let pid = worker.pid();

    ProcessPool::run(Arc::clone(&kernel), worker);

    match kernel.termination_of(pid) {
        Some(Termination::Finished(Some(Value::Integer(2)))) => {}
        other => panic!("unexpected termination: {other:?}"),
    }
}

#[test]
fn send_receive_echo_scenario() {
    // main/0 spawns echo/0, hands it its own pid as the message payload
    // (the only channel a process has to tell another where to reply: a
    // delivered message carries no recoverable sender) and receives the
    // echoed atom back. No `join` needed here: `ProcessPool::run` already
    // waits for every spawned process before returning.
    let mut main = Encoder::new();
    allocate_registers(&mut main, 3);
    main.encode_opcode_byte(Opcode::Process as u8);
    main.encode_register(reg(1));
    main.encode_atom("echo/0");
    main.encode_opcode_byte(Opcode::Self_ as u8);
    main.encode_register(reg(2));
    main.encode_opcode_byte(Opcode::Send as u8);
    main.encode_register(reg(1));
    main.encode_register(reg(2));
    main.encode_opcode_byte(Opcode::Receive as u8);
    main.encode_register(reg(0));
    main.encode_timeout(0, 0);
    main.encode_opcode_byte(Opcode::Return as u8);

    let mut echo = Encoder::new();
    allocate_registers(&mut echo, 2);
    echo.encode_opcode_byte(Opcode::Receive as u8);
    echo.encode_register(reg(0));
    echo.encode_timeout(0, 0);
    echo.encode_opcode_byte(Opcode::Atom as u8);
    echo.encode_register(reg(1));
    echo.encode_atom("pong");
    echo.encode_opcode_byte(Opcode::Send as u8);
    echo.encode_register(reg(0));
    echo.encode_register(reg(1));
    echo.encode_opcode_byte(Opcode::Return as u8);

    let module = build_module("main/0", &[("main/0", main.into_bytes()), ("echo/0", echo.into_bytes())], &[]);
    let (kernel, main_process) = Kernel::bootstrap(RuntimeConfig::default(), module).unwrap();
    let main_pid = main_process.pid();

    let exit_code = ProcessPool::run(Arc::clone(&kernel), main_process);
    assert_eq!(exit_code, 0);

    match kernel.termination_of(main_pid) {
        Some(Termination::Finished(Some(Value::Atom(a)))) => assert_eq!(&*a, "pong"),
        other => panic!("unexpected termination: {other:?}"),
    }
}

#[test]
fn try_catch_recovers_from_a_tagged_exception() {
    // `join` on one's own pid is a synchronous, recoverable error
    // (`Messaging_join_self`); used here purely as a reliable way to raise
    // a specific tag without a literal-construction opcode.
    let mut main = Encoder::new();
    allocate_registers(&mut main, 2);
    main.encode_opcode_byte(Opcode::Try as u8);
    main.encode_opcode_byte(Opcode::Catch as u8);
    main.encode_atom("Messaging_join_self");
    main.encode_atom("handler");
    main.encode_opcode_byte(Opcode::Self_ as u8);
    main.encode_register(reg(0));
    main.encode_opcode_byte(Opcode::Join as u8);
    main.encode_register(reg(1));
    main.encode_register(reg(0));
    main.encode_timeout(0, 0);

    let mut handler = Encoder::new();
    handler.encode_opcode_byte(Opcode::Draw as u8);
    handler.encode_register(reg(0));
    handler.encode_opcode_byte(Opcode::Return as u8);

    let module = build_module("main/0", &[("main/0", main.into_bytes())], &[("handler", handler.into_bytes())]);
    let (kernel, main_process) = Kernel::bootstrap(RuntimeConfig::default(), module).unwrap();
    let main_pid = main_process.pid();

    let exit_code = ProcessPool::run(Arc::clone(&kernel), main_process);
    assert_eq!(exit_code, 0, "the exception was caught, so the process finishes normally");

    match kernel.termination_of(main_pid) {
        Some(Termination::Finished(Some(Value::Exception(e)))) => assert_eq!(e.tag(), "Messaging_join_self"),
        other => panic!("unexpected termination: {other:?}"),
    }
}

#[test]
fn receive_timeout_raises_a_catchable_exception() {
    let mut main = Encoder::new();
    allocate_registers(&mut main, 1);
    main.encode_opcode_byte(Opcode::Try as u8);
    main.encode_opcode_byte(Opcode::Catch as u8);
    main.encode_atom("timeout");
    main.encode_atom("handler");
    main.encode_opcode_byte(Opcode::Receive as u8);
    main.encode_register(reg(0));
    main.encode_timeout(0, 40);

    let mut handler = Encoder::new();
    handler.encode_opcode_byte(Opcode::Draw as u8);
    handler.encode_register(reg(0));
    handler.encode_opcode_byte(Opcode::Return as u8);

    let module = build_module("main/0", &[("main/0", main.into_bytes())], &[("handler", handler.into_bytes())]);
    let (kernel, main_process) = Kernel::bootstrap(RuntimeConfig::default(), module).unwrap();
    let main_pid = main_process.pid();

    let exit_code = ProcessPool::run(Arc::clone(&kernel), main_process);
    assert_eq!(exit_code, 0);

    match kernel.termination_of(main_pid) {
        Some(Termination::Finished(Some(Value::Exception(e)))) => assert_eq!(e.tag(), "timeout"),
        other => panic!("unexpected termination: {other:?}"),
    }
}

#[test]
fn unhandled_exception_with_no_catcher_terminates_the_process() {
    let mut main = Encoder::new();
    allocate_registers(&mut main, 2);
    main.encode_opcode_byte(Opcode::Self_ as u8);
    main.encode_register(reg(0));
    main.encode_opcode_byte(Opcode::Join as u8);
    main.encode_register(reg(1));
    main.encode_register(reg(0));
    main.encode_timeout(0, 0);

    let module = build_module("main/0", &[("main/0", main.into_bytes())], &[]);
    let (kernel, main_process) = Kernel::bootstrap(RuntimeConfig::default(), module).unwrap();
    let main_pid = main_process.pid();

    let exit_code = ProcessPool::run(Arc::clone(&kernel), main_process);
    assert_eq!(exit_code, 1);

    match kernel.termination_of(main_pid) {
        Some(Termination::Terminated(reason)) => assert_eq!(reason.tag(), "Messaging_join_self"),
        other => panic!("unexpected termination: {other:?}"),
    }
}

#[test]
fn closure_captures_a_register_by_move() {
    // This exercises the capture half of the mechanism in isolation, the
    // same way the crate's own internal dispatch tests drive a single
    // process without a scheduler. Invocation is covered separately by
    // `closure_capture_and_invocation_scenario` below.
    let mut code = Encoder::new();
    allocate_registers(&mut code, 2);
    code.encode_opcode_byte(Opcode::Closure as u8);
    code.encode_register(reg(0));
    code.encode_atom("callee/0");
    code.encode_opcode_byte(Opcode::Capturemove as u8);
    code.encode_register(reg(0));
    code.encode_i32(0, 0);
    code.encode_register(reg(1));

    let module = build_module("main/0", &[("main/0", code.into_bytes())], &[]);
    let mut process = Process::spawn(viua_rt::pid::Pid::from_parts(0, 1), module, "main/0", vec![]).unwrap();

    dispatch::step(&mut process).unwrap(); // allocate_registers
    process.write_operand(reg(1), Value::Integer(99)).unwrap();
    dispatch::step(&mut process).unwrap(); // closure
    dispatch::step(&mut process).unwrap(); // capturemove

    match process.read_operand(reg(0)).unwrap() {
        Value::Closure(c) => assert_eq!(c.captured(), &[Value::Integer(99)]),
        other => panic!("expected a closure, got {other:?}"),
    }
    assert!(process.is_null_operand(reg(1)).unwrap(), "capturemove must empty the source register");
}

#[test]
fn closure_capture_and_invocation_scenario() {
    // Capture a register by move into a closure, then invoke it through the
    // `%r` callee form (`call dst, %r`): the callee reads the captured value
    // back out of its `ClosureLocal` register set and hands it back.
    fn closure_reg(index: u16) -> RegisterOperand {
        RegisterOperand { mode: AccessMode::Direct, set: RegisterSetKind::ClosureLocal, index }
    }

    let mut main = Encoder::new();
    allocate_registers(&mut main, 3);
    main.encode_opcode_byte(Opcode::Closure as u8);
    main.encode_register(reg(0));
    main.encode_atom("echo_captured/0");
    main.encode_opcode_byte(Opcode::Capturemove as u8);
    main.encode_register(reg(0));
    main.encode_i32(0, 0);
    main.encode_register(reg(1));
    open_call(&mut main, &[]);
    main.encode_opcode_byte(Opcode::Call as u8);
    main.encode_register(reg(2));
    main.encode_callee_register(reg(0));

    let mut echo_captured = Encoder::new();
    allocate_registers(&mut echo_captured, 1);
    echo_captured.encode_opcode_byte(Opcode::Move as u8);
    echo_captured.encode_register(reg(0));
    echo_captured.encode_register(closure_reg(0));
    echo_captured.encode_opcode_byte(Opcode::Return as u8);

    let module = build_module("main/0", &[("main/0", main.into_bytes()), ("echo_captured/0", echo_captured.into_bytes())], &[]);
    let mut process = Process::spawn(viua_rt::pid::Pid::from_parts(0, 1), module, "main/0", vec![]).unwrap();

    dispatch::step(&mut process).unwrap(); // allocate_registers (main)
    process.write_operand(reg(1), Value::Integer(99)).unwrap();
    dispatch::step(&mut process).unwrap(); // closure
    dispatch::step(&mut process).unwrap(); // capturemove
    dispatch::step(&mut process).unwrap(); // frame
    dispatch::step(&mut process).unwrap(); // call, jumps into echo_captured/0
    dispatch::step(&mut process).unwrap(); // allocate_registers (echo_captured/0)
    dispatch::step(&mut process).unwrap(); // move
    dispatch::step(&mut process).unwrap(); // return, jumps back into main

    match process.read_operand(reg(2)).unwrap() {
        Value::Integer(99) => {}
        other => panic!("expected the closure's captured value echoed back, got {other:?}"),
    }
}
