//! The executing unit: a call stack of frames, an instruction dispatch
//! loop, and the suspend/resume points the scheduler drives.

pub mod dispatch;
pub mod frame;
pub mod register;
pub mod stack;

pub use frame::{Frame, PendingFrame};
pub use register::{RegisterFlags, RegisterSet};
pub use stack::{Stack, TryFrame, MAX_STACK_DEPTH};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::codec::{AccessMode, RegisterOperand, RegisterSetKind};
use crate::error::{PanicReason, RuntimeError};
use crate::loader::Module;
use crate::pid::Pid;
use crate::value::io::InteractionId;
use crate::value::{PointerValue, Value};

/// Where a process currently stands; drives scheduler bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Runnable,
    SuspendedOnReceive,
    SuspendedOnJoin,
    SuspendedOnIoWait,
    Terminated,
    Finished,
}

/// Why a process suspended itself, with the deadline (if any) at which a
/// pending timeout fires.
#[derive(Debug, Clone)]
pub enum SuspendReason {
    Receive { deadline: Option<Instant> },
    Join { target: Pid, destination: RegisterOperand, deadline: Option<Instant> },
    IoWait { id: InteractionId, deadline: Option<Instant> },
}

/// A side effect the dispatch loop cannot resolve by itself: it needs the
/// Kernel (spawn, send) or a scheduler pool (foreign call, I/O) to act.
#[derive(Debug)]
pub enum StepRequest {
    Spawn {
        function: String,
        args: Vec<Value>,
        destination: Option<RegisterOperand>,
    },
    Send {
        target: Pid,
        value: Value,
    },
    ForeignCall {
        name: String,
    },
    /// `import name`: resolve a dynamic native-library module by name and
    /// register its exported functions, blocking this process's progress
    /// only long enough for the Kernel to do the (mutex-guarded, load-time
    /// only) resolution.
    Import {
        module: String,
    },
    IoSubmit {
        kind: crate::value::io::InteractionKind,
        descriptor: Option<u64>,
        buffer: Vec<u8>,
    },
}

/// The outcome of running a process for up to one quantum.
#[derive(Debug)]
pub enum ExecuteState {
    /// The quantum's instruction budget ran out; reschedule at will.
    QuantumExpired,
    /// The process suspended itself; resume only when `reason` clears.
    Suspended(SuspendReason),
    /// A side effect was requested; the caller should act on it then
    /// resume driving this process's quantum.
    Requested(StepRequest),
    /// The process terminated by an unhandled exception.
    Terminated(PanicReason),
    /// The process returned normally from its entry function.
    Finished(Option<Value>),
    /// A fatal, Kernel-wide error reached the dispatch loop (corrupted
    /// bytecode, a loader failure, ...): the whole Kernel must stop, not
    /// just this process. Carries the diagnostic to print on stderr.
    Halted(String),
}

/// The executing unit. Owns its own stacks; everything shared process-wide
/// (mailboxes, the prototype table, other processes) lives in the Kernel
/// and is reached only through the `StepRequest`/Kernel-callback seam.
pub struct Process {
    pid: Pid,
    module: Arc<Module>,
    stack: Stack,
    watchdog_stacks: Vec<Stack>,
    watchdog_function: Option<String>,
    static_registers: HashMap<String, RegisterSet>,
    global_registers: RegisterSet,
    working_set: RegisterSetKind,
    ip: usize,
    state: ProcessState,
    pending_message: Option<crate::message::Message>,
}

impl Process {
    /// Spawn a fresh process entering `function_name` at its module offset,
    /// with `args` as its initial actuals.
    pub fn spawn(pid: Pid, module: Arc<Module>, function_name: &str, args: Vec<Value>) -> Result<Self, RuntimeError> {
        let offset = module
            .function_offset(function_name)
            .ok_or(PanicReason::UndefinedFunction)? as usize;
        let mut stack = Stack::new();
        let mut frame = Frame::new(function_name, 0, args.len(), None);
        for (i, value) in args.into_iter().enumerate() {
            frame.arguments.set(i, value)?;
        }
        stack.push_frame(frame)?;
        let mut process = Self {
            pid,
            module,
            stack,
            watchdog_stacks: Vec::new(),
            watchdog_function: None,
            static_registers: HashMap::new(),
            global_registers: RegisterSet::new(0),
            working_set: RegisterSetKind::Local,
            ip: offset,
            state: ProcessState::Runnable,
            pending_message: None,
        };
        process.ensure_static_registers(function_name);
        Ok(process)
    }

    pub const fn pid(&self) -> Pid {
        self.pid
    }

    pub const fn state(&self) -> ProcessState {
        self.state
    }

    fn ensure_static_registers(&mut self, function_name: &str) {
        self.static_registers
            .entry(function_name.to_owned())
            .or_insert_with(|| RegisterSet::new(0));
    }

    /// Deliver `message` to be picked up by the process's next `receive`,
    /// waking it if it was suspended waiting for one.
    pub fn deliver(&mut self, message: crate::message::Message) {
        self.pending_message = Some(message);
        if self.state == ProcessState::SuspendedOnReceive {
            self.state = ProcessState::Runnable;
        }
    }

    /// Resume a process that was suspended on `join`, once its target has
    /// terminated.
    pub fn resume_after_join(&mut self) {
        if self.state == ProcessState::SuspendedOnJoin {
            self.state = ProcessState::Runnable;
        }
    }

    pub fn resume_after_io(&mut self) {
        if self.state == ProcessState::SuspendedOnIoWait {
            self.state = ProcessState::Runnable;
        }
    }

    fn current_function_name(&self) -> Result<String, RuntimeError> {
        Ok(self.stack.current_frame().ok_or(PanicReason::StackUnderflow)?.function_name.clone())
    }

    fn register_set(&self, set: RegisterSetKind) -> Result<&RegisterSet, RuntimeError> {
        match set {
            RegisterSetKind::Global => Ok(&self.global_registers),
            RegisterSetKind::Arguments | RegisterSetKind::Parameters => {
                Ok(&self.stack.current_frame().ok_or(PanicReason::StackUnderflow)?.arguments)
            }
            RegisterSetKind::ClosureLocal => self
                .stack
                .current_frame()
                .ok_or(PanicReason::StackUnderflow)?
                .closure_locals
                .as_ref()
                .ok_or_else(|| PanicReason::NullRegisterAccess.into()),
            RegisterSetKind::Static => {
                let name = self.current_function_name()?;
                self.static_registers.get(&name).ok_or_else(|| PanicReason::NullRegisterAccess.into())
            }
            RegisterSetKind::Local => match self.working_set {
                RegisterSetKind::Static => self.register_set(RegisterSetKind::Static),
                RegisterSetKind::Global => Ok(&self.global_registers),
                _ => Ok(&self.stack.current_frame().ok_or(PanicReason::StackUnderflow)?.locals),
            },
        }
    }

    /// Switch the working register set used to resolve bare `Local`
    /// operands (`ress`).
    pub fn set_working_set(&mut self, kind: RegisterSetKind) {
        self.working_set = kind;
    }

    /// Resolve `operand` to its final (set, index), following one level of
    /// register-indirection if requested. Pointer-dereference operands are
    /// resolved separately since their target lives outside any register
    /// set's index space.
    fn resolve_index(&self, operand: RegisterOperand) -> Result<(RegisterSetKind, usize), RuntimeError> {
        match operand.mode {
            AccessMode::Direct | AccessMode::PointerDereference => Ok((operand.set, operand.index as usize)),
            AccessMode::RegisterIndirect => {
                let value = self.register_set(operand.set)?.get(operand.index as usize)?;
                match value {
                    Value::Integer(i) if i >= 0 => Ok((operand.set, i as usize)),
                    _ => Err(PanicReason::InvalidAccessMode.into()),
                }
            }
        }
    }

    /// The live pointer stored at `operand`'s register (only meaningful
    /// when `operand.mode == PointerDereference`).
    fn pointer_at(&self, operand: RegisterOperand) -> Result<PointerValue, RuntimeError> {
        let set = self.register_set(operand.set)?;
        match set.get(operand.index as usize)? {
            Value::Pointer(p) => Ok(p),
            _ => Err(PanicReason::InvalidAccessMode.into()),
        }
    }

    /// Read the value an operand names, following pointer-dereference if
    /// requested.
    pub fn read_operand(&self, operand: RegisterOperand) -> Result<Value, RuntimeError> {
        if operand.mode == AccessMode::PointerDereference {
            return self.pointer_at(operand)?.to(self.pid);
        }
        let (set_kind, index) = self.resolve_index(operand)?;
        self.register_set(set_kind)?.get(index)
    }

    /// Overwrite the value an operand names.
    pub fn write_operand(&self, operand: RegisterOperand, value: Value) -> Result<(), RuntimeError> {
        if operand.mode == AccessMode::PointerDereference {
            return self.pointer_at(operand)?.store(self.pid, value);
        }
        let (set_kind, index) = self.resolve_index(operand)?;
        self.register_set(set_kind)?.set(index, value)
    }

    /// Move the value out of the slot an operand names.
    pub fn take_operand(&self, operand: RegisterOperand) -> Result<Value, RuntimeError> {
        if operand.mode == AccessMode::PointerDereference {
            let pointer = self.pointer_at(operand)?;
            let value = pointer.to(self.pid)?;
            pointer.invalidate();
            return Ok(value);
        }
        let (set_kind, index) = self.resolve_index(operand)?;
        self.register_set(set_kind)?.take(index)
    }

    pub fn delete_operand(&self, operand: RegisterOperand) -> Result<(), RuntimeError> {
        if operand.mode == AccessMode::PointerDereference {
            self.pointer_at(operand)?.invalidate();
            return Ok(());
        }
        let (set_kind, index) = self.resolve_index(operand)?;
        self.register_set(set_kind)?.delete(index)
    }

    pub fn is_null_operand(&self, operand: RegisterOperand) -> Result<bool, RuntimeError> {
        if operand.mode == AccessMode::PointerDereference {
            return Ok(self.pointer_at(operand)?.expired());
        }
        let (set_kind, index) = self.resolve_index(operand)?;
        self.register_set(set_kind)?.is_null(index)
    }

    /// Build a [`PointerValue`] aliasing the slot an operand names (`ptr`).
    pub fn pointer_to_operand(&self, operand: RegisterOperand) -> Result<PointerValue, RuntimeError> {
        let (set_kind, index) = self.resolve_index(operand)?;
        let slot = self.register_set(set_kind)?.slot(index)?;
        Ok(PointerValue::new(self.pid, slot))
    }

    pub(crate) fn stack(&self) -> &Stack {
        &self.stack
    }

    pub(crate) fn stack_mut(&mut self) -> &mut Stack {
        &mut self.stack
    }

    pub(crate) const fn module(&self) -> &Arc<Module> {
        &self.module
    }

    pub(crate) const fn ip(&self) -> usize {
        self.ip
    }

    pub(crate) fn set_ip(&mut self, ip: usize) {
        self.ip = ip;
    }

    pub(crate) fn set_state(&mut self, state: ProcessState) {
        self.state = state;
    }

    pub(crate) fn take_pending_message(&mut self) -> Option<crate::message::Message> {
        self.pending_message.take()
    }

    pub(crate) fn has_pending_message(&self) -> bool {
        self.pending_message.is_some()
    }

    pub(crate) fn watchdog_function(&self) -> Option<&str> {
        self.watchdog_function.as_deref()
    }

    pub(crate) fn set_watchdog(&mut self, function: String) {
        self.watchdog_function = Some(function);
    }

    pub(crate) fn static_registers_entry(&mut self, name: &str) -> &mut RegisterSet {
        self.static_registers.entry(name.to_owned()).or_insert_with(|| RegisterSet::new(0))
    }

    pub(crate) fn push_watchdog_stack(&mut self, stack: Stack) {
        self.watchdog_stacks.push(stack);
    }

    pub(crate) fn pop_watchdog_stack(&mut self) -> Option<Stack> {
        self.watchdog_stacks.pop()
    }

    /// Divert this process into its registered watchdog function, carrying
    /// `exception` as the watchdog's sole argument. The stack that was
    /// unwound down to empty is parked on `watchdog_stacks` so a later
    /// `return` from the watchdog (not yet driven here; the dispatch loop
    /// treats a watchdog stack exactly like the main one) could in
    /// principle restore it. Fails if no watchdog is registered or its
    /// function is undefined.
    pub(crate) fn enter_watchdog(&mut self, exception: Value) -> Result<(), RuntimeError> {
        let function = self.watchdog_function.clone().ok_or(PanicReason::UndefinedFunction)?;
        let offset = self.module.function_offset(&function).ok_or(PanicReason::UndefinedFunction)? as usize;
        let mut frame = Frame::new(function.clone(), 0, 1, None);
        frame.arguments.set(0, exception)?;
        self.ensure_static_registers(&function);

        let old_stack = std::mem::replace(&mut self.stack, Stack::new());
        self.push_watchdog_stack(old_stack);
        self.stack.push_frame(frame)?;
        self.ip = offset;
        self.state = ProcessState::Runnable;
        Ok(())
    }

    /// Run this process for up to `quantum` instructions, stopping early on
    /// suspension, a request the caller must service, or termination.
    pub fn run_quantum(&mut self, quantum: usize) -> ExecuteState {
        for _ in 0..quantum {
            match dispatch::step(self) {
                Ok(dispatch::StepOutcome::Continue | dispatch::StepOutcome::Jumped) => continue,
                Ok(dispatch::StepOutcome::Suspend(reason)) => return ExecuteState::Suspended(reason),
                Ok(dispatch::StepOutcome::Request(request)) => return ExecuteState::Requested(request),
                Ok(dispatch::StepOutcome::Finished(value)) => {
                    self.state = ProcessState::Finished;
                    return ExecuteState::Finished(value);
                }
                Err(err) => match dispatch::unwind_on_error(self, err) {
                    dispatch::UnwindOutcome::Recovered => continue,
                    dispatch::UnwindOutcome::Terminated(reason) => {
                        self.state = ProcessState::Terminated;
                        return ExecuteState::Terminated(reason);
                    }
                    dispatch::UnwindOutcome::Halt(diagnostic) => {
                        self.state = ProcessState::Terminated;
                        return ExecuteState::Halted(diagnostic);
                    }
                },
            }
        }
        ExecuteState::QuantumExpired
    }
}
