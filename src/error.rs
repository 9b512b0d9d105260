//! Runtime error taxonomy.
//!
//! Fallible operations inside the dispatch loop return [`RuntimeError`],
//! which is either [`RuntimeError::Recoverable`] (raised as an `Exception`
//! value and handled by the normal unwind machinery) or
//! [`RuntimeError::Halt`] (a fatal condition that terminates the Kernel).
//! At the Kernel boundary these surface as [`InterpreterError`].

use std::io;

use thiserror::Error;

use crate::pid::Pid;

/// Leaves of the error taxonomy from the error-handling design: every
/// variant is surfaced to Viua code as an `Exception` whose tag is this
/// variant's [`PanicReason::tag`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum PanicReason {
    /// Division by zero.
    #[error("division by zero")]
    DivideByZero,
    /// A narrowing numeric conversion did not fit in the target type.
    #[error("numeric value out of range")]
    NumericOutOfRange,
    /// A float literal or conversion could not be parsed.
    #[error("invalid float literal")]
    InvalidFloatParse,
    /// An operand's runtime type did not match what the opcode expected.
    #[error("operand type mismatch")]
    TypeMismatch,
    /// Register-indirect access pointed at a non-integer or out-of-range slot.
    #[error("invalid access mode")]
    InvalidAccessMode,
    /// Method dispatch on a `Struct`/`Prototype` failed to resolve.
    #[error("method dispatch failed")]
    MethodDispatchFailure,
    /// Read of an empty register.
    #[error("null register access")]
    NullRegisterAccess,
    /// Use of a register whose value has been deleted/moved out.
    #[error("use of deleted register")]
    DeletedRegisterUse,
    /// Dereference of a pointer whose target has died.
    #[error("dereference of expired pointer")]
    PointerToDeadValue,
    /// Dereference of a pointer from a different process than the caller.
    #[error("cross-process pointer dereference")]
    PointerCrossProcessLeak,
    /// Call stack depth exceeded the configured maximum.
    #[error("stack overflow")]
    StackOverflow,
    /// `return` executed against an empty stack where one was required.
    #[error("stack underflow")]
    StackUnderflow,
    /// `leave`/`catch` executed with no matching try frame pending.
    #[error("unmatched leave or catch")]
    UnmatchedLeaveOrCatch,
    /// `try` executed while a try frame was already pending on this frame.
    #[error("try frame already pending")]
    TryFramePending,
    /// `join` targeting the calling process itself.
    #[error("join on self")]
    JoinOnSelf,
    /// `receive` timed out with no message delivered.
    #[error("receive timeout")]
    ReceiveTimeout,
    /// `send` targeting an unknown/dead PID.
    #[error("send to unknown pid")]
    SendToUnknownPid,
    /// `join` timed out before the target process terminated.
    #[error("join timeout")]
    JoinTimeout,
    /// I/O submitted on an already-closed descriptor.
    #[error("submit on closed descriptor")]
    IoClosedDescriptor,
    /// I/O wait exceeded its timeout.
    #[error("I/O wait timeout")]
    IoWaitTimeout,
    /// The interaction was cancelled before completion.
    #[error("I/O interaction cancelled")]
    IoCancelled,
    /// A write interaction could only write part of its buffer.
    #[error("I/O write partial beyond bound")]
    IoWritePartial,
    /// Call to a function name with no address-map entry.
    #[error("undefined function")]
    UndefinedFunction,
    /// `enter` naming a block with no address-map entry.
    #[error("undefined block")]
    UndefinedBlock,
    /// Module path did not resolve through the configured search path.
    #[error("module not found")]
    ModuleNotFound,
    /// Foreign import name was not found in a loaded dynamic module.
    #[error("symbol not found")]
    SymbolNotFound,
    /// A new frame was requested while one was already pending.
    #[error("frame already pending")]
    FramePending,
    /// An opcode whose mnemonic table entry is reserved/unimplemented.
    #[error("unimplemented opcode")]
    UnimplementedOpcode,
}

impl PanicReason {
    /// The exception tag this reason raises as, matching the taxonomy
    /// leaves named in the error-handling design.
    pub const fn tag(self) -> &'static str {
        match self {
            Self::DivideByZero => "Arithmetic_divide_by_zero",
            Self::NumericOutOfRange => "Arithmetic_out_of_range",
            Self::InvalidFloatParse => "Arithmetic_invalid_float",
            Self::TypeMismatch => "Typing_mismatch",
            Self::InvalidAccessMode => "Typing_invalid_access",
            Self::MethodDispatchFailure => "Typing_dispatch_failure",
            Self::NullRegisterAccess => "Memory_null_register",
            Self::DeletedRegisterUse => "Memory_deleted_register",
            Self::PointerToDeadValue => "Memory_dead_pointer",
            Self::PointerCrossProcessLeak => "Memory_cross_process_pointer",
            Self::StackOverflow => "Stack_overflow",
            Self::StackUnderflow => "Stack_underflow",
            Self::UnmatchedLeaveOrCatch => "Stack_unmatched_leave",
            Self::TryFramePending => "Stack_try_pending",
            Self::JoinOnSelf => "Messaging_join_self",
            Self::ReceiveTimeout => "timeout",
            Self::SendToUnknownPid => "Messaging_unknown_pid",
            Self::JoinTimeout => "timeout",
            Self::IoClosedDescriptor => "IO_closed_descriptor",
            Self::IoWaitTimeout => "timeout",
            Self::IoCancelled => "IO_cancelled",
            Self::IoWritePartial => "IO_write_partial",
            Self::UndefinedFunction => "Linkage_undefined_function",
            Self::UndefinedBlock => "Linkage_undefined_block",
            Self::ModuleNotFound => "Linkage_module_not_found",
            Self::SymbolNotFound => "Linkage_symbol_not_found",
            Self::FramePending => "Stack_frame_pending",
            Self::UnimplementedOpcode => "Linkage_unimplemented_opcode",
        }
    }
}

/// Runtime error description that either has a well-formed unwind strategy
/// ([`Recoverable`](RuntimeError::Recoverable)) or must halt the Kernel
/// ([`Halt`](RuntimeError::Halt)).
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Specified error with a well-formed fallback strategy: raise an
    /// `Exception` carrying this reason and begin unwinding.
    #[error("{0}")]
    Recoverable(#[source] PanicReason),
    /// Unspecified error that should halt the execution (corrupted
    /// bytecode, loader failure, poisoned lock, I/O failure loading a
    /// native module).
    #[error("fatal runtime error: {0}")]
    Halt(#[source] io::Error),
}

impl RuntimeError {
    /// `true` if this error has a well-formed unwind strategy.
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Recoverable(_))
    }

    /// `true` if this error must halt the execution.
    pub const fn must_halt(&self) -> bool {
        matches!(self, Self::Halt(_))
    }
}

impl From<PanicReason> for RuntimeError {
    fn from(reason: PanicReason) -> Self {
        Self::Recoverable(reason)
    }
}

impl From<io::Error> for RuntimeError {
    fn from(e: io::Error) -> Self {
        Self::Halt(e)
    }
}

/// Fatal, Kernel-level errors: these terminate the runtime with a
/// diagnostic on stderr and exit code 1, per the CLI's exit-code contract.
#[derive(Debug, Error)]
pub enum InterpreterError {
    /// A process terminated by an unhandled exception and no watchdog was
    /// registered to absorb it.
    #[error("process {pid} terminated by unhandled exception: {reason}")]
    UnhandledException {
        /// Process that terminated.
        pid: Pid,
        /// The panic reason carried by the unwound exception.
        reason: PanicReason,
    },
    /// The module file could not be parsed.
    #[error("failed to load module: {0}")]
    LoadFailure(#[from] crate::loader::LoaderError),
    /// I/O failure unrelated to a specific process (e.g. opening the
    /// module file).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// No main process could be bootstrapped (e.g. entry function missing).
    #[error("bootstrap failed: {0}")]
    BootstrapFailure(String),
}

impl InterpreterError {
    /// Build an [`InterpreterError::UnhandledException`] from a process's
    /// final, unwound exception.
    pub const fn unhandled(pid: Pid, reason: PanicReason) -> Self {
        Self::UnhandledException { pid, reason }
    }
}
