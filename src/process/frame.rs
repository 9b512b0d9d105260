//! Call activation records.

use crate::codec::RegisterOperand;
use crate::process::register::RegisterSet;

/// One call activation record: the callee's view of its own arguments and
/// locals, plus enough of the caller's context to resume it on return.
#[derive(Debug)]
pub struct Frame {
    /// Byte offset to resume the caller at.
    pub return_address: usize,
    /// Caller-side actuals (`param`/`pamv` write here); also the callee's
    /// read-only `Parameters` view of the same set.
    pub arguments: RegisterSet,
    /// The callee's local register set (`allocate_registers` grows this).
    pub locals: RegisterSet,
    /// Where the caller wants this call's return value, if anywhere.
    pub destination: Option<RegisterOperand>,
    /// Name of the function this frame is executing.
    pub function_name: String,
    /// Names of functions scheduled to run (in reverse order of scheduling)
    /// when this frame exits, by return or by exception unwind.
    pub deferred: Vec<String>,
    /// Present only while executing inside an invoked closure: the
    /// closure's captured registers, addressable as `ClosureLocal`.
    pub closure_locals: Option<RegisterSet>,
}

impl Frame {
    /// Build a fresh frame for entering `function_name` with `argument_count`
    /// argument slots pre-sized; locals start empty and are grown by
    /// `allocate_registers`.
    pub fn new(function_name: impl Into<String>, return_address: usize, argument_count: usize, destination: Option<RegisterOperand>) -> Self {
        Self {
            return_address,
            arguments: RegisterSet::new(argument_count),
            locals: RegisterSet::new(0),
            destination,
            function_name: function_name.into(),
            deferred: Vec::new(),
            closure_locals: None,
        }
    }
}

/// A frame under construction by `frame`/`param`/`pamv`, not yet pushed to
/// the stack: at most one may be pending at a time.
#[derive(Debug)]
pub struct PendingFrame {
    pub arguments: RegisterSet,
    pub destination: Option<RegisterOperand>,
}

impl PendingFrame {
    pub fn new(argument_count: usize) -> Self {
        Self {
            arguments: RegisterSet::new(argument_count),
            destination: None,
        }
    }
}
