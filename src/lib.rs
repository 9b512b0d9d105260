//! Viua runtime: a process-oriented virtual machine.
//!
//! The crate is organised leaves-first, mirroring the components described
//! in the system design: a closed [`value`] system, a [`codec`] for the
//! on-disk instruction encoding, a [`loader`] for binary modules, a
//! [`process`] dispatch loop, a [`scheduler`] layer of cooperating worker
//! pools, and a [`kernel`] that owns everything process-wide.

pub mod codec;
pub mod config;
pub mod error;
pub mod kernel;
pub mod loader;
pub mod message;
pub mod pid;
pub mod process;
pub mod scheduler;
pub mod value;

pub mod prelude {
    pub use crate::config::RuntimeConfig;
    pub use crate::error::{InterpreterError, PanicReason, RuntimeError};
    pub use crate::kernel::Kernel;
    pub use crate::loader::Module;
    pub use crate::message::Message;
    pub use crate::pid::Pid;
    pub use crate::process::{ExecuteState, Process, ProcessState};
    pub use crate::scheduler::ProcessPool;
    pub use crate::value::Value;
}
