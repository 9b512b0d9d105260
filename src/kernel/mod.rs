//! The process-wide owner: mailboxes, PIDs, the prototype typesystem,
//! loaded native modules, and exit bookkeeping. Everything a process cannot
//! touch directly from inside its own dispatch loop lives here, reached
//! only through the `StepRequest` seam `process::dispatch` hands back to
//! the scheduler.

pub mod mailbox;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

pub use mailbox::Mailboxes;

use crate::config::RuntimeConfig;
use crate::error::{InterpreterError, PanicReason, RuntimeError};
use crate::loader::{resolve_native_module, ForeignFunction, Module, NativeLoadError, NativeModule};
use crate::pid::{Pid, PidEmitter};
use crate::value::io::InteractionIdEmitter;
use crate::value::{Atom, PrototypeValue, Value};

/// How a process's run ended, recorded for `join` and for the Kernel's
/// final exit-code computation.
#[derive(Debug, Clone)]
pub enum Termination {
    Finished(Option<Value>),
    Terminated(PanicReason),
}

/// The process-wide Kernel. Shared behind an `Arc` by every scheduler-pool
/// worker thread; every field that can be mutated concurrently is guarded
/// by its own lock rather than one coarse Kernel-wide mutex, matching the
/// shared-resource policy (mailboxes guarded per-mailbox, module tables
/// read-only after load).
pub struct Kernel {
    config: RuntimeConfig,
    pids: PidEmitter,
    interaction_ids: InteractionIdEmitter,
    mailboxes: Mailboxes,
    prototypes: Mutex<HashMap<Atom, PrototypeValue>>,
    native_modules: Mutex<HashMap<String, NativeModule>>,
    foreign_functions: Mutex<HashMap<String, ForeignFunction>>,
    terminations: Mutex<HashMap<Pid, Termination>>,
    main_pid: Mutex<Option<Pid>>,
    halted: Mutex<Option<String>>,
}

impl Kernel {
    fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            pids: PidEmitter::new(),
            interaction_ids: InteractionIdEmitter::new(),
            mailboxes: Mailboxes::new(),
            prototypes: Mutex::new(HashMap::new()),
            native_modules: Mutex::new(HashMap::new()),
            foreign_functions: Mutex::new(HashMap::new()),
            terminations: Mutex::new(HashMap::new()),
            main_pid: Mutex::new(None),
            halted: Mutex::new(None),
        }
    }

    pub const fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn interaction_ids(&self) -> &InteractionIdEmitter {
        &self.interaction_ids
    }

    pub fn mailboxes(&self) -> &Mailboxes {
        &self.mailboxes
    }

    pub const fn main_pid(&self) -> &Mutex<Option<Pid>> {
        &self.main_pid
    }

    /// Bring up a Kernel for `module`: apply `VIUAPRELINK`'s eager native
    /// imports, then spawn the main process at the module's entry point.
    pub fn bootstrap(config: RuntimeConfig, module: Arc<Module>) -> Result<(Arc<Self>, crate::process::Process), InterpreterError> {
        let kernel = Arc::new(Self::new(config));
        for name in &kernel.config.prelink {
            if let Err(err) = kernel.import_native_module(name) {
                return Err(InterpreterError::BootstrapFailure(format!("prelink {name} failed: {err}")));
            }
        }
        module
            .entry_offset()
            .ok_or_else(|| InterpreterError::BootstrapFailure("module declares no entry point".to_owned()))?;
        let function_name = module
            .metadata()
            .get("main")
            .cloned()
            .ok_or_else(|| InterpreterError::BootstrapFailure("module has no `main` metadata entry".to_owned()))?;
        let pid = kernel.pids.emit();
        let process = crate::process::Process::spawn(pid, module, &function_name, Vec::new())
            .map_err(|e| InterpreterError::BootstrapFailure(e.to_string()))?;
        kernel.mailboxes.register(pid);
        *kernel.main_pid.lock() = Some(pid);
        debug!(%pid, function = function_name.as_str(), "bootstrapped main process");
        Ok((kernel, process))
    }

    /// Spawn a child process running `function`, registering its mailbox.
    pub fn spawn(&self, module: Arc<Module>, function: &str, args: Vec<Value>) -> Result<crate::process::Process, RuntimeError> {
        let pid = self.pids.emit();
        let process = crate::process::Process::spawn(pid, module, function, args)?;
        self.mailboxes.register(pid);
        debug!(%pid, function, "spawned process");
        Ok(process)
    }

    /// Resolve `name` through the configured native-library search path and
    /// merge its exported functions into the foreign-function registry.
    /// Idempotent: re-importing an already-loaded module is a no-op.
    pub fn import_native_module(&self, name: &str) -> Result<(), NativeLoadError> {
        if self.native_modules.lock().contains_key(name) {
            return Ok(());
        }
        // SAFETY: `name` names a module whose `exports()` entry point is
        // trusted to honor the ABI layout `resolve_native_module` expects.
        let module = unsafe { resolve_native_module(name)? };
        let mut functions = self.foreign_functions.lock();
        for (function_name, pointer) in module.functions() {
            functions.insert(function_name.clone(), *pointer);
        }
        drop(functions);
        self.native_modules.lock().insert(name.to_owned(), module);
        debug!(module = name, "imported native module");
        Ok(())
    }

    pub fn resolve_foreign_function(&self, name: &str) -> Option<ForeignFunction> {
        self.foreign_functions.lock().get(name).copied()
    }

    pub fn register_prototype(&self, prototype: PrototypeValue) {
        self.prototypes.lock().insert(prototype.name().clone(), prototype);
    }

    pub fn prototype(&self, name: &Atom) -> Option<PrototypeValue> {
        self.prototypes.lock().get(name).cloned()
    }

    pub fn record_finished(&self, pid: Pid, value: Option<Value>) {
        self.terminations.lock().insert(pid, Termination::Finished(value));
        self.mailboxes.deregister(pid);
    }

    pub fn record_terminated(&self, pid: Pid, reason: PanicReason) {
        warn!(%pid, reason = reason.tag(), "process terminated by unhandled exception");
        self.terminations.lock().insert(pid, Termination::Terminated(reason));
        self.mailboxes.deregister(pid);
    }

    pub fn termination_of(&self, pid: Pid) -> Option<Termination> {
        self.terminations.lock().get(&pid).cloned()
    }

    /// Record a fatal, Kernel-wide halt: print `diagnostic` on stderr and
    /// force the final exit code to `1` regardless of any process's own
    /// termination, per the error-handling design's fatal/recoverable
    /// split.
    pub fn halt(&self, diagnostic: &str) {
        warn!(diagnostic, "halting kernel");
        eprintln!("viua-rt: fatal: {diagnostic}");
        *self.halted.lock() = Some(diagnostic.to_owned());
    }

    pub fn is_halted(&self) -> bool {
        self.halted.lock().is_some()
    }

    /// Exit code the CLI should report: `1` if the Kernel halted, else `0`
    /// on the main process's normal finish or `1` on an unhandled
    /// exception.
    pub fn exit_code(&self) -> Option<i32> {
        if self.is_halted() {
            return Some(1);
        }
        let pid = (*self.main_pid.lock())?;
        match self.termination_of(pid)? {
            Termination::Finished(_) => Some(0),
            Termination::Terminated(_) => Some(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_is_zero_on_normal_finish() {
        let kernel = Kernel::new(RuntimeConfig::default());
        let pid = Pid::from_parts(1, 1);
        *kernel.main_pid.lock() = Some(pid);
        kernel.record_finished(pid, Some(Value::Integer(2)));
        assert_eq!(kernel.exit_code(), Some(0));
    }

    #[test]
    fn exit_code_is_one_on_unhandled_exception() {
        let kernel = Kernel::new(RuntimeConfig::default());
        let pid = Pid::from_parts(1, 1);
        *kernel.main_pid.lock() = Some(pid);
        kernel.record_terminated(pid, PanicReason::DivideByZero);
        assert_eq!(kernel.exit_code(), Some(1));
    }

    #[test]
    fn unimported_foreign_function_resolves_to_none() {
        let kernel = Kernel::new(RuntimeConfig::default());
        assert!(kernel.resolve_foreign_function("nonexistent::fn").is_none());
    }
}
