//! The process-scheduler pool: worker threads draw runnable processes off
//! one shared ready queue, run them for up to one quantum, and either
//! requeue, park, or retire them depending on what happened.
//!
//! Every worker shares a single `crossbeam_channel` as the ready queue
//! rather than owning a private per-worker queue with Kernel-driven
//! rebalancing; a process that yields its quantum on one worker is free to
//! resume on any other. This trades a little cache locality for a much
//! simpler implementation, and work-stealing falls out of the shared
//! channel for free.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::PanicReason;
use crate::kernel::{Kernel, Termination};
use crate::message::Message;
use crate::pid::Pid;
use crate::process::dispatch;
use crate::process::{ExecuteState, Process, ProcessState, StepRequest, SuspendReason};
use crate::value::Value;

use super::{ffi_pool, io_pool};

/// How often an idle worker wakes up to check parked processes for an
/// elapsed deadline.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

struct Parked {
    process: Process,
    reason: SuspendReason,
}

/// Owns the shared ready queue and the set of currently-parked processes;
/// `run` blocks the calling thread until every process (the main one and
/// anything it, transitively, spawned) has finished or terminated.
pub struct ProcessPool;

impl ProcessPool {
    /// Drive `main` (and anything it spawns) to completion across
    /// `kernel.config().scheduler_workers` worker threads, returning the
    /// process exit code the CLI should report.
    pub fn run(kernel: Arc<Kernel>, main: Process) -> i32 {
        let (ready_tx, ready_rx) = unbounded::<Process>();
        let parked = Arc::new(Mutex::new(VecDeque::new()));
        let live = Arc::new(AtomicUsize::new(1));

        ready_tx.send(main).ok();

        let worker_count = kernel.config().scheduler_workers.max(1);
        debug!(worker_count, "starting process-scheduler pool");
        let handles: Vec<_> = (0..worker_count)
            .map(|id| {
                let kernel = Arc::clone(&kernel);
                let ready_rx = ready_rx.clone();
                let ready_tx = ready_tx.clone();
                let parked = Arc::clone(&parked);
                let live = Arc::clone(&live);
                thread::Builder::new()
                    .name(format!("viua-scheduler-{id}"))
                    .spawn(move || worker_loop(&kernel, &ready_rx, &ready_tx, &parked, &live))
                    .expect("failed to spawn scheduler worker thread")
            })
            .collect();
        drop(ready_tx);
        drop(ready_rx);

        for handle in handles {
            let _ = handle.join();
        }
        kernel.exit_code().unwrap_or(1)
    }
}

fn worker_loop(kernel: &Arc<Kernel>, ready_rx: &Receiver<Process>, ready_tx: &Sender<Process>, parked: &Arc<Mutex<VecDeque<Parked>>>, live: &Arc<AtomicUsize>) {
    loop {
        if live.load(Ordering::SeqCst) == 0 {
            return;
        }
        match ready_rx.recv_timeout(POLL_INTERVAL) {
            Ok(process) => drive_until_yield(kernel, process, ready_tx, parked, live),
            Err(RecvTimeoutError::Timeout) => reap_timeouts(kernel, parked, ready_tx, live),
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

/// Drive one process until it yields its quantum, suspends, requests a
/// side effect (serviced inline, then re-driven), or retires.
fn drive_until_yield(kernel: &Arc<Kernel>, mut process: Process, ready_tx: &Sender<Process>, parked: &Arc<Mutex<VecDeque<Parked>>>, live: &Arc<AtomicUsize>) {
    loop {
        kernel.mailboxes().deliver_pending(&mut process);
        match process.run_quantum(kernel.config().quantum) {
            ExecuteState::QuantumExpired => {
                trace!(pid = %process.pid(), "quantum expired");
                ready_tx.send(process).ok();
                return;
            }
            ExecuteState::Suspended(SuspendReason::Join { target, destination, deadline }) => {
                // The target may already have finished by the time this
                // `join` runs (it raced ahead on another worker): resolve
                // against the recorded termination right here rather than
                // parking, since `wake_joiners` only wakes joins that are
                // already parked at the moment a target's `finish()` runs.
                if let Some(termination) = kernel.termination_of(target) {
                    match resolve_join(&mut process, destination, &termination) {
                        Some(reason) => {
                            let pid = process.pid();
                            finish(kernel, parked, ready_tx, live, pid, Termination::Terminated(reason));
                        }
                        None => {
                            ready_tx.send(process).ok();
                        }
                    }
                    return;
                }
                process.set_state(ProcessState::SuspendedOnJoin);
                parked.lock().push_back(Parked { process, reason: SuspendReason::Join { target, destination, deadline } });
                return;
            }
            ExecuteState::Suspended(reason) => {
                process.set_state(match reason {
                    SuspendReason::Receive { .. } => ProcessState::SuspendedOnReceive,
                    SuspendReason::IoWait { .. } => ProcessState::SuspendedOnIoWait,
                    SuspendReason::Join { .. } => unreachable!("handled above"),
                });
                parked.lock().push_back(Parked { process, reason });
                return;
            }
            ExecuteState::Requested(request) => match service_request(kernel, &mut process, request, ready_tx, parked, live) {
                Some(ServiceOutcome::Terminated(reason)) => {
                    finish(kernel, parked, ready_tx, live, process.pid(), Termination::Terminated(reason));
                    return;
                }
                Some(ServiceOutcome::Halt(diagnostic)) => {
                    kernel.halt(&diagnostic);
                    live.store(0, Ordering::SeqCst);
                    return;
                }
                None => {}
            },
            ExecuteState::Finished(value) => {
                let pid = process.pid();
                finish(kernel, parked, ready_tx, live, pid, Termination::Finished(value));
                return;
            }
            ExecuteState::Terminated(reason) => {
                let pid = process.pid();
                finish(kernel, parked, ready_tx, live, pid, Termination::Terminated(reason));
                return;
            }
            ExecuteState::Halted(diagnostic) => {
                kernel.halt(&diagnostic);
                live.store(0, Ordering::SeqCst);
                return;
            }
        }
    }
}

/// What servicing a [`StepRequest`] did to the requesting process: nothing
/// (`None`, keep driving it), terminate it with a reason, or escalate into
/// a Kernel-wide halt.
enum ServiceOutcome {
    Terminated(PanicReason),
    Halt(String),
}

fn outcome_of(unwound: dispatch::UnwindOutcome) -> Option<ServiceOutcome> {
    match unwound {
        dispatch::UnwindOutcome::Recovered => None,
        dispatch::UnwindOutcome::Terminated(reason) => Some(ServiceOutcome::Terminated(reason)),
        dispatch::UnwindOutcome::Halt(diagnostic) => Some(ServiceOutcome::Halt(diagnostic)),
    }
}

/// Act on a [`StepRequest`] the dispatch loop handed back. Returns
/// `Some(..)` if servicing the request itself caused `process` to
/// terminate (e.g. an unhandled `send`-to-unknown-pid exception) or
/// escalated into a fatal Kernel halt.
fn service_request(
    kernel: &Arc<Kernel>,
    process: &mut Process,
    request: StepRequest,
    ready_tx: &Sender<Process>,
    parked: &Arc<Mutex<VecDeque<Parked>>>,
    live: &Arc<AtomicUsize>,
) -> Option<ServiceOutcome> {
    match request {
        StepRequest::Spawn { function, args, destination } => match kernel.spawn(process.module().clone(), &function, args) {
            Ok(child) => {
                if let Some(dst) = destination {
                    let _ = process.write_operand(dst, Value::Pid(child.pid()));
                }
                live.fetch_add(1, Ordering::SeqCst);
                ready_tx.send(child).ok();
                None
            }
            Err(err) => outcome_of(dispatch::unwind_on_error(process, err)),
        },
        StepRequest::Send { target, value } => {
            if kernel.mailboxes().is_registered(target) {
                kernel.mailboxes().enqueue(target, Message::new(process.pid(), value));
                wake_receiver(kernel, parked, ready_tx, target);
                None
            } else {
                dispatch::unwind_on_panic(process, PanicReason::SendToUnknownPid).map(ServiceOutcome::Terminated)
            }
        }
        StepRequest::ForeignCall { name } => match kernel.resolve_foreign_function(&name) {
            // SAFETY: the pointer was registered from a dynamic module's
            // `exports()` table (see `loader::native`), the only source
            // `resolve_foreign_function` ever returns from.
            Some(function) => {
                unsafe { ffi_pool::invoke(function) };
                None
            }
            None => dispatch::unwind_on_panic(process, PanicReason::SymbolNotFound).map(ServiceOutcome::Terminated),
        },
        StepRequest::Import { module } => match kernel.import_native_module(&module) {
            Ok(()) => None,
            Err(_) => dispatch::unwind_on_panic(process, PanicReason::ModuleNotFound).map(ServiceOutcome::Terminated),
        },
        StepRequest::IoSubmit { kind, descriptor, buffer } => {
            io_pool::submit(kernel, kind, descriptor, buffer);
            None
        }
    }
}

/// If a process is parked on `receive` waiting on `target`, hand it the
/// message just enqueued and put it back on the ready queue.
fn wake_receiver(kernel: &Arc<Kernel>, parked: &Arc<Mutex<VecDeque<Parked>>>, ready_tx: &Sender<Process>, target: Pid) {
    let woken = {
        let mut guard = parked.lock();
        let index = guard
            .iter()
            .position(|p| p.process.pid() == target && matches!(p.reason, SuspendReason::Receive { .. }));
        index.and_then(|i| guard.remove(i))
    };
    if let Some(mut entry) = woken {
        kernel.mailboxes().deliver_pending(&mut entry.process);
        ready_tx.send(entry.process).ok();
    }
}

/// Record `pid`'s termination with the Kernel, release its mailbox, and
/// wake anything parked on `join`ing it.
fn finish(kernel: &Arc<Kernel>, parked: &Arc<Mutex<VecDeque<Parked>>>, ready_tx: &Sender<Process>, live: &Arc<AtomicUsize>, pid: Pid, termination: Termination) {
    match &termination {
        Termination::Finished(value) => kernel.record_finished(pid, value.clone()),
        Termination::Terminated(reason) => kernel.record_terminated(pid, *reason),
    }
    live.fetch_sub(1, Ordering::SeqCst);
    wake_joiners(kernel, parked, ready_tx, live, pid, &termination);
}

/// Resolve a single `join`: deliver the target's return value into
/// `destination`, or propagate its termination reason as a fresh exception
/// on the joiner. Returns `Some(reason)` if that propagation itself kills
/// the joiner with no catcher of its own.
fn resolve_join(process: &mut Process, destination: crate::codec::RegisterOperand, termination: &Termination) -> Option<PanicReason> {
    match termination {
        Termination::Finished(Some(value)) => {
            let _ = process.write_operand(destination, value.clone());
            None
        }
        Termination::Finished(None) => None,
        Termination::Terminated(reason) => dispatch::unwind_on_panic(process, *reason),
    }
}

/// Resolve every process parked on `join`ing `target`: deliver the return
/// value (or propagate the termination reason as a fresh exception) and
/// requeue it, recursing into `finish` if that propagation itself kills
/// the joiner with no catcher of its own.
fn wake_joiners(kernel: &Arc<Kernel>, parked: &Arc<Mutex<VecDeque<Parked>>>, ready_tx: &Sender<Process>, live: &Arc<AtomicUsize>, target: Pid, termination: &Termination) {
    let woken: Vec<Parked> = {
        let mut guard = parked.lock();
        let mut woken = Vec::new();
        let mut remaining = VecDeque::with_capacity(guard.len());
        while let Some(entry) = guard.pop_front() {
            if matches!(entry.reason, SuspendReason::Join { target: t, .. } if t == target) {
                woken.push(entry);
            } else {
                remaining.push_back(entry);
            }
        }
        *guard = remaining;
        woken
    };

    for mut entry in woken {
        let SuspendReason::Join { destination, .. } = entry.reason else {
            unreachable!("filtered to Join entries above")
        };
        let propagated = resolve_join(&mut entry.process, destination, termination);
        match propagated {
            Some(reason) => {
                let pid = entry.process.pid();
                finish(kernel, parked, ready_tx, live, pid, Termination::Terminated(reason));
            }
            None => {
                entry.process.resume_after_join();
                ready_tx.send(entry.process).ok();
            }
        }
    }
}

/// Sweep parked processes for an elapsed deadline, injecting the matching
/// timeout exception into each and either requeueing or retiring it.
fn reap_timeouts(kernel: &Arc<Kernel>, parked: &Arc<Mutex<VecDeque<Parked>>>, ready_tx: &Sender<Process>, live: &Arc<AtomicUsize>) {
    let now = Instant::now();
    let expired: Vec<Parked> = {
        let mut guard = parked.lock();
        let mut expired = Vec::new();
        let mut remaining = VecDeque::with_capacity(guard.len());
        while let Some(entry) = guard.pop_front() {
            let deadline = match entry.reason {
                SuspendReason::Receive { deadline } | SuspendReason::Join { deadline, .. } | SuspendReason::IoWait { deadline, .. } => deadline,
            };
            match deadline {
                Some(deadline) if now >= deadline => expired.push(entry),
                _ => remaining.push_back(entry),
            }
        }
        *guard = remaining;
        expired
    };

    for mut entry in expired {
        let reason = match entry.reason {
            SuspendReason::Receive { .. } => PanicReason::ReceiveTimeout,
            SuspendReason::Join { .. } => PanicReason::JoinTimeout,
            SuspendReason::IoWait { .. } => PanicReason::IoWaitTimeout,
        };
        match dispatch::unwind_on_panic(&mut entry.process, reason) {
            Some(reason) => {
                let pid = entry.process.pid();
                finish(kernel, parked, ready_tx, live, pid, Termination::Terminated(reason));
            }
            None => {
                entry.process.set_state(ProcessState::Runnable);
                ready_tx.send(entry.process).ok();
            }
        }
    }
}
