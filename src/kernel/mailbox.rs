//! Per-process mailboxes.
//!
//! A process's dispatch loop only ever sees one message at a time (the
//! single staging slot on [`crate::process::Process`]); the FIFO ordering
//! `send`/`receive` promise per (sender, receiver) pair is kept by the
//! Kernel-owned queue here, one per live PID, fed into the staging slot
//! by [`Mailboxes::deliver_pending`] before each quantum.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::message::Message;
use crate::pid::Pid;
use crate::process::Process;

/// The Kernel's registry of per-process message queues.
#[derive(Debug, Default)]
pub struct Mailboxes {
    queues: Mutex<HashMap<Pid, VecDeque<Message>>>,
}

impl Mailboxes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an empty queue for a freshly spawned process.
    pub fn register(&self, pid: Pid) {
        self.queues.lock().entry(pid).or_default();
    }

    /// Drop `pid`'s queue once it has terminated; any still-queued messages
    /// are discarded, matching "no value is shared by reference between
    /// processes" — nothing else can observe them once the owner is gone.
    pub fn deregister(&self, pid: Pid) {
        self.queues.lock().remove(&pid);
    }

    /// `true` if `pid` has a live mailbox (used to distinguish "unknown
    /// pid" from "known but empty" on `send`).
    pub fn is_registered(&self, pid: Pid) -> bool {
        self.queues.lock().contains_key(&pid)
    }

    /// Append `message` to `target`'s queue. A no-op if `target` has no
    /// registered mailbox; the caller is responsible for raising
    /// `Messaging_unknown_pid` in that case.
    pub fn enqueue(&self, target: Pid, message: Message) {
        if let Some(queue) = self.queues.lock().get_mut(&target) {
            queue.push_back(message);
        }
    }

    pub fn has_pending(&self, pid: Pid) -> bool {
        self.queues.lock().get(&pid).is_some_and(|q| !q.is_empty())
    }

    /// If `process` has no message already staged and its queue is
    /// non-empty, move the oldest queued message into its staging slot,
    /// waking it if it was parked on `receive`. Returns `true` if a
    /// message was delivered.
    pub fn deliver_pending(&self, process: &mut Process) -> bool {
        if process.has_pending_message() {
            return false;
        }
        let Some(message) = self.queues.lock().get_mut(&process.pid()).and_then(VecDeque::pop_front) else {
            return false;
        };
        process.deliver(message);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn enqueue_on_unknown_pid_is_a_silent_no_op() {
        let mailboxes = Mailboxes::new();
        let target = Pid::from_parts(1, 1);
        mailboxes.enqueue(target, Message::new(Pid::from_parts(1, 2), Value::Integer(1)));
        assert!(!mailboxes.has_pending(target));
    }

    #[test]
    fn registered_queue_preserves_fifo_order() {
        let mailboxes = Mailboxes::new();
        let sender = Pid::from_parts(1, 1);
        let target = Pid::from_parts(1, 2);
        mailboxes.register(target);
        mailboxes.enqueue(target, Message::new(sender, Value::Integer(1)));
        mailboxes.enqueue(target, Message::new(sender, Value::Integer(2)));
        assert!(mailboxes.has_pending(target));
    }
}
