//! A single value enqueued to a target PID's mailbox.

use crate::pid::Pid;
use crate::value::Value;

/// One mailbox entry: the value plus its sender, preserved so a future
/// instruction set could expose `sender()` without changing the wire shape
/// of a message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    sender: Pid,
    value: Value,
}

impl Message {
    /// Wrap `value`, addressed from `sender`.
    pub fn new(sender: Pid, value: Value) -> Self {
        Self { sender, value }
    }

    pub const fn sender(&self) -> Pid {
        self.sender
    }

    /// Consume the message, yielding its value (messages are moved, never
    /// shared by reference between processes).
    pub fn into_value(self) -> Value {
        self.value
    }
}
