//! `Pointer`: a non-owning alias into a register or struct-field slot,
//! bound to the process that created it.
//!
//! Rather than the original engine's explicit back-pointer list walked on
//! target destruction, the slot itself is a shared `Arc<Mutex<Option<Value>>>`
//! cell: deleting the owner's copy clears the cell's content, which every
//! pointer sharing that `Arc` observes as expired without any bookkeeping.

use crate::error::{PanicReason, RuntimeError};
use crate::pid::Pid;
use crate::value::{Slot, Value};

/// A pointer into a live (or expired) value slot, scoped to the process
/// that created it.
#[derive(Debug, Clone)]
pub struct PointerValue {
    origin: Pid,
    target: Slot,
}

impl PointerValue {
    /// Wrap a slot as a pointer owned by `origin`.
    pub fn new(origin: Pid, target: Slot) -> Self {
        Self { origin, target }
    }

    /// The process that created this pointer.
    pub const fn origin(&self) -> Pid {
        self.origin
    }

    /// `true` if the pointed-to slot has been cleared.
    pub fn expired(&self) -> bool {
        self.target.lock().is_none()
    }

    /// Clear the pointed-to slot, expiring every pointer that shares it.
    pub fn invalidate(&self) {
        *self.target.lock() = None;
    }

    /// Dereference, authenticated against the calling process: only the
    /// process of origin may dereference one of its own pointers.
    pub fn to(&self, caller: Pid) -> Result<Value, RuntimeError> {
        if caller != self.origin {
            return Err(PanicReason::PointerCrossProcessLeak.into());
        }
        self.target.lock().clone().ok_or_else(|| PanicReason::PointerToDeadValue.into())
    }

    /// Overwrite the pointed-to slot, authenticated the same way as [`to`](Self::to).
    pub fn store(&self, caller: Pid, value: Value) -> Result<(), RuntimeError> {
        if caller != self.origin {
            return Err(PanicReason::PointerCrossProcessLeak.into());
        }
        *self.target.lock() = Some(value);
        Ok(())
    }
}

impl PartialEq for PointerValue {
    fn eq(&self, other: &Self) -> bool {
        self.origin == other.origin && std::sync::Arc::ptr_eq(&self.target, &other.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn invalidate_is_observed_through_shared_slot() {
        let pid = Pid::from_parts(0, 1);
        let slot: Slot = Arc::new(Mutex::new(Some(Value::Integer(7))));
        let ptr = PointerValue::new(pid, slot.clone());
        assert!(!ptr.expired());
        *slot.lock() = None;
        assert!(ptr.expired());
        assert!(ptr.to(pid).is_err());
    }

    #[test]
    fn cross_process_dereference_is_rejected() {
        let owner = Pid::from_parts(0, 1);
        let other = Pid::from_parts(0, 2);
        let slot: Slot = Arc::new(Mutex::new(Some(Value::Integer(7))));
        let ptr = PointerValue::new(owner, slot);
        assert!(ptr.to(other).is_err());
        assert!(ptr.to(owner).is_ok());
    }
}
