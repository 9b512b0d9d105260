//! `Reference`: a reference-counted alias with shared-ownership semantics.
//!
//! Implemented directly as `Arc<Mutex<Value>>`: cloning a `Reference`
//! bumps the count (the register holding it always owns one count, per the
//! data model's invariant); the target is freed automatically when the
//! last `Arc` is dropped. Because `Reference`s can only be created by an
//! explicit instruction, no cycle of owned values can produce one
//! implicitly, which is what keeps this representation free of hidden
//! reference cycles.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::value::Value;

/// A shared, reference-counted value handle.
#[derive(Debug, Clone)]
pub struct ReferenceValue(Arc<Mutex<Value>>);

impl ReferenceValue {
    /// Wrap `value` in a fresh reference cell with one owner.
    pub fn new(value: Value) -> Self {
        Self(Arc::new(Mutex::new(value)))
    }

    /// Number of registers/slots currently sharing this reference.
    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Read the current value.
    pub fn get(&self) -> Value {
        self.0.lock().clone()
    }

    /// Overwrite the referenced value, visible to every holder.
    pub fn set(&self, value: Value) {
        *self.0.lock() = value;
    }
}

impl PartialEq for ReferenceValue {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || *self.0.lock() == *other.0.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_shares_storage_and_bumps_count() {
        let r = ReferenceValue::new(Value::Integer(1));
        let r2 = r.clone();
        assert_eq!(r.strong_count(), 2);
        r2.set(Value::Integer(2));
        assert_eq!(r.get(), Value::Integer(2));
    }

    #[test]
    fn drop_last_reference_frees_storage() {
        let r = ReferenceValue::new(Value::Integer(1));
        assert_eq!(r.strong_count(), 1);
    }
}
