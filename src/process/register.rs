//! Register sets: fixed-size indexed stores of value slots, carrying the
//! flag mask described by the data model.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{PanicReason, RuntimeError};
use crate::value::{Slot, Value};

/// Flags carried per register. Represented as a small bitmask rather than
/// pulling in a bitflags-style dependency for one closed, byte-sized set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegisterFlags(u8);

impl RegisterFlags {
    pub const NONE: Self = Self(0);
    pub const REFERENCE: Self = Self(1 << 0);
    pub const COPY_ON_WRITE: Self = Self(1 << 1);
    pub const KEEP_ACROSS_FRAME_POP: Self = Self(1 << 2);
    pub const BIND_FOR_CLOSURE: Self = Self(1 << 3);
    pub const BOUND_IN_CLOSURE: Self = Self(1 << 4);
    pub const PASSED_BY_MOVE: Self = Self(1 << 5);
    pub const MOVED: Self = Self(1 << 6);

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl std::ops::BitOr for RegisterFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// A fixed-size, independently growable register set: the representation
/// shared by Local, Static, Global, Arguments/Parameters, and
/// Closure-local register views.
#[derive(Debug, Default)]
pub struct RegisterSet {
    slots: Vec<Slot>,
    flags: Vec<RegisterFlags>,
}

impl RegisterSet {
    /// A register set pre-sized to `size` empty slots.
    pub fn new(size: usize) -> Self {
        Self {
            slots: (0..size).map(|_| Arc::new(Mutex::new(None))).collect(),
            flags: vec![RegisterFlags::NONE; size],
        }
    }

    /// A register set pre-populated with `values`, one slot per value, in
    /// order. Used to seed a closure's captured registers into a fresh
    /// frame's `closure_locals`.
    pub fn from_values(values: Vec<Value>) -> Self {
        let slots: Vec<Slot> = values.into_iter().map(|v| Arc::new(Mutex::new(Some(v)))).collect();
        let flags = vec![RegisterFlags::NONE; slots.len()];
        Self { slots, flags }
    }

    /// Number of addressable slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Enlarge to `size` slots if currently smaller; used by
    /// `allocate_registers`, which must be a no-op if already sized.
    pub fn ensure_size(&mut self, size: usize) {
        while self.slots.len() < size {
            self.slots.push(Arc::new(Mutex::new(None)));
            self.flags.push(RegisterFlags::NONE);
        }
    }

    fn check_index(&self, index: usize) -> Result<(), RuntimeError> {
        if index >= self.slots.len() {
            Err(PanicReason::NullRegisterAccess.into())
        } else {
            Ok(())
        }
    }

    /// The shared slot at `index`, for building a [`PointerValue`](crate::value::PointerValue).
    pub fn slot(&self, index: usize) -> Result<Slot, RuntimeError> {
        self.check_index(index)?;
        Ok(self.slots[index].clone())
    }

    /// Read the value at `index` without removing it.
    pub fn get(&self, index: usize) -> Result<Value, RuntimeError> {
        self.check_index(index)?;
        self.slots[index].lock().clone().ok_or_else(|| PanicReason::NullRegisterAccess.into())
    }

    /// Overwrite the value at `index`.
    pub fn set(&self, index: usize, value: Value) -> Result<(), RuntimeError> {
        self.check_index(index)?;
        *self.slots[index].lock() = Some(value);
        Ok(())
    }

    /// Move the value out of `index`, leaving the slot empty.
    pub fn take(&self, index: usize) -> Result<Value, RuntimeError> {
        self.check_index(index)?;
        self.slots[index].lock().take().ok_or_else(|| PanicReason::DeletedRegisterUse.into())
    }

    /// Clear the slot at `index`, invalidating any pointer that shares it.
    pub fn delete(&self, index: usize) -> Result<(), RuntimeError> {
        self.check_index(index)?;
        *self.slots[index].lock() = None;
        Ok(())
    }

    /// `true` if the slot is empty (`isnull`).
    pub fn is_null(&self, index: usize) -> Result<bool, RuntimeError> {
        self.check_index(index)?;
        Ok(self.slots[index].lock().is_none())
    }

    pub fn flags(&self, index: usize) -> Result<RegisterFlags, RuntimeError> {
        self.check_index(index)?;
        Ok(self.flags[index])
    }

    pub fn set_flags(&mut self, index: usize, flags: RegisterFlags) -> Result<(), RuntimeError> {
        self.check_index(index)?;
        self.flags[index] = flags;
        Ok(())
    }

    /// Swap the values (and flags) held at two indices.
    pub fn swap(&self, a: usize, b: usize) -> Result<(), RuntimeError> {
        self.check_index(a)?;
        self.check_index(b)?;
        if a == b {
            return Ok(());
        }
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        let (left, right) = self.slots.split_at(hi);
        std::mem::swap(&mut *left[lo].lock(), &mut *right[0].lock());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_leaves_slot_empty() {
        let rs = RegisterSet::new(2);
        rs.set(0, Value::Integer(1)).unwrap();
        assert_eq!(rs.take(0).unwrap(), Value::Integer(1));
        assert!(rs.is_null(0).unwrap());
    }

    #[test]
    fn ensure_size_is_a_no_op_when_already_big_enough() {
        let mut rs = RegisterSet::new(4);
        rs.set(3, Value::Integer(9)).unwrap();
        rs.ensure_size(2);
        assert_eq!(rs.len(), 4);
        assert_eq!(rs.get(3).unwrap(), Value::Integer(9));
    }

    #[test]
    fn swap_exchanges_values() {
        let rs = RegisterSet::new(2);
        rs.set(0, Value::Integer(1)).unwrap();
        rs.set(1, Value::Integer(2)).unwrap();
        rs.swap(0, 1).unwrap();
        assert_eq!(rs.get(0).unwrap(), Value::Integer(2));
        assert_eq!(rs.get(1).unwrap(), Value::Integer(1));
    }
}
