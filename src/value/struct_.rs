//! `Struct`: an atom-keyed map of values whose fields can be addressed by
//! pointer (`at` returns a [`PointerValue`] into the live field slot).

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{PanicReason, RuntimeError};
use crate::pid::Pid;
use crate::value::pointer::PointerValue;
use crate::value::vector::VectorValue;
use crate::value::{Atom, Slot, Value};

/// A dynamic, atom-keyed record. Field order is insertion order (small
/// structs are the common case; linear lookup keeps the implementation
/// simple and allocation-free for `keys()`).
#[derive(Debug, Clone)]
pub struct StructValue {
    fields: Vec<(Atom, Slot)>,
}

impl StructValue {
    /// An empty struct.
    pub const fn new() -> Self {
        Self { fields: Vec::new() }
    }

    fn position(&self, key: &Atom) -> Option<usize> {
        self.fields.iter().position(|(k, _)| k == key)
    }

    /// Insert or overwrite the field named `key`.
    pub fn insert(&mut self, key: Atom, value: Value) {
        match self.position(&key) {
            Some(index) => *self.fields[index].1.lock() = Some(value),
            None => self.fields.push((key, Arc::new(Mutex::new(Some(value))))),
        }
    }

    /// Remove the field named `key`, returning its value if present.
    pub fn remove(&mut self, key: &Atom) -> Option<Value> {
        let index = self.position(key)?;
        let (_, slot) = self.fields.remove(index);
        slot.lock().take()
    }

    /// Return a pointer into the live slot for `key`, creating an empty
    /// slot on first access so that `at` followed by a store always has
    /// somewhere to write.
    pub fn at(&mut self, key: Atom, origin: Pid) -> PointerValue {
        let index = match self.position(&key) {
            Some(index) => index,
            None => {
                self.fields.push((key, Arc::new(Mutex::new(None))));
                self.fields.len() - 1
            }
        };
        PointerValue::new(origin, self.fields[index].1.clone())
    }

    /// Read-only lookup without materialising a pointer.
    pub fn get(&self, key: &Atom) -> Result<Value, RuntimeError> {
        let index = self.position(key).ok_or(PanicReason::NullRegisterAccess)?;
        self.fields[index]
            .1
            .lock()
            .clone()
            .ok_or_else(|| PanicReason::NullRegisterAccess.into())
    }

    /// The field names, in insertion order, as a `Vector` of `Atom`s.
    pub fn keys(&self) -> VectorValue {
        VectorValue::from_vec(self.fields.iter().map(|(k, _)| Value::Atom(k.clone())).collect())
    }

    /// Deep-copy every field into a fresh set of slots.
    pub fn deep_copy(&self) -> Self {
        let fields = self
            .fields
            .iter()
            .map(|(k, slot)| {
                let value = slot.lock().clone();
                (k.clone(), Arc::new(Mutex::new(value.map(|v| v.copy()))))
            })
            .collect();
        Self { fields }
    }
}

impl Default for StructValue {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for StructValue {
    fn eq(&self, other: &Self) -> bool {
        if self.fields.len() != other.fields.len() {
            return false;
        }
        self.fields.iter().all(|(k, slot)| {
            other
                .position(k)
                .map(|i| *slot.lock() == *other.fields[i].1.lock())
                .unwrap_or(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atom(s: &str) -> Atom {
        Arc::from(s)
    }

    #[test]
    fn insert_and_get_roundtrip() {
        let mut s = StructValue::new();
        s.insert(atom("x"), Value::Integer(1));
        assert_eq!(s.get(&atom("x")).unwrap(), Value::Integer(1));
    }

    #[test]
    fn at_returns_live_pointer() {
        let mut s = StructValue::new();
        s.insert(atom("x"), Value::Integer(1));
        let pid = Pid::from_parts(1, 1);
        let ptr = s.at(atom("x"), pid);
        assert!(!ptr.expired());
        s.remove(&atom("x"));
        assert!(ptr.expired());
    }

    #[test]
    fn keys_preserves_insertion_order() {
        let mut s = StructValue::new();
        s.insert(atom("a"), Value::Integer(1));
        s.insert(atom("b"), Value::Integer(2));
        let keys = s.keys();
        assert_eq!(*keys.at(0).unwrap(), Value::Atom(atom("a")));
        assert_eq!(*keys.at(1).unwrap(), Value::Atom(atom("b")));
    }
}
