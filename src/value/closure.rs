//! `Closure`: a `Function` value bundled with a captured register set.

use crate::value::{Atom, Value};

/// How a captured register was bound at `capture`/`capturecopy`/`capturemove`
/// time. Recorded only for diagnostics; by the time a `ClosureValue` exists
/// the capture has already happened and the captured slot holds its final
/// value (by-reference captures hold a `Value::Reference`, by-move/by-copy
/// hold an owned value).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureMode {
    /// Captured as a `Value::Reference`, sharing storage with the source.
    ByReference,
    /// Captured as an independent deep copy.
    ByCopy,
    /// Captured by moving the source register's value; the source
    /// register is left empty.
    ByMove,
}

/// A function value together with its captured registers, addressable by
/// name inside the closure body as the closure-local register set.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosureValue {
    function: Atom,
    captured: Vec<Value>,
}

impl ClosureValue {
    /// Bundle `function` with its already-captured register values.
    pub fn new(function: Atom, captured: Vec<Value>) -> Self {
        Self { function, captured }
    }

    /// Name of the function this closure invokes.
    pub fn function(&self) -> &Atom {
        &self.function
    }

    /// The closure-local register set view.
    pub fn captured(&self) -> &[Value] {
        &self.captured
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn captured_registers_are_visible_by_index() {
        let closure = ClosureValue::new(Arc::from("lambda"), vec![Value::Integer(42)]);
        assert_eq!(closure.captured()[0], Value::Integer(42));
    }
}
