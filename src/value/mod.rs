//! The closed value system: every runtime value is one variant of [`Value`].
//!
//! Mirrors the teacher's `types/` split (one file per representation, a
//! capability trait where several representations share behaviour) rather
//! than a deep class hierarchy: `Value` is a flat, closed enum, and
//! type-specific operations live on the wrapped types (`TextValue::sub`,
//! `BitsValue::rol`, ...) or on small capability traits (`Number`).

pub mod bits;
pub mod bytestring;
pub mod closure;
pub mod exception;
pub mod io;
pub mod number;
pub mod pointer;
pub mod prototype;
pub mod reference;
pub mod struct_;
pub mod text;
pub mod vector;

use std::sync::Arc;

use parking_lot::Mutex;

pub use bits::BitsValue;
pub use bytestring::ByteStringValue;
pub use closure::{CaptureMode, ClosureValue};
pub use exception::{ExceptionValue, ThrowPoint};
pub use io::{IoPortValue, IoRequestValue};
pub use number::Number;
pub use pointer::PointerValue;
pub use prototype::PrototypeValue;
pub use reference::ReferenceValue;
pub use struct_::StructValue;
pub use text::TextValue;
pub use vector::VectorValue;

use crate::pid::Pid;

/// An interned, comparable name: atoms, struct keys, prototype/method
/// names. Backed by `Arc<str>` so cloning an atom is a refcount bump rather
/// than a string copy.
pub type Atom = Arc<str>;

/// A shared, nullable storage cell. Registers, struct fields, and vector
/// elements all ultimately bottom out in one of these; a [`PointerValue`]
/// is simply a clone of the `Arc`, which is what lets pointer invalidation
/// be "clear the cell" rather than a back-pointer walk.
pub type Slot = Arc<Mutex<Option<Value>>>;

/// The polymorphic unit of computation. Every variant carries a stable type
/// tag (via [`Value::type_name`]) and supports `str`/`repr`/`boolean`/`copy`;
/// numeric, textual, and ordering capabilities are implemented per-variant
/// on the wrapped representation types.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Atom(Atom),
    Text(TextValue),
    String(ByteStringValue),
    Bits(BitsValue),
    Vector(VectorValue),
    Struct(StructValue),
    Closure(ClosureValue),
    Function(Atom),
    Pointer(PointerValue),
    Reference(ReferenceValue),
    Pid(Pid),
    IoRequest(IoRequestValue),
    IoPort(IoPortValue),
    Exception(ExceptionValue),
    Prototype(PrototypeValue),
}

impl Value {
    /// The stable, printable type tag (`type()` in the instruction set).
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Integer(_) => "Integer",
            Self::Float(_) => "Float",
            Self::Boolean(_) => "Boolean",
            Self::Atom(_) => "Atom",
            Self::Text(_) => "Text",
            Self::String(_) => "String",
            Self::Bits(_) => "Bits",
            Self::Vector(_) => "Vector",
            Self::Struct(_) => "Struct",
            Self::Closure(_) => "Closure",
            Self::Function(_) => "Function",
            Self::Pointer(_) => "Pointer",
            Self::Reference(_) => "Reference",
            Self::Pid(_) => "Pid",
            Self::IoRequest(_) => "IO_request",
            Self::IoPort(_) => "IO_port",
            Self::Exception(_) => "Exception",
            Self::Prototype(_) => "Prototype",
        }
    }

    /// The value's truth value (`boolean()`): the only values that are
    /// `false` are the boolean `false` and an empty `Text`/`String`/
    /// `Vector`; everything else is truthy, including `0` and `0.0`.
    pub fn boolean(&self) -> bool {
        match self {
            Self::Boolean(b) => *b,
            Self::Text(t) => t.size() != 0,
            Self::String(s) => !s.is_empty(),
            Self::Vector(v) => !v.is_empty(),
            _ => true,
        }
    }

    /// Human-facing rendering (`str()`): for composite values, the same as
    /// [`Value::repr`] minus the outer type-tag decoration.
    pub fn str(&self) -> String {
        match self {
            Self::Integer(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Boolean(b) => b.to_string(),
            Self::Atom(a) => a.to_string(),
            Self::Text(t) => t.to_string(),
            Self::String(s) => String::from_utf8_lossy(s.as_bytes()).into_owned(),
            Self::Bits(b) => b.to_bit_string(),
            Self::Vector(v) => format!("[{}]", v.iter().map(Value::repr).collect::<Vec<_>>().join(", ")),
            Self::Struct(_) => "<struct>".to_owned(),
            Self::Closure(c) => format!("<closure {}>", c.function()),
            Self::Function(f) => f.to_string(),
            Self::Pointer(_) => "<pointer>".to_owned(),
            Self::Reference(r) => r.get().str(),
            Self::Pid(p) => p.to_string(),
            Self::IoRequest(_) => "<io_request>".to_owned(),
            Self::IoPort(p) => format!("<io_port {}>", p.descriptor()),
            Self::Exception(e) => e.tag().to_owned(),
            Self::Prototype(p) => p.name().to_string(),
        }
    }

    /// Debug/diagnostic rendering (`repr()`): like [`Value::str`] but with
    /// the type tag and, for `Text`, quoting.
    pub fn repr(&self) -> String {
        match self {
            Self::Text(t) => format!("{:?}", t.as_str()),
            other => other.str(),
        }
    }

    /// The deep-copy operation (`copy()`). `Struct` and `Vector` rebuild
    /// fresh storage for their elements; `Reference` deliberately stays
    /// shallow (a refcount bump), matching its shared-ownership contract.
    pub fn copy(&self) -> Value {
        match self {
            Self::Struct(s) => Value::Struct(s.deep_copy()),
            Self::Vector(v) => Value::Vector(VectorValue::from_vec(v.iter().map(Value::copy).collect())),
            Self::Reference(r) => Value::Reference(r.clone()),
            other => other.clone_shallow(),
        }
    }

    /// Plain structural clone for variants with no nested slot storage.
    fn clone_shallow(&self) -> Value {
        match self {
            Self::Integer(i) => Self::Integer(*i),
            Self::Float(f) => Self::Float(*f),
            Self::Boolean(b) => Self::Boolean(*b),
            Self::Atom(a) => Self::Atom(a.clone()),
            Self::Text(t) => Self::Text(t.clone()),
            Self::String(s) => Self::String(s.clone()),
            Self::Bits(b) => Self::Bits(*b),
            Self::Closure(c) => Self::Closure(c.clone()),
            Self::Function(f) => Self::Function(f.clone()),
            Self::Pointer(p) => Self::Pointer(p.clone()),
            Self::Pid(p) => Self::Pid(*p),
            Self::IoRequest(r) => Self::IoRequest(r.clone()),
            Self::IoPort(p) => Self::IoPort(*p),
            Self::Exception(e) => Self::Exception(e.clone()),
            Self::Prototype(p) => Self::Prototype(p.clone()),
            Self::Struct(_) | Self::Vector(_) | Self::Reference(_) => {
                unreachable!("handled by Value::copy before reaching clone_shallow")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boolean_treats_empty_text_as_false() {
        assert!(!Value::Text(TextValue::new("")).boolean());
        assert!(Value::Text(TextValue::new("x")).boolean());
    }

    #[test]
    fn copy_of_struct_is_independent_storage() {
        let mut s = StructValue::new();
        s.insert(Arc::from("x"), Value::Integer(1));
        let original = Value::Struct(s);
        let copy = original.copy();
        let mut dup = match copy {
            Value::Struct(dup) => dup,
            _ => panic!("expected struct value"),
        };
        dup.insert(Arc::from("x"), Value::Integer(99));
        match &original {
            Value::Struct(orig) => assert_eq!(orig.get(&Arc::from("x")).unwrap(), Value::Integer(1)),
            _ => panic!("expected struct value"),
        }
    }

    #[test]
    fn copy_of_reference_shares_storage() {
        let original = Value::Reference(ReferenceValue::new(Value::Integer(1)));
        let copy = original.copy();
        let a = match &original {
            Value::Reference(a) => a.clone(),
            _ => panic!("expected reference value"),
        };
        let b = match &copy {
            Value::Reference(b) => b.clone(),
            _ => panic!("expected reference value"),
        };
        b.set(Value::Integer(2));
        assert_eq!(a.get(), Value::Integer(2));
    }

    #[test]
    fn type_name_is_stable() {
        assert_eq!(Value::Integer(1).type_name(), "Integer");
        assert_eq!(Value::Pid(Pid::from_parts(0, 1)).type_name(), "Pid");
    }
}
