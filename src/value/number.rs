//! Arithmetic and comparison capability for `Integer` and `Float` values.

use crate::error::{PanicReason, RuntimeError};
use crate::value::Value;
use std::cmp::Ordering;

/// Capability implemented by the numeric value variants.
///
/// Mirrors the teacher's split of arithmetic out of the dispatch loop into
/// small, independently testable functions (`alu_overflow`/`alu_error` in
/// the teacher's instruction executor), generalized here to a trait so
/// `Integer` and `Float` share one call surface.
pub trait Number: Sized {
    fn checked_add(self, other: Self) -> Result<Self, RuntimeError>;
    fn checked_sub(self, other: Self) -> Result<Self, RuntimeError>;
    fn checked_mul(self, other: Self) -> Result<Self, RuntimeError>;
    fn checked_div(self, other: Self) -> Result<Self, RuntimeError>;
}

impl Number for i64 {
    fn checked_add(self, other: Self) -> Result<Self, RuntimeError> {
        self.checked_add(other).ok_or_else(|| PanicReason::NumericOutOfRange.into())
    }

    fn checked_sub(self, other: Self) -> Result<Self, RuntimeError> {
        self.checked_sub(other).ok_or_else(|| PanicReason::NumericOutOfRange.into())
    }

    fn checked_mul(self, other: Self) -> Result<Self, RuntimeError> {
        self.checked_mul(other).ok_or_else(|| PanicReason::NumericOutOfRange.into())
    }

    fn checked_div(self, other: Self) -> Result<Self, RuntimeError> {
        if other == 0 {
            return Err(PanicReason::DivideByZero.into());
        }
        self.checked_div(other).ok_or_else(|| PanicReason::NumericOutOfRange.into())
    }
}

impl Number for f64 {
    fn checked_add(self, other: Self) -> Result<Self, RuntimeError> {
        Ok(self + other)
    }

    fn checked_sub(self, other: Self) -> Result<Self, RuntimeError> {
        Ok(self - other)
    }

    fn checked_mul(self, other: Self) -> Result<Self, RuntimeError> {
        Ok(self * other)
    }

    fn checked_div(self, other: Self) -> Result<Self, RuntimeError> {
        if other == 0.0 {
            return Err(PanicReason::DivideByZero.into());
        }
        Ok(self / other)
    }
}

impl Value {
    /// Numeric ordering between two `Integer`/`Float` values, converting
    /// the smaller widths as needed. Returns a type mismatch for any other
    /// pairing.
    pub fn numeric_compare(&self, other: &Value) -> Result<Ordering, RuntimeError> {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => Ok(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b).ok_or_else(|| PanicReason::InvalidFloatParse.into()),
            (Value::Integer(a), Value::Float(b)) => (*a as f64)
                .partial_cmp(b)
                .ok_or_else(|| PanicReason::InvalidFloatParse.into()),
            (Value::Float(a), Value::Integer(b)) => a
                .partial_cmp(&(*b as f64))
                .ok_or_else(|| PanicReason::InvalidFloatParse.into()),
            _ => Err(PanicReason::TypeMismatch.into()),
        }
    }

    /// Convert an `Integer` to a `Float` value, or pass a `Float` through.
    pub fn to_float(&self) -> Result<f64, RuntimeError> {
        match self {
            Value::Integer(i) => Ok(*i as f64),
            Value::Float(f) => Ok(*f),
            _ => Err(PanicReason::TypeMismatch.into()),
        }
    }

    /// Convert a `Float` to an `Integer` value (truncating), or pass an
    /// `Integer` through.
    pub fn to_integer(&self) -> Result<i64, RuntimeError> {
        match self {
            Value::Integer(i) => Ok(*i),
            Value::Float(f) => {
                if f.is_finite() && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                    Ok(*f as i64)
                } else {
                    Err(PanicReason::NumericOutOfRange.into())
                }
            }
            _ => Err(PanicReason::TypeMismatch.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_division_by_zero_is_recoverable() {
        let err = 10i64.checked_div(0).unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn integer_overflow_is_recoverable() {
        let err = i64::MAX.checked_add(1).unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn numeric_compare_mixes_integer_and_float() {
        let a = Value::Integer(3);
        let b = Value::Float(3.5);
        assert_eq!(a.numeric_compare(&b).unwrap(), Ordering::Less);
    }
}
