//! `Exception`: a raised, in-flight error value carrying a tag, optional
//! description, optional payload, and the trail of throw points it has
//! passed through while unwinding.

use crate::error::PanicReason;
use crate::value::Value;

/// One frame the exception has unwound through, recorded in throw-to-catch
/// order for diagnostics (`backtrace` in the original runtime).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrowPoint {
    /// Name of the function the exception was passing through.
    pub function: String,
    /// Instruction offset within that function, if known.
    pub instruction: Option<usize>,
}

impl ThrowPoint {
    /// Record a throw point at `function`/`instruction`.
    pub fn new(function: impl Into<String>, instruction: Option<usize>) -> Self {
        Self {
            function: function.into(),
            instruction,
        }
    }
}

/// An in-flight exception value, raised either by a `throw` instruction or
/// synthesized from a [`PanicReason`] by the dispatch loop.
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptionValue {
    tag: String,
    description: Option<String>,
    payload: Option<Box<Value>>,
    throw_points: Vec<ThrowPoint>,
}

impl ExceptionValue {
    /// Construct a bare exception with just a tag.
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            description: None,
            payload: None,
            throw_points: Vec::new(),
        }
    }

    /// Build an exception from a runtime [`PanicReason`], using its stable
    /// tag and `Display` message as the description.
    pub fn from_panic(reason: PanicReason) -> Self {
        Self {
            tag: reason.tag().to_owned(),
            description: Some(reason.to_string()),
            payload: None,
            throw_points: Vec::new(),
        }
    }

    /// Attach a human-readable description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Attach an arbitrary payload value.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(Box::new(payload));
        self
    }

    /// The exception's tag, used by `catch` blocks to match.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// The optional human-readable description.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// The optional payload value.
    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_deref()
    }

    /// Record one more throw point as the exception unwinds through a frame.
    pub fn push_throw_point(&mut self, point: ThrowPoint) {
        self.throw_points.push(point);
    }

    /// The recorded unwind trail, oldest first.
    pub fn throw_points(&self) -> &[ThrowPoint] {
        &self.throw_points
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_panic_uses_stable_tag() {
        let e = ExceptionValue::from_panic(PanicReason::DivideByZero);
        assert_eq!(e.tag(), "Arithmetic_divide_by_zero");
        assert!(e.description().is_some());
    }

    #[test]
    fn throw_points_accumulate_in_order() {
        let mut e = ExceptionValue::new("Custom_tag");
        e.push_throw_point(ThrowPoint::new("outer", Some(3)));
        e.push_throw_point(ThrowPoint::new("inner", Some(7)));
        assert_eq!(e.throw_points()[0].function, "outer");
        assert_eq!(e.throw_points()[1].function, "inner");
    }
}
