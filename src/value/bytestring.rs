//! `String`: a byte-indexed buffer, distinct from the Unicode-indexed
//! [`TextValue`](crate::value::text::TextValue). Used for raw/binary data
//! and interop with I/O interactions, matching the codec's null-terminated
//! `String` primitive.

use crate::error::{PanicReason, RuntimeError};

/// A raw byte buffer value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ByteStringValue(Vec<u8>);

impl ByteStringValue {
    /// Construct from an owned byte buffer.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Number of bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `true` if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Byte at `index`.
    pub fn at(&self, index: usize) -> Result<u8, RuntimeError> {
        self.0.get(index).copied().ok_or_else(|| PanicReason::NumericOutOfRange.into())
    }

    /// Byte slice `[start, end)`.
    pub fn sub(&self, start: usize, end: usize) -> Result<ByteStringValue, RuntimeError> {
        if start > end || end > self.0.len() {
            return Err(PanicReason::NumericOutOfRange.into());
        }
        Ok(ByteStringValue(self.0[start..end].to_vec()))
    }

    /// Concatenation, producing a new buffer.
    pub fn concat(&self, other: &ByteStringValue) -> ByteStringValue {
        let mut bytes = self.0.clone();
        bytes.extend_from_slice(&other.0);
        ByteStringValue(bytes)
    }

    /// Borrow the underlying bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_out_of_bounds_errors() {
        let s = ByteStringValue::new(vec![1, 2, 3]);
        assert!(s.sub(0, 10).is_err());
    }

    #[test]
    fn concat_preserves_byte_order() {
        let a = ByteStringValue::new(vec![1, 2]);
        let b = ByteStringValue::new(vec![3, 4]);
        assert_eq!(a.concat(&b).as_bytes(), &[1, 2, 3, 4]);
    }
}
