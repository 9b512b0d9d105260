//! `Text`: a Unicode-code-point indexed string value.
//!
//! Backed by Rust's native UTF-8 `String`; the code-point indexing contract
//! the spec requires (not byte indexing) is provided by walking `chars()`
//! rather than slicing bytes directly, matching the indexing semantics of
//! the original `viua::types::Text` wrapper over `std::u32string`.

use crate::error::{PanicReason, RuntimeError};

/// A Unicode string value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextValue(String);

impl TextValue {
    /// Construct from an owned `String`. UTF-8 validity is guaranteed by
    /// the `String` type itself; callers decoding raw bytes should go
    /// through [`TextValue::from_utf8`].
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Decode a UTF-8 byte buffer, rejecting invalid continuation
    /// sequences (1-to-4-byte sequences per the codec's `Text` primitive).
    pub fn from_utf8(bytes: &[u8]) -> Result<Self, RuntimeError> {
        std::str::from_utf8(bytes)
            .map(|s| Self(s.to_owned()))
            .map_err(|_| PanicReason::TypeMismatch.into())
    }

    /// Number of Unicode code points (not bytes).
    pub fn size(&self) -> usize {
        self.0.chars().count()
    }

    /// Character at a code-point index.
    pub fn at(&self, index: usize) -> Result<char, RuntimeError> {
        self.0.chars().nth(index).ok_or_else(|| PanicReason::NumericOutOfRange.into())
    }

    /// Substring between two code-point indices, `[start, end)`.
    pub fn sub(&self, start: usize, end: usize) -> Result<TextValue, RuntimeError> {
        if start > end {
            return Err(PanicReason::NumericOutOfRange.into());
        }
        let chars: Vec<char> = self.0.chars().collect();
        if end > chars.len() {
            return Err(PanicReason::NumericOutOfRange.into());
        }
        Ok(TextValue(chars[start..end].iter().collect()))
    }

    /// Concatenation, producing a new `Text`.
    pub fn concat(&self, other: &TextValue) -> TextValue {
        let mut s = self.0.clone();
        s.push_str(&other.0);
        TextValue(s)
    }

    /// Length, in code points, of the shared prefix between `self` and
    /// `other`.
    pub fn common_prefix_len(&self, other: &TextValue) -> usize {
        self.0.chars().zip(other.0.chars()).take_while(|(a, b)| a == b).count()
    }

    /// Length, in code points, of the shared suffix between `self` and
    /// `other`.
    pub fn common_suffix_len(&self, other: &TextValue) -> usize {
        self.0
            .chars()
            .rev()
            .zip(other.0.chars().rev())
            .take_while(|(a, b)| a == b)
            .count()
    }

    /// Borrow the underlying string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TextValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_counts_code_points_not_bytes() {
        let t = TextValue::new("héllo");
        assert_eq!(t.size(), 5);
        assert!(t.as_str().len() > 5);
    }

    #[test]
    fn sub_zero_to_size_is_identity() {
        let t = TextValue::new("hello");
        assert_eq!(t.sub(0, t.size()).unwrap(), t);
    }

    #[test]
    fn concat_prefix_roundtrips() {
        let s = TextValue::new("hello");
        let t = TextValue::new(" world");
        let st = s.concat(&t);
        assert_eq!(st.sub(0, s.size()).unwrap(), s);
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let bytes = [0xff, 0xfe];
        assert!(TextValue::from_utf8(&bytes).is_err());
    }
}
