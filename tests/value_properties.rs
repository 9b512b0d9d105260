//! Property-based coverage over the closed value system's per-variant
//! representation types, using only their public API.

use quickcheck_macros::quickcheck;
use viua_rt::value::{BitsValue, TextValue, Value, VectorValue};

fn bits_of_width(seed: u64, width: usize) -> BitsValue {
    let mut bits = BitsValue::new(width).unwrap();
    for i in 0..width {
        bits.set(i, (seed >> (i % 64)) & 1 == 1).unwrap();
    }
    bits
}

#[quickcheck]
fn rotate_left_then_right_is_identity(seed: u64, amount: u8) -> bool {
    let bits = bits_of_width(seed, 64);
    bits.rol(amount as usize).ror(amount as usize) == bits
}

#[quickcheck]
fn double_bitwise_not_is_identity(seed: u64) -> bool {
    let bits = bits_of_width(seed, 64);
    bits.bitnot().bitnot() == bits
}

#[quickcheck]
fn wrapping_add_is_commutative(a: u64, b: u64) -> bool {
    let a = bits_of_width(a, 64);
    let b = bits_of_width(b, 64);
    a.wrapping_add(&b).unwrap() == b.wrapping_add(&a).unwrap()
}

#[quickcheck]
fn shift_left_by_width_clears_every_bit(seed: u64) -> bool {
    let bits = bits_of_width(seed, 64);
    bits.shl(64).to_bit_string().chars().all(|c| c == '0')
}

#[quickcheck]
fn text_sub_over_full_range_is_identity(s: String) -> bool {
    let text = TextValue::new(s);
    text.sub(0, text.size()).unwrap() == text
}

#[quickcheck]
fn text_concat_then_common_prefix_covers_the_first_operand(a: String, b: String) -> bool {
    if b.starts_with(&a) {
        return true; // common_prefix_len would overcount; skip the degenerate case
    }
    let left = TextValue::new(a.clone());
    let right = TextValue::new(b);
    let joined = left.concat(&right);
    joined.common_prefix_len(&left) >= left.size()
}

#[quickcheck]
fn vector_push_then_pop_last_round_trips(values: Vec<i64>) -> bool {
    let mut vector = VectorValue::new();
    for v in &values {
        vector.push(Value::Integer(*v));
    }
    for expected in values.iter().rev() {
        match vector.pop(-1) {
            Ok(Value::Integer(got)) => {
                if got != *expected {
                    return false;
                }
            }
            _ => return false,
        }
    }
    vector.is_empty()
}

#[quickcheck]
fn vector_negative_index_matches_positive_from_end(values: Vec<i64>) -> bool {
    if values.is_empty() {
        return true;
    }
    let mut vector = VectorValue::new();
    for v in &values {
        vector.push(Value::Integer(*v));
    }
    vector.at(-1).unwrap() == vector.at(values.len() as i64 - 1).unwrap()
}

#[quickcheck]
fn integer_value_boolean_is_always_true(n: i64) -> bool {
    Value::Integer(n).boolean()
}
