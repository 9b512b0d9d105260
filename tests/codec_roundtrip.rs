//! Black-box encode/decode coverage for the operand codec and the opcode
//! table, exercised only through the crate's public API.

use viua_rt::codec::{AccessMode, Decoder, Encoder, Opcode, RegisterOperand, RegisterSetKind};

fn all_register_set_kinds() -> [RegisterSetKind; 6] {
    [
        RegisterSetKind::Local,
        RegisterSetKind::Static,
        RegisterSetKind::Global,
        RegisterSetKind::Arguments,
        RegisterSetKind::Parameters,
        RegisterSetKind::ClosureLocal,
    ]
}

fn all_access_modes() -> [AccessMode; 3] {
    [AccessMode::Direct, AccessMode::RegisterIndirect, AccessMode::PointerDereference]
}

#[test]
fn every_register_operand_combination_round_trips() {
    for mode in all_access_modes() {
        for set in all_register_set_kinds() {
            for index in [0u16, 1, 255, 65535] {
                let operand = RegisterOperand { mode, set, index };
                let mut enc = Encoder::new();
                enc.encode_register(operand);
                let bytes = enc.into_bytes();
                assert_eq!(bytes.len(), 4, "register operand must be a fixed 4 bytes on the wire");
                let mut dec = Decoder::new(&bytes, 0);
                assert_eq!(dec.decode_register().unwrap(), operand);
            }
        }
    }
}

#[test]
fn opcode_mnemonics_are_unique_and_non_empty() {
    let mut seen = std::collections::HashSet::new();
    for byte in 0u8.. {
        let Ok(op) = Opcode::try_from_byte(byte) else { break };
        let mnemonic = op.mnemonic();
        assert!(!mnemonic.is_empty());
        assert!(seen.insert(mnemonic), "duplicate mnemonic: {mnemonic}");
    }
    assert!(seen.len() > 50, "expected a substantial fixed opcode table, found {}", seen.len());
}

#[test]
fn string_operand_round_trips_arbitrary_bytes() {
    let mut enc = Encoder::new();
    enc.encode_string(0, b"hello, world");
    let bytes = enc.into_bytes();
    let mut dec = Decoder::new(&bytes, 0);
    assert_eq!(dec.decode_string().unwrap(), b"hello, world");
    assert_eq!(dec.offset(), bytes.len());
}

#[test]
fn i32_operand_preserves_negative_values() {
    let mut enc = Encoder::new();
    enc.encode_i32(0, -12345);
    let bytes = enc.into_bytes();
    let mut dec = Decoder::new(&bytes, 0);
    assert_eq!(dec.decode_i32().unwrap(), -12345);
}

#[test]
fn address_operand_round_trips_full_width() {
    let mut enc = Encoder::new();
    enc.encode_address(u64::MAX - 1);
    let bytes = enc.into_bytes();
    let mut dec = Decoder::new(&bytes, 0);
    assert_eq!(dec.decode_address().unwrap(), u64::MAX - 1);
}

#[test]
fn multiple_operands_decode_in_sequence_from_one_cursor() {
    let mut enc = Encoder::new();
    enc.encode_opcode_byte(Opcode::Add as u8);
    enc.encode_register(RegisterOperand { mode: AccessMode::Direct, set: RegisterSetKind::Local, index: 0 });
    enc.encode_register(RegisterOperand { mode: AccessMode::Direct, set: RegisterSetKind::Local, index: 1 });
    enc.encode_register(RegisterOperand { mode: AccessMode::Direct, set: RegisterSetKind::Local, index: 2 });
    let bytes = enc.into_bytes();

    let mut dec = Decoder::new(&bytes, 0);
    assert_eq!(dec.decode_opcode_byte().unwrap(), Opcode::Add as u8);
    let dst = dec.decode_register().unwrap();
    let lhs = dec.decode_register().unwrap();
    let rhs = dec.decode_register().unwrap();
    assert_eq!(dst.index, 0);
    assert_eq!(lhs.index, 1);
    assert_eq!(rhs.index, 2);
    assert_eq!(dec.offset(), bytes.len());
}

#[test]
fn seek_repositions_the_cursor() {
    let mut enc = Encoder::new();
    enc.encode_address(1);
    enc.encode_address(2);
    let bytes = enc.into_bytes();
    let mut dec = Decoder::new(&bytes, 0);
    assert_eq!(dec.decode_address().unwrap(), 1);
    dec.seek(0);
    assert_eq!(dec.decode_address().unwrap(), 1);
}
