//! Operand primitives: the on-wire encode/decode pair for every value an
//! instruction operand can carry, per the fixed layout table.
//!
//! Corrupted/truncated bytecode is a fatal (`Halt`) condition, not a
//! recoverable one: a truncated read always means the module itself is
//! broken, not something a catch block inside the running program can act
//! on.

use std::io;

use crate::error::RuntimeError;

fn truncated() -> RuntimeError {
    io::Error::new(io::ErrorKind::UnexpectedEof, "truncated bytecode while decoding operand").into()
}

/// Which of the five addressable register sets (plus closure-local) an
/// operand names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RegisterSetKind {
    Local = 0,
    Static = 1,
    Global = 2,
    Arguments = 3,
    Parameters = 4,
    ClosureLocal = 5,
}

impl RegisterSetKind {
    fn from_byte(byte: u8) -> Result<Self, RuntimeError> {
        Ok(match byte {
            0 => Self::Local,
            1 => Self::Static,
            2 => Self::Global,
            3 => Self::Arguments,
            4 => Self::Parameters,
            5 => Self::ClosureLocal,
            _ => return Err(truncated()),
        })
    }
}

/// How a register operand's index should be resolved before use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AccessMode {
    /// Use the register slot itself.
    Direct = 0,
    /// The slot holds an `Integer`; use its value as the true index.
    RegisterIndirect = 1,
    /// The slot holds a `Pointer`; operate on its target.
    PointerDereference = 2,
}

impl AccessMode {
    fn from_byte(byte: u8) -> Result<Self, RuntimeError> {
        Ok(match byte {
            0 => Self::Direct,
            1 => Self::RegisterIndirect,
            2 => Self::PointerDereference,
            _ => return Err(truncated()),
        })
    }
}

/// A decoded register operand: which set, by what access mode, at what
/// 16-bit index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterOperand {
    pub mode: AccessMode,
    pub set: RegisterSetKind,
    pub index: u16,
}

/// `call`/`tailcall`'s callee operand: either a statically named function
/// (`name`) or a register holding a `Function`/`Closure` value (`%r`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum CalleeTag {
    Name = 0,
    Register = 1,
}

impl CalleeTag {
    fn from_byte(byte: u8) -> Result<Self, RuntimeError> {
        Ok(match byte {
            0 => Self::Name,
            1 => Self::Register,
            _ => return Err(truncated()),
        })
    }
}

/// A decoded `call`/`tailcall` callee: the static-name form or the
/// register-indirect form naming a `Function`/`Closure` value.
#[derive(Debug, Clone, PartialEq)]
pub enum Callee {
    Name(String),
    Register(RegisterOperand),
}

/// A cursor over an immutable bytecode buffer, producing a
/// (decoded-value, advanced-cursor) pair per `decode_*` call.
pub struct Decoder<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(bytes: &'a [u8], offset: usize) -> Self {
        Self { bytes, offset }
    }

    /// Current cursor offset into the buffer.
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// Reposition the cursor, e.g. on `jump`.
    pub fn seek(&mut self, offset: usize) {
        self.offset = offset;
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], RuntimeError> {
        let end = self.offset.checked_add(len).ok_or_else(truncated)?;
        let slice = self.bytes.get(self.offset..end).ok_or_else(truncated)?;
        self.offset = end;
        Ok(slice)
    }

    fn take_u8(&mut self) -> Result<u8, RuntimeError> {
        Ok(self.take(1)?[0])
    }

    fn take_u16(&mut self) -> Result<u16, RuntimeError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn take_u32(&mut self) -> Result<u32, RuntimeError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes(bytes.try_into().unwrap()))
    }

    fn take_u64(&mut self) -> Result<u64, RuntimeError> {
        let bytes = self.take(8)?;
        Ok(u64::from_be_bytes(bytes.try_into().unwrap()))
    }

    /// One opcode byte.
    pub fn decode_opcode_byte(&mut self) -> Result<u8, RuntimeError> {
        self.take_u8()
    }

    /// `Register`: mode byte, set byte, big-endian 16-bit index.
    pub fn decode_register(&mut self) -> Result<RegisterOperand, RuntimeError> {
        let mode = AccessMode::from_byte(self.take_u8()?)?;
        let set = RegisterSetKind::from_byte(self.take_u8()?)?;
        let index = self.take_u16()?;
        Ok(RegisterOperand { mode, set, index })
    }

    /// `Void`: a single tag byte, no payload.
    pub fn decode_void(&mut self) -> Result<(), RuntimeError> {
        self.take_u8()?;
        Ok(())
    }

    /// `Atom`: null-terminated bytes.
    pub fn decode_atom(&mut self) -> Result<String, RuntimeError> {
        self.decode_cstr()
    }

    fn decode_cstr(&mut self) -> Result<String, RuntimeError> {
        let start = self.offset;
        loop {
            let byte = self.take_u8()?;
            if byte == 0 {
                let body = &self.bytes[start..self.offset - 1];
                return String::from_utf8(body.to_vec()).map_err(|_| truncated());
            }
        }
    }

    /// `String`: tag byte followed by null-terminated body bytes.
    pub fn decode_string(&mut self) -> Result<Vec<u8>, RuntimeError> {
        self.take_u8()?; // tag
        let start = self.offset;
        loop {
            let byte = self.take_u8()?;
            if byte == 0 {
                return Ok(self.bytes[start..self.offset - 1].to_vec());
            }
        }
    }

    /// `Bits`: tag byte + big-endian 64-bit bit length + body bytes stored
    /// reversed on the wire (the VM operates little-endian-first on bits).
    pub fn decode_bits(&mut self) -> Result<(usize, Vec<u8>), RuntimeError> {
        self.take_u8()?; // tag
        let bit_len = self.take_u64()? as usize;
        let byte_len = bit_len.div_ceil(8);
        let mut bytes = self.take(byte_len)?.to_vec();
        bytes.reverse();
        Ok((bit_len, bytes))
    }

    /// `i32`: tag byte + big-endian 32-bit signed integer.
    pub fn decode_i32(&mut self) -> Result<i32, RuntimeError> {
        self.take_u8()?; // tag
        Ok(self.take_u32()? as i32)
    }

    /// `f64`: raw 8 bytes, host byte order.
    pub fn decode_f64(&mut self) -> Result<f64, RuntimeError> {
        let bytes = self.take(8)?;
        Ok(f64::from_ne_bytes(bytes.try_into().unwrap()))
    }

    /// `Bool`: a single tag byte (nonzero is `True`).
    pub fn decode_bool(&mut self) -> Result<bool, RuntimeError> {
        Ok(self.take_u8()? != 0)
    }

    /// `Timeout`: tag byte + big-endian 32-bit milliseconds, `0` meaning
    /// infinity (documented at every public timeout-accepting boundary).
    pub fn decode_timeout(&mut self) -> Result<u32, RuntimeError> {
        self.take_u8()?; // tag
        self.take_u32()
    }

    /// `Address`: big-endian 64-bit byte offset.
    pub fn decode_address(&mut self) -> Result<u64, RuntimeError> {
        self.take_u64()
    }

    /// `Callee`: tag byte selecting `name` (atom) or `%r` (register).
    pub fn decode_callee(&mut self) -> Result<Callee, RuntimeError> {
        match CalleeTag::from_byte(self.take_u8()?)? {
            CalleeTag::Name => Ok(Callee::Name(self.decode_atom()?)),
            CalleeTag::Register => Ok(Callee::Register(self.decode_register()?)),
        }
    }
}

/// A growable byte buffer producing the mirror encoding of every
/// `Decoder::decode_*` primitive.
#[derive(Debug, Default)]
pub struct Encoder(Vec<u8>);

impl Encoder {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn encode_opcode_byte(&mut self, byte: u8) {
        self.0.push(byte);
    }

    pub fn encode_register(&mut self, operand: RegisterOperand) {
        self.0.push(operand.mode as u8);
        self.0.push(operand.set as u8);
        self.0.extend_from_slice(&operand.index.to_be_bytes());
    }

    pub fn encode_void(&mut self) {
        self.0.push(0);
    }

    pub fn encode_atom(&mut self, atom: &str) {
        self.0.extend_from_slice(atom.as_bytes());
        self.0.push(0);
    }

    pub fn encode_string(&mut self, tag: u8, bytes: &[u8]) {
        self.0.push(tag);
        self.0.extend_from_slice(bytes);
        self.0.push(0);
    }

    pub fn encode_bits(&mut self, tag: u8, bit_len: usize, bytes: &[u8]) {
        self.0.push(tag);
        self.0.extend_from_slice(&(bit_len as u64).to_be_bytes());
        let mut reversed = bytes.to_vec();
        reversed.reverse();
        self.0.extend_from_slice(&reversed);
    }

    pub fn encode_i32(&mut self, tag: u8, value: i32) {
        self.0.push(tag);
        self.0.extend_from_slice(&(value as u32).to_be_bytes());
    }

    pub fn encode_f64(&mut self, value: f64) {
        self.0.extend_from_slice(&value.to_ne_bytes());
    }

    pub fn encode_bool(&mut self, value: bool) {
        self.0.push(value as u8);
    }

    pub fn encode_timeout(&mut self, tag: u8, millis: u32) {
        self.0.push(tag);
        self.0.extend_from_slice(&millis.to_be_bytes());
    }

    pub fn encode_address(&mut self, address: u64) {
        self.0.extend_from_slice(&address.to_be_bytes());
    }

    pub fn encode_callee_name(&mut self, name: &str) {
        self.0.push(CalleeTag::Name as u8);
        self.encode_atom(name);
    }

    pub fn encode_callee_register(&mut self, operand: RegisterOperand) {
        self.0.push(CalleeTag::Register as u8);
        self.encode_register(operand);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_operand_round_trips() {
        let operand = RegisterOperand {
            mode: AccessMode::PointerDereference,
            set: RegisterSetKind::Static,
            index: 42,
        };
        let mut enc = Encoder::new();
        enc.encode_register(operand);
        let bytes = enc.into_bytes();
        let mut dec = Decoder::new(&bytes, 0);
        let decoded = dec.decode_register().unwrap();
        assert_eq!(decoded, operand);
        assert_eq!(dec.offset(), bytes.len());
    }

    #[test]
    fn atom_round_trips() {
        let mut enc = Encoder::new();
        enc.encode_atom("ping");
        let bytes = enc.into_bytes();
        let mut dec = Decoder::new(&bytes, 0);
        assert_eq!(dec.decode_atom().unwrap(), "ping");
    }

    #[test]
    fn bits_are_stored_reversed_on_wire() {
        let mut enc = Encoder::new();
        enc.encode_bits(0, 16, &[0x01, 0x02]);
        let bytes = enc.into_bytes();
        assert_eq!(&bytes[9..], &[0x02, 0x01]);
        let mut dec = Decoder::new(&bytes, 0);
        let (bit_len, body) = dec.decode_bits().unwrap();
        assert_eq!(bit_len, 16);
        assert_eq!(body, vec![0x01, 0x02]);
    }

    #[test]
    fn f64_round_trips_at_host_byte_order() {
        let mut enc = Encoder::new();
        enc.encode_f64(3.5);
        let bytes = enc.into_bytes();
        let mut dec = Decoder::new(&bytes, 0);
        assert_eq!(dec.decode_f64().unwrap(), 3.5);
    }

    #[test]
    fn timeout_zero_means_infinity_by_convention() {
        let mut enc = Encoder::new();
        enc.encode_timeout(0, 0);
        let bytes = enc.into_bytes();
        let mut dec = Decoder::new(&bytes, 0);
        assert_eq!(dec.decode_timeout().unwrap(), 0);
    }

    #[test]
    fn callee_name_form_round_trips() {
        let mut enc = Encoder::new();
        enc.encode_callee_name("compute/2");
        let bytes = enc.into_bytes();
        let mut dec = Decoder::new(&bytes, 0);
        assert_eq!(dec.decode_callee().unwrap(), Callee::Name("compute/2".to_owned()));
    }

    #[test]
    fn callee_register_form_round_trips() {
        let operand = RegisterOperand { mode: AccessMode::Direct, set: RegisterSetKind::Local, index: 3 };
        let mut enc = Encoder::new();
        enc.encode_callee_register(operand);
        let bytes = enc.into_bytes();
        let mut dec = Decoder::new(&bytes, 0);
        assert_eq!(dec.decode_callee().unwrap(), Callee::Register(operand));
    }

    #[test]
    fn truncated_buffer_is_an_error() {
        let bytes = [0u8; 1];
        let mut dec = Decoder::new(&bytes, 0);
        assert!(dec.decode_register().is_err());
    }
}
