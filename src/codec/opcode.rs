//! The fixed, total opcode map. Byte 0 is always `NOP`.

use crate::error::{PanicReason, RuntimeError};

/// One instruction mnemonic. Discriminants are the on-wire opcode byte;
/// never renumber an existing variant, only append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Nop = 0,
    // arithmetic
    Add,
    Sub,
    Mul,
    Div,
    // comparisons
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
    // conversions
    Itof,
    Ftoi,
    Stoi,
    Stof,
    // text
    TextEq,
    TextAt,
    TextSub,
    TextLength,
    TextCommonPrefix,
    TextCommonSuffix,
    TextConcat,
    // vector
    VectorCtor,
    VectorInsert,
    VectorPush,
    VectorPop,
    VectorAt,
    VectorLen,
    // boolean
    Bool,
    Not,
    And,
    Or,
    // bits
    Bits,
    Bitand,
    Bitor,
    Bitxor,
    Bitnot,
    Bitswidth,
    Bitat,
    Bitset,
    Shl,
    Shr,
    Ashl,
    Ashr,
    Rol,
    Ror,
    WrapAdd,
    WrapSub,
    WrapMul,
    WrapDiv,
    WrapIncrement,
    WrapDecrement,
    CheckedSAdd,
    CheckedSSub,
    CheckedSMul,
    CheckedSDiv,
    CheckedSIncrement,
    CheckedSDecrement,
    SaturatingSAdd,
    SaturatingSSub,
    SaturatingSMul,
    SaturatingSDiv,
    SaturatingSIncrement,
    SaturatingSDecrement,
    // copy/move
    Move,
    Copy,
    Ptr,
    Ptrlive,
    Swap,
    Delete,
    Isnull,
    // closure
    Capture,
    Capturecopy,
    Capturemove,
    Closure,
    Function,
    // call
    Frame,
    Param,
    Pamv,
    Call,
    Tailcall,
    Defer,
    Arg,
    AllocateRegisters,
    Return,
    // concurrency
    Process,
    Self_,
    Join,
    Send,
    Receive,
    Watchdog,
    // control
    Jump,
    If,
    // exception
    Throw,
    Catch,
    Draw,
    Try,
    Enter,
    Leave,
    // other
    Atom,
    Struct,
    StructInsert,
    StructRemove,
    StructAt,
    StructKeys,
    Import,
    Ress,
    Halt,
    Print,
    Echo,
}

impl Opcode {
    /// The stable mnemonic name used in diagnostics, matching the
    /// instruction-family names of the instruction set.
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Self::Nop => "nop",
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Eq => "eq",
            Self::Itof => "itof",
            Self::Ftoi => "ftoi",
            Self::Stoi => "stoi",
            Self::Stof => "stof",
            Self::TextEq => "texteq",
            Self::TextAt => "textat",
            Self::TextSub => "textsub",
            Self::TextLength => "textlength",
            Self::TextCommonPrefix => "textcommonprefix",
            Self::TextCommonSuffix => "textcommonsuffix",
            Self::TextConcat => "textconcat",
            Self::VectorCtor => "vec",
            Self::VectorInsert => "vinsert",
            Self::VectorPush => "vpush",
            Self::VectorPop => "vpop",
            Self::VectorAt => "vat",
            Self::VectorLen => "vlen",
            Self::Bool => "bool",
            Self::Not => "not",
            Self::And => "and",
            Self::Or => "or",
            Self::Bits => "bits",
            Self::Bitand => "bitand",
            Self::Bitor => "bitor",
            Self::Bitxor => "bitxor",
            Self::Bitnot => "bitnot",
            Self::Bitswidth => "bitswidth",
            Self::Bitat => "bitat",
            Self::Bitset => "bitset",
            Self::Shl => "shl",
            Self::Shr => "shr",
            Self::Ashl => "ashl",
            Self::Ashr => "ashr",
            Self::Rol => "rol",
            Self::Ror => "ror",
            Self::WrapAdd => "wrapadd",
            Self::WrapSub => "wrapsub",
            Self::WrapMul => "wrapmul",
            Self::WrapDiv => "wrapdiv",
            Self::WrapIncrement => "wrapincrement",
            Self::WrapDecrement => "wrapdecrement",
            Self::CheckedSAdd => "checked_sadd",
            Self::CheckedSSub => "checked_ssub",
            Self::CheckedSMul => "checked_smul",
            Self::CheckedSDiv => "checked_sdiv",
            Self::CheckedSIncrement => "checked_sincrement",
            Self::CheckedSDecrement => "checked_sdecrement",
            Self::SaturatingSAdd => "saturating_sadd",
            Self::SaturatingSSub => "saturating_ssub",
            Self::SaturatingSMul => "saturating_smul",
            Self::SaturatingSDiv => "saturating_sdiv",
            Self::SaturatingSIncrement => "saturating_sincrement",
            Self::SaturatingSDecrement => "saturating_sdecrement",
            Self::Move => "move",
            Self::Copy => "copy",
            Self::Ptr => "ptr",
            Self::Ptrlive => "ptrlive",
            Self::Swap => "swap",
            Self::Delete => "delete",
            Self::Isnull => "isnull",
            Self::Capture => "capture",
            Self::Capturecopy => "capturecopy",
            Self::Capturemove => "capturemove",
            Self::Closure => "closure",
            Self::Function => "function",
            Self::Frame => "frame",
            Self::Param => "param",
            Self::Pamv => "pamv",
            Self::Call => "call",
            Self::Tailcall => "tailcall",
            Self::Defer => "defer",
            Self::Arg => "arg",
            Self::AllocateRegisters => "allocate_registers",
            Self::Return => "return",
            Self::Process => "process",
            Self::Self_ => "self",
            Self::Join => "join",
            Self::Send => "send",
            Self::Receive => "receive",
            Self::Watchdog => "watchdog",
            Self::Jump => "jump",
            Self::If => "if",
            Self::Throw => "throw",
            Self::Catch => "catch",
            Self::Draw => "draw",
            Self::Try => "try",
            Self::Enter => "enter",
            Self::Leave => "leave",
            Self::Atom => "atom",
            Self::Struct => "struct",
            Self::StructInsert => "sinsert",
            Self::StructRemove => "sremove",
            Self::StructAt => "sat",
            Self::StructKeys => "skeys",
            Self::Import => "import",
            Self::Ress => "ress",
            Self::Halt => "halt",
            Self::Print => "print",
            Self::Echo => "echo",
        }
    }

    const COUNT: u8 = Self::Echo as u8 + 1;

    /// Decode an opcode byte. Any byte beyond the fixed table is an
    /// unimplemented/reserved opcode.
    pub fn try_from_byte(byte: u8) -> Result<Self, RuntimeError> {
        if byte >= Self::COUNT {
            return Err(PanicReason::UnimplementedOpcode.into());
        }
        // SAFETY: `Opcode` is `#[repr(u8)]` and every discriminant below
        // `COUNT` is assigned to a variant by the enum's declaration order.
        Ok(unsafe { std::mem::transmute::<u8, Opcode>(byte) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nop_is_opcode_zero() {
        assert_eq!(Opcode::Nop as u8, 0);
    }

    #[test]
    fn every_opcode_round_trips_through_its_byte() {
        for byte in 0..Opcode::COUNT {
            let op = Opcode::try_from_byte(byte).unwrap();
            assert_eq!(op as u8, byte);
        }
    }

    #[test]
    fn byte_beyond_table_is_unimplemented() {
        assert!(Opcode::try_from_byte(Opcode::COUNT).is_err());
        assert!(Opcode::try_from_byte(255).is_err());
    }
}
