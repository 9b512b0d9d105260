//! Bytecode codec: the opcode map and the operand encode/decode primitives.
//!
//! Instruction encoding is fixed-opcode (1 byte) followed by operands whose
//! layout is opcode-specific; the per-opcode operand layouts live with the
//! dispatch loop in [`crate::process::dispatch`], which is the only
//! consumer that knows, for a given opcode, which primitives follow it.

pub mod opcode;
pub mod operand;

pub use opcode::Opcode;
pub use operand::{AccessMode, Callee, Decoder, Encoder, RegisterOperand, RegisterSetKind};
