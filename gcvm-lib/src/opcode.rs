//! This file defines the instruction set and the byte level codec.
//! Most of the codec is generated by the OpCode derive-macro from the proc-macros
//! sub-crate. The generated `decode` refers to [`DecodeError`], which is why it lives here.

use proc_macros::OpCode;
use strum_macros::IntoStaticStr;
use thiserror::Error;

use std::fmt;

/// One instruction. The discriminant is the opcode byte, the field (if any) is the
/// 4 byte little endian operand that follows it in the bytecode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, OpCode, IntoStaticStr)]
#[strum(serialize_all = "UPPERCASE")]
#[repr(u8)]
pub enum OpCode {
    /// push a boxed int
    Push(i32) = 0x01,
    Pop = 0x02,
    Dup = 0x03,

    Add = 0x10,
    Sub = 0x11,
    Mul = 0x12,
    Div = 0x13,
    #[opcode(alias = "CMP")]
    Eq = 0x14,
    Neq = 0x15,
    Lt = 0x16,
    Gt = 0x17,
    Le = 0x18,
    Ge = 0x19,

    /// absolute byte offset
    Jmp(i32) = 0x20,
    /// pops the condition, jumps if it is zero
    Jz(i32) = 0x21,
    /// pops the condition, jumps if it is not zero
    Jnz(i32) = 0x22,

    /// pops into a global memory slot
    Store(i32) = 0x30,
    /// pushes a global memory slot
    Load(i32) = 0x31,

    Call(i32) = 0x40,
    Ret = 0x41,

    /// pops right, then left, pushes a new pair
    Pair = 0x50,
    Left = 0x51,
    Right = 0x52,

    Halt = 0xFF,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("no instruction left to decode")]
    Empty,

    #[error("unknown opcode 0x{0:02X}")]
    Unknown(u8),

    #[error("operand of opcode 0x{0:02X} is truncated")]
    Truncated(u8),
}

impl OpCode {
    pub fn mnemonic(&self) -> &'static str {
        self.into()
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operand() {
            Some(operand) => write!(f, "{:<6} {}", self.mnemonic(), operand),
            None => write!(f, "{}", self.mnemonic()),
        }
    }
}

/// One line of a disassembly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Listing {
    Instruction { offset: usize, op: OpCode },
    /// a byte that is no opcode. Disassembly continues at the next byte
    Unknown { offset: usize, byte: u8 },
    /// an instruction whose operand runs past the end of the code
    Truncated { offset: usize, byte: u8 },
}

impl Listing {
    pub fn offset(&self) -> usize {
        match self {
            Listing::Instruction { offset, .. }
            | Listing::Unknown { offset, .. }
            | Listing::Truncated { offset, .. } => *offset,
        }
    }
}

impl fmt::Display for Listing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Listing::Instruction { offset, op } => write!(f, "{:04}: {}", offset, op),
            Listing::Unknown { offset, byte } => {
                write!(f, "{:04}: UNKNOWN (0x{:02X})", offset, byte)
            }
            Listing::Truncated { offset, byte } => {
                write!(f, "{:04}: TRUNCATED (0x{:02X})", offset, byte)
            }
        }
    }
}

/// decodes at most `max` instructions, beginning at byte offset `start`.
/// Stops after a HALT, at the end of the code, or at a truncated instruction.
pub fn disassemble(code: &[u8], start: usize, max: usize) -> Vec<Listing> {
    let mut listing = vec![];
    let mut offset = start;
    while listing.len() < max && offset < code.len() {
        match OpCode::decode(&code[offset..]) {
            Ok(op) => {
                listing.push(Listing::Instruction { offset, op });
                if op == OpCode::Halt {
                    break;
                }
                offset += op.serialized_size();
            }
            Err(DecodeError::Unknown(byte)) => {
                listing.push(Listing::Unknown { offset, byte });
                offset += 1;
            }
            Err(DecodeError::Truncated(byte)) => {
                listing.push(Listing::Truncated { offset, byte });
                break;
            }
            Err(DecodeError::Empty) => break,
        }
    }
    listing
}

/// encodes a sequence of instructions into a flat byte buffer
pub fn encode(ops: &[OpCode]) -> Vec<u8> {
    ops.iter().flat_map(|op| op.to_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_conversion() {
        let input = OpCode::Jnz(-12);
        let bytes = input.to_bytes();
        assert_eq!(bytes, vec![JNZ, 0xF4, 0xFF, 0xFF, 0xFF]);
        assert_eq!(OpCode::decode(&bytes), Ok(input));
    }

    #[test]
    fn test_size() {
        assert_eq!(OpCode::Push(12).serialized_size(), 5);
        assert_eq!(OpCode::Halt.serialized_size(), 1);
        assert_eq!(OpCode::serialized_size_of(0x19), Some(1));
        assert_eq!(OpCode::serialized_size_of(0x40), Some(5));
        assert_eq!(OpCode::serialized_size_of(0x04), None);
    }

    #[test]
    fn opcode_bytes_match_the_file_format() {
        assert_eq!(OpCode::Push(0).byte(), 0x01);
        assert_eq!(OpCode::Eq.byte(), 0x14);
        assert_eq!(OpCode::Ge.byte(), 0x19);
        assert_eq!(OpCode::Call(0).byte(), 0x40);
        assert_eq!(OpCode::Right.byte(), 0x52);
        assert_eq!(OpCode::Halt.byte(), 0xFF);
    }

    #[test]
    fn decode_errors() {
        assert_eq!(OpCode::decode(&[]), Err(DecodeError::Empty));
        assert_eq!(OpCode::decode(&[0x42]), Err(DecodeError::Unknown(0x42)));
        assert_eq!(
            OpCode::decode(&[PUSH, 1, 0]),
            Err(DecodeError::Truncated(PUSH))
        );
    }

    #[test]
    fn mnemonics() {
        assert_eq!(OpCode::Push(3).mnemonic(), "PUSH");
        assert_eq!(OpCode::Jnz(3).mnemonic(), "JNZ");
        assert_eq!(OpCode::from_mnemonic("CMP", None), Some(OpCode::Eq));
        assert_eq!(OpCode::from_mnemonic("LOAD", Some(7)), Some(OpCode::Load(7)));
        assert_eq!(OpCode::from_mnemonic("LOAD", None), None);
        assert_eq!(OpCode::from_mnemonic("POP", Some(1)), None);
        assert_eq!(OpCode::from_mnemonic("push", Some(1)), None);
        assert_eq!(OpCode::takes_operand("STORE"), Some(true));
        assert_eq!(OpCode::takes_operand("RET"), Some(false));
        assert_eq!(OpCode::takes_operand("NOPE"), None);
    }

    #[test]
    fn disassemble_stops_after_halt() {
        let mut code = encode(&[OpCode::Push(2), OpCode::Push(3), OpCode::Add, OpCode::Halt]);
        code.push(PUSH);
        let listing = disassemble(&code, 0, 10);
        let lines: Vec<_> = listing.iter().map(|l| l.to_string()).collect();
        assert_eq!(
            lines,
            vec!["0000: PUSH   2", "0005: PUSH   3", "0010: ADD", "0011: HALT"]
        );
    }

    #[test]
    fn disassemble_skips_unknown_bytes_and_respects_max() {
        let code = vec![0x04, DUP, 0x99, POP, HALT];
        let listing = disassemble(&code, 0, 3);
        assert_eq!(
            listing,
            vec![
                Listing::Unknown { offset: 0, byte: 0x04 },
                Listing::Instruction { offset: 1, op: OpCode::Dup },
                Listing::Unknown { offset: 2, byte: 0x99 },
            ]
        );
    }

    #[test]
    fn disassemble_reports_truncated_operand() {
        let code = vec![DUP, JMP, 1, 2];
        let listing = disassemble(&code, 1, 10);
        assert_eq!(listing, vec![Listing::Truncated { offset: 1, byte: JMP }]);
    }
}
