//! Instruction fetch and decode.
use crate::constants::*;

/// Operand fields extracted from one 16-bit instruction word.
///
/// `op` is the leading nibble and selects the opcode family; the
/// remaining fields overlap the low 12 bits and which of them are
/// meaningful depends on the family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Operands {
    pub op: u8,
    pub x: u8,
    pub y: u8,
    pub n: u8,
    pub nn: u8,
    pub nnn: u16,
}

/// Extract the operand fields from an instruction word.
///
/// Pure and total over all 16-bit inputs.
#[inline(always)]
pub(crate) fn decode(instr: u16) -> Operands {
    Operands {
        op: ((instr >> 12) & 0xF) as u8,
        x: ((instr >> 8) & 0xF) as u8,
        y: ((instr >> 4) & 0xF) as u8,
        n: (instr & 0xF) as u8,
        nn: (instr & 0xFF) as u8,
        nnn: instr & 0xFFF,
    }
}

/// Read the big-endian instruction word at the program counter.
///
/// Both byte addresses are masked to the 12-bit memory space, so a
/// counter that ran off the end wraps instead of faulting here.
#[inline(always)]
pub(crate) fn fetch_word(ram: &[u8; MEM_SIZE], pc: u16) -> u16 {
    let hi = ram[(pc & ADDR_MASK) as usize];
    let lo = ram[(pc.wrapping_add(1) & ADDR_MASK) as usize];
    ((hi as u16) << 8) | lo as u16
}
