// This module defines the WAM32 backend descriptor: the per-opcode encoding layout
// table consumed by the instruction encoder, and the target parameter block (relocation
// model, argument/return register pool, reserved registers) that is constructed once
// and passed by reference into the pipeline. There is deliberately no global target
// registration: every pass that needs target parameters receives a &TargetDescriptor.
// The layout table maps each real opcode to an instruction format (which fields the
// operands occupy) and a 6-bit major opcode placed in bits 31:26. Pseudo opcodes have
// no entry; asking the encoder for one is a fatal MissingEncoding error.

//! Target descriptor and per-opcode encoding layouts for WAM32.
//!
//! All WAM32 instructions are one big-endian 32-bit word. Field positions
//! follow the classic RISC split: major opcode in bits 31:26, register
//! fields at 25:21 / 20:16 / 15:11, shift amounts at 10:6 and immediates in
//! the low 16 bits.

use crate::core::machine_ir::Opcode;
use crate::core::register_file::{reserved_regs, Reg, RegSet};

/// Interpretation of a 16-bit immediate field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImmKind {
    /// Sign-extended arithmetic immediate.
    Arith,
    /// Unsigned logic immediate.
    Logic,
}

/// Instruction formats of the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstFormat {
    /// `op rd, rs, rt` -- three-register ALU.
    Reg3,
    /// `op rt, rs, imm16` -- register/immediate ALU.
    RegImm(ImmKind),
    /// `op rd, rt, sa` -- shift by 5-bit immediate amount.
    ShiftImm,
    /// `op rt, imm16` -- load into the upper register half.
    UpperImm,
    /// `op rt, base, disp16` -- word load/store.
    Mem,
    /// `op rs, rt, target` -- conditional branch.
    Branch,
    /// `op target` -- unconditional jump.
    Jump,
    /// `op sym` -- call with a pc-relative target.
    CallTarget,
    /// `op ra` -- indirect return through the return-address register.
    Return,
    /// `op` -- no operands.
    NoOperands,
}

/// Encoding layout entry for one opcode.
#[derive(Debug, Clone, Copy)]
pub struct OpcodeInfo {
    pub mnemonic: &'static str,
    pub format: InstFormat,
    /// Major opcode, bits 31:26.
    pub major: u8,
}

/// Look up the encoding layout for an opcode. Pseudo opcodes return `None`.
pub fn encoding_info(opcode: Opcode) -> Option<&'static OpcodeInfo> {
    use InstFormat::*;

    macro_rules! info {
        ($mnemonic:expr, $format:expr, $major:expr) => {{
            static INFO: OpcodeInfo = OpcodeInfo {
                mnemonic: $mnemonic,
                format: $format,
                major: $major,
            };
            Some(&INFO)
        }};
    }

    match opcode {
        Opcode::Nop => info!("nop", NoOperands, 0x00),
        Opcode::Add => info!("add", Reg3, 0x01),
        Opcode::Sub => info!("sub", Reg3, 0x02),
        Opcode::And => info!("and", Reg3, 0x03),
        Opcode::Or => info!("or", Reg3, 0x04),
        Opcode::Xor => info!("xor", Reg3, 0x05),
        Opcode::Shl => info!("shl", ShiftImm, 0x06),
        Opcode::Shr => info!("shr", ShiftImm, 0x07),
        Opcode::Sar => info!("sar", ShiftImm, 0x08),
        Opcode::Addi => info!("addi", RegImm(ImmKind::Arith), 0x09),
        Opcode::Andi => info!("andi", RegImm(ImmKind::Logic), 0x0a),
        Opcode::Ori => info!("ori", RegImm(ImmKind::Logic), 0x0b),
        Opcode::Xori => info!("xori", RegImm(ImmKind::Logic), 0x0c),
        Opcode::Lui => info!("lui", UpperImm, 0x0d),
        Opcode::Ldw => info!("ldw", Mem, 0x10),
        Opcode::Stw => info!("stw", Mem, 0x11),
        Opcode::Beq => info!("beq", Branch, 0x20),
        Opcode::Bne => info!("bne", Branch, 0x21),
        Opcode::Bgtu => info!("bgtu", Branch, 0x22),
        Opcode::Bgts => info!("bgts", Branch, 0x23),
        Opcode::Jmp => info!("jmp", Jump, 0x24),
        Opcode::Call => info!("call", CallTarget, 0x25),
        Opcode::Ret => info!("ret", Return, 0x26),
        Opcode::Phi
        | Opcode::Select
        | Opcode::CallseqStart
        | Opcode::CallseqEnd
        | Opcode::DbgValue => None,
    }
}

/// Relocation model requested by the compilation driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocModel {
    /// Absolute addressing; globals materialize as hi16/lo16 pairs.
    Static,
    /// Position-independent code. Not supported by this backend.
    Pic,
}

/// The backend parameter block, constructed once per compilation and passed
/// by reference into every pass.
#[derive(Debug, Clone)]
pub struct TargetDescriptor {
    pub reloc_model: RelocModel,
    /// Integer argument register pool, consumed in order.
    pub arg_regs: [Reg; 4],
    /// Registers never assigned by allocation.
    pub reserved: RegSet,
}

impl TargetDescriptor {
    pub fn new(reloc_model: RelocModel) -> Self {
        Self {
            reloc_model,
            arg_regs: [Reg::gpr(1), Reg::gpr(2), Reg::gpr(3), Reg::gpr(4)],
            reserved: reserved_regs(),
        }
    }

    /// Return-value registers: the argument pool, consumed in the same order.
    pub fn ret_regs(&self) -> &[Reg] {
        &self.arg_regs
    }
}

impl Default for TargetDescriptor {
    fn default() -> Self {
        Self::new(RelocModel::Static)
    }
}
